//! Relationship derivation from resource attributes.
//!
//! Edges are never stored; they are recomputed from the current resource set
//! every time a graph is built.

use crate::models::{
    Edge, RelationType, Resource, ResourceType, RuleSource, INTERNET_NODE_ID,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

/// An edge whose target is not in the resource set.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Dangling {relation} edge {from} -> {to}")]
pub struct DanglingEdge {
    pub from: String,
    pub to: String,
    pub relation: RelationType,
}

/// Edges derived from one resource set.
#[derive(Debug, Clone, Default)]
pub struct RelationSet {
    /// Merged by id, sorted by id.
    pub edges: Vec<Edge>,
    /// References that did not resolve to a resource in the set.
    pub dangling: Vec<DanglingEdge>,
    /// True when some security group admits traffic from the internet.
    pub has_internet: bool,
}

/// Resolves references written as ids, ARNs or names to resource ids.
struct ReferenceIndex<'a> {
    by_id: HashMap<&'a str, &'a str>,
    by_tail: HashMap<&'a str, &'a str>,
    by_name: HashMap<&'a str, Option<&'a str>>,
}

impl<'a> ReferenceIndex<'a> {
    fn new(resources: &'a [Resource]) -> Self {
        let mut by_id = HashMap::new();
        let mut by_tail = HashMap::new();
        let mut by_name: HashMap<&str, Option<&str>> = HashMap::new();

        for resource in resources {
            let id = resource.id.as_str();
            by_id.entry(id).or_insert(id);
            by_tail.entry(arn_tail(id)).or_insert(id);
            // Names are only usable when unambiguous.
            by_name
                .entry(resource.name.as_str())
                .and_modify(|slot| {
                    if *slot != Some(id) {
                        *slot = None;
                    }
                })
                .or_insert(Some(id));
        }

        Self {
            by_id,
            by_tail,
            by_name,
        }
    }

    fn resolve(&self, reference: &str) -> Option<&'a str> {
        let reference = reference.trim();
        self.by_id
            .get(reference)
            .or_else(|| self.by_tail.get(arn_tail(reference)))
            .copied()
            .or_else(|| self.by_name.get(reference).copied().flatten())
    }
}

/// Last segment of an ARN (`arn:aws:iam::1:role/app` → `app`); other ids unchanged.
fn arn_tail(reference: &str) -> &str {
    if !reference.starts_with("arn:") {
        return reference;
    }
    reference
        .rsplit(['/', ':'])
        .next()
        .filter(|tail| !tail.is_empty())
        .unwrap_or(reference)
}

/// Derives every relation the resource attributes describe.
pub fn derive_relations(resources: &[Resource]) -> RelationSet {
    let index = ReferenceIndex::new(resources);
    let mut edges: BTreeMap<String, Edge> = BTreeMap::new();
    let mut dangling = Vec::new();
    let mut has_internet = false;

    let mut push = |edge: Edge| match edges.get_mut(&edge.id) {
        Some(existing) => existing.merge(&edge),
        None => {
            edges.insert(edge.id.clone(), edge);
        }
    };

    for resource in resources {
        let id = resource.id.as_str();
        let attrs = &resource.attributes;

        if resource.resource_type == ResourceType::SecurityGroup {
            for rule in &attrs.ingress_rules {
                match &rule.source {
                    RuleSource::Cidr(_) if rule.is_public() => {
                        has_internet = true;
                        push(
                            Edge::new(INTERNET_NODE_ID, id, RelationType::Internet)
                                .with_ports(rule.ports)
                                .with_status(rule.status),
                        );
                    }
                    RuleSource::Cidr(_) => {}
                    RuleSource::SecurityGroup(source) => match index.resolve(source) {
                        // Self-referencing rules admit group members; no edge.
                        Some(source_id) if source_id == id => {}
                        Some(source_id) => push(
                            Edge::new(source_id, id, RelationType::SgToSg)
                                .with_ports(rule.ports)
                                .with_status(rule.status),
                        ),
                        None => dangling.push(DanglingEdge {
                            from: source.clone(),
                            to: id.to_string(),
                            relation: RelationType::SgToSg,
                        }),
                    },
                }
            }
        }

        let references = attrs
            .security_groups
            .iter()
            .map(|sg| (sg, RelationType::Attachment))
            .chain(attrs.role.iter().map(|r| (r, RelationType::IamAssumes)))
            .chain(attrs.data_access.iter().map(|t| (t, RelationType::DataAccess)))
            .chain(attrs.invokes.iter().map(|t| (t, RelationType::Invocation)))
            .chain(attrs.subnet_id.iter().map(|s| (s, RelationType::Containment)))
            .chain(attrs.vpc_id.iter().map(|v| (v, RelationType::Containment)));

        for (reference, relation) in references {
            match index.resolve(reference) {
                Some(target) if target == id => {}
                Some(target) => push(Edge::new(id, target, relation)),
                None => dangling.push(DanglingEdge {
                    from: id.to_string(),
                    to: reference.clone(),
                    relation,
                }),
            }
        }
    }

    debug!(
        edges = edges.len(),
        dangling = dangling.len(),
        "Derived resource relations"
    );

    RelationSet {
        edges: edges.into_values().collect(),
        dangling,
        has_internet,
    }
}
