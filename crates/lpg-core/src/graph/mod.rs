//! Graph model builder.
//!
//! Merges resources and derived relations into one node/edge graph. The
//! output is sorted by id, so two builds over the same input compare equal.

pub mod relations;

use crate::catalog::CatalogBatch;
use crate::models::{DiscoveryResult, Edge, GraphNode, Resource, UsageStatus};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, instrument};

pub use relations::{derive_relations, DanglingEdge, RelationSet};

/// Problems recovered from while building.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildDiagnostics {
    /// Edges dropped because an endpoint was not in the node set.
    pub dangling_edges: usize,
    /// Records the catalog adapter rejected.
    pub malformed_resources: usize,
}

/// A built graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphModel {
    /// Sorted by id.
    pub nodes: Vec<GraphNode>,
    /// Sorted by id; every endpoint is in `nodes`.
    pub edges: Vec<Edge>,
    pub diagnostics: BuildDiagnostics,
}

impl GraphModel {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes
            .binary_search_by(|n| n.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.nodes[i])
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }
}

/// Builds the graph for a resource set.
///
/// Duplicate ids keep the first resource. A synthetic internet node is added
/// iff some security group admits `0.0.0.0/0` or `::/0`. `discovery_edges`
/// are merged with the derived edges by id.
#[instrument(skip_all, fields(resources = resources.len()))]
pub fn build_graph(resources: &[Resource], discovery_edges: Option<&[Edge]>) -> GraphModel {
    let mut seen = HashSet::new();
    let unique: Vec<Resource> = resources
        .iter()
        .filter(|r| seen.insert(r.id.as_str()))
        .cloned()
        .collect();

    let relations = derive_relations(&unique);

    let mut nodes: Vec<GraphNode> = unique.iter().map(GraphNode::from_resource).collect();
    if relations.has_internet {
        nodes.push(GraphNode::internet());
    }

    let mut edges = relations.edges;
    if let Some(extra) = discovery_edges {
        edges.extend(extra.iter().cloned());
    }

    let mut model = assemble(nodes, edges);
    model.diagnostics.dangling_edges += relations.dangling.len();
    debug!(
        nodes = model.nodes.len(),
        edges = model.edges.len(),
        dangling = model.diagnostics.dangling_edges,
        "Built resource graph"
    );
    model
}

/// Builds the graph for a normalised inventory page, carrying its rejections.
pub fn build_from_batch(batch: &CatalogBatch) -> GraphModel {
    let mut model = build_graph(&batch.resources, None);
    model.diagnostics.malformed_resources = batch.rejected.len();
    model
}

/// Sorts nodes, merges edges by id, drops edges with an absent endpoint and
/// sums usage counters from incoming edges.
pub fn assemble(nodes: Vec<GraphNode>, edges: Vec<Edge>) -> GraphModel {
    let mut by_id: BTreeMap<String, GraphNode> = BTreeMap::new();
    for node in nodes {
        by_id.entry(node.id.clone()).or_insert(node);
    }

    let mut merged: BTreeMap<String, Edge> = BTreeMap::new();
    let mut dangling = 0;
    for edge in edges {
        if !by_id.contains_key(&edge.from) || !by_id.contains_key(&edge.to) {
            dangling += 1;
            continue;
        }
        match merged.get_mut(&edge.id) {
            Some(existing) => existing.merge(&edge),
            None => {
                merged.insert(edge.id.clone(), edge);
            }
        }
    }

    for node in by_id.values_mut() {
        node.used_count = 0;
        node.unused_count = 0;
    }
    for edge in merged.values() {
        if let Some(target) = by_id.get_mut(&edge.to) {
            match edge.status {
                UsageStatus::Used => target.used_count += 1,
                UsageStatus::Unused => target.unused_count += 1,
                UsageStatus::Unknown => {}
            }
        }
    }

    GraphModel {
        nodes: by_id.into_values().collect(),
        edges: merged.into_values().collect(),
        diagnostics: BuildDiagnostics {
            dangling_edges: dangling,
            malformed_resources: 0,
        },
    }
}

/// Copies membership scores from a discovery result onto matching nodes.
pub fn apply_discovery(model: &mut GraphModel, result: &DiscoveryResult) {
    let scores: HashMap<&str, f64> = result
        .all()
        .map(|r| (r.resource.id.as_str(), r.membership_score))
        .collect();
    for node in &mut model.nodes {
        if let Some(score) = scores.get(node.id.as_str()) {
            node.membership_score = Some(*score);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DiscoveredResource, DiscoverySource, IngressRule, PortRange, RelationType,
        ResourceAttributes, ResourceType, RuleSource, INTERNET_NODE_ID,
    };
    use std::collections::BTreeSet;

    fn public_sg(id: &str) -> Resource {
        Resource::new(id, ResourceType::SecurityGroup).with_attributes(ResourceAttributes {
            ingress_rules: vec![IngressRule {
                protocol: "tcp".into(),
                ports: PortRange::single(443),
                source: RuleSource::Cidr("0.0.0.0/0".into()),
                status: UsageStatus::Used,
            }],
            ..Default::default()
        })
    }

    #[test]
    fn test_internet_node_only_when_public() {
        let private = build_graph(&[Resource::new("sg-1", ResourceType::SecurityGroup)], None);
        assert!(private.node(INTERNET_NODE_ID).is_none());
        assert!(private.edges.is_empty());

        let public = build_graph(&[public_sg("sg-1"), public_sg("sg-2")], None);
        let internet_nodes = public
            .nodes
            .iter()
            .filter(|n| n.id == INTERNET_NODE_ID)
            .count();
        assert_eq!(internet_nodes, 1);
        assert_eq!(public.edges.len(), 2);
    }

    #[test]
    fn test_usage_counts_from_incoming_edges() {
        let model = build_graph(&[public_sg("sg-1")], None);
        let sg = model.node("sg-1").unwrap();
        assert_eq!(sg.used_count, 1);
        assert_eq!(sg.unused_count, 0);
    }

    #[test]
    fn test_duplicate_resources_first_wins() {
        let model = build_graph(
            &[
                Resource::new("i-1", ResourceType::Ec2Instance).with_name("first"),
                Resource::new("i-1", ResourceType::Ec2Instance).with_name("second"),
            ],
            None,
        );
        assert_eq!(model.nodes.len(), 1);
        assert_eq!(model.nodes[0].display_name, "first");
    }

    #[test]
    fn test_discovery_edges_are_merged_and_pruned() {
        let resources = vec![
            Resource::new("i-1", ResourceType::Ec2Instance),
            Resource::new("fn-1", ResourceType::Lambda),
        ];
        let extra = vec![
            Edge::new("fn-1", "i-1", RelationType::Invocation),
            Edge::new("fn-1", "i-1", RelationType::Invocation),
            Edge::new("fn-1", "missing", RelationType::Invocation),
        ];
        let model = build_graph(&resources, Some(&extra));
        assert_eq!(model.edges.len(), 1);
        assert_eq!(model.diagnostics.dangling_edges, 1);
    }

    #[test]
    fn test_build_is_deterministic() {
        let resources = vec![
            public_sg("sg-b"),
            Resource::new("i-1", ResourceType::Ec2Instance).with_attributes(ResourceAttributes {
                security_groups: vec!["sg-b".into()],
                ..Default::default()
            }),
            public_sg("sg-a"),
        ];
        let mut reversed = resources.clone();
        reversed.reverse();

        let first = build_graph(&resources, None);
        let second = build_graph(&reversed, None);
        assert_eq!(first, second);
        let ids: Vec<&str> = first.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["i-1", INTERNET_NODE_ID, "sg-a", "sg-b"]);
    }

    #[test]
    fn test_apply_discovery_sets_scores() {
        let mut model = build_graph(&[Resource::new("i-1", ResourceType::Ec2Instance)], None);
        let result = DiscoveryResult::assemble(
            "payments",
            vec![DiscoveredResource {
                resource: Resource::new("i-1", ResourceType::Ec2Instance),
                source: DiscoverySource::Seed,
                membership_score: 1.0,
                discovery_path: vec!["i-1".into()],
                edge_types: BTreeSet::new(),
                is_shared: false,
                shared_with: BTreeSet::new(),
                depth: 0,
            }],
            vec![],
            vec![],
        );
        apply_discovery(&mut model, &result);
        assert_eq!(model.nodes[0].membership_score, Some(1.0));
    }
}
