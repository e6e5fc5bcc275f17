//! Resource catalog adapter.
//!
//! Inventory records arrive as loosely typed JSON. This module validates each
//! record into a strict [`Resource`]; a record that cannot be validated is
//! rejected on its own and reported, the rest of the batch goes through.

use crate::graph::{self, GraphModel};
use crate::models::{
    Edge, GraphNode, IngressRule, NodeCategory, PortRange, RelationType, Resource,
    ResourceAttributes, ResourceType, RuleSource, UsageStatus, INTERNET_NODE_ID,
};
use lpg_connectors::wire::{RawIngressRule, RawResource, TopologyEdge, TopologyResponse};
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

/// Tag carrying the resource's display name.
pub const NAME_TAG: &str = "Name";
/// Tag carrying the system a resource belongs to.
pub const SYSTEM_TAG: &str = "SystemName";

/// A record rejected by the adapter.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("Malformed resource at index {index}: {reason}")]
pub struct MalformedResource {
    /// Position of the record in the input.
    pub index: usize,
    /// Id, when the record had one.
    pub id: Option<String>,
    pub reason: String,
}

/// Result of normalising one inventory page.
#[derive(Debug, Clone, Default)]
pub struct CatalogBatch {
    pub resources: Vec<Resource>,
    pub rejected: Vec<MalformedResource>,
}

/// Validates raw JSON records into resources.
pub fn normalize(records: &[serde_json::Value]) -> CatalogBatch {
    let mut batch = CatalogBatch::default();
    let mut seen = HashSet::new();

    for (index, value) in records.iter().enumerate() {
        let outcome = serde_json::from_value::<RawResource>(value.clone())
            .map_err(|e| MalformedResource {
                index,
                id: value.get("id").and_then(|v| v.as_str()).map(str::to_string),
                reason: format!("unreadable record: {}", e),
            })
            .and_then(|raw| convert(index, raw));
        accept(&mut batch, &mut seen, outcome);
    }

    debug!(
        accepted = batch.resources.len(),
        rejected = batch.rejected.len(),
        "Normalized inventory records"
    );
    batch
}

/// Validates already-decoded records into resources.
pub fn normalize_raw(records: Vec<RawResource>) -> CatalogBatch {
    let mut batch = CatalogBatch::default();
    let mut seen = HashSet::new();
    for (index, raw) in records.into_iter().enumerate() {
        accept(&mut batch, &mut seen, convert(index, raw));
    }
    batch
}

fn accept(
    batch: &mut CatalogBatch,
    seen: &mut HashSet<String>,
    outcome: Result<Resource, MalformedResource>,
) {
    let rejected = match outcome {
        Ok(resource) if seen.insert(resource.id.clone()) => {
            batch.resources.push(resource);
            return;
        }
        Ok(resource) => MalformedResource {
            index: batch.resources.len() + batch.rejected.len(),
            id: Some(resource.id),
            reason: "duplicate id".to_string(),
        },
        Err(rejected) => rejected,
    };
    warn!(
        index = rejected.index,
        id = rejected.id.as_deref().unwrap_or("<none>"),
        reason = %rejected.reason,
        "Dropping malformed resource"
    );
    batch.rejected.push(rejected);
}

/// Converts one record. Fails when `id` or `type` is missing or blank.
pub fn convert(index: usize, raw: RawResource) -> Result<Resource, MalformedResource> {
    let id = non_blank(raw.id.as_deref());
    let resource_type = non_blank(raw.resource_type.as_deref());

    let (id, resource_type) = match (id, resource_type) {
        (Some(id), Some(t)) => (id, ResourceType::parse(&t)),
        (None, _) => {
            return Err(MalformedResource {
                index,
                id: None,
                reason: "missing id".to_string(),
            })
        }
        (Some(id), None) => {
            return Err(MalformedResource {
                index,
                id: Some(id),
                reason: "missing type".to_string(),
            })
        }
    };

    // The synthetic internet node owns this id.
    if id == INTERNET_NODE_ID {
        return Err(MalformedResource {
            index,
            id: Some(id),
            reason: "reserved id".to_string(),
        });
    }

    let tags = raw.tags.map(|t| t.into_map()).unwrap_or_default();
    let name = non_blank(raw.name.as_deref())
        .or_else(|| non_blank(tags.get(NAME_TAG).map(String::as_str)))
        .unwrap_or_else(|| id.clone());

    let mut systems: std::collections::BTreeSet<String> = raw
        .systems
        .iter()
        .filter_map(|s| non_blank(Some(s.as_str())))
        .collect();
    if let Some(system) = non_blank(tags.get(SYSTEM_TAG).map(String::as_str)) {
        systems.insert(system);
    }

    let ingress_rules = raw
        .ingress_rules
        .iter()
        .filter_map(|rule| convert_rule(&id, rule))
        .collect();

    Ok(Resource {
        name,
        resource_type,
        region: non_blank(raw.region.as_deref()),
        provider: non_blank(raw.provider.as_deref()).unwrap_or_else(|| "aws".to_string()),
        tags,
        systems,
        attributes: ResourceAttributes {
            ingress_rules,
            security_groups: clean_ids(raw.security_groups),
            role: non_blank(raw.role.as_deref()),
            vpc_id: non_blank(raw.vpc_id.as_deref()),
            subnet_id: non_blank(raw.subnet_id.as_deref()),
            data_access: clean_ids(raw.data_access),
            invokes: clean_ids(raw.invokes),
            severity: non_blank(raw.severity.as_deref()),
        },
        id,
    })
}

fn convert_rule(owner: &str, rule: &RawIngressRule) -> Option<IngressRule> {
    let source = match (
        non_blank(rule.source_group.as_deref()),
        non_blank(rule.cidr.as_deref()),
    ) {
        (Some(group), _) => RuleSource::SecurityGroup(group),
        (None, Some(cidr)) => RuleSource::Cidr(cidr),
        (None, None) => {
            debug!(security_group = owner, "Skipping ingress rule without a source");
            return None;
        }
    };

    let protocol = non_blank(rule.protocol.as_deref()).unwrap_or_else(|| "tcp".to_string());
    let ports = port_range(&protocol, rule.from_port, rule.to_port);

    Some(IngressRule {
        protocol,
        ports,
        source,
        status: rule
            .status
            .as_deref()
            .map(UsageStatus::parse)
            .unwrap_or_default(),
    })
}

/// Protocol `-1`/`all`, missing ports and negative ports all mean every port.
fn port_range(protocol: &str, from: Option<i64>, to: Option<i64>) -> PortRange {
    if protocol == "-1" || protocol.eq_ignore_ascii_case("all") {
        return PortRange::all();
    }
    let to_port = |p: i64| u16::try_from(p).unwrap_or(u16::MAX);
    match (from, to) {
        (Some(f), _) if f < 0 => PortRange::all(),
        (_, Some(t)) if t < 0 => PortRange::all(),
        (Some(f), Some(t)) => PortRange::new(to_port(f), to_port(t)),
        (Some(p), None) | (None, Some(p)) => PortRange::single(to_port(p)),
        (None, None) => PortRange::all(),
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn clean_ids(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter_map(|id| non_blank(Some(id.as_str())))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Converts a `/topology` payload into a graph for the rank layout path.
///
/// Edges of unknown type and edges touching unknown nodes are dropped.
pub fn topology_to_graph(topology: TopologyResponse) -> GraphModel {
    let mut nodes: Vec<GraphNode> = Vec::with_capacity(topology.nodes.len());
    let mut seen = HashSet::new();
    let mut malformed = 0;

    for node in topology.nodes {
        let Some(id) = non_blank(Some(node.id.as_str())) else {
            malformed += 1;
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }
        let resource_type = node
            .node_type
            .as_deref()
            .map(ResourceType::parse)
            .unwrap_or_else(|| ResourceType::Other("Unknown".to_string()));
        let category = node
            .category
            .as_deref()
            .and_then(NodeCategory::parse)
            .unwrap_or_else(|| NodeCategory::of(&resource_type));
        let display = non_blank(node.name.as_deref()).unwrap_or_else(|| id.clone());

        let mut graph_node = GraphNode::new(id, display, resource_type).with_category(category);
        graph_node.severity = node.severity;
        nodes.push(graph_node);
    }

    let edges: Vec<Edge> = topology
        .edges
        .iter()
        .filter_map(convert_topology_edge)
        .collect();

    let mut model = graph::assemble(nodes, edges);
    model.diagnostics.malformed_resources += malformed;
    model
}

fn convert_topology_edge(edge: &TopologyEdge) -> Option<Edge> {
    let relation = match edge.edge_type.as_deref() {
        Some(kind) => match RelationType::parse(kind) {
            Some(relation) => relation,
            None => {
                warn!(edge_type = kind, from = %edge.source, to = %edge.target, "Dropping edge of unknown type");
                return None;
            }
        },
        None => RelationType::SgToSg,
    };

    let mut converted = Edge::new(edge.source.trim(), edge.target.trim(), relation).with_status(
        edge.status
            .as_deref()
            .map(UsageStatus::parse)
            .unwrap_or_default(),
    );
    if let Some(ports) = edge.port.as_deref().and_then(parse_port_label) {
        converted = converted.with_ports(ports);
    }
    Some(converted)
}

/// Parses `443`, `80-443` or `all`.
fn parse_port_label(label: &str) -> Option<PortRange> {
    let label = label.trim();
    if label.eq_ignore_ascii_case("all") || label == "-1" {
        return Some(PortRange::all());
    }
    match label.split_once('-') {
        Some((from, to)) => Some(PortRange::new(
            from.trim().parse().ok()?,
            to.trim().parse().ok()?,
        )),
        None => label.parse().ok().map(PortRange::single),
    }
}
