//! Wire types for the inventory and discovery backend.
//!
//! These mirror the JSON the backend actually sends, which is loosely typed:
//! fields are optional, spelled in camelCase, snake_case or AWS PascalCase
//! depending on which collector produced the record. Nothing here is trusted;
//! the catalog adapter in `lpg-core` turns these into strict resources.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Envelope of `GET /resources`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesResponse {
    #[serde(default)]
    pub resources: Vec<serde_json::Value>,
}

/// A resource record as reported by the inventory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResource {
    #[serde(default, alias = "resource_id", alias = "resourceId", alias = "Id")]
    pub id: Option<String>,
    #[serde(default, alias = "Name")]
    pub name: Option<String>,
    #[serde(
        default,
        rename = "type",
        alias = "resourceType",
        alias = "resource_type",
        alias = "Type"
    )]
    pub resource_type: Option<String>,
    #[serde(default, alias = "Region")]
    pub region: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default, alias = "Tags")]
    pub tags: Option<RawTags>,
    /// System names the inventory has this resource tagged to.
    #[serde(default, alias = "systemNames", alias = "system_names")]
    pub systems: Vec<String>,
    #[serde(default, alias = "ingress_rules", alias = "IpPermissions")]
    pub ingress_rules: Vec<RawIngressRule>,
    #[serde(default, alias = "security_groups", alias = "SecurityGroups")]
    pub security_groups: Vec<String>,
    #[serde(default, alias = "roleArn", alias = "iamRole", alias = "instanceProfile")]
    pub role: Option<String>,
    #[serde(default, alias = "vpc_id", alias = "VpcId")]
    pub vpc_id: Option<String>,
    #[serde(default, alias = "subnet_id", alias = "SubnetId")]
    pub subnet_id: Option<String>,
    #[serde(default, alias = "data_access")]
    pub data_access: Vec<String>,
    #[serde(default)]
    pub invokes: Vec<String>,
    #[serde(default)]
    pub severity: Option<String>,
}

impl RawResource {
    /// Creates a record with just an id and a type.
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            resource_type: Some(resource_type.into()),
            ..Default::default()
        }
    }

    /// Serializes the record into the JSON shape the backend returns.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Tags arrive either as a plain object or as an AWS `[{Key, Value}]` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTags {
    Map(BTreeMap<String, String>),
    List(Vec<RawTag>),
}

impl RawTags {
    pub fn into_map(self) -> BTreeMap<String, String> {
        match self {
            RawTags::Map(map) => map,
            RawTags::List(list) => list.into_iter().map(|t| (t.key, t.value)).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTag {
    #[serde(alias = "Key")]
    pub key: String,
    #[serde(default, alias = "Value")]
    pub value: String,
}

/// A security group ingress rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawIngressRule {
    #[serde(default, alias = "IpProtocol", alias = "ip_protocol")]
    pub protocol: Option<String>,
    #[serde(default, alias = "FromPort", alias = "from_port")]
    pub from_port: Option<i64>,
    #[serde(default, alias = "ToPort", alias = "to_port")]
    pub to_port: Option<i64>,
    #[serde(default, alias = "CidrIp", alias = "cidrIp", alias = "CidrIpv6", alias = "cidrIpv6")]
    pub cidr: Option<String>,
    #[serde(
        default,
        alias = "sourceSecurityGroupId",
        alias = "source_group",
        alias = "GroupId"
    )]
    pub source_group: Option<String>,
    /// Usage status from the flow-log analysis (`USED`/`UNUSED`/`UNKNOWN`).
    #[serde(default)]
    pub status: Option<String>,
}

/// Traversal settings sent with a seed discovery request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraversalConfigPayload {
    pub max_depth: u32,
    pub membership_threshold: f64,
    pub edge_types: Vec<String>,
}

/// Body of `POST /seed-discovery`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeedDiscoveryRequest {
    pub system_name: String,
    pub seed_resource_ids: Vec<String>,
    pub traversal_config: TraversalConfigPayload,
}

/// A discovered node as reported by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDiscoveredResource {
    #[serde(flatten)]
    pub resource: RawResource,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, alias = "membership_score")]
    pub membership_score: Option<f64>,
    #[serde(default, alias = "discovery_path")]
    pub discovery_path: Vec<String>,
    #[serde(default, alias = "edge_types")]
    pub edge_types: Vec<String>,
    #[serde(default, alias = "is_shared")]
    pub is_shared: bool,
    #[serde(default, alias = "shared_with")]
    pub shared_with: Vec<String>,
}

/// Response of `POST /seed-discovery`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResultPayload {
    #[serde(alias = "system_name")]
    pub system_name: String,
    #[serde(default)]
    pub seeds: Vec<RawDiscoveredResource>,
    #[serde(default)]
    pub discovered: Vec<RawDiscoveredResource>,
    #[serde(default, alias = "shared_resources")]
    pub shared_resources: Vec<RawDiscoveredResource>,
    #[serde(default, alias = "total_count")]
    pub total_count: Option<usize>,
    #[serde(default, alias = "traversal_depth")]
    pub traversal_depth: Option<usize>,
    #[serde(default, alias = "confidence_score")]
    pub confidence_score: Option<f64>,
}

/// Node of `GET /topology/{systemName}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub node_type: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
}

/// Edge of `GET /topology/{systemName}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyEdge {
    #[serde(alias = "from")]
    pub source: String,
    #[serde(alias = "to")]
    pub target: String,
    #[serde(default, rename = "type")]
    pub edge_type: Option<String>,
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Response of `GET /topology/{systemName}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyResponse {
    #[serde(default)]
    pub nodes: Vec<TopologyNode>,
    #[serde(default)]
    pub edges: Vec<TopologyEdge>,
    #[serde(default)]
    pub node_count: usize,
    #[serde(default)]
    pub edge_count: usize,
    #[serde(default)]
    pub categories: HashMap<String, usize>,
}

/// Body of `POST /auto-tag`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoTagRequest {
    pub system_name: String,
    pub resource_ids: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

/// Response of `POST /auto-tag`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoTagResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "tagged_count")]
    pub tagged_count: usize,
    #[serde(default)]
    pub failed: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}
