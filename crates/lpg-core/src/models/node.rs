//! Graph nodes as handed to the layout stage.

use super::resource::{Resource, ResourceType};
use serde::{Deserialize, Serialize};

/// Id of the synthetic internet node.
pub const INTERNET_NODE_ID: &str = "internet";

/// Display category, derived from the resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Internet,
    SecurityGroup,
    Compute,
    Identity,
    Storage,
    Network,
    Other,
}

impl NodeCategory {
    /// Static mapping from resource type.
    pub fn of(resource_type: &ResourceType) -> Self {
        match resource_type {
            ResourceType::SecurityGroup => NodeCategory::SecurityGroup,
            ResourceType::Ec2Instance | ResourceType::Lambda => NodeCategory::Compute,
            ResourceType::IamRole | ResourceType::IamUser | ResourceType::IamPolicy => {
                NodeCategory::Identity
            }
            ResourceType::S3Bucket | ResourceType::RdsInstance | ResourceType::DynamoDbTable => {
                NodeCategory::Storage
            }
            ResourceType::Vpc
            | ResourceType::Subnet
            | ResourceType::NetworkAcl
            | ResourceType::LoadBalancer => NodeCategory::Network,
            ResourceType::Other(_) => NodeCategory::Other,
        }
    }

    /// Parses the `category` field of a topology node.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "internet" => Some(NodeCategory::Internet),
            "security_group" | "securitygroup" | "network_security" => {
                Some(NodeCategory::SecurityGroup)
            }
            "compute" => Some(NodeCategory::Compute),
            "identity" | "iam" => Some(NodeCategory::Identity),
            "storage" | "data" | "database" => Some(NodeCategory::Storage),
            "network" | "networking" => Some(NodeCategory::Network),
            "other" => Some(NodeCategory::Other),
            _ => None,
        }
    }
}

/// Layout tier, top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Tier {
    Internet = 0,
    PublicExposed = 1,
    AppIdentity = 2,
    DataStorage = 3,
}

impl Tier {
    pub const ALL: [Tier; 4] = [
        Tier::Internet,
        Tier::PublicExposed,
        Tier::AppIdentity,
        Tier::DataStorage,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier as u8
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Tier::Internet),
            1 => Ok(Tier::PublicExposed),
            2 => Ok(Tier::AppIdentity),
            3 => Ok(Tier::DataStorage),
            other => Err(format!("tier out of range: {}", other)),
        }
    }
}

/// Position on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A node of the rendered graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub display_name: String,
    pub resource_type: ResourceType,
    pub category: NodeCategory,
    /// Set by the layout stage.
    pub tier: Option<Tier>,
    /// Set by the layout stage.
    pub position: Option<Point>,
    pub membership_score: Option<f64>,
    pub severity: Option<String>,
    /// Incoming edges reported as used.
    pub used_count: usize,
    /// Incoming edges reported as unused.
    pub unused_count: usize,
    /// Appeared in the most recent poll; cleared by the live-diff timer.
    pub is_new: bool,
    /// Reachable from the internet node. Set by the layout stage.
    pub internet_exposed: bool,
}

impl GraphNode {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        resource_type: ResourceType,
    ) -> Self {
        let category = NodeCategory::of(&resource_type);
        Self {
            id: id.into(),
            display_name: display_name.into(),
            resource_type,
            category,
            tier: None,
            position: None,
            membership_score: None,
            severity: None,
            used_count: 0,
            unused_count: 0,
            is_new: false,
            internet_exposed: false,
        }
    }

    pub fn from_resource(resource: &Resource) -> Self {
        let mut node = Self::new(
            resource.id.clone(),
            resource.name.clone(),
            resource.resource_type.clone(),
        );
        node.severity = resource.attributes.severity.clone();
        node
    }

    /// The synthetic internet node.
    pub fn internet() -> Self {
        let mut node = Self::new(
            INTERNET_NODE_ID,
            "Internet",
            ResourceType::Other("Internet".to_string()),
        );
        node.category = NodeCategory::Internet;
        node
    }

    pub fn with_category(mut self, category: NodeCategory) -> Self {
        self.category = category;
        self
    }
}
