//! Data models for the resource graph engine.

pub mod discovery;
pub mod edge;
pub mod node;
pub mod resource;

pub use discovery::{
    DecayModel, DiscoveredResource, DiscoveryResult, DiscoverySource, TraversalConfig, MAX_SEEDS,
};
pub use edge::{
    edge_id, Edge, EdgeKind, PortRange, RelationType, UsageStatus, ALL_PORTS, HIGH_RISK_PORTS,
};
pub use node::{GraphNode, NodeCategory, Point, Tier, INTERNET_NODE_ID};
pub use resource::{
    IngressRule, Resource, ResourceAttributes, ResourceType, RuleSource, PUBLIC_CIDRS,
};
