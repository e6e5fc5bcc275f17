//! # lpg-connectors
//!
//! Connector for the inventory and discovery backend that owns an account's
//! resource records.
//!
//! This crate provides the wire types, the [`InventoryConnector`] trait, an
//! HTTP implementation and an in-memory mock used by tests.

pub mod credentials;
pub mod http;
pub mod inventory;
pub mod testing;
pub mod traits;
pub mod wire;

pub use credentials::ApiToken;
pub use http::{HttpClient, RateLimitConfig};
pub use inventory::{HttpInventoryConnector, MockInventoryConnector};
pub use traits::{
    AuthConfig, Connector, ConnectorConfig, ConnectorError, ConnectorHealth, ConnectorResult,
    InventoryConnector,
};
pub use wire::{
    AutoTagRequest, AutoTagResponse, DiscoveryResultPayload, RawDiscoveredResource,
    RawIngressRule, RawResource, RawTag, RawTags, ResourcesResponse, SeedDiscoveryRequest,
    TopologyEdge, TopologyNode, TopologyResponse, TraversalConfigPayload,
};
