//! # lpg-core
//!
//! Dependency graph engine for cloud security resources.
//!
//! This crate turns inventory records into a typed graph, discovers the
//! members of a logical system from a few seed resources, lays the graph out
//! in security tiers, and tracks which resources appeared between polls.

pub mod catalog;
pub mod config;
pub mod discovery;
pub mod graph;
pub mod layout;
pub mod live_diff;
pub mod models;
pub mod session;

pub use catalog::{normalize, normalize_raw, topology_to_graph, CatalogBatch, MalformedResource};
pub use config::{ConfigError, EngineConfig};
pub use discovery::{
    Discoverer, DiscoveryBackend, DiscoveryError, DiscoveryRequest, PropagationDiscoverer,
    RemoteDiscoverer, SimulatedDiscoverer,
};
pub use graph::{build_from_batch, build_graph, BuildDiagnostics, GraphModel};
pub use layout::{
    Canvas, LayoutEngine, LayoutResult, RankLayout, TieredLayout, Truncation,
};
pub use live_diff::{LiveDiffConfig, LiveDiffTracker, NewResourceNotice, PollDiff};
pub use models::{
    DecayModel, DiscoveredResource, DiscoveryResult, Edge, EdgeKind, GraphNode, NodeCategory,
    Resource, ResourceType, Tier, TraversalConfig,
};
pub use session::{GraphSession, GraphSnapshot, RefreshKind, SessionError};
