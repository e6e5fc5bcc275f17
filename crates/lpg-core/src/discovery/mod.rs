//! Seed propagation discovery.
//!
//! Given 1 to 5 seed resources, finds the rest of a logical system by
//! walking typed relationships outward with a decaying membership score.
//! Three implementations share the [`Discoverer`] trait:
//!
//! - [`PropagationDiscoverer`] runs the traversal locally over one inventory read.
//! - [`RemoteDiscoverer`] delegates to the backend's `/seed-discovery` endpoint.
//! - [`SimulatedDiscoverer`] fabricates a clearly labelled demo result.
//!
//! Only callers choose the simulated path; the real implementations surface
//! [`DiscoveryError::DiscoveryUnavailable`] and never fall back on their own.

pub mod propagation;
pub mod remote;
pub mod simulated;

use crate::models::{DiscoveryResult, Resource, TraversalConfig, MAX_SEEDS};
use async_trait::async_trait;
use lpg_connectors::ConnectorError;
use thiserror::Error;
use tracing::warn;

pub use propagation::{propagate, PropagationDiscoverer};
pub use remote::RemoteDiscoverer;
pub use simulated::SimulatedDiscoverer;

/// Errors from discovery.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryError {
    #[error("Invalid seed count: {0} (expected 1 to 5)")]
    InvalidSeedCount(usize),

    #[error("Invalid traversal config: {0}")]
    InvalidConfig(String),

    #[error("Discovery unavailable: {0}")]
    DiscoveryUnavailable(String),
}

impl From<ConnectorError> for DiscoveryError {
    fn from(err: ConnectorError) -> Self {
        if err.is_unavailable() {
            DiscoveryError::DiscoveryUnavailable(err.to_string())
        } else {
            DiscoveryError::InvalidConfig(err.to_string())
        }
    }
}

/// Input of one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub system_name: String,
    pub seeds: Vec<Resource>,
    pub config: TraversalConfig,
}

impl DiscoveryRequest {
    pub fn new(system_name: impl Into<String>, seeds: Vec<Resource>) -> Self {
        Self {
            system_name: system_name.into(),
            seeds,
            config: TraversalConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TraversalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn seed_ids(&self) -> Vec<String> {
        self.seeds.iter().map(|s| s.id.clone()).collect()
    }
}

/// Rejects a request before any network call is made.
pub fn validate_request(request: &DiscoveryRequest) -> Result<(), DiscoveryError> {
    let count = request.seeds.len();
    if count == 0 || count > MAX_SEEDS {
        return Err(DiscoveryError::InvalidSeedCount(count));
    }
    if request.system_name.trim().is_empty() {
        return Err(DiscoveryError::InvalidConfig(
            "system_name must not be empty".to_string(),
        ));
    }
    request.config.validate().map_err(DiscoveryError::InvalidConfig)
}

/// A discovery implementation.
#[async_trait]
pub trait Discoverer: Send + Sync {
    /// Implementation name, used in logs.
    fn name(&self) -> &str;

    /// Runs one discovery.
    async fn discover(&self, request: &DiscoveryRequest) -> Result<DiscoveryResult, DiscoveryError>;
}

/// Runtime choice of discovery implementation.
pub enum DiscoveryBackend {
    Real(PropagationDiscoverer),
    Remote(RemoteDiscoverer),
    Simulated(SimulatedDiscoverer),
}

impl DiscoveryBackend {
    pub fn is_simulated(&self) -> bool {
        matches!(self, DiscoveryBackend::Simulated(_))
    }

    fn inner(&self) -> &dyn Discoverer {
        match self {
            DiscoveryBackend::Real(d) => d,
            DiscoveryBackend::Remote(d) => d,
            DiscoveryBackend::Simulated(d) => d,
        }
    }
}

#[async_trait]
impl Discoverer for DiscoveryBackend {
    fn name(&self) -> &str {
        self.inner().name()
    }

    async fn discover(&self, request: &DiscoveryRequest) -> Result<DiscoveryResult, DiscoveryError> {
        self.inner().discover(request).await
    }
}

/// Runs `primary`, substituting a simulated result only when the backend is
/// unavailable. For demo and non-production callers.
pub async fn discover_or_simulate(
    primary: &dyn Discoverer,
    fallback: &SimulatedDiscoverer,
    request: &DiscoveryRequest,
) -> Result<DiscoveryResult, DiscoveryError> {
    match primary.discover(request).await {
        Err(DiscoveryError::DiscoveryUnavailable(reason)) => {
            warn!(
                discoverer = primary.name(),
                %reason,
                "Discovery unavailable, substituting simulated result"
            );
            fallback.discover(request).await
        }
        other => other,
    }
}
