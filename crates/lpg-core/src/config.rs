//! Engine configuration.
//!
//! Loaded from YAML; every field has a default so an empty file is valid.
//! A few settings can be overridden from the environment.

use crate::discovery::{
    discover_or_simulate, Discoverer, DiscoveryBackend, DiscoveryError, DiscoveryRequest,
    PropagationDiscoverer, RemoteDiscoverer, SimulatedDiscoverer,
};
use crate::layout::{Canvas, LayoutEngine, RankLayout, RankLayoutConfig, TieredLayout, TieredLayoutConfig};
use crate::live_diff::LiveDiffConfig;
use crate::models::{DecayModel, DiscoveryResult, Resource, TraversalConfig};
use crate::session::GraphSession;
use lpg_connectors::{
    ApiToken, AuthConfig, ConnectorConfig, ConnectorError, HttpInventoryConnector,
    InventoryConnector, RateLimitConfig,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Overrides the inventory base URL.
pub const ENV_INVENTORY_URL: &str = "LPG_INVENTORY_URL";
/// Overrides the auto refresh interval, in seconds.
pub const ENV_POLL_INTERVAL: &str = "LPG_POLL_INTERVAL_SECS";
/// Default variable holding the inventory API token.
pub const DEFAULT_TOKEN_ENV: &str = "LPG_API_TOKEN";

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Connector setup failed: {0}")]
    Connector(#[from] ConnectorError),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub inventory: InventorySettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub layout: LayoutSettings,
    #[serde(default)]
    pub live_diff: LiveDiffConfig,
    #[serde(default)]
    pub polling: PollingSettings,
}

/// Where the inventory backend lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventorySettings {
    #[serde(default = "default_connector_name")]
    pub name: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Environment variable holding a bearer token. Never the token itself.
    #[serde(default = "default_token_env")]
    pub api_token_env: String,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

fn default_connector_name() -> String {
    "inventory".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            name: default_connector_name(),
            base_url: String::new(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            api_token_env: default_token_env(),
            rate_limit: None,
        }
    }
}

/// Which discoverer to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Traverse the inventory locally.
    #[default]
    Local,
    /// Ask the backend's discovery endpoint.
    Remote,
    /// Synthetic results only.
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySettings {
    #[serde(default)]
    pub mode: DiscoveryMode,
    #[serde(default)]
    pub traversal: TraversalConfig,
    #[serde(default)]
    pub decay: DecayModel,
    /// Fall back to a labelled simulated result when discovery is unavailable.
    #[serde(default = "default_true")]
    pub simulate_on_unavailable: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::default(),
            traversal: TraversalConfig::default(),
            decay: DecayModel::default(),
            simulate_on_unavailable: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    #[default]
    Tiered,
    Rank,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutSettings {
    #[serde(default)]
    pub engine: LayoutKind,
    #[serde(default)]
    pub canvas: Canvas,
    #[serde(default)]
    pub tiered: TieredLayoutConfig,
    #[serde(default)]
    pub rank: RankLayoutConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingSettings {
    /// Seconds between automatic refreshes; 0 disables them.
    #[serde(default = "default_auto_refresh_secs")]
    pub auto_refresh_secs: u64,
    /// Restricts polls to one system.
    #[serde(default)]
    pub system_name: Option<String>,
}

fn default_auto_refresh_secs() -> u64 {
    30
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            auto_refresh_secs: default_auto_refresh_secs(),
            system_name: None,
        }
    }
}

impl PollingSettings {
    pub fn auto_refresh(&self) -> Option<Duration> {
        (self.auto_refresh_secs > 0).then(|| Duration::from_secs(self.auto_refresh_secs))
    }
}

impl EngineConfig {
    /// Loads and validates configuration from a file, then applies
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&contents)?;
        config.apply_env_overrides()?;
        config.validate()?;
        info!(path = %path.display(), "Loaded engine configuration");
        Ok(config)
    }

    /// Parses configuration without validating it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_INVENTORY_URL).filter(|v| !v.trim().is_empty()) {
            debug!(var = ENV_INVENTORY_URL, "Overriding inventory base URL");
            self.inventory.base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL) {
            self.polling.auto_refresh_secs = raw.trim().parse().map_err(|_| {
                ConfigError::InvalidValue(format!("{} must be an integer, got '{}'", ENV_POLL_INTERVAL, raw))
            })?;
        }
        Ok(())
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.discovery
            .traversal
            .validate()
            .map_err(|e| ConfigError::InvalidValue(format!("discovery.traversal: {}", e)))?;

        let decay = &self.discovery.decay;
        let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_unit(decay.per_hop) {
            return Err(ConfigError::InvalidValue(format!(
                "discovery.decay.per_hop must be in [0, 1], got {}",
                decay.per_hop
            )));
        }
        if let Some((relation, value)) = decay.strengths.iter().find(|(_, v)| !in_unit(**v)) {
            return Err(ConfigError::InvalidValue(format!(
                "discovery.decay.strengths.{} must be in [0, 1], got {}",
                relation.as_str(),
                value
            )));
        }

        let canvas = &self.layout.canvas;
        if canvas.width <= 2.0 * canvas.padding || canvas.height <= 2.0 * canvas.padding {
            return Err(ConfigError::InvalidValue(
                "layout.canvas must be larger than twice its padding".to_string(),
            ));
        }
        if self.layout.tiered.unit_width <= 0.0 || self.layout.tiered.column_width < 0.0 {
            return Err(ConfigError::InvalidValue(
                "layout.tiered widths must be positive".to_string(),
            ));
        }
        if self.live_diff.flag_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "live_diff.flag_ttl_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Connector configuration, with the token read from the environment.
    pub fn connector_config(&self) -> Result<ConnectorConfig, ConfigError> {
        if self.inventory.base_url.trim().is_empty() {
            return Err(ConfigError::MissingField("inventory.base_url".to_string()));
        }
        let mut config = ConnectorConfig::new(&self.inventory.name, &self.inventory.base_url);
        config.timeout_secs = self.inventory.timeout_secs;
        config.max_retries = self.inventory.max_retries;
        if let Some(token) = ApiToken::from_env(&self.inventory.api_token_env) {
            config = config.with_auth(AuthConfig::BearerToken { token });
        }
        Ok(config)
    }

    /// HTTP connector for the configured backend.
    pub fn build_connector(&self) -> Result<Arc<dyn InventoryConnector>, ConfigError> {
        let config = self.connector_config()?;
        let connector = match &self.inventory.rate_limit {
            Some(limit) => HttpInventoryConnector::with_rate_limit(config, limit.clone())?,
            None => HttpInventoryConnector::new(config)?,
        };
        Ok(Arc::new(connector))
    }

    pub fn build_layout(&self) -> Arc<dyn LayoutEngine> {
        match self.layout.engine {
            LayoutKind::Tiered => Arc::new(TieredLayout::with_config(self.layout.tiered.clone())),
            LayoutKind::Rank => Arc::new(RankLayout::with_config(self.layout.rank)),
        }
    }

    pub fn build_discoverer(&self, connector: Arc<dyn InventoryConnector>) -> DiscoveryBackend {
        let decay = self.discovery.decay.clone();
        match self.discovery.mode {
            DiscoveryMode::Local => {
                DiscoveryBackend::Real(PropagationDiscoverer::new(connector).with_decay(decay))
            }
            DiscoveryMode::Remote => DiscoveryBackend::Remote(RemoteDiscoverer::new(connector)),
            DiscoveryMode::Simulated => {
                DiscoveryBackend::Simulated(SimulatedDiscoverer::new().with_decay(decay))
            }
        }
    }

    /// Runs discovery with the configured traversal limits. When
    /// `simulate_on_unavailable` is set, an unavailable backend yields a
    /// simulated result instead of an error.
    pub async fn discover(
        &self,
        backend: &DiscoveryBackend,
        system_name: &str,
        seeds: Vec<Resource>,
    ) -> Result<DiscoveryResult, DiscoveryError> {
        let request = DiscoveryRequest::new(system_name, seeds)
            .with_config(self.discovery.traversal.clone());
        if self.discovery.simulate_on_unavailable && !backend.is_simulated() {
            let fallback = SimulatedDiscoverer::new().with_decay(self.discovery.decay.clone());
            discover_or_simulate(backend, &fallback, &request).await
        } else {
            backend.discover(&request).await
        }
    }

    /// Session over `connector` using these settings.
    pub fn build_session(&self, connector: Arc<dyn InventoryConnector>) -> GraphSession {
        let mut session = GraphSession::new(connector)
            .with_layout(self.build_layout())
            .with_canvas(self.layout.canvas)
            .with_live_diff(self.live_diff.clone());
        if let Some(system) = &self.polling.system_name {
            session = session.with_system(system.clone());
        }
        session
    }
}
