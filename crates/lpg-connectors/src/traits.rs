//! Connector trait definitions for the resource graph engine.
//!
//! The engine talks to exactly one kind of external system: the inventory and
//! discovery backend that owns the account's resource records. This module
//! defines the error taxonomy, configuration, and trait that every backend
//! implementation (HTTP or mock) provides.

use crate::credentials::ApiToken;
use crate::wire::{
    AutoTagRequest, AutoTagResponse, DiscoveryResultPayload, SeedDiscoveryRequest,
    TopologyResponse,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur in connectors.
#[derive(Error, Debug, Clone)]
pub enum ConnectorError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConnectorError {
    /// Returns true when the backend could not be reached or answered with
    /// something other than a usable 2xx body.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, ConnectorError::ConfigError(_))
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Health status of a connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorHealth {
    /// Backend answered the health probe.
    Healthy,
    /// Backend answered, but not with a success status.
    Degraded(String),
    /// Backend could not be reached.
    Unhealthy(String),
}

/// Configuration for a backend connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connector name, used in logs.
    pub name: String,
    /// Base URL of the inventory backend.
    pub base_url: String,
    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for transport failures and 5xx responses.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

impl ConnectorConfig {
    /// Creates a configuration with no authentication and default limits.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            auth: AuthConfig::None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            headers: HashMap::new(),
        }
    }

    /// Sets the authentication scheme.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }
}

/// Authentication configuration.
///
/// Credentials are held in [`ApiToken`] so they are wiped from memory on drop
/// and never printed by `Debug`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication.
    #[default]
    None,
    /// API key sent in a custom header.
    ApiKey {
        key: ApiToken,
        header_name: String,
    },
    /// Bearer token in the `Authorization` header.
    BearerToken { token: ApiToken },
}

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the connector name.
    fn name(&self) -> &str;

    /// Checks the health of the backend.
    async fn health_check(&self) -> ConnectorResult<ConnectorHealth>;
}

/// Inventory and discovery backend.
///
/// Every method maps to one endpoint of the backend. Records returned by
/// [`InventoryConnector::list_resources`] are deliberately left as raw JSON:
/// validation into the strict resource model happens in the catalog adapter,
/// where a single bad record can be rejected without failing the whole page.
#[async_trait]
pub trait InventoryConnector: Connector {
    /// `GET /resources[?systemName=…]`. `None` lists the whole account.
    async fn list_resources(
        &self,
        system_name: Option<&str>,
    ) -> ConnectorResult<Vec<serde_json::Value>>;

    /// `POST /seed-discovery`.
    async fn seed_discovery(
        &self,
        request: &SeedDiscoveryRequest,
    ) -> ConnectorResult<DiscoveryResultPayload>;

    /// `GET /topology/{systemName}`.
    async fn topology(&self, system_name: &str) -> ConnectorResult<TopologyResponse>;

    /// `POST /auto-tag`.
    async fn auto_tag(&self, request: &AutoTagRequest) -> ConnectorResult<AutoTagResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_json() {
        let config: ConnectorConfig =
            serde_json::from_str(r#"{"name":"inv","base_url":"http://localhost:8000"}"#).unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.max_retries, 2);
        assert!(matches!(config.auth, AuthConfig::None));
    }

    #[test]
    fn test_auth_config_tagged() {
        let json = r#"{"type":"bearer_token","token":"abc"}"#;
        let auth: AuthConfig = serde_json::from_str(json).unwrap();
        match auth {
            AuthConfig::BearerToken { token } => assert_eq!(token.expose_secret(), "abc"),
            other => panic!("unexpected auth {:?}", other),
        }
    }

    #[test]
    fn test_config_error_is_not_unavailable() {
        assert!(!ConnectorError::ConfigError("bad".into()).is_unavailable());
        assert!(ConnectorError::Timeout("slow".into()).is_unavailable());
        assert!(ConnectorError::InvalidResponse("junk".into()).is_unavailable());
    }
}
