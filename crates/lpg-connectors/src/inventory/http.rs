//! HTTP implementation of the inventory connector.

use crate::http::{HttpClient, RateLimitConfig};
use crate::traits::{
    Connector, ConnectorConfig, ConnectorError, ConnectorHealth, ConnectorResult,
    InventoryConnector,
};
use crate::wire::{
    AutoTagRequest, AutoTagResponse, DiscoveryResultPayload, ResourcesResponse,
    SeedDiscoveryRequest, TopologyResponse,
};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

/// Inventory connector talking to the backend over HTTP.
pub struct HttpInventoryConnector {
    config: ConnectorConfig,
    client: HttpClient,
}

impl HttpInventoryConnector {
    /// Creates a new connector.
    pub fn new(config: ConnectorConfig) -> ConnectorResult<Self> {
        let client = HttpClient::new(config.clone())?;
        Ok(Self { config, client })
    }

    /// Creates a new connector with a client-side request budget.
    pub fn with_rate_limit(
        config: ConnectorConfig,
        rate_limit: RateLimitConfig,
    ) -> ConnectorResult<Self> {
        let client = HttpClient::with_rate_limit(config.clone(), Some(rate_limit))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Connector for HttpInventoryConnector {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.client.probe("/health").await {
            Ok(status) if status.is_success() => Ok(ConnectorHealth::Healthy),
            Ok(status) => Ok(ConnectorHealth::Degraded(format!("status {}", status))),
            Err(e) => Ok(ConnectorHealth::Unhealthy(e.to_string())),
        }
    }
}

#[async_trait]
impl InventoryConnector for HttpInventoryConnector {
    #[instrument(skip(self), fields(connector = %self.config.name))]
    async fn list_resources(
        &self,
        system_name: Option<&str>,
    ) -> ConnectorResult<Vec<serde_json::Value>> {
        let response: ResourcesResponse = match system_name {
            Some(name) => {
                self.client
                    .get_json_with_query("/resources", &[("systemName", name)])
                    .await?
            }
            None => self.client.get_json("/resources").await?,
        };
        debug!(count = response.resources.len(), "Fetched inventory resources");
        Ok(response.resources)
    }

    #[instrument(skip(self, request), fields(system = %request.system_name))]
    async fn seed_discovery(
        &self,
        request: &SeedDiscoveryRequest,
    ) -> ConnectorResult<DiscoveryResultPayload> {
        let payload: DiscoveryResultPayload =
            self.client.post_json("/seed-discovery", request).await?;
        if payload.system_name.is_empty() {
            warn!("Seed discovery response is missing systemName");
            return Err(ConnectorError::InvalidResponse(
                "seed discovery response without systemName".into(),
            ));
        }
        Ok(payload)
    }

    #[instrument(skip(self))]
    async fn topology(&self, system_name: &str) -> ConnectorResult<TopologyResponse> {
        let path = format!("/topology/{}", urlencoding::encode(system_name));
        self.client.get_json(&path).await
    }

    #[instrument(skip(self, request), fields(system = %request.system_name))]
    async fn auto_tag(&self, request: &AutoTagRequest) -> ConnectorResult<AutoTagResponse> {
        self.client.post_json("/auto-tag", request).await
    }
}
