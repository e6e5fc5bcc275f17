//! Mock inventory connector for testing.
//!
//! Holds resources in memory and counts calls per endpoint, so tests can
//! assert both on what came back and on whether the backend was contacted
//! at all.

use crate::traits::{
    Connector, ConnectorError, ConnectorHealth, ConnectorResult, InventoryConnector,
};
use crate::wire::{
    AutoTagRequest, AutoTagResponse, DiscoveryResultPayload, RawResource, SeedDiscoveryRequest,
    TopologyResponse,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Per-endpoint call counters.
#[derive(Debug, Default)]
struct CallCounts {
    list_resources: AtomicUsize,
    seed_discovery: AtomicUsize,
    topology: AtomicUsize,
    auto_tag: AtomicUsize,
}

/// Mock inventory connector for testing.
pub struct MockInventoryConnector {
    name: String,
    resources: Arc<RwLock<Vec<serde_json::Value>>>,
    discovery: Arc<RwLock<Option<DiscoveryResultPayload>>>,
    topology: Arc<RwLock<TopologyResponse>>,
    tagged: Arc<RwLock<Vec<AutoTagRequest>>>,
    healthy: Arc<RwLock<bool>>,
    failure: Arc<RwLock<Option<ConnectorError>>>,
    latency: Arc<RwLock<Option<Duration>>>,
    latency_queue: Arc<RwLock<VecDeque<Duration>>>,
    calls: Arc<CallCounts>,
}

impl MockInventoryConnector {
    /// Creates an empty mock inventory.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            resources: Arc::new(RwLock::new(Vec::new())),
            discovery: Arc::new(RwLock::new(None)),
            topology: Arc::new(RwLock::new(TopologyResponse::default())),
            tagged: Arc::new(RwLock::new(Vec::new())),
            healthy: Arc::new(RwLock::new(true)),
            failure: Arc::new(RwLock::new(None)),
            latency: Arc::new(RwLock::new(None)),
            latency_queue: Arc::new(RwLock::new(VecDeque::new())),
            calls: Arc::new(CallCounts::default()),
        }
    }

    /// Creates a mock inventory preloaded with typed records.
    pub fn with_resources(name: &str, resources: Vec<RawResource>) -> Self {
        let mut mock = Self::new(name);
        let values = resources.iter().map(RawResource::to_value).collect();
        mock.resources = Arc::new(RwLock::new(values));
        mock
    }

    /// Replaces the inventory with typed records.
    pub async fn set_resources(&self, resources: Vec<RawResource>) {
        *self.resources.write().await = resources.iter().map(RawResource::to_value).collect();
    }

    /// Replaces the inventory with raw JSON records, malformed ones included.
    pub async fn set_raw_resources(&self, resources: Vec<serde_json::Value>) {
        *self.resources.write().await = resources;
    }

    /// Sets the payload returned by `seed_discovery`.
    pub async fn set_discovery_payload(&self, payload: DiscoveryResultPayload) {
        *self.discovery.write().await = Some(payload);
    }

    /// Sets the payload returned by `topology`.
    pub async fn set_topology(&self, topology: TopologyResponse) {
        *self.topology.write().await = topology;
    }

    /// Sets the health status of the mock.
    pub async fn set_healthy(&self, healthy: bool) {
        *self.healthy.write().await = healthy;
    }

    /// Makes every subsequent call fail with `error`, or succeed again with `None`.
    pub async fn set_failure(&self, error: Option<ConnectorError>) {
        *self.failure.write().await = error;
    }

    /// Delays every call by `latency`.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().await = latency;
    }

    /// Queues a one-shot delay consumed by the next call, ahead of the default latency.
    pub async fn push_latency(&self, latency: Duration) {
        self.latency_queue.write().await.push_back(latency);
    }

    /// Gets auto-tag requests for test verification.
    pub async fn get_tagged(&self) -> Vec<AutoTagRequest> {
        self.tagged.read().await.clone()
    }

    pub fn list_resources_calls(&self) -> usize {
        self.calls.list_resources.load(Ordering::SeqCst)
    }

    pub fn seed_discovery_calls(&self) -> usize {
        self.calls.seed_discovery.load(Ordering::SeqCst)
    }

    pub fn topology_calls(&self) -> usize {
        self.calls.topology.load(Ordering::SeqCst)
    }

    pub fn auto_tag_calls(&self) -> usize {
        self.calls.auto_tag.load(Ordering::SeqCst)
    }

    /// Total calls across every endpoint.
    pub fn total_calls(&self) -> usize {
        self.list_resources_calls()
            + self.seed_discovery_calls()
            + self.topology_calls()
            + self.auto_tag_calls()
    }

    async fn simulate_call(&self) -> ConnectorResult<()> {
        let queued = self.latency_queue.write().await.pop_front();
        let delay = match queued {
            Some(delay) => Some(delay),
            None => *self.latency.read().await,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure.read().await.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn belongs_to(value: &serde_json::Value, system_name: &str) -> bool {
    let Ok(raw) = serde_json::from_value::<RawResource>(value.clone()) else {
        return false;
    };
    if raw.systems.iter().any(|s| s == system_name) {
        return true;
    }
    raw.tags
        .map(|tags| {
            tags.into_map()
                .get("SystemName")
                .is_some_and(|v| v == system_name)
        })
        .unwrap_or(false)
}

#[async_trait]
impl Connector for MockInventoryConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        if *self.healthy.read().await {
            Ok(ConnectorHealth::Healthy)
        } else {
            Ok(ConnectorHealth::Unhealthy("Mock unhealthy".to_string()))
        }
    }
}

#[async_trait]
impl InventoryConnector for MockInventoryConnector {
    async fn list_resources(
        &self,
        system_name: Option<&str>,
    ) -> ConnectorResult<Vec<serde_json::Value>> {
        self.calls.list_resources.fetch_add(1, Ordering::SeqCst);
        // Snapshot before the simulated latency, like a slow response of older data.
        let snapshot = self.resources.read().await.clone();
        self.simulate_call().await?;

        Ok(match system_name {
            Some(name) => snapshot
                .into_iter()
                .filter(|value| belongs_to(value, name))
                .collect(),
            None => snapshot,
        })
    }

    async fn seed_discovery(
        &self,
        request: &SeedDiscoveryRequest,
    ) -> ConnectorResult<DiscoveryResultPayload> {
        self.calls.seed_discovery.fetch_add(1, Ordering::SeqCst);
        self.simulate_call().await?;

        self.discovery.read().await.clone().ok_or_else(|| {
            ConnectorError::NotFound(format!(
                "No discovery configured for system {}",
                request.system_name
            ))
        })
    }

    async fn topology(&self, _system_name: &str) -> ConnectorResult<TopologyResponse> {
        self.calls.topology.fetch_add(1, Ordering::SeqCst);
        self.simulate_call().await?;
        Ok(self.topology.read().await.clone())
    }

    async fn auto_tag(&self, request: &AutoTagRequest) -> ConnectorResult<AutoTagResponse> {
        self.calls.auto_tag.fetch_add(1, Ordering::SeqCst);
        self.simulate_call().await?;
        self.tagged.write().await.push(request.clone());
        Ok(AutoTagResponse {
            success: true,
            tagged_count: request.resource_ids.len(),
            failed: Vec::new(),
            message: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_healthy, assert_unhealthy, sample_raw_resource};
    use crate::wire::RawTags;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_list_resources_counts_calls() {
        let mock = MockInventoryConnector::with_resources(
            "mock",
            vec![
                sample_raw_resource("i-1", "EC2Instance"),
                sample_raw_resource("sg-1", "SecurityGroup"),
            ],
        );

        let all = mock.list_resources(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(mock.list_resources_calls(), 1);
        assert_eq!(mock.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_list_resources_filters_by_system() {
        let mut tagged = sample_raw_resource("i-1", "EC2Instance");
        let mut tags = BTreeMap::new();
        tags.insert("SystemName".to_string(), "payments".to_string());
        tagged.tags = Some(RawTags::Map(tags));
        let mut listed = sample_raw_resource("i-2", "EC2Instance");
        listed.systems = vec!["payments".into()];
        let other = sample_raw_resource("i-3", "EC2Instance");

        let mock = MockInventoryConnector::with_resources("mock", vec![tagged, listed, other]);
        let result = mock.list_resources(Some("payments")).await.unwrap();
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let mock = MockInventoryConnector::new("mock");
        mock.set_failure(Some(ConnectorError::ConnectionFailed("down".into())))
            .await;

        let result = mock.topology("payments").await;
        assert!(matches!(result, Err(ConnectorError::ConnectionFailed(_))));
        assert_eq!(mock.topology_calls(), 1);

        mock.set_failure(None).await;
        assert!(mock.topology("payments").await.is_ok());
    }

    #[tokio::test]
    async fn test_seed_discovery_without_payload_is_not_found() {
        let mock = MockInventoryConnector::new("mock");
        let request = SeedDiscoveryRequest {
            system_name: "payments".into(),
            seed_resource_ids: vec!["i-1".into()],
            traversal_config: crate::wire::TraversalConfigPayload {
                max_depth: 2,
                membership_threshold: 0.5,
                edge_types: vec![],
            },
        };
        let result = mock.seed_discovery(&request).await;
        assert!(matches!(result, Err(ConnectorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_auto_tag_records_request() {
        let mock = MockInventoryConnector::new("mock");
        let request = AutoTagRequest {
            system_name: "payments".into(),
            resource_ids: vec!["i-1".into(), "sg-1".into()],
            tags: BTreeMap::new(),
        };
        let response = mock.auto_tag(&request).await.unwrap();
        assert!(response.success);
        assert_eq!(response.tagged_count, 2);
        assert_eq!(mock.get_tagged().await.len(), 1);
    }

    #[tokio::test]
    async fn test_health_toggle() {
        let mock = MockInventoryConnector::new("mock");
        assert_healthy(&mock.health_check().await);
        mock.set_healthy(false).await;
        assert_unhealthy(&mock.health_check().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_latency_applies_once() {
        let mock = MockInventoryConnector::new("mock");
        mock.push_latency(Duration::from_secs(5)).await;

        let start = tokio::time::Instant::now();
        mock.list_resources(None).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        mock.list_resources(None).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
