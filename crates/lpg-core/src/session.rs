//! Polling session.
//!
//! A session owns one inventory connector, one live-diff tracker and one
//! layout engine. Every refresh gets a sequence number; a result is applied
//! only if no later refresh has already been applied and no later manual
//! refresh was requested, so the last writer wins. Automatic refreshes are
//! skipped while another refresh is in flight, and a manual refresh aborts
//! whatever is in flight. Discovery runs follow the same rule: a new run
//! aborts the one in flight, so at most one runs per view.

use crate::catalog;
use crate::discovery::{validate_request, Discoverer, DiscoveryError, DiscoveryRequest};
use crate::graph::{self, GraphModel};
use crate::layout::{Canvas, LayoutEngine, LayoutResult, TieredLayout};
use crate::live_diff::{LiveDiffConfig, LiveDiffTracker, NewResourceNotice, PollDiff};
use crate::models::{DiscoveryResult, GraphNode};
use chrono::{DateTime, Utc};
use lpg_connectors::{ConnectorError, InventoryConnector};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Errors from a session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session is closed")]
    Closed,

    #[error("Inventory fetch failed: {0}")]
    Fetch(#[from] ConnectorError),

    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// Who asked for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshKind {
    Manual,
    Auto,
}

/// One applied refresh.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub sequence: u64,
    pub kind: RefreshKind,
    /// Built graph with `is_new` flags as of this poll.
    pub model: GraphModel,
    pub layout: LayoutResult,
    pub diff: PollDiffSummary,
    pub fetched_at: DateTime<Utc>,
}

/// Serializable part of a [`PollDiff`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollDiffSummary {
    pub generation: u64,
    pub added: Vec<String>,
}

impl From<&PollDiff> for PollDiffSummary {
    fn from(diff: &PollDiff) -> Self {
        Self {
            generation: diff.generation,
            added: diff.added.clone(),
        }
    }
}

/// A spawned fetch or discovery run that a newer request may abort.
struct InFlight {
    sequence: u64,
    abort: AbortHandle,
}

impl InFlight {
    /// Clears `slot` if it still holds run `sequence`.
    fn release(slot: &mut Option<InFlight>, sequence: u64) {
        if slot.as_ref().map(|f| f.sequence) == Some(sequence) {
            *slot = None;
        }
    }
}

/// A live graph view over one inventory.
pub struct GraphSession {
    id: Uuid,
    connector: Arc<dyn InventoryConnector>,
    tracker: LiveDiffTracker,
    layout: Arc<dyn LayoutEngine>,
    canvas: Canvas,
    system_name: Option<String>,
    discovery: RwLock<Option<DiscoveryResult>>,
    discovery_sequence: AtomicU64,
    discovery_in_flight: Mutex<Option<InFlight>>,
    sequence: AtomicU64,
    latest_manual: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
    snapshot: RwLock<Option<Arc<GraphSnapshot>>>,
    auto_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GraphSession {
    pub fn new(connector: Arc<dyn InventoryConnector>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            connector,
            tracker: LiveDiffTracker::default(),
            layout: Arc::new(TieredLayout::new()),
            canvas: Canvas::default(),
            system_name: None,
            discovery: RwLock::new(None),
            discovery_sequence: AtomicU64::new(0),
            discovery_in_flight: Mutex::new(None),
            sequence: AtomicU64::new(0),
            latest_manual: AtomicU64::new(0),
            in_flight: Mutex::new(None),
            snapshot: RwLock::new(None),
            auto_task: Mutex::new(None),
            closed: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Restricts polls to one system.
    pub fn with_system(mut self, system_name: impl Into<String>) -> Self {
        self.system_name = Some(system_name.into());
        self
    }

    pub fn with_layout(mut self, layout: Arc<dyn LayoutEngine>) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_canvas(mut self, canvas: Canvas) -> Self {
        self.canvas = canvas;
        self
    }

    pub fn with_live_diff(mut self, config: LiveDiffConfig) -> Self {
        self.tracker = LiveDiffTracker::new(config);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracker(&self) -> &LiveDiffTracker {
        &self.tracker
    }

    pub fn notices(&self) -> broadcast::Receiver<NewResourceNotice> {
        self.tracker.subscribe()
    }

    /// Decorates later snapshots with membership scores.
    pub async fn set_discovery(&self, result: Option<DiscoveryResult>) {
        *self.discovery.write().await = result;
    }

    /// Discovery result currently decorating snapshots.
    pub async fn discovery(&self) -> Option<DiscoveryResult> {
        self.discovery.read().await.clone()
    }

    pub async fn is_discovering(&self) -> bool {
        self.discovery_in_flight.lock().await.is_some()
    }

    /// Runs discovery for this view and keeps the result for later snapshots.
    ///
    /// The request is validated before anything is spawned. A run started
    /// while another is in flight aborts it; the aborted call returns
    /// `Ok(None)`, as does a run overtaken by a newer one.
    pub async fn discover(
        &self,
        discoverer: Arc<dyn Discoverer>,
        request: DiscoveryRequest,
    ) -> Result<Option<DiscoveryResult>, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        validate_request(&request)?;

        let (sequence, run) = {
            let mut in_flight = self.discovery_in_flight.lock().await;
            if let Some(current) = in_flight.take() {
                debug!(aborted = current.sequence, "Discovery superseded");
                current.abort.abort();
            }
            let sequence = self.discovery_sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let span = lpg_observability::discovery_span!(
                request.system_name,
                session = %self.id,
                sequence = sequence
            );
            let run = tokio::spawn(
                async move { discoverer.discover(&request).await }.instrument(span),
            );
            *in_flight = Some(InFlight {
                sequence,
                abort: run.abort_handle(),
            });
            (sequence, run)
        };

        let outcome = run.await;
        InFlight::release(&mut *self.discovery_in_flight.lock().await, sequence);

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(SessionError::Discovery(e)),
            Err(join) if join.is_cancelled() => {
                debug!(sequence, "Discovery aborted");
                return Ok(None);
            }
            Err(join) => {
                return Err(SessionError::Discovery(DiscoveryError::DiscoveryUnavailable(
                    join.to_string(),
                )))
            }
        };

        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let mut slot = self.discovery.write().await;
        if sequence < self.discovery_sequence.load(Ordering::SeqCst) {
            debug!(sequence, "Discarding overtaken discovery result");
            return Ok(None);
        }
        *slot = Some(result.clone());
        Ok(Some(result))
    }

    /// Most recently applied snapshot, with `is_new` flags as of now.
    ///
    /// Flags expire on the tracker's timers, not on polls; an expired flag
    /// is cleared from the published snapshot the next time it is read.
    pub async fn snapshot(&self) -> Option<Arc<GraphSnapshot>> {
        let published = self.snapshot.read().await.clone()?;
        let flagged: HashSet<String> = self.tracker.new_ids().await.into_iter().collect();
        let current = |nodes: &[GraphNode]| {
            nodes.iter().all(|n| n.is_new == flagged.contains(&n.id))
        };
        if current(&published.model.nodes) && current(&published.layout.nodes) {
            return Some(published);
        }

        let mut refreshed = GraphSnapshot::clone(&published);
        for node in refreshed
            .model
            .nodes
            .iter_mut()
            .chain(refreshed.layout.nodes.iter_mut())
        {
            node.is_new = flagged.contains(&node.id);
        }
        let refreshed = Arc::new(refreshed);

        let mut slot = self.snapshot.write().await;
        match slot.as_ref() {
            // A newer refresh landed in between; it carries its own flags.
            Some(latest) if !Arc::ptr_eq(latest, &published) => Some(Arc::clone(latest)),
            _ => {
                debug!(
                    sequence = refreshed.sequence,
                    "Republished snapshot with expired flags cleared"
                );
                *slot = Some(Arc::clone(&refreshed));
                Some(refreshed)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn is_refreshing(&self) -> bool {
        self.in_flight.lock().await.is_some()
    }

    /// Fetches, builds and lays out the inventory.
    ///
    /// Returns `Ok(None)` when the refresh was skipped, aborted by a manual
    /// refresh, or overtaken by a newer result.
    pub async fn refresh(&self, kind: RefreshKind) -> Result<Option<Arc<GraphSnapshot>>, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let (sequence, fetch) = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(current) = in_flight.as_ref() {
                match kind {
                    RefreshKind::Auto => {
                        debug!(busy = current.sequence, "Skipping auto refresh");
                        return Ok(None);
                    }
                    RefreshKind::Manual => {
                        debug!(
                            aborted = current.sequence,
                            "Manual refresh supersedes in-flight refresh"
                        );
                        current.abort.abort();
                    }
                }
            }

            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            if kind == RefreshKind::Manual {
                self.latest_manual.fetch_max(sequence, Ordering::SeqCst);
            }

            let connector = Arc::clone(&self.connector);
            let system = self.system_name.clone();
            let fetch = tokio::spawn(async move { connector.list_resources(system.as_deref()).await });
            *in_flight = Some(InFlight {
                sequence,
                abort: fetch.abort_handle(),
            });
            (sequence, fetch)
        };

        self.apply(sequence, kind, fetch)
            .instrument(lpg_observability::refresh_span!(self.id, sequence))
            .await
    }

    async fn apply(
        &self,
        sequence: u64,
        kind: RefreshKind,
        fetch: JoinHandle<Result<Vec<serde_json::Value>, ConnectorError>>,
    ) -> Result<Option<Arc<GraphSnapshot>>, SessionError> {
        let outcome = fetch.await;
        InFlight::release(&mut *self.in_flight.lock().await, sequence);

        let records = match outcome {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                warn!(sequence, error = %e, "Inventory fetch failed");
                return Err(SessionError::Fetch(e));
            }
            Err(join) if join.is_cancelled() => {
                debug!(sequence, "Refresh aborted");
                return Ok(None);
            }
            Err(join) => {
                return Err(SessionError::Fetch(ConnectorError::RequestFailed(
                    join.to_string(),
                )))
            }
        };

        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let mut current = self.snapshot.write().await;
        let applied = current.as_ref().map(|s| s.sequence).unwrap_or(0);
        if sequence <= applied || sequence < self.latest_manual.load(Ordering::SeqCst) {
            debug!(sequence, applied, "Discarding stale refresh result");
            return Ok(None);
        }

        let batch = catalog::normalize(&records);
        let mut model = graph::build_from_batch(&batch);
        if let Some(result) = self.discovery.read().await.as_ref() {
            graph::apply_discovery(&mut model, result);
        }
        let diff = self.tracker.observe(&model.nodes).await;
        self.tracker.apply_flags(&mut model.nodes).await;
        let layout = self.layout.layout(&model.nodes, &model.edges, &self.canvas);

        let snapshot = Arc::new(GraphSnapshot {
            sequence,
            kind,
            diff: PollDiffSummary::from(&diff),
            model,
            layout,
            fetched_at: Utc::now(),
        });
        info!(
            sequence,
            nodes = snapshot.model.nodes.len(),
            edges = snapshot.model.edges.len(),
            added = diff.added.len(),
            "Applied refresh"
        );
        *current = Some(Arc::clone(&snapshot));
        Ok(Some(snapshot))
    }

    /// Starts periodic automatic refreshes. A running loop is replaced.
    pub async fn start_auto_refresh(self: &Arc<Self>, every: Duration) {
        let session = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            info!(
                session = %session.id,
                interval_secs = every.as_secs(),
                "Starting auto refresh"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match session.refresh(RefreshKind::Auto).await {
                            Ok(Some(snapshot)) => {
                                debug!(sequence = snapshot.sequence, "Auto refresh applied");
                            }
                            Ok(None) => {}
                            Err(SessionError::Closed) => break,
                            Err(e) => {
                                warn!(session = %session.id, error = %e, "Auto refresh failed");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!(session = %session.id, "Auto refresh shutting down");
                            break;
                        }
                    }
                }
            }
        });

        if let Some(previous) = self.auto_task.lock().await.replace(handle) {
            previous.abort();
        }
    }

    pub async fn stop_auto_refresh(&self) {
        if let Some(handle) = self.auto_task.lock().await.take() {
            handle.abort();
        }
    }

    /// Stops polling, aborts in-flight work and cancels every flag timer.
    pub async fn dispose(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        self.stop_auto_refresh().await;
        if let Some(current) = self.in_flight.lock().await.take() {
            current.abort.abort();
        }
        if let Some(current) = self.discovery_in_flight.lock().await.take() {
            current.abort.abort();
        }
        self.tracker.dispose().await;
        info!(session = %self.id, "Session disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::PropagationDiscoverer;
    use crate::models::{Resource, ResourceType};
    use lpg_connectors::testing::{sample_instance, sample_public_security_group};
    use lpg_connectors::MockInventoryConnector;

    fn seed_request(count: usize) -> DiscoveryRequest {
        let seeds = (1..=count)
            .map(|i| Resource::new(format!("i-{}", i), ResourceType::Ec2Instance))
            .collect();
        DiscoveryRequest::new("payments", seeds)
    }

    fn connector() -> Arc<MockInventoryConnector> {
        Arc::new(MockInventoryConnector::with_resources(
            "inventory",
            vec![
                sample_public_security_group("sg-1", 443),
                sample_instance("i-1", "sg-1", "role-1"),
            ],
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_builds_snapshot() {
        let mock = connector();
        let session = GraphSession::new(mock.clone());

        let snapshot = session.refresh(RefreshKind::Manual).await.unwrap().unwrap();
        assert_eq!(snapshot.sequence, 1);
        assert!(snapshot.model.node("internet").is_some());
        assert_eq!(snapshot.layout.nodes.len(), snapshot.model.nodes.len());
        assert!(snapshot.diff.added.is_empty());
        assert_eq!(mock.list_resources_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_refresh_aborts_in_flight() {
        let mock = connector();
        mock.push_latency(Duration::from_secs(5)).await;
        mock.push_latency(Duration::from_secs(1)).await;
        let session = Arc::new(GraphSession::new(mock.clone()));

        let first = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.refresh(RefreshKind::Manual).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(session.is_refreshing().await);

        let second = session.refresh(RefreshKind::Manual).await.unwrap();
        assert_eq!(second.unwrap().sequence, 2);
        assert!(first.await.unwrap().unwrap().is_none());
        assert_eq!(session.snapshot().await.unwrap().sequence, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_skipped_while_busy() {
        let mock = connector();
        mock.push_latency(Duration::from_secs(5)).await;
        let session = Arc::new(GraphSession::new(mock.clone()));

        let manual = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.refresh(RefreshKind::Manual).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(session.refresh(RefreshKind::Auto).await.unwrap().is_none());
        assert_eq!(mock.list_resources_calls(), 1);
        assert!(manual.await.unwrap().unwrap().is_some());
        assert!(!session.is_refreshing().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_surfaces() {
        let mock = connector();
        mock.set_failure(Some(ConnectorError::ConnectionFailed("refused".into())))
            .await;
        let session = GraphSession::new(mock);

        let result = session.refresh(RefreshKind::Manual).await;
        assert!(matches!(result, Err(SessionError::Fetch(_))));
        assert!(session.snapshot().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_loop_and_dispose() {
        let mock = connector();
        let session = Arc::new(GraphSession::new(mock.clone()));
        session.start_auto_refresh(Duration::from_secs(30)).await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(mock.list_resources_calls(), 3);

        session.dispose().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(mock.list_resources_calls(), 3);
        assert!(matches!(
            session.refresh(RefreshKind::Manual).await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_resources_flagged_on_next_poll() {
        let mock = connector();
        let session = GraphSession::new(mock.clone());
        let mut notices = session.notices();
        session.refresh(RefreshKind::Manual).await.unwrap();

        mock.set_resources(vec![
            sample_public_security_group("sg-1", 443),
            sample_instance("i-1", "sg-1", "role-1"),
            sample_instance("i-2", "sg-1", "role-1"),
        ])
        .await;
        let snapshot = session.refresh(RefreshKind::Manual).await.unwrap().unwrap();
        assert_eq!(snapshot.diff.added, vec!["i-2".to_string()]);
        assert!(snapshot.model.node("i-2").unwrap().is_new);
        assert!(!snapshot.model.node("i-1").unwrap().is_new);
        assert_eq!(notices.recv().await.unwrap().count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_flags_clear_in_snapshot_without_poll() {
        let mock = connector();
        let session = GraphSession::new(mock.clone());
        session.refresh(RefreshKind::Manual).await.unwrap();

        mock.set_resources(vec![
            sample_public_security_group("sg-1", 443),
            sample_instance("i-1", "sg-1", "role-1"),
            sample_instance("i-2", "sg-1", "role-1"),
        ])
        .await;
        session.refresh(RefreshKind::Manual).await.unwrap();
        let flagged = session.snapshot().await.unwrap();
        assert!(flagged.model.node("i-2").unwrap().is_new);
        assert!(flagged.layout.nodes.iter().any(|n| n.id == "i-2" && n.is_new));

        tokio::time::sleep(Duration::from_secs(11)).await;

        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.sequence, 2);
        assert!(!snapshot.model.node("i-2").unwrap().is_new);
        assert!(snapshot.layout.nodes.iter().all(|n| !n.is_new));
        assert_eq!(mock.list_resources_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_discovery_aborts_older() {
        let mock = connector();
        mock.push_latency(Duration::from_secs(5)).await;
        let session = Arc::new(GraphSession::new(mock.clone()));
        let discoverer: Arc<dyn Discoverer> = Arc::new(PropagationDiscoverer::new(mock.clone()));

        let first = {
            let session = Arc::clone(&session);
            let discoverer = Arc::clone(&discoverer);
            tokio::spawn(async move { session.discover(discoverer, seed_request(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(session.is_discovering().await);

        let second = session
            .discover(discoverer, seed_request(1))
            .await
            .unwrap()
            .unwrap();
        assert!(second.get("sg-1").is_some());
        assert!(first.await.unwrap().unwrap().is_none());
        assert!(!session.is_discovering().await);
        assert_eq!(session.discovery().await, Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_discovery_rejects_bad_seed_count() {
        let mock = connector();
        let session = GraphSession::new(mock.clone());
        let discoverer: Arc<dyn Discoverer> = Arc::new(PropagationDiscoverer::new(mock.clone()));

        let result = session.discover(discoverer, seed_request(6)).await;
        assert!(matches!(
            result,
            Err(SessionError::Discovery(DiscoveryError::InvalidSeedCount(6)))
        ));
        assert_eq!(mock.total_calls(), 0);
        assert!(session.discovery().await.is_none());
    }
}
