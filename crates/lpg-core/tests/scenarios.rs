//! End-to-end scenarios across discovery, graph building, layout and live diff.
//!
//! These tests use the in-memory inventory connector and a paused clock; no
//! external services are needed.
//!
//! ```bash
//! cargo test --package lpg-core --test scenarios
//! ```

use std::sync::Arc;
use std::time::Duration;

use lpg_connectors::testing::{sample_instance, sample_public_security_group, sample_raw_resource};
use lpg_connectors::wire::{RawIngressRule, RawResource};
use lpg_connectors::MockInventoryConnector;
use lpg_core::catalog::normalize_raw;
use lpg_core::discovery::{Discoverer, DiscoveryError, DiscoveryRequest, PropagationDiscoverer};
use lpg_core::graph::build_from_batch;
use lpg_core::layout::{Canvas, LayoutEngine, TieredLayout};
use lpg_core::live_diff::LiveDiffTracker;
use lpg_core::models::{
    GraphNode, RelationType, Resource, ResourceType, Tier, TraversalConfig, INTERNET_NODE_ID,
};
use lpg_core::session::{GraphSession, RefreshKind};

// ============================================================================
// Fixtures
// ============================================================================

fn setup() {
    lpg_observability::init_test_logging();
}

/// One instance with its role and security group.
fn web_tier() -> Vec<RawResource> {
    vec![
        sample_instance("i-1", "sg-i-1", "role-i-1"),
        sample_raw_resource("role-i-1", "IAMRole"),
        sample_raw_resource("sg-i-1", "SecurityGroup"),
    ]
}

fn group_rule_from(source: &str, port: i64) -> RawIngressRule {
    RawIngressRule {
        protocol: Some("tcp".into()),
        from_port: Some(port),
        to_port: Some(port),
        cidr: None,
        source_group: Some(source.to_string()),
        status: None,
    }
}

fn nodes(ids: &[&str]) -> Vec<GraphNode> {
    ids.iter()
        .map(|id| GraphNode::new(*id, *id, ResourceType::Ec2Instance))
        .collect()
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_instance_seed_discovers_role_and_group() {
    setup();
    let mock = Arc::new(MockInventoryConnector::with_resources("inventory", web_tier()));
    let discoverer = PropagationDiscoverer::new(mock.clone());
    let request = DiscoveryRequest::new(
        "payments",
        vec![Resource::new("i-1", ResourceType::Ec2Instance)],
    )
    .with_config(TraversalConfig::default().with_max_depth(2));

    let result = discoverer.discover(&request).await.unwrap();

    let role = result.get("role-i-1").expect("role discovered");
    assert_eq!(role.resource.resource_type, ResourceType::IamRole);
    assert_eq!(role.discovery_path, vec!["i-1", "role-i-1"]);

    let sg = result.get("sg-i-1").expect("security group discovered");
    assert_eq!(sg.resource.resource_type, ResourceType::SecurityGroup);
    assert_eq!(sg.discovery_path, vec!["i-1", "sg-i-1"]);

    assert!(!result.simulated);
    assert_eq!(mock.list_resources_calls(), 1);
}

#[tokio::test]
async fn test_six_seeds_rejected_before_any_call() {
    setup();
    let mock = Arc::new(MockInventoryConnector::with_resources("inventory", web_tier()));
    let discoverer = PropagationDiscoverer::new(mock.clone());
    let seeds = (0..6)
        .map(|i| Resource::new(format!("i-{}", i), ResourceType::Ec2Instance))
        .collect();

    let result = discoverer
        .discover(&DiscoveryRequest::new("payments", seeds))
        .await;

    assert_eq!(result, Err(DiscoveryError::InvalidSeedCount(6)));
    assert_eq!(mock.total_calls(), 0);
}

// ============================================================================
// Graph building
// ============================================================================

#[test]
fn test_public_group_gets_single_internet_edge() {
    setup();
    let batch = normalize_raw(vec![sample_public_security_group("sg-web", 443)]);
    let model = build_from_batch(&batch);

    let internet_nodes: Vec<_> = model
        .nodes
        .iter()
        .filter(|n| n.id == INTERNET_NODE_ID)
        .collect();
    assert_eq!(internet_nodes.len(), 1);

    let internet_edges: Vec<_> = model
        .edges
        .iter()
        .filter(|e| e.relation == RelationType::Internet)
        .collect();
    assert_eq!(internet_edges.len(), 1);
    assert_eq!(internet_edges[0].from, INTERNET_NODE_ID);
    assert_eq!(internet_edges[0].to, "sg-web");
}

#[test]
fn test_isolated_group_has_no_inbound_edges() {
    setup();
    let mut app = sample_raw_resource("sg-app", "SecurityGroup");
    app.ingress_rules.push(group_rule_from("sg-lb", 8080));
    let batch = normalize_raw(vec![
        sample_raw_resource("sg-lb", "SecurityGroup"),
        app,
        sample_raw_resource("sg-isolated", "SecurityGroup"),
    ]);
    let model = build_from_batch(&batch);

    assert!(model.node(INTERNET_NODE_ID).is_none());
    assert!(model.node("sg-isolated").is_some());
    assert!(!model.edges.iter().any(|e| e.touches("sg-isolated")));
    assert_eq!(
        model
            .edges
            .iter()
            .filter(|e| e.relation == RelationType::SgToSg)
            .count(),
        1
    );
}

#[test]
fn test_built_graph_lays_out_in_tiers() {
    setup();
    let mut raw = web_tier();
    raw.push(sample_public_security_group("sg-lb", 443));
    raw.push(sample_raw_resource("orders", "S3Bucket"));
    let model = build_from_batch(&normalize_raw(raw));

    let result = TieredLayout::new().layout(&model.nodes, &model.edges, &Canvas::default());
    let tier_of = |id: &str| {
        result
            .nodes
            .iter()
            .find(|n| n.id == id)
            .and_then(|n| n.tier)
    };
    assert_eq!(tier_of(INTERNET_NODE_ID), Some(Tier::Internet));
    assert_eq!(tier_of("sg-lb"), Some(Tier::PublicExposed));
    assert_eq!(tier_of("sg-i-1"), Some(Tier::AppIdentity));
    assert_eq!(tier_of("i-1"), Some(Tier::AppIdentity));
    assert_eq!(tier_of("role-i-1"), Some(Tier::AppIdentity));
    assert_eq!(tier_of("orders"), Some(Tier::DataStorage));
    assert_eq!(result.truncated.total(), 0);
}

// ============================================================================
// Live diff
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_new_node_flag_clears_after_ten_seconds() {
    setup();
    let tracker = LiveDiffTracker::default();
    let mut notices = tracker.subscribe();

    tracker.observe(&nodes(&["a", "b"])).await;
    let diff = tracker.observe(&nodes(&["a", "b", "c"])).await;
    assert_eq!(diff.added, vec!["c".to_string()]);

    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.count, 1);
    assert_eq!(notice.examples, vec!["c".to_string()]);
    assert!(notices.try_recv().is_err());
    assert!(tracker.is_new("c").await);

    tokio::time::sleep(Duration::from_secs(10)).await;
    tokio::task::yield_now().await;

    let mut current = nodes(&["a", "b", "c"]);
    tracker.apply_flags(&mut current).await;
    assert!(current.iter().all(|n| !n.is_new));
}

#[tokio::test(start_paused = true)]
async fn test_session_last_writer_wins() {
    setup();
    let mock = Arc::new(MockInventoryConnector::with_resources("inventory", web_tier()));
    let session = Arc::new(GraphSession::new(mock.clone()));

    // The first refresh is slow and returns the old inventory.
    mock.push_latency(Duration::from_secs(5)).await;
    let slow = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.refresh(RefreshKind::Manual).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut updated = web_tier();
    updated.push(sample_raw_resource("orders", "S3Bucket"));
    mock.set_resources(updated).await;
    let fast = session.refresh(RefreshKind::Manual).await.unwrap().unwrap();
    assert!(fast.model.node("orders").is_some());

    assert!(slow.await.unwrap().unwrap().is_none());
    let current = session.snapshot().await.unwrap();
    assert_eq!(current.sequence, fast.sequence);
    assert!(current.model.node("orders").is_some());

    session.dispose().await;
    assert_eq!(session.tracker().pending_timers().await, 0);
}
