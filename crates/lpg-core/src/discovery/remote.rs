//! Discovery delegated to the backend's `/seed-discovery` endpoint.
//!
//! The backend's answer is treated like any other inventory input: entries
//! are validated, deduplicated across lists, and scores are clamped so the
//! result satisfies the same invariants as a local traversal.

use super::{validate_request, DiscoveryError, DiscoveryRequest, Discoverer};
use crate::catalog;
use crate::models::{
    DiscoveredResource, DiscoveryResult, DiscoverySource, EdgeKind, RelationType, Resource,
    TraversalConfig,
};
use async_trait::async_trait;
use lpg_connectors::wire::{RawDiscoveredResource, SeedDiscoveryRequest, TraversalConfigPayload};
use lpg_connectors::{DiscoveryResultPayload, InventoryConnector};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Discoverer backed by the remote discovery service.
pub struct RemoteDiscoverer {
    connector: Arc<dyn InventoryConnector>,
}

impl RemoteDiscoverer {
    pub fn new(connector: Arc<dyn InventoryConnector>) -> Self {
        Self { connector }
    }
}

/// Wire form of a traversal configuration.
pub fn traversal_payload(config: &TraversalConfig) -> TraversalConfigPayload {
    TraversalConfigPayload {
        max_depth: u32::try_from(config.max_depth).unwrap_or(u32::MAX),
        membership_threshold: config.membership_threshold,
        edge_types: config
            .edge_types
            .iter()
            .map(|k| k.as_str().to_string())
            .collect(),
    }
}

#[async_trait]
impl Discoverer for RemoteDiscoverer {
    fn name(&self) -> &str {
        "remote"
    }

    #[instrument(skip(self, request), fields(system = %request.system_name, seeds = request.seeds.len()))]
    async fn discover(&self, request: &DiscoveryRequest) -> Result<DiscoveryResult, DiscoveryError> {
        validate_request(request)?;

        let body = SeedDiscoveryRequest {
            system_name: request.system_name.clone(),
            seed_resource_ids: request.seed_ids(),
            traversal_config: traversal_payload(&request.config),
        };
        let payload = self
            .connector
            .seed_discovery(&body)
            .await
            .map_err(|e| DiscoveryError::DiscoveryUnavailable(e.to_string()))?;

        let result = from_payload(request, payload);
        info!(
            total = result.total_count,
            depth = result.traversal_depth,
            "Remote discovery complete"
        );
        Ok(result)
    }
}

/// Validates a backend payload against the request that produced it.
///
/// Requested seeds are always the seeds, whatever the payload says. Derived
/// entries are dropped when their record is malformed, their id is already
/// placed, or their path does not run from a seed to themselves within
/// `max_depth` hops. Scores are clamped to [0, 1] and to the score of every
/// earlier node on their path.
pub fn from_payload(request: &DiscoveryRequest, payload: DiscoveryResultPayload) -> DiscoveryResult {
    let system = request.system_name.as_str();
    let seed_ids: HashSet<&str> = request.seeds.iter().map(|s| s.id.as_str()).collect();

    let mut seeds = Vec::new();
    let mut placed: HashSet<String> = HashSet::new();
    for seed in &request.seeds {
        if placed.insert(seed.id.clone()) {
            seeds.push(seed_entry(seed, system));
        }
    }

    let mut candidates: Vec<(Resource, RawDiscoveredResource)> = Vec::new();
    let derived = payload
        .discovered
        .into_iter()
        .chain(payload.shared_resources)
        .chain(payload.seeds);
    for (index, mut raw) in derived.enumerate() {
        let record = std::mem::take(&mut raw.resource);
        match catalog::convert(index, record) {
            Ok(resource) => candidates.push((resource, raw)),
            Err(rejected) => warn!(%rejected, "Dropping malformed discovery entry"),
        }
    }
    // Shorter paths first, so every predecessor is scored before its children.
    candidates.sort_by_key(|(_, raw)| raw.discovery_path.len());

    let mut scores: HashMap<String, f64> = seeds
        .iter()
        .map(|s: &DiscoveredResource| (s.resource.id.clone(), 1.0))
        .collect();
    let mut discovered = Vec::new();
    let mut shared = Vec::new();

    for (resource, raw) in candidates {
        if placed.contains(&resource.id) {
            continue;
        }
        let path: Vec<String> = raw.discovery_path.iter().map(|p| p.trim().to_string()).collect();
        let valid_path = path.len() >= 2
            && path.len() <= request.config.max_depth + 1
            && seed_ids.contains(path[0].as_str())
            && path.last() == Some(&resource.id);
        if !valid_path {
            warn!(id = %resource.id, ?path, "Dropping discovery entry with invalid path");
            continue;
        }

        let ceiling = path[..path.len() - 1]
            .iter()
            .filter_map(|id| scores.get(id))
            .fold(1.0_f64, |acc, s| acc.min(*s));
        let reported = raw.membership_score.unwrap_or(0.0);
        let score = if reported.is_nan() {
            0.0
        } else {
            reported.clamp(0.0, 1.0).min(ceiling)
        };

        let edge_types: BTreeSet<EdgeKind> = raw
            .edge_types
            .iter()
            .filter_map(|t| EdgeKind::parse(t).or_else(|| RelationType::parse(t).map(|r| r.kind())))
            .collect();
        let mut shared_with = resource.shared_with(system);
        shared_with.extend(
            raw.shared_with
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty() && s != system),
        );
        let is_shared = raw.is_shared || resource.is_shared() || !shared_with.is_empty();

        placed.insert(resource.id.clone());
        scores.insert(resource.id.clone(), score);
        let entry = DiscoveredResource {
            depth: path.len() - 1,
            resource,
            source: DiscoverySource::Derived,
            membership_score: score,
            discovery_path: path,
            edge_types,
            is_shared,
            shared_with,
        };
        if is_shared {
            shared.push(entry);
        } else {
            discovered.push(entry);
        }
    }

    let mut result = DiscoveryResult::assemble(system, seeds, discovered, shared);
    if let Some(confidence) = payload.confidence_score {
        if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
            result.confidence_score = confidence;
        }
    }
    result
}

fn seed_entry(seed: &Resource, system: &str) -> DiscoveredResource {
    DiscoveredResource {
        resource: seed.clone(),
        source: DiscoverySource::Seed,
        membership_score: 1.0,
        discovery_path: vec![seed.id.clone()],
        edge_types: BTreeSet::new(),
        is_shared: seed.is_shared(),
        shared_with: seed.shared_with(system),
        depth: 0,
    }
}
