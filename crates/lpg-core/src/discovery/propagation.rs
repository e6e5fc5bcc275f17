//! Local seed propagation over one inventory read.

use super::{validate_request, DiscoveryError, DiscoveryRequest, Discoverer};
use crate::catalog;
use crate::graph::derive_relations;
use crate::models::{
    DecayModel, DiscoveredResource, DiscoveryResult, DiscoverySource, Edge, EdgeKind,
    RelationType, Resource, TraversalConfig,
};
use async_trait::async_trait;
use lpg_connectors::InventoryConnector;
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Discovers a system by propagating from seeds across inventory relations.
pub struct PropagationDiscoverer {
    connector: Arc<dyn InventoryConnector>,
    decay: DecayModel,
}

impl PropagationDiscoverer {
    pub fn new(connector: Arc<dyn InventoryConnector>) -> Self {
        Self {
            connector,
            decay: DecayModel::default(),
        }
    }

    pub fn with_decay(mut self, decay: DecayModel) -> Self {
        self.decay = decay;
        self
    }
}

#[async_trait]
impl Discoverer for PropagationDiscoverer {
    fn name(&self) -> &str {
        "propagation"
    }

    #[instrument(skip(self, request), fields(system = %request.system_name, seeds = request.seeds.len()))]
    async fn discover(&self, request: &DiscoveryRequest) -> Result<DiscoveryResult, DiscoveryError> {
        validate_request(request)?;

        let records = self.connector.list_resources(None).await?;
        let batch = catalog::normalize(&records);

        // Seeds missing from the inventory still anchor the traversal.
        let known: HashSet<&str> = batch.resources.iter().map(|r| r.id.as_str()).collect();
        let mut inventory: Vec<Resource> = request
            .seeds
            .iter()
            .filter(|seed| !known.contains(seed.id.as_str()))
            .cloned()
            .collect();
        inventory.extend(batch.resources.iter().cloned());

        let relations = derive_relations(&inventory);
        let result = propagate(
            &request.system_name,
            &request.seeds,
            &inventory,
            &relations.edges,
            &request.config,
            &self.decay,
        );

        info!(
            total = result.total_count,
            depth = result.traversal_depth,
            confidence = result.confidence_score,
            rejected = batch.rejected.len(),
            "Discovery complete"
        );
        Ok(result)
    }
}

/// A node settled at its best score.
struct Settled {
    score: f64,
    depth: usize,
    path: Vec<String>,
    kinds: BTreeSet<EdgeKind>,
}

/// Queue entry. Ordered so the heap pops the highest score first, then the
/// fewest hops, then the smallest id.
struct Candidate<'a> {
    score: f64,
    depth: usize,
    id: &'a str,
    parent: &'a str,
    relation: RelationType,
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.depth.cmp(&self.depth))
            .then_with(|| other.id.cmp(self.id))
            .then_with(|| other.parent.cmp(self.parent))
            .then_with(|| other.relation.cmp(&self.relation))
    }
}

/// Runs the traversal. Pure over its inputs.
///
/// Each node is settled once, at the highest score any accepted path gives
/// it; its path is its parent's settled path plus itself. Parents settle
/// before children, so scores never increase along a path. A candidate is
/// accepted iff its depth is within `max_depth` and its score reaches the
/// threshold. Seeds always stay seeds.
pub fn propagate(
    system_name: &str,
    seeds: &[Resource],
    inventory: &[Resource],
    edges: &[Edge],
    config: &TraversalConfig,
    decay: &DecayModel,
) -> DiscoveryResult {
    let mut resources: HashMap<&str, &Resource> = HashMap::new();
    for resource in inventory {
        resources.entry(resource.id.as_str()).or_insert(resource);
    }

    let mut seed_order: Vec<&Resource> = Vec::new();
    let mut seed_ids: HashSet<&str> = HashSet::new();
    for seed in seeds {
        if seed_ids.insert(seed.id.as_str()) {
            seed_order.push(seed);
        }
    }

    // Undirected adjacency, neighbours in id order.
    let mut adjacency: HashMap<&str, Vec<(&str, RelationType)>> = HashMap::new();
    for edge in edges.iter().filter(|e| config.allows(e.relation)) {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push((edge.to.as_str(), edge.relation));
        adjacency
            .entry(edge.to.as_str())
            .or_default()
            .push((edge.from.as_str(), edge.relation));
    }
    for neighbours in adjacency.values_mut() {
        neighbours.sort();
        neighbours.dedup();
    }

    let mut settled: HashMap<&str, Settled> = HashMap::new();
    let mut settle_order: Vec<&str> = Vec::new();
    let mut queue: BinaryHeap<Candidate> = BinaryHeap::new();

    for seed in &seed_order {
        settled.insert(
            seed.id.as_str(),
            Settled {
                score: 1.0,
                depth: 0,
                path: vec![seed.id.clone()],
                kinds: BTreeSet::new(),
            },
        );
    }

    let mut frontier: Vec<&str> = seed_order.iter().map(|s| s.id.as_str()).collect();
    loop {
        for node in frontier.drain(..) {
            let Some(parent) = settled.get(node) else {
                continue;
            };
            let (parent_score, parent_depth) = (parent.score, parent.depth);
            // Ids on the parent's own path; arrivals back onto them are not new paths.
            let ancestry: HashSet<String> = parent.path.iter().cloned().collect();
            if parent_depth + 1 > config.max_depth {
                continue;
            }
            let Some(neighbours) = adjacency.get(node) else {
                continue;
            };
            for &(neighbour, relation) in neighbours {
                if seed_ids.contains(neighbour) || !resources.contains_key(neighbour) {
                    continue;
                }
                let score = decay.child_score(parent_score, relation);
                if score < config.membership_threshold {
                    continue;
                }
                if ancestry.contains(neighbour) {
                    continue;
                }
                if let Some(existing) = settled.get_mut(neighbour) {
                    existing.kinds.insert(relation.kind());
                    continue;
                }
                queue.push(Candidate {
                    score,
                    depth: parent_depth + 1,
                    id: neighbour,
                    parent: node,
                    relation,
                });
            }
        }

        let Some(next) = queue.pop() else {
            break;
        };
        let back_arrival = settled
            .get(next.parent)
            .is_some_and(|p| p.path.iter().any(|id| id == next.id));
        if back_arrival {
            continue;
        }
        if let Some(existing) = settled.get_mut(next.id) {
            existing.kinds.insert(next.relation.kind());
            continue;
        }

        let mut path = settled
            .get(next.parent)
            .map(|p| p.path.clone())
            .unwrap_or_default();
        path.push(next.id.to_string());
        debug!(
            id = next.id,
            score = next.score,
            depth = next.depth,
            via = %next.relation,
            "Accepted resource"
        );
        settled.insert(
            next.id,
            Settled {
                score: next.score,
                depth: next.depth,
                path,
                kinds: BTreeSet::from([next.relation.kind()]),
            },
        );
        settle_order.push(next.id);
        frontier.push(next.id);
    }

    let place = |resource: &Resource, state: &Settled, source: DiscoverySource| {
        DiscoveredResource {
            resource: resource.clone(),
            source,
            membership_score: state.score,
            discovery_path: state.path.clone(),
            edge_types: state.kinds.clone(),
            is_shared: resource.is_shared(),
            shared_with: resource.shared_with(system_name),
            depth: state.depth,
        }
    };

    let seeds_out: Vec<DiscoveredResource> = seed_order
        .iter()
        .filter_map(|seed| {
            settled
                .get(seed.id.as_str())
                .map(|state| place(*seed, state, DiscoverySource::Seed))
        })
        .collect();

    let mut discovered = Vec::new();
    let mut shared = Vec::new();
    for id in settle_order {
        let (Some(resource), Some(state)) = (resources.get(id), settled.get(id)) else {
            continue;
        };
        let placed = place(*resource, state, DiscoverySource::Derived);
        if placed.is_shared {
            shared.push(placed);
        } else {
            discovered.push(placed);
        }
    }

    DiscoveryResult::assemble(system_name, seeds_out, discovered, shared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceAttributes, ResourceType};
    use lpg_connectors::testing::{sample_instance, sample_raw_resource};
    use lpg_connectors::MockInventoryConnector;

    fn instance(id: &str, sg: &str, role: &str) -> Resource {
        Resource::new(id, ResourceType::Ec2Instance).with_attributes(ResourceAttributes {
            security_groups: vec![sg.to_string()],
            role: Some(role.to_string()),
            ..Default::default()
        })
    }

    fn run(
        seeds: &[Resource],
        inventory: &[Resource],
        config: &TraversalConfig,
    ) -> DiscoveryResult {
        let relations = derive_relations(inventory);
        propagate(
            "payments",
            seeds,
            inventory,
            &relations.edges,
            config,
            &DecayModel::default(),
        )
    }

    #[test]
    fn test_direct_neighbours_discovered() {
        let seed = instance("i-1", "sg-i-1", "role-i-1");
        let inventory = vec![
            seed.clone(),
            Resource::new("role-i-1", ResourceType::IamRole),
            Resource::new("sg-i-1", ResourceType::SecurityGroup),
        ];
        let result = run(&[seed], &inventory, &TraversalConfig::default());

        assert_eq!(result.seeds.len(), 1);
        assert_eq!(result.seeds[0].membership_score, 1.0);
        let role = result.get("role-i-1").unwrap();
        assert_eq!(role.discovery_path, vec!["i-1", "role-i-1"]);
        assert!((role.membership_score - 0.81).abs() < 1e-9);
        assert!(role.edge_types.contains(&EdgeKind::Iam));
        let sg = result.get("sg-i-1").unwrap();
        assert_eq!(sg.discovery_path, vec!["i-1", "sg-i-1"]);
        assert_eq!(result.total_count, 3);
        assert_eq!(result.traversal_depth, 1);
    }

    #[test]
    fn test_threshold_and_depth_limit() {
        // i-1 -> role -> bucket -> (bucket has nothing further)
        let seed = instance("i-1", "sg-1", "role-1");
        let role = Resource::new("role-1", ResourceType::IamRole).with_attributes(
            ResourceAttributes {
                data_access: vec!["bucket-1".into()],
                ..Default::default()
            },
        );
        let inventory = vec![
            seed.clone(),
            role,
            Resource::new("sg-1", ResourceType::SecurityGroup),
            Resource::new("bucket-1", ResourceType::S3Bucket),
        ];

        let shallow = run(
            &[seed.clone()],
            &inventory,
            &TraversalConfig::default().with_max_depth(1),
        );
        assert!(shallow.get("bucket-1").is_none());

        let deep = run(&[seed.clone()], &inventory, &TraversalConfig::default());
        let bucket = deep.get("bucket-1").unwrap();
        assert_eq!(bucket.discovery_path, vec!["i-1", "role-1", "bucket-1"]);
        assert_eq!(bucket.depth, 2);

        let strict = run(
            &[seed],
            &inventory,
            &TraversalConfig::default().with_threshold(0.8),
        );
        assert!(strict.get("role-1").is_some());
        assert!(strict.get("sg-1").is_none());
        assert!(strict.get("bucket-1").is_none());
    }

    #[test]
    fn test_edge_type_filter() {
        let seed = instance("i-1", "sg-1", "role-1");
        let inventory = vec![
            seed.clone(),
            Resource::new("role-1", ResourceType::IamRole),
            Resource::new("sg-1", ResourceType::SecurityGroup),
        ];
        let result = run(
            &[seed],
            &inventory,
            &TraversalConfig::default().with_edge_types([EdgeKind::Iam]),
        );
        assert!(result.get("role-1").is_some());
        assert!(result.get("sg-1").is_none());
    }

    #[test]
    fn test_best_path_wins_and_kinds_union() {
        // role-1 is reachable directly (iam) and via sg-1 (network), the
        // direct path scores higher.
        let seed = instance("i-1", "sg-1", "role-1");
        let sg = Resource::new("sg-1", ResourceType::SecurityGroup);
        let role = Resource::new("role-1", ResourceType::IamRole).with_attributes(
            ResourceAttributes {
                security_groups: vec!["sg-1".into()],
                ..Default::default()
            },
        );
        let inventory = vec![seed.clone(), sg, role];
        let config = TraversalConfig::default().with_threshold(0.1);
        let result = run(&[seed], &inventory, &config);

        let role = result.get("role-1").unwrap();
        assert_eq!(role.discovery_path, vec!["i-1", "role-1"]);
        assert!(role.edge_types.contains(&EdgeKind::Iam));
        assert!(role.edge_types.contains(&EdgeKind::Network));
    }

    #[test]
    fn test_child_relation_not_recorded_on_parent() {
        // i-1 -iam-> role-1 -data-> b-1; walking back from b-1 is not a path to role-1.
        let seed = Resource::new("i-1", ResourceType::Ec2Instance).with_attributes(
            ResourceAttributes {
                role: Some("role-1".into()),
                ..Default::default()
            },
        );
        let role = Resource::new("role-1", ResourceType::IamRole).with_attributes(
            ResourceAttributes {
                data_access: vec!["b-1".into()],
                ..Default::default()
            },
        );
        let inventory = vec![
            seed.clone(),
            role,
            Resource::new("b-1", ResourceType::S3Bucket),
        ];
        let config = TraversalConfig::default()
            .with_max_depth(3)
            .with_threshold(0.3);
        let result = run(&[seed], &inventory, &config);

        let role = result.get("role-1").unwrap();
        assert_eq!(role.discovery_path, vec!["i-1", "role-1"]);
        assert_eq!(role.edge_types, BTreeSet::from([EdgeKind::Iam]));
        let bucket = result.get("b-1").unwrap();
        assert_eq!(bucket.discovery_path, vec!["i-1", "role-1", "b-1"]);
        assert_eq!(bucket.edge_types, BTreeSet::from([EdgeKind::Data]));
    }

    #[test]
    fn test_seed_reachable_from_other_seed_stays_seed() {
        let a = instance("i-1", "sg-1", "role-1");
        let b = Resource::new("role-1", ResourceType::IamRole);
        let inventory = vec![
            a.clone(),
            b.clone(),
            Resource::new("sg-1", ResourceType::SecurityGroup),
        ];
        let result = run(&[a, b], &inventory, &TraversalConfig::default());
        assert_eq!(result.seeds.len(), 2);
        assert!(result.discovered.iter().all(|r| r.id() != "role-1"));
        let ids = result.resource_ids();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len());
    }

    #[test]
    fn test_shared_resources_separated() {
        let seed = instance("i-1", "sg-1", "role-1");
        let inventory = vec![
            seed.clone(),
            Resource::new("role-1", ResourceType::IamRole)
                .with_system("payments")
                .with_system("billing"),
            Resource::new("sg-1", ResourceType::SecurityGroup),
        ];
        let result = run(&[seed], &inventory, &TraversalConfig::default());
        assert_eq!(result.shared_resources.len(), 1);
        let shared = &result.shared_resources[0];
        assert!(shared.is_shared);
        assert_eq!(
            shared.shared_with,
            BTreeSet::from(["billing".to_string()])
        );
        assert_eq!(result.discovered.len(), 1);
    }

    #[tokio::test]
    async fn test_discoverer_reads_inventory_once() {
        let mock = Arc::new(MockInventoryConnector::with_resources(
            "inventory",
            vec![
                sample_instance("i-1", "sg-1", "role-1"),
                sample_raw_resource("sg-1", "SecurityGroup"),
                sample_raw_resource("role-1", "IAMRole"),
            ],
        ));
        let discoverer = PropagationDiscoverer::new(mock.clone());
        let request = DiscoveryRequest::new(
            "payments",
            vec![instance("i-1", "sg-1", "role-1")],
        );

        let result = discoverer.discover(&request).await.unwrap();
        assert_eq!(result.total_count, 3);
        assert!(!result.simulated);
        assert_eq!(mock.list_resources_calls(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_inventory_is_surfaced() {
        let mock = Arc::new(MockInventoryConnector::new("inventory"));
        mock.set_failure(Some(lpg_connectors::ConnectorError::ConnectionFailed(
            "refused".into(),
        )))
        .await;
        let discoverer = PropagationDiscoverer::new(mock);
        let request = DiscoveryRequest::new(
            "payments",
            vec![Resource::new("i-1", ResourceType::Ec2Instance)],
        );

        let result = discoverer.discover(&request).await;
        assert!(matches!(result, Err(DiscoveryError::DiscoveryUnavailable(_))));
    }
}
