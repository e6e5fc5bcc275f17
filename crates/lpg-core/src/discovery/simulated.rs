//! Simulated discovery for demos and offline use.
//!
//! Builds a small synthetic neighbourhood around each seed and runs the
//! ordinary traversal over it. Results are always marked `simulated`.

use super::propagation::propagate;
use super::{validate_request, DiscoveryError, DiscoveryRequest, Discoverer};
use crate::graph::derive_relations;
use crate::models::{DecayModel, DiscoveryResult, Resource, ResourceAttributes, ResourceType};
use async_trait::async_trait;
use tracing::warn;

/// Discoverer that fabricates a plausible, clearly labelled result.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDiscoverer {
    decay: DecayModel,
}

impl SimulatedDiscoverer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decay(mut self, decay: DecayModel) -> Self {
        self.decay = decay;
        self
    }
}

/// Synthetic inventory: `role-<seed>` and `sg-<seed>` for every seed, plus
/// `<seed>-data` reachable through the role for compute seeds.
pub fn synthetic_inventory(seeds: &[Resource]) -> Vec<Resource> {
    let mut inventory = Vec::with_capacity(seeds.len() * 4);
    for seed in seeds {
        let role_id = format!("role-{}", seed.id);
        let sg_id = format!("sg-{}", seed.id);

        let mut anchored = seed.clone();
        anchored.attributes.role = Some(role_id.clone());
        anchored.attributes.security_groups.push(sg_id.clone());
        inventory.push(anchored);

        let mut role = Resource::new(role_id, ResourceType::IamRole);
        if seed.resource_type.is_compute() {
            let data_id = format!("{}-data", seed.id);
            role.attributes = ResourceAttributes {
                data_access: vec![data_id.clone()],
                ..Default::default()
            };
            inventory.push(Resource::new(data_id, ResourceType::S3Bucket));
        }
        inventory.push(role);
        inventory.push(Resource::new(sg_id, ResourceType::SecurityGroup));
    }
    inventory
}

#[async_trait]
impl Discoverer for SimulatedDiscoverer {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn discover(&self, request: &DiscoveryRequest) -> Result<DiscoveryResult, DiscoveryError> {
        validate_request(request)?;
        warn!(
            system = %request.system_name,
            seeds = request.seeds.len(),
            "Producing simulated discovery result"
        );

        let inventory = synthetic_inventory(&request.seeds);
        let relations = derive_relations(&inventory);
        let mut result = propagate(
            &request.system_name,
            &request.seeds,
            &inventory,
            &relations.edges,
            &request.config,
            &self.decay,
        );
        result.simulated = true;
        Ok(result)
    }
}
