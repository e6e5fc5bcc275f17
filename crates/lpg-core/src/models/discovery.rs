//! Seed discovery results and traversal settings.

use super::edge::{EdgeKind, RelationType};
use super::resource::Resource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Maximum number of seeds a discovery run accepts.
pub const MAX_SEEDS: usize = 5;

/// How a resource entered a discovery result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    Seed,
    Derived,
}

/// A resource placed in a discovery result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub resource: Resource,
    pub source: DiscoverySource,
    /// Confidence in [0, 1] that the resource belongs to the system. 1.0 for seeds.
    pub membership_score: f64,
    /// Ids from a seed to this resource, both inclusive.
    pub discovery_path: Vec<String>,
    /// Edge kinds seen on any accepted arrival.
    pub edge_types: BTreeSet<EdgeKind>,
    pub is_shared: bool,
    pub shared_with: BTreeSet<String>,
    /// Hops from the seed along `discovery_path`.
    pub depth: usize,
}

impl DiscoveredResource {
    pub fn id(&self) -> &str {
        &self.resource.id
    }

    /// The seed a derived resource was reached from.
    pub fn seed_id(&self) -> Option<&str> {
        self.discovery_path.first().map(String::as_str)
    }
}

/// Outcome of one discovery run. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub system_name: String,
    pub seeds: Vec<DiscoveredResource>,
    pub discovered: Vec<DiscoveredResource>,
    pub shared_resources: Vec<DiscoveredResource>,
    /// `seeds + discovered + shared_resources`.
    pub total_count: usize,
    /// Deepest accepted hop count.
    pub traversal_depth: usize,
    pub confidence_score: f64,
    /// Set only by the simulated discoverer.
    pub simulated: bool,
}

impl DiscoveryResult {
    /// Assembles a result, deriving the aggregate fields from the lists.
    pub fn assemble(
        system_name: impl Into<String>,
        seeds: Vec<DiscoveredResource>,
        discovered: Vec<DiscoveredResource>,
        shared_resources: Vec<DiscoveredResource>,
    ) -> Self {
        let all: Vec<&DiscoveredResource> = seeds
            .iter()
            .chain(discovered.iter())
            .chain(shared_resources.iter())
            .collect();
        let total_count = all.len();
        let traversal_depth = all.iter().map(|r| r.depth).max().unwrap_or(0);
        let confidence_score = if total_count == 0 {
            0.0
        } else {
            all.iter().map(|r| r.membership_score).sum::<f64>() / total_count as f64
        };

        Self {
            system_name: system_name.into(),
            seeds,
            discovered,
            shared_resources,
            total_count,
            traversal_depth,
            confidence_score,
            simulated: false,
        }
    }

    /// All placed resources: seeds, then discovered, then shared.
    pub fn all(&self) -> impl Iterator<Item = &DiscoveredResource> {
        self.seeds
            .iter()
            .chain(self.discovered.iter())
            .chain(self.shared_resources.iter())
    }

    /// Ids of every placed resource, in `all()` order.
    pub fn resource_ids(&self) -> Vec<String> {
        self.all().map(|r| r.resource.id.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&DiscoveredResource> {
        self.all().find(|r| r.resource.id == id)
    }
}

/// Traversal limits for a discovery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalConfig {
    /// Maximum hops from a seed. At least 1.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Minimum score for a candidate to be accepted. In (0, 1].
    #[serde(default = "default_membership_threshold")]
    pub membership_threshold: f64,
    /// Edge kinds the traversal may follow.
    #[serde(default = "default_edge_types")]
    pub edge_types: BTreeSet<EdgeKind>,
}

fn default_max_depth() -> usize {
    2
}

fn default_membership_threshold() -> f64 {
    0.5
}

fn default_edge_types() -> BTreeSet<EdgeKind> {
    EdgeKind::ALL.into_iter().collect()
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            membership_threshold: default_membership_threshold(),
            edge_types: default_edge_types(),
        }
    }
}

impl TraversalConfig {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.membership_threshold = threshold;
        self
    }

    pub fn with_edge_types(mut self, kinds: impl IntoIterator<Item = EdgeKind>) -> Self {
        self.edge_types = kinds.into_iter().collect();
        self
    }

    /// Checks the bounds. Returns a description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_depth < 1 {
            return Err("max_depth must be at least 1".to_string());
        }
        let t = self.membership_threshold;
        if !t.is_finite() || t <= 0.0 || t > 1.0 {
            return Err(format!("membership_threshold must be in (0, 1], got {}", t));
        }
        if self.edge_types.is_empty() {
            return Err("edge_types must name at least one edge kind".to_string());
        }
        Ok(())
    }

    pub fn allows(&self, relation: RelationType) -> bool {
        self.edge_types.contains(&relation.kind())
    }
}

/// Score decay applied per hop.
///
/// A child's score is `parent × strength(relation) × per_hop`. Every factor
/// is clamped to [0, 1], so scores never increase along a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayModel {
    #[serde(default = "default_per_hop")]
    pub per_hop: f64,
    #[serde(default = "default_strengths")]
    pub strengths: BTreeMap<RelationType, f64>,
}

fn default_per_hop() -> f64 {
    0.9
}

fn default_strengths() -> BTreeMap<RelationType, f64> {
    BTreeMap::from([
        (RelationType::IamAssumes, 0.9),
        (RelationType::Attachment, 0.85),
        (RelationType::DataAccess, 0.85),
        (RelationType::Invocation, 0.75),
        (RelationType::SgToSg, 0.6),
        (RelationType::Containment, 0.5),
        (RelationType::Internet, 0.0),
    ])
}

impl Default for DecayModel {
    fn default() -> Self {
        Self {
            per_hop: default_per_hop(),
            strengths: default_strengths(),
        }
    }
}

impl DecayModel {
    /// Strength of a relation. Unlisted relations do not propagate.
    pub fn strength(&self, relation: RelationType) -> f64 {
        clamp_unit(self.strengths.get(&relation).copied().unwrap_or(0.0))
    }

    /// Score of a node reached from a parent with `parent_score` over `relation`.
    pub fn child_score(&self, parent_score: f64, relation: RelationType) -> f64 {
        clamp_unit(parent_score) * self.strength(relation) * clamp_unit(self.per_hop)
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
