//! Tiered security layout.
//!
//! Rows from top to bottom: internet, publicly exposed security groups,
//! application and identity, data and storage. Identity resources sit in a
//! dedicated left column and storage resources in a right column, each
//! capped; nodes beyond the cap are left out and counted.
//!
//! One pass over the edges finds exposed nodes, then one pass over the nodes
//! places them. No iteration, no state carried between calls.

use super::{Canvas, LayoutEngine, LayoutResult, Truncation};
use crate::models::{Edge, GraphNode, NodeCategory, Point, RelationType, Tier, INTERNET_NODE_ID};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Where a node goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    Row(Tier),
    IdentityColumn,
    StorageColumn,
}

impl Placement {
    pub fn tier(&self) -> Tier {
        match self {
            Placement::Row(tier) => *tier,
            Placement::IdentityColumn => Tier::AppIdentity,
            Placement::StorageColumn => Tier::DataStorage,
        }
    }
}

/// Placement rule, first match wins.
///
/// `data_markers` are lowercase substrings that mark a security group as
/// guarding a data store.
pub fn assign_placement(
    category: NodeCategory,
    name: &str,
    internet_exposed: bool,
    data_markers: &[String],
) -> Placement {
    match category {
        NodeCategory::Internet => Placement::Row(Tier::Internet),
        NodeCategory::SecurityGroup if internet_exposed => Placement::Row(Tier::PublicExposed),
        NodeCategory::SecurityGroup => {
            let lowered = name.to_lowercase();
            if data_markers
                .iter()
                .any(|m| !m.is_empty() && lowered.contains(m.as_str()))
            {
                Placement::Row(Tier::DataStorage)
            } else {
                Placement::Row(Tier::AppIdentity)
            }
        }
        NodeCategory::Identity => Placement::IdentityColumn,
        NodeCategory::Storage => Placement::StorageColumn,
        NodeCategory::Compute | NodeCategory::Network | NodeCategory::Other => {
            Placement::Row(Tier::AppIdentity)
        }
    }
}

/// Settings for the tiered layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieredLayoutConfig {
    /// Horizontal space per node in a row.
    #[serde(default = "default_unit_width")]
    pub unit_width: f64,
    /// Width reserved for each side column.
    #[serde(default = "default_column_width")]
    pub column_width: f64,
    #[serde(default = "default_identity_cap")]
    pub identity_cap: usize,
    #[serde(default = "default_storage_cap")]
    pub storage_cap: usize,
    /// Name substrings marking a data security group.
    #[serde(default = "default_data_markers")]
    pub data_markers: Vec<String>,
}

fn default_unit_width() -> f64 {
    180.0
}

fn default_column_width() -> f64 {
    200.0
}

fn default_identity_cap() -> usize {
    10
}

fn default_storage_cap() -> usize {
    8
}

fn default_data_markers() -> Vec<String> {
    vec!["db".to_string(), "data".to_string(), "rds".to_string()]
}

impl Default for TieredLayoutConfig {
    fn default() -> Self {
        Self {
            unit_width: default_unit_width(),
            column_width: default_column_width(),
            identity_cap: default_identity_cap(),
            storage_cap: default_storage_cap(),
            data_markers: default_data_markers(),
        }
    }
}

/// The tiered layout engine.
#[derive(Debug, Clone, Default)]
pub struct TieredLayout {
    config: TieredLayoutConfig,
}

impl TieredLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TieredLayoutConfig) -> Self {
        let data_markers = config
            .data_markers
            .iter()
            .map(|m| m.to_lowercase())
            .collect();
        Self {
            config: TieredLayoutConfig {
                data_markers,
                ..config
            },
        }
    }

    pub fn config(&self) -> &TieredLayoutConfig {
        &self.config
    }

    /// Placement of one node.
    pub fn placement(&self, node: &GraphNode, internet_exposed: bool) -> Placement {
        assign_placement(
            node.category,
            &node.display_name,
            internet_exposed,
            &self.config.data_markers,
        )
    }
}

/// Ids targeted by an edge from the internet node.
fn exposed_ids(edges: &[Edge]) -> HashSet<&str> {
    edges
        .iter()
        .filter(|e| e.relation == RelationType::Internet || e.from == INTERNET_NODE_ID)
        .map(|e| e.to.as_str())
        .collect()
}

/// Centres of `count` slots spread evenly over `[start, start + span]`.
fn spread(count: usize, start: f64, span: f64) -> impl Iterator<Item = f64> {
    (0..count).map(move |i| start + span * (i as f64 + 0.5) / count as f64)
}

impl LayoutEngine for TieredLayout {
    fn name(&self) -> &str {
        "tiered"
    }

    fn layout(&self, nodes: &[GraphNode], edges: &[Edge], canvas: &Canvas) -> LayoutResult {
        let exposed = exposed_ids(edges);

        let mut rows: [Vec<usize>; 4] = Default::default();
        let mut identity = Vec::new();
        let mut storage = Vec::new();
        let mut placements = Vec::with_capacity(nodes.len());

        for (index, node) in nodes.iter().enumerate() {
            let is_exposed = exposed.contains(node.id.as_str());
            let placement = self.placement(node, is_exposed);
            match placement {
                Placement::Row(tier) => rows[tier.index()].push(index),
                Placement::IdentityColumn => identity.push(index),
                Placement::StorageColumn => storage.push(index),
            }
            placements.push((placement, is_exposed));
        }

        let truncated = Truncation {
            identity: identity.len().saturating_sub(self.config.identity_cap),
            storage: storage.len().saturating_sub(self.config.storage_cap),
        };
        identity.truncate(self.config.identity_cap);
        storage.truncate(self.config.storage_cap);

        let inner_height = canvas.inner_height();
        let left_reserved = if identity.is_empty() {
            0.0
        } else {
            self.config.column_width
        };
        let right_reserved = if storage.is_empty() {
            0.0
        } else {
            self.config.column_width
        };
        let row_left = canvas.padding + left_reserved;
        let available = (canvas.inner_width() - left_reserved - right_reserved).max(0.0);

        let mut positions: Vec<Option<Point>> = vec![None; nodes.len()];

        for tier in Tier::ALL {
            let members = &rows[tier.index()];
            if members.is_empty() {
                continue;
            }
            let y = canvas.padding + inner_height * (tier.index() as f64 + 0.5) / Tier::ALL.len() as f64;
            let span = (members.len() as f64 * self.config.unit_width).min(available);
            let start = row_left + (available - span) / 2.0;
            for (&index, x) in members.iter().zip(spread(members.len(), start, span)) {
                positions[index] = Some(Point::new(x, y));
            }
        }

        let left_x = canvas.padding + self.config.column_width / 2.0;
        let right_x = canvas.width - canvas.padding - self.config.column_width / 2.0;
        for (column, x) in [(&identity, left_x), (&storage, right_x)] {
            for (&index, y) in column
                .iter()
                .zip(spread(column.len(), canvas.padding, inner_height))
            {
                positions[index] = Some(Point::new(x, y));
            }
        }

        let positioned: Vec<GraphNode> = nodes
            .iter()
            .zip(placements)
            .zip(positions)
            .filter_map(|((node, (placement, is_exposed)), position)| {
                position.map(|point| {
                    let mut node = node.clone();
                    node.tier = Some(placement.tier());
                    node.position = Some(point);
                    node.internet_exposed = is_exposed;
                    node
                })
            })
            .collect();

        debug!(
            placed = positioned.len(),
            truncated_identity = truncated.identity,
            truncated_storage = truncated.storage,
            "Tiered layout complete"
        );

        LayoutResult {
            nodes: positioned,
            truncated,
        }
    }
}
