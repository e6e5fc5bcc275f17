//! Layout stages.
//!
//! Both engines take a built graph and return positioned copies of its
//! nodes. Node identity and category are never changed.

pub mod rank;
pub mod tiered;

use crate::models::{Edge, GraphNode};
use serde::{Deserialize, Serialize};

pub use rank::{RankLayout, RankLayoutConfig};
pub use tiered::{assign_placement, Placement, TieredLayout, TieredLayoutConfig};

/// Drawing area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    #[serde(default = "default_width")]
    pub width: f64,
    #[serde(default = "default_height")]
    pub height: f64,
    #[serde(default = "default_padding")]
    pub padding: f64,
}

fn default_width() -> f64 {
    1200.0
}

fn default_height() -> f64 {
    800.0
}

fn default_padding() -> f64 {
    40.0
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            padding: default_padding(),
        }
    }
}

impl Canvas {
    pub fn new(width: f64, height: f64, padding: f64) -> Self {
        Self {
            width,
            height,
            padding,
        }
    }

    /// Width inside the padding, never negative.
    pub fn inner_width(&self) -> f64 {
        (self.width - 2.0 * self.padding).max(0.0)
    }

    /// Height inside the padding, never negative.
    pub fn inner_height(&self) -> f64 {
        (self.height - 2.0 * self.padding).max(0.0)
    }
}

/// Nodes left out of a capped column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Truncation {
    pub identity: usize,
    pub storage: usize,
}

impl Truncation {
    pub fn total(&self) -> usize {
        self.identity + self.storage
    }
}

/// Output of a layout stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayoutResult {
    /// Positioned nodes, in input order, without truncated ones.
    pub nodes: Vec<GraphNode>,
    pub truncated: Truncation,
}

/// A layout stage. Implementations are interchangeable.
pub trait LayoutEngine: Send + Sync {
    fn name(&self) -> &str;

    fn layout(&self, nodes: &[GraphNode], edges: &[Edge], canvas: &Canvas) -> LayoutResult;
}
