//! Rank-based left-to-right layout.
//!
//! Cycles are broken by dropping DFS back edges, ranks are longest paths
//! from the sources, and one barycenter sweep orders nodes inside a rank.

use super::{Canvas, LayoutEngine, LayoutResult};
use crate::models::{Edge, GraphNode, Point};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{depth_first_search, Control, DfsEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Box sizes and spacing for the rank layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankLayoutConfig {
    #[serde(default = "default_node_width")]
    pub node_width: f64,
    #[serde(default = "default_node_height")]
    pub node_height: f64,
    /// Horizontal gap between ranks.
    #[serde(default = "default_rank_sep")]
    pub rank_sep: f64,
    /// Vertical gap between nodes of one rank.
    #[serde(default = "default_node_sep")]
    pub node_sep: f64,
}

fn default_node_width() -> f64 {
    160.0
}

fn default_node_height() -> f64 {
    60.0
}

fn default_rank_sep() -> f64 {
    80.0
}

fn default_node_sep() -> f64 {
    30.0
}

impl Default for RankLayoutConfig {
    fn default() -> Self {
        Self {
            node_width: default_node_width(),
            node_height: default_node_height(),
            rank_sep: default_rank_sep(),
            node_sep: default_node_sep(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RankLayout {
    config: RankLayoutConfig,
}

impl RankLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RankLayoutConfig) -> Self {
        Self { config }
    }

    /// Rank of every input node, by input index.
    pub fn ranks(&self, nodes: &[GraphNode], edges: &[Edge]) -> Vec<usize> {
        longest_path_ranks(&acyclic_graph(nodes, edges))
    }
}

/// Builds the graph with self loops, unknown endpoints and back edges removed.
fn acyclic_graph(nodes: &[GraphNode], edges: &[Edge]) -> DiGraph<usize, ()> {
    let mut full: DiGraph<usize, ()> = DiGraph::with_capacity(nodes.len(), edges.len());
    let mut index: HashMap<&str, NodeIndex> = HashMap::with_capacity(nodes.len());
    let mut order = Vec::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        let idx = full.add_node(i);
        index.entry(node.id.as_str()).or_insert(idx);
        order.push(idx);
    }

    let mut seen = HashSet::new();
    for edge in edges {
        let (Some(&from), Some(&to)) = (index.get(edge.from.as_str()), index.get(edge.to.as_str()))
        else {
            continue;
        };
        if from != to && seen.insert((from, to)) {
            full.add_edge(from, to, ());
        }
    }

    let mut back_edges = HashSet::new();
    depth_first_search(&full, order.iter().copied(), |event| {
        if let DfsEvent::BackEdge(u, v) = event {
            back_edges.insert((u, v));
        }
        Control::<()>::Continue
    });

    let mut dag: DiGraph<usize, ()> = DiGraph::with_capacity(nodes.len(), full.edge_count());
    for &idx in &order {
        dag.add_node(full[idx]);
    }
    for edge in full.raw_edges() {
        let pair = (edge.source(), edge.target());
        if !back_edges.contains(&pair) {
            dag.add_edge(pair.0, pair.1, ());
        }
    }
    if !back_edges.is_empty() {
        debug!(dropped = back_edges.len(), "Dropped back edges before ranking");
    }
    dag
}

fn longest_path_ranks(dag: &DiGraph<usize, ()>) -> Vec<usize> {
    let mut ranks = vec![0usize; dag.node_count()];
    let topo = match toposort(dag, None) {
        Ok(topo) => topo,
        Err(cycle) => {
            warn!(node = ?cycle.node_id(), "Graph still cyclic after back-edge removal");
            dag.node_indices().collect()
        }
    };
    for node in topo {
        let rank = ranks[node.index()];
        for next in dag.neighbors(node) {
            if ranks[next.index()] < rank + 1 {
                ranks[next.index()] = rank + 1;
            }
        }
    }
    ranks
}

impl LayoutEngine for RankLayout {
    fn name(&self) -> &str {
        "rank"
    }

    fn layout(&self, nodes: &[GraphNode], edges: &[Edge], canvas: &Canvas) -> LayoutResult {
        if nodes.is_empty() {
            return LayoutResult::default();
        }
        let dag = acyclic_graph(nodes, edges);
        let ranks = longest_path_ranks(&dag);
        let max_rank = ranks.iter().copied().max().unwrap_or(0);

        let mut layers: Vec<Vec<usize>> = vec![Vec::new(); max_rank + 1];
        for (i, &rank) in ranks.iter().enumerate() {
            layers[rank].push(i);
        }

        // One barycenter sweep from left to right.
        let mut slot = vec![0usize; nodes.len()];
        for layer in &layers {
            for (pos, &i) in layer.iter().enumerate() {
                slot[i] = pos;
            }
        }
        for rank in 1..layers.len() {
            let mut keyed: Vec<(f64, usize)> = layers[rank]
                .iter()
                .map(|&i| {
                    let preds: Vec<usize> = dag
                        .neighbors_directed(NodeIndex::new(i), petgraph::Direction::Incoming)
                        .map(|p| p.index())
                        .filter(|&p| ranks[p] + 1 == rank)
                        .collect();
                    let barycenter = if preds.is_empty() {
                        slot[i] as f64
                    } else {
                        preds.iter().map(|&p| slot[p] as f64).sum::<f64>() / preds.len() as f64
                    };
                    (barycenter, i)
                })
                .collect();
            keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            layers[rank] = keyed.into_iter().map(|(_, i)| i).collect();
            for (pos, &i) in layers[rank].iter().enumerate() {
                slot[i] = pos;
            }
        }

        let c = &self.config;
        let positioned = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let mut node = node.clone();
                let x = canvas.padding + ranks[i] as f64 * (c.node_width + c.rank_sep) + c.node_width / 2.0;
                let y = canvas.padding + slot[i] as f64 * (c.node_height + c.node_sep) + c.node_height / 2.0;
                node.position = Some(Point::new(x, y));
                node
            })
            .collect();

        LayoutResult {
            nodes: positioned,
            truncated: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RelationType, ResourceType};

    fn nodes(ids: &[&str]) -> Vec<GraphNode> {
        ids.iter()
            .map(|id| GraphNode::new(*id, *id, ResourceType::Ec2Instance))
            .collect()
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge::new(from, to, RelationType::SgToSg)
    }

    #[test]
    fn test_chain_ranks_left_to_right() {
        let n = nodes(&["a", "b", "c"]);
        let e = vec![edge("a", "b"), edge("b", "c")];
        let result = RankLayout::new().layout(&n, &e, &Canvas::default());
        let xs: Vec<f64> = result.nodes.iter().map(|n| n.position.unwrap().x).collect();
        assert!(xs[0] < xs[1] && xs[1] < xs[2]);
        assert_eq!(result.truncated.total(), 0);
    }

    #[test]
    fn test_longest_path_rank() {
        let n = nodes(&["a", "b", "c"]);
        let e = vec![edge("a", "b"), edge("b", "c"), edge("a", "c")];
        assert_eq!(RankLayout::new().ranks(&n, &e), vec![0, 1, 2]);
    }

    #[test]
    fn test_cycle_is_broken() {
        let n = nodes(&["a", "b", "c"]);
        let e = vec![edge("a", "b"), edge("b", "c"), edge("c", "a")];
        let ranks = RankLayout::new().ranks(&n, &e);
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[test]
    fn test_unknown_endpoints_and_self_loops_ignored() {
        let n = nodes(&["a", "b"]);
        let e = vec![edge("a", "a"), edge("a", "ghost"), edge("a", "b")];
        assert_eq!(RankLayout::new().ranks(&n, &e), vec![0, 1]);
    }

    #[test]
    fn test_barycenter_follows_parents() {
        // x and y are parents of q and p respectively; p listed first.
        let n = nodes(&["x", "y", "p", "q"]);
        let e = vec![edge("x", "q"), edge("y", "p")];
        let result = RankLayout::new().layout(&n, &e, &Canvas::default());
        let y_of = |id: &str| {
            result
                .nodes
                .iter()
                .find(|n| n.id == id)
                .unwrap()
                .position
                .unwrap()
                .y
        };
        assert!(y_of("q") < y_of("p"));
    }

    #[test]
    fn test_nodes_in_one_rank_do_not_overlap() {
        let n = nodes(&["root", "a", "b", "c"]);
        let e = vec![edge("root", "a"), edge("root", "b"), edge("root", "c")];
        let result = RankLayout::new().layout(&n, &e, &Canvas::default());
        let mut ys: Vec<f64> = result.nodes[1..]
            .iter()
            .map(|n| n.position.unwrap().y)
            .collect();
        ys.sort_by(f64::total_cmp);
        let c = RankLayoutConfig::default();
        for pair in ys.windows(2) {
            assert!(pair[1] - pair[0] >= c.node_height + c.node_sep - 1e-9);
        }
    }

    #[test]
    fn test_empty_input() {
        let result = RankLayout::new().layout(&[], &[], &Canvas::default());
        assert!(result.nodes.is_empty());
    }
}
