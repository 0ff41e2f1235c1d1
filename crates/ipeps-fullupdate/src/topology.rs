//! Bond graph of the active sites.

use ipeps_core::{Index, Tensor};
use petgraph::algo::{connected_components, is_cyclic_undirected};
use petgraph::graph::{NodeIndex, UnGraph};

use crate::plaquette::{Position, INTERNAL_BONDS};

/// Undirected graph whose nodes are active sites (by slot) and whose edges
/// are the bonds between them.
#[derive(Debug, Clone)]
pub struct ActiveTopology {
    graph: UnGraph<usize, Option<Index>>,
    nodes: Vec<NodeIndex>,
}

impl ActiveTopology {
    /// Topology of active plaquette positions (no tensors needed).
    pub fn from_positions(active: &[Position]) -> Self {
        let mut graph = UnGraph::new_undirected();
        let nodes: Vec<NodeIndex> = (0..active.len()).map(|i| graph.add_node(i)).collect();
        for (a, _, b, _) in INTERNAL_BONDS {
            let ia = active.iter().position(|&p| p == a);
            let ib = active.iter().position(|&p| p == b);
            if let (Some(ia), Some(ib)) = (ia, ib) {
                graph.add_edge(nodes[ia], nodes[ib], None);
            }
        }
        Self { graph, nodes }
    }

    /// Topology from shared legs between tensors.
    pub fn from_tensors(tensors: &[Tensor]) -> Self {
        let mut graph = UnGraph::new_undirected();
        let nodes: Vec<NodeIndex> = (0..tensors.len()).map(|i| graph.add_node(i)).collect();
        for i in 0..tensors.len() {
            for j in (i + 1)..tensors.len() {
                for leg in tensors[i].common_indices(&tensors[j]) {
                    graph.add_edge(nodes[i], nodes[j], Some(leg));
                }
            }
        }
        Self { graph, nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_connected(&self) -> bool {
        connected_components(&self.graph) <= 1
    }

    pub fn is_cyclic(&self) -> bool {
        is_cyclic_undirected(&self.graph)
    }

    /// Bond legs between sites `i` and `j` (empty unless built from tensors).
    pub fn bonds_between(&self, i: usize, j: usize) -> Vec<Index> {
        self.graph
            .edges_connecting(self.nodes[i], self.nodes[j])
            .filter_map(|e| e.weight().clone())
            .collect()
    }

    /// Neighbouring sites of `i`.
    pub fn neighbors(&self, i: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .graph
            .neighbors(self.nodes[i])
            .map(|n| self.graph[n])
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Site order along a simple path, if the graph is one.
    pub fn chain_order(&self) -> Option<Vec<usize>> {
        if self.is_empty() || !self.is_connected() || self.is_cyclic() {
            return None;
        }
        let n = self.len();
        if n == 1 {
            return Some(vec![0]);
        }
        let degrees: Vec<usize> = (0..n).map(|i| self.neighbors(i).len()).collect();
        if degrees.iter().any(|&d| d > 2) {
            return None;
        }
        let start = degrees.iter().position(|&d| d == 1)?;
        let mut order = vec![start];
        let mut prev = usize::MAX;
        let mut cur = start;
        while order.len() < n {
            let next = self.neighbors(cur).into_iter().find(|&x| x != prev)?;
            order.push(next);
            prev = cur;
            cur = next;
        }
        Some(order)
    }
}
