// SPDX-License-Identifier: MPL-2.0

//! The dependency graph underlying the scheduler: one node per pending
//! package, one edge per `producer must precede consumer` relationship.
//! Cycle detection is a manual tri-color DFS (§4.6), not
//! `petgraph::algo::is_cyclic_directed`, because breaking a cycle
//! needs the actual cyclic edge list, not just a yes/no.

use std::collections::HashMap;
use std::hash::Hash;

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

/// Whether an edge models a pre-depend (must be fully configured
/// before the consumer unpacks) or an ordinary depend (must be
/// configured before the consumer transitions to `installed`).
/// Pre-depend edges are never candidates for cycle-breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    PreDepend,
    Depend,
}

/// A cycle found by [`DependencyGraph::find_cycle`]: the nodes on the
/// cycle in DFS discovery order, and the edges connecting them.
#[derive(Debug, Clone)]
pub struct Cycle {
    pub nodes: Vec<NodeIndex>,
    pub edges: Vec<EdgeIndex>,
}

#[derive(Debug)]
pub struct DependencyGraph<Id> {
    graph: DiGraph<Id, EdgeKind>,
    index: HashMap<Id, NodeIndex>,
}

impl<Id: Clone + Eq + Hash> Default for DependencyGraph<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: Clone + Eq + Hash> DependencyGraph<Id> {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    pub fn node(&mut self, id: Id) -> NodeIndex {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.index.insert(id, idx);
        idx
    }

    /// Record that `producer` must precede `consumer`.
    pub fn depends_on(&mut self, consumer: Id, producer: Id, kind: EdgeKind) {
        let producer_idx = self.node(producer);
        let consumer_idx = self.node(consumer);
        self.graph.add_edge(producer_idx, consumer_idx, kind);
    }

    pub fn id_of(&self, idx: NodeIndex) -> &Id {
        &self.graph[idx]
    }

    pub fn index_of(&self, id: &Id) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Topologically order every node, producers before consumers. If
    /// the graph is cyclic, `Err` carries the set of node indices on
    /// some cycle (use [`Self::find_cycle`] for the precise edge set
    /// to break).
    pub fn toposort(&self) -> Result<Vec<NodeIndex>, ()> {
        petgraph::algo::toposort(&self.graph, None).map_err(|_| ())
    }

    /// Tri-color DFS cycle search: white = unvisited, gray = on the
    /// current recursion stack, black = fully explored. A back-edge
    /// into a gray node closes the cycle.
    pub fn find_cycle(&self) -> Option<Cycle> {
        let mut color = vec![Color::White; self.graph.node_count()];
        let mut stack: Vec<(NodeIndex, EdgeIndex)> = Vec::new();

        for start in self.graph.node_indices() {
            if color[start.index()] != Color::White {
                continue;
            }
            if let Some(cycle) = self.dfs_from(start, &mut color, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_from(
        &self,
        start: NodeIndex,
        color: &mut [Color],
        stack: &mut Vec<(NodeIndex, EdgeIndex)>,
    ) -> Option<Cycle> {
        self.visit(start, color, stack)
    }

    fn visit(&self, node: NodeIndex, color: &mut [Color], stack: &mut Vec<(NodeIndex, EdgeIndex)>) -> Option<Cycle> {
        color[node.index()] = Color::Gray;

        for edge in self.graph.edges_directed(node, Direction::Outgoing) {
            let target = edge.target();
            match color[target.index()] {
                Color::White => {
                    stack.push((node, edge.id()));
                    if let Some(cycle) = self.visit(target, color, stack) {
                        return Some(cycle);
                    }
                    stack.pop();
                }
                Color::Gray => {
                    // Closing back-edge: unwind `stack` to the point where
                    // `target` first went gray.
                    let start_pos = stack.iter().position(|(n, _)| *n == target).unwrap_or(stack.len());
                    let mut nodes: Vec<NodeIndex> = stack[start_pos..].iter().map(|(n, _)| *n).collect();
                    nodes.push(node);
                    let mut edges: Vec<EdgeIndex> = stack[start_pos..].iter().map(|(_, e)| *e).collect();
                    edges.push(edge.id());
                    return Some(Cycle { nodes, edges });
                }
                Color::Black => {}
            }
        }

        color[node.index()] = Color::Black;
        None
    }

    /// Remove the first non-`PreDepend` edge on `cycle`. Returns
    /// `false` (leaving the graph untouched) if every edge on the
    /// cycle is a pre-depend — such a cycle is a permanent deadlock,
    /// never breakable.
    pub fn break_cycle(&mut self, cycle: &Cycle) -> bool {
        for &edge_idx in &cycle.edges {
            if self.graph[edge_idx] != EdgeKind::PreDepend {
                self.graph.remove_edge(edge_idx);
                return true;
            }
        }
        false
    }
}

type Color = ColorImpl;

#[derive(Clone, Copy, PartialEq, Eq)]
enum ColorImpl {
    White,
    Gray,
    Black,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toposort_orders_producer_before_consumer() {
        let mut g = DependencyGraph::new();
        g.depends_on("b", "a", EdgeKind::Depend);
        let order = g.toposort().unwrap();
        let names: Vec<_> = order.iter().map(|&i| g.id_of(i).clone()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn detects_simple_cycle() {
        let mut g = DependencyGraph::new();
        g.depends_on("a", "b", EdgeKind::Depend);
        g.depends_on("b", "a", EdgeKind::Depend);
        let cycle = g.find_cycle().expect("cycle expected");
        assert_eq!(cycle.edges.len(), 2);
    }

    #[test]
    fn breaks_cycle_via_non_pre_depend_edge() {
        let mut g = DependencyGraph::new();
        g.depends_on("a", "b", EdgeKind::PreDepend);
        g.depends_on("b", "a", EdgeKind::Depend);
        let cycle = g.find_cycle().unwrap();
        assert!(g.break_cycle(&cycle));
        assert!(g.toposort().is_ok());
    }

    #[test]
    fn refuses_to_break_all_pre_depend_cycle() {
        let mut g = DependencyGraph::new();
        g.depends_on("a", "b", EdgeKind::PreDepend);
        g.depends_on("b", "a", EdgeKind::PreDepend);
        let cycle = g.find_cycle().unwrap();
        assert!(!g.break_cycle(&cycle));
    }
}
