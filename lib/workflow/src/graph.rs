//! Graph helpers: reachability and execution ordering.
//!
//! The graph is rebuilt from a definition on every validation; connections
//! whose endpoints are unknown are left out, and parallel edges are kept so
//! in-degree counting sees every connection.

use crate::definition::WorkflowDefinition;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Directed view of a definition's nodes and connections.
pub(crate) struct WorkflowGraph {
    graph: DiGraph<String, ()>,
    index_of: HashMap<String, NodeIndex>,
}

impl WorkflowGraph {
    pub(crate) fn build(definition: &WorkflowDefinition) -> Self {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();
        for node in &definition.nodes {
            if node.id.is_empty() || index_of.contains_key(&node.id) {
                continue;
            }
            let index = graph.add_node(node.id.clone());
            index_of.insert(node.id.clone(), index);
        }
        for conn in &definition.connections {
            let from = index_of.get(&conn.from.node_id);
            let to = index_of.get(&conn.to.node_id);
            if let (Some(&from), Some(&to)) = (from, to) {
                graph.add_edge(from, to, ());
            }
        }
        Self { graph, index_of }
    }

    /// Node ids reachable from `start` by forward traversal, including it.
    pub(crate) fn reachable_from(&self, start: &str) -> BTreeSet<String> {
        let mut reachable = BTreeSet::new();
        let Some(&start_index) = self.index_of.get(start) else {
            return reachable;
        };
        let mut bfs = Bfs::new(&self.graph, start_index);
        while let Some(index) = bfs.next(&self.graph) {
            reachable.insert(self.graph[index].clone());
        }
        reachable
    }

    /// Topological order by iterative in-degree elimination.
    ///
    /// Ties resolve in definition order, so the result is stable across
    /// runs. On a cycle, returns the ids still holding positive in-degree.
    pub(crate) fn kahn_order(&self) -> Result<Vec<String>, Vec<String>> {
        let mut indegree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|index| {
                let incoming = self.graph.edges_directed(index, Direction::Incoming).count();
                (index, incoming)
            })
            .collect();

        let mut queue: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|index| indegree.get(index).copied() == Some(0))
            .collect();

        let mut ordered = Vec::with_capacity(self.graph.node_count());
        while let Some(index) = queue.pop_front() {
            ordered.push(self.graph[index].clone());
            let mut targets: Vec<NodeIndex> = self
                .graph
                .edges_directed(index, Direction::Outgoing)
                .map(|edge| edge.target())
                .collect();
            targets.sort_unstable();
            for target in targets {
                if let Some(remaining) = indegree.get_mut(&target) {
                    *remaining -= 1;
                    if *remaining == 0 {
                        queue.push_back(target);
                    }
                }
            }
        }

        if ordered.len() < self.graph.node_count() {
            let stuck: Vec<String> = self
                .graph
                .node_indices()
                .filter(|index| indegree.get(index).copied().unwrap_or(0) > 0)
                .map(|index| self.graph[index].clone())
                .collect();
            return Err(stuck);
        }
        Ok(ordered)
    }
}
