//! Graph traversal utilities
//!
//! Breadth-first walks over producer or consumer edges, and the
//! reachability queries used by dead-code elimination.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::graph::{Graph, NodeId};

/// Direction of traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Forward: follow consumer edges (input → output)
    Forward,
    /// Backward: follow producer edges (output → input)
    Backward,
}

/// BFS traversal iterator
pub struct BfsIterator<'a> {
    graph: &'a Graph,
    queue: VecDeque<NodeId>,
    visited: FxHashSet<NodeId>,
    direction: Direction,
}

impl<'a> BfsIterator<'a> {
    /// Create a new BFS iterator over several start nodes
    pub fn new(graph: &'a Graph, start: impl IntoIterator<Item = NodeId>, direction: Direction) -> Self {
        let mut queue = VecDeque::new();
        let mut visited = FxHashSet::default();

        for id in start {
            if graph.node(id).is_some() && visited.insert(id) {
                queue.push_back(id);
            }
        }

        Self {
            graph,
            queue,
            visited,
            direction,
        }
    }

    /// Create forward BFS (follows consumers)
    pub fn forward(graph: &'a Graph, start: NodeId) -> Self {
        Self::new(graph, [start], Direction::Forward)
    }

    /// Create backward BFS (follows producers)
    pub fn backward(graph: &'a Graph, start: NodeId) -> Self {
        Self::new(graph, [start], Direction::Backward)
    }

    fn enqueue(&mut self, id: NodeId) {
        if self.visited.insert(id) {
            self.queue.push_back(id);
        }
    }
}

impl Iterator for BfsIterator<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.queue.pop_front()?;
        let graph = self.graph;
        let Some(node) = graph.node(id) else {
            return self.next();
        };

        match self.direction {
            Direction::Forward => {
                for output in node.outputs() {
                    for consumer in graph.find_output_consumers(output) {
                        self.enqueue(consumer);
                    }
                }
            }
            Direction::Backward => {
                for input in node.inputs().iter().filter(|t| !t.is_empty()) {
                    if let Some(producer) = graph.producer(input) {
                        self.enqueue(producer);
                    }
                }
            }
        }

        Some(id)
    }
}

/// Nodes that contribute to at least one graph output
///
/// Walks producer edges backward from every designated output.
pub fn live_nodes(graph: &Graph) -> FxHashSet<NodeId> {
    let roots: Vec<NodeId> = graph
        .outputs()
        .iter()
        .filter_map(|t| graph.producer(t))
        .collect();
    BfsIterator::new(graph, roots, Direction::Backward).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NewNode;

    fn make_diamond() -> Graph {
        // x -> a -> b -> d
        //        \-> c -/
        // e is dangling
        let mut graph = Graph::new(13);
        graph.add_input("x");
        graph.add_node(NewNode::new("Relu").name("a").input("x")).unwrap();
        graph.add_node(NewNode::new("Neg").name("b").input("a:0")).unwrap();
        graph.add_node(NewNode::new("Abs").name("c").input("a:0")).unwrap();
        graph
            .add_node(NewNode::new("Add").name("d").inputs(["b:0", "c:0"]))
            .unwrap();
        graph.add_node(NewNode::new("Exp").name("e").input("a:0")).unwrap();
        graph.set_outputs(vec!["d:0".to_string()]);
        graph
    }

    fn names(graph: &Graph, ids: impl IntoIterator<Item = NodeId>) -> Vec<String> {
        let mut names: Vec<String> = ids
            .into_iter()
            .map(|id| graph.node(id).unwrap().name().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_bfs_forward() {
        let graph = make_diamond();
        let a = graph.node_id("a").unwrap();
        let visited: Vec<NodeId> = BfsIterator::forward(&graph, a).collect();
        assert_eq!(visited[0], a);
        assert_eq!(names(&graph, visited), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_live_nodes_excludes_dangling() {
        let graph = make_diamond();
        let live = live_nodes(&graph);
        assert_eq!(live.len(), 4);
        assert!(!live.contains(&graph.node_id("e").unwrap()));
    }
}
