//! Pattern matching engine for converted graphs
//!
//! Matches chains of op kinds in reverse order: the first pattern entry
//! matches the anchor node, each following entry matches the producer of
//! the previous node's first input.

use crate::graph::{Graph, Node, NodeId};

/// Result of a successful pattern match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// Matched nodes in pattern order (first = anchor, last = earliest in graph)
    pub nodes: Vec<NodeId>,
}

impl MatchResult {
    /// The anchor node
    pub fn anchor(&self) -> NodeId {
        self.nodes[0]
    }

    /// The earliest matched node
    pub fn last(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    /// Node at index
    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.nodes.get(index).copied()
    }

    /// Number of matched nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a produced match
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Reverse chain matcher over a [`Graph`]
pub struct PatternMatcher<'a> {
    graph: &'a Graph,
}

impl<'a> PatternMatcher<'a> {
    /// Create a new pattern matcher
    pub fn new(graph: &'a Graph) -> Self {
        Self { graph }
    }

    /// Match a pattern starting from the given node
    ///
    /// ```ignore
    /// // Transpose <- Transpose
    /// let pair = matcher.match_pattern(id, &["Transpose", "Transpose"]);
    /// ```
    pub fn match_pattern(&self, anchor: NodeId, pattern: &[&str]) -> Option<MatchResult> {
        if pattern.is_empty() {
            return None;
        }

        let mut matched = Vec::with_capacity(pattern.len());
        let mut current = Some(anchor);

        for &op_type in pattern {
            let id = current?;
            let node = self.graph.node(id)?;
            if node.op_type() != op_type {
                return None;
            }
            matched.push(id);
            current = self.graph.prev_node(id);
        }

        Some(MatchResult { nodes: matched })
    }

    /// Match with an additional check over the matched nodes
    pub fn match_pattern_with_condition<F>(
        &self,
        anchor: NodeId,
        pattern: &[&str],
        condition: F,
    ) -> Option<MatchResult>
    where
        F: FnOnce(&Graph, &[NodeId]) -> bool,
    {
        let result = self.match_pattern(anchor, pattern)?;
        condition(self.graph, &result.nodes).then_some(result)
    }

    /// All matches in slot order
    pub fn find_all_matches(&self, pattern: &[&str]) -> Vec<MatchResult> {
        self.find_all_matches_with_condition(pattern, |_, _| true)
    }

    /// All matches satisfying a condition
    pub fn find_all_matches_with_condition<F>(&self, pattern: &[&str], condition: F) -> Vec<MatchResult>
    where
        F: Fn(&Graph, &[NodeId]) -> bool,
    {
        let Some(&anchor_op) = pattern.first() else {
            return Vec::new();
        };

        self.graph
            .find_nodes_by_op(anchor_op)
            .into_iter()
            .filter_map(|id| self.match_pattern(id, pattern))
            .filter(|m| condition(self.graph, &m.nodes))
            .collect()
    }

    /// Check that every link of a chain is the only use of its tensor
    ///
    /// Used to verify that intermediate nodes can be removed after a rewrite.
    pub fn is_fusible_chain(&self, nodes: &[NodeId]) -> bool {
        nodes.iter().skip(1).all(|&id| {
            self.graph
                .node(id)
                .and_then(|n| n.output(0))
                .is_some_and(|out| self.graph.is_single_use(out))
        })
    }
}

/// Convenience function to create a pattern matcher
pub fn matcher(graph: &Graph) -> PatternMatcher<'_> {
    PatternMatcher::new(graph)
}

/// Follow `Identity` producers upward from a tensor
///
/// Returns the first producer that is not an `Identity`, or `None` when the
/// chain ends at a graph input or an unproduced tensor.
pub fn skip_identity_chain<'g>(graph: &'g Graph, tensor: &str) -> Option<(NodeId, &'g Node)> {
    let mut current = tensor.to_string();
    // bounded by the node count to survive malformed cycles
    for _ in 0..=graph.node_count() {
        let id = graph.producer(&current)?;
        let node = graph.node(id)?;
        if !node.is_op("Identity") {
            return Some((id, node));
        }
        current = node.input(0)?.to_string();
    }
    None
}
