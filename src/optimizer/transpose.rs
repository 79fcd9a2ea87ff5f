//! Transpose simplification
//!
//! Handlers emit a `Transpose` on each side of every layout-sensitive op, so
//! converted graphs are full of back-to-back layout changes. This pass:
//!
//! 1. removes identity permutations
//! 2. merges `Transpose(Transpose(x))` into one node (inverse pairs become
//!    an identity permutation and disappear on the next step)
//! 3. moves a `Transpose` below a chain of unary elementwise ops when the
//!    chain ends in another `Transpose`, so the two can merge

use log::debug;

use crate::error::ConvertResult;
use crate::graph::{Graph, NodeId};
use crate::pattern::{matcher, TRANSPOSE_PAIR, UNARY_ELEMENTWISE};
use crate::tensor::Shape;

use super::{OptimizeResult, OptimizerPass};

/// Merges, cancels and sinks `Transpose` nodes
#[derive(Debug, Default)]
pub struct TransposeOptimizer;

impl TransposeOptimizer {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

/// Permutation equivalent to applying `first` then `second`
fn compose_perms(first: &[i64], second: &[i64]) -> Vec<i64> {
    second.iter().map(|&i| first[i as usize]).collect()
}

fn is_identity_perm(perm: &[i64]) -> bool {
    perm.iter().enumerate().all(|(i, &p)| p == i as i64)
}

/// Dims before a transpose, given the dims after it
fn untranspose(dims: &[i64], perm: &[i64]) -> Vec<i64> {
    let mut out = vec![0; dims.len()];
    for (i, &p) in perm.iter().enumerate() {
        out[p as usize] = dims[i];
    }
    out
}

fn perm_of(graph: &Graph, id: NodeId) -> Option<Vec<i64>> {
    graph.node(id)?.get_ints("perm").ok()
}

fn node_name(graph: &Graph, id: NodeId) -> String {
    graph.node(id).map(|n| n.name().to_string()).unwrap_or_default()
}

fn remove_identity_perms(graph: &mut Graph, result: &mut OptimizeResult) {
    for id in graph.find_nodes_by_op("Transpose") {
        if !perm_of(graph, id).is_some_and(|p| is_identity_perm(&p)) {
            continue;
        }
        let name = node_name(graph, id);
        if graph.bypass_node(id, 0) {
            debug!("removed identity transpose {}", name);
            result.record_removal(&name);
        }
    }
}

fn merge_pairs(graph: &mut Graph, result: &mut OptimizeResult) {
    let pairs = matcher(graph)
        .find_all_matches_with_condition(TRANSPOSE_PAIR, |g, nodes| matcher(g).is_fusible_chain(nodes));

    for pair in pairs {
        let (outer, inner) = (pair.nodes[0], pair.nodes[1]);
        // an earlier merge in this sweep may have consumed either node
        let (Some(p_outer), Some(p_inner)) = (perm_of(graph, outer), perm_of(graph, inner)) else {
            continue;
        };
        if p_outer.len() != p_inner.len() {
            continue;
        }
        let Some(src) = graph.node(inner).and_then(|n| n.input(0)).map(str::to_string) else {
            continue;
        };

        let combined = compose_perms(&p_inner, &p_outer);
        graph.set_node_input(outer, 0, src);
        if let Some(node) = graph.node_mut(outer) {
            node.set_attr("perm", combined);
        }
        let removed = graph.remove_node(inner);
        debug!("merged transpose {} into {}", removed.name(), node_name(graph, outer));
        result.record_removal(removed.name());
        result.record(&node_name(graph, outer));
    }
}

/// Unary chain between a `Transpose` and the next one, or `None`
fn sink_chain(graph: &Graph, first: NodeId) -> Option<(Vec<NodeId>, NodeId)> {
    let mut chain = Vec::new();
    let mut tensor = graph.node(first)?.output(0)?.to_string();
    loop {
        if !graph.is_single_use(&tensor) {
            return None;
        }
        let next = *graph.find_output_consumers(&tensor).first()?;
        let node = graph.node(next)?;
        if node.is_op("Transpose") {
            return (!chain.is_empty()).then_some((chain, next));
        }
        if !UNARY_ELEMENTWISE.contains(&node.op_type()) || node.inputs().len() != 1 {
            return None;
        }
        chain.push(next);
        tensor = node.output(0)?.to_string();
    }
}

fn sink_transposes(graph: &mut Graph, result: &mut OptimizeResult) {
    for first in graph.find_nodes_by_op("Transpose") {
        let Some((chain, last)) = sink_chain(graph, first) else {
            continue;
        };
        let (Some(p_first), Some(p_last)) = (perm_of(graph, first), perm_of(graph, last)) else {
            continue;
        };
        if p_first.len() != p_last.len() {
            continue;
        }
        let Some(src) = graph.node(first).and_then(|n| n.input(0)).map(str::to_string) else {
            continue;
        };

        graph.set_node_input(chain[0], 0, src);
        let removed = graph.remove_node(first);
        result.record_removal(removed.name());

        // the chain now runs in the untransposed layout
        for &id in &chain {
            let out = graph.output_of(id, 0);
            let shape = graph.get_shape(&out);
            if let Some(dims) = shape.dims().filter(|d| d.len() == p_first.len()) {
                let dims = untranspose(dims, &p_first);
                graph.set_shape(&out, Shape::known(dims));
            }
            result.record(&node_name(graph, id));
        }

        if let Some(node) = graph.node_mut(last) {
            node.set_attr("perm", compose_perms(&p_first, &p_last));
        }
        debug!(
            "sank transpose {} below {} unary op(s)",
            removed.name(),
            chain.len()
        );
        result.record(&node_name(graph, last));
    }
}

impl OptimizerPass for TransposeOptimizer {
    fn name(&self) -> &'static str {
        "TransposeOptimizer"
    }

    fn run(&self, graph: &mut Graph) -> ConvertResult<OptimizeResult> {
        let mut result = OptimizeResult::new();
        remove_identity_perms(graph, &mut result);
        merge_pairs(graph, &mut result);
        sink_transposes(graph, &mut result);
        remove_identity_perms(graph, &mut result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NewNode;

    fn transpose(name: &str, input: &str, perm: Vec<i64>) -> NewNode {
        NewNode::new("Transpose").name(name).input(input).attr("perm", perm)
    }

    #[test]
    fn test_compose_perms() {
        // NHWC -> NCHW then back
        assert!(is_identity_perm(&compose_perms(&[0, 3, 1, 2], &[0, 2, 3, 1])));
        assert_eq!(compose_perms(&[1, 0, 2], &[0, 2, 1]), vec![1, 2, 0]);
        assert_eq!(untranspose(&[2, 4, 3], &[0, 2, 1]), vec![2, 3, 4]);
    }

    #[test]
    fn test_inverse_pair_cancels() {
        let mut graph = Graph::new(13);
        graph.add_input("x");
        graph.add_node(transpose("t1", "x", vec![0, 3, 1, 2])).unwrap();
        graph.add_node(transpose("t2", "t1:0", vec![0, 2, 3, 1])).unwrap();
        graph.add_node(NewNode::new("Relu").name("relu").input("t2:0")).unwrap();
        graph.set_outputs(vec!["relu:0".to_string()]);

        let result = TransposeOptimizer::new().run(&mut graph).unwrap();
        assert_eq!(result.nodes_removed, 2);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.node_by_name("relu").unwrap().inputs()[0], "x");
    }

    #[test]
    fn test_shared_inner_not_merged() {
        let mut graph = Graph::new(13);
        graph.add_input("x");
        graph.add_node(transpose("t1", "x", vec![1, 0])).unwrap();
        graph.add_node(transpose("t2", "t1:0", vec![1, 0])).unwrap();
        graph.set_outputs(vec!["t1:0".to_string(), "t2:0".to_string()]);

        let result = TransposeOptimizer::new().run(&mut graph).unwrap();
        assert!(!result.changed());
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_sink_through_unary_chain() {
        let mut graph = Graph::new(13);
        graph.add_input("x");
        graph.set_shape("x", Shape::known(vec![1, 8, 8, 3]));
        graph.add_node(transpose("t1", "x", vec![0, 3, 1, 2])).unwrap();
        graph.set_shape("t1:0", Shape::known(vec![1, 3, 8, 8]));
        graph.add_node(NewNode::new("Relu").name("relu").input("t1:0")).unwrap();
        graph.set_shape("relu:0", Shape::known(vec![1, 3, 8, 8]));
        graph.add_node(transpose("t2", "relu:0", vec![0, 2, 3, 1])).unwrap();
        graph.add_node(NewNode::new("Neg").name("neg").input("t2:0")).unwrap();
        graph.set_outputs(vec!["neg:0".to_string()]);

        let pass = TransposeOptimizer::new();
        let result = pass.run(&mut graph).unwrap();
        assert_eq!(result.nodes_removed, 2);
        assert!(!graph.has_node("t1"));
        assert!(!graph.has_node("t2"));
        assert_eq!(graph.node_by_name("relu").unwrap().inputs()[0], "x");
        assert_eq!(graph.node_by_name("neg").unwrap().inputs()[0], "relu:0");
        assert_eq!(graph.get_shape("relu:0"), Shape::known(vec![1, 8, 8, 3]));

        assert!(!pass.run(&mut graph).unwrap().changed());
    }
}
