//! Shape and dtype inference
//!
//! Two entry points share the per-op rules in [`rules`]:
//!
//! - [`infer_on_demand`]: read-only, answers a single query by walking the
//!   producers of a tensor until it reaches facts that are already complete
//! - [`Graph::infer_shapes`]: walks the whole graph in dependency order and
//!   stores every derived fact
//!
//! Stored facts always win over inferred ones. Inference only fills
//! unknown dims and missing dtypes; a caller-forced shape that inference
//! contradicts is reported as [`ConvertError::ShapeConflict`].

pub mod rules;

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{ConvertError, ConvertResult};
use crate::graph::{Graph, TensorInfo};

pub use rules::infer_node;

/// Combine stored facts with inferred ones
///
/// Returns the merged info and whether the shapes disagreed.
fn merge_info(stored: &TensorInfo, inferred: &TensorInfo) -> (TensorInfo, bool) {
    let (shape, conflict) = if stored.overridden {
        let conflict = stored.shape.merge(&inferred.shape).is_none();
        (stored.shape.clone(), conflict)
    } else {
        match stored.shape.merge(&inferred.shape) {
            Some(shape) => (shape, false),
            None => (stored.shape.clone(), true),
        }
    };
    let info = TensorInfo {
        shape,
        dtype: stored.dtype.or(inferred.dtype),
        overridden: stored.overridden,
    };
    (info, conflict)
}

/// Best-known facts for one tensor without mutating the graph
///
/// Iterative post-order walk over producers; stops at complete facts,
/// graph inputs and tensors without a producer.
pub fn infer_on_demand(graph: &Graph, tensor: &str) -> TensorInfo {
    let mut cache: FxHashMap<String, TensorInfo> = FxHashMap::default();
    let mut visiting: FxHashSet<String> = FxHashSet::default();
    let mut stack = vec![tensor.to_string()];

    while let Some(current) = stack.last().cloned() {
        if cache.contains_key(&current) {
            stack.pop();
            continue;
        }
        let stored = graph.tensor_info(&current).cloned().unwrap_or_default();
        let producer = graph.producer(&current).and_then(|id| graph.node(id));
        let Some(node) = producer.filter(|_| !stored.is_complete()) else {
            cache.insert(current, stored);
            stack.pop();
            continue;
        };

        // first visit schedules the inputs, second visit evaluates
        if visiting.insert(current.clone()) {
            let pending: Vec<String> = node
                .inputs()
                .iter()
                .filter(|t| !t.is_empty() && !cache.contains_key(t.as_str()))
                .filter(|t| !visiting.contains(t.as_str()))
                .cloned()
                .collect();
            if !pending.is_empty() {
                stack.extend(pending);
                continue;
            }
        }

        let input_infos: Vec<TensorInfo> = node
            .inputs()
            .iter()
            .map(|t| {
                cache
                    .get(t)
                    .cloned()
                    .or_else(|| graph.tensor_info(t).cloned())
                    .unwrap_or_default()
            })
            .collect();

        let inferred = infer_node(graph, node, &input_infos);
        for (output, out_info) in node.outputs().iter().zip(inferred) {
            let stored = graph.tensor_info(output).cloned().unwrap_or_default();
            let (merged, _) = merge_info(&stored, &out_info);
            cache.insert(output.clone(), merged);
        }
        // outputs a rule did not cover keep their stored facts
        cache.entry(current).or_insert(stored);
        stack.pop();
    }

    cache.remove(tensor).unwrap_or_default()
}

impl Graph {
    /// Infer and store shape and dtype facts for every tensor
    ///
    /// Nested graphs held in node attributes are processed first, then
    /// this graph in topological order.
    pub fn infer_shapes(&mut self) -> ConvertResult<()> {
        let order = self.topological_order()?;

        for id in order {
            let attrs = self.node(id).map(|n| n.subgraph_attrs()).unwrap_or_default();
            for attr in attrs {
                if let Some(mut sub) = self.take_subgraph(id, &attr) {
                    let result = sub.infer_shapes();
                    self.set_subgraph(id, &attr, sub);
                    result?;
                }
            }

            let Some(node) = self.node(id) else { continue };
            let input_infos: Vec<TensorInfo> = node
                .inputs()
                .iter()
                .map(|t| self.tensor_info(t).cloned().unwrap_or_default())
                .collect();
            let inferred = infer_node(self, node, &input_infos);
            let outputs: Vec<String> = node.outputs().to_vec();

            for (output, out_info) in outputs.iter().zip(inferred) {
                let stored = self.tensor_info(output).cloned().unwrap_or_default();
                let (merged, conflict) = merge_info(&stored, &out_info);
                if conflict {
                    if stored.overridden {
                        return Err(ConvertError::ShapeConflict {
                            tensor: output.clone(),
                            inferred: out_info.shape.to_string(),
                            declared: stored.shape.to_string(),
                        });
                    }
                    debug!(
                        "keeping stored shape {} for {}, inferred {}",
                        stored.shape, output, out_info.shape
                    );
                }
                *self.tensor_info_mut(output) = merged;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NewNode;
    use crate::proto::tensor_proto::DataType;
    use crate::tensor::{Shape, TensorValue};

    fn make_graph() -> Graph {
        let mut graph = Graph::new(13);
        graph.add_input("x");
        graph.set_shape("x", Shape::known(vec![4, 3]));
        graph.set_dtype("x", DataType::Float);
        let w = graph
            .make_const_tensor("w", TensorValue::vec_f32(vec![0.0; 6]).reshaped(vec![3, 2]).unwrap())
            .unwrap();
        graph
            .add_node(NewNode::new("MatMul").name("mm").inputs(["x".to_string(), w]))
            .unwrap();
        graph
            .add_node(NewNode::new("Relu").name("relu").input("mm:0"))
            .unwrap();
        graph.set_outputs(vec!["relu:0".to_string()]);
        graph
    }

    #[test]
    fn test_on_demand_walks_chain() {
        let graph = make_graph();
        let info = infer_on_demand(&graph, "relu:0");
        assert_eq!(info.shape, Shape::known(vec![4, 2]));
        assert_eq!(info.dtype, Some(DataType::Float));
    }

    #[test]
    fn test_infer_shapes_stores_facts() {
        let mut graph = make_graph();
        graph.infer_shapes().unwrap();
        let info = graph.tensor_info("relu:0").unwrap();
        assert_eq!(info.shape, Shape::known(vec![4, 2]));
        assert!(info.is_complete());
    }

    #[test]
    fn test_stored_dims_refined_not_replaced() {
        let mut graph = make_graph();
        graph.set_shape("mm:0", Shape::known(vec![-1, 2]));
        graph.infer_shapes().unwrap();
        assert_eq!(graph.get_shape("mm:0"), Shape::known(vec![4, 2]));
    }

    #[test]
    fn test_override_conflict_is_reported() {
        let mut graph = make_graph();
        graph.override_shape("mm:0", Shape::known(vec![5, 2]));
        let err = graph.infer_shapes().unwrap_err();
        assert!(matches!(err, ConvertError::ShapeConflict { .. }));
    }

    #[test]
    fn test_plain_conflict_keeps_stored() {
        let mut graph = make_graph();
        graph.set_shape("mm:0", Shape::known(vec![5, 2]));
        graph.infer_shapes().unwrap();
        assert_eq!(graph.get_shape("mm:0"), Shape::known(vec![5, 2]));
    }
}
