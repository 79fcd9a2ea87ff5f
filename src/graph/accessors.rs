//! Graph query methods
//!
//! Producer/consumer lookups, constant access, shape and dtype queries with
//! on-demand inference, and topological ordering.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use crate::error::{ConvertError, ConvertResult};
use crate::proto::tensor_proto::DataType;
use crate::tensor::{Shape, TensorValue};

use super::context::Graph;
use super::maps::{NodeId, TensorInfo};
use super::node::Node;

impl Graph {
    // ========================================================================
    // Graph traversal
    // ========================================================================

    /// Get the producer of a tensor
    pub fn producer(&self, tensor: &str) -> Option<NodeId> {
        self.producer_map.get(tensor).copied()
    }

    /// Get the producer node of a tensor
    pub fn producer_node(&self, tensor: &str) -> Option<&Node> {
        self.producer(tensor).and_then(|id| self.node(id))
    }

    /// Nodes reading a tensor, deduplicated, in slot order
    pub fn find_output_consumers(&self, tensor: &str) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .consumer_map
            .get(tensor)
            .map(|c| c.to_vec())
            .unwrap_or_default();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Number of consuming input slots for a tensor
    pub fn consumer_count(&self, tensor: &str) -> usize {
        self.consumer_map.get(tensor).map(|c| c.len()).unwrap_or(0)
    }

    /// Whether any node or the graph boundary reads this tensor
    pub fn is_used(&self, tensor: &str) -> bool {
        self.consumer_count(tensor) > 0 || self.is_graph_output(tensor)
    }

    /// Check if a tensor is used by exactly one consuming slot and is not a graph output
    pub fn is_single_use(&self, tensor: &str) -> bool {
        self.consumer_count(tensor) == 1 && !self.is_graph_output(tensor)
    }

    /// Producer of the first input of a node
    pub fn prev_node(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)
            .and_then(|n| n.input(0))
            .and_then(|t| self.producer(t))
    }

    // ========================================================================
    // Constants
    // ========================================================================

    /// Check if a tensor is produced by a `Const` node
    pub fn is_const(&self, tensor: &str) -> bool {
        self.const_value(tensor).is_some()
    }

    /// Value of a tensor produced by a `Const` node
    pub fn const_value(&self, tensor: &str) -> Option<&TensorValue> {
        let node = self.producer_node(tensor)?;
        if node.op_type() != "Const" {
            return None;
        }
        node.get_tensor("value").ok()
    }

    // ========================================================================
    // Shape and type queries
    // ========================================================================

    /// Shape of a tensor
    ///
    /// Returns the stored shape when fully known or overridden, otherwise
    /// propagates from the producer's inputs on demand.
    pub fn get_shape(&self, tensor: &str) -> Shape {
        self.resolved_info(tensor).shape
    }

    /// Element type of a tensor, inferred on demand
    pub fn get_dtype(&self, tensor: &str) -> Option<DataType> {
        self.resolved_info(tensor).dtype
    }

    /// Rank of a tensor if known
    pub fn get_rank(&self, tensor: &str) -> Option<usize> {
        self.get_shape(tensor).rank()
    }

    fn resolved_info(&self, tensor: &str) -> TensorInfo {
        let stored = self.tensor_info.get(tensor).cloned().unwrap_or_default();
        if stored.is_complete() {
            return stored;
        }
        crate::infer::infer_on_demand(self, tensor)
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    /// Nodes in dependency order
    ///
    /// Kahn's algorithm with ties broken by slot order, so the result is
    /// deterministic for a given graph history.
    pub fn topological_order(&self) -> ConvertResult<Vec<NodeId>> {
        let mut in_degree: FxHashMap<usize, usize> = FxHashMap::default();
        let mut ready = BinaryHeap::new();

        for (id, node) in self.nodes() {
            let degree = node
                .inputs()
                .iter()
                .filter(|t| !t.is_empty())
                .filter(|t| self.producer(t).is_some())
                .count();
            in_degree.insert(id.0, degree);
            if degree == 0 {
                ready.push(Reverse(id.0));
            }
        }

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(slot)) = ready.pop() {
            let id = NodeId(slot);
            order.push(id);
            let Some(node) = self.node(id) else { continue };
            for output in node.outputs() {
                let Some(consumers) = self.consumer_map.get(output) else {
                    continue;
                };
                for consumer in consumers {
                    if let Some(d) = in_degree.get_mut(&consumer.0) {
                        *d -= 1;
                        if *d == 0 {
                            ready.push(Reverse(consumer.0));
                        }
                    }
                }
            }
        }

        if order.len() != in_degree.len() {
            let stuck = in_degree
                .iter()
                .filter(|(_, &d)| d > 0)
                .map(|(&slot, _)| slot)
                .min()
                .and_then(|slot| self.node(NodeId(slot)))
                .map(|n| n.name().to_string())
                .unwrap_or_default();
            return Err(ConvertError::Cycle(stuck));
        }

        Ok(order)
    }
}
