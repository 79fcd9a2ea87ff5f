//! Graph container
//!
//! [`Graph`] is the central structure of the converter. Nodes live in an arena
//! of slots addressed by [`NodeId`]; a name index and producer/consumer maps
//! give O(1) lookups in both directions.

use crate::opset::OpsetId;

use super::maps::{ConsumerMap, NameIndex, NodeId, ProducerMap, TensorInfo, TensorInfoMap};
use super::node::Node;
use super::target::Target;

/// Mutable computation graph, source form and target form mixed during conversion
#[derive(Debug, Clone)]
pub struct Graph {
    pub(super) name: String,

    /// Node arena, `None` for removed slots
    pub(super) nodes: Vec<Option<Node>>,

    /// Removed slots available for reuse, smallest last
    pub(super) free_slots: Vec<usize>,

    /// Maps node name → slot
    pub(super) name_index: NameIndex,

    /// Maps tensor id → producer slot
    pub(super) producer_map: ProducerMap,

    /// Maps tensor id → consumer slots, one entry per consuming input
    pub(super) consumer_map: ConsumerMap,

    /// Maps tensor id → shape/dtype facts
    pub(super) tensor_info: TensorInfoMap,

    /// Designated inputs, in order
    pub(super) inputs: Vec<String>,

    /// Designated outputs, in order
    pub(super) outputs: Vec<String>,

    pub(super) opset: i64,
    pub(super) extra_opsets: Vec<OpsetId>,
    pub(super) targets: Vec<Target>,

    /// Counter behind `unique_name`
    pub(super) name_counter: usize,
}

impl Graph {
    /// Create an empty graph for the given opset
    pub fn new(opset: i64) -> Self {
        Self::with_name("graph", opset)
    }

    /// Create an empty named graph
    pub fn with_name(name: impl Into<String>, opset: i64) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            free_slots: Vec::new(),
            name_index: NameIndex::default(),
            producer_map: ProducerMap::default(),
            consumer_map: ConsumerMap::default(),
            tensor_info: TensorInfoMap::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            opset,
            extra_opsets: Vec::new(),
            targets: Vec::new(),
            name_counter: 0,
        }
    }

    /// Create an empty graph sharing this graph's opset and targets
    pub fn subgraph(&self, name: impl Into<String>) -> Self {
        let mut sub = Self::with_name(name, self.opset);
        sub.extra_opsets = self.extra_opsets.clone();
        sub.targets = self.targets.clone();
        sub
    }

    /// Graph name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the graph
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    // ========================================================================
    // Opsets and targets
    // ========================================================================

    /// Requested opset of the default domain
    pub fn opset(&self) -> i64 {
        self.opset
    }

    /// Extra domain imports
    pub fn extra_opsets(&self) -> &[OpsetId] {
        &self.extra_opsets
    }

    /// Register a domain import, keeping the highest version per domain
    pub fn add_extra_opset(&mut self, opset: OpsetId) {
        match self.extra_opsets.iter_mut().find(|o| o.domain == opset.domain) {
            Some(existing) => existing.version = existing.version.max(opset.version),
            None => self.extra_opsets.push(opset),
        }
    }

    /// Set runtime capability targets
    pub fn set_targets(&mut self, targets: Vec<Target>) {
        self.targets = targets;
    }

    /// Check whether a runtime quirk applies
    pub fn is_target(&self, target: Target) -> bool {
        self.targets.contains(&target)
    }

    // ========================================================================
    // Designated inputs and outputs
    // ========================================================================

    /// Designated input tensor ids
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Designated output tensor ids
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Replace the designated inputs
    pub fn set_inputs(&mut self, inputs: Vec<String>) {
        self.inputs = inputs;
    }

    /// Replace the designated outputs
    pub fn set_outputs(&mut self, outputs: Vec<String>) {
        self.outputs = outputs;
    }

    /// Append a designated input if missing
    pub fn add_input(&mut self, tensor: impl Into<String>) {
        let tensor = tensor.into();
        if !self.inputs.contains(&tensor) {
            self.inputs.push(tensor);
        }
    }

    /// Remove a designated input
    pub fn remove_input(&mut self, tensor: &str) -> bool {
        let before = self.inputs.len();
        self.inputs.retain(|t| t != tensor);
        before != self.inputs.len()
    }

    /// Check if a tensor is a designated input
    pub fn is_graph_input(&self, tensor: &str) -> bool {
        self.inputs.iter().any(|t| t == tensor)
    }

    /// Check if a tensor is a designated output
    pub fn is_graph_output(&self, tensor: &str) -> bool {
        self.outputs.iter().any(|t| t == tensor)
    }

    /// Point a designated output at another tensor
    pub fn replace_graph_output(&mut self, old: &str, new: &str) {
        for out in self.outputs.iter_mut().filter(|t| t.as_str() == old) {
            *out = new.to_string();
        }
    }

    // ========================================================================
    // Node accessors
    // ========================================================================

    /// Get a node by id
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    /// Get a mutable node by id
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Look up a node id by name
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.name_index.get(name).copied()
    }

    /// Get a node by name
    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.node_id(name).and_then(|id| self.node(id))
    }

    /// Check if a node exists
    pub fn has_node(&self, name: &str) -> bool {
        self.name_index.contains_key(name)
    }

    /// Get the number of live nodes
    pub fn node_count(&self) -> usize {
        self.name_index.len()
    }

    /// Live node ids in slot order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    /// Iterate live nodes in slot order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|n| (NodeId(i), n)))
    }

    /// Ids of live nodes with the given op kind, in slot order
    pub fn find_nodes_by_op(&self, op_type: &str) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.op_type() == op_type)
            .map(|(id, _)| id)
            .collect()
    }

    // ========================================================================
    // Tensor info
    // ========================================================================

    /// Stored facts for a tensor, without inference
    pub fn tensor_info(&self, tensor: &str) -> Option<&TensorInfo> {
        self.tensor_info.get(tensor)
    }

    /// Check if anything produces or declares this tensor
    pub fn has_tensor(&self, tensor: &str) -> bool {
        self.producer_map.contains_key(tensor)
            || self.is_graph_input(tensor)
            || self.tensor_info.contains_key(tensor)
    }
}
