//! Graph mutation operations
//!
//! Methods for modifying the graph structure: adding, removing, replacing and
//! rewiring nodes. Every mutation keeps the name index and the producer and
//! consumer maps coherent.

use rustc_hash::FxHashMap;

use crate::error::{ConvertError, ConvertResult};
use crate::proto::tensor_proto::DataType;
use crate::tensor::{Shape, TensorValue};

use super::context::Graph;
use super::maps::{NodeId, TensorInfo};
use super::node::{NewNode, Node};
use super::AttrValue;

impl Graph {
    // ========================================================================
    // Node insertion and removal
    // ========================================================================

    /// Insert a new node into the graph
    ///
    /// Fails if the name is taken or an output tensor already has a producer.
    pub fn add_node(&mut self, new: NewNode) -> ConvertResult<NodeId> {
        let name = match new.name {
            Some(name) => name,
            None => self.unique_name(&new.op_type),
        };
        if self.name_index.contains_key(&name) {
            return Err(ConvertError::InvalidGraph(format!(
                "Duplicate node name {}",
                name
            )));
        }

        let outputs = match new.outputs {
            Some(outputs) => outputs,
            None => (0..new.num_outputs)
                .map(|i| format!("{}:{}", name, i))
                .collect(),
        };
        if let Some(taken) = outputs.iter().find(|o| self.producer_map.contains_key(*o)) {
            return Err(ConvertError::InvalidGraph(format!(
                "Tensor {} already has a producer",
                taken
            )));
        }

        for (i, output) in outputs.iter().enumerate() {
            let shape = new.shapes.get(i).cloned();
            let dtype = new.dtypes.get(i).copied();
            if shape.is_some() || dtype.is_some() {
                let info = self.tensor_info.entry(output.clone()).or_default();
                if !info.overridden {
                    if let Some(shape) = shape {
                        info.shape = shape;
                    }
                }
                if dtype.is_some() {
                    info.dtype = dtype;
                }
            }
        }

        let node = Node {
            name,
            op_type: new.op_type,
            domain: new.domain,
            inputs: new.inputs,
            outputs,
            attrs: new.attrs,
            converted: new.converted,
        };
        Ok(self.attach(node))
    }

    /// Remove a node from the graph
    ///
    /// # Panics
    ///
    /// Panics if the node does not exist, or if any of its outputs still has
    /// consumers or is a designated graph output. Rewire first.
    pub fn remove_node(&mut self, id: NodeId) -> Node {
        let node = self
            .node(id)
            .unwrap_or_else(|| panic!("remove_node: no node in slot {}", id.0));
        for output in node.outputs() {
            let readers: Vec<NodeId> = self
                .find_output_consumers(output)
                .into_iter()
                .filter(|c| *c != id)
                .collect();
            assert!(
                readers.is_empty(),
                "remove_node: output {} of {} still has consumers",
                output,
                node.name()
            );
            assert!(
                !self.is_graph_output(output),
                "remove_node: output {} of {} is a graph output",
                output,
                node.name()
            );
        }
        self.detach(id)
    }

    /// Remove a node only if none of its outputs is read
    pub fn remove_if_unused(&mut self, id: NodeId) -> Option<Node> {
        let unused = self
            .node(id)?
            .outputs()
            .iter()
            .all(|o| !self.is_used(o));
        unused.then(|| self.detach(id))
    }

    /// Remove the producer of `tensor` if nothing reads any of its outputs
    pub fn prune_producer(&mut self, tensor: &str) -> Option<Node> {
        let id = self.producer(tensor)?;
        self.remove_if_unused(id)
    }

    /// Swap a node for a replacement
    ///
    /// Consumers keep reading the same tensor ids, so linkage is preserved
    /// for every output the replacement also produces. Outputs the
    /// replacement drops must be unused. An unnamed replacement inherits the
    /// old name; unset outputs inherit the old outputs.
    pub fn replace_node(&mut self, id: NodeId, mut new: NewNode) -> ConvertResult<NodeId> {
        let old = self
            .node(id)
            .ok_or_else(|| ConvertError::InvalidNode(format!("no node in slot {}", id.0)))?;

        let new_outputs = new.outputs.clone().unwrap_or_else(|| old.outputs.clone());
        for output in old.outputs() {
            if !new_outputs.contains(output) && self.is_used(output) {
                return Err(ConvertError::InvalidGraph(format!(
                    "Replacement for {} drops used output {}",
                    old.name(),
                    output
                )));
            }
        }
        if new.name.is_none() {
            new.name = Some(old.name.clone());
        }
        new.outputs = Some(new_outputs);

        let old = self.detach(id);
        match self.add_node(new) {
            Ok(new_id) => Ok(new_id),
            Err(e) => {
                self.attach(old);
                Err(e)
            }
        }
    }

    /// Link a node into the arena and the maps
    fn attach(&mut self, node: Node) -> NodeId {
        let id = match self.free_slots.pop() {
            Some(slot) => NodeId(slot),
            None => {
                self.nodes.push(None);
                NodeId(self.nodes.len() - 1)
            }
        };

        for output in node.outputs.iter().filter(|o| !o.is_empty()) {
            self.producer_map.insert(output.clone(), id);
        }
        for input in node.inputs.iter().filter(|i| !i.is_empty()) {
            self.consumer_map.entry(input.clone()).or_default().push(id);
        }
        self.name_index.insert(node.name.clone(), id);
        self.nodes[id.0] = Some(node);
        id
    }

    /// Unlink a node without any consumer checks
    fn detach(&mut self, id: NodeId) -> Node {
        let node = self.nodes[id.0]
            .take()
            .unwrap_or_else(|| panic!("detach: no node in slot {}", id.0));

        for output in &node.outputs {
            if self.producer_map.get(output) == Some(&id) {
                self.producer_map.remove(output);
            }
        }
        for input in node.inputs.iter().filter(|i| !i.is_empty()) {
            self.unlink_consumer(input, id);
        }
        self.name_index.remove(&node.name);

        // keep the smallest slot at the end so reuse is deterministic
        self.free_slots.push(id.0);
        self.free_slots.sort_unstable_by(|a, b| b.cmp(a));
        node
    }

    fn unlink_consumer(&mut self, tensor: &str, id: NodeId) {
        if let Some(consumers) = self.consumer_map.get_mut(tensor) {
            if let Some(pos) = consumers.iter().position(|c| *c == id) {
                consumers.remove(pos);
            }
            if consumers.is_empty() {
                self.consumer_map.remove(tensor);
            }
        }
    }

    // ========================================================================
    // Rewiring
    // ========================================================================

    /// Make every consumer of `old` read `new` instead
    ///
    /// Designated outputs are not touched. Returns the number of rewired
    /// input slots.
    pub fn replace_all_inputs(&mut self, old: &str, new: &str) -> usize {
        if old == new {
            return 0;
        }
        let mut count = 0;
        for id in self.find_output_consumers(old) {
            count += self.replace_input(id, old, new);
        }
        count
    }

    /// Replace every occurrence of `old` among one node's inputs
    pub fn replace_input(&mut self, id: NodeId, old: &str, new: &str) -> usize {
        let positions: Vec<usize> = match self.node(id) {
            Some(node) => node
                .inputs
                .iter()
                .enumerate()
                .filter(|(_, t)| t.as_str() == old)
                .map(|(i, _)| i)
                .collect(),
            None => return 0,
        };
        for &idx in &positions {
            self.set_node_input(id, idx, new);
        }
        positions.len()
    }

    /// Set one input of a node
    ///
    /// # Panics
    ///
    /// Panics if the node or the input position does not exist.
    pub fn set_node_input(&mut self, id: NodeId, idx: usize, tensor: impl Into<String>) {
        let tensor = tensor.into();
        let old = {
            let node = self.nodes[id.0]
                .as_mut()
                .unwrap_or_else(|| panic!("set_node_input: no node in slot {}", id.0));
            std::mem::replace(&mut node.inputs[idx], tensor.clone())
        };
        if !old.is_empty() {
            self.unlink_consumer(&old, id);
        }
        if !tensor.is_empty() {
            self.consumer_map.entry(tensor).or_default().push(id);
        }
    }

    /// Replace the whole input list of a node
    pub fn set_node_inputs(&mut self, id: NodeId, inputs: Vec<String>) {
        let old = {
            let node = self.nodes[id.0]
                .as_mut()
                .unwrap_or_else(|| panic!("set_node_inputs: no node in slot {}", id.0));
            std::mem::replace(&mut node.inputs, inputs.clone())
        };
        for input in old.iter().filter(|i| !i.is_empty()) {
            self.unlink_consumer(input, id);
        }
        for input in inputs.into_iter().filter(|i| !i.is_empty()) {
            self.consumer_map.entry(input).or_default().push(id);
        }
    }

    /// Exchange two inputs of a node
    pub fn swap_inputs(&mut self, id: NodeId, a: usize, b: usize) {
        if let Some(node) = self.node_mut(id) {
            // consumer entries are per node, so a swap leaves the maps valid
            node.inputs.swap(a, b);
        }
    }

    /// Rename one output of a node, carrying its tensor info along
    fn rename_output(&mut self, id: NodeId, idx: usize, new: &str) {
        let old = {
            let node = self.nodes[id.0]
                .as_mut()
                .unwrap_or_else(|| panic!("rename_output: no node in slot {}", id.0));
            std::mem::replace(&mut node.outputs[idx], new.to_string())
        };
        self.producer_map.remove(&old);
        self.producer_map.insert(new.to_string(), id);
        if let Some(info) = self.tensor_info.remove(&old) {
            let merged = match self.tensor_info.remove(new) {
                Some(existing) if existing.overridden => existing,
                Some(existing) => TensorInfo {
                    shape: existing.shape.merge(&info.shape).unwrap_or(existing.shape),
                    dtype: existing.dtype.or(info.dtype),
                    overridden: false,
                },
                None => info,
            };
            self.tensor_info.insert(new.to_string(), merged);
        }
    }

    /// Remove a pass-through node, connecting its readers to one of its inputs
    ///
    /// When output 0 is a graph output, the upstream producer's output is
    /// renamed instead, provided the upstream tensor has no other reader and
    /// is not a graph input. Returns `false` (graph untouched) when neither
    /// is possible.
    pub fn bypass_node(&mut self, id: NodeId, input_idx: usize) -> bool {
        let (src, out, extra_outputs_used) = match self.node(id) {
            Some(node) => match (node.input(input_idx), node.output(0)) {
                (Some(src), Some(out)) if !src.is_empty() => (
                    src.to_string(),
                    out.to_string(),
                    node.outputs()[1..].iter().any(|o| self.is_used(o)),
                ),
                _ => return false,
            },
            None => return false,
        };
        if extra_outputs_used {
            return false;
        }

        if !self.is_graph_output(&out) {
            self.replace_all_inputs(&out, &src);
            self.detach(id);
            return true;
        }

        let upstream = match self.producer(&src) {
            Some(p) if p != id => p,
            _ => return false,
        };
        let other_readers = self
            .find_output_consumers(&src)
            .into_iter()
            .any(|c| c != id);
        if other_readers || self.is_graph_input(&src) || self.is_graph_output(&src) {
            return false;
        }

        let Some(out_idx) = self
            .node(upstream)
            .and_then(|n| n.outputs().iter().position(|o| *o == src))
        else {
            return false;
        };
        self.detach(id);
        self.rename_output(upstream, out_idx, &out);
        true
    }

    // ========================================================================
    // Constants and naming
    // ========================================================================

    /// Generate a node/tensor name not used anywhere in this graph
    pub fn unique_name(&mut self, prefix: &str) -> String {
        loop {
            self.name_counter += 1;
            let candidate = format!("{}__{}", prefix, self.name_counter);
            if !self.name_index.contains_key(&candidate)
                && !self.producer_map.contains_key(&candidate)
                && !self.is_graph_input(&candidate)
            {
                return candidate;
            }
        }
    }

    /// Add a `Const` node whose single output tensor id equals its name
    ///
    /// A taken name is made unique first.
    pub fn make_const(&mut self, name: &str, value: TensorValue) -> ConvertResult<NodeId> {
        let name = if self.name_index.contains_key(name) || self.producer_map.contains_key(name) {
            self.unique_name(name)
        } else {
            name.to_string()
        };
        let shape = Shape::known(value.dims().to_vec());
        let dtype = value.dtype();
        self.add_node(
            NewNode::new("Const")
                .name(name.clone())
                .outputs([name])
                .attr("value", value)
                .shapes(vec![shape])
                .dtypes(vec![dtype]),
        )
    }

    /// Add a `Const` node and return its output tensor id
    pub fn make_const_tensor(&mut self, name: &str, value: TensorValue) -> ConvertResult<String> {
        let id = self.make_const(name, value)?;
        Ok(self.output_of(id, 0))
    }

    /// Output tensor id of a node, empty if absent
    pub fn output_of(&self, id: NodeId, idx: usize) -> String {
        self.node(id)
            .and_then(|n| n.output(idx))
            .unwrap_or_default()
            .to_string()
    }

    // ========================================================================
    // Tensor info mutation
    // ========================================================================

    /// Set the shape of a tensor explicitly
    pub fn set_shape(&mut self, tensor: &str, shape: Shape) {
        self.tensor_info.entry(tensor.to_string()).or_default().shape = shape;
    }

    /// Force a shape that inference may refine but never contradict
    pub fn override_shape(&mut self, tensor: &str, shape: Shape) {
        let info = self.tensor_info.entry(tensor.to_string()).or_default();
        info.shape = shape;
        info.overridden = true;
    }

    /// Set the element type of a tensor
    pub fn set_dtype(&mut self, tensor: &str, dtype: DataType) {
        self.tensor_info.entry(tensor.to_string()).or_default().dtype = Some(dtype);
    }

    /// Mutable info entry for a tensor, created empty if absent
    pub(crate) fn tensor_info_mut(&mut self, tensor: &str) -> &mut TensorInfo {
        self.tensor_info.entry(tensor.to_string()).or_default()
    }

    /// Copy shape and dtype facts from one tensor to another
    pub fn copy_tensor_info(&mut self, from: &str, to: &str) {
        let shape = self.get_shape(from);
        let dtype = self.get_dtype(from);
        let info = self.tensor_info.entry(to.to_string()).or_default();
        if !info.overridden {
            info.shape = shape;
        }
        if dtype.is_some() {
            info.dtype = dtype;
        }
    }

    // ========================================================================
    // Nested graphs
    // ========================================================================

    /// Move a nested graph out of a node attribute
    pub fn take_subgraph(&mut self, id: NodeId, attr: &str) -> Option<Graph> {
        let node = self.node_mut(id)?;
        match node.attrs.shift_remove(attr)? {
            AttrValue::Graph(g) => Some(*g),
            other => {
                node.attrs.insert(attr.to_string(), other);
                None
            }
        }
    }

    /// Put a nested graph into a node attribute
    pub fn set_subgraph(&mut self, id: NodeId, attr: &str, graph: Graph) {
        if let Some(node) = self.node_mut(id) {
            node.set_attr(attr, graph);
        }
    }

    /// Copy every node of `sub` into this graph
    ///
    /// `bindings` maps the nested graph's inputs to tensors of this graph.
    /// Copied nodes and their outputs get fresh names starting with
    /// `prefix`. Returns the mapping from nested tensor ids to the ids in
    /// this graph, covering the nested graph's outputs.
    pub fn inline_graph(
        &mut self,
        sub: &Graph,
        bindings: &FxHashMap<String, String>,
        prefix: &str,
    ) -> ConvertResult<FxHashMap<String, String>> {
        let mut mapping: FxHashMap<String, String> = bindings.clone();

        for id in sub.topological_order()? {
            let Some(node) = sub.node(id) else { continue };
            // inputs of the nested graph are bound, not copied
            if node.op_type() == "Placeholder"
                && node.outputs().iter().all(|o| mapping.contains_key(o))
            {
                continue;
            }

            let inputs: Vec<String> = node
                .inputs()
                .iter()
                .map(|t| {
                    if t.is_empty() {
                        Ok(String::new())
                    } else {
                        mapping.get(t).cloned().ok_or_else(|| {
                            ConvertError::InvalidGraph(format!(
                                "Nested graph {} reads unbound tensor {}",
                                sub.name(),
                                t
                            ))
                        })
                    }
                })
                .collect::<ConvertResult<_>>()?;

            let name = self.unique_name(&format!("{}/{}", prefix, node.name()));
            let outputs: Vec<String> = (0..node.outputs().len())
                .map(|i| format!("{}:{}", name, i))
                .collect();
            for (old, new) in node.outputs().iter().zip(&outputs) {
                mapping.insert(old.clone(), new.clone());
                if let Some(info) = sub.tensor_info(old) {
                    let mut info = info.clone();
                    info.overridden = false;
                    self.tensor_info.insert(new.clone(), info);
                }
            }

            self.attach(Node {
                name,
                op_type: node.op_type.clone(),
                domain: node.domain.clone(),
                inputs,
                outputs,
                attrs: node.attrs.clone(),
                converted: node.converted,
            });
        }

        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_graph() -> Graph {
        let mut graph = Graph::new(13);
        graph.add_input("x");
        graph
            .add_node(NewNode::new("Identity").name("id").input("x"))
            .unwrap();
        graph
            .add_node(NewNode::new("Relu").name("relu").input("id:0"))
            .unwrap();
        graph.set_outputs(vec!["relu:0".to_string()]);
        graph
    }

    #[test]
    fn test_add_node_generates_outputs() {
        let mut graph = Graph::new(13);
        let id = graph
            .add_node(NewNode::new("Split").name("split").input("x").num_outputs(2))
            .unwrap();
        assert_eq!(
            graph.node(id).unwrap().outputs(),
            &["split:0".to_string(), "split:1".to_string()]
        );
    }

    #[test]
    fn test_add_node_rejects_duplicates() {
        let mut graph = make_test_graph();
        assert!(graph.add_node(NewNode::new("Neg").name("relu")).is_err());
        assert!(graph
            .add_node(NewNode::new("Neg").outputs(["relu:0"]))
            .is_err());
    }

    #[test]
    #[should_panic(expected = "still has consumers")]
    fn test_remove_node_with_consumers_panics() {
        let mut graph = make_test_graph();
        let id = graph.node_id("id").unwrap();
        graph.remove_node(id);
    }

    #[test]
    #[should_panic(expected = "graph output")]
    fn test_remove_graph_output_producer_panics() {
        let mut graph = make_test_graph();
        let id = graph.node_id("relu").unwrap();
        graph.remove_node(id);
    }

    #[test]
    fn test_replace_all_inputs() {
        let mut graph = make_test_graph();
        let relu = graph.node_id("relu").unwrap();
        let n = graph.replace_all_inputs("id:0", "x");
        assert_eq!(n, 1);
        assert_eq!(graph.node(relu).unwrap().input(0), Some("x"));
        assert!(graph.find_output_consumers("id:0").is_empty());
        assert!(graph.find_output_consumers("x").contains(&relu));

        let id = graph.node_id("id").unwrap();
        graph.remove_node(id);
        assert!(!graph.has_node("id"));
    }

    #[test]
    fn test_replace_node_keeps_consumers() {
        let mut graph = make_test_graph();
        let id = graph.node_id("id").unwrap();
        let new_id = graph
            .replace_node(id, NewNode::new("Neg").input("x"))
            .unwrap();
        let node = graph.node(new_id).unwrap();
        assert_eq!(node.name(), "id");
        assert_eq!(node.op_type(), "Neg");
        assert_eq!(graph.producer("id:0"), Some(new_id));
        assert_eq!(
            graph.find_output_consumers("id:0"),
            vec![graph.node_id("relu").unwrap()]
        );
    }

    #[test]
    fn test_replace_node_refuses_to_drop_used_output() {
        let mut graph = make_test_graph();
        let id = graph.node_id("id").unwrap();
        let result = graph.replace_node(id, NewNode::new("Neg").input("x").outputs(["other"]));
        assert!(result.is_err());
        // old node still attached
        assert_eq!(graph.producer("id:0"), graph.node_id("id"));
    }

    #[test]
    fn test_bypass_node() {
        let mut graph = make_test_graph();
        let id = graph.node_id("id").unwrap();
        assert!(graph.bypass_node(id, 0));
        assert_eq!(graph.node_by_name("relu").unwrap().input(0), Some("x"));
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_bypass_graph_output_renames_upstream() {
        let mut graph = Graph::new(13);
        graph.add_input("x");
        graph
            .add_node(NewNode::new("Relu").name("relu").input("x"))
            .unwrap();
        let id = graph
            .add_node(NewNode::new("Identity").name("out").input("relu:0"))
            .unwrap();
        graph.set_outputs(vec!["out:0".to_string()]);

        assert!(graph.bypass_node(id, 0));
        let relu = graph.node_id("relu").unwrap();
        assert_eq!(graph.producer("out:0"), Some(relu));
        assert!(graph.producer("relu:0").is_none());
    }

    #[test]
    fn test_bypass_keeps_input_to_output_identity() {
        let mut graph = Graph::new(13);
        graph.add_input("x");
        let id = graph
            .add_node(NewNode::new("Identity").name("out").input("x"))
            .unwrap();
        graph.set_outputs(vec!["out:0".to_string()]);
        assert!(!graph.bypass_node(id, 0));
        assert!(graph.has_node("out"));
    }

    #[test]
    fn test_swap_and_set_inputs() {
        let mut graph = Graph::new(13);
        let id = graph
            .add_node(NewNode::new("Sub").inputs(["a", "b"]))
            .unwrap();
        graph.swap_inputs(id, 0, 1);
        assert_eq!(graph.node(id).unwrap().inputs(), &["b".to_string(), "a".to_string()]);

        graph.set_node_inputs(id, vec!["c".to_string()]);
        assert!(graph.find_output_consumers("a").is_empty());
        assert_eq!(graph.find_output_consumers("c"), vec![id]);
    }

    #[test]
    fn test_unique_name_deterministic() {
        let mut a = Graph::new(13);
        let mut b = Graph::new(13);
        assert_eq!(a.unique_name("Add"), b.unique_name("Add"));
        assert_ne!(a.unique_name("Add"), a.unique_name("Add"));
    }

    #[test]
    fn test_make_const_name_collision() {
        let mut graph = Graph::new(13);
        let first = graph.make_const_tensor("c", TensorValue::scalar_i64(1)).unwrap();
        let second = graph.make_const_tensor("c", TensorValue::scalar_i64(2)).unwrap();
        assert_eq!(first, "c");
        assert_ne!(second, "c");
        assert_eq!(graph.get_dtype(&second), Some(DataType::Int64));
    }

    #[test]
    fn test_slot_reuse() {
        let mut graph = Graph::new(13);
        let a = graph.add_node(NewNode::new("Relu").input("x")).unwrap();
        graph.remove_node(a);
        let b = graph.add_node(NewNode::new("Neg").input("x")).unwrap();
        assert_eq!(a, b);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_inline_graph() {
        let mut sub = Graph::new(13);
        sub.add_input("s_in");
        sub.add_node(NewNode::new("Neg").name("neg").input("s_in"))
            .unwrap();
        sub.set_outputs(vec!["neg:0".to_string()]);

        let mut graph = Graph::new(13);
        graph.add_input("x");
        let mut bindings = FxHashMap::default();
        bindings.insert("s_in".to_string(), "x".to_string());
        let mapping = graph.inline_graph(&sub, &bindings, "cond").unwrap();

        let out = mapping.get("neg:0").unwrap();
        let producer = graph.producer_node(out).unwrap();
        assert_eq!(producer.op_type(), "Neg");
        assert_eq!(producer.input(0), Some("x"));
        assert!(producer.name().starts_with("cond/neg"));
    }

    #[test]
    fn test_inline_graph_unbound_input() {
        let mut sub = Graph::new(13);
        sub.add_node(NewNode::new("Neg").name("neg").input("free"))
            .unwrap();
        let mut graph = Graph::new(13);
        assert!(graph
            .inline_graph(&sub, &FxHashMap::default(), "p")
            .is_err());
    }
}
