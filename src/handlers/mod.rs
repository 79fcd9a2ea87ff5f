//! Operation handlers
//!
//! A handler turns one source-form node into its target-form equivalent.
//! It may rewrite the node in place, replace it, or emit an expansion of
//! several nodes. Handlers are plain functions registered per op kind with
//! the opset version they first apply to:
//!
//! | Module | Op families |
//! |--------|-------------|
//! | [`io_ops`] | constants, placeholders, identity-like |
//! | [`math`] | elementwise unary/binary, matmul, bias |
//! | [`logical`] | comparisons, boolean ops |
//! | [`nn`] | softmax, convolution, pooling |
//! | [`array`] | reshape, transpose, concat, squeeze, cast, shape, fill, gather |
//! | [`reduce`] | reductions |
//! | [`control_flow`] | loops |
//! | [`ml`] | hash-table lookups |
//! | [`quantize`] | quantize / dequantize |
//!
//! See [`registry::HandlerRegistry`] for version dispatch and
//! [`custom::CustomOps`] for the caller-supplied fallback.

pub mod array;
pub mod control_flow;
pub mod custom;
pub mod io_ops;
pub mod logical;
pub mod math;
pub mod ml;
pub mod nn;
pub mod quantize;
pub mod reduce;
pub mod registry;

pub use custom::{CustomHandler, CustomOp, CustomOps};
pub use registry::HandlerRegistry;

use crate::convert::InitializedTables;
use crate::error::{ConvertError, ConvertResult};
use crate::graph::{Graph, NewNode, Node, NodeId};
use crate::proto::tensor_proto::DataType;
use crate::tensor::TensorValue;

/// Everything a handler may touch
pub struct HandlerContext<'a> {
    /// Graph being converted
    pub graph: &'a mut Graph,
    /// Initialized tables for lookup folding
    pub tables: &'a InitializedTables,
    /// Requested opset of the default domain
    pub opset: i64,
}

/// Signature shared by all registered handlers
pub type HandlerFn = fn(&mut HandlerContext<'_>, NodeId) -> ConvertResult<()>;

impl HandlerContext<'_> {
    /// Borrow the node being converted
    pub fn node(&self, id: NodeId) -> ConvertResult<&Node> {
        self.graph
            .node(id)
            .ok_or_else(|| ConvertError::InvalidNode(format!("no node in slot {}", id.index())))
    }

    /// Owned copy of the node, for handlers that restructure around it
    pub fn snapshot(&self, id: NodeId) -> ConvertResult<Node> {
        self.node(id).cloned()
    }

    /// Mutable access to the node
    pub fn node_mut(&mut self, id: NodeId) -> ConvertResult<&mut Node> {
        self.graph
            .node_mut(id)
            .ok_or_else(|| ConvertError::InvalidNode(format!("no node in slot {}", id.index())))
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Rename a node to a target op kind and drop every attribute not listed
pub(crate) fn retarget(ctx: &mut HandlerContext<'_>, id: NodeId, op_type: &str, keep: &[&str]) -> ConvertResult<()> {
    let node = ctx.node_mut(id)?;
    node.set_op_type(op_type);
    node.retain_attrs(keep);
    Ok(())
}

/// Integer list held by a constant input
pub(crate) fn const_input_ints(graph: &Graph, node: &Node, idx: usize) -> ConvertResult<Vec<i64>> {
    let tensor = node.input(idx).unwrap_or_default();
    graph
        .const_value(tensor)
        .and_then(TensorValue::as_i64s)
        .ok_or_else(|| {
            ConvertError::unsupported(node.name(), format!("input {} must be an integer constant", idx))
        })
}

/// Source element type attribute, `T` by convention
pub(crate) fn source_dtype(graph: &Graph, node: &Node) -> Option<DataType> {
    node.get_type("T")
        .ok()
        .or_else(|| node.input(0).and_then(|t| graph.get_dtype(t)))
}

/// Insert `Transpose(tensor, perm)` and return its output
pub(crate) fn insert_transpose(
    graph: &mut Graph,
    tensor: &str,
    perm: &[i64],
    prefix: &str,
) -> ConvertResult<String> {
    let name = graph.unique_name(&format!("{}/transpose", prefix));
    let id = graph.add_node(
        NewNode::new("Transpose")
            .name(name)
            .input(tensor)
            .attr("perm", perm.to_vec()),
    )?;
    Ok(graph.output_of(id, 0))
}

/// Insert `Cast(tensor, to)` and return its output
pub(crate) fn insert_cast(graph: &mut Graph, tensor: &str, to: DataType, prefix: &str) -> ConvertResult<String> {
    let name = graph.unique_name(&format!("{}/cast", prefix));
    let id = graph.add_node(
        NewNode::new("Cast")
            .name(name)
            .input(tensor)
            .attr("to", to)
            .dtypes(vec![to]),
    )?;
    Ok(graph.output_of(id, 0))
}

/// Constant int64 vector named after a node
pub(crate) fn int64_const(graph: &mut Graph, prefix: &str, values: Vec<i64>) -> ConvertResult<String> {
    let name = graph.unique_name(prefix);
    graph.make_const_tensor(&name, TensorValue::vec_i64(values))
}

/// Permutation from NHWC to NCHW
pub(crate) const NHWC_TO_NCHW: [i64; 4] = [0, 3, 1, 2];

/// Permutation from NCHW to NHWC
pub(crate) const NCHW_TO_NHWC: [i64; 4] = [0, 2, 3, 1];

/// Permutation from HWIO to OIHW
pub(crate) const HWIO_TO_OIHW: [i64; 4] = [3, 2, 0, 1];
