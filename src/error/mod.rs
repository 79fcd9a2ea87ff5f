//! Error types for frozen2onnx
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// A node left in its source form after dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconvertedNode {
    /// Node name
    pub name: String,
    /// Source op kind
    pub op_type: String,
    /// Why the node could not be converted
    pub reason: String,
}

impl std::fmt::Display for UnconvertedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.op_type, self.reason)
    }
}

/// Main error type for graph conversion
#[derive(Error, Debug)]
pub enum ConvertError {
    /// A rewriting pass found a matched subgraph that violates a precondition
    #[error("Precondition violated at node {node}: {reason}")]
    Precondition {
        /// Offending node
        node: String,
        /// Human-readable reason
        reason: String,
    },

    /// No handler for the op kind at the requested opset
    #[error("Unsupported op {op_type} at node {node} for opset {opset}")]
    UnsupportedOp {
        /// Node name
        node: String,
        /// Source op kind
        op_type: String,
        /// Requested opset
        opset: i64,
    },

    /// A handler exists but cannot express this node's configuration
    #[error("Unsupported configuration at node {node}: {reason}")]
    Unsupported {
        /// Node name
        node: String,
        /// Human-readable reason
        reason: String,
    },

    /// Referenced initialized table is not in the side data
    #[error("Initialized table {table} for node {node} not found")]
    MissingTable {
        /// Node name
        node: String,
        /// Table shared name
        table: String,
    },

    /// Inferred shape contradicts an explicit override
    #[error("Shape conflict for tensor {tensor}: inferred {inferred}, declared {declared}")]
    ShapeConflict {
        /// Tensor id
        tensor: String,
        /// Inferred shape
        inferred: String,
        /// Declared shape
        declared: String,
    },

    /// Conversion finished with unconverted nodes and unproduced outputs
    #[error("Conversion incomplete: {}", describe_incomplete(.unconverted, .missing_outputs))]
    Incomplete {
        /// Every node that could not be converted
        unconverted: Vec<UnconvertedNode>,
        /// Designated outputs with no producer
        missing_outputs: Vec<String>,
    },

    /// The node dependency graph is not acyclic
    #[error("Graph contains a cycle through node {0}")]
    Cycle(String),

    /// Invalid node configuration
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    /// Invalid graph structure
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// Attribute missing
    #[error("Node {node} is missing attribute {attr}")]
    MissingAttribute {
        /// Node name
        node: String,
        /// Attribute name
        attr: String,
    },

    /// Attribute present with the wrong kind
    #[error("Node {node} attribute {attr}: expected {expected}, found {found}")]
    InvalidAttribute {
        /// Node name
        node: String,
        /// Attribute name
        attr: String,
        /// Expected kind
        expected: &'static str,
        /// Found kind
        found: &'static str,
    },

    /// Unsupported opset version
    #[error("Unsupported opset version: {version}, expected {min}..={max}")]
    UnsupportedOpset {
        /// Actual version
        version: i64,
        /// Minimum supported
        min: i64,
        /// Maximum supported
        max: i64,
    },

    /// Invalid tensor data type
    #[error("Invalid data type: {0}")]
    InvalidDataType(String),

    /// Protobuf encode error
    #[error("Protobuf encode error: {0}")]
    ProtoEncode(#[from] prost::EncodeError),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Shorthand for a precondition failure
    pub fn precondition(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Precondition {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an unsupported configuration
    pub fn unsupported(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Whether the driver may record this error and keep going
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnsupportedOp { .. } | Self::Unsupported { .. })
    }
}

fn describe_incomplete(unconverted: &[UnconvertedNode], missing_outputs: &[String]) -> String {
    let nodes: Vec<String> = unconverted.iter().map(|n| n.to_string()).collect();
    format!(
        "{} unconverted node(s) [{}], missing output(s) {:?}",
        unconverted.len(),
        nodes.join("; "),
        missing_outputs
    )
}

/// Result type alias for conversion operations
pub type ConvertResult<T> = Result<T, ConvertError>;
