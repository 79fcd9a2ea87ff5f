//! # frozen2onnx
//!
//! Converts frozen dataflow graphs into ONNX models.
//!
//! The source graph is imported into a mutable [`graph::Graph`], rewritten
//! by whole-graph passes, converted node by node through a versioned
//! handler registry, optimized, and finally assembled into an in-memory
//! `ModelProto`.
//!
//! ## Features
//!
//! - **Versioned dispatch**: each source kind picks the handler for the
//!   newest version not above the requested opset
//! - **Nested graphs**: loop bodies and conditions convert recursively
//! - **Static lookups**: initialized hash tables fold into constants
//! - **Optimizer**: constant folding, transpose and identity cleanup, dead
//!   code elimination, repeated to a fixed point
//! - **Large models**: oversized constants move to external storage
//!
//! ## Example
//!
//! ```ignore
//! use frozen2onnx::prelude::*;
//!
//! let conversion = Converter::new(&frozen)
//!     .inputs(["x:0"])
//!     .outputs(["y:0"])
//!     .options(ConvertOptions::default().opset(13))
//!     .convert()?;
//! check_model(&conversion.model)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod builder;
pub mod convert;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod infer;
pub mod opset;
pub mod optimizer;
pub mod pattern;
pub mod proto;
pub mod rewriter;
pub mod tensor;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Prelude module - import commonly used types with `use frozen2onnx::prelude::*`
pub mod prelude {
    pub use crate::builder::{check_model, ExternalTensorStorage, ModelBuilder};
    pub use crate::convert::{
        convert, Conversion, ConversionReport, ConvertOptions, Converter, FrozenFunction, FrozenGraph,
        InitializedTables, SourceNode, TableEntry,
    };
    pub use crate::error::{ConvertError, ConvertResult, UnconvertedNode};
    pub use crate::graph::{AttrValue, Graph, NewNode, Node, NodeId, Target};
    pub use crate::handlers::{CustomOps, HandlerContext, HandlerRegistry};
    pub use crate::optimizer::{OptimizerPass, OptimizerPipeline};
    pub use crate::proto::tensor_proto::DataType;
    pub use crate::rewriter::Rewriter;
    pub use crate::tensor::{Shape, TensorValue};
}

// ============================================================================
// Crate-level re-exports
// ============================================================================

pub use convert::{convert, Conversion, ConvertOptions, Converter};
pub use error::{ConvertError, ConvertResult};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
