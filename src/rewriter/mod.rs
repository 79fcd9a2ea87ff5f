//! Pattern-based rewriting passes
//!
//! Rewriters recognize multi-node source idioms that have no per-node
//! translation and restructure them as a whole. They run in two phases:
//!
//! - **pre-conversion** on source-form nodes, before handler dispatch
//!   ([`LookupTableRewriter`], [`ScanOutputRewriter`])
//! - **post-conversion** on target-form nodes ([`QdqRewriter`])
//!
//! Passes are independent of each other. Callers may append their own
//! [`Rewriter`] boxes to either list through
//! [`ConvertOptions`](crate::convert::ConvertOptions).
//!
//! # Example
//!
//! ```ignore
//! use frozen2onnx::rewriter::{run_rewriters, RewriteContext, default_post_rewriters};
//!
//! let mut ctx = RewriteContext::new(&mut graph, &tables, 13);
//! let changed = run_rewriters(&default_post_rewriters(), &mut ctx)?;
//! ```

pub mod lookup;
pub mod qdq;
pub mod scan_output;

pub use lookup::LookupTableRewriter;
pub use qdq::QdqRewriter;
pub use scan_output::ScanOutputRewriter;

use std::fmt::Debug;

use log::debug;

use crate::convert::InitializedTables;
use crate::error::ConvertResult;
use crate::graph::Graph;

/// State handed to every rewriter
pub struct RewriteContext<'a> {
    /// Graph being rewritten
    pub graph: &'a mut Graph,
    /// Initialized tables for lookup folding
    pub tables: &'a InitializedTables,
    /// Requested opset of the default domain
    pub opset: i64,
    /// Strip quantization instead of preserving it
    pub dequantize: bool,
}

impl<'a> RewriteContext<'a> {
    /// Context with quantization preserved
    pub fn new(graph: &'a mut Graph, tables: &'a InitializedTables, opset: i64) -> Self {
        Self {
            graph,
            tables,
            opset,
            dequantize: false,
        }
    }

    /// Set the dequantize flag
    pub fn with_dequantize(mut self, dequantize: bool) -> Self {
        self.dequantize = dequantize;
        self
    }
}

/// A whole-graph rewriting pass
pub trait Rewriter: Debug {
    /// Name used in logs and reports
    fn name(&self) -> &'static str;

    /// Apply the pass once, returning whether the graph changed
    fn rewrite(&self, ctx: &mut RewriteContext<'_>) -> ConvertResult<bool>;
}

/// Passes run before handler dispatch when the caller keeps the defaults
pub fn default_pre_rewriters() -> Vec<Box<dyn Rewriter>> {
    vec![Box::new(LookupTableRewriter::new()), Box::new(ScanOutputRewriter::new())]
}

/// Passes run after handler dispatch when the caller keeps the defaults
pub fn default_post_rewriters() -> Vec<Box<dyn Rewriter>> {
    vec![Box::new(QdqRewriter::new())]
}

/// Run passes in order, returning the names of those that changed the graph
pub fn run_rewriters(
    rewriters: &[Box<dyn Rewriter>],
    ctx: &mut RewriteContext<'_>,
) -> ConvertResult<Vec<&'static str>> {
    let mut applied = Vec::new();
    for rewriter in rewriters {
        if rewriter.rewrite(ctx)? {
            debug!("rewriter {} changed graph {}", rewriter.name(), ctx.graph.name());
            applied.push(rewriter.name());
        }
    }
    Ok(applied)
}
