//! Static hash-table lookup folding
//!
//! Runs before dispatch so lookups are resolved while the table resource
//! and its identity chain are still in source form.

use crate::error::ConvertResult;
use crate::handlers::ml::{fold_lookup, fold_table_size};

use super::{RewriteContext, Rewriter};

/// Folds `LookupTableFindV2` and `LookupTableSizeV2` against initialized tables
#[derive(Debug, Default)]
pub struct LookupTableRewriter;

impl LookupTableRewriter {
    /// Create the rewriter
    pub fn new() -> Self {
        Self
    }
}

impl Rewriter for LookupTableRewriter {
    fn name(&self) -> &'static str {
        "LookupTableRewriter"
    }

    fn rewrite(&self, ctx: &mut RewriteContext<'_>) -> ConvertResult<bool> {
        let mut changed = false;
        for id in ctx.graph.find_nodes_by_op("LookupTableFindV2") {
            if ctx.graph.node(id).is_some_and(|n| !n.is_converted()) {
                fold_lookup(ctx.graph, ctx.tables, id)?;
                changed = true;
            }
        }
        for id in ctx.graph.find_nodes_by_op("LookupTableSizeV2") {
            if ctx.graph.node(id).is_some_and(|n| !n.is_converted()) {
                fold_table_size(ctx.graph, ctx.tables, id)?;
                changed = true;
            }
        }
        Ok(changed)
    }
}
