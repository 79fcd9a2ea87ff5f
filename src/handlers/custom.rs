//! Caller-supplied fallback handlers
//!
//! A custom op is consulted only when no built-in handler resolves for the
//! node's kind at the requested opset. It is keyed by kind alone, with no
//! version range. The node is tagged with the registered domain; an
//! optional function may rewrite it further.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::ConvertResult;
use crate::graph::NodeId;

use super::HandlerContext;

/// Rewrite applied to a node handled by a custom op
pub type CustomHandler = Arc<dyn Fn(&mut HandlerContext<'_>, NodeId) -> ConvertResult<()> + Send + Sync>;

/// One custom op registration
#[derive(Clone)]
pub struct CustomOp {
    /// Domain the node is tagged with
    pub domain: String,
    /// Optional rewrite; `None` passes the node through as-is
    pub handler: Option<CustomHandler>,
}

impl std::fmt::Debug for CustomOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomOp")
            .field("domain", &self.domain)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Custom ops keyed by source kind
#[derive(Debug, Clone, Default)]
pub struct CustomOps {
    ops: IndexMap<String, CustomOp>,
}

impl CustomOps {
    /// No custom ops
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass nodes of this kind through unchanged in `domain`
    pub fn passthrough(mut self, op_type: impl Into<String>, domain: impl Into<String>) -> Self {
        self.ops.insert(
            op_type.into(),
            CustomOp {
                domain: domain.into(),
                handler: None,
            },
        );
        self
    }

    /// Handle nodes of this kind with `handler` and tag them with `domain`
    pub fn with_handler<F>(mut self, op_type: impl Into<String>, domain: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut HandlerContext<'_>, NodeId) -> ConvertResult<()> + Send + Sync + 'static,
    {
        self.ops.insert(
            op_type.into(),
            CustomOp {
                domain: domain.into(),
                handler: Some(Arc::new(handler)),
            },
        );
        self
    }

    /// Registration for a kind
    pub fn get(&self, op_type: &str) -> Option<&CustomOp> {
        self.ops.get(op_type)
    }

    /// Distinct domains used by the registrations
    pub fn domains(&self) -> Vec<&str> {
        let mut domains: Vec<&str> = self.ops.values().map(|op| op.domain.as_str()).collect();
        domains.sort_unstable();
        domains.dedup();
        domains
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Apply a custom op to a node: run its handler, then tag the domain
pub(crate) fn apply(op: &CustomOp, ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    if let Some(handler) = &op.handler {
        handler(ctx, id)?;
    }
    if let Some(node) = ctx.graph.node_mut(id) {
        node.set_domain(op.domain.clone());
    }
    Ok(())
}
