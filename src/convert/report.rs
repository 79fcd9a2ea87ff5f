//! Conversion statistics

use std::fmt;

use indexmap::IndexMap;

use crate::error::UnconvertedNode;
use crate::graph::Graph;
use crate::optimizer::OptimizeReport;

/// What happened during one conversion
#[derive(Debug, Clone, Default)]
pub struct ConversionReport {
    /// Nodes left in source form, in dispatch order
    pub unconverted: Vec<UnconvertedNode>,
    /// Nodes handled by a caller-supplied custom op
    pub custom_handled: Vec<String>,
    /// Rewriters that changed a graph, in run order
    pub rewriters_applied: Vec<&'static str>,
    /// Optimizer outcome, absent when optimization was off
    pub optimizer: Option<OptimizeReport>,
    /// Target op kind → node count in the finished graph
    pub op_counts: IndexMap<String, usize>,
    /// Node count right after import
    pub nodes_imported: usize,
}

impl ConversionReport {
    /// Whether every node reached target form
    pub fn is_complete(&self) -> bool {
        self.unconverted.is_empty()
    }

    /// Count node kinds of the finished graph, sorted by kind
    pub(crate) fn count_ops(&mut self, graph: &Graph) {
        let mut counts: IndexMap<String, usize> = IndexMap::new();
        for (_, node) in graph.nodes() {
            *counts.entry(node.op_type().to_string()).or_default() += 1;
        }
        counts.sort_keys();
        self.op_counts = counts;
    }

    /// Total nodes in the finished graph
    pub fn nodes_emitted(&self) -> usize {
        self.op_counts.values().sum()
    }
}

impl fmt::Display for ConversionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "nodes: {} imported, {} emitted",
            self.nodes_imported,
            self.nodes_emitted()
        )?;
        for (op, count) in &self.op_counts {
            writeln!(f, "  {}: {}", op, count)?;
        }
        if let Some(optimizer) = &self.optimizer {
            writeln!(
                f,
                "optimizer: {} iteration(s), {} removed, converged={}",
                optimizer.iterations,
                optimizer.nodes_removed(),
                optimizer.converged
            )?;
        }
        for node in &self.unconverted {
            writeln!(f, "unconverted: {}", node)?;
        }
        Ok(())
    }
}
