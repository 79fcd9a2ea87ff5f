//! Fixed-point optimizer pipeline
//!
//! Target-form cleanups run after conversion:
//!
//! - [`ConstantFold`]: evaluate pure ops over constants
//! - [`BroadcastOptimizer`]: drop redundant `Expand` and unit dims
//! - [`TransposeOptimizer`]: merge, cancel and sink transposes
//! - [`IdentityOptimizer`]: remove `Identity`, no-op `Cast` and `Reshape`
//! - [`DeadCodeElimination`]: drop nodes that reach no designated output
//!
//! # Using OptimizerPipeline
//!
//! ```ignore
//! use frozen2onnx::optimizer::OptimizerPipeline;
//!
//! let report = OptimizerPipeline::default().run(&mut graph)?;
//! assert!(report.converged);
//! ```

pub mod broadcast;
pub mod const_fold;
pub mod dead_code;
pub mod identity;
pub mod transpose;

pub use broadcast::BroadcastOptimizer;
pub use const_fold::ConstantFold;
pub use dead_code::DeadCodeElimination;
pub use identity::IdentityOptimizer;
pub use transpose::TransposeOptimizer;

use std::fmt::Debug;

use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::error::ConvertResult;
use crate::graph::Graph;

/// Default iteration cap
pub const DEFAULT_MAX_ITERATIONS: usize = 16;

/// Statistics of one pass run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OptimizeResult {
    /// Nodes rewritten in place or replaced
    pub nodes_changed: usize,
    /// Nodes removed
    pub nodes_removed: usize,
    /// Names of touched nodes
    pub touched: Vec<String>,
}

impl OptimizeResult {
    /// Create empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rewrite
    pub fn record(&mut self, node_name: &str) {
        self.nodes_changed += 1;
        self.touched.push(node_name.to_string());
    }

    /// Record a removal
    pub fn record_removal(&mut self, node_name: &str) {
        self.nodes_removed += 1;
        self.touched.push(node_name.to_string());
    }

    /// Whether the pass changed anything
    pub fn changed(&self) -> bool {
        self.nodes_changed + self.nodes_removed > 0
    }

    /// Merge with another result
    pub fn merge(&mut self, other: OptimizeResult) {
        self.nodes_changed += other.nodes_changed;
        self.nodes_removed += other.nodes_removed;
        self.touched.extend(other.touched);
    }
}

/// Outcome of a pipeline run
#[derive(Debug, Default, Clone)]
pub struct OptimizeReport {
    /// Iterations executed
    pub iterations: usize,
    /// Whether the last iteration changed nothing
    pub converged: bool,
    /// Accumulated statistics per pass, in pipeline order
    pub passes: IndexMap<&'static str, OptimizeResult>,
}

impl OptimizeReport {
    /// Total nodes removed across all passes
    pub fn nodes_removed(&self) -> usize {
        self.passes.values().map(|r| r.nodes_removed).sum()
    }

    /// Total nodes rewritten across all passes
    pub fn nodes_changed(&self) -> usize {
        self.passes.values().map(|r| r.nodes_changed).sum()
    }
}

/// A single idempotent target-form cleanup
pub trait OptimizerPass: Debug {
    /// Name used in logs and reports
    fn name(&self) -> &'static str;

    /// Apply the pass once
    fn run(&self, graph: &mut Graph) -> ConvertResult<OptimizeResult>;
}

/// Passes repeated in order until nothing changes
#[derive(Debug)]
pub struct OptimizerPipeline {
    passes: Vec<Box<dyn OptimizerPass>>,
    max_iterations: usize,
}

impl Default for OptimizerPipeline {
    fn default() -> Self {
        Self {
            passes: vec![
                Box::new(ConstantFold::new()),
                Box::new(BroadcastOptimizer::new()),
                Box::new(TransposeOptimizer::new()),
                Box::new(IdentityOptimizer::new()),
                Box::new(DeadCodeElimination::new()),
            ],
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl OptimizerPipeline {
    /// Pipeline with the default passes
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with custom passes
    pub fn with_passes(passes: Vec<Box<dyn OptimizerPass>>) -> Self {
        Self {
            passes,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Set the iteration cap
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Names of the configured passes
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run the pipeline to a fixed point or the iteration cap
    pub fn run(&self, graph: &mut Graph) -> ConvertResult<OptimizeReport> {
        let mut report = OptimizeReport::default();
        let before = graph.node_count();

        for _ in 0..self.max_iterations {
            report.iterations += 1;
            let mut progress = false;

            for pass in &self.passes {
                let result = pass.run(graph)?;
                if result.changed() {
                    debug!(
                        "{}: {} changed, {} removed",
                        pass.name(),
                        result.nodes_changed,
                        result.nodes_removed
                    );
                    progress = true;
                }
                report.passes.entry(pass.name()).or_default().merge(result);
            }

            if !progress {
                report.converged = true;
                break;
            }
        }

        if !report.converged {
            warn!(
                "optimizer did not converge after {} iterations, keeping current graph",
                self.max_iterations
            );
        }
        info!(
            "optimizer: {} -> {} nodes in {} iteration(s)",
            before,
            graph.node_count(),
            report.iterations
        );
        Ok(report)
    }
}
