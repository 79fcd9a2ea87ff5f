//! Conversion options
//!
//! | Field | Default |
//! |-------|---------|
//! | `opset` | [`PREFERRED_OPSET`] |
//! | `continue_on_error` | `false` |
//! | `dequantize` | `false` |
//! | `large_model` | `false`, threshold 1024 bytes |
//! | `optimize` | `true`, at most 16 iterations |
//! | `pre_rewriters` | lookup folding, scan outputs |
//! | `post_rewriters` | quantize/dequantize |
//! | `model_name` | `"unknown"` |
//!
//! Everything else starts empty.

use indexmap::IndexMap;

use crate::builder::DEFAULT_EXTERNAL_THRESHOLD;
use crate::graph::Target;
use crate::opset::{OpsetId, PREFERRED_OPSET};
use crate::optimizer::DEFAULT_MAX_ITERATIONS;
use crate::rewriter::{default_post_rewriters, default_pre_rewriters, Rewriter};
use crate::tensor::Shape;

/// Knobs for one conversion
#[derive(Debug)]
pub struct ConvertOptions {
    /// Requested opset of the default domain
    pub opset: i64,
    /// Accumulate unsupported ops instead of aborting on the first
    pub continue_on_error: bool,
    /// Additional domain imports
    pub extra_opsets: Vec<OpsetId>,
    /// Runtime quirks to work around
    pub targets: Vec<Target>,
    /// Shapes forced onto tensors at import
    pub shape_override: IndexMap<String, Shape>,
    /// Designated inputs fed in NCHW layout
    pub inputs_as_nchw: Vec<String>,
    /// `PlaceholderWithDefault` nodes that become real inputs
    pub ignore_default: Vec<String>,
    /// `PlaceholderWithDefault` nodes that always read their default
    pub use_default: Vec<String>,
    /// Strip quantization
    pub dequantize: bool,
    /// Move large constants to external storage
    pub large_model: bool,
    /// Payload size above which a constant is externalized
    pub external_threshold: usize,
    /// Final names for designated inputs and outputs
    pub tensors_to_rename: IndexMap<String, String>,
    /// Passes run before dispatch
    pub pre_rewriters: Vec<Box<dyn Rewriter>>,
    /// Passes run after dispatch
    pub post_rewriters: Vec<Box<dyn Rewriter>>,
    /// Run the optimizer pipeline
    pub optimize: bool,
    /// Optimizer iteration cap
    pub max_optimizer_iterations: usize,
    /// Source model name for the doc string
    pub model_name: String,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            opset: PREFERRED_OPSET,
            continue_on_error: false,
            extra_opsets: Vec::new(),
            targets: Vec::new(),
            shape_override: IndexMap::new(),
            inputs_as_nchw: Vec::new(),
            ignore_default: Vec::new(),
            use_default: Vec::new(),
            dequantize: false,
            large_model: false,
            external_threshold: DEFAULT_EXTERNAL_THRESHOLD,
            tensors_to_rename: IndexMap::new(),
            pre_rewriters: default_pre_rewriters(),
            post_rewriters: default_post_rewriters(),
            optimize: true,
            max_optimizer_iterations: DEFAULT_MAX_ITERATIONS,
            model_name: "unknown".to_string(),
        }
    }
}

impl ConvertOptions {
    /// Options with every default
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the opset
    pub fn opset(mut self, opset: i64) -> Self {
        self.opset = opset;
        self
    }

    /// Set accumulation of unsupported ops
    pub fn continue_on_error(mut self, enable: bool) -> Self {
        self.continue_on_error = enable;
        self
    }

    /// Import an extra domain
    pub fn extra_opset(mut self, domain: impl Into<String>, version: i64) -> Self {
        self.extra_opsets.push(OpsetId::new(domain, version));
        self
    }

    /// Add a runtime target
    pub fn target(mut self, target: Target) -> Self {
        if !self.targets.contains(&target) {
            self.targets.push(target);
        }
        self
    }

    /// Force the shape of a tensor
    pub fn shape_override(mut self, tensor: impl Into<String>, shape: impl Into<Shape>) -> Self {
        self.shape_override.insert(tensor.into(), shape.into());
        self
    }

    /// Feed an input in NCHW layout
    pub fn input_as_nchw(mut self, tensor: impl Into<String>) -> Self {
        self.inputs_as_nchw.push(tensor.into());
        self
    }

    /// Turn a `PlaceholderWithDefault` into a real input
    pub fn ignore_default(mut self, node: impl Into<String>) -> Self {
        self.ignore_default.push(node.into());
        self
    }

    /// Always read the default of a `PlaceholderWithDefault`
    pub fn use_default(mut self, node: impl Into<String>) -> Self {
        self.use_default.push(node.into());
        self
    }

    /// Set quantization stripping
    pub fn dequantize(mut self, enable: bool) -> Self {
        self.dequantize = enable;
        self
    }

    /// Set large-model mode
    pub fn large_model(mut self, enable: bool) -> Self {
        self.large_model = enable;
        self
    }

    /// Set the externalization threshold in bytes
    pub fn external_threshold(mut self, bytes: usize) -> Self {
        self.external_threshold = bytes;
        self
    }

    /// Rename a designated input or output in the final model
    pub fn rename_tensor(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.tensors_to_rename.insert(from.into(), to.into());
        self
    }

    /// Append a pre-dispatch pass
    pub fn pre_rewriter(mut self, rewriter: Box<dyn Rewriter>) -> Self {
        self.pre_rewriters.push(rewriter);
        self
    }

    /// Append a post-dispatch pass
    pub fn post_rewriter(mut self, rewriter: Box<dyn Rewriter>) -> Self {
        self.post_rewriters.push(rewriter);
        self
    }

    /// Toggle the optimizer
    pub fn optimize(mut self, enable: bool) -> Self {
        self.optimize = enable;
        self
    }

    /// Set the optimizer iteration cap
    pub fn max_optimizer_iterations(mut self, n: usize) -> Self {
        self.max_optimizer_iterations = n;
        self
    }

    /// Set the source model name
    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConvertOptions::default();
        assert_eq!(options.opset, PREFERRED_OPSET);
        assert!(!options.continue_on_error);
        assert!(options.optimize);
        assert_eq!(options.max_optimizer_iterations, 16);
        assert_eq!(options.external_threshold, 1024);
        assert_eq!(options.model_name, "unknown");
        assert_eq!(options.pre_rewriters.len(), 2);
        assert_eq!(options.post_rewriters.len(), 1);
    }

    #[test]
    fn test_builder_chain() {
        let options = ConvertOptions::new()
            .opset(11)
            .continue_on_error(true)
            .target(Target::Rs4)
            .target(Target::Rs4)
            .shape_override("x:0", vec![1, 3])
            .rename_tensor("y:0", "y");
        assert_eq!(options.opset, 11);
        assert!(options.continue_on_error);
        assert_eq!(options.targets, vec![Target::Rs4]);
        assert_eq!(options.shape_override["x:0"], Shape::known(vec![1, 3]));
        assert_eq!(options.tensors_to_rename["y:0"], "y");
    }
}
