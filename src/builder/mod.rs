//! Output assembly
//!
//! After dispatch and optimization the finished [`Graph`](crate::graph::Graph)
//! is turned into an in-memory model:
//!
//! - [`ModelBuilder`]: emits the `ModelProto`, applies final tensor renames
//! - [`external`]: large-model storage for oversized constants
//! - [`validation`]: structural checks on the assembled model
//!
//! # Example
//!
//! ```ignore
//! use frozen2onnx::builder::{check_model, ModelBuilder};
//!
//! let (model, storage) = ModelBuilder::new(&graph)
//!     .rename("input:0", "image")
//!     .external_threshold(1024)
//!     .build()?;
//! check_model(&model)?;
//! ```
//!
//! Writing the model and the external payloads to disk is left to the
//! caller.

pub mod external;
pub mod model;
pub mod validation;

pub use external::{ExternalTensorStorage, DEFAULT_EXTERNAL_THRESHOLD, LOCATION_KEY};
pub use model::{attr_to_proto, graph_to_proto, rename_tensor, ModelBuilder, PRODUCER_NAME};
pub use validation::{check_model, validate_graph, validate_model, ValidationResult};
