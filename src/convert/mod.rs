//! Conversion entry points
//!
//! - [`source`]: the frozen source graph and initialized tables the caller supplies
//! - [`options`]: [`ConvertOptions`], every knob with its default
//! - [`import`]: builds the working graph from the source
//! - [`driver`]: [`Converter`], runs rewriters, dispatch, optimizer and assembly
//! - [`report`]: [`ConversionReport`], what happened along the way
//!
//! # Example
//!
//! ```ignore
//! use frozen2onnx::convert::{ConvertOptions, Converter};
//!
//! let conversion = Converter::new(&frozen)
//!     .inputs(["input:0"])
//!     .outputs(["logits:0"])
//!     .tables(tables)
//!     .options(ConvertOptions::default().opset(13).continue_on_error(true))
//!     .convert()?;
//!
//! for node in &conversion.report.unconverted {
//!     eprintln!("{}", node);
//! }
//! ```

pub mod driver;
pub mod import;
pub mod options;
pub mod report;
pub mod source;

pub use driver::{convert, Conversion, Converter};
pub use import::import_graph;
pub use options::ConvertOptions;
pub use report::ConversionReport;
pub use source::{FrozenFunction, FrozenGraph, InitializedTables, SourceNode, SourceTensor, TableEntry};
