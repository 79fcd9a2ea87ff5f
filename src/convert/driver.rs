//! Conversion driver
//!
//! Runs one conversion end to end:
//!
//! 1. import the source graph and apply input options
//! 2. pre-dispatch rewriters
//! 3. per-node dispatch in topological order, nested graphs first
//! 4. post-dispatch rewriters
//! 5. completeness check, optimizer, final inference
//! 6. model assembly
//!
//! Steps 2-4 run for every nested graph as well; the rest only at the top.

use log::{debug, info, warn};

use crate::builder::{ExternalTensorStorage, ModelBuilder};
use crate::error::{ConvertError, ConvertResult, UnconvertedNode};
use crate::graph::{Graph, NodeId};
use crate::handlers::{custom, CustomOps, HandlerContext, HandlerRegistry};
use crate::opset::validate_opset;
use crate::optimizer::OptimizerPipeline;
use crate::proto::ModelProto;
use crate::rewriter::{run_rewriters, RewriteContext, Rewriter};

use super::import::import_graph;
use super::options::ConvertOptions;
use super::report::ConversionReport;
use super::source::{FrozenGraph, InitializedTables};

/// Result of a successful conversion
#[derive(Debug)]
pub struct Conversion {
    /// Finished target graph
    pub graph: Graph,
    /// Statistics and unconverted nodes
    pub report: ConversionReport,
    /// Assembled model, not yet written anywhere
    pub model: ModelProto,
    /// Externalized payloads, `Some` only in large-model mode
    pub external_storage: Option<ExternalTensorStorage>,
}

/// One configured conversion
#[derive(Debug)]
pub struct Converter<'a> {
    source: &'a FrozenGraph,
    inputs: Vec<String>,
    outputs: Vec<String>,
    tables: InitializedTables,
    custom_ops: CustomOps,
    options: ConvertOptions,
}

impl<'a> Converter<'a> {
    /// Convert `source` with default options and no side data
    pub fn new(source: &'a FrozenGraph) -> Self {
        Self {
            source,
            inputs: Vec::new(),
            outputs: Vec::new(),
            tables: InitializedTables::new(),
            custom_ops: CustomOps::new(),
            options: ConvertOptions::default(),
        }
    }

    /// Designated input tensors
    pub fn inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Designated output tensors
    pub fn outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    /// Contents of initialized hash tables
    pub fn tables(mut self, tables: InitializedTables) -> Self {
        self.tables = tables;
        self
    }

    /// Fallback handlers for kinds with no built-in handler
    pub fn custom_ops(mut self, custom_ops: CustomOps) -> Self {
        self.custom_ops = custom_ops;
        self
    }

    /// Conversion options
    pub fn options(mut self, options: ConvertOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the conversion
    pub fn convert(self) -> ConvertResult<Conversion> {
        let opts = &self.options;
        validate_opset(opts.opset)?;
        info!(
            "converting {} ({} nodes) at opset {}",
            opts.model_name,
            self.source.nodes.len(),
            opts.opset
        );

        let mut graph = import_graph(self.source, &self.inputs, &self.outputs, opts)?;
        let mut report = ConversionReport {
            nodes_imported: graph.node_count(),
            ..Default::default()
        };

        self.convert_graph(&mut graph, &mut report)?;

        let missing_outputs: Vec<String> = graph
            .outputs()
            .iter()
            .filter(|t| graph.producer(t).is_none() && !graph.is_graph_input(t))
            .cloned()
            .collect();
        if !missing_outputs.is_empty() {
            return Err(ConvertError::Incomplete {
                unconverted: report.unconverted,
                missing_outputs,
            });
        }
        if !report.unconverted.is_empty() {
            warn!(
                "{} node(s) left unconverted in {}",
                report.unconverted.len(),
                opts.model_name
            );
        }

        if opts.optimize {
            let pipeline = OptimizerPipeline::default().max_iterations(opts.max_optimizer_iterations);
            report.optimizer = Some(pipeline.run(&mut graph)?);
        }
        graph.infer_shapes()?;
        report.count_ops(&graph);

        let mut builder = ModelBuilder::new(&graph)
            .doc_string(format!("converted from {}", opts.model_name))
            .renames(&opts.tensors_to_rename);
        if opts.large_model {
            builder = builder.external_threshold(opts.external_threshold);
        }
        let (model, external_storage) = builder.build()?;

        info!(
            "converted {}: {} -> {} nodes, {} unconverted",
            opts.model_name,
            report.nodes_imported,
            report.nodes_emitted(),
            report.unconverted.len()
        );
        Ok(Conversion {
            graph,
            report,
            model,
            external_storage,
        })
    }

    /// Rewrite, dispatch, rewrite; recursing into nested graphs per node
    fn convert_graph(&self, graph: &mut Graph, report: &mut ConversionReport) -> ConvertResult<()> {
        let applied = self.run_passes(&self.options.pre_rewriters, graph)?;
        report.rewriters_applied.extend(applied);

        for id in graph.topological_order()? {
            // an earlier handler may have removed or replaced this slot
            let Some(node) = graph.node(id) else { continue };
            if node.is_converted() {
                continue;
            }
            let name = node.name().to_string();
            let op_type = node.op_type().to_string();

            for attr in node.subgraph_attrs() {
                if let Some(mut sub) = graph.take_subgraph(id, &attr) {
                    let result = self.convert_graph(&mut sub, report);
                    graph.set_subgraph(id, &attr, sub);
                    result?;
                }
            }

            debug!("converting {} ({})", name, op_type);
            match self.dispatch(graph, id, &name, &op_type, report) {
                Ok(()) => {}
                Err(e) if e.is_recoverable() && self.options.continue_on_error => {
                    warn!("leaving {} ({}) unconverted: {}", name, op_type, e);
                    report.unconverted.push(UnconvertedNode {
                        name,
                        op_type,
                        reason: e.to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            }
            if let Some(node) = graph.node_mut(id) {
                node.set_converted(true);
            }
        }

        let applied = self.run_passes(&self.options.post_rewriters, graph)?;
        report.rewriters_applied.extend(applied);
        Ok(())
    }

    fn run_passes(
        &self,
        passes: &[Box<dyn Rewriter>],
        graph: &mut Graph,
    ) -> ConvertResult<Vec<&'static str>> {
        let mut ctx = RewriteContext::new(graph, &self.tables, self.options.opset)
            .with_dequantize(self.options.dequantize);
        run_rewriters(passes, &mut ctx)
    }

    /// Built-in handler first, then the caller's custom op
    fn dispatch(
        &self,
        graph: &mut Graph,
        id: NodeId,
        name: &str,
        op_type: &str,
        report: &mut ConversionReport,
    ) -> ConvertResult<()> {
        let opset = self.options.opset;
        let mut ctx = HandlerContext {
            graph,
            tables: &self.tables,
            opset,
        };

        if let Some(handler) = HandlerRegistry::builtin().resolve(op_type, opset) {
            return handler(&mut ctx, id);
        }
        if let Some(op) = self.custom_ops.get(op_type) {
            custom::apply(op, &mut ctx, id)?;
            report.custom_handled.push(name.to_string());
            return Ok(());
        }
        Err(ConvertError::UnsupportedOp {
            node: name.to_string(),
            op_type: op_type.to_string(),
            opset,
        })
    }
}

/// Convert with default side data and no custom ops
pub fn convert(
    source: &FrozenGraph,
    inputs: &[&str],
    outputs: &[&str],
    options: ConvertOptions,
) -> ConvertResult<Conversion> {
    Converter::new(source)
        .inputs(inputs.iter().copied())
        .outputs(outputs.iter().copied())
        .options(options)
        .convert()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::source::{SourceNode, TableEntry};
    use crate::opset::TF_DOMAIN;
    use crate::proto::tensor_proto::DataType;
    use crate::tensor::TensorValue;

    fn relu_source() -> FrozenGraph {
        let mut source = FrozenGraph::new();
        source
            .push(SourceNode::new("x", "Placeholder").output(vec![1, 4], DataType::Float))
            .push(SourceNode::new("relu", "Relu").input("x:0").output(vec![1, 4], DataType::Float));
        source
    }

    #[test]
    fn test_simple_conversion() {
        let conversion = convert(&relu_source(), &["x:0"], &["relu:0"], ConvertOptions::default()).unwrap();
        assert!(conversion.report.is_complete());
        assert_eq!(conversion.report.nodes_imported, 2);
        assert!(conversion.graph.nodes().all(|(_, n)| n.is_converted()));

        let proto = conversion.model.graph.unwrap();
        assert_eq!(proto.count_op("Relu"), 1);
        assert_eq!(proto.input[0].name, "x:0");
        assert_eq!(conversion.model.doc_string, "converted from unknown");
        assert!(conversion.external_storage.is_none());
    }

    #[test]
    fn test_unsupported_aborts_by_default() {
        let mut source = relu_source();
        source.push(SourceNode::new("odd", "Frobnicate").input("relu:0").untyped_output());
        let err = convert(&source, &["x:0"], &["odd:0"], ConvertOptions::default()).unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedOp { ref op_type, .. } if op_type == "Frobnicate"));
    }

    #[test]
    fn test_unsupported_accumulated() {
        let mut source = relu_source();
        source.push(SourceNode::new("odd", "Frobnicate").input("relu:0").untyped_output());
        let options = ConvertOptions::default().continue_on_error(true);
        let conversion = convert(&source, &["x:0"], &["odd:0"], options).unwrap();

        assert_eq!(conversion.report.unconverted.len(), 1);
        assert_eq!(conversion.report.unconverted[0].name, "odd");
        assert!(!conversion.graph.node_by_name("odd").unwrap().is_converted());
    }

    #[test]
    fn test_missing_output_is_incomplete() {
        let options = ConvertOptions::default().continue_on_error(true);
        let err = convert(&relu_source(), &["x:0"], &["ghost:0"], options).unwrap_err();
        match err {
            ConvertError::Incomplete { missing_outputs, .. } => {
                assert_eq!(missing_outputs, vec!["ghost:0".to_string()])
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_custom_op_tags_domain() {
        let mut source = relu_source();
        source.push(SourceNode::new("odd", "Frobnicate").input("relu:0").untyped_output());
        let conversion = Converter::new(&source)
            .inputs(["x:0"])
            .outputs(["odd:0"])
            .custom_ops(CustomOps::new().passthrough("Frobnicate", TF_DOMAIN))
            .convert()
            .unwrap();

        assert_eq!(conversion.report.custom_handled, vec!["odd".to_string()]);
        assert_eq!(conversion.graph.node_by_name("odd").unwrap().domain(), TF_DOMAIN);
        assert_eq!(conversion.model.opset_version_for(TF_DOMAIN), Some(1));
    }

    #[test]
    fn test_bad_opset_rejected() {
        let options = ConvertOptions::default().opset(2);
        let err = convert(&relu_source(), &["x:0"], &["relu:0"], options).unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedOpset { .. }));
    }

    #[test]
    fn test_lookup_folded_with_tables() {
        let mut source = FrozenGraph::new();
        source
            .push(
                SourceNode::new("keys", "Const")
                    .attr("value", TensorValue::scalar_string("b"))
                    .untyped_output(),
            )
            .push(
                SourceNode::new("table", "HashTableV2")
                    .attr("shared_name", "vocab")
                    .untyped_output(),
            )
            .push(SourceNode::new("default", "Const").attr("value", TensorValue::scalar_i64(0)).untyped_output())
            .push(
                SourceNode::new("find", "LookupTableFindV2")
                    .inputs(["table:0", "keys:0", "default:0"])
                    .attr("Tin", DataType::String)
                    .attr("Tout", DataType::Int64)
                    .untyped_output(),
            );

        let mut tables = InitializedTables::new();
        tables.insert("vocab", TableEntry::new(vec!["a".into(), "b".into()], vec![1, 2]));
        let conversion = Converter::new(&source)
            .outputs(["find:0"])
            .tables(tables)
            .convert()
            .unwrap();

        let folded = conversion.graph.const_value("find:0").unwrap();
        assert_eq!(folded.as_scalar_i64(), Some(2));
        assert!(!conversion.graph.has_node("table"));
    }
}
