//! Loop handler
//!
//! A source `While` carries two nested graphs: `cond` maps the loop
//! variables to a boolean and `body` maps them to their next values. The
//! target `Loop` has no separate condition graph, so the condition is
//! inlined twice: once in the outer graph on the initial values, and once
//! at the end of the body on the updated values.
//!
//! By the time this handler runs, both nested graphs have been converted.

use log::debug;
use rustc_hash::FxHashMap;

use crate::error::{ConvertError, ConvertResult};
use crate::graph::{Graph, NewNode, NodeId};
use crate::proto::tensor_proto::DataType;
use crate::tensor::Shape;

use super::registry::{register, HandlerRegistry};
use super::HandlerContext;

pub(crate) fn register_handlers(reg: &mut HandlerRegistry) {
    register!(reg, ["While"] => { 9 => while_loop });
}

fn take_graph(ctx: &mut HandlerContext<'_>, id: NodeId, attr: &str) -> ConvertResult<Graph> {
    let name = ctx.node(id)?.name().to_string();
    ctx.graph
        .take_subgraph(id, attr)
        .ok_or(ConvertError::MissingAttribute {
            node: name,
            attr: attr.to_string(),
        })
}

/// Bind the condition's formal inputs to `values` positionally
fn cond_bindings(cond: &Graph, values: &[String]) -> FxHashMap<String, String> {
    cond.inputs()
        .iter()
        .cloned()
        .zip(values.iter().cloned())
        .collect()
}

/// Inline the condition on `values` and return the tensor holding its result
fn inline_cond(target: &mut Graph, cond: &Graph, values: &[String], prefix: &str) -> ConvertResult<String> {
    let result = cond
        .outputs()
        .first()
        .ok_or_else(|| ConvertError::InvalidGraph(format!("condition graph {} has no output", cond.name())))?;
    let mapping = target.inline_graph(cond, &cond_bindings(cond, values), prefix)?;
    mapping
        .get(result)
        .cloned()
        .ok_or_else(|| ConvertError::InvalidGraph(format!("condition result {} was not inlined", result)))
}

fn while_loop(ctx: &mut HandlerContext<'_>, id: NodeId) -> ConvertResult<()> {
    let node = ctx.snapshot(id)?;
    let carried: Vec<String> = node.inputs().to_vec();
    let num_scans = node.get_int_or("num_scan_outputs", 0)?;
    let cond = take_graph(ctx, id, "cond")?;
    let mut body = take_graph(ctx, id, "body")?;

    if cond.inputs().len() != carried.len() || body.inputs().len() != carried.len() {
        return Err(ConvertError::Unsupported {
            node: node.name().to_string(),
            reason: format!(
                "loop has {} variables but cond takes {} and body takes {}",
                carried.len(),
                cond.inputs().len(),
                body.inputs().len()
            ),
        });
    }
    let body_outputs = body.outputs().to_vec();
    if body_outputs.len() != carried.len() + num_scans as usize {
        return Err(ConvertError::Unsupported {
            node: node.name().to_string(),
            reason: format!(
                "body yields {} values for {} variables and {} scan outputs",
                body_outputs.len(),
                carried.len(),
                num_scans
            ),
        });
    }

    let cond_init = inline_cond(ctx.graph, &cond, &carried, &format!("{}/cond_init", node.name()))?;

    // body contract: (iteration, cond, carried...) -> (cond, carried..., scans...)
    let iter_in = body.unique_name("iteration_num");
    let cond_in = body.unique_name("cond_in");
    body.set_shape(&iter_in, Shape::scalar());
    body.set_dtype(&iter_in, DataType::Int64);
    body.set_shape(&cond_in, Shape::scalar());
    body.set_dtype(&cond_in, DataType::Bool);
    let mut inputs = vec![iter_in, cond_in];
    inputs.extend(body.inputs().iter().cloned());
    body.set_inputs(inputs);

    let cond_out = inline_cond(&mut body, &cond, &body_outputs[..carried.len()], "cond")?;
    let mut outputs = vec![cond_out];
    outputs.extend(body_outputs);
    body.set_outputs(outputs);

    debug!(
        "While {} -> Loop with {} carried and {} scan outputs",
        node.name(),
        carried.len(),
        num_scans
    );

    let mut loop_inputs = vec![String::new(), cond_init];
    loop_inputs.extend(carried);
    ctx.graph
        .replace_node(id, NewNode::new("Loop").inputs(loop_inputs).attr("body", body))?;
    Ok(())
}
