//! Per-op shape and dtype rules
//!
//! Each rule maps the facts known about a node's inputs to facts about its
//! outputs. Rules never fail: anything they cannot derive is left unknown.
//! Source-form and target-form spellings of the same op share a rule.

use crate::graph::{AttrValue, Graph, Node, TensorInfo};
use crate::proto::tensor_proto::DataType;
use crate::tensor::{broadcast_dims, normalize_axis, Shape, UNKNOWN_DIM};

/// Ops whose single output mirrors input 0
const SAME_AS_INPUT: &[&str] = &[
    "Identity",
    "StopGradient",
    "Snapshot",
    "PlaceholderWithDefault",
    "Relu",
    "Relu6",
    "Sigmoid",
    "Tanh",
    "Neg",
    "Abs",
    "Exp",
    "Log",
    "Sqrt",
    "Rsqrt",
    "Floor",
    "Ceil",
    "Reciprocal",
    "Clip",
    "Softmax",
    "LogSoftmax",
    "BiasAdd",
    "Erf",
];

/// Elementwise ops with numpy broadcasting
const BROADCAST_BINARY: &[&str] = &[
    "Add", "AddV2", "Sub", "Mul", "Div", "RealDiv", "Maximum", "Minimum", "Pow",
];

/// Broadcasting comparisons producing bool
const COMPARISON: &[&str] = &[
    "Equal",
    "NotEqual",
    "Less",
    "Greater",
    "LessEqual",
    "GreaterEqual",
    "LessOrEqual",
    "GreaterOrEqual",
    "LogicalAnd",
    "LogicalOr",
    "And",
    "Or",
];

/// Infer facts for every output of `node`
pub fn infer_node(graph: &Graph, node: &Node, inputs: &[TensorInfo]) -> Vec<TensorInfo> {
    let n_out = node.outputs().len();
    let op = node.op_type();
    let input = |i: usize| inputs.get(i).cloned().unwrap_or_default();

    let single = |shape: Shape, dtype: Option<DataType>| {
        let mut out = vec![TensorInfo::default(); n_out];
        if let Some(first) = out.first_mut() {
            *first = TensorInfo::new(shape, dtype);
        }
        out
    };

    match op {
        "Const" => match node.get_tensor("value") {
            Ok(value) => single(Shape::known(value.dims().to_vec()), Some(value.dtype())),
            Err(_) => single(Shape::unknown(), None),
        },
        _ if SAME_AS_INPUT.contains(&op) => {
            let x = input(0);
            single(x.shape, x.dtype)
        }
        _ if BROADCAST_BINARY.contains(&op) => {
            let (a, b) = (input(0), input(1));
            let shape = a.shape.broadcast(&b.shape).unwrap_or_default();
            single(shape, a.dtype.or(b.dtype))
        }
        _ if COMPARISON.contains(&op) => {
            let shape = input(0).shape.broadcast(&input(1).shape).unwrap_or_default();
            single(shape, Some(DataType::Bool))
        }
        "Not" | "LogicalNot" => single(input(0).shape, Some(DataType::Bool)),
        "MatMul" | "BatchMatMul" | "BatchMatMulV2" => {
            let (a, b) = (input(0), input(1));
            single(matmul_shape(node, &a.shape, &b.shape), a.dtype)
        }
        "Transpose" => {
            let x = input(0);
            single(transpose_shape(graph, node, &x.shape), x.dtype)
        }
        "Reshape" => {
            let x = input(0);
            single(reshape_shape(graph, node, &x.shape), x.dtype)
        }
        "Squeeze" => {
            let x = input(0);
            single(squeeze_shape(graph, node, &x.shape), x.dtype)
        }
        "Unsqueeze" | "ExpandDims" => {
            let x = input(0);
            single(unsqueeze_shape(graph, node, &x.shape), x.dtype)
        }
        "Concat" | "ConcatV2" => single(concat_shape(graph, node, inputs), input(0).dtype),
        "Cast" => {
            let to = match node.attr("to").or_else(|| node.attr("DstT")) {
                Some(AttrValue::Type(t)) => Some(*t),
                Some(AttrValue::Int(code)) => DataType::try_from(*code as i32).ok(),
                _ => None,
            };
            single(input(0).shape, to)
        }
        "Shape" => {
            let rank = input(0).shape.rank();
            let shape = match rank {
                Some(r) => Shape::known(vec![r as i64]),
                None => Shape::with_rank(1),
            };
            let dtype = match node.attr("out_type") {
                Some(AttrValue::Type(t)) => *t,
                _ => DataType::Int64,
            };
            single(shape, Some(dtype))
        }
        // variadic elementwise in target form, reductions in source form
        "Mean" | "Sum" | "Max" | "Min" if node.is_converted() => {
            let shape = inputs
                .iter()
                .try_fold(Shape::scalar(), |acc, i| acc.broadcast(&i.shape))
                .unwrap_or_default();
            single(shape, input(0).dtype)
        }
        "Mean" | "Sum" | "Max" | "Min" | "Prod" | "ReduceMean" | "ReduceSum" | "ReduceMax"
        | "ReduceMin" | "ReduceProd" => {
            let x = input(0);
            single(reduce_shape(graph, node, &x.shape), x.dtype)
        }
        "Gather" | "GatherV2" => {
            let (data, indices) = (input(0), input(1));
            single(gather_shape(graph, node, &data.shape, &indices.shape), data.dtype)
        }
        "Expand" => {
            let x = input(0);
            let target = const_ints(graph, node, 1)
                .map(Shape::known)
                .unwrap_or_default();
            single(x.shape.broadcast(&target).unwrap_or_default(), x.dtype)
        }
        "Fill" => {
            let shape = const_ints(graph, node, 0).map(Shape::known).unwrap_or_default();
            single(shape, input(1).dtype)
        }
        "QuantizeLinear" | "Quantize" => {
            let dtype = inputs
                .get(2)
                .and_then(|zp| zp.dtype)
                .or(Some(DataType::Uint8));
            single(input(0).shape, dtype)
        }
        "DequantizeLinear" | "Dequantize" => single(input(0).shape, Some(DataType::Float)),
        "CategoryMapper" => {
            let x = input(0);
            let dtype = match x.dtype {
                Some(DataType::String) => DataType::Int64,
                _ => DataType::String,
            };
            single(x.shape, Some(dtype))
        }
        "LookupTableFindV2" => single(input(1).shape, input(2).dtype),
        "LookupTableSizeV2" => single(Shape::scalar(), Some(DataType::Int64)),
        "Conv" | "MaxPool" | "AveragePool" => {
            let x = input(0);
            let w = input(1);
            single(conv_pool_shape(node, &x.shape, &w.shape), x.dtype)
        }
        _ => vec![TensorInfo::default(); n_out],
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Integer list from a constant input
fn const_ints(graph: &Graph, node: &Node, idx: usize) -> Option<Vec<i64>> {
    let tensor = node.input(idx).filter(|t| !t.is_empty())?;
    graph.const_value(tensor)?.as_i64s()
}

/// Integer list from the first present attribute, else a constant input
fn attr_or_input_ints(graph: &Graph, node: &Node, attrs: &[&str], idx: usize) -> Option<Vec<i64>> {
    for name in attrs {
        match node.attr(name) {
            Some(AttrValue::Ints(v)) => return Some(v.clone()),
            Some(AttrValue::Int(v)) => return Some(vec![*v]),
            _ => {}
        }
    }
    const_ints(graph, node, idx)
}

fn matmul_shape(node: &Node, a: &Shape, b: &Shape) -> Shape {
    let (Some(a), Some(b)) = (a.dims(), b.dims()) else {
        return Shape::unknown();
    };
    if a.len() < 2 || b.len() < 2 {
        return Shape::unknown();
    }
    let flag = |names: &[&str]| names.iter().any(|n| node.get_bool_or(n, false).unwrap_or(false));
    let ta = flag(&["transpose_a", "adj_x"]);
    let tb = flag(&["transpose_b", "adj_y"]);

    let m = if ta { a[a.len() - 1] } else { a[a.len() - 2] };
    let n = if tb { b[b.len() - 2] } else { b[b.len() - 1] };
    let Some(mut batch) = broadcast_dims(&a[..a.len() - 2], &b[..b.len() - 2]) else {
        return Shape::unknown();
    };
    batch.push(m);
    batch.push(n);
    Shape::known(batch)
}

fn transpose_shape(graph: &Graph, node: &Node, x: &Shape) -> Shape {
    let Some(dims) = x.dims() else {
        return Shape::unknown();
    };
    let perm = attr_or_input_ints(graph, node, &["perm"], 1)
        .unwrap_or_else(|| (0..dims.len() as i64).rev().collect());
    if perm.len() != dims.len() {
        return Shape::with_rank(dims.len());
    }
    let out: Option<Vec<i64>> = perm
        .iter()
        .map(|&p| dims.get(p as usize).copied())
        .collect();
    out.map(Shape::known).unwrap_or_else(|| Shape::with_rank(dims.len()))
}

fn reshape_shape(graph: &Graph, node: &Node, x: &Shape) -> Shape {
    let Some(target) = attr_or_input_ints(graph, node, &["shape"], 1) else {
        return Shape::unknown();
    };
    // zero copies the input dim in target form only
    let copy_zero = node.is_converted() && !node.get_bool_or("allowzero", false).unwrap_or(false);

    let mut dims: Vec<i64> = target
        .iter()
        .enumerate()
        .map(|(i, &d)| match d {
            0 if copy_zero => x.dim(i).unwrap_or(UNKNOWN_DIM),
            d if d < 0 => UNKNOWN_DIM,
            d => d,
        })
        .collect();

    let wildcard = target.iter().position(|&d| d == -1);
    if let (Some(pos), Some(total)) = (wildcard, x.num_elements()) {
        let known: Option<i64> = dims
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != pos)
            .map(|(_, &d)| (d >= 0).then_some(d))
            .product();
        if let Some(known) = known.filter(|&k| k > 0) {
            dims[pos] = total as i64 / known;
        }
    }
    Shape::known(dims)
}

fn squeeze_shape(graph: &Graph, node: &Node, x: &Shape) -> Shape {
    let Some(dims) = x.dims() else {
        return Shape::unknown();
    };
    let axes = attr_or_input_ints(graph, node, &["axes", "squeeze_dims"], 1).unwrap_or_default();
    if axes.is_empty() {
        if !x.is_fully_known() {
            return Shape::unknown();
        }
        return Shape::known(dims.iter().copied().filter(|&d| d != 1).collect::<Vec<_>>());
    }
    let Ok(axes) = crate::tensor::normalize_axes(&axes, dims.len()) else {
        return Shape::unknown();
    };
    Shape::known(
        dims.iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &d)| d)
            .collect::<Vec<_>>(),
    )
}

fn unsqueeze_shape(graph: &Graph, node: &Node, x: &Shape) -> Shape {
    let Some(dims) = x.dims() else {
        return Shape::unknown();
    };
    let Some(axes) = attr_or_input_ints(graph, node, &["axes"], 1) else {
        return Shape::unknown();
    };
    let out_rank = dims.len() + axes.len();
    let Ok(mut axes) = crate::tensor::normalize_axes(&axes, out_rank) else {
        return Shape::unknown();
    };
    axes.sort_unstable();
    let mut out = Vec::with_capacity(out_rank);
    let mut src = dims.iter();
    for i in 0..out_rank {
        if axes.contains(&i) {
            out.push(1);
        } else if let Some(&d) = src.next() {
            out.push(d);
        }
    }
    Shape::known(out)
}

fn concat_shape(graph: &Graph, node: &Node, inputs: &[TensorInfo]) -> Shape {
    // ConcatV2 carries its axis as the last input
    let (axis, data_inputs) = if node.op_type() == "ConcatV2" {
        let last = node.inputs().len().saturating_sub(1);
        match const_ints(graph, node, last) {
            Some(v) if v.len() == 1 => (v[0], &inputs[..last.min(inputs.len())]),
            _ => return Shape::unknown(),
        }
    } else {
        match node.get_int("axis") {
            Ok(axis) => (axis, inputs),
            Err(_) => return Shape::unknown(),
        }
    };

    let Some(rank) = data_inputs.iter().find_map(|i| i.shape.rank()) else {
        return Shape::unknown();
    };
    let Ok(axis) = normalize_axis(axis, rank) else {
        return Shape::unknown();
    };

    let mut out = vec![UNKNOWN_DIM; rank];
    let mut total = Some(0i64);
    for info in data_inputs {
        let Some(dims) = info.shape.dims() else {
            total = None;
            continue;
        };
        for (i, &d) in dims.iter().enumerate().take(rank) {
            if i == axis {
                total = total.and_then(|t| (d >= 0).then_some(t + d));
            } else if out[i] < 0 {
                out[i] = d;
            }
        }
    }
    out[axis] = total.unwrap_or(UNKNOWN_DIM);
    Shape::known(out)
}

fn reduce_shape(graph: &Graph, node: &Node, x: &Shape) -> Shape {
    let Some(dims) = x.dims() else {
        return Shape::unknown();
    };
    // source kinds use keep_dims (default off), target kinds keepdims (default on)
    let keep = if node.is_converted() {
        node.get_bool_or("keepdims", true).unwrap_or(true)
    } else {
        node.get_bool_or("keep_dims", false).unwrap_or(false)
    };
    let axes = match attr_or_input_ints(graph, node, &["axes"], 1) {
        Some(axes) if !axes.is_empty() => axes,
        _ => (0..dims.len() as i64).collect(),
    };
    let Ok(axes) = crate::tensor::normalize_axes(&axes, dims.len()) else {
        return Shape::unknown();
    };
    let out: Vec<i64> = dims
        .iter()
        .enumerate()
        .filter_map(|(i, &d)| match (axes.contains(&i), keep) {
            (true, true) => Some(1),
            (true, false) => None,
            (false, _) => Some(d),
        })
        .collect();
    Shape::known(out)
}

fn gather_shape(graph: &Graph, node: &Node, data: &Shape, indices: &Shape) -> Shape {
    let (Some(d), Some(idx)) = (data.dims(), indices.dims()) else {
        return Shape::unknown();
    };
    let axis = if node.op_type() == "GatherV2" {
        const_ints(graph, node, 2).and_then(|v| v.first().copied())
    } else {
        node.get_int_or("axis", 0).ok()
    };
    let Some(axis) = axis.and_then(|a| normalize_axis(a, d.len()).ok()) else {
        return Shape::unknown();
    };
    let mut out = d[..axis].to_vec();
    out.extend_from_slice(idx);
    out.extend_from_slice(&d[axis + 1..]);
    Shape::known(out)
}

/// NCHW convolution and pooling output shape
fn conv_pool_shape(node: &Node, x: &Shape, w: &Shape) -> Shape {
    let Some(dims) = x.dims() else {
        return Shape::unknown();
    };
    if dims.len() < 3 {
        return Shape::unknown();
    }
    let spatial = dims.len() - 2;
    let is_conv = node.op_type() == "Conv";

    let kernel = match node.get_ints("kernel_shape") {
        Ok(k) => k,
        Err(_) if is_conv => match w.dims() {
            Some(wd) if wd.len() == dims.len() => wd[2..].to_vec(),
            _ => vec![UNKNOWN_DIM; spatial],
        },
        Err(_) => return Shape::with_rank(dims.len()),
    };
    let strides = node.get_ints_or("strides", vec![1; spatial]).unwrap_or_default();
    let dilations = node.get_ints_or("dilations", vec![1; spatial]).unwrap_or_default();
    let pads = node.get_ints_or("pads", vec![0; spatial * 2]).unwrap_or_default();
    let auto_pad = node.get_string_or("auto_pad", "NOTSET".to_string()).unwrap_or_default();
    if kernel.len() != spatial || strides.len() != spatial || pads.len() != spatial * 2 {
        return Shape::with_rank(dims.len());
    }

    let channels = if is_conv { w.dim(0).unwrap_or(UNKNOWN_DIM) } else { dims[1] };
    let mut out = vec![dims[0], channels];
    for i in 0..spatial {
        let size = dims[i + 2];
        let d = dilations.get(i).copied().unwrap_or(1);
        let out_dim = if size < 0 || kernel[i] < 0 || strides[i] <= 0 {
            UNKNOWN_DIM
        } else if auto_pad.starts_with("SAME") {
            (size + strides[i] - 1) / strides[i]
        } else if auto_pad == "VALID" {
            (size - d * (kernel[i] - 1) - 1) / strides[i] + 1
        } else {
            (size + pads[i] + pads[i + spatial] - d * (kernel[i] - 1) - 1) / strides[i] + 1
        };
        out.push(out_dim);
    }
    Shape::known(out)
}
