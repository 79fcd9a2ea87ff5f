//! Constant folding
//!
//! Pure ops whose inputs are all constants are evaluated at conversion time
//! with `ndarray`. The node is replaced by a `Const` under the same name and
//! output id, and constant inputs left without readers are removed.
//! `Shape` folds whenever its input shape is fully known.
//!
//! Anything that cannot be evaluated exactly (integer overflow, integer
//! division by zero, mismatched operands) is left in the graph for the
//! runtime.

use std::ops::{Add, Div, Mul, Sub};

use log::debug;
use ndarray::{IxDyn, Zip};

use crate::error::ConvertResult;
use crate::graph::{Graph, NewNode, Node};
use crate::pattern::is_foldable;
use crate::tensor::{
    broadcast_dims, from_ndarray, map_tensor_data, normalize_axes, normalize_axis, numel,
    to_ndarray, transpose_value, Shape, TensorData, TensorValue,
};

use super::{OptimizeResult, OptimizerPass};

/// Evaluates pure ops over constant inputs
#[derive(Debug, Default)]
pub struct ConstantFold;

impl ConstantFold {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

// ============================================================================
// Elementwise evaluation
// ============================================================================

fn broadcast_apply<T, F>(a_dims: &[i64], a: &[T], b_dims: &[i64], b: &[T], f: F) -> Option<(Vec<i64>, Vec<T>)>
where
    T: Clone,
    F: Fn(T, T) -> Option<T>,
{
    let out = broadcast_dims(a_dims, b_dims)?;
    let shape: Vec<usize> = out.iter().map(|&d| d as usize).collect();
    let a = to_ndarray(a_dims, a).ok()?;
    let b = to_ndarray(b_dims, b).ok()?;
    let a = a.broadcast(IxDyn(&shape))?;
    let b = b.broadcast(IxDyn(&shape))?;
    let result = Zip::from(&a).and(&b).map_collect(|x, y| f(x.clone(), y.clone()));
    let (dims, values) = from_ndarray(&result);
    Some((dims, values.into_iter().collect::<Option<Vec<T>>>()?))
}

fn float_arith<T>(op: &str, a_dims: &[i64], a: &[T], b_dims: &[i64], b: &[T]) -> Option<(Vec<i64>, Vec<T>)>
where
    T: Clone + Add<Output = T> + Sub<Output = T> + Mul<Output = T> + Div<Output = T>,
{
    match op {
        "Add" => broadcast_apply(a_dims, a, b_dims, b, |x, y| Some(x + y)),
        "Sub" => broadcast_apply(a_dims, a, b_dims, b, |x, y| Some(x - y)),
        "Mul" => broadcast_apply(a_dims, a, b_dims, b, |x, y| Some(x * y)),
        "Div" => broadcast_apply(a_dims, a, b_dims, b, |x, y| Some(x / y)),
        _ => None,
    }
}

/// Integer arithmetic that refuses overflow and division by zero
trait CheckedArith: Sized + Clone {
    fn checked(op: &str, x: Self, y: Self) -> Option<Self>;
}

macro_rules! impl_checked_arith {
    ($($ty:ty),+) => {
        $(
            impl CheckedArith for $ty {
                fn checked(op: &str, x: Self, y: Self) -> Option<Self> {
                    match op {
                        "Add" => x.checked_add(y),
                        "Sub" => x.checked_sub(y),
                        "Mul" => x.checked_mul(y),
                        "Div" => x.checked_div(y),
                        _ => None,
                    }
                }
            }
        )+
    };
}

impl_checked_arith!(i32, i64);

fn int_arith<T: CheckedArith>(op: &str, a_dims: &[i64], a: &[T], b_dims: &[i64], b: &[T]) -> Option<(Vec<i64>, Vec<T>)> {
    broadcast_apply(a_dims, a, b_dims, b, |x, y| T::checked(op, x, y))
}

fn fold_binary(op: &str, a: &TensorValue, b: &TensorValue) -> Option<TensorValue> {
    let (da, db) = (a.dims(), b.dims());
    let (dims, data) = match (a.data(), b.data()) {
        (TensorData::Float(x), TensorData::Float(y)) => {
            let (dims, v) = float_arith(op, da, x, db, y)?;
            (dims, TensorData::Float(v))
        }
        (TensorData::Double(x), TensorData::Double(y)) => {
            let (dims, v) = float_arith(op, da, x, db, y)?;
            (dims, TensorData::Double(v))
        }
        (TensorData::Int64(x), TensorData::Int64(y)) => {
            let (dims, v) = int_arith(op, da, x, db, y)?;
            (dims, TensorData::Int64(v))
        }
        (TensorData::Int32(x), TensorData::Int32(y)) => {
            let (dims, v) = int_arith(op, da, x, db, y)?;
            (dims, TensorData::Int32(v))
        }
        _ => return None,
    };
    TensorValue::new(dims, data).ok()
}

fn fold_unary(op: &str, x: &TensorValue) -> Option<TensorValue> {
    let dims = x.dims();
    let float = |v: &[f32], f: fn(f32) -> f32| -> Option<TensorData> {
        Some(TensorData::Float(to_ndarray(dims, v).ok()?.mapv(f).into_raw_vec()))
    };
    let double = |v: &[f64], f: fn(f64) -> f64| -> Option<TensorData> {
        Some(TensorData::Double(to_ndarray(dims, v).ok()?.mapv(f).into_raw_vec()))
    };
    let data = match (op, x.data()) {
        ("Neg", TensorData::Float(v)) => float(v, |e| -e)?,
        ("Neg", TensorData::Double(v)) => double(v, |e| -e)?,
        ("Neg", TensorData::Int64(v)) => TensorData::Int64(v.iter().map(|e| e.wrapping_neg()).collect()),
        ("Neg", TensorData::Int32(v)) => TensorData::Int32(v.iter().map(|e| e.wrapping_neg()).collect()),
        ("Abs", TensorData::Float(v)) => float(v, f32::abs)?,
        ("Abs", TensorData::Double(v)) => double(v, f64::abs)?,
        ("Abs", TensorData::Int64(v)) => TensorData::Int64(v.iter().map(|e| e.wrapping_abs()).collect()),
        ("Abs", TensorData::Int32(v)) => TensorData::Int32(v.iter().map(|e| e.wrapping_abs()).collect()),
        ("Sqrt", TensorData::Float(v)) => float(v, f32::sqrt)?,
        ("Sqrt", TensorData::Double(v)) => double(v, f64::sqrt)?,
        ("Reciprocal", TensorData::Float(v)) => float(v, f32::recip)?,
        ("Reciprocal", TensorData::Double(v)) => double(v, f64::recip)?,
        ("Relu", TensorData::Float(v)) => float(v, |e| e.max(0.0))?,
        ("Relu", TensorData::Double(v)) => double(v, |e| e.max(0.0))?,
        ("Relu", TensorData::Int64(v)) => TensorData::Int64(v.iter().map(|&e| e.max(0)).collect()),
        ("Relu", TensorData::Int32(v)) => TensorData::Int32(v.iter().map(|&e| e.max(0)).collect()),
        _ => return None,
    };
    TensorValue::new(dims.to_vec(), data).ok()
}

// ============================================================================
// Shape manipulation
// ============================================================================

/// Target dims of a reshape: `0` copies the input dim, `-1` takes the rest
fn reshape_dims(input: &[i64], shape: &[i64], allow_zero: bool) -> Option<Vec<i64>> {
    let mut dims: Vec<i64> = shape
        .iter()
        .enumerate()
        .map(|(i, &d)| if d == 0 && !allow_zero { input.get(i).copied() } else { Some(d) })
        .collect::<Option<_>>()?;
    let total = numel(input) as i64;
    let unknown: Vec<usize> = dims
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == -1)
        .map(|(i, _)| i)
        .collect();
    match unknown.as_slice() {
        [] => {}
        [idx] => {
            let known: i64 = dims.iter().filter(|&&d| d != -1).product();
            if known == 0 || total % known != 0 {
                return None;
            }
            dims[*idx] = total / known;
        }
        _ => return None,
    }
    (dims.iter().all(|&d| d >= 0) && dims.iter().product::<i64>() == total).then_some(dims)
}

/// Axes from the `axes` attribute or, from opset 13, the second input
fn axes_of(node: &Node, values: &[&TensorValue]) -> Option<Option<Vec<i64>>> {
    if node.has_attr("axes") {
        return node.get_ints("axes").ok().map(Some);
    }
    match values.get(1) {
        Some(v) => v.as_i64s().map(Some),
        None => Some(None),
    }
}

fn squeeze_dims(dims: &[i64], axes: Option<Vec<i64>>) -> Option<Vec<i64>> {
    let axes = match axes {
        Some(axes) if !axes.is_empty() => normalize_axes(&axes, dims.len()).ok()?,
        _ => (0..dims.len()).filter(|&i| dims[i] == 1).collect(),
    };
    if axes.iter().any(|&a| dims[a] != 1) {
        return None;
    }
    Some(
        dims.iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &d)| d)
            .collect(),
    )
}

fn unsqueeze_dims(dims: &[i64], axes: &[i64]) -> Option<Vec<i64>> {
    let rank = dims.len() + axes.len();
    let mut axes = normalize_axes(axes, rank).ok()?;
    axes.sort_unstable();
    axes.dedup();
    if axes.len() + dims.len() != rank {
        return None;
    }
    let mut rest = dims.iter();
    (0..rank)
        .map(|i| if axes.contains(&i) { Some(1) } else { rest.next().copied() })
        .collect()
}

fn gather_vec<T: Clone>(data: &[T], dims: &[i64], axis: usize, indices: &[usize]) -> Vec<T> {
    let outer = dims[..axis].iter().product::<i64>() as usize;
    let axis_len = dims[axis] as usize;
    let inner = dims[axis + 1..].iter().product::<i64>() as usize;
    let mut out = Vec::with_capacity(outer * indices.len() * inner);
    for o in 0..outer {
        for &i in indices {
            let start = (o * axis_len + i) * inner;
            out.extend_from_slice(&data[start..start + inner]);
        }
    }
    out
}

fn fold_gather(node: &Node, data: &TensorValue, indices: &TensorValue) -> Option<TensorValue> {
    let dims = data.dims();
    let axis = normalize_axis(node.get_int_or("axis", 0).ok()?, dims.len()).ok()?;
    let axis_len = dims[axis];
    let idx: Vec<usize> = indices
        .as_i64s()?
        .into_iter()
        .map(|i| {
            let i = if i < 0 { i + axis_len } else { i };
            (0..axis_len).contains(&i).then_some(i as usize)
        })
        .collect::<Option<_>>()?;

    let mut out_dims = dims[..axis].to_vec();
    out_dims.extend_from_slice(indices.dims());
    out_dims.extend_from_slice(&dims[axis + 1..]);
    let gathered = map_tensor_data!(data.data(), v => gather_vec(v, dims, axis, &idx));
    TensorValue::new(out_dims, gathered).ok()
}

fn concat_vecs<T: Clone>(parts: &[(&[i64], &[T])], axis: usize) -> Vec<T> {
    let outer = parts[0].0[..axis].iter().product::<i64>() as usize;
    let mut out = Vec::new();
    for o in 0..outer {
        for (dims, data) in parts {
            let chunk = dims[axis..].iter().product::<i64>() as usize;
            out.extend_from_slice(&data[o * chunk..(o + 1) * chunk]);
        }
    }
    out
}

/// Concatenate values that all hold the same element type as the first
macro_rules! concat_data {
    ($values:expr, $axis:expr; $($variant:ident),+) => {
        match $values[0].data() {
            $(TensorData::$variant(_) => {
                let parts: Option<Vec<(&[i64], &[_])>> = $values
                    .iter()
                    .map(|v| match v.data() {
                        TensorData::$variant(d) => Some((v.dims(), d.as_slice())),
                        _ => None,
                    })
                    .collect();
                parts.map(|p| TensorData::$variant(concat_vecs(&p, $axis)))
            })+
        }
    };
}

fn fold_concat(node: &Node, values: &[&TensorValue]) -> Option<TensorValue> {
    let first = values.first()?;
    let rank = first.dims().len();
    let axis = normalize_axis(node.get_int("axis").ok()?, rank).ok()?;
    let compatible = values.iter().all(|v| {
        v.dims().len() == rank
            && v.dims()
                .iter()
                .zip(first.dims())
                .enumerate()
                .all(|(i, (a, b))| i == axis || a == b)
    });
    if !compatible {
        return None;
    }
    let mut dims = first.dims().to_vec();
    dims[axis] = values.iter().map(|v| v.dims()[axis]).sum();
    let data = concat_data!(values, axis; Float, Double, Int32, Int64, Int8, Uint8, Bool, String)?;
    TensorValue::new(dims, data).ok()
}

// ============================================================================
// Dispatch
// ============================================================================

/// Evaluate a foldable node over constant inputs
fn evaluate(node: &Node, values: &[&TensorValue]) -> Option<TensorValue> {
    let x = values.first()?;
    match node.op_type() {
        "Add" | "Sub" | "Mul" | "Div" => fold_binary(node.op_type(), x, values.get(1)?),
        "Neg" | "Abs" | "Sqrt" | "Reciprocal" | "Relu" => fold_unary(node.op_type(), x),
        "Identity" => Some((*x).clone()),
        "Cast" => x.cast(node.get_type("to").ok()?).ok(),
        "Transpose" => {
            let perm = node
                .get_ints_or("perm", (0..x.dims().len() as i64).rev().collect())
                .ok()?;
            transpose_value(x, &perm).ok()
        }
        "Reshape" => {
            let shape = values.get(1)?.as_i64s()?;
            let allow_zero = node.get_int_or("allowzero", 0).ok()? != 0;
            x.reshaped(reshape_dims(x.dims(), &shape, allow_zero)?).ok()
        }
        "Squeeze" => x.reshaped(squeeze_dims(x.dims(), axes_of(node, values)?)?).ok(),
        "Unsqueeze" => x.reshaped(unsqueeze_dims(x.dims(), &axes_of(node, values)??)?).ok(),
        "Concat" => fold_concat(node, values),
        "Gather" => fold_gather(node, x, values.get(1)?),
        _ => None,
    }
}

/// Folded value of a node, if it can be computed now
fn fold_node(graph: &Graph, node: &Node) -> Option<TensorValue> {
    if node.is_op("Shape") {
        let dims = graph.get_shape(node.input(0)?).dims()?.to_vec();
        return dims.iter().all(|&d| d >= 0).then(|| TensorValue::vec_i64(dims));
    }
    let values: Vec<&TensorValue> = node
        .inputs()
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| graph.const_value(t))
        .collect::<Option<_>>()?;
    if values.is_empty() {
        return None;
    }
    evaluate(node, &values)
}

impl OptimizerPass for ConstantFold {
    fn name(&self) -> &'static str {
        "ConstantFold"
    }

    fn run(&self, graph: &mut Graph) -> ConvertResult<OptimizeResult> {
        let mut result = OptimizeResult::new();

        for id in graph.topological_order()? {
            let Some(node) = graph.node(id) else { continue };
            if !is_foldable(node.op_type()) || !node.is_converted() {
                continue;
            }
            let Some(value) = fold_node(graph, node) else { continue };
            let node = node.clone();

            let shape = Shape::known(value.dims().to_vec());
            let dtype = value.dtype();
            graph.replace_node(
                id,
                NewNode::new("Const")
                    .attr("value", value)
                    .shapes(vec![shape])
                    .dtypes(vec![dtype]),
            )?;
            debug!("folded {} ({})", node.name(), node.op_type());
            result.record(node.name());

            for input in node.inputs() {
                let Some(producer) = graph.producer(input) else { continue };
                let removable = graph.node(producer).is_some_and(|p| {
                    p.is_op("Const") && p.outputs().iter().all(|o| !graph.is_used(o))
                });
                if removable {
                    let removed = graph.remove_node(producer);
                    result.record_removal(removed.name());
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::tensor_proto::DataType;

    fn fold(graph: &mut Graph) -> OptimizeResult {
        ConstantFold::new().run(graph).unwrap()
    }

    #[test]
    fn test_add_of_constants() {
        let mut graph = Graph::new(13);
        graph.make_const("a", TensorValue::scalar_f32(2.0)).unwrap();
        graph.make_const("b", TensorValue::scalar_f32(3.0)).unwrap();
        graph
            .add_node(NewNode::new("Add").name("sum").inputs(["a", "b"]))
            .unwrap();
        graph.set_outputs(vec!["sum:0".to_string()]);

        let result = fold(&mut graph);
        assert_eq!(result.nodes_changed, 1);
        assert_eq!(result.nodes_removed, 2);

        let node = graph.node_by_name("sum").unwrap();
        assert_eq!(node.op_type(), "Const");
        assert_eq!(node.outputs(), &["sum:0".to_string()]);
        assert_eq!(graph.const_value("sum:0").unwrap().as_f32s(), Some(vec![5.0]));
        assert!(!graph.has_node("a"));
        assert!(!graph.has_node("b"));
    }

    #[test]
    fn test_shared_input_kept() {
        let mut graph = Graph::new(13);
        graph.add_input("x");
        graph.make_const("a", TensorValue::vec_i64(vec![1, 2])).unwrap();
        graph
            .add_node(NewNode::new("Neg").name("neg").input("a"))
            .unwrap();
        graph
            .add_node(NewNode::new("Mul").name("mul").inputs(["x", "a"]))
            .unwrap();
        graph.set_outputs(vec!["neg:0".to_string(), "mul:0".to_string()]);

        fold(&mut graph);
        assert_eq!(graph.const_value("neg:0").unwrap().as_i64s(), Some(vec![-1, -2]));
        assert!(graph.has_node("a"));
        assert_eq!(graph.node_by_name("mul").unwrap().op_type(), "Mul");
    }

    #[test]
    fn test_broadcast_and_chain() {
        let mut graph = Graph::new(13);
        graph
            .make_const("m", TensorValue::new(vec![2, 2], TensorData::Float(vec![1.0, 2.0, 3.0, 4.0])).unwrap())
            .unwrap();
        graph.make_const("row", TensorValue::vec_f32(vec![10.0, 20.0])).unwrap();
        graph
            .add_node(NewNode::new("Add").name("add").inputs(["m", "row"]))
            .unwrap();
        graph
            .add_node(NewNode::new("Transpose").name("t").input("add:0").attr("perm", vec![1i64, 0]))
            .unwrap();
        graph.set_outputs(vec!["t:0".to_string()]);

        fold(&mut graph);
        let value = graph.const_value("t:0").unwrap();
        assert_eq!(value.dims(), &[2, 2]);
        assert_eq!(value.as_f32s(), Some(vec![11.0, 13.0, 22.0, 24.0]));
        assert!(!graph.has_node("add"));
    }

    #[test]
    fn test_integer_division_by_zero_left() {
        let mut graph = Graph::new(13);
        graph.make_const("a", TensorValue::scalar_i64(4)).unwrap();
        graph.make_const("z", TensorValue::scalar_i64(0)).unwrap();
        graph
            .add_node(NewNode::new("Div").name("div").inputs(["a", "z"]))
            .unwrap();
        graph.set_outputs(vec!["div:0".to_string()]);

        assert!(!fold(&mut graph).changed());
        assert_eq!(graph.node_by_name("div").unwrap().op_type(), "Div");
    }

    #[test]
    fn test_integer_overflow_left() {
        for (op, a, b) in [("Add", i64::MAX, 1), ("Mul", i64::MAX, 2), ("Div", i64::MIN, -1)] {
            let mut graph = Graph::new(13);
            graph.make_const("a", TensorValue::scalar_i64(a)).unwrap();
            graph.make_const("b", TensorValue::scalar_i64(b)).unwrap();
            graph
                .add_node(NewNode::new(op).name("op").inputs(["a", "b"]))
                .unwrap();
            graph.set_outputs(vec!["op:0".to_string()]);

            assert!(!fold(&mut graph).changed(), "{} folded", op);
            assert_eq!(graph.node_by_name("op").unwrap().op_type(), op);
            assert!(graph.has_node("a"));
        }
    }

    #[test]
    fn test_integer_arith_in_range() {
        let mut graph = Graph::new(13);
        graph.make_const("a", TensorValue::vec_i64(vec![7, -9])).unwrap();
        graph.make_const("b", TensorValue::scalar_i64(2)).unwrap();
        graph
            .add_node(NewNode::new("Div").name("div").inputs(["a", "b"]))
            .unwrap();
        graph.set_outputs(vec!["div:0".to_string()]);

        fold(&mut graph);
        assert_eq!(graph.const_value("div:0").unwrap().as_i64s(), Some(vec![3, -4]));
    }

    #[test]
    fn test_shape_of_known_tensor() {
        let mut graph = Graph::new(13);
        graph.add_input("x");
        graph.set_shape("x", Shape::known(vec![2, 3]));
        graph.set_dtype("x", DataType::Float);
        graph
            .add_node(NewNode::new("Shape").name("shape").input("x"))
            .unwrap();
        graph.set_outputs(vec!["shape:0".to_string()]);

        fold(&mut graph);
        assert_eq!(graph.const_value("shape:0").unwrap().as_i64s(), Some(vec![2, 3]));
    }

    #[test]
    fn test_shape_ops() {
        let base = TensorValue::new(vec![1, 2, 3], TensorData::Int32(vec![1, 2, 3, 4, 5, 6])).unwrap();
        let mut graph = Graph::new(11);
        graph
            .add_node(NewNode::new("Squeeze").name("sq").attr("axes", vec![0i64]))
            .unwrap();
        let node = graph.node_by_name("sq").unwrap();
        assert_eq!(evaluate(node, &[&base]).unwrap().dims(), &[2, 3]);

        let shape = TensorValue::vec_i64(vec![0, -1]);
        let mut graph = Graph::new(13);
        graph.add_node(NewNode::new("Reshape").name("r")).unwrap();
        let node = graph.node_by_name("r").unwrap();
        assert_eq!(evaluate(node, &[&base, &shape]).unwrap().dims(), &[1, 6]);

        let indices = TensorValue::vec_i64(vec![2, -3]);
        graph
            .add_node(NewNode::new("Gather").name("g").attr("axis", 2i64))
            .unwrap();
        let node = graph.node_by_name("g").unwrap();
        let gathered = evaluate(node, &[&base, &indices]).unwrap();
        assert_eq!(gathered.dims(), &[1, 2, 2]);
        assert_eq!(gathered.as_i64s(), Some(vec![3, 1, 6, 4]));

        graph
            .add_node(NewNode::new("Concat").name("c").attr("axis", 1i64))
            .unwrap();
        let node = graph.node_by_name("c").unwrap();
        let joined = evaluate(node, &[&base, &base]).unwrap();
        assert_eq!(joined.dims(), &[1, 4, 3]);
        assert_eq!(joined.as_i64s(), Some(vec![1, 2, 3, 4, 5, 6, 1, 2, 3, 4, 5, 6]));
    }
}
