//! Benchmark for end-to-end conversion
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use frozen2onnx::convert::{convert, ConvertOptions, FrozenGraph, SourceNode};
use frozen2onnx::proto::tensor_proto::DataType;
use frozen2onnx::tensor::{TensorData, TensorValue};

/// A stack of conv/relu blocks in NHWC layout
fn conv_stack(depth: usize) -> FrozenGraph {
    let mut source = FrozenGraph::new();
    source.push(SourceNode::new("image", "Placeholder").output(vec![1, 32, 32, 8], DataType::Float));

    let mut prev = "image:0".to_string();
    for i in 0..depth {
        let weights = TensorValue::new(vec![3, 3, 8, 8], TensorData::Float(vec![0.01; 576]))
            .expect("weights shape matches data");
        source
            .push(SourceNode::new(format!("w{}", i), "Const").attr("value", weights).untyped_output())
            .push(
                SourceNode::new(format!("conv{}", i), "Conv2D")
                    .inputs([prev.clone(), format!("w{}:0", i)])
                    .attr("strides", vec![1i64, 1, 1, 1])
                    .attr("padding", "SAME")
                    .attr("T", DataType::Float)
                    .untyped_output(),
            )
            .push(
                SourceNode::new(format!("relu{}", i), "Relu")
                    .input(format!("conv{}:0", i))
                    .untyped_output(),
            );
        prev = format!("relu{}:0", i);
    }
    source
}

fn convert_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("convert");
    for depth in [4usize, 16, 64] {
        let source = conv_stack(depth);
        let output = format!("relu{}:0", depth - 1);
        group.bench_with_input(BenchmarkId::new("conv_stack", depth), &source, |b, source| {
            b.iter(|| {
                let conversion = convert(
                    black_box(source),
                    &["image:0"],
                    &[output.as_str()],
                    ConvertOptions::default(),
                )
                .expect("conversion succeeds");
                black_box(conversion.report.nodes_emitted())
            })
        });
    }
    group.finish();
}

fn optimizer_benchmark(c: &mut Criterion) {
    let source = conv_stack(16);
    c.bench_function("convert/conv_stack_16_unoptimized", |b| {
        b.iter(|| {
            convert(
                black_box(&source),
                &["image:0"],
                &["relu15:0"],
                ConvertOptions::default().optimize(false),
            )
            .expect("conversion succeeds")
        })
    });
}

criterion_group!(benches, convert_benchmark, optimizer_benchmark);
criterion_main!(benches);
