//! Kernel-level benchmarks for qconv
//!
//! Run with: cargo bench --bench kernels

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use qconv::kernels::*;
use qconv::{Backend, KernelConfig, RoundingMode, TensorView, TensorViewMut};

/// Deterministic pseudo-random bytes so runs are comparable.
fn lcg_bytes(seed: u32, len: usize) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        })
        .collect()
}

fn lcg_i8(seed: u32, len: usize) -> Vec<i8> {
    lcg_bytes(seed, len).into_iter().map(|b| b as i8).collect()
}

fn out_extent(input: usize, kernel: usize, stride: usize, dilation: usize, pad: usize) -> usize {
    (input + 2 * pad - (kernel - 1) * dilation - 1) / stride + 1
}

// ============================================================================
// Conv2d Benchmarks
// ============================================================================

fn bench_conv2d(c: &mut Criterion) {
    let mut group = c.benchmark_group("conv2d_std");

    // (H, W, C_in, C_out, K, stride, dilation)
    let shapes = [
        // keyword-spotting front ends
        (49, 10, 1, 64, 3, 1, 1),
        (25, 5, 64, 64, 3, 1, 1),
        // downsampling and dilated context
        (32, 32, 16, 32, 3, 2, 1),
        (32, 32, 16, 16, 3, 1, 2),
        // pointwise
        (16, 16, 64, 64, 1, 1, 1),
    ];

    for &(h, w, cin, cout, k, stride, dilation) in &shapes {
        let pad = (k - 1) * dilation / 2;
        let params = Conv2dParams::default()
            .with_stride(stride, stride)
            .with_padding(pad, pad)
            .with_dilation(dilation, dilation);
        let oh = out_extent(h, k, stride, dilation, pad);
        let ow = out_extent(w, k, stride, dilation, pad);
        let in_shape = [1, h, w, cin];
        let kernel_shape = [cout, k, k, cin];
        let out_shape = [1, oh, ow, cout];

        let input_data = lcg_i8(1, h * w * cin);
        let kernel_data = lcg_i8(2, cout * k * k * cin);
        let bias: Vec<i32> = (0..cout as i32).map(|i| i * 37 - 500).collect();
        let multipliers = vec![1_518_500_250i32; cout];
        let shifts = vec![-8i32; cout];
        let quant = QuantParams::per_channel(&multipliers, &shifts, -128, 127)
            .with_input_zero_bias(5)
            .with_output_zero_bias(-3);

        let input = TensorView::new(&input_data, in_shape);
        let kernel = TensorView::new(&kernel_data, kernel_shape);
        let mut out_buf = vec![0i8; oh * ow * cout];
        let mut scratch = match conv2d_std_scratch_size(in_shape, kernel_shape, out_shape, &params, Precision::Asym8s) {
            Ok(bytes) => vec![0u8; bytes],
            Err(e) => panic!("bench geometry rejected: {}", e),
        };

        let label = format!("{}x{}x{}->{}_k{}s{}d{}", h, w, cin, cout, k, stride, dilation);
        group.throughput(Throughput::Elements((oh * ow * cout * k * k * cin) as u64));
        for backend in [Backend::Scalar, Backend::Unrolled] {
            let config = KernelConfig::default().with_backend(backend);
            group.bench_with_input(BenchmarkId::new(backend.to_string(), &label), &label, |bencher, _| {
                bencher.iter(|| {
                    let mut output = TensorViewMut::new(&mut out_buf, out_shape);
                    let _ = conv2d_std_per_chan_sym8sxasym8s(
                        &mut output,
                        black_box(&input),
                        black_box(&kernel),
                        Some(&bias[..]),
                        &params,
                        &quant,
                        config,
                        &mut scratch,
                    );
                });
            });
        }
    }

    group.finish();
}

fn bench_conv2d_sym16(c: &mut Criterion) {
    let mut group = c.benchmark_group("conv2d_std_sym16");

    let (h, w, cin, cout, k) = (32, 32, 8, 16, 3);
    let params = Conv2dParams::default().with_padding(1, 1);
    let in_shape = [1, h, w, cin];
    let kernel_shape = [cout, k, k, cin];
    let out_shape = [1, h, w, cout];

    let input_data: Vec<i16> = lcg_bytes(3, h * w * cin * 2)
        .chunks_exact(2)
        .map(|p| i16::from_le_bytes([p[0], p[1]]))
        .collect();
    let kernel_data = lcg_i8(4, cout * k * k * cin);
    let bias: Vec<i64> = (0..cout as i64).map(|i| i * 1000).collect();
    let multipliers = vec![1_200_000_000i32; cout];
    let shifts = vec![-12i32; cout];
    let quant = QuantParams::per_channel(&multipliers, &shifts, i16::MIN as i32, i16::MAX as i32);

    let input = TensorView::new(&input_data, in_shape);
    let kernel = TensorView::new(&kernel_data, kernel_shape);
    let mut out_buf = vec![0i16; h * w * cout];
    let mut scratch = match conv2d_std_scratch_size(in_shape, kernel_shape, out_shape, &params, Precision::Sym16s) {
        Ok(bytes) => vec![0u8; bytes],
        Err(e) => panic!("bench geometry rejected: {}", e),
    };

    group.throughput(Throughput::Elements((h * w * cout * k * k * cin) as u64));
    for rounding in [RoundingMode::Double, RoundingMode::Single] {
        let config = KernelConfig::default().with_rounding(rounding);
        group.bench_function(BenchmarkId::new("rounding", rounding.to_string()), |bencher| {
            bencher.iter(|| {
                let mut output = TensorViewMut::new(&mut out_buf, out_shape);
                let _ = conv2d_std_sym8sxsym16s(
                    &mut output,
                    black_box(&input),
                    black_box(&kernel),
                    Some(&bias[..]),
                    &params,
                    &quant,
                    config,
                    &mut scratch,
                );
            });
        });
    }

    group.finish();
}

// ============================================================================
// MatXVec Benchmarks
// ============================================================================

fn bench_matxvec(c: &mut Criterion) {
    let mut group = c.benchmark_group("matxvec");

    // (rows, cols, vectors) - fully connected layers
    let sizes = [(1, 256, 64), (4, 512, 128), (16, 640, 12), (49, 160, 64)];

    for &(rows, cols, vecs) in &sizes {
        let matrix = lcg_bytes(5, rows * cols);
        let vectors = lcg_bytes(6, vecs * cols);
        let bias: Vec<i32> = (0..vecs as i32).map(|i| i * 11).collect();
        let quant = QuantParams::per_tensor(1_518_500_250, -9, 0, 255)
            .with_input_zero_bias(-128)
            .with_kernel_zero_bias(-120)
            .with_output_zero_bias(128);
        let shape = MatXVecShape::dense(rows, cols, vecs);
        let mut out_buf = vec![0u8; rows * vecs];

        group.throughput(Throughput::Elements((rows * cols * vecs) as u64));
        for backend in [Backend::Scalar, Backend::Unrolled] {
            let config = KernelConfig::default().with_backend(backend);
            group.bench_with_input(
                BenchmarkId::new(backend.to_string(), format!("{}x{}x{}", rows, cols, vecs)),
                &shape,
                |bencher, shape| {
                    bencher.iter(|| {
                        let _ = matxvec_asym8xasym8(
                            &mut out_buf,
                            black_box(&matrix),
                            black_box(&vectors),
                            Some(&bias[..]),
                            *shape,
                            &quant,
                            config,
                        );
                    });
                },
            );
        }
    }

    group.finish();
}

// ============================================================================
// Requantization Benchmarks
// ============================================================================

fn bench_requantize(c: &mut Criterion) {
    let mut group = c.benchmark_group("requantize");

    let accs: Vec<i64> = lcg_bytes(7, 4096 * 4)
        .chunks_exact(4)
        .map(|p| i32::from_le_bytes([p[0], p[1], p[2], p[3]]) as i64 >> 8)
        .collect();
    group.throughput(Throughput::Elements(accs.len() as u64));

    for rounding in [RoundingMode::Double, RoundingMode::Single] {
        group.bench_with_input(BenchmarkId::new("scalar", rounding.to_string()), &accs, |bencher, accs| {
            bencher.iter(|| {
                let mut sum = 0i32;
                for &acc in accs {
                    sum = sum.wrapping_add(requantize(black_box(acc), 1_518_500_250, -7, rounding));
                }
                sum
            });
        });
        group.bench_with_input(BenchmarkId::new("paired", rounding.to_string()), &accs, |bencher, accs| {
            bencher.iter(|| {
                let mut sum = 0i32;
                for pair in accs.chunks_exact(2) {
                    let [a, b] = requantize_x2(
                        black_box([pair[0], pair[1]]),
                        [1_518_500_250, 1_200_000_000],
                        [-7, -5],
                        rounding,
                    );
                    sum = sum.wrapping_add(a).wrapping_add(b);
                }
                sum
            });
        });
    }

    group.finish();
}

// ============================================================================
// Elementwise Benchmarks
// ============================================================================

fn bench_elementwise(c: &mut Criterion) {
    let mut group = c.benchmark_group("elm_mul_broadcast");

    let cases = [
        ("same_shape", [1, 32, 32, 16], [1, 32, 32, 16]),
        ("channel_scale", [1, 32, 32, 16], [1, 1, 1, 16]),
        ("row_x_col", [1, 64, 1, 64], [1, 1, 64, 64]),
    ];
    let (multiplier, shift) = quantize_multiplier(1.0 / 128.0);
    let params = ElementwiseParams::new(multiplier, shift, -128, 127).with_input_zero_biases(3, -2);

    for (name, shape_a, shape_b) in cases {
        let out_shape = [
            shape_a[0].max(shape_b[0]),
            shape_a[1].max(shape_b[1]),
            shape_a[2].max(shape_b[2]),
            shape_a[3].max(shape_b[3]),
        ];
        let a_data = lcg_i8(8, shape_a.iter().product());
        let b_data = lcg_i8(9, shape_b.iter().product());
        let a = TensorView::new(&a_data, shape_a);
        let b = TensorView::new(&b_data, shape_b);
        let mut out_buf = vec![0i8; out_shape.iter().product()];

        group.throughput(Throughput::Elements(out_buf.len() as u64));
        group.bench_function(name, |bencher| {
            bencher.iter(|| {
                let mut output = TensorViewMut::new(&mut out_buf, out_shape);
                let _ = elm_mul_broadcast_asym8sxasym8s(
                    &mut output,
                    black_box(&a),
                    black_box(&b),
                    &params,
                    KernelConfig::default(),
                );
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_conv2d,
    bench_conv2d_sym16,
    bench_matxvec,
    bench_requantize,
    bench_elementwise
);
criterion_main!(benches);
