//! Portable batch arithmetic for the accumulation kernels.
//!
//! Every backend computes `Σ (a[i] + a_bias) * (b[i] + b_bias)` exactly in 64 bits;
//! they differ only in how the loop is laid out for the compiler.

use crate::kernels::element::Quantized;

pub const LANES: usize = 8;

#[inline(always)]
fn widen_mul<A: Quantized, B: Quantized>(a: A, a_bias: i32, b: B, b_bias: i32) -> i64 {
    (a.to_i32() + a_bias) as i64 * (b.to_i32() + b_bias) as i64
}

pub trait DotBackend: Copy + Send + Sync + 'static {
    const NAME: &'static str;

    fn dot<A: Quantized, B: Quantized>(self, a: &[A], a_bias: i32, b: &[B], b_bias: i32) -> i64;

    /// Two matrix rows against two weight vectors: `out[row][vec]`.
    #[inline(always)]
    fn dot_2x2<A: Quantized, B: Quantized>(
        self,
        a: [&[A]; 2],
        a_bias: i32,
        b: [&[B]; 2],
        b_bias: i32,
    ) -> [[i64; 2]; 2] {
        [
            [self.dot(a[0], a_bias, b[0], b_bias), self.dot(a[0], a_bias, b[1], b_bias)],
            [self.dot(a[1], a_bias, b[0], b_bias), self.dot(a[1], a_bias, b[1], b_bias)],
        ]
    }
}

/// Reference element-at-a-time loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarLanes;

impl DotBackend for ScalarLanes {
    const NAME: &'static str = "scalar";

    #[inline(always)]
    fn dot<A: Quantized, B: Quantized>(self, a: &[A], a_bias: i32, b: &[B], b_bias: i32) -> i64 {
        debug_assert_eq!(a.len(), b.len());
        let mut acc = 0i64;
        for (&x, &w) in a.iter().zip(b) {
            acc += widen_mul(x, a_bias, w, b_bias);
        }
        acc
    }
}

/// Fixed-width lane arrays the compiler can keep in vector registers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnrolledLanes;

impl DotBackend for UnrolledLanes {
    const NAME: &'static str = "unrolled";

    #[inline(always)]
    fn dot<A: Quantized, B: Quantized>(self, a: &[A], a_bias: i32, b: &[B], b_bias: i32) -> i64 {
        debug_assert_eq!(a.len(), b.len());
        let n = a.len().min(b.len());
        let (a, b) = (&a[..n], &b[..n]);
        let mut acc = [0i64; LANES];
        let a_chunks = a.chunks_exact(LANES);
        let b_chunks = b.chunks_exact(LANES);
        let (a_tail, b_tail) = (a_chunks.remainder(), b_chunks.remainder());
        for (ca, cb) in a_chunks.zip(b_chunks) {
            for l in 0..LANES {
                acc[l] += widen_mul(ca[l], a_bias, cb[l], b_bias);
            }
        }
        let mut sum: i64 = acc.iter().sum();
        for (&x, &w) in a_tail.iter().zip(b_tail) {
            sum += widen_mul(x, a_bias, w, b_bias);
        }
        sum
    }

    #[inline(always)]
    fn dot_2x2<A: Quantized, B: Quantized>(
        self,
        a: [&[A]; 2],
        a_bias: i32,
        b: [&[B]; 2],
        b_bias: i32,
    ) -> [[i64; 2]; 2] {
        let n = a[0].len();
        debug_assert!(a[1].len() == n && b[0].len() == n && b[1].len() == n);
        let (a0, a1, b0, b1) = (&a[0][..n], &a[1][..n], &b[0][..n], &b[1][..n]);
        let mut acc = [[[0i64; LANES]; 2]; 2];
        let full = n - n % LANES;
        let mut i = 0;
        while i < full {
            for l in 0..LANES {
                let x0 = a0[i + l].to_i32() + a_bias;
                let x1 = a1[i + l].to_i32() + a_bias;
                let w0 = b0[i + l].to_i32() + b_bias;
                let w1 = b1[i + l].to_i32() + b_bias;
                acc[0][0][l] += x0 as i64 * w0 as i64;
                acc[0][1][l] += x0 as i64 * w1 as i64;
                acc[1][0][l] += x1 as i64 * w0 as i64;
                acc[1][1][l] += x1 as i64 * w1 as i64;
            }
            i += LANES;
        }
        let mut out = [[0i64; 2]; 2];
        for r in 0..2 {
            for v in 0..2 {
                out[r][v] = acc[r][v].iter().sum();
            }
        }
        for j in full..n {
            let x0 = a0[j].to_i32() + a_bias;
            let x1 = a1[j].to_i32() + a_bias;
            let w0 = b0[j].to_i32() + b_bias;
            let w1 = b1[j].to_i32() + b_bias;
            out[0][0] += x0 as i64 * w0 as i64;
            out[0][1] += x0 as i64 * w1 as i64;
            out[1][0] += x1 as i64 * w0 as i64;
            out[1][1] += x1 as i64 * w1 as i64;
        }
        out
    }
}
