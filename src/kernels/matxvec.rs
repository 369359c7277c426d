//! Row-by-vector accumulation kernel.
//!
//! The same 2x2-unrolled loop serves the convolution window (read circularly out of the
//! ring buffer) and the standalone dense matrix-times-vectors kernels.

use crate::config::{Backend, KernelConfig, RoundingMode};
use crate::error::{KernelError, Result};
use crate::kernels::element::{BiasElement, Quantized};
use crate::kernels::lanes::{DotBackend, ScalarLanes, UnrolledLanes};
use crate::kernels::quantization::{requantize, requantize_x2, require_symmetric, QuantParams};
use crate::kernels::ring::RingBuffer;

/// Rows of the left-hand operand, each split into the same number of segments.
pub trait WindowSource {
    type Elem: Quantized;
    fn rows(&self) -> usize;
    fn segments(&self) -> usize;
    fn segment(&self, row: usize, seg: usize) -> &[Self::Elem];
    /// Added to every element before multiplication.
    fn zero_bias(&self) -> i32;
}

/// Weight vectors, segmented to line up with a [`WindowSource`].
pub trait WeightSource {
    type Elem: Quantized;
    fn vec_count(&self) -> usize;
    fn segment(&self, vec: usize, seg: usize) -> &[Self::Elem];
    fn zero_bias(&self) -> i32;
}

/// Output rows of one convolution column read straight from the ring buffer.
///
/// Row `r`, segment `(kh, kw)` is line `kw`, sub-row `r * row_step + kh`, first
/// `channels` values. Zero biases are already folded into the cached values.
pub struct RingWindow<'r, 'a> {
    pub ring: &'r RingBuffer<'a>,
    pub rows: usize,
    pub row_step: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub channel_pad: usize,
    pub channels: usize,
}

impl WindowSource for RingWindow<'_, '_> {
    type Elem = i16;
    fn rows(&self) -> usize {
        self.rows
    }
    fn segments(&self) -> usize {
        self.kernel_h * self.kernel_w
    }
    #[inline(always)]
    fn segment(&self, row: usize, seg: usize) -> &[i16] {
        let (kh, kw) = (seg / self.kernel_w, seg % self.kernel_w);
        let element = (row * self.row_step + kh) * self.channel_pad;
        self.ring.segment(kw, element, self.channels)
    }
    fn zero_bias(&self) -> i32 {
        0
    }
}

/// Row-major matrix with an arbitrary row stride, one segment per row.
pub struct DenseMatrix<'a, M> {
    pub data: &'a [M],
    pub rows: usize,
    pub cols: usize,
    pub row_stride: usize,
    pub zero_bias: i32,
}

impl<M: Quantized> WindowSource for DenseMatrix<'_, M> {
    type Elem = M;
    fn rows(&self) -> usize {
        self.rows
    }
    fn segments(&self) -> usize {
        1
    }
    #[inline(always)]
    fn segment(&self, row: usize, _seg: usize) -> &[M] {
        let start = row * self.row_stride;
        &self.data[start..start + self.cols]
    }
    fn zero_bias(&self) -> i32 {
        self.zero_bias
    }
}

/// Convolution weights `[out_channels, kernel_h, kernel_w, kernel_channels]` for one group.
pub struct KernelWeights<'a, Wt> {
    pub data: &'a [Wt],
    /// Element offset of the group's first output channel.
    pub base: usize,
    pub strides: [usize; 4],
    pub vec_count: usize,
    pub kernel_w: usize,
    pub channels: usize,
    pub zero_bias: i32,
}

impl<Wt: Quantized> WeightSource for KernelWeights<'_, Wt> {
    type Elem = Wt;
    fn vec_count(&self) -> usize {
        self.vec_count
    }
    #[inline(always)]
    fn segment(&self, vec: usize, seg: usize) -> &[Wt] {
        let (kh, kw) = (seg / self.kernel_w, seg % self.kernel_w);
        let start = self.base + vec * self.strides[0] + kh * self.strides[1] + kw * self.strides[2];
        &self.data[start..start + self.channels]
    }
    fn zero_bias(&self) -> i32 {
        self.zero_bias
    }
}

/// Contiguous weight vectors placed `vec_offset` elements apart.
pub struct DenseVectors<'a, Wt> {
    pub data: &'a [Wt],
    pub cols: usize,
    pub vec_offset: usize,
    pub vec_count: usize,
    pub zero_bias: i32,
}

impl<Wt: Quantized> WeightSource for DenseVectors<'_, Wt> {
    type Elem = Wt;
    fn vec_count(&self) -> usize {
        self.vec_count
    }
    #[inline(always)]
    fn segment(&self, vec: usize, _seg: usize) -> &[Wt] {
        let start = vec * self.vec_offset;
        &self.data[start..start + self.cols]
    }
    fn zero_bias(&self) -> i32 {
        self.zero_bias
    }
}

/// Where result `(row, vec)` lands: `base + row * row_step + vec * vec_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLayout {
    pub base: usize,
    pub row_step: usize,
    pub vec_step: usize,
}

impl OutputLayout {
    #[inline(always)]
    pub fn index(&self, row: usize, vec: usize) -> usize {
        self.base + row * self.row_step + vec * self.vec_step
    }
}

/// Dot products, bias, requantization and output stage for one tile.
///
/// `quant.output_scale` and `bias` are indexed by the tile's local channel number.
pub(crate) struct Accumulator<'q, 'b, D, B> {
    pub backend: D,
    pub quant: QuantParams<'q>,
    pub bias: Option<&'b [B]>,
    pub mode: RoundingMode,
}

impl<D: DotBackend, B: BiasElement> Accumulator<'_, '_, D, B> {
    #[inline(always)]
    fn bias(&self, vec: usize) -> i64 {
        self.bias.map_or(0, |b| b[vec].to_i64())
    }

    #[inline(always)]
    fn store<O: Quantized>(&self, out: &mut [O], idx: usize, requantized: i32) {
        out[idx] = O::from_i32_saturating(self.quant.finish(requantized));
    }

    fn single<S: WindowSource, Wt: WeightSource>(&self, window: &S, weights: &Wt, row: usize, vec: usize) -> i64 {
        let mut acc = self.bias(vec);
        for s in 0..window.segments() {
            acc += self.backend.dot(
                window.segment(row, s),
                window.zero_bias(),
                weights.segment(vec, s),
                weights.zero_bias(),
            );
        }
        acc
    }

    fn finish_single<O: Quantized>(&self, out: &mut [O], layout: OutputLayout, row: usize, vec: usize, acc: i64) {
        let (m, sh) = self.quant.output_scale.get(vec);
        self.store(out, layout.index(row, vec), requantize(acc, m, sh, self.mode));
    }

    /// Every row against every vector, two rows and two channels per pass.
    pub fn run<S: WindowSource, Wt: WeightSource, O: Quantized>(
        &self,
        window: &S,
        weights: &Wt,
        out: &mut [O],
        layout: OutputLayout,
    ) {
        let rows = window.rows();
        let vecs = weights.vec_count();
        let segs = window.segments();
        let (a_bias, b_bias) = (window.zero_bias(), weights.zero_bias());
        let mut r = 0;
        while r + 2 <= rows {
            let mut v = 0;
            while v + 2 <= vecs {
                let (b0, b1) = (self.bias(v), self.bias(v + 1));
                let mut acc = [[b0, b1], [b0, b1]];
                for s in 0..segs {
                    let d = self.backend.dot_2x2(
                        [window.segment(r, s), window.segment(r + 1, s)],
                        a_bias,
                        [weights.segment(v, s), weights.segment(v + 1, s)],
                        b_bias,
                    );
                    for i in 0..2 {
                        acc[i][0] += d[i][0];
                        acc[i][1] += d[i][1];
                    }
                }
                let (m0, s0) = self.quant.output_scale.get(v);
                let (m1, s1) = self.quant.output_scale.get(v + 1);
                for (i, pair) in acc.iter().enumerate() {
                    let q = requantize_x2(*pair, [m0, m1], [s0, s1], self.mode);
                    self.store(out, layout.index(r + i, v), q[0]);
                    self.store(out, layout.index(r + i, v + 1), q[1]);
                }
                v += 2;
            }
            if v < vecs {
                for i in 0..2 {
                    let acc = self.single(window, weights, r + i, v);
                    self.finish_single(out, layout, r + i, v, acc);
                }
            }
            r += 2;
        }
        if r < rows {
            for v in 0..vecs {
                let acc = self.single(window, weights, r, v);
                self.finish_single(out, layout, r, v, acc);
            }
        }
    }

    /// Single-row, single-channel loop; `run` must agree with it bit for bit.
    pub fn run_reference<S: WindowSource, Wt: WeightSource, O: Quantized>(
        &self,
        window: &S,
        weights: &Wt,
        out: &mut [O],
        layout: OutputLayout,
    ) {
        for r in 0..window.rows() {
            for v in 0..weights.vec_count() {
                let acc = self.single(window, weights, r, v);
                self.finish_single(out, layout, r, v, acc);
            }
        }
    }

    /// Output of a window made only of padding: the requantized bias.
    pub fn run_bias_only<O: Quantized>(&self, rows: usize, vecs: usize, out: &mut [O], layout: OutputLayout) {
        for v in 0..vecs {
            let (m, sh) = self.quant.output_scale.get(v);
            let value = requantize(self.bias(v), m, sh, self.mode);
            for r in 0..rows {
                self.store(out, layout.index(r, v), value);
            }
        }
    }
}

/// Geometry of a standalone matrix-times-vectors call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatXVecShape {
    pub rows: usize,
    pub cols: usize,
    /// Elements between consecutive matrix rows.
    pub row_stride: usize,
    pub vec_count: usize,
    /// Elements between consecutive weight vectors.
    pub vec_offset: usize,
    /// Output elements between consecutive rows.
    pub out_offset: usize,
    /// Output elements between consecutive channels.
    pub out_stride: usize,
}

impl MatXVecShape {
    /// Dense layout: rows of `cols`, vectors of `cols`, output `[rows, vec_count]`.
    pub fn dense(rows: usize, cols: usize, vec_count: usize) -> Self {
        Self {
            rows,
            cols,
            row_stride: cols,
            vec_count,
            vec_offset: cols,
            out_offset: vec_count,
            out_stride: 1,
        }
    }

    fn validate(&self, matrix_len: usize, vectors_len: usize, output_len: usize) -> Result<()> {
        if self.rows == 0 || self.cols == 0 || self.vec_count == 0 {
            return Err(KernelError::InvalidShape(format!(
                "matxvec needs non-empty rows, cols and vectors, got {:?}",
                self
            )));
        }
        if self.row_stride < self.cols || self.vec_offset < self.cols {
            return Err(KernelError::InvalidShape(format!(
                "row_stride {} and vec_offset {} must cover {} columns",
                self.row_stride, self.vec_offset, self.cols
            )));
        }
        let last_row = (self.rows - 1)
            .checked_mul(self.row_stride)
            .and_then(|v| v.checked_add(self.cols));
        if last_row.map_or(true, |end| end > matrix_len) {
            return Err(KernelError::OutOfBounds(format!("matrix of {} elements", matrix_len)));
        }
        let last_vec = (self.vec_count - 1)
            .checked_mul(self.vec_offset)
            .and_then(|v| v.checked_add(self.cols));
        if last_vec.map_or(true, |end| end > vectors_len) {
            return Err(KernelError::OutOfBounds(format!("vectors of {} elements", vectors_len)));
        }
        let last_out = (self.rows - 1)
            .checked_mul(self.out_offset)
            .and_then(|r| (self.vec_count - 1).checked_mul(self.out_stride).and_then(|v| r.checked_add(v)));
        if last_out.map_or(true, |idx| idx >= output_len) {
            return Err(KernelError::OutOfBounds(format!("output of {} elements", output_len)));
        }
        Ok(())
    }
}

pub(crate) fn check_bias_len<B>(bias: Option<&[B]>, needed: usize) -> Result<()> {
    match bias {
        Some(b) if b.len() < needed => Err(KernelError::ParamLength {
            which: "bias",
            needed,
            got: b.len(),
        }),
        _ => Ok(()),
    }
}

/// Generic matrix-times-vectors kernel: `output[r * out_offset + v * out_stride]` is
/// row `r` of `matrix` dotted with vector `v`, plus bias, requantized.
pub fn matxvec<M: Quantized, Wt: Quantized, B: BiasElement, O: Quantized>(
    output: &mut [O],
    matrix: &[M],
    vectors: &[Wt],
    bias: Option<&[B]>,
    shape: MatXVecShape,
    quant: &QuantParams<'_>,
    config: KernelConfig,
) -> Result<()> {
    log::debug!(
        "matxvec rows={} cols={} vecs={} backend={} rounding={}",
        shape.rows,
        shape.cols,
        shape.vec_count,
        config.backend,
        config.rounding
    );
    let checked = shape
        .validate(matrix.len(), vectors.len(), output.len())
        .and_then(|_| check_bias_len(bias, shape.vec_count))
        .and_then(|_| quant.validate::<M, Wt, O>(shape.vec_count));
    if let Err(e) = checked {
        log::debug!("matxvec rejected: {}", e);
        return Err(e);
    }

    let window = DenseMatrix {
        data: matrix,
        rows: shape.rows,
        cols: shape.cols,
        row_stride: shape.row_stride,
        zero_bias: quant.input_zero_bias,
    };
    let weights = DenseVectors {
        data: vectors,
        cols: shape.cols,
        vec_offset: shape.vec_offset,
        vec_count: shape.vec_count,
        zero_bias: quant.kernel_zero_bias,
    };
    let layout = OutputLayout {
        base: 0,
        row_step: shape.out_offset,
        vec_step: shape.out_stride,
    };
    match config.backend {
        Backend::Scalar => Accumulator {
            backend: ScalarLanes,
            quant: *quant,
            bias,
            mode: config.rounding,
        }
        .run(&window, &weights, output, layout),
        Backend::Unrolled => Accumulator {
            backend: UnrolledLanes,
            quant: *quant,
            bias,
            mode: config.rounding,
        }
        .run(&window, &weights, output, layout),
    }
    Ok(())
}

/// `u8` matrix, `u8` vectors, per-tensor scale, `u8` output. The bias is mandatory.
pub fn matxvec_asym8xasym8(
    output: &mut [u8],
    matrix: &[u8],
    vectors: &[u8],
    bias: Option<&[i32]>,
    shape: MatXVecShape,
    quant: &QuantParams<'_>,
    config: KernelConfig,
) -> Result<()> {
    if bias.is_none() {
        log::debug!("matxvec_asym8xasym8 rejected: missing bias");
        return Err(KernelError::MissingBias);
    }
    if quant.output_scale.is_per_channel() {
        return Err(KernelError::InvalidShape(
            "asym8xasym8 takes a per-tensor output scale".to_string(),
        ));
    }
    matxvec(output, matrix, vectors, bias, shape, quant, config)
}

/// `i8` matrix, symmetric `i8` vectors, per-channel scale, `i8` output.
pub fn matxvec_per_chan_sym8sxasym8s(
    output: &mut [i8],
    matrix: &[i8],
    vectors: &[i8],
    bias: Option<&[i32]>,
    shape: MatXVecShape,
    quant: &QuantParams<'_>,
    config: KernelConfig,
) -> Result<()> {
    require_symmetric("kernel", quant.kernel_zero_bias)?;
    matxvec(output, matrix, vectors, bias, shape, quant, config)
}

/// `i16` matrix, `i8` vectors, 64-bit bias, per-channel scale, `i16` output. Fully symmetric.
pub fn matxvec_sym8sxsym16s(
    output: &mut [i16],
    matrix: &[i16],
    vectors: &[i8],
    bias: Option<&[i64]>,
    shape: MatXVecShape,
    quant: &QuantParams<'_>,
    config: KernelConfig,
) -> Result<()> {
    require_symmetric("kernel", quant.kernel_zero_bias)?;
    matxvec(output, matrix, vectors, bias, shape, quant, config)
}
