// Shared helpers for the integration suites: deterministic data and a direct,
// unbuffered reference convolution.
#![allow(dead_code)]

use qconv::kernels::{requantize, BiasElement, Conv2dParams, Quantized};
use qconv::RoundingMode;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1)
    }
    pub fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 32) as u32
    }
    /// Uniform in `[lo, hi]`.
    pub fn range(&mut self, lo: i64, hi: i64) -> i64 {
        lo + (self.next_u32() as i64) % (hi - lo + 1)
    }
    pub fn below(&mut self, n: usize) -> usize {
        self.next_u32() as usize % n
    }
    pub fn fill<T: Quantized>(&mut self, len: usize) -> Vec<T> {
        (0..len)
            .map(|_| T::from_i32_saturating(self.range(T::MIN as i64, T::MAX as i64) as i32))
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConvCase {
    pub in_shape: [usize; 4],
    pub kernel_shape: [usize; 4],
    pub out_shape: [usize; 4],
    pub params: Conv2dParams,
}

impl ConvCase {
    /// Output extent for the given trailing padding.
    pub fn out_extent(input: usize, kernel: usize, stride: usize, dilation: usize, pad_lo: usize, pad_hi: usize) -> usize {
        let reach = (kernel - 1) * dilation + 1;
        (input + pad_lo + pad_hi - reach) / stride + 1
    }

    /// Random geometry; padding may exceed the kernel so pad-only columns show up.
    pub fn random(rng: &mut Lcg, allow_groups: bool) -> Self {
        loop {
            let groups = if allow_groups { 1 + rng.below(3) } else { 1 };
            let kernel_channels = 1 + rng.below(6);
            let kernels_per_group = 1 + rng.below(5);
            let in_h = 1 + rng.below(7);
            let in_w = 1 + rng.below(9);
            let kh = 1 + rng.below(3);
            let kw = 1 + rng.below(4);
            let params = Conv2dParams::default()
                .with_stride(1 + rng.below(3), 1 + rng.below(3))
                .with_padding(rng.below(4), rng.below(6))
                .with_dilation(1 + rng.below(3), 1 + rng.below(3));
            let pad_bottom = rng.below(4);
            let pad_right = rng.below(6);
            let reach_h = (kh - 1) * params.dilation_h + 1;
            let reach_w = (kw - 1) * params.dilation_w + 1;
            if in_h + params.pad_top + pad_bottom < reach_h || in_w + params.pad_left + pad_right < reach_w {
                continue;
            }
            let out_h = Self::out_extent(in_h, kh, params.stride_h, params.dilation_h, params.pad_top, pad_bottom);
            let out_w = Self::out_extent(in_w, kw, params.stride_w, params.dilation_w, params.pad_left, pad_right);
            let batch = 1 + rng.below(2);
            let out_channels = groups * kernels_per_group;
            return ConvCase {
                in_shape: [batch, in_h, in_w, groups * kernel_channels],
                kernel_shape: [out_channels, kh, kw, kernel_channels],
                out_shape: [batch, out_h, out_w, out_channels],
                params,
            };
        }
    }
}

/// Quantization inputs of the reference, with per-channel scales already expanded.
pub struct RefQuant<'a> {
    pub input_zero_bias: i32,
    pub kernel_zero_bias: i32,
    pub multipliers: &'a [i32],
    pub shifts: &'a [i32],
    pub output_zero_bias: i32,
    pub activation_min: i32,
    pub activation_max: i32,
}

/// Direct convolution: every tap is read from the input (or treated as zero padding).
pub fn reference_conv<I: Quantized, Wt: Quantized, B: BiasElement, O: Quantized>(
    input: &[I],
    case: &ConvCase,
    kernel: &[Wt],
    bias: Option<&[B]>,
    q: &RefQuant<'_>,
    mode: RoundingMode,
) -> Vec<O> {
    let [batch, in_h, in_w, in_c] = case.in_shape;
    let [out_c, kh, kw, kc] = case.kernel_shape;
    let [_, out_h, out_w, _] = case.out_shape;
    let p = &case.params;
    let groups = in_c / kc;
    let kpg = out_c / groups;
    let mut out = vec![O::default(); batch * out_h * out_w * out_c];
    for n in 0..batch {
        for oy in 0..out_h {
            for ox in 0..out_w {
                for oc in 0..out_c {
                    let g = oc / kpg;
                    let mut acc: i64 = bias.map_or(0, |b| b[oc].to_i64());
                    for ky in 0..kh {
                        for kx in 0..kw {
                            let iy = (oy * p.stride_h + ky * p.dilation_h) as isize - p.pad_top as isize;
                            let ix = (ox * p.stride_w + kx * p.dilation_w) as isize - p.pad_left as isize;
                            if iy < 0 || ix < 0 || iy >= in_h as isize || ix >= in_w as isize {
                                continue;
                            }
                            for c in 0..kc {
                                let x = input[((n * in_h + iy as usize) * in_w + ix as usize) * in_c + g * kc + c];
                                let w = kernel[((oc * kh + ky) * kw + kx) * kc + c];
                                acc += (x.to_i32() + q.input_zero_bias) as i64 * (w.to_i32() + q.kernel_zero_bias) as i64;
                            }
                        }
                    }
                    let scaled = requantize(acc, q.multipliers[oc], q.shifts[oc], mode);
                    let value = scaled
                        .saturating_add(q.output_zero_bias)
                        .clamp(q.activation_min, q.activation_max);
                    out[((n * out_h + oy) * out_w + ox) * out_c + oc] = O::from_i32_saturating(value);
                }
            }
        }
    }
    out
}

/// Per-channel scales small enough that outputs span the whole output range.
pub fn random_scales(rng: &mut Lcg, channels: usize, min_shift: i64, max_shift: i64) -> (Vec<i32>, Vec<i32>) {
    let multipliers = (0..channels).map(|_| rng.range(1 << 30, i32::MAX as i64) as i32).collect();
    let shifts = (0..channels).map(|_| rng.range(min_shift, max_shift) as i32).collect();
    (multipliers, shifts)
}
