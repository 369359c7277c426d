use crate::config::RoundingMode;
use crate::error::{KernelError, Result};
use crate::kernels::element::Quantized;

pub const MIN_SHIFT: i32 = -31;
pub const MAX_SHIFT: i32 = 31;

/// Output scale of a kernel: one `(multiplier, shift)` pair for the whole tensor or one per channel.
///
/// `multiplier` is a Q31 fraction; the real scale is `multiplier * 2^(shift - 31)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputScale<'a> {
    PerTensor { multiplier: i32, shift: i32 },
    PerChannel { multipliers: &'a [i32], shifts: &'a [i32] },
}

impl<'a> OutputScale<'a> {
    #[inline(always)]
    pub fn get(&self, channel: usize) -> (i32, i32) {
        match *self {
            OutputScale::PerTensor { multiplier, shift } => (multiplier, shift),
            OutputScale::PerChannel { multipliers, shifts } => (multipliers[channel], shifts[channel]),
        }
    }

    pub fn is_per_channel(&self) -> bool {
        matches!(self, OutputScale::PerChannel { .. })
    }

    /// Restricts a per-channel scale to `[start, start + len)`; per-tensor scales pass through.
    pub fn slice(&self, start: usize, len: usize) -> OutputScale<'a> {
        match *self {
            OutputScale::PerTensor { .. } => *self,
            OutputScale::PerChannel { multipliers, shifts } => OutputScale::PerChannel {
                multipliers: &multipliers[start..start + len],
                shifts: &shifts[start..start + len],
            },
        }
    }

    pub fn validate(&self, channels: usize) -> Result<()> {
        match *self {
            OutputScale::PerTensor { multiplier, shift } => check_pair(0, multiplier, shift),
            OutputScale::PerChannel { multipliers, shifts } => {
                if multipliers.len() < channels {
                    return Err(KernelError::ParamLength {
                        which: "output multipliers",
                        needed: channels,
                        got: multipliers.len(),
                    });
                }
                if shifts.len() < channels {
                    return Err(KernelError::ParamLength {
                        which: "output shifts",
                        needed: channels,
                        got: shifts.len(),
                    });
                }
                for ch in 0..channels {
                    check_pair(ch, multipliers[ch], shifts[ch])?;
                }
                Ok(())
            }
        }
    }
}

fn check_pair(channel: usize, multiplier: i32, shift: i32) -> Result<()> {
    if multiplier < 0 {
        return Err(KernelError::NegativeMultiplier { channel, multiplier });
    }
    if !(MIN_SHIFT..=MAX_SHIFT).contains(&shift) {
        return Err(KernelError::ShiftOutOfRange { channel, shift });
    }
    Ok(())
}

/// Quantization parameters shared by the convolution and accumulation kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantParams<'a> {
    /// Added to every input/matrix element (negated input zero point).
    pub input_zero_bias: i32,
    /// Added to every weight element (negated weight zero point).
    pub kernel_zero_bias: i32,
    pub output_scale: OutputScale<'a>,
    /// Added after requantization (output zero point).
    pub output_zero_bias: i32,
    pub activation_min: i32,
    pub activation_max: i32,
}

impl<'a> QuantParams<'a> {
    pub fn new(output_scale: OutputScale<'a>, activation_min: i32, activation_max: i32) -> Self {
        Self {
            input_zero_bias: 0,
            kernel_zero_bias: 0,
            output_scale,
            output_zero_bias: 0,
            activation_min,
            activation_max,
        }
    }
    pub fn per_tensor(multiplier: i32, shift: i32, activation_min: i32, activation_max: i32) -> Self {
        Self::new(OutputScale::PerTensor { multiplier, shift }, activation_min, activation_max)
    }
    pub fn per_channel(multipliers: &'a [i32], shifts: &'a [i32], activation_min: i32, activation_max: i32) -> Self {
        Self::new(OutputScale::PerChannel { multipliers, shifts }, activation_min, activation_max)
    }
    pub fn with_input_zero_bias(mut self, zero_bias: i32) -> Self {
        self.input_zero_bias = zero_bias;
        self
    }
    pub fn with_kernel_zero_bias(mut self, zero_bias: i32) -> Self {
        self.kernel_zero_bias = zero_bias;
        self
    }
    pub fn with_output_zero_bias(mut self, zero_bias: i32) -> Self {
        self.output_zero_bias = zero_bias;
        self
    }

    /// Checks every scalar and per-channel parameter against the element types in play.
    pub fn validate<I: Quantized, Wt: Quantized, O: Quantized>(&self, out_channels: usize) -> Result<()> {
        check_zero_bias::<I>("input", self.input_zero_bias)?;
        check_zero_bias::<Wt>("kernel", self.kernel_zero_bias)?;
        let (out_min, out_max) = if O::ASYMMETRIC { (O::MIN, O::MAX) } else { (0, 0) };
        if self.output_zero_bias < out_min || self.output_zero_bias > out_max {
            return Err(KernelError::ZeroBiasOutOfRange {
                which: "output",
                value: self.output_zero_bias,
                min: out_min,
                max: out_max,
            });
        }
        if self.activation_min > self.activation_max
            || self.activation_min < O::MIN
            || self.activation_max > O::MAX
        {
            return Err(KernelError::ActivationRange {
                min: self.activation_min,
                max: self.activation_max,
            });
        }
        self.output_scale.validate(out_channels)
    }

    #[inline(always)]
    pub fn finish(&self, requantized: i32) -> i32 {
        output_stage(requantized, self.output_zero_bias, self.activation_min, self.activation_max)
    }
}

pub(crate) fn check_zero_bias<T: Quantized>(which: &'static str, value: i32) -> Result<()> {
    let (min, max) = T::zero_bias_range();
    if value < min || value > max {
        return Err(KernelError::ZeroBiasOutOfRange { which, value, min, max });
    }
    Ok(())
}

pub(crate) fn require_symmetric(which: &'static str, value: i32) -> Result<()> {
    if value != 0 {
        return Err(KernelError::ZeroBiasOutOfRange { which, value, min: 0, max: 0 });
    }
    Ok(())
}

#[inline(always)]
pub fn saturate_i32(v: i128) -> i32 {
    v.clamp(i32::MIN as i128, i32::MAX as i128) as i32
}

/// `round(x / 2^exponent)`, ties away from zero.
#[inline(always)]
pub fn rounding_divide_by_pot(x: i128, exponent: u32) -> i128 {
    if exponent == 0 {
        return x;
    }
    let half = 1i128 << (exponent - 1);
    if x < 0 {
        -((half - x) >> exponent)
    } else {
        (x + half) >> exponent
    }
}

/// `round(x * multiplier / 2^31)`, ties away from zero, without narrowing `x`.
#[inline(always)]
pub fn rounding_doubling_high_mul(x: i128, multiplier: i32) -> i128 {
    rounding_divide_by_pot(x * multiplier as i128, 31)
}

#[inline(always)]
fn requantize_double(acc: i64, multiplier: i32, shift: i32) -> i32 {
    let left_shift = shift.max(0) as u32;
    let right_shift = (-shift).max(0) as u32;
    let shifted = (acc as i128) << left_shift;
    saturate_i32(rounding_divide_by_pot(rounding_doubling_high_mul(shifted, multiplier), right_shift))
}

#[inline(always)]
fn requantize_single(acc: i64, multiplier: i32, shift: i32) -> i32 {
    let total_shift = (31 - shift) as u32;
    saturate_i32(rounding_divide_by_pot(acc as i128 * multiplier as i128, total_shift))
}

/// Scales `acc` by `multiplier * 2^(shift - 31)` under the given rounding regime.
///
/// Every intermediate is exact for any 64-bit accumulator; only the 32-bit result saturates.
#[inline(always)]
pub fn requantize(acc: i64, multiplier: i32, shift: i32, mode: RoundingMode) -> i32 {
    match mode {
        RoundingMode::Double => requantize_double(acc, multiplier, shift),
        RoundingMode::Single => requantize_single(acc, multiplier, shift),
    }
}

/// Paired variant: two accumulators, two independent channel scales.
#[inline(always)]
pub fn requantize_x2(acc: [i64; 2], multipliers: [i32; 2], shifts: [i32; 2], mode: RoundingMode) -> [i32; 2] {
    [
        requantize(acc[0], multipliers[0], shifts[0], mode),
        requantize(acc[1], multipliers[1], shifts[1], mode),
    ]
}

/// Adds the output zero bias and clamps to the activation range.
#[inline(always)]
pub fn output_stage(requantized: i32, output_zero_bias: i32, activation_min: i32, activation_max: i32) -> i32 {
    requantized
        .saturating_add(output_zero_bias)
        .clamp(activation_min, activation_max)
}

/// Converts a real scale into a Q31 multiplier and shift.
///
/// Scales too small to represent collapse to `(0, 0)`; scales too large saturate.
pub fn quantize_multiplier(real: f64) -> (i32, i32) {
    if real <= 0.0 || !real.is_finite() {
        return (0, 0);
    }
    let (mantissa, exponent) = libm::frexp(real);
    let mut q = (mantissa * (1i64 << 31) as f64).round() as i64;
    let mut shift = exponent;
    if q == 1i64 << 31 {
        q /= 2;
        shift += 1;
    }
    if shift < MIN_SHIFT {
        return (0, 0);
    }
    if shift > MAX_SHIFT {
        return (i32::MAX, MAX_SHIFT);
    }
    (q as i32, shift)
}
