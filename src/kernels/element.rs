//! Integer element types accepted by the kernels.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Storage precision of the convolution input, used by the scratch size query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Precision {
    /// Unsigned 8-bit, asymmetric.
    Asym8,
    /// Signed 8-bit, asymmetric.
    Asym8s,
    /// Signed 16-bit, symmetric.
    Sym16s,
}

impl Precision {
    /// Channel padding granularity of a cached window line.
    pub fn channel_align(self) -> usize {
        match self {
            Precision::Asym8 | Precision::Asym8s => 4,
            Precision::Sym16s => 2,
        }
    }
}

pub trait Quantized: Copy + Default + Send + Sync + 'static {
    const MIN: i32;
    const MAX: i32;
    /// Whether a non-zero zero bias may be applied to values of this type.
    const ASYMMETRIC: bool;
    const PRECISION: Precision;
    fn to_i32(self) -> i32;
    fn from_i32_saturating(v: i32) -> Self;

    /// Valid range of the zero bias (negated zero point) for this type.
    fn zero_bias_range() -> (i32, i32) {
        if Self::ASYMMETRIC {
            (-Self::MAX, -Self::MIN)
        } else {
            (0, 0)
        }
    }
}

impl Quantized for u8 {
    const MIN: i32 = u8::MIN as i32;
    const MAX: i32 = u8::MAX as i32;
    const ASYMMETRIC: bool = true;
    const PRECISION: Precision = Precision::Asym8;
    #[inline(always)]
    fn to_i32(self) -> i32 {
        self as i32
    }
    #[inline(always)]
    fn from_i32_saturating(v: i32) -> Self {
        v.clamp(<Self as Quantized>::MIN, <Self as Quantized>::MAX) as u8
    }
}

impl Quantized for i8 {
    const MIN: i32 = i8::MIN as i32;
    const MAX: i32 = i8::MAX as i32;
    const ASYMMETRIC: bool = true;
    const PRECISION: Precision = Precision::Asym8s;
    #[inline(always)]
    fn to_i32(self) -> i32 {
        self as i32
    }
    #[inline(always)]
    fn from_i32_saturating(v: i32) -> Self {
        v.clamp(<Self as Quantized>::MIN, <Self as Quantized>::MAX) as i8
    }
}

impl Quantized for i16 {
    const MIN: i32 = i16::MIN as i32;
    const MAX: i32 = i16::MAX as i32;
    const ASYMMETRIC: bool = false;
    const PRECISION: Precision = Precision::Sym16s;
    #[inline(always)]
    fn to_i32(self) -> i32 {
        self as i32
    }
    #[inline(always)]
    fn from_i32_saturating(v: i32) -> Self {
        v.clamp(<Self as Quantized>::MIN, <Self as Quantized>::MAX) as i16
    }
}

pub trait BiasElement: Copy + Send + Sync + 'static {
    fn to_i64(self) -> i64;
}

impl BiasElement for i32 {
    #[inline(always)]
    fn to_i64(self) -> i64 {
        self as i64
    }
}

impl BiasElement for i64 {
    #[inline(always)]
    fn to_i64(self) -> i64 {
        self
    }
}
