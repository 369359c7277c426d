//! Quantized elementwise multiply with NumPy-style broadcasting.

use crate::config::KernelConfig;
use crate::error::{KernelError, Result};
use crate::kernels::element::Quantized;
use crate::kernels::quantization::{check_zero_bias, output_stage, requantize, OutputScale};
use crate::kernels::utils::{broadcast_shapes, broadcast_strides};
use crate::tensor::{TensorView, TensorViewMut, RANK};

/// Scalar quantization of a binary elementwise op; the scale is always per-tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ElementwiseParams {
    pub in1_zero_bias: i32,
    pub in2_zero_bias: i32,
    pub multiplier: i32,
    pub shift: i32,
    pub output_zero_bias: i32,
    pub activation_min: i32,
    pub activation_max: i32,
}

impl ElementwiseParams {
    pub fn new(multiplier: i32, shift: i32, activation_min: i32, activation_max: i32) -> Self {
        Self {
            in1_zero_bias: 0,
            in2_zero_bias: 0,
            multiplier,
            shift,
            output_zero_bias: 0,
            activation_min,
            activation_max,
        }
    }
    pub fn with_input_zero_biases(mut self, in1: i32, in2: i32) -> Self {
        self.in1_zero_bias = in1;
        self.in2_zero_bias = in2;
        self
    }
    pub fn with_output_zero_bias(mut self, zero_bias: i32) -> Self {
        self.output_zero_bias = zero_bias;
        self
    }

    fn validate<T: Quantized>(&self) -> Result<()> {
        check_zero_bias::<T>("input1", self.in1_zero_bias)?;
        check_zero_bias::<T>("input2", self.in2_zero_bias)?;
        let (out_min, out_max) = if T::ASYMMETRIC { (T::MIN, T::MAX) } else { (0, 0) };
        if self.output_zero_bias < out_min || self.output_zero_bias > out_max {
            return Err(KernelError::ZeroBiasOutOfRange {
                which: "output",
                value: self.output_zero_bias,
                min: out_min,
                max: out_max,
            });
        }
        if self.activation_min > self.activation_max || self.activation_min < T::MIN || self.activation_max > T::MAX {
            return Err(KernelError::ActivationRange {
                min: self.activation_min,
                max: self.activation_max,
            });
        }
        OutputScale::PerTensor {
            multiplier: self.multiplier,
            shift: self.shift,
        }
        .validate(1)
    }
}

fn broadcast_view_strides<T: Clone>(view: &TensorView<'_, T>, out_shape: &[usize; RANK]) -> [usize; RANK] {
    let strides = broadcast_strides(&view.shape, &view.strides, out_shape);
    let mut out = [0; RANK];
    out.copy_from_slice(&strides);
    out
}

/// `output = requantize((in1 + zb1) * (in2 + zb2))`, broadcasting size-1 axes of either input.
pub fn elm_mul_broadcast<T: Quantized>(
    output: &mut TensorViewMut<'_, T>,
    in1: &TensorView<'_, T>,
    in2: &TensorView<'_, T>,
    params: &ElementwiseParams,
    config: KernelConfig,
) -> Result<()> {
    log::debug!(
        "elm_mul_broadcast {:?} x {:?} -> {:?} rounding={}",
        in1.shape,
        in2.shape,
        output.shape,
        config.rounding
    );
    let checked = params
        .validate::<T>()
        .and_then(|_| in1.check_bounds("input1"))
        .and_then(|_| in2.check_bounds("input2"))
        .and_then(|_| output.check_bounds("output"))
        .and_then(|_| match broadcast_shapes(&in1.shape, &in2.shape) {
            Some(shape) if shape[..] == output.shape[..] => Ok(()),
            _ => Err(KernelError::InvalidShape(format!(
                "cannot broadcast {:?} and {:?} to {:?}",
                in1.shape, in2.shape, output.shape
            ))),
        });
    if let Err(e) = checked {
        log::debug!("elm_mul_broadcast rejected: {}", e);
        return Err(e);
    }

    let shape = output.shape;
    let s1 = broadcast_view_strides(in1, &shape);
    let s2 = broadcast_view_strides(in2, &shape);
    for n in 0..shape[0] {
        for h in 0..shape[1] {
            for w in 0..shape[2] {
                for c in 0..shape[3] {
                    let a = in1.data[n * s1[0] + h * s1[1] + w * s1[2] + c * s1[3]].to_i32() + params.in1_zero_bias;
                    let b = in2.data[n * s2[0] + h * s2[1] + w * s2[2] + c * s2[3]].to_i32() + params.in2_zero_bias;
                    let scaled = requantize(a as i64 * b as i64, params.multiplier, params.shift, config.rounding);
                    let value = output_stage(scaled, params.output_zero_bias, params.activation_min, params.activation_max);
                    output.set(n, h, w, c, T::from_i32_saturating(value));
                }
            }
        }
    }
    Ok(())
}

/// Asymmetric `i8` multiply.
pub fn elm_mul_broadcast_asym8sxasym8s(
    output: &mut TensorViewMut<'_, i8>,
    in1: &TensorView<'_, i8>,
    in2: &TensorView<'_, i8>,
    params: &ElementwiseParams,
    config: KernelConfig,
) -> Result<()> {
    elm_mul_broadcast(output, in1, in2, params, config)
}

/// Symmetric `i16` multiply; every zero bias must be 0.
pub fn elm_mul_broadcast_sym16sxsym16s(
    output: &mut TensorViewMut<'_, i16>,
    in1: &TensorView<'_, i16>,
    in2: &TensorView<'_, i16>,
    params: &ElementwiseParams,
    config: KernelConfig,
) -> Result<()> {
    elm_mul_broadcast(output, in1, in2, params, config)
}
