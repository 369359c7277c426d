//! Streaming quantized 2D convolution over NHWC tensors.
//!
//! Each (batch, group, phase) pass walks the output columns through three states:
//! columns whose window lies in the left padding are written straight from the
//! requantized bias, main columns are computed from the ring buffer the loader keeps
//! current, and trailing right-padding columns again come from the bias.
//!
//! Input shape: [N, H, W, C_in]
//! Kernel shape: [C_out, kH, kW, C_in / groups]
//! Output shape: [N, H_out, W_out, C_out]

use crate::config::{Backend, KernelConfig};
use crate::error::{KernelError, Result};
use crate::kernels::dilation::{AxisGeometry, AxisPhase};
use crate::kernels::element::{BiasElement, Precision, Quantized};
use crate::kernels::lanes::{DotBackend, ScalarLanes, UnrolledLanes};
use crate::kernels::matxvec::{check_bias_len, Accumulator, KernelWeights, OutputLayout, RingWindow};
use crate::kernels::quantization::{require_symmetric, QuantParams};
use crate::kernels::ring::{arena_from_scratch, scratch_bytes, RingBuffer};
use crate::kernels::utils::align_up;
use crate::kernels::window::{ColumnSchedule, ConvState, WindowLoader};
use crate::tensor::{TensorView, TensorViewMut, C, H, RANK};

/// Stride, padding and dilation of a convolution.
///
/// Bottom and right padding are implied by the output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Conv2dParams {
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_top: usize,
    pub pad_left: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Self {
            stride_h: 1,
            stride_w: 1,
            pad_top: 0,
            pad_left: 0,
            dilation_h: 1,
            dilation_w: 1,
        }
    }
}

impl Conv2dParams {
    pub fn with_stride(mut self, stride_h: usize, stride_w: usize) -> Self {
        self.stride_h = stride_h;
        self.stride_w = stride_w;
        self
    }
    pub fn with_padding(mut self, pad_top: usize, pad_left: usize) -> Self {
        self.pad_top = pad_top;
        self.pad_left = pad_left;
        self
    }
    pub fn with_dilation(mut self, dilation_h: usize, dilation_w: usize) -> Self {
        self.dilation_h = dilation_h;
        self.dilation_w = dilation_w;
        self
    }
}

/// Validated shape arithmetic of one convolution call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConvGeometry {
    pub batch_size: usize,
    pub out_channels: usize,
    pub kernel_channels: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub groups: usize,
    pub kernels_per_group: usize,
    pub channel_pad: usize,
    pub height: AxisGeometry,
    pub width: AxisGeometry,
}

impl ConvGeometry {
    pub fn new(
        input_shape: [usize; RANK],
        kernel_shape: [usize; RANK],
        output_shape: [usize; RANK],
        params: &Conv2dParams,
        precision: Precision,
    ) -> Result<Self> {
        for (name, shape) in [("input", input_shape), ("kernel", kernel_shape), ("output", output_shape)] {
            if shape.iter().any(|&d| d == 0) {
                return Err(KernelError::InvalidShape(format!("{} has an empty axis: {:?}", name, shape)));
            }
        }
        if params.stride_h == 0 || params.stride_w == 0 || params.dilation_h == 0 || params.dilation_w == 0 {
            return Err(KernelError::InvalidStride);
        }
        let [batch_size, in_h, in_w, in_channels] = input_shape;
        let [out_channels, kernel_h, kernel_w, kernel_channels] = kernel_shape;
        let [out_batch, out_h, out_w, out_c] = output_shape;
        if out_batch != batch_size {
            return Err(KernelError::InvalidShape(format!(
                "batch mismatch: input {}, output {}",
                batch_size, out_batch
            )));
        }
        let mismatch = KernelError::GroupMismatch {
            input_channels: in_channels,
            kernel_channels,
            output_channels: out_c,
        };
        if out_c != out_channels || in_channels % kernel_channels != 0 {
            return Err(mismatch);
        }
        let groups = in_channels / kernel_channels;
        if out_channels % groups != 0 {
            return Err(mismatch);
        }
        let height = AxisGeometry {
            extent: in_h,
            count: out_h,
            taps: kernel_h,
            stride: params.stride_h,
            pad: params.pad_top,
            dilation: params.dilation_h,
        };
        let width = AxisGeometry {
            extent: in_w,
            count: out_w,
            taps: kernel_w,
            stride: params.stride_w,
            pad: params.pad_left,
            dilation: params.dilation_w,
        };
        check_axis_range(&height)?;
        check_axis_range(&width)?;
        Ok(Self {
            batch_size,
            out_channels,
            kernel_channels,
            kernel_h,
            kernel_w,
            groups,
            kernels_per_group: out_channels / groups,
            channel_pad: align_up(kernel_channels, precision.channel_align()),
            height,
            width,
        })
    }

    /// Ring elements needed by the largest phase.
    pub fn ring_elements(&self) -> Result<usize> {
        let mut largest = 0usize;
        for ph in self.height.phases() {
            let line = ph
                .plan
                .span()
                .checked_mul(self.channel_pad)
                .and_then(|v| v.checked_mul(self.kernel_w))
                .ok_or_else(|| KernelError::InvalidShape("ring buffer size overflows".to_string()))?;
            largest = largest.max(line);
        }
        Ok(largest)
    }
}

/// Every input index the axis can address must fit in `isize`.
fn check_axis_range(axis: &AxisGeometry) -> Result<()> {
    let reach = (axis.count - 1)
        .checked_mul(axis.stride)
        .and_then(|v| (axis.taps - 1).checked_mul(axis.dilation).and_then(|t| v.checked_add(t)))
        .and_then(|v| v.checked_add(1));
    match reach {
        Some(r) if r <= isize::MAX as usize && axis.pad <= isize::MAX as usize && axis.extent <= isize::MAX as usize => {
            Ok(())
        }
        _ => Err(KernelError::InvalidPadding),
    }
}

/// Bytes of scratch `conv2d_std` needs for these shapes, alignment slack included.
pub fn conv2d_std_scratch_size(
    input_shape: [usize; RANK],
    kernel_shape: [usize; RANK],
    output_shape: [usize; RANK],
    params: &Conv2dParams,
    precision: Precision,
) -> Result<usize> {
    let geom = ConvGeometry::new(input_shape, kernel_shape, output_shape, params, precision)?;
    Ok(scratch_bytes(geom.ring_elements()?))
}

fn validate<I: Quantized, Wt: Quantized, B, O: Quantized>(
    output: &TensorViewMut<'_, O>,
    input: &TensorView<'_, I>,
    kernel: &TensorView<'_, Wt>,
    bias: Option<&[B]>,
    params: &Conv2dParams,
    quant: &QuantParams<'_>,
) -> Result<ConvGeometry> {
    let geom = ConvGeometry::new(input.shape, kernel.shape, output.shape, params, I::PRECISION)?;
    input.check_bounds("input")?;
    kernel.check_bounds("kernel")?;
    output.check_bounds("output")?;
    if kernel.strides[C] != 1 {
        return Err(KernelError::InvalidShape(
            "kernel channels must be contiguous".to_string(),
        ));
    }
    check_bias_len(bias, geom.out_channels)?;
    quant.validate::<I, Wt, O>(geom.out_channels)?;
    Ok(geom)
}

fn prepare<'s, I: Quantized, Wt: Quantized, B, O: Quantized>(
    output: &TensorViewMut<'_, O>,
    input: &TensorView<'_, I>,
    kernel: &TensorView<'_, Wt>,
    bias: Option<&[B]>,
    params: &Conv2dParams,
    quant: &QuantParams<'_>,
    scratch: &'s mut [u8],
) -> Result<(ConvGeometry, &'s mut [i16])> {
    let geom = validate(output, input, kernel, bias, params, quant)?;
    let arena = arena_from_scratch(scratch, geom.ring_elements()?)?;
    Ok((geom, arena))
}

/// Generic quantized convolution: `I` input, `Wt` weights, `B` bias and `O` output elements.
///
/// All parameters are checked before any output is written. `scratch` must hold at least
/// [`conv2d_std_scratch_size`] bytes.
pub fn conv2d_std<I: Quantized, Wt: Quantized, B: BiasElement, O: Quantized>(
    output: &mut TensorViewMut<'_, O>,
    input: &TensorView<'_, I>,
    kernel: &TensorView<'_, Wt>,
    bias: Option<&[B]>,
    params: &Conv2dParams,
    quant: &QuantParams<'_>,
    config: KernelConfig,
    scratch: &mut [u8],
) -> Result<()> {
    log::debug!(
        "conv2d_std input={:?} kernel={:?} output={:?} {:?} backend={} rounding={}",
        input.shape,
        kernel.shape,
        output.shape,
        params,
        config.backend,
        config.rounding
    );
    let (geom, arena) = match prepare(output, input, kernel, bias, params, quant, scratch) {
        Ok(p) => p,
        Err(e) => {
            log::debug!("conv2d_std rejected: {}", e);
            return Err(e);
        }
    };
    let driver = ConvDriver {
        geom,
        quant: *quant,
        bias,
        config,
    };
    match config.backend {
        Backend::Scalar => driver.run(ScalarLanes, output, input, kernel, arena),
        Backend::Unrolled => driver.run(UnrolledLanes, output, input, kernel, arena),
    }
}

struct ConvDriver<'q, 'b, B> {
    geom: ConvGeometry,
    quant: QuantParams<'q>,
    bias: Option<&'b [B]>,
    config: KernelConfig,
}

impl<B: BiasElement> ConvDriver<'_, '_, B> {
    fn run<D: DotBackend, I: Quantized, Wt: Quantized, O: Quantized>(
        &self,
        backend: D,
        output: &mut TensorViewMut<'_, O>,
        input: &TensorView<'_, I>,
        kernel: &TensorView<'_, Wt>,
        arena: &mut [i16],
    ) -> Result<()> {
        let geom = &self.geom;
        let kpg = geom.kernels_per_group;
        for batch in 0..geom.batch_size {
            for group in 0..geom.groups {
                log::trace!("conv2d_std batch {} group {}/{} using {}", batch, group, geom.groups, D::NAME);
                let oc_start = group * kpg;
                let acc = Accumulator {
                    backend,
                    quant: QuantParams {
                        output_scale: self.quant.output_scale.slice(oc_start, kpg),
                        ..self.quant
                    },
                    bias: self.bias.map(|b| &b[oc_start..oc_start + kpg]),
                    mode: self.config.rounding,
                };
                let weights = KernelWeights {
                    data: &kernel.data,
                    base: kernel.offset(oc_start, 0, 0, 0),
                    strides: kernel.strides,
                    vec_count: kpg,
                    kernel_w: geom.kernel_w,
                    channels: geom.kernel_channels,
                    zero_bias: self.quant.kernel_zero_bias,
                };
                for height in geom.height.phases() {
                    for width in geom.width.phases() {
                        let pass = PhasePass {
                            batch,
                            channel_start: group * geom.kernel_channels,
                            oc_start,
                            height,
                            width,
                        };
                        self.run_phase(&acc, &weights, &pass, output, input, &mut *arena)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn run_phase<D: DotBackend, I: Quantized, Wt: Quantized, O: Quantized>(
        &self,
        acc: &Accumulator<'_, '_, D, B>,
        weights: &KernelWeights<'_, Wt>,
        pass: &PhasePass,
        output: &mut TensorViewMut<'_, O>,
        input: &TensorView<'_, I>,
        arena: &mut [i16],
    ) -> Result<()> {
        let geom = &self.geom;
        let schedule = ColumnSchedule::new(&pass.width.plan);
        let rows = pass.height.plan.count;
        let mut loader = WindowLoader::new(
            pass.width.plan,
            pass.height.plan,
            pass.channel_start,
            geom.kernel_channels,
            geom.channel_pad,
            self.quant.input_zero_bias,
            input,
        );
        log::trace!(
            "phase ({}, {}) rows={} columns={:?} fast={}",
            pass.width.residue,
            pass.height.residue,
            rows,
            schedule,
            loader.is_fast()
        );
        let mut ring = RingBuffer::new(arena, geom.kernel_w, loader.line_len())?;
        let mut state = None;
        for column in 0..schedule.total() {
            let next = schedule.state(column);
            if state != Some(next) {
                log::trace!("column {}: {:?}", column, next);
                state = Some(next);
            }
            let layout = OutputLayout {
                base: output.offset(
                    pass.batch,
                    pass.height.out_start,
                    pass.width.out_start + column * pass.width.out_step,
                    pass.oc_start,
                ),
                row_step: output.strides[H] * pass.height.out_step,
                vec_step: output.strides[C],
            };
            match next {
                ConvState::LeftPadOnly | ConvState::RightPadOnly => {
                    acc.run_bias_only(rows, geom.kernels_per_group, &mut output.data[..], layout);
                }
                ConvState::MainWindow => {
                    if column == schedule.left {
                        loader.init(&mut ring, input, pass.batch, column);
                    } else {
                        loader.update(&mut ring, input, pass.batch, column);
                    }
                    let window = RingWindow {
                        ring: &ring,
                        rows,
                        row_step: pass.height.plan.stride,
                        kernel_h: geom.kernel_h,
                        kernel_w: geom.kernel_w,
                        channel_pad: geom.channel_pad,
                        channels: geom.kernel_channels,
                    };
                    acc.run(&window, weights, &mut output.data[..], layout);
                }
            }
        }
        log::trace!("phase done: {:?}", loader.stats());
        Ok(())
    }
}

struct PhasePass {
    batch: usize,
    channel_start: usize,
    oc_start: usize,
    height: AxisPhase,
    width: AxisPhase,
}

/// `u8` input, `u8` weights, `i32` bias, `u8` output with a per-tensor scale.
pub fn conv2d_std_asym8xasym8(
    output: &mut TensorViewMut<'_, u8>,
    input: &TensorView<'_, u8>,
    kernel: &TensorView<'_, u8>,
    bias: Option<&[i32]>,
    params: &Conv2dParams,
    quant: &QuantParams<'_>,
    config: KernelConfig,
    scratch: &mut [u8],
) -> Result<()> {
    if quant.output_scale.is_per_channel() {
        return Err(KernelError::InvalidShape(
            "asym8xasym8 takes a per-tensor output scale".to_string(),
        ));
    }
    conv2d_std(output, input, kernel, bias, params, quant, config, scratch)
}

/// `i8` input, symmetric `i8` weights, `i32` bias, `i8` output with per-channel scales.
pub fn conv2d_std_per_chan_sym8sxasym8s(
    output: &mut TensorViewMut<'_, i8>,
    input: &TensorView<'_, i8>,
    kernel: &TensorView<'_, i8>,
    bias: Option<&[i32]>,
    params: &Conv2dParams,
    quant: &QuantParams<'_>,
    config: KernelConfig,
    scratch: &mut [u8],
) -> Result<()> {
    require_symmetric("kernel", quant.kernel_zero_bias)?;
    conv2d_std(output, input, kernel, bias, params, quant, config, scratch)
}

/// `i16` input, symmetric `i8` weights, `i64` bias, `i16` output with per-channel scales.
pub fn conv2d_std_sym8sxsym16s(
    output: &mut TensorViewMut<'_, i16>,
    input: &TensorView<'_, i16>,
    kernel: &TensorView<'_, i8>,
    bias: Option<&[i64]>,
    params: &Conv2dParams,
    quant: &QuantParams<'_>,
    config: KernelConfig,
    scratch: &mut [u8],
) -> Result<()> {
    require_symmetric("kernel", quant.kernel_zero_bias)?;
    conv2d_std(output, input, kernel, bias, params, quant, config, scratch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoundingMode;
    use crate::error::status_of;

    const IDENTITY: (i32, i32) = (1 << 30, 1);

    fn run_i8(
        input: &[i8],
        in_shape: [usize; 4],
        kernel: &[i8],
        k_shape: [usize; 4],
        out_shape: [usize; 4],
        bias: Option<&[i32]>,
        params: Conv2dParams,
        quant: &QuantParams<'_>,
    ) -> Result<Vec<i8>> {
        let size = conv2d_std_scratch_size(in_shape, k_shape, out_shape, &params, Precision::Asym8s)?;
        let mut scratch = vec![0u8; size];
        let mut out = vec![0i8; out_shape.iter().product()];
        let mut out_view = TensorViewMut::new(&mut out, out_shape);
        conv2d_std(
            &mut out_view,
            &TensorView::new(input, in_shape),
            &TensorView::new(kernel, k_shape),
            bias,
            &params,
            quant,
            KernelConfig::default(),
            &mut scratch,
        )?;
        Ok(out)
    }

    #[test]
    fn test_running_sums_1x5() {
        let quant = QuantParams::per_tensor(IDENTITY.0, IDENTITY.1, -128, 127);
        let out = run_i8(
            &[1, 2, 3, 4, 5],
            [1, 1, 5, 1],
            &[1, 1, 1],
            [1, 1, 3, 1],
            [1, 1, 3, 1],
            Some(&[0]),
            Conv2dParams::default(),
            &quant,
        )
        .unwrap();
        assert_eq!(out, vec![6, 9, 12]);
    }

    #[test]
    fn test_zero_activation_range_zeroes_everything() {
        let quant = QuantParams::per_tensor(IDENTITY.0, IDENTITY.1, 0, 0).with_input_zero_bias(5);
        let out = run_i8(
            &[100, -100, 7, 8, 9, 10, 11, 12, 13],
            [1, 3, 3, 1],
            &[127, -128, 3, 4],
            [1, 2, 2, 1],
            [1, 3, 3, 1],
            Some(&[1000]),
            Conv2dParams::default().with_padding(1, 1),
            &quant,
        )
        .unwrap();
        assert!(out.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_left_padding_columns_are_requantized_bias() {
        // pad_left 4 >= kernel width 3: columns 0 and 1 only see padding
        let mults = [1 << 30, 1 << 30];
        let shifts = [0, 1];
        let quant = QuantParams::per_channel(&mults, &shifts, -128, 127);
        let input: Vec<i8> = (0..10).map(|v| v * 3 - 10).collect();
        let out = run_i8(
            &input,
            [1, 2, 5, 1],
            &[1, 2, 3, 4, 5, 6, -1, -2, -3, -4, -5, -6],
            [2, 2, 3, 1],
            [1, 1, 7, 2],
            Some(&[40, -17]),
            Conv2dParams::default().with_padding(0, 4),
            &quant,
        )
        .unwrap();
        // channel 0 halves the bias, channel 1 keeps it
        for col in 0..2 {
            assert_eq!(out[col * 2], 20);
            assert_eq!(out[col * 2 + 1], -17);
        }
    }

    #[test]
    fn test_validation_rejects_without_writing() {
        let quant = QuantParams::per_tensor(IDENTITY.0, IDENTITY.1, -128, 127);
        let mut out = vec![9i8; 3];
        let input = [1i8, 2, 3, 4, 5];
        let kernel = [1i8, 1, 1];
        let mut scratch = vec![0u8; 256];
        let mut call = |params: Conv2dParams, quant: &QuantParams<'_>, k_shape: [usize; 4]| {
            let mut view = TensorViewMut::new(&mut out, [1, 1, 3, 1]);
            conv2d_std::<i8, i8, i32, i8>(
                &mut view,
                &TensorView::new(&input, [1, 1, 5, 1]),
                &TensorView::new(&kernel, k_shape),
                None,
                &params,
                quant,
                KernelConfig::default(),
                &mut scratch,
            )
        };
        assert_eq!(
            call(Conv2dParams::default().with_stride(0, 1), &quant, [1, 1, 3, 1]),
            Err(KernelError::InvalidStride)
        );
        let bad_shift = QuantParams::per_tensor(1 << 30, 32, -128, 127);
        assert!(matches!(
            call(Conv2dParams::default(), &bad_shift, [1, 1, 3, 1]),
            Err(KernelError::ShiftOutOfRange { .. })
        ));
        let bad_act = QuantParams::per_tensor(1 << 30, 1, 5, 4);
        let res = call(Conv2dParams::default(), &bad_act, [1, 1, 3, 1]);
        assert_eq!(status_of(&res), -1);
        // kernel has 2 input channels but input has 1
        assert!(matches!(
            call(Conv2dParams::default(), &quant, [1, 1, 3, 2]),
            Err(KernelError::GroupMismatch { .. }) | Err(KernelError::OutOfBounds(_))
        ));
        assert_eq!(
            call(Conv2dParams::default().with_padding(0, usize::MAX), &quant, [1, 1, 3, 1]),
            Err(KernelError::InvalidPadding)
        );
        drop(call);
        assert_eq!(out, vec![9, 9, 9]);
    }

    #[test]
    fn test_scratch_too_small() {
        let quant = QuantParams::per_tensor(IDENTITY.0, IDENTITY.1, -128, 127);
        let needed =
            conv2d_std_scratch_size([1, 1, 5, 1], [1, 1, 3, 1], [1, 1, 3, 1], &Conv2dParams::default(), Precision::Asym8s)
                .unwrap();
        // 3 lines of 1 row padded to 4 channels, plus alignment slack
        assert_eq!(needed, 3 * 4 * 2 + 8);
        let mut scratch = vec![0u8; 4];
        let mut out = vec![0i8; 3];
        let res = conv2d_std::<i8, i8, i32, i8>(
            &mut TensorViewMut::new(&mut out, [1, 1, 3, 1]),
            &TensorView::new(&[1, 2, 3, 4, 5], [1, 1, 5, 1]),
            &TensorView::new(&[1, 1, 1], [1, 1, 3, 1]),
            None,
            &Conv2dParams::default(),
            &quant,
            KernelConfig::default(),
            &mut scratch,
        );
        assert!(matches!(res, Err(KernelError::ScratchTooSmall { .. })));
    }

    #[test]
    fn test_sym16_variant_rejects_asymmetric_weights() {
        let mults = [1 << 30];
        let shifts = [1];
        let quant = QuantParams::per_channel(&mults, &shifts, i16::MIN as i32, i16::MAX as i32).with_kernel_zero_bias(3);
        let mut out = vec![0i16; 1];
        let res = conv2d_std_sym8sxsym16s(
            &mut TensorViewMut::new(&mut out, [1, 1, 1, 1]),
            &TensorView::new(&[1i16], [1, 1, 1, 1]),
            &TensorView::new(&[1i8], [1, 1, 1, 1]),
            Some(&[0i64]),
            &Conv2dParams::default(),
            &quant,
            KernelConfig::default().with_rounding(RoundingMode::Single),
            &mut [0u8; 64],
        );
        assert!(matches!(res, Err(KernelError::ZeroBiasOutOfRange { which: "kernel", .. })));
    }
}
