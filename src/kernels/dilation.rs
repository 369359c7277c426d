//! Splits a dilated axis into interleaved phases that each look like a plain convolution.
//!
//! Output `o` reads input `o * stride + k * dilation - pad`. Outputs whose `o * stride`
//! agree modulo `dilation` share one sub-grid of the input; each such class is a phase
//! with sub-stride `stride / gcd(stride, dilation)` on a grid of pitch `dilation`.

use crate::kernels::utils::{ceil_div, gcd};
use crate::kernels::window::AxisPlan;

/// One spatial axis of a convolution, before phase splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisGeometry {
    pub extent: usize,
    pub count: usize,
    pub taps: usize,
    pub stride: usize,
    pub pad: usize,
    pub dilation: usize,
}

/// The outputs `out_start + j * out_step` of one phase and the plan that computes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisPhase {
    pub residue: usize,
    pub out_start: usize,
    pub out_step: usize,
    pub plan: AxisPlan,
}

impl AxisGeometry {
    /// Output indices between two outputs of the same phase.
    pub fn phase_step(&self) -> usize {
        self.dilation / gcd(self.stride, self.dilation)
    }

    /// First output whose `o * stride` is congruent to `residue` modulo the dilation.
    ///
    /// Only the first `phase_step` outputs can start a phase.
    pub fn first_output(&self, residue: usize) -> Option<usize> {
        (0..self.phase_step().min(self.count)).find(|&o| (o * self.stride) % self.dilation == residue)
    }

    /// Plan for phase `residue`, or `None` when no output falls into it.
    pub fn phase(&self, residue: usize) -> Option<AxisPhase> {
        let out_start = self.first_output(residue)?;
        let out_step = self.phase_step();
        let g = gcd(self.stride, self.dilation);
        Some(AxisPhase {
            residue,
            out_start,
            out_step,
            plan: AxisPlan {
                origin: (out_start * self.stride) as isize - self.pad as isize,
                unit: self.dilation,
                stride: self.stride / g,
                taps: self.taps,
                count: ceil_div(self.count - out_start, out_step),
                extent: self.extent,
            },
        })
    }

    /// Every contributing phase, in residue order.
    pub fn phases(&self) -> impl Iterator<Item = AxisPhase> {
        let geom = *self;
        (0..geom.dilation).filter_map(move |r| geom.phase(r))
    }
}
