//! Axis planning and the loader that keeps the ring buffer filled with the live window.
//!
//! One cached line of the ring is one input column: every row the height plan needs,
//! each row `channel_pad` values wide. Values are stored with the input zero bias already
//! applied, so zero padding is literally `0`.

use crate::kernels::element::Quantized;
use crate::kernels::ring::RingBuffer;
use crate::tensor::TensorView;

/// One spatial axis of one convolution phase.
///
/// Output `j`, tap `k` reads the real input position
/// `origin + unit * (j * stride + k)`; anything outside `[0, extent)` is zero padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisPlan {
    pub origin: isize,
    pub unit: usize,
    pub stride: usize,
    pub taps: usize,
    pub count: usize,
    pub extent: usize,
}

impl AxisPlan {
    /// Plain (undilated) axis: every output, stride `stride`, `pad` leading zeros.
    pub fn dense(extent: usize, count: usize, taps: usize, stride: usize, pad: usize) -> Self {
        Self {
            origin: -(pad as isize),
            unit: 1,
            stride,
            taps,
            count,
            extent,
        }
    }
    #[inline(always)]
    pub fn position(&self, sub: usize) -> isize {
        self.origin + (self.unit * sub) as isize
    }
    #[inline(always)]
    pub fn real_index(&self, sub: usize) -> Option<usize> {
        let pos = self.position(sub);
        if pos >= 0 && (pos as usize) < self.extent {
            Some(pos as usize)
        } else {
            None
        }
    }
    /// Sub-positions touched by all outputs of this plan.
    pub fn span(&self) -> usize {
        (self.count - 1) * self.stride + self.taps
    }
    /// Lines shifted into the window per output step.
    pub fn new_lines(&self) -> usize {
        self.stride.min(self.taps)
    }
    /// Whether every sub-position of the plan lands on real input.
    pub fn fully_inside(&self) -> bool {
        self.position(0) >= 0 && self.position(self.span() - 1) < self.extent as isize
    }
    fn step(&self) -> isize {
        (self.unit * self.stride) as isize
    }
    /// Leading outputs whose whole window lies in the left padding.
    pub fn left_pad_only(&self) -> usize {
        let last_tap = self.position(self.taps - 1);
        if last_tap >= 0 {
            return 0;
        }
        let step = self.step();
        (((-last_tap) + step - 1) / step).min(self.count as isize) as usize
    }
    /// Trailing outputs whose whole window lies in the right padding.
    pub fn right_pad_only(&self) -> usize {
        let gap = self.extent as isize - self.origin;
        let first = if gap <= 0 {
            0
        } else {
            let step = self.step();
            ((gap + step - 1) / step).min(self.count as isize) as usize
        };
        self.count - first.max(self.left_pad_only())
    }
}

/// Driver state for one output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvState {
    /// The window lies entirely in the left padding.
    LeftPadOnly,
    /// The window overlaps real input and is computed from the ring buffer.
    MainWindow,
    /// The window lies entirely in the right padding.
    RightPadOnly,
}

/// Split of one phase's output columns into the three driver states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSchedule {
    pub left: usize,
    pub main: usize,
    pub right: usize,
}

impl ColumnSchedule {
    pub fn new(plan: &AxisPlan) -> Self {
        let left = plan.left_pad_only();
        let right = plan.right_pad_only();
        let main = plan.count - left - right;
        debug_assert_eq!(left + main + right, plan.count);
        Self { left, main, right }
    }
    pub fn total(&self) -> usize {
        self.left + self.main + self.right
    }
    pub fn state(&self, column: usize) -> ConvState {
        if column < self.left {
            ConvState::LeftPadOnly
        } else if column < self.left + self.main {
            ConvState::MainWindow
        } else {
            ConvState::RightPadOnly
        }
    }
}

/// Lines loaded so far for the current phase, split by origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub padding_lines: usize,
    pub input_lines: usize,
}

#[derive(Debug)]
pub struct WindowLoader {
    pub width: AxisPlan,
    pub height: AxisPlan,
    pub channel_start: usize,
    pub channels: usize,
    pub channel_pad: usize,
    pub input_zero_bias: i32,
    fast: bool,
    stats: LoaderStats,
}

impl WindowLoader {
    pub fn new<I: Quantized>(
        width: AxisPlan,
        height: AxisPlan,
        channel_start: usize,
        channels: usize,
        channel_pad: usize,
        input_zero_bias: i32,
        input: &TensorView<'_, I>,
    ) -> Self {
        let fast = width.fully_inside() && height.fully_inside() && input.strides[3] == 1;
        Self {
            width,
            height,
            channel_start,
            channels,
            channel_pad,
            input_zero_bias,
            fast,
            stats: LoaderStats::default(),
        }
    }
    pub fn line_len(&self) -> usize {
        self.height.span() * self.channel_pad
    }
    pub fn is_fast(&self) -> bool {
        self.fast
    }
    pub fn stats(&self) -> LoaderStats {
        self.stats
    }
    /// Primes every window line for output column `out_index`.
    pub fn init<I: Quantized>(&mut self, ring: &mut RingBuffer<'_>, input: &TensorView<'_, I>, batch: usize, out_index: usize) {
        let first = out_index * self.width.stride;
        for k in 0..self.width.taps {
            self.load_line(ring, k, input, batch, first + k);
        }
    }
    /// Shifts in the lines output column `out_index` adds over its predecessor.
    pub fn update<I: Quantized>(&mut self, ring: &mut RingBuffer<'_>, input: &TensorView<'_, I>, batch: usize, out_index: usize) {
        let n = self.width.new_lines();
        let first_new = out_index * self.width.stride + self.width.taps - n;
        for i in 0..n {
            self.load_line(ring, i, input, batch, first_new + i);
        }
        ring.advance(n);
    }
    fn load_line<I: Quantized>(&mut self, ring: &mut RingBuffer<'_>, slot: usize, input: &TensorView<'_, I>, batch: usize, sub: usize) {
        let cp = self.channel_pad;
        let kc = self.channels;
        let zb = self.input_zero_bias;
        let dst = ring.slot_mut(slot);
        if self.fast {
            // every row and column is real input and channels are contiguous
            let x = self.width.position(sub) as usize;
            for (t, row) in dst.chunks_exact_mut(cp).enumerate() {
                let y = self.height.position(t) as usize;
                let off = input.offset(batch, y, x, self.channel_start);
                for (d, s) in row[..kc].iter_mut().zip(&input.data[off..off + kc]) {
                    *d = (s.to_i32() + zb) as i16;
                }
            }
            self.stats.input_lines += 1;
            return;
        }
        let x = match self.width.real_index(sub) {
            Some(x) => x,
            None => {
                dst.fill(0);
                self.stats.padding_lines += 1;
                return;
            }
        };
        let c_stride = input.strides[3];
        for (t, row) in dst.chunks_exact_mut(cp).enumerate() {
            match self.height.real_index(t) {
                Some(y) => {
                    let off = input.offset(batch, y, x, self.channel_start);
                    for (c, d) in row[..kc].iter_mut().enumerate() {
                        *d = (input.data[off + c * c_stride].to_i32() + zb) as i16;
                    }
                    row[kc..].fill(0);
                }
                None => row.fill(0),
            }
        }
        self.stats.input_lines += 1;
    }
}
