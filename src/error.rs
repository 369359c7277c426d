use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    #[error("channel grouping mismatch: input {input_channels}, kernel {kernel_channels}, output {output_channels}")]
    GroupMismatch {
        input_channels: usize,
        kernel_channels: usize,
        output_channels: usize,
    },
    #[error("stride, dilation and kernel extents must be non-zero")]
    InvalidStride,
    #[error("padding overflows the addressable index range")]
    InvalidPadding,
    #[error("shift {shift} out of range [-31, 31] for channel {channel}")]
    ShiftOutOfRange { channel: usize, shift: i32 },
    #[error("negative multiplier {multiplier} for channel {channel}")]
    NegativeMultiplier { channel: usize, multiplier: i32 },
    #[error("{which} zero bias {value} out of range [{min}, {max}]")]
    ZeroBiasOutOfRange {
        which: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },
    #[error("activation range [{min}, {max}] invalid for output type")]
    ActivationRange { min: i32, max: i32 },
    #[error("bias is required by this kernel variant")]
    MissingBias,
    #[error("{which} has {got} entries, {needed} required")]
    ParamLength {
        which: &'static str,
        needed: usize,
        got: usize,
    },
    #[error("scratch buffer too small: {needed} bytes required, {got} provided")]
    ScratchTooSmall { needed: usize, got: usize },
    #[error("scratch buffer cannot be aligned for the ring buffer")]
    Misaligned,
    #[error("tensor view out of bounds: {0}")]
    OutOfBounds(String),
}

impl KernelError {
    /// Classic kernel status code: every failure is `-1`.
    pub fn status(&self) -> i32 {
        -1
    }
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Collapses a kernel result into the `0 | -1` status convention.
pub fn status_of<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.status(),
    }
}
