//! Fixed-point convolution, matrix-vector and elementwise kernels for 8/16-bit quantized
//! inference.
//!
//! Tensors are NHWC views over caller-owned slices. The convolution streams its input
//! through a ring buffer carved out of caller-provided scratch (size it with
//! [`kernels::conv2d_std_scratch_size`]) and never allocates.

pub mod config;
pub mod error;
pub mod kernels;
pub mod tensor;

pub use config::{Backend, KernelConfig, RoundingMode};
pub use error::{KernelError, Result};
pub use tensor::{TensorView, TensorViewMut};
