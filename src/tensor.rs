use crate::error::{KernelError, Result};
use crate::kernels::utils;
use std::borrow::Cow;

pub const RANK: usize = 4;

/// Axis order of every view: batch, height, width, channel.
pub const N: usize = 0;
pub const H: usize = 1;
pub const W: usize = 2;
pub const C: usize = 3;

/// Read-only NHWC tensor view with explicit per-axis element strides.
#[derive(Debug, Clone)]
pub struct TensorView<'a, T: Clone> {
    pub data: Cow<'a, [T]>,
    pub shape: [usize; RANK],
    pub strides: [usize; RANK],
}

impl<'a, T: Clone> TensorView<'a, T> {
    pub fn new(data: &'a [T], shape: [usize; RANK]) -> Self {
        Self {
            data: Cow::Borrowed(data),
            shape,
            strides: utils::dense_strides(&shape),
        }
    }
    pub fn from_owned(data: Vec<T>, shape: [usize; RANK]) -> Self {
        Self {
            data: Cow::Owned(data),
            shape,
            strides: utils::dense_strides(&shape),
        }
    }
    pub fn with_strides(data: &'a [T], shape: [usize; RANK], strides: [usize; RANK]) -> Self {
        Self {
            data: Cow::Borrowed(data),
            shape,
            strides,
        }
    }
    #[inline]
    pub fn offset(&self, n: usize, h: usize, w: usize, c: usize) -> usize {
        utils::get_offset(&[n, h, w, c], &self.strides)
    }
    #[inline]
    pub fn get(&self, n: usize, h: usize, w: usize, c: usize) -> T {
        self.data[self.offset(n, h, w, c)].clone()
    }
    /// Fails unless every addressable element lies inside `data`.
    pub fn check_bounds(&self, name: &str) -> Result<()> {
        check_extent(name, &self.shape, &self.strides, self.data.len())
    }
}

/// Write-only NHWC tensor view with explicit per-axis element strides.
#[derive(Debug)]
pub struct TensorViewMut<'a, T> {
    pub data: &'a mut [T],
    pub shape: [usize; RANK],
    pub strides: [usize; RANK],
}

impl<'a, T: Copy> TensorViewMut<'a, T> {
    pub fn new(data: &'a mut [T], shape: [usize; RANK]) -> Self {
        let strides = utils::dense_strides(&shape);
        Self {
            data,
            shape,
            strides,
        }
    }
    pub fn with_strides(data: &'a mut [T], shape: [usize; RANK], strides: [usize; RANK]) -> Self {
        Self {
            data,
            shape,
            strides,
        }
    }
    #[inline]
    pub fn offset(&self, n: usize, h: usize, w: usize, c: usize) -> usize {
        utils::get_offset(&[n, h, w, c], &self.strides)
    }
    #[inline]
    pub fn set(&mut self, n: usize, h: usize, w: usize, c: usize, value: T) {
        let idx = self.offset(n, h, w, c);
        self.data[idx] = value;
    }
    pub fn check_bounds(&self, name: &str) -> Result<()> {
        check_extent(name, &self.shape, &self.strides, self.data.len())
    }
}

fn check_extent(name: &str, shape: &[usize; RANK], strides: &[usize; RANK], len: usize) -> Result<()> {
    if shape.iter().any(|&d| d == 0) {
        return Err(KernelError::InvalidShape(format!("{} has an empty axis: {:?}", name, shape)));
    }
    let mut last = 0usize;
    for (&dim, &stride) in shape.iter().zip(strides) {
        last = (dim - 1)
            .checked_mul(stride)
            .and_then(|span| span.checked_add(last))
            .ok_or_else(|| KernelError::OutOfBounds(format!("{} strides overflow", name)))?;
    }
    if last >= len {
        return Err(KernelError::OutOfBounds(format!(
            "{} addresses element {} but holds {}",
            name, last, len
        )));
    }
    Ok(())
}
