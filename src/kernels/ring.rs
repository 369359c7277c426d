//! Fixed-capacity circular window over caller-provided scratch memory.

use crate::error::{KernelError, Result};

/// Slack added to scratch requests so the arena can always be aligned.
pub const SCRATCH_ALIGNMENT: usize = 8;

/// Bytes of scratch needed to host a ring of `elements` cached values.
pub fn scratch_bytes(elements: usize) -> usize {
    elements * std::mem::size_of::<i16>() + SCRATCH_ALIGNMENT
}

/// Carves an aligned `i16` arena of `elements` values out of raw scratch bytes.
pub fn arena_from_scratch(scratch: &mut [u8], elements: usize) -> Result<&mut [i16]> {
    let needed = scratch_bytes(elements);
    let got = scratch.len();
    let (head, body, _) = bytemuck::pod_align_to_mut::<u8, i16>(scratch);
    if body.len() < elements {
        return if got >= elements * std::mem::size_of::<i16>() && !head.is_empty() {
            Err(KernelError::Misaligned)
        } else {
            Err(KernelError::ScratchTooSmall { needed, got })
        };
    }
    Ok(&mut body[..elements])
}

/// Ring of `slots` lines, each `slot_len` values long.
///
/// `current` is always a multiple of `slot_len` inside `[0, extent)` and marks the
/// oldest live line. Lines never straddle the wrap point.
#[derive(Debug)]
pub struct RingBuffer<'a> {
    arena: &'a mut [i16],
    slots: usize,
    slot_len: usize,
    current: usize,
}

impl<'a> RingBuffer<'a> {
    pub fn new(arena: &'a mut [i16], slots: usize, slot_len: usize) -> Result<Self> {
        let extent = slots * slot_len;
        if slots == 0 || slot_len == 0 {
            return Err(KernelError::InvalidShape(format!(
                "ring needs a non-empty geometry, got {} x {}",
                slots, slot_len
            )));
        }
        if arena.len() < extent {
            return Err(KernelError::ScratchTooSmall {
                needed: scratch_bytes(extent),
                got: arena.len() * std::mem::size_of::<i16>(),
            });
        }
        let arena = &mut arena[..extent];
        arena.fill(0);
        Ok(Self {
            arena,
            slots,
            slot_len,
            current: 0,
        })
    }
    pub fn slot_len(&self) -> usize {
        self.slot_len
    }
    pub fn extent(&self) -> usize {
        self.arena.len()
    }
    pub fn current(&self) -> usize {
        self.current
    }
    /// Moves the cursor `lines` slots forward, wrapping at the end of the arena.
    #[inline]
    pub fn advance(&mut self, lines: usize) {
        self.current = (self.current + (lines % self.slots) * self.slot_len) % self.extent();
    }
    /// Arena index of `element` inside the line `slot` positions after the cursor.
    #[inline(always)]
    pub fn offset(&self, slot: usize, element: usize) -> usize {
        debug_assert!(element < self.slot_len);
        (self.current + (slot % self.slots) * self.slot_len) % self.extent() + element
    }
    #[inline(always)]
    pub fn segment(&self, slot: usize, element: usize, len: usize) -> &[i16] {
        debug_assert!(element + len <= self.slot_len);
        let start = self.offset(slot, element);
        &self.arena[start..start + len]
    }
    #[inline]
    pub fn slot_mut(&mut self, slot: usize) -> &mut [i16] {
        let start = self.offset(slot, 0);
        let len = self.slot_len;
        &mut self.arena[start..start + len]
    }
}
