//! Guest physical memory for the vireo machine.
//!
//! Physical memory is a single flat arena addressed with 32-bit physical
//! addresses. Page tables live in ordinary arena memory as arrays of 32-bit
//! little-endian words, so the only typed accessors offered here are
//! word-granular. The `try_*` accessors validate bounds and word alignment
//! before touching the backing storage and report violations as values
//! instead of panicking, which lets table-building code surface layout
//! mistakes to its caller.

#![forbid(unsafe_code)]

use thiserror::Error;

/// Errors returned by [`Arena`] typed accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemError {
    /// The requested word lies (at least partly) outside the arena.
    #[error("physical access out of bounds: paddr={paddr:#010x} size={size:#x}")]
    OutOfBounds { paddr: u32, size: u32 },
    /// Word accesses must be 4-byte aligned.
    #[error("unaligned word access: paddr={paddr:#010x}")]
    Misaligned { paddr: u32 },
}

pub type MemResult<T> = Result<T, MemError>;

/// A flat, zero-initialized physical memory arena.
#[derive(Debug, Clone)]
pub struct Arena {
    data: Vec<u8>,
}

impl Arena {
    /// Allocates a zero-filled arena of `size` bytes.
    pub fn new(size: u32) -> Self {
        Self {
            data: vec![0; size as usize],
        }
    }

    /// Arena size in bytes.
    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn word_offset(&self, paddr: u32) -> MemResult<usize> {
        if paddr % 4 != 0 {
            return Err(MemError::Misaligned { paddr });
        }
        let end = paddr.checked_add(4).ok_or(MemError::OutOfBounds {
            paddr,
            size: self.len(),
        })?;
        if end > self.len() {
            return Err(MemError::OutOfBounds {
                paddr,
                size: self.len(),
            });
        }
        Ok(paddr as usize)
    }

    /// Reads the little-endian word at `paddr`.
    pub fn try_read_u32(&self, paddr: u32) -> MemResult<u32> {
        let off = self.word_offset(paddr)?;
        let bytes: [u8; 4] = self.data[off..off + 4]
            .try_into()
            .expect("word_offset guarantees a 4-byte range");
        Ok(u32::from_le_bytes(bytes))
    }

    /// Writes `value` as a little-endian word at `paddr`.
    pub fn try_write_u32(&mut self, paddr: u32, value: u32) -> MemResult<()> {
        let off = self.word_offset(paddr)?;
        self.data[off..off + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}
