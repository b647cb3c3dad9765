//! Runtime representation of a linear memory.

use crate::memory_units::{Bytes, Pages};
use wasm5_core::{LittleEndianConvert, TrapCode};

/// Size of a page of linear memory - 64KiB.
///
/// The size of a memory is always an integer multiple of a page size.
pub const PAGE_SIZE: Bytes = Bytes(65536);

/// A contiguous, mutable array of raw bytes.
///
/// The buffer is allocated at the configured maximum up front; growth only
/// moves the `current_size` cursor and zero-fills the newly exposed region,
/// so a grown memory never relocates. Loads and stores are bounds-checked
/// against `current_size` in 64-bit arithmetic, which rules out wrap-around
/// aliasing of valid addresses.
#[derive(Debug)]
pub struct LinearMemory {
    buffer: Box<[u8]>,
    current_size: usize,
}

impl LinearMemory {
    /// Creates a memory of `initial` pages growable up to `maximum` pages.
    ///
    /// `initial` is clamped to `maximum`.
    pub fn new(initial: Pages, maximum: Pages) -> Self {
        let max_bytes: Bytes = maximum.into();
        let init_bytes: Bytes = core::cmp::min(initial, maximum).into();
        Self {
            buffer: vec![0u8; max_bytes.0].into_boxed_slice(),
            current_size: init_bytes.0,
        }
    }

    /// Returns the current size in bytes.
    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// Returns the maximum size in bytes.
    pub fn max_size(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the current size in pages, the result of `memory.size`.
    pub fn size_in_pages(&self) -> u32 {
        (self.current_size / PAGE_SIZE.0) as u32
    }

    /// Grows the memory by `delta` pages, the `memory.grow` operation.
    ///
    /// Returns the old page count, or −1 if the grown size would exceed the
    /// maximum. The newly exposed region is zero-filled.
    pub fn grow(&mut self, delta: u32) -> i32 {
        let old_pages = self.size_in_pages();
        let new_size = match (delta as usize)
            .checked_mul(PAGE_SIZE.0)
            .and_then(|bytes| bytes.checked_add(self.current_size))
        {
            Some(size) => size,
            None => return -1,
        };
        if new_size > self.buffer.len() {
            return -1;
        }
        self.buffer[self.current_size..new_size].fill(0);
        self.current_size = new_size;
        old_pages as i32
    }

    /// Bounds-checks `addr + len` against the current size.
    ///
    /// Both operands are widened to 64 bits first, so the sum cannot wrap.
    /// A zero-length range is valid at any address; bulk operations with
    /// `n = 0` never trap.
    #[inline]
    fn check_range(&self, addr: u64, len: u64) -> Result<usize, TrapCode> {
        if len == 0 {
            return Ok(addr as usize);
        }
        let end = addr.checked_add(len).ok_or(TrapCode::OutOfBoundsMemory)?;
        if end > self.current_size as u64 {
            return Err(TrapCode::OutOfBoundsMemory);
        }
        Ok(addr as usize)
    }

    /// Loads a `T` from `addr + offset`.
    pub fn load<T: LittleEndianConvert>(&self, addr: u32, offset: u64) -> Result<T, TrapCode> {
        let addr = u64::from(addr)
            .checked_add(offset)
            .ok_or(TrapCode::OutOfBoundsMemory)?;
        let start = self.check_range(addr, core::mem::size_of::<T>() as u64)?;
        let mut bytes = T::Bytes::default();
        let len = bytes.as_ref().len();
        bytes.as_mut().copy_from_slice(&self.buffer[start..start + len]);
        Ok(T::from_le_bytes(bytes))
    }

    /// Stores a `T` at `addr + offset`.
    pub fn store<T: LittleEndianConvert>(
        &mut self,
        addr: u32,
        offset: u64,
        value: T,
    ) -> Result<(), TrapCode> {
        let addr = u64::from(addr)
            .checked_add(offset)
            .ok_or(TrapCode::OutOfBoundsMemory)?;
        let start = self.check_range(addr, core::mem::size_of::<T>() as u64)?;
        let bytes = value.into_le_bytes();
        let len = bytes.as_ref().len();
        self.buffer[start..start + len].copy_from_slice(bytes.as_ref());
        Ok(())
    }

    /// The `memory.copy` operation: overlap-safe byte move.
    pub fn copy(&mut self, dst: u64, src: u64, len: u64) -> Result<(), TrapCode> {
        if len == 0 {
            return Ok(());
        }
        let dst = self.check_range(dst, len)?;
        let src = self.check_range(src, len)?;
        self.buffer.copy_within(src..src + len as usize, dst);
        Ok(())
    }

    /// The `memory.fill` operation.
    pub fn fill(&mut self, dst: u64, byte: u8, len: u64) -> Result<(), TrapCode> {
        if len == 0 {
            return Ok(());
        }
        let dst = self.check_range(dst, len)?;
        self.buffer[dst..dst + len as usize].fill(byte);
        Ok(())
    }

    /// The `memory.init` operation: copies `len` bytes starting at `src`
    /// out of the passive segment contents `data` to `dst`.
    ///
    /// A dropped segment passes an empty `data`, so any `len > 0` traps;
    /// `len = 0` succeeds regardless of either range.
    pub fn init(&mut self, dst: u64, data: &[u8], src: u64, len: u64) -> Result<(), TrapCode> {
        if len == 0 {
            return Ok(());
        }
        let src_end = src.checked_add(len).ok_or(TrapCode::OutOfBoundsMemory)?;
        if src_end > data.len() as u64 {
            return Err(TrapCode::OutOfBoundsMemory);
        }
        let dst = self.check_range(dst, len)?;
        self.buffer[dst..dst + len as usize]
            .copy_from_slice(&data[src as usize..src_end as usize]);
        Ok(())
    }

    /// Direct read access to the byte range `addr..addr + len`.
    ///
    /// Used by the host import surface to read guest strings and buffers.
    pub fn bytes(&self, addr: u32, len: u32) -> Result<&[u8], TrapCode> {
        if len == 0 {
            return Ok(&[]);
        }
        let start = self.check_range(u64::from(addr), u64::from(len))?;
        Ok(&self.buffer[start..start + len as usize])
    }

    /// Direct write access to the byte range `addr..addr + len`.
    pub fn bytes_mut(&mut self, addr: u32, len: u32) -> Result<&mut [u8], TrapCode> {
        if len == 0 {
            return Ok(&mut []);
        }
        let start = self.check_range(u64::from(addr), u64::from(len))?;
        Ok(&mut self.buffer[start..start + len as usize])
    }
}
