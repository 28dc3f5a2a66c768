//! Access to the address space of the inspected process.
//!
//! The walker never dereferences target addresses itself. Every read goes
//! through [`TargetMemory`], which may be backed by a live, suspended process
//! or by a memory image recovered from a crash dump. A read may fail at any
//! point and such failures are ordinary, recoverable [`UnwindError`]s.

use crate::error::{Result, UnwindError};
use std::collections::BTreeMap;

/// Reads pointer-sized words from the inspected process.
pub trait TargetMemory {
    /// Reads the pointer-sized word stored at `addr`.
    fn read_word(&self, addr: u64) -> Result<u64>;

    /// Reads the pointer-sized word stored `byte_offset` bytes away from
    /// `addr`.
    fn address_at(&self, addr: u64, byte_offset: i64) -> Result<u64> {
        self.read_word(addr.wrapping_add_signed(byte_offset))
    }
}

impl<T: TargetMemory + ?Sized> TargetMemory for &T {
    fn read_word(&self, addr: u64) -> Result<u64> {
        (**self).read_word(addr)
    }
}

/// A sparse, little-endian image of a target address space.
///
/// Regions are keyed by their base address and must not overlap. This is
/// the shape of memory recovered from a core file: a handful of mapped
/// ranges with nothing readable in between.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    pointer_size: u8,
    regions: BTreeMap<u64, Vec<u8>>,
}

impl MemoryImage {
    /// Creates an empty image whose words are `pointer_size` bytes wide.
    pub fn new(pointer_size: u8) -> MemoryImage {
        assert!(
            pointer_size == 4 || pointer_size == 8,
            "unsupported pointer size {pointer_size}"
        );
        MemoryImage {
            pointer_size,
            regions: BTreeMap::new(),
        }
    }

    /// Size in bytes of a word read from this image.
    pub fn pointer_size(&self) -> u8 {
        self.pointer_size
    }

    /// Maps `bytes` at `base`.
    ///
    /// A region reaching past the end of the address space is rejected.
    pub fn map(&mut self, base: u64, bytes: Vec<u8>) -> Result<&mut Self> {
        let end = u64::try_from(bytes.len())
            .ok()
            .and_then(|len| base.checked_add(len))
            .ok_or(UnwindError::UnmappedAddress { addr: base })?;
        debug_assert!(
            self.regions
                .range(..end)
                .next_back()
                .map_or(true, |(b, r)| b + r.len() as u64 <= base),
            "region at {base:#x} overlaps an existing mapping"
        );
        self.regions.insert(base, bytes);
        Ok(self)
    }

    /// Maps a run of consecutive words starting at `base`.
    pub fn map_words(&mut self, base: u64, words: &[u64]) -> Result<&mut Self> {
        let width = usize::from(self.pointer_size);
        let mut bytes = Vec::with_capacity(words.len() * width);
        for word in words {
            bytes.extend_from_slice(&word.to_le_bytes()[..width]);
        }
        self.map(base, bytes)
    }

    /// Overwrites the word at `addr`, which must already be mapped.
    pub fn write_word(&mut self, addr: u64, value: u64) -> Result<()> {
        let width = usize::from(self.pointer_size);
        let (start, region) = self.region_for_mut(addr, width)?;
        region[start..start + width].copy_from_slice(&value.to_le_bytes()[..width]);
        Ok(())
    }

    fn region_for(&self, addr: u64, len: usize) -> Result<(usize, &[u8])> {
        let (base, region) = self
            .regions
            .range(..=addr)
            .next_back()
            .ok_or(UnwindError::UnmappedAddress { addr })?;
        let start = usize::try_from(addr - base).map_err(|_| UnwindError::UnmappedAddress { addr })?;
        if start.checked_add(len).map_or(true, |end| end > region.len()) {
            return Err(UnwindError::UnmappedAddress { addr });
        }
        Ok((start, region))
    }

    fn region_for_mut(&mut self, addr: u64, len: usize) -> Result<(usize, &mut [u8])> {
        let (start, _) = self.region_for(addr, len)?;
        let (_, region) = self
            .regions
            .range_mut(..=addr)
            .next_back()
            .ok_or(UnwindError::UnmappedAddress { addr })?;
        Ok((start, region))
    }
}

impl TargetMemory for MemoryImage {
    fn read_word(&self, addr: u64) -> Result<u64> {
        let width = usize::from(self.pointer_size);
        let (start, region) = self.region_for(addr, width)?;
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(&region[start..start + width]);
        Ok(u64::from_le_bytes(buf))
    }
}
