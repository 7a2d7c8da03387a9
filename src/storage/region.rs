//! # Backing Region Abstraction
//!
//! A backing region owns one contiguous byte range: the shared header followed
//! by `capacity × width` bytes of record storage. Two implementations exist:
//!
//! | Region         | Lifetime        | Growable | Sync      |
//! |----------------|-----------------|----------|-----------|
//! | `MemoryRegion` | process         | no       | no-op     |
//! | `MmapRegion`   | file, survives  | yes      | msync     |
//!
//! `BackingRegion` is the closed enum the table handle stores, so the write
//! paths can ask for growth without generics or trait objects.
//!
//! ## Borrowing
//!
//! ```text
//! header(&self)     -> &SharedHeader            atomics, usable while reading
//! records(&self)    -> &[u8]                    capacity × width bytes
//! split_mut(&mut)   -> (&SharedHeader, &mut [u8])
//! grow / remap      -> &mut self                no borrowed slice survives
//! ```
//!
//! Remapping requires `&mut self`, so the borrow checker guarantees that no
//! record slice from the old mapping is alive when it is replaced.

use std::path::Path;

use eyre::{ensure, Result};

use super::header::SharedHeader;
use super::memory::MemoryRegion;
use super::mmap::MmapRegion;
use crate::config::HEADER_SIZE;
use crate::error::TableError;

pub trait Region: Send + Sync {
    fn header(&self) -> &SharedHeader;

    /// Raw record storage, `capacity() × record_width()` bytes. Slots at or
    /// beyond the published count are reserved and hold no record.
    fn records(&self) -> &[u8];

    /// Header and mutable record storage at once.
    fn split_mut(&mut self) -> (&SharedHeader, &mut [u8]);

    fn record_width(&self) -> usize;

    /// Capacity covered by this handle's view. May lag the header's capacity
    /// when another process has grown the file.
    fn capacity(&self) -> u64;

    fn is_persistent(&self) -> bool;

    fn sync(&self) -> Result<()>;

    /// Bounds-checked slot access against `capacity()`.
    fn record(&self, id: u64) -> Result<&[u8]> {
        ensure!(
            id < self.capacity(),
            "record {} out of bounds (capacity={})",
            id,
            self.capacity()
        );
        let width = self.record_width();
        let start = id as usize * width;
        Ok(&self.records()[start..start + width])
    }
}

#[derive(Debug)]
pub enum BackingRegion {
    Memory(MemoryRegion),
    Mapped(MmapRegion),
}

impl BackingRegion {
    pub fn path(&self) -> Option<&Path> {
        match self {
            BackingRegion::Memory(_) => None,
            BackingRegion::Mapped(region) => Some(region.path()),
        }
    }

    pub fn as_mapped_mut(&mut self) -> Option<&mut MmapRegion> {
        match self {
            BackingRegion::Memory(_) => None,
            BackingRegion::Mapped(region) => Some(region),
        }
    }

    /// Catches up with a capacity published by another handle. Returns true
    /// when the view changed.
    pub fn refresh(&mut self) -> Result<bool> {
        match self {
            BackingRegion::Memory(_) => Ok(false),
            BackingRegion::Mapped(region) => region.refresh(),
        }
    }

    /// Hints that `[from, to)` is about to be read.
    pub fn prefetch(&self, from: u64, to: u64) {
        if let BackingRegion::Mapped(region) = self {
            region.prefetch_records(from, to);
        }
    }
}

impl Region for BackingRegion {
    fn header(&self) -> &SharedHeader {
        match self {
            BackingRegion::Memory(r) => r.header(),
            BackingRegion::Mapped(r) => r.header(),
        }
    }

    fn records(&self) -> &[u8] {
        match self {
            BackingRegion::Memory(r) => r.records(),
            BackingRegion::Mapped(r) => r.records(),
        }
    }

    fn split_mut(&mut self) -> (&SharedHeader, &mut [u8]) {
        match self {
            BackingRegion::Memory(r) => r.split_mut(),
            BackingRegion::Mapped(r) => r.split_mut(),
        }
    }

    fn record_width(&self) -> usize {
        match self {
            BackingRegion::Memory(r) => r.record_width(),
            BackingRegion::Mapped(r) => r.record_width(),
        }
    }

    fn capacity(&self) -> u64 {
        match self {
            BackingRegion::Memory(r) => r.capacity(),
            BackingRegion::Mapped(r) => r.capacity(),
        }
    }

    fn is_persistent(&self) -> bool {
        matches!(self, BackingRegion::Mapped(_))
    }

    fn sync(&self) -> Result<()> {
        match self {
            BackingRegion::Memory(r) => r.sync(),
            BackingRegion::Mapped(r) => r.sync(),
        }
    }
}

/// Bytes needed for the header plus `capacity` records.
pub fn region_len(capacity: u64, width: usize) -> Result<usize> {
    (capacity as usize)
        .checked_mul(width)
        .and_then(|records| records.checked_add(HEADER_SIZE))
        .ok_or_else(|| {
            TableError::StorageUnavailable(format!(
                "{} records of width {} overflow the address space",
                capacity, width
            ))
            .into()
        })
}
