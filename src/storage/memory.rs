//! # Ephemeral Backing Region
//!
//! `MemoryRegion` keeps the header and record array in one process-local heap
//! buffer. It has the same byte layout as a persistent file so every layer
//! above it is oblivious to the difference, but it can never grow: capacity is
//! fixed at construction, and `extend` on an ephemeral table is rejected.
//!
//! The buffer is a `Vec<u64>` so that the header's atomic fields are 8-byte
//! aligned without any allocator tricks.

use eyre::Result;
use zerocopy::IntoBytes;

use super::header::{HeaderPrefix, SharedHeader};
use super::region::{region_len, Region};
use crate::config::{HEADER_SIZE, MAX_RECORD_ID};
use crate::error::TableError;

#[derive(Debug)]
pub struct MemoryRegion {
    buf: Vec<u64>,
    width: usize,
    capacity: u64,
}

impl MemoryRegion {
    pub fn new(width: usize, fingerprint: u64, capacity: u64) -> Result<Self> {
        if width == 0 || capacity > MAX_RECORD_ID + 1 {
            return Err(TableError::StorageUnavailable(format!(
                "cannot allocate {} records of width {}",
                capacity, width
            ))
            .into());
        }

        let bytes = region_len(capacity, width)?;
        let words = bytes.div_ceil(8);

        let mut buf: Vec<u64> = Vec::new();
        buf.try_reserve_exact(words).map_err(|e| {
            TableError::StorageUnavailable(format!("failed to allocate {} bytes: {}", bytes, e))
        })?;
        buf.resize(words, 0);

        SharedHeader::initialize(
            buf.as_mut_bytes(),
            HeaderPrefix::new(width, fingerprint),
            capacity,
        );

        Ok(Self {
            buf,
            width,
            capacity,
        })
    }
}

impl Region for MemoryRegion {
    fn header(&self) -> &SharedHeader {
        // SAFETY: `buf` is at least HEADER_SIZE bytes, u64-aligned, and was
        // initialized by SharedHeader::initialize in `new`. The header is only
        // mutated through its atomic fields.
        unsafe { &*(self.buf.as_ptr() as *const SharedHeader) }
    }

    fn records(&self) -> &[u8] {
        let len = self.capacity as usize * self.width;
        &self.buf.as_bytes()[HEADER_SIZE..HEADER_SIZE + len]
    }

    fn split_mut(&mut self) -> (&SharedHeader, &mut [u8]) {
        let len = self.capacity as usize * self.width;
        let (head, tail) = self.buf.as_mut_bytes().split_at_mut(HEADER_SIZE);
        // SAFETY: `head` is the first HEADER_SIZE bytes of a u64-aligned
        // buffer holding an initialized header, and is disjoint from `tail`.
        let header = unsafe { &*(head.as_ptr() as *const SharedHeader) };
        (header, &mut tail[..len])
    }

    fn record_width(&self) -> usize {
        self.width
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn is_persistent(&self) -> bool {
        false
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_region_is_empty_with_fixed_capacity() {
        let region = MemoryRegion::new(24, 7, 4).unwrap();

        assert_eq!(region.capacity(), 4);
        assert_eq!(region.header().capacity(), 4);
        assert_eq!(region.header().count(), 0);
        assert_eq!(region.records().len(), 4 * 24);
        assert!(!region.is_persistent());
    }

    #[test]
    fn writes_through_split_are_visible_to_readers() {
        let mut region = MemoryRegion::new(8, 7, 2).unwrap();

        {
            let (header, records) = region.split_mut();
            records[8..16].copy_from_slice(&42u64.to_le_bytes());
            header.publish_count(2);
        }

        assert_eq!(region.header().count(), 2);
        assert_eq!(region.record(1).unwrap(), &42u64.to_le_bytes());
        assert!(region.record(2).is_err());
    }

    #[test]
    fn zero_width_is_unavailable() {
        let err = MemoryRegion::new(0, 7, 2).unwrap_err();

        assert_eq!(
            TableError::kind_of(&err),
            Some(crate::error::ErrorKind::StorageUnavailable)
        );
    }
}
