//! # Shared Table Header
//!
//! Every backing region starts with a 4096-byte header. It is the only state
//! the cooperating processes share besides the records themselves, and it is
//! the publication point for everything a reader is allowed to see.
//!
//! ## Header Layout
//!
//! ```text
//! Offset  Size  Field               Access
//! 0       16    magic               zerocopy prefix, written once
//! 16      4     format version      zerocopy prefix, written once
//! 20      4     record width        zerocopy prefix, written once
//! 24      8     layout fingerprint  zerocopy prefix, written once
//! 32      8     count               AtomicU64
//! 40      8     capacity            AtomicU64
//! 48      8     mtime (f64 bits)    AtomicU64
//! 56      8     minchgid            AtomicU64, u64::MAX = nothing changed
//! 64      8     flags               AtomicU64, bit0 has_index, bit1 index_valid
//! 72      8     index generation    AtomicU64
//! 80      4016  reserved            zero
//! ```
//!
//! ## Publish Ordering
//!
//! `count` is the single value readers synchronize on. Writers store it last
//! with `Release` after all record bytes are in place, and readers load it
//! with `Acquire` before touching any slot. The same pairing applies to
//! `capacity`, which is only raised after the file extension and remap are
//! complete. The remaining fields are informational and use the same
//! orderings for simplicity.
//!
//! ## Endianness
//!
//! The prefix is explicitly little-endian through zerocopy's `U32`/`U64`.
//! The atomic fields are native-endian; tables are shared between processes
//! on one host, never copied across architectures.

use std::sync::atomic::{AtomicU64, Ordering};

use eyre::Result;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{FORMAT_VERSION, HEADER_FIELDS_END, HEADER_PREFIX_SIZE, HEADER_SIZE, TABLE_MAGIC};
use crate::error::TableError;

const FLAG_HAS_INDEX: u64 = 1 << 0;
const FLAG_INDEX_VALID: u64 = 1 << 1;

/// Sentinel stored in `minchgid` when nothing changed since the last
/// observation.
pub const NO_CHANGE: u64 = u64::MAX;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct HeaderPrefix {
    magic: [u8; 16],
    version: U32,
    record_width: U32,
    fingerprint: U64,
}

const _: () = assert!(std::mem::size_of::<HeaderPrefix>() == HEADER_PREFIX_SIZE);

impl HeaderPrefix {
    pub fn new(record_width: usize, fingerprint: u64) -> Self {
        Self {
            magic: *TABLE_MAGIC,
            version: U32::new(FORMAT_VERSION),
            record_width: U32::new(record_width as u32),
            fingerprint: U64::new(fingerprint),
        }
    }

    /// Parses and validates the prefix of an existing table.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        if bytes.len() < HEADER_PREFIX_SIZE {
            return Err(TableError::StorageUnavailable(format!(
                "header truncated: {} < {} bytes",
                bytes.len(),
                HEADER_PREFIX_SIZE
            ))
            .into());
        }

        let prefix = Self::ref_from_bytes(&bytes[..HEADER_PREFIX_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse table header: {:?}", e))?;

        if &prefix.magic != TABLE_MAGIC {
            return Err(TableError::StorageUnavailable(
                "invalid magic bytes, not an mmtable file".to_string(),
            )
            .into());
        }

        if prefix.version.get() != FORMAT_VERSION {
            return Err(TableError::StorageUnavailable(format!(
                "unsupported format version {} (expected {})",
                prefix.version.get(),
                FORMAT_VERSION
            ))
            .into());
        }

        Ok(prefix)
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn record_width(&self) -> usize {
        self.record_width.get() as usize
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint.get()
    }
}

/// The header as it lives in shared memory.
///
/// Only ever accessed by reference into a backing region; never constructed
/// by value.
#[repr(C)]
pub struct SharedHeader {
    prefix: HeaderPrefix,
    count: AtomicU64,
    capacity: AtomicU64,
    mtime: AtomicU64,
    minchgid: AtomicU64,
    flags: AtomicU64,
    generation: AtomicU64,
    reserved: [u8; HEADER_SIZE - HEADER_FIELDS_END],
}

const _: () = assert!(std::mem::size_of::<SharedHeader>() == HEADER_SIZE);
const _: () = assert!(std::mem::align_of::<SharedHeader>() == 8);

impl SharedHeader {
    /// Writes a fresh header into `bytes`, which must be zeroed, 8-byte
    /// aligned and at least `HEADER_SIZE` long.
    pub(crate) fn initialize(bytes: &mut [u8], prefix: HeaderPrefix, capacity: u64) {
        bytes[..HEADER_PREFIX_SIZE].copy_from_slice(prefix.as_bytes());
        bytes[HEADER_PREFIX_SIZE..HEADER_SIZE].fill(0);

        let fields = [0u64, capacity, 0f64.to_bits(), NO_CHANGE, 0, 0];
        for (i, value) in fields.iter().enumerate() {
            let offset = HEADER_PREFIX_SIZE + i * 8;
            bytes[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
        }
    }

    pub fn prefix(&self) -> &HeaderPrefix {
        &self.prefix
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Makes records `[0, count)` visible. Must be the last store of a write.
    pub(crate) fn publish_count(&self, count: u64) {
        self.count.store(count, Ordering::Release);
    }

    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Acquire)
    }

    pub(crate) fn publish_capacity(&self, capacity: u64) {
        self.capacity.store(capacity, Ordering::Release);
    }

    pub fn mtime(&self) -> f64 {
        f64::from_bits(self.mtime.load(Ordering::Acquire))
    }

    pub(crate) fn set_mtime(&self, mtime: f64) {
        self.mtime.store(mtime.to_bits(), Ordering::Release);
    }

    /// Lowest record id changed since the last observation, if any.
    pub fn minchgid(&self) -> Option<u64> {
        match self.minchgid.load(Ordering::Acquire) {
            NO_CHANGE => None,
            id => Some(id),
        }
    }

    pub(crate) fn lower_minchgid(&self, id: u64) {
        self.minchgid.fetch_min(id, Ordering::AcqRel);
    }

    /// Clears `minchgid` if it still equals `observed`. Returns false when a
    /// lower id was touched in the meantime.
    pub(crate) fn reset_minchgid(&self, observed: u64) -> bool {
        self.minchgid
            .compare_exchange(observed, NO_CHANGE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn has_index(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_HAS_INDEX != 0
    }

    pub fn index_valid(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_INDEX_VALID != 0
    }

    pub(crate) fn set_has_index(&self) {
        self.flags.fetch_or(FLAG_HAS_INDEX, Ordering::AcqRel);
    }

    pub(crate) fn set_index_valid(&self, valid: bool) {
        if valid {
            self.flags.fetch_or(FLAG_INDEX_VALID, Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!FLAG_INDEX_VALID, Ordering::AcqRel);
        }
    }

    /// Number of completed invalid-to-valid index transitions.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Point-in-time copy of the header fields, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderInfo {
    pub version: u32,
    pub record_width: usize,
    pub fingerprint: u64,
    pub count: u64,
    pub capacity: u64,
    pub mtime: f64,
    pub minchgid: Option<u64>,
    pub has_index: bool,
    pub index_valid: bool,
    pub generation: u64,
}

impl From<&SharedHeader> for HeaderInfo {
    fn from(header: &SharedHeader) -> Self {
        Self {
            version: header.prefix.version(),
            record_width: header.prefix.record_width(),
            fingerprint: header.prefix.fingerprint(),
            count: header.count(),
            capacity: header.capacity(),
            mtime: header.mtime(),
            minchgid: header.minchgid(),
            has_index: header.has_index(),
            index_valid: header.index_valid(),
            generation: header.generation(),
        }
    }
}
