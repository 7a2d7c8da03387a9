//! # mmtable Configuration Constants
//!
//! This module centralizes the numeric constants shared by the storage, index
//! and locking layers. Constants that depend on each other are co-located and
//! their relationships are enforced with compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! HEADER_SIZE (4096 bytes)
//!       │
//!       ├─> HEADER_PREFIX_SIZE (32 bytes, zerocopy prefix)
//!       │
//!       ├─> HEADER_FIELDS_END (80 bytes, end of the atomic fields)
//!       │
//!       └─> must be a multiple of ALLOCATION_GRANULARITY so record storage
//!           starts on a page boundary of the mapping
//!
//! ALLOCATION_GRANULARITY (4096 bytes)
//!       │
//!       └─> every backing file length is rounded up to this
//!
//! NONE_ID (u32::MAX)
//!       │
//!       └─> MAX_RECORD_ID (NONE_ID - 1): chain pointers are u32 slot ids
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `HEADER_SIZE % ALLOCATION_GRANULARITY == 0`
//! 2. `HEADER_SIZE % 8 == 0` (atomic header fields stay naturally aligned)
//! 3. `MAX_RECORD_ID < NONE_ID as u64` (the chain sentinel is never a live id)
//! 4. `MIN_HASH_BUCKETS` is a power of two (bucket selection uses a mask)

use std::time::Duration;

// ============================================================================
// BACKING REGION LAYOUT
// ============================================================================

/// Size of the shared header at the start of every backing region.
pub const HEADER_SIZE: usize = 4096;

/// Size of the immutable, zerocopy-encoded prefix (magic, version, width,
/// layout fingerprint).
pub const HEADER_PREFIX_SIZE: usize = 32;

/// Byte offset one past the last atomic header field.
pub const HEADER_FIELDS_END: usize = HEADER_PREFIX_SIZE + 6 * 8;

/// Granularity backing files are sized in.
pub const ALLOCATION_GRANULARITY: usize = 4096;

/// On-disk format version written into every header.
pub const FORMAT_VERSION: u32 = 1;

/// Magic bytes identifying a persistent table file.
pub const TABLE_MAGIC: &[u8; 16] = b"mmtable v1\x00\x00\x00\x00\x00\x00";

const _: () = assert!(
    HEADER_SIZE % ALLOCATION_GRANULARITY == 0,
    "record storage must start on an allocation boundary"
);

const _: () = assert!(HEADER_SIZE % 8 == 0, "atomic header fields need 8-byte alignment");

const _: () = assert!(
    HEADER_FIELDS_END <= HEADER_SIZE,
    "header fields overflow the header region"
);

// ============================================================================
// RECORD IDS AND INDEX SIZING
// ============================================================================

/// Sentinel used by the intrusive chains for "no previous record".
pub const NONE_ID: u32 = u32::MAX;

/// Largest addressable record id.
pub const MAX_RECORD_ID: u64 = NONE_ID as u64 - 1;

/// Smallest hash table used by the symbol and portfolio chains.
pub const MIN_HASH_BUCKETS: usize = 1024;

/// Average chain length tolerated before the hash tables are rebuilt larger.
pub const MAX_CHAIN_LOAD: usize = 4;

/// Widest span of day numbers the dense date index will cover.
pub const MAX_DATE_SPAN_DAYS: usize = 1 << 20;

/// Widest `Bytes(n)` field a layout may declare.
pub const MAX_BYTES_FIELD_WIDTH: usize = 255;

const _: () = assert!(MAX_RECORD_ID < NONE_ID as u64);
const _: () = assert!(MIN_HASH_BUCKETS.is_power_of_two());

// ============================================================================
// OPERATIONAL DEFAULTS
// Overridable through TableConfig and the MMTABLE_* environment variables
// ============================================================================

/// Default number of record slots reserved when a table is created.
pub const DEFAULT_INITIAL_CAPACITY: u64 = 1024;

/// Default size of one growth step for persistent tables (4 MiB).
pub const DEFAULT_GROWTH_BYTES: usize = 4 * 1024 * 1024;

/// Default time a writer waits for the table lock before `ResourceBusy`.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// First sleep between lock attempts; doubled up to `LOCK_MAX_POLL_INTERVAL`.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Longest sleep between lock attempts.
pub const LOCK_MAX_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Default tolerance for record mtimes ahead of the local wall clock.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::ZERO;

/// Suffix appended to a table path to name its lock file.
pub const LOCK_FILE_SUFFIX: &str = "lock";
