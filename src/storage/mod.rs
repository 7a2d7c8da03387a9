//! # Storage Module
//!
//! The storage layer owns the bytes of a table: a fixed 4096-byte shared
//! header followed by a packed array of fixed-width records.
//!
//! ## Architecture Overview
//!
//! ```text
//! +---------------------------+  offset 0
//! |  SharedHeader (4096 B)    |  count, capacity, mtime, minchgid, flags
//! +---------------------------+  offset 4096
//! |  record 0                 |
//! |  record 1                 |
//! |  ...                      |
//! |  record capacity-1        |
//! +---------------------------+
//! ```
//!
//! Persistent tables map this layout from a file with `MAP_SHARED`, so every
//! process that opens the file reads and writes the same pages. Ephemeral
//! tables keep it in a heap buffer.
//!
//! ## Module Organization
//!
//! - `header`: the shared header and its publish-ordered atomic fields
//! - `region`: the `Region` trait and the `BackingRegion` enum
//! - `memory`: process-local `MemoryRegion`
//! - `mmap`: file-backed `MmapRegion`
//! - `growth`: capacity planning and physical file extension
//!
//! ## Safety Model
//!
//! Replacing a mapping requires `&mut self`, so the borrow checker prevents a
//! record slice from outliving the mapping it points into. Other processes
//! never unmap anything this process sees: files only grow, and a handle with
//! a stale (smaller) mapping simply cannot see the new tail until it calls
//! `refresh()`.
//!
//! ## Platform Support
//!
//! Mapping goes through `memmap2`. Physical reservation uses
//! `posix_fallocate` on Linux, Android and FreeBSD and `set_len` elsewhere.

pub mod growth;
pub mod header;
pub mod memory;
pub mod mmap;
pub mod region;

pub use growth::{grow, plan_capacity};
pub use header::{HeaderInfo, HeaderPrefix, SharedHeader, NO_CHANGE};
pub use memory::MemoryRegion;
pub use mmap::{file_len, read_header_info, MmapRegion};
pub use region::{region_len, BackingRegion, Region};
