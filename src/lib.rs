//! # mmtable - Shared Memory-Mapped Record Tables
//!
//! mmtable stores fixed-width records in one file that any number of
//! cooperating processes map at once. Writers append under a per-table lock;
//! readers never lock and see only fully published records.
//!
//! - **Zero-copy reads**: records are borrowed straight out of the mapping
//! - **Append-optimized**: a write publishes with one Release store of the count
//! - **Keyed**: every record carries a `(date, symbol, portfolio)` primary key
//!
//! ## Quick Start
//!
//! ```ignore
//! use mmtable::{FieldType, RecordBuilder, RecordLayout, Table, TableConfig};
//!
//! let layout = RecordLayout::keyed(8, 8, [("price", FieldType::Float64)])?;
//! let mut table = Table::open_or_create("quotes.mmt", layout.clone(), TableConfig::from_env()?)?;
//!
//! let mut builder = RecordBuilder::new(&layout);
//! builder.set_key(19_700, b"AAPL", b"GROWTH")?;
//! builder.set_float64(3, 187.5)?;
//! table.upsert(&[builder.build()])?;
//!
//! let ids = table.lookup_by_symbol(b"AAPL", 0)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │          Table (handle)             │
//! ├──────────────────┬──────────────────┤
//! │  write protocols │  local index     │
//! ├──────────────────┴──────────────────┤
//! │   Record layout / conversion        │
//! ├─────────────────────────────────────┤
//! │   Table lock (flock / mutex)        │
//! ├─────────────────────────────────────┤
//! │   Region: shared header + records   │
//! │   (MAP_SHARED file or heap buffer)  │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! quotes.mmt         # 4096-byte header, then capacity × width record bytes
//! quotes.mmt.lock    # flock target, holds the pid of the current writer
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: format constants and `TableConfig`
//! - [`error`]: `TableError` and its kinds
//! - [`layout`]: field layouts, record builders, views and conversion
//! - [`storage`]: shared header, memory and mmap regions, growth
//! - [`lock`]: the per-table writer lock
//! - [`index`]: the process-local primary-key index
//! - [`table`]: the `Table` handle

pub mod config;
pub mod error;
pub mod index;
pub mod layout;
pub mod lock;
pub mod storage;
pub mod table;

pub use config::TableConfig;
pub use error::{ErrorKind, TableError};
pub use layout::{
    FieldDef, FieldType, FieldValue, Record, RecordBuilder, RecordKey, RecordLayout, RecordRef,
};
pub use lock::{StaleLock, TableLock};
pub use storage::HeaderInfo;
pub use table::{now_seconds, ChangeSet, Rejection, Snapshot, Table, WriteReport};
