//! # Table Error Kinds
//!
//! Every public fallible function returns `eyre::Result`. Failures the caller
//! is expected to react to are raised as a [`TableError`] inside the report,
//! so they can be recovered with [`TableError::kind_of`] even after context
//! has been attached with `wrap_err`.
//!
//! ## Propagation Policy
//!
//! | Kind                 | Scope       | Caller reaction                        |
//! |----------------------|-------------|----------------------------------------|
//! | StorageUnavailable   | structural  | fatal for this handle                  |
//! | StorageFull          | structural  | table unchanged, lock released         |
//! | CapacityExceeded     | structural  | retry through `extend`                 |
//! | ResourceBusy         | structural  | retry later                            |
//! | UnsupportedOperation | structural  | logic error                            |
//! | DateNotContiguous    | query       | ask `Table::lookup_by_date` instead    |
//! | InvalidTimestamp     | per record  | reported in `WriteReport::rejected`    |
//! | MalformedRecord      | per record  | reported in `WriteReport::rejected`    |
//! | IndexStale           | internal    | never returned; triggers a rebuild     |

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StorageUnavailable,
    StorageFull,
    CapacityExceeded,
    ResourceBusy,
    InvalidTimestamp,
    MalformedRecord,
    UnsupportedOperation,
    DateNotContiguous,
    IndexStale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableError {
    StorageUnavailable(String),
    StorageFull {
        requested_bytes: u64,
        reason: String,
    },
    CapacityExceeded {
        count: u64,
        requested: u64,
        capacity: u64,
    },
    ResourceBusy {
        lock: String,
        waited: Duration,
    },
    InvalidTimestamp {
        mtime: f64,
        now: f64,
    },
    MalformedRecord(String),
    UnsupportedOperation(&'static str),
    /// The day's records do not form one id range.
    DateNotContiguous(i32),
    IndexStale,
}

impl TableError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TableError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            TableError::StorageFull { .. } => ErrorKind::StorageFull,
            TableError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            TableError::ResourceBusy { .. } => ErrorKind::ResourceBusy,
            TableError::InvalidTimestamp { .. } => ErrorKind::InvalidTimestamp,
            TableError::MalformedRecord(_) => ErrorKind::MalformedRecord,
            TableError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            TableError::DateNotContiguous(_) => ErrorKind::DateNotContiguous,
            TableError::IndexStale => ErrorKind::IndexStale,
        }
    }

    /// Classifies a report produced by this crate. Returns `None` for
    /// failures that carry no `TableError`.
    pub fn kind_of(report: &eyre::Report) -> Option<ErrorKind> {
        report.downcast_ref::<TableError>().map(TableError::kind)
    }

    pub fn is_per_record(&self) -> bool {
        matches!(
            self,
            TableError::InvalidTimestamp { .. } | TableError::MalformedRecord(_)
        )
    }
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::StorageUnavailable(msg) => write!(f, "storage unavailable: {}", msg),
            TableError::StorageFull {
                requested_bytes,
                reason,
            } => write!(
                f,
                "storage full: could not reserve {} bytes: {}",
                requested_bytes, reason
            ),
            TableError::CapacityExceeded {
                count,
                requested,
                capacity,
            } => write!(
                f,
                "capacity exceeded: {} records + {} requested > capacity {}",
                count, requested, capacity
            ),
            TableError::ResourceBusy { lock, waited } => write!(
                f,
                "resource busy: lock '{}' not acquired within {:?}",
                lock, waited
            ),
            TableError::InvalidTimestamp { mtime, now } => write!(
                f,
                "invalid timestamp: record mtime {} is ahead of wall clock {}",
                mtime, now
            ),
            TableError::MalformedRecord(msg) => write!(f, "malformed record: {}", msg),
            TableError::UnsupportedOperation(op) => write!(f, "unsupported operation: {}", op),
            TableError::DateNotContiguous(day) => write!(
                f,
                "records of day {} are not stored contiguously; no single id range covers them",
                day
            ),
            TableError::IndexStale => write!(f, "index is stale"),
        }
    }
}

impl std::error::Error for TableError {}
