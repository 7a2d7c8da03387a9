//! # Table Lock
//!
//! One named lock per table serializes every structural mutation: insert,
//! extend, upsert, index creation, and the `minchgid` reset. Reads never take
//! it.
//!
//! | Table      | Lock                                   |
//! |------------|----------------------------------------|
//! | persistent | `flock(LOCK_EX)` on `PATH.lock`        |
//! | ephemeral  | in-process `parking_lot::Mutex`        |
//!
//! Both variants honor the same contract: `acquire(timeout)` waits at most
//! `timeout` and then fails with `ResourceBusy`. The lock is released when
//! the returned guard is dropped, on success and error paths alike.
//!
//! ## Crashed and Hung Writers
//!
//! A writer that dies releases its `flock` automatically: the kernel drops it
//! with the last descriptor. A writer that hangs while holding the lock keeps
//! it. Nothing breaks a held lock automatically; the operator runs
//! [`TableLock::break_stale`] (or `mmtable break-lock PATH`), which consults
//! the pid recorded in the lock file. It breaks the lock only when that pid
//! is recorded and dead. A held lock with no recorded pid is a live writer
//! between taking the `flock` and writing its pid, or between clearing it
//! and unlocking, so it is refused like a live owner.

mod file;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use eyre::Result;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::{LOCK_FILE_SUFFIX, LOCK_MAX_POLL_INTERVAL, LOCK_POLL_INTERVAL};
use crate::error::TableError;

pub use file::{process_alive, read_owner, FileLock};

#[derive(Debug)]
pub enum TableLock {
    File(PathBuf),
    Local(Mutex<()>),
}

/// Proof of exclusive access; dropping it releases the lock.
#[derive(Debug)]
pub enum LockGuard<'a> {
    File(FileLock),
    Local(MutexGuard<'a, ()>),
}

/// Outcome of [`TableLock::break_stale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleLock {
    /// Nobody held the lock.
    NotHeld,
    /// The lock file was removed; its recorded owner no longer exists.
    Broken { pid: u32 },
}

impl TableLock {
    /// Lock for the persistent table at `table_path`.
    pub fn for_table(table_path: &Path) -> Self {
        TableLock::File(lock_path(table_path))
    }

    pub fn local() -> Self {
        TableLock::Local(Mutex::new(()))
    }

    pub fn acquire(&self, timeout: Duration) -> Result<LockGuard<'_>> {
        match self {
            TableLock::File(path) => acquire_file(path, timeout).map(LockGuard::File),
            TableLock::Local(mutex) => match mutex.try_lock_for(timeout) {
                Some(guard) => Ok(LockGuard::Local(guard)),
                None => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "local table lock timed out");
                    Err(TableError::ResourceBusy {
                        lock: "<ephemeral>".to_string(),
                        waited: timeout,
                    }
                    .into())
                }
            },
        }
    }

    /// Removes the lock file of `table_path` if its recorded owner is gone.
    ///
    /// Fails with `ResourceBusy` while the owner is alive or unrecorded.
    /// This is an operator procedure; it is never run implicitly.
    pub fn break_stale(table_path: &Path) -> Result<StaleLock> {
        let path = lock_path(table_path);

        if let Some(unheld) = FileLock::try_lock(&path).map_err(|e| lock_io_error(&path, e))? {
            drop(unheld);
            return Ok(StaleLock::NotHeld);
        }

        let owner = read_owner(&path).map_err(|e| lock_io_error(&path, e))?;
        let pid = match owner {
            Some(pid) if !process_alive(pid) => pid,
            Some(pid) => {
                return Err(TableError::ResourceBusy {
                    lock: format!("{} (held by live pid {})", path.display(), pid),
                    waited: Duration::ZERO,
                }
                .into());
            }
            None => {
                return Err(TableError::ResourceBusy {
                    lock: format!("{} (held, owner not recorded)", path.display()),
                    waited: Duration::ZERO,
                }
                .into());
            }
        };

        // The descriptor still holding the flock belongs to a process that no
        // longer matches the recorded owner. Unlinking the file lets new
        // writers lock a fresh inode.
        std::fs::remove_file(&path).map_err(|e| lock_io_error(&path, e))?;
        warn!(lock = %path.display(), pid, "broke stale table lock");

        Ok(StaleLock::Broken { pid })
    }
}

/// `PATH.lock` for a table at `PATH`.
pub fn lock_path(table_path: &Path) -> PathBuf {
    let mut name = OsString::from(table_path.as_os_str());
    name.push(".");
    name.push(LOCK_FILE_SUFFIX);
    PathBuf::from(name)
}

fn acquire_file(path: &Path, timeout: Duration) -> Result<FileLock> {
    let start = Instant::now();
    let mut backoff = LOCK_POLL_INTERVAL;
    let mut contended = false;

    loop {
        if let Some(lock) = FileLock::try_lock(path).map_err(|e| lock_io_error(path, e))? {
            if contended {
                debug!(
                    lock = %path.display(),
                    waited_us = start.elapsed().as_micros() as u64,
                    "table lock acquired after contention"
                );
            }
            return Ok(lock);
        }

        let waited = start.elapsed();
        if waited >= timeout {
            let owner = read_owner(path).ok().flatten();
            warn!(lock = %path.display(), ?owner, ?waited, "table lock timed out");
            return Err(TableError::ResourceBusy {
                lock: path.display().to_string(),
                waited,
            }
            .into());
        }

        if !contended {
            debug!(lock = %path.display(), "table lock contended");
            contended = true;
        }

        std::thread::sleep(backoff.min(timeout - waited));
        backoff = (backoff * 2).min(LOCK_MAX_POLL_INTERVAL);
    }
}

fn lock_io_error(path: &Path, err: std::io::Error) -> eyre::Report {
    TableError::StorageUnavailable(format!("lock '{}': {}", path.display(), err)).into()
}
