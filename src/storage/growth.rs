//! # Region Growth
//!
//! Persistent tables grow in coarse increments, never record by record. A
//! growth step is:
//!
//! ```text
//! 1. plan      new capacity = current + k × increment ≥ required
//! 2. reserve   extend the file, physically allocating the blocks
//! 3. remap     this handle's view now covers the new capacity
//! 4. publish   header.capacity = new (Release)
//! ```
//!
//! A failure in steps 2 or 3 leaves both the header and the handle at the old
//! capacity. Step 4 runs last, so no reader can observe a capacity its own
//! `refresh()` could not map.
//!
//! Reservation uses `posix_fallocate` where the platform has it, so a full
//! volume fails here with `StorageFull` instead of raising SIGBUS on a later
//! page fault. Filesystems that cannot preallocate fall back to `set_len`.

use std::fs::File;
use std::io;

use eyre::Result;
use tracing::info;

use super::mmap::{file_len, MmapRegion};
use super::region::Region;
use crate::config::MAX_RECORD_ID;
use crate::error::TableError;

/// Smallest capacity at least `required`, reached from `current` in whole
/// increments of `max(growth_bytes / width, 1)` records.
pub fn plan_capacity(current: u64, required: u64, width: usize, growth_bytes: usize) -> Result<u64> {
    let limit = MAX_RECORD_ID + 1;
    if required > limit {
        return Err(TableError::StorageFull {
            requested_bytes: required.saturating_mul(width as u64),
            reason: format!("{} records exceed the record id space", required),
        }
        .into());
    }
    if required <= current {
        return Ok(current);
    }

    let increment = (growth_bytes / width.max(1)).max(1) as u64;
    let steps = (required - current).div_ceil(increment);
    Ok(current.saturating_add(steps.saturating_mul(increment)).min(limit))
}

/// Grows `region` to hold at least `required` records. Must be called with
/// the table lock held. Returns the new capacity.
pub fn grow(region: &mut MmapRegion, required: u64, growth_bytes: usize) -> Result<u64> {
    region.refresh()?;

    let old_capacity = region.capacity();
    if required <= old_capacity {
        return Ok(old_capacity);
    }

    let width = region.record_width();
    let new_capacity = plan_capacity(old_capacity, required, width, growth_bytes)?;
    let new_len = file_len(new_capacity, width)?;
    let old_len = region.file_size()?;

    reserve(region.file(), new_len).map_err(|e| TableError::StorageFull {
        requested_bytes: new_len.saturating_sub(old_len),
        reason: e.to_string(),
    })?;

    region.remap(new_capacity)?;
    region.header().publish_capacity(new_capacity);

    info!(
        path = %region.path().display(),
        old_capacity,
        new_capacity,
        file_bytes = new_len,
        "table grown"
    );

    Ok(new_capacity)
}

/// Extends `file` to at least `len` bytes with the blocks allocated, then
/// makes the new length durable.
fn reserve(file: &File, len: u64) -> io::Result<()> {
    let current = file.metadata()?.len();
    if len <= current {
        return Ok(());
    }
    allocate(file, current, len)?;
    file.sync_data()
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn allocate(file: &File, current: u64, len: u64) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let offset = libc::off_t::try_from(current)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file offset overflow"))?;
    let extra = libc::off_t::try_from(len - current)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file length overflow"))?;

    loop {
        // SAFETY: the descriptor is owned by `file`, which outlives the call.
        // posix_fallocate reports failure through its return value, not errno.
        let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), offset, extra) };
        match rc {
            0 => return Ok(()),
            libc::EINTR => continue,
            libc::EOPNOTSUPP | libc::EINVAL => return file.set_len(len),
            errno => return Err(io::Error::from_raw_os_error(errno)),
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn allocate(file: &File, _current: u64, len: u64) -> io::Result<()> {
    file.set_len(len)
}
