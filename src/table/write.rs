//! # Write Protocols
//!
//! Insert, extend and upsert share one publish protocol. With the table lock
//! held:
//!
//! ```text
//! 1. validate         per-record, failures go to WriteReport::rejected
//! 2. make room        insert: CapacityExceeded, extend/upsert: grow
//! 3. overwrite        upsert only, existing slots in place, lower minchgid
//! 4. copy             new records into [count, count + n)
//! 5. header.mtime     = now
//! 6. header.minchgid  = min(minchgid, old count)
//! 7. header.count     = count + n           (Release, always last)
//! 8. index            catch up, or rebuild on an out-of-order date
//! ```
//!
//! Every structural failure happens in steps 1 and 2, before any byte of the
//! table changes. The lock guard is dropped on return either way.
//!
//! In-place overwrites in step 3 are visible to lock-free readers while they
//! happen; a reader may observe a record mid-overwrite. Only appended records
//! carry the all-or-nothing publish guarantee.

use std::ops::Range;
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::Result;
use hashbrown::{HashMap, HashSet};
use tracing::{debug, warn};

use super::index_sync::{ensure_index_locked, sync_after_append};
use crate::config::TableConfig;
use crate::error::TableError;
use crate::index::PrimaryKeyIndex;
use crate::layout::{RecordKey, RecordLayout};
use crate::storage::{grow, BackingRegion, Region};

/// Outcome of one write call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteReport {
    /// Submitted records that passed validation. Within an upsert, a record
    /// superseded by a later one with the same key still counts.
    pub applied: usize,
    /// New slots published.
    pub appended: usize,
    /// Existing slots overwritten in place.
    pub updated: usize,
    /// Records skipped, by batch position.
    pub rejected: Vec<Rejection>,
    /// Lowest record id touched, if any.
    pub min_touched: Option<u64>,
}

impl WriteReport {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    fn reject(&mut self, position: usize, error: TableError) {
        warn!(position, %error, "record rejected");
        self.rejected.push(Rejection { position, error });
    }

    fn touch(&mut self, id: u64) {
        self.min_touched = Some(self.min_touched.map_or(id, |m| m.min(id)));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub position: usize,
    pub error: TableError,
}

/// How an append may obtain room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Room {
    /// Fail with `CapacityExceeded`.
    Fixed,
    /// Grow persistent regions; ephemeral ones fail with `CapacityExceeded`.
    Grow,
}

/// Validated records packed back to back, with their batch positions.
struct Batch {
    width: usize,
    bytes: Vec<u8>,
    positions: Vec<usize>,
}

impl Batch {
    fn len(&self) -> usize {
        self.positions.len()
    }

    fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn record(&self, i: usize) -> &[u8] {
        &self.bytes[i * self.width..(i + 1) * self.width]
    }
}

/// Seconds since the Unix epoch as a record timestamp.
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Insert and extend: append every valid record.
pub(crate) fn append_records<'a, I>(
    region: &mut BackingRegion,
    index: &mut PrimaryKeyIndex,
    layout: &RecordLayout,
    config: &TableConfig,
    submitted: I,
    room: Room,
    mut report: WriteReport,
) -> Result<WriteReport>
where
    I: IntoIterator<Item = (usize, &'a [u8])>,
{
    region.refresh()?;
    let now = now_seconds();
    let mut batch = prepare(layout, submitted, now, None, &mut report);

    if region.header().has_index() {
        ensure_index_locked(region, index, layout)?;
        batch = drop_duplicates(region, index, layout, batch, &mut report)?;
    }

    if !batch.is_empty() {
        make_room(region, config, batch.len() as u64, room)?;
        let ids = publish_appends(region, layout.width(), &batch.bytes, now);
        report.applied = batch.len();
        report.appended = batch.len();
        report.touch(ids.start);
        sync_after_append(region, index, layout)?;
    }

    report.rejected.sort_by_key(|r| r.position);
    Ok(report)
}

/// Upsert: overwrite existing keys in place, append the rest.
pub(crate) fn upsert_records<'a, I>(
    region: &mut BackingRegion,
    index: &mut PrimaryKeyIndex,
    layout: &RecordLayout,
    config: &TableConfig,
    submitted: I,
    mut report: WriteReport,
) -> Result<WriteReport>
where
    I: IntoIterator<Item = (usize, &'a [u8])>,
{
    region.refresh()?;
    ensure_index_locked(region, index, layout)?;

    let now = now_seconds();
    let latest = now + config.get_clock_skew().as_secs_f64();
    let batch = prepare(layout, submitted, now, Some(latest), &mut report);

    // Last occurrence of a key within the batch wins its slot.
    let mut updates: HashMap<u64, usize> = HashMap::new();
    let mut append_slots: HashMap<RecordKey, usize> = HashMap::new();
    let mut appends: Vec<usize> = Vec::new();

    for i in 0..batch.len() {
        let record = batch.record(i);
        let key = layout.key_of(record);
        match index.lookup_key(region.records(), layout, &key)? {
            Some(id) => {
                updates.insert(id, i);
            }
            None => match append_slots.get(&key) {
                Some(&slot) => appends[slot] = i,
                None => {
                    append_slots.insert(key, appends.len());
                    appends.push(i);
                }
            },
        }
    }

    if !appends.is_empty() {
        make_room(region, config, appends.len() as u64, Room::Grow)?;
    }

    let mut updated: Vec<(u64, usize)> = updates.into_iter().collect();
    updated.sort_unstable_by_key(|&(id, _)| id);

    {
        let width = layout.width();
        let (header, records) = region.split_mut();
        for &(id, i) in &updated {
            let start = id as usize * width;
            records[start..start + width].copy_from_slice(batch.record(i));
            header.lower_minchgid(id);
            report.touch(id);
        }
        if !updated.is_empty() {
            header.set_mtime(now);
        }
    }

    if !appends.is_empty() {
        let mut packed = Vec::with_capacity(appends.len() * layout.width());
        for &i in &appends {
            packed.extend_from_slice(batch.record(i));
        }
        let ids = publish_appends(region, layout.width(), &packed, now);
        report.touch(ids.start);
        sync_after_append(region, index, layout)?;
    }

    report.applied = batch.len();
    report.updated = updated.len();
    report.appended = appends.len();
    report.rejected.sort_by_key(|r| r.position);

    debug!(
        applied = report.applied,
        updated = report.updated,
        appended = report.appended,
        rejected = report.rejected.len(),
        min_touched = ?report.min_touched,
        "upsert"
    );

    Ok(report)
}

/// Validates and stamps submitted records. `latest` bounds record mtimes.
fn prepare<'a, I>(
    layout: &RecordLayout,
    submitted: I,
    now: f64,
    latest: Option<f64>,
    report: &mut WriteReport,
) -> Batch
where
    I: IntoIterator<Item = (usize, &'a [u8])>,
{
    let width = layout.width();
    let mut batch = Batch {
        width,
        bytes: Vec::new(),
        positions: Vec::new(),
    };

    for (position, record) in submitted {
        if let Err(error) = layout.validate(record) {
            report.reject(position, error);
            continue;
        }
        let mtime = layout.mtime_of(record);
        if let Some(latest) = latest {
            if mtime > latest {
                report.reject(position, TableError::InvalidTimestamp { mtime, now });
                continue;
            }
        }

        let start = batch.bytes.len();
        batch.bytes.extend_from_slice(record);
        if mtime == 0.0 {
            layout.set_mtime(&mut batch.bytes[start..start + width], now);
        }
        batch.positions.push(position);
    }

    batch
}

/// Rejects records whose key is already stored or repeated in the batch.
fn drop_duplicates(
    region: &BackingRegion,
    index: &PrimaryKeyIndex,
    layout: &RecordLayout,
    batch: Batch,
    report: &mut WriteReport,
) -> Result<Batch> {
    let mut kept = Batch {
        width: batch.width,
        bytes: Vec::with_capacity(batch.bytes.len()),
        positions: Vec::with_capacity(batch.len()),
    };
    let mut seen: HashSet<RecordKey> = HashSet::new();

    for i in 0..batch.len() {
        let record = batch.record(i);
        let key = layout.key_of(record);
        let stored = index.lookup_key(region.records(), layout, &key)?;
        if let Some(id) = stored {
            report.reject(
                batch.positions[i],
                TableError::MalformedRecord(format!("duplicate key, stored as record {}", id)),
            );
            continue;
        }
        if !seen.insert(key) {
            report.reject(
                batch.positions[i],
                TableError::MalformedRecord("duplicate key within batch".to_string()),
            );
            continue;
        }
        kept.bytes.extend_from_slice(record);
        kept.positions.push(batch.positions[i]);
    }

    Ok(kept)
}

/// Ensures `pending` more records fit, growing a persistent region if allowed.
fn make_room(region: &mut BackingRegion, config: &TableConfig, pending: u64, room: Room) -> Result<()> {
    let count = region.header().count();
    let capacity = region.capacity();
    let required = count.saturating_add(pending);
    if required <= capacity {
        return Ok(());
    }

    match (room, region.as_mapped_mut()) {
        (Room::Grow, Some(mapped)) => {
            grow(mapped, required, config.get_growth_bytes())?;
            Ok(())
        }
        _ => Err(TableError::CapacityExceeded {
            count,
            requested: pending,
            capacity,
        }
        .into()),
    }
}

/// Copies packed records after the published count and publishes them.
fn publish_appends(region: &mut BackingRegion, width: usize, packed: &[u8], now: f64) -> Range<u64> {
    let n = (packed.len() / width) as u64;
    let (header, records) = region.split_mut();
    let count = header.count();
    let start = count as usize * width;

    records[start..start + packed.len()].copy_from_slice(packed);
    header.set_mtime(now);
    header.lower_minchgid(count);
    header.publish_count(count + n);

    count..count + n
}
