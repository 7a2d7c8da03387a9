//! # Table Handle
//!
//! `Table` ties a record layout, a backing region, a process-local index and
//! the table lock together. Any number of handles, in any number of
//! processes, may open the same persistent table.
//!
//! ## Usage
//!
//! ```ignore
//! let layout = RecordLayout::keyed(8, 8, [("price", FieldType::Float64)])?;
//! let mut table = Table::open_or_create("quotes.mmt", layout, TableConfig::from_env()?)?;
//!
//! let report = table.upsert(&records)?;
//! for (id, quote) in table.read_range(report.min_touched.unwrap_or(0), u64::MAX)?.iter() {
//!     publish(id, quote);
//! }
//! ```
//!
//! ## Reads
//!
//! Readers take no lock. A `Snapshot` loads the published count once with
//! Acquire ordering and only ever exposes slots below it, so every appended
//! record it returns is complete. A handle whose mapping predates growth by
//! another process sees at most its mapped capacity until `refresh()`.
//!
//! Index lookups take `&mut self`: they may catch the local index up with
//! records appended elsewhere, or rebuild it first.
//!
//! ## Writes
//!
//! | Method   | Growth            | Existing key            |
//! |----------|-------------------|-------------------------|
//! | `insert` | never             | rejected once indexed   |
//! | `extend` | persistent only   | rejected once indexed   |
//! | `upsert` | persistent only   | overwritten in place    |
//!
//! See `table::write` for the publish protocol.

mod index_sync;
mod write;

use std::ops::Range;
use std::path::Path;

use eyre::Result;
use tracing::info;

use crate::config::TableConfig;
use crate::error::TableError;
use crate::index::{Matches, PrimaryKeyIndex};
use crate::layout::{Record, RecordKey, RecordLayout, RecordRef};
use crate::lock::{LockGuard, TableLock};
use crate::storage::{BackingRegion, MemoryRegion, MmapRegion, Region};

use index_sync::{ensure_index_locked, rebuild_shared, shared_index_ready, sync_local, visible_count};
use write::{append_records, upsert_records, Room};

pub use write::{now_seconds, Rejection, WriteReport};

/// Header fields an incremental replicator polls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeSet {
    pub mtime: f64,
    /// Lowest record id changed since the last `mark_observed`.
    pub minchgid: Option<u64>,
    pub count: u64,
}

impl ChangeSet {
    /// Ids a replicator must resend.
    pub fn pending(&self) -> Range<u64> {
        match self.minchgid {
            Some(id) => id.min(self.count)..self.count,
            None => self.count..self.count,
        }
    }
}

#[derive(Debug)]
pub struct Table {
    layout: RecordLayout,
    region: BackingRegion,
    index: PrimaryKeyIndex,
    lock: TableLock,
    config: TableConfig,
}

impl Table {
    /// Creates a persistent table at `path` with `config`'s initial capacity.
    /// Fails if the file exists.
    pub fn create<P: AsRef<Path>>(path: P, layout: RecordLayout, config: TableConfig) -> Result<Self> {
        let path = path.as_ref();
        let region = MmapRegion::create(
            path,
            layout.width(),
            layout.fingerprint(),
            config.get_initial_capacity(),
        )?;
        Ok(Self::created(path, region, layout, config))
    }

    fn created(path: &Path, region: MmapRegion, layout: RecordLayout, config: TableConfig) -> Self {
        info!(
            path = %path.display(),
            width = layout.width(),
            capacity = region.capacity(),
            "table created"
        );

        Self {
            layout,
            region: BackingRegion::Mapped(region),
            index: PrimaryKeyIndex::new(),
            lock: TableLock::for_table(path),
            config,
        }
    }

    /// Opens an existing persistent table created with `layout`.
    pub fn open<P: AsRef<Path>>(path: P, layout: RecordLayout, config: TableConfig) -> Result<Self> {
        let path = path.as_ref();
        let region = MmapRegion::open(path, layout.width(), layout.fingerprint())?;

        info!(
            path = %path.display(),
            width = layout.width(),
            count = region.header().count(),
            capacity = region.capacity(),
            "table opened"
        );

        Ok(Self {
            layout,
            region: BackingRegion::Mapped(region),
            index: PrimaryKeyIndex::new(),
            lock: TableLock::for_table(path),
            config,
        })
    }

    /// Opens `path`, creating it first if it does not exist.
    pub fn open_or_create<P: AsRef<Path>>(
        path: P,
        layout: RecordLayout,
        config: TableConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::open(path, layout, config);
        }
        let created = MmapRegion::create_new(
            path,
            layout.width(),
            layout.fingerprint(),
            config.get_initial_capacity(),
        )?;
        match created {
            Some(region) => Ok(Self::created(path, region, layout, config)),
            // Lost a creation race: another process published the file first.
            None => Self::open(path, layout, config),
        }
    }

    /// Process-local table with a fixed capacity of
    /// `config.get_initial_capacity()` records.
    pub fn ephemeral(layout: RecordLayout, config: TableConfig) -> Result<Self> {
        let region = MemoryRegion::new(
            layout.width(),
            layout.fingerprint(),
            config.get_initial_capacity(),
        )?;

        Ok(Self {
            layout,
            region: BackingRegion::Memory(region),
            index: PrimaryKeyIndex::new(),
            lock: TableLock::local(),
            config,
        })
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.region.path()
    }

    pub fn is_persistent(&self) -> bool {
        self.region.is_persistent()
    }

    /// Published record count.
    pub fn count(&self) -> u64 {
        self.region.header().count()
    }

    /// Published capacity in records.
    pub fn capacity(&self) -> u64 {
        self.region.header().capacity()
    }

    /// Lock-free view of every published record this handle can map.
    pub fn snapshot(&self) -> Snapshot<'_> {
        let end = visible_count(&self.region);
        Snapshot {
            layout: &self.layout,
            records: self.region.records(),
            start: 0,
            end,
        }
    }

    /// Remaps to a capacity grown by another handle. Returns true when the
    /// view changed.
    pub fn refresh(&mut self) -> Result<bool> {
        self.region.refresh()
    }

    /// Flushes a persistent table to disk. No-op for ephemeral tables.
    pub fn sync(&self) -> Result<()> {
        self.region.sync()
    }

    // ------------------------------------------------------------------
    // Replication
    // ------------------------------------------------------------------

    pub fn changes(&self) -> ChangeSet {
        let header = self.region.header();
        ChangeSet {
            mtime: header.mtime(),
            minchgid: header.minchgid(),
            count: header.count(),
        }
    }

    /// Published records `[from, to)`, clipped to the visible count.
    pub fn read_range(&self, from: u64, to: u64) -> Result<Snapshot<'_>> {
        let end = visible_count(&self.region).min(to);
        let start = from.min(end);
        self.region.prefetch(start, end);

        Ok(Snapshot {
            layout: &self.layout,
            records: self.region.records(),
            start,
            end,
        })
    }

    /// Resets `minchgid` after a replicator has shipped everything from
    /// `observed` on. Returns false, leaving it untouched, when it no longer
    /// equals `observed`.
    pub fn mark_observed(&mut self, observed: u64) -> Result<bool> {
        let _guard = self.lock()?;
        Ok(self.region.header().reset_minchgid(observed))
    }

    // ------------------------------------------------------------------
    // Index
    // ------------------------------------------------------------------

    /// Rebuilds the index from every published record and marks it valid
    /// for all handles.
    pub fn create_index(&mut self) -> Result<()> {
        let Table {
            layout,
            region,
            index,
            lock,
            config,
        } = self;
        let _guard = lock.acquire(config.get_lock_timeout())?;
        region.refresh()?;
        rebuild_shared(region, index, layout);
        Ok(())
    }

    /// Marks the shared index invalid, as a repair tool does after editing
    /// records behind the table's back. The next lookup or upsert rebuilds.
    pub fn invalidate_index(&mut self) -> Result<()> {
        let Table {
            region,
            index,
            lock,
            config,
            ..
        } = self;
        let _guard = lock.acquire(config.get_lock_timeout())?;
        region.header().set_index_valid(false);
        index.invalidate();
        Ok(())
    }

    pub fn index_valid(&self) -> bool {
        self.region.header().index_valid()
    }

    /// Number of shared index rebuilds so far.
    pub fn index_rebuilds(&self) -> u64 {
        self.region.header().generation()
    }

    /// Record id for each key, in order.
    pub fn lookup_by_key(&mut self, keys: &[RecordKey]) -> Result<Vec<Option<u64>>> {
        self.ensure_index()?;
        let records = self.region.records();
        keys.iter()
            .map(|key| Ok(self.index.lookup_key(records, &self.layout, key)?))
            .collect()
    }

    /// Ids of the records dated `day`, or an empty range when there are
    /// none. Once a backfill has split a day's records, fails with
    /// `DateNotContiguous`; `lookup_by_date` still answers it.
    pub fn lookup_by_date_range(&mut self, day: i32) -> Result<Range<u64>> {
        self.ensure_index()?;
        Ok(self.index.date_range(day)?)
    }

    /// Every record id dated `day`, ascending.
    pub fn lookup_by_date(&mut self, day: i32) -> Result<Vec<u64>> {
        self.ensure_index()?;
        Ok(self
            .index
            .date_ids(self.region.records(), &self.layout, day)?)
    }

    /// Records with `symbol`, newest first, at most `max_matches` of them
    /// (0 = unbounded).
    pub fn lookup_by_symbol(&mut self, symbol: &[u8], max_matches: usize) -> Result<Matches> {
        self.ensure_index()?;
        Ok(self
            .index
            .lookup_symbol(self.region.records(), &self.layout, symbol, max_matches)?)
    }

    pub fn lookup_by_portfolio(&mut self, portfolio: &[u8], max_matches: usize) -> Result<Matches> {
        self.ensure_index()?;
        Ok(self
            .index
            .lookup_portfolio(self.region.records(), &self.layout, portfolio, max_matches)?)
    }

    /// Record stored under `key`, copied out.
    pub fn get(&mut self, key: &RecordKey) -> Result<Option<Record>> {
        let ids = self.lookup_by_key(std::slice::from_ref(key))?;
        Ok(ids[0].map(|id| {
            let width = self.layout.width();
            let start = id as usize * width;
            Record::from_bytes(&self.region.records()[start..start + width])
        }))
    }

    fn ensure_index(&mut self) -> Result<()> {
        self.region.refresh()?;
        if shared_index_ready(&self.region) {
            sync_local(&self.region, &mut self.index, &self.layout)?;
            return Ok(());
        }

        let Table {
            layout,
            region,
            index,
            lock,
            config,
        } = self;
        let _guard = lock.acquire(config.get_lock_timeout())?;
        region.refresh()?;
        ensure_index_locked(region, index, layout)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Appends `records` without growing. Fails with `CapacityExceeded`, and
    /// writes nothing, when the valid records do not fit.
    pub fn insert<R: AsRef<[u8]>>(&mut self, records: &[R]) -> Result<WriteReport> {
        self.append(records, Room::Fixed)
    }

    /// Appends `records`, growing the file first when needed. Persistent
    /// tables only.
    pub fn extend<R: AsRef<[u8]>>(&mut self, records: &[R]) -> Result<WriteReport> {
        if !self.region.is_persistent() {
            return Err(TableError::UnsupportedOperation("extend on an ephemeral table").into());
        }
        self.append(records, Room::Grow)
    }

    /// Overwrites records whose key exists and appends the rest.
    pub fn upsert<R: AsRef<[u8]>>(&mut self, records: &[R]) -> Result<WriteReport> {
        let Table {
            layout,
            region,
            index,
            lock,
            config,
        } = self;
        let _guard = lock.acquire(config.get_lock_timeout())?;
        let submitted = records.iter().map(AsRef::as_ref).enumerate();
        upsert_records(region, index, layout, config, submitted, WriteReport::default())
    }

    /// Inserts records laid out as `source`, converting each to this table's
    /// layout first. Records that cannot be converted are rejected.
    pub fn insert_from<R: AsRef<[u8]>>(
        &mut self,
        source: &RecordLayout,
        records: &[R],
    ) -> Result<WriteReport> {
        let conversion = self.layout.conversion_from(source)?;
        let mut report = WriteReport::default();
        let mut converted = Vec::with_capacity(records.len());

        for (position, record) in records.iter().enumerate() {
            match conversion.apply(record.as_ref()) {
                Ok(record) => converted.push((position, record)),
                Err(e) => {
                    let error = e
                        .downcast::<TableError>()
                        .unwrap_or_else(|e| TableError::MalformedRecord(e.to_string()));
                    report.rejected.push(Rejection { position, error });
                }
            }
        }

        let Table {
            layout,
            region,
            index,
            lock,
            config,
        } = self;
        let _guard = lock.acquire(config.get_lock_timeout())?;
        let submitted = converted.iter().map(|(p, r)| (*p, r.as_bytes()));
        append_records(region, index, layout, config, submitted, Room::Fixed, report)
    }

    fn append<R: AsRef<[u8]>>(&mut self, records: &[R], room: Room) -> Result<WriteReport> {
        let Table {
            layout,
            region,
            index,
            lock,
            config,
        } = self;
        let _guard = lock.acquire(config.get_lock_timeout())?;
        let submitted = records.iter().map(AsRef::as_ref).enumerate();
        append_records(region, index, layout, config, submitted, room, WriteReport::default())
    }

    fn lock(&self) -> Result<LockGuard<'_>> {
        self.lock.acquire(self.config.get_lock_timeout())
    }
}

/// Published records `[start, end)` as of one load of the count.
#[derive(Clone, Copy)]
pub struct Snapshot<'a> {
    layout: &'a RecordLayout,
    records: &'a [u8],
    start: u64,
    end: u64,
}

impl<'a> Snapshot<'a> {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn ids(&self) -> Range<u64> {
        self.start..self.end
    }

    pub fn get(&self, id: u64) -> Option<RecordRef<'a>> {
        if id < self.start || id >= self.end {
            return None;
        }
        Some(RecordRef::new_unchecked(self.slot(id), self.layout))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, RecordRef<'a>)> + 'a {
        let Snapshot {
            layout,
            records,
            start,
            end,
        } = *self;
        let width = layout.width();
        (start..end).map(move |id| {
            let offset = id as usize * width;
            (id, RecordRef::new_unchecked(&records[offset..offset + width], layout))
        })
    }

    /// Raw bytes of the snapshot's records, packed.
    pub fn as_bytes(&self) -> &'a [u8] {
        let width = self.layout.width();
        &self.records[self.start as usize * width..self.end as usize * width]
    }

    fn slot(&self, id: u64) -> &'a [u8] {
        let width = self.layout.width();
        let offset = id as usize * width;
        &self.records[offset..offset + width]
    }
}

impl std::fmt::Debug for Snapshot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::layout::{FieldType, RecordBuilder};

    fn layout() -> RecordLayout {
        RecordLayout::keyed(8, 8, [("qty", FieldType::Int64)]).unwrap()
    }

    fn quote(layout: &RecordLayout, date: i32, symbol: &str, qty: i64) -> Record {
        let mut builder = RecordBuilder::new(layout);
        builder.set_key(date, symbol.as_bytes(), b"P").unwrap();
        builder.set_int64(3, qty).unwrap();
        builder.build()
    }

    fn ephemeral(capacity: u64) -> Table {
        Table::ephemeral(layout(), TableConfig::new().initial_capacity(capacity)).unwrap()
    }

    #[test]
    fn insert_publishes_and_snapshot_reads_back() {
        let mut table = ephemeral(8);
        let layout = table.layout().clone();
        let records = vec![quote(&layout, 1, "A", 10), quote(&layout, 1, "B", 20)];

        let report = table.insert(&records).unwrap();

        assert_eq!(report.appended, 2);
        assert_eq!(report.min_touched, Some(0));
        assert_eq!(table.count(), 2);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 2);
        let (id, first) = snapshot.iter().next().unwrap();
        assert_eq!(id, 0);
        assert_eq!(first.symbol(), b"A");
        assert!(first.mtime() > 0.0);
        assert!(snapshot.get(2).is_none());
    }

    #[test]
    fn insert_without_room_writes_nothing() {
        let mut table = ephemeral(1);
        let layout = table.layout().clone();
        let records = vec![quote(&layout, 1, "A", 1), quote(&layout, 1, "B", 2)];

        let err = table.insert(&records).unwrap_err();

        assert_eq!(TableError::kind_of(&err), Some(ErrorKind::CapacityExceeded));
        assert_eq!(table.count(), 0);
        assert_eq!(table.changes().minchgid, None);
    }

    #[test]
    fn extend_is_unsupported_on_ephemeral_tables() {
        let mut table = ephemeral(4);
        let layout = table.layout().clone();

        let err = table.extend(&[quote(&layout, 1, "A", 1)]).unwrap_err();

        assert_eq!(
            TableError::kind_of(&err),
            Some(ErrorKind::UnsupportedOperation)
        );
    }

    #[test]
    fn upsert_updates_in_place_and_appends_new_keys() {
        let mut table = ephemeral(4);
        let layout = table.layout().clone();
        table
            .insert(&[quote(&layout, 1, "A", 1), quote(&layout, 1, "B", 2)])
            .unwrap();
        table.mark_observed(0).unwrap();

        let report = table
            .upsert(&[quote(&layout, 1, "B", 99), quote(&layout, 2, "C", 3)])
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.appended, 1);
        assert_eq!(report.min_touched, Some(1));
        assert_eq!(table.count(), 3);
        assert_eq!(table.changes().minchgid, Some(1));

        let b = table.get(&RecordKey::new(1, "B", "P")).unwrap().unwrap();
        assert_eq!(
            RecordRef::new(b.as_bytes(), &layout).unwrap().get(3),
            Some(crate::layout::FieldValue::Int64(99))
        );
    }

    #[test]
    fn upsert_rejects_future_timestamps() {
        let mut table = ephemeral(4);
        let layout = table.layout().clone();
        let mut future = quote(&layout, 1, "A", 1);
        layout.set_mtime(future.as_bytes_mut(), now_seconds() + 3600.0);

        let report = table.upsert(&[future, quote(&layout, 1, "B", 2)]).unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].position, 0);
        assert_eq!(
            report.rejected[0].error.kind(),
            ErrorKind::InvalidTimestamp
        );
    }

    #[test]
    fn repeated_keys_in_one_batch_take_the_last_value() {
        let mut table = ephemeral(4);
        let layout = table.layout().clone();

        let report = table
            .upsert(&[quote(&layout, 1, "A", 1), quote(&layout, 1, "A", 2)])
            .unwrap();

        assert_eq!(report.appended, 1);
        assert_eq!(table.count(), 1);
        let a = table.snapshot().get(0).unwrap();
        assert_eq!(a.get(3), Some(crate::layout::FieldValue::Int64(2)));
    }

    #[test]
    fn indexed_table_rejects_duplicate_inserts() {
        let mut table = ephemeral(4);
        let layout = table.layout().clone();
        table.insert(&[quote(&layout, 1, "A", 1)]).unwrap();
        table.create_index().unwrap();

        let report = table
            .insert(&[quote(&layout, 1, "A", 5), quote(&layout, 1, "B", 5)])
            .unwrap();

        assert_eq!(report.appended, 1);
        assert_eq!(report.rejected[0].position, 0);
        assert_eq!(table.count(), 2);
    }

    #[test]
    fn lookups_build_the_index_lazily() {
        let mut table = ephemeral(8);
        let layout = table.layout().clone();
        table
            .insert(&[
                quote(&layout, 1, "A", 1),
                quote(&layout, 2, "A", 2),
                quote(&layout, 2, "B", 3),
            ])
            .unwrap();

        assert!(!table.index_valid());
        assert_eq!(table.lookup_by_symbol(b"A", 0).unwrap().as_slice(), &[1, 0]);
        assert!(table.index_valid());
        assert_eq!(table.index_rebuilds(), 1);
        assert_eq!(table.lookup_by_date_range(2).unwrap(), 1..3);
        assert_eq!(table.lookup_by_portfolio(b"P", 2).unwrap().as_slice(), &[2, 1]);
    }

    #[test]
    fn invalidated_index_is_rebuilt_exactly_once() {
        let mut table = ephemeral(8);
        let layout = table.layout().clone();
        table.upsert(&[quote(&layout, 1, "A", 1)]).unwrap();
        let before = table.index_rebuilds();

        table.invalidate_index().unwrap();
        assert!(!table.index_valid());

        table.upsert(&[quote(&layout, 1, "A", 2)]).unwrap();
        assert!(table.index_valid());
        assert_eq!(table.index_rebuilds(), before + 1);

        table.lookup_by_key(&[RecordKey::new(1, "A", "P")]).unwrap();
        assert_eq!(table.index_rebuilds(), before + 1);
    }

    #[test]
    fn out_of_order_append_forces_a_shared_rebuild() {
        let mut table = ephemeral(8);
        let layout = table.layout().clone();
        table.upsert(&[quote(&layout, 5, "A", 1)]).unwrap();
        let before = table.index_rebuilds();

        table.upsert(&[quote(&layout, 3, "B", 1)]).unwrap();

        assert_eq!(table.index_rebuilds(), before + 1);
        assert_eq!(table.lookup_by_date_range(3).unwrap(), 1..2);
        assert_eq!(table.lookup_by_date(5).unwrap(), vec![0]);
        assert_eq!(
            table
                .lookup_by_key(&[RecordKey::new(5, "A", "P"), RecordKey::new(3, "B", "P")])
                .unwrap(),
            vec![Some(0), Some(1)]
        );
    }

    #[test]
    fn every_day_is_answered_after_a_backfill() {
        let mut table = ephemeral(8);
        let layout = table.layout().clone();
        table
            .upsert(&[
                quote(&layout, 1, "A", 1),
                quote(&layout, 2, "A", 2),
                quote(&layout, 3, "A", 3),
            ])
            .unwrap();
        table.upsert(&[quote(&layout, 2, "B", 4)]).unwrap();

        assert!(table.index_valid());
        assert_eq!(table.lookup_by_date(1).unwrap(), vec![0]);
        assert_eq!(table.lookup_by_date(2).unwrap(), vec![1, 3]);
        assert_eq!(table.lookup_by_date(3).unwrap(), vec![2]);
        assert!(table.lookup_by_date(4).unwrap().is_empty());

        for day in 1..=3 {
            let err = table.lookup_by_date_range(day).unwrap_err();
            assert_eq!(
                TableError::kind_of(&err),
                Some(ErrorKind::DateNotContiguous),
                "day {}",
                day
            );
        }
        assert_eq!(table.lookup_by_date_range(4).unwrap(), 0..0);
    }

    #[test]
    fn read_range_is_clipped_to_published_records() {
        let mut table = ephemeral(8);
        let layout = table.layout().clone();
        table
            .insert(&[quote(&layout, 1, "A", 1), quote(&layout, 1, "B", 2)])
            .unwrap();

        let range = table.read_range(1, 100).unwrap();
        assert_eq!(range.ids(), 1..2);
        assert_eq!(range.as_bytes().len(), layout.width());

        assert!(table.read_range(5, 9).unwrap().is_empty());
    }

    #[test]
    fn mark_observed_keeps_lower_changes() {
        let mut table = ephemeral(8);
        let layout = table.layout().clone();
        table.insert(&[quote(&layout, 1, "A", 1)]).unwrap();

        let changes = table.changes();
        assert_eq!(changes.pending(), 0..1);

        table.insert(&[quote(&layout, 1, "B", 1)]).unwrap();
        assert!(table.mark_observed(0).unwrap());
        assert_eq!(table.changes().minchgid, None);
        assert!(!table.mark_observed(0).unwrap());
        assert_eq!(table.changes().pending(), 2..2);
    }

    #[test]
    fn insert_from_converts_between_layouts() {
        let mut table = ephemeral(4);
        let wide = RecordLayout::keyed(16, 8, [("qty", FieldType::Int32)]).unwrap();
        let mut builder = RecordBuilder::new(&wide);
        builder.set_key(4, b"ABCDEFGHIJ", b"P").unwrap();
        builder.set_int32(3, 7).unwrap();
        let record = builder.build();

        let report = table
            .insert_from(&wide, &[record.into_bytes(), vec![0u8; 2]])
            .unwrap();

        assert_eq!(report.appended, 1);
        assert_eq!(report.rejected[0].position, 1);
        let stored = table.snapshot().get(0).unwrap();
        assert_eq!(stored.symbol(), b"ABCDEFGH");
        assert_eq!(stored.get(3), Some(crate::layout::FieldValue::Int64(7)));
    }
}
