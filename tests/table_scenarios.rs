//! # Table Scenario Tests
//!
//! End-to-end behavior of a single table handle: the capacity-4 walkthrough
//! in ephemeral and persistent form, growth without relocation, reopening,
//! layout validation on open, and index repair after invalidation.
//!
//! ## Usage
//!
//! ```sh
//! cargo test --test table_scenarios
//! ```

use mmtable::{
    ErrorKind, FieldType, FieldValue, Record, RecordBuilder, RecordKey, RecordLayout, Table,
    TableConfig, TableError,
};
use tempfile::tempdir;

const PX: usize = 3;

fn layout() -> RecordLayout {
    RecordLayout::keyed(8, 8, [("px", FieldType::Float64)]).unwrap()
}

fn quote(layout: &RecordLayout, date: i32, symbol: &str, px: f64) -> Record {
    let mut builder = RecordBuilder::new(layout);
    builder.set_key(date, symbol.as_bytes(), b"BOOK").unwrap();
    builder.set_float64(PX, px).unwrap();
    builder.set_mtime(1_700_000_000.0);
    builder.build()
}

fn small_config() -> TableConfig {
    // One record per growth step, so growth lands exactly on the requirement.
    TableConfig::new().initial_capacity(4).growth_bytes(1)
}

fn px_of(table: &Table, id: u64) -> Option<FieldValue<'_>> {
    table.snapshot().get(id).and_then(|r| r.get(PX))
}

#[test]
fn capacity_four_walkthrough_in_memory() {
    let layout = layout();
    let mut table = Table::ephemeral(layout.clone(), small_config()).unwrap();

    let report = table
        .insert(&[quote(&layout, 1, "A", 1.0), quote(&layout, 1, "B", 2.0)])
        .unwrap();
    assert_eq!(report.appended, 2);
    assert_eq!(table.count(), 2);
    let a_id = 0;

    let report = table
        .upsert(&[quote(&layout, 1, "A", 10.0), quote(&layout, 1, "C", 3.0)])
        .unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.appended, 1);
    assert_eq!(table.count(), 3);
    assert_eq!(px_of(&table, a_id), Some(FieldValue::Float64(10.0)));
    assert_eq!(table.changes().minchgid, Some(a_id));

    let err = table
        .extend(&[quote(&layout, 1, "D", 4.0)])
        .unwrap_err();
    assert_eq!(
        TableError::kind_of(&err),
        Some(ErrorKind::UnsupportedOperation)
    );
    assert_eq!(table.count(), 3);
}

#[test]
fn capacity_four_walkthrough_on_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quotes.mmt");
    let layout = layout();
    let mut table = Table::create(&path, layout.clone(), small_config()).unwrap();

    table
        .insert(&[quote(&layout, 1, "A", 1.0), quote(&layout, 1, "B", 2.0)])
        .unwrap();
    table
        .upsert(&[quote(&layout, 1, "A", 10.0), quote(&layout, 1, "C", 3.0)])
        .unwrap();
    assert_eq!(table.count(), 3);
    assert_eq!(table.changes().minchgid, Some(0));

    let before = table.snapshot().as_bytes().to_vec();
    let report = table
        .extend(&[
            quote(&layout, 2, "D", 4.0),
            quote(&layout, 2, "E", 5.0),
            quote(&layout, 2, "F", 6.0),
        ])
        .unwrap();

    assert_eq!(report.appended, 3);
    assert!(table.capacity() >= 6);
    assert_eq!(table.count(), 6);
    assert_eq!(&table.snapshot().as_bytes()[..before.len()], before.as_slice());
}

#[test]
fn insert_never_grows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quotes.mmt");
    let layout = layout();
    let mut table = Table::create(&path, layout.clone(), small_config()).unwrap();
    let batch: Vec<Record> = (0..5)
        .map(|i| quote(&layout, 1, &format!("S{}", i), i as f64))
        .collect();

    let err = table.insert(&batch).unwrap_err();

    assert_eq!(TableError::kind_of(&err), Some(ErrorKind::CapacityExceeded));
    assert_eq!(table.count(), 0);
    assert_eq!(table.capacity(), 4);

    table.extend(&batch).unwrap();
    assert_eq!(table.count(), 5);
}

#[test]
fn reopen_sees_published_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quotes.mmt");
    let layout = layout();
    {
        let mut table = Table::create(&path, layout.clone(), small_config()).unwrap();
        table
            .extend(&[
                quote(&layout, 7, "A", 1.0),
                quote(&layout, 7, "B", 2.0),
                quote(&layout, 8, "A", 3.0),
                quote(&layout, 8, "B", 4.0),
                quote(&layout, 9, "A", 5.0),
            ])
            .unwrap();
        table.sync().unwrap();
    }

    let mut table = Table::open(&path, layout.clone(), TableConfig::new()).unwrap();

    assert_eq!(table.count(), 5);
    assert_eq!(table.capacity(), 5);
    assert_eq!(
        table
            .lookup_by_key(&[RecordKey::new(8, "B", "BOOK")])
            .unwrap(),
        vec![Some(3)]
    );
    assert_eq!(table.lookup_by_date_range(8).unwrap(), 2..4);
    assert_eq!(table.lookup_by_symbol(b"A", 0).unwrap().as_slice(), &[4, 2, 0]);
}

#[test]
fn create_refuses_an_existing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quotes.mmt");
    Table::create(&path, layout(), small_config()).unwrap();

    let err = Table::create(&path, layout(), small_config()).unwrap_err();

    assert_eq!(
        TableError::kind_of(&err),
        Some(ErrorKind::StorageUnavailable)
    );
    assert!(Table::open_or_create(&path, layout(), small_config()).is_ok());
}

#[test]
fn open_or_create_reports_the_creation_failure() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent").join("quotes.mmt");

    let err = Table::open_or_create(&path, layout(), small_config()).unwrap_err();

    assert_eq!(
        TableError::kind_of(&err),
        Some(ErrorKind::StorageUnavailable)
    );
    assert!(err.to_string().contains("failed to create file"), "{}", err);
}

#[test]
fn open_rejects_a_different_layout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quotes.mmt");
    Table::create(&path, layout(), small_config()).unwrap();
    let other = RecordLayout::keyed(8, 8, [("qty", FieldType::Int64)]).unwrap();

    let err = Table::open(&path, other, TableConfig::new()).unwrap_err();

    assert_eq!(
        TableError::kind_of(&err),
        Some(ErrorKind::StorageUnavailable)
    );
}

#[test]
fn open_of_a_missing_file_is_unavailable() {
    let dir = tempdir().unwrap();

    let err = Table::open(dir.path().join("missing.mmt"), layout(), TableConfig::new()).unwrap_err();

    assert_eq!(
        TableError::kind_of(&err),
        Some(ErrorKind::StorageUnavailable)
    );
}

#[test]
fn malformed_records_are_reported_by_position() {
    let layout = layout();
    let mut table = Table::ephemeral(layout.clone(), small_config()).unwrap();
    let mut nameless = quote(&layout, 1, "X", 0.0);
    nameless.as_bytes_mut()[4..12].fill(0);

    let report = table
        .insert(&[
            quote(&layout, 1, "A", 1.0),
            nameless,
            Record::from_bytes(vec![1u8; 5]),
            quote(&layout, -3, "B", 1.0),
        ])
        .unwrap();

    assert_eq!(report.applied, 1);
    let positions: Vec<usize> = report.rejected.iter().map(|r| r.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);
    assert!(report
        .rejected
        .iter()
        .all(|r| r.error.kind() == ErrorKind::MalformedRecord));
    assert_eq!(table.count(), 1);
}

#[test]
fn every_key_is_found_after_create_index() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quotes.mmt");
    let layout = layout();
    let mut table = Table::create(&path, layout.clone(), TableConfig::new()).unwrap();
    let batch: Vec<Record> = (0..500)
        .map(|i| quote(&layout, 100 + i / 50, &format!("S{}", i % 50), i as f64))
        .collect();
    table.insert(&batch).unwrap();

    table.create_index().unwrap();

    let keys: Vec<RecordKey> = batch.iter().map(|r| layout.key_of(r.as_bytes())).collect();
    let ids = table.lookup_by_key(&keys).unwrap();
    for (expected, id) in ids.into_iter().enumerate() {
        assert_eq!(id, Some(expected as u64));
    }
}

#[test]
fn invalidated_index_is_repaired_by_the_next_upsert() {
    let layout = layout();
    let mut table = Table::ephemeral(layout.clone(), TableConfig::new()).unwrap();
    table
        .insert(&[quote(&layout, 1, "A", 1.0), quote(&layout, 1, "B", 2.0)])
        .unwrap();
    table.create_index().unwrap();
    let rebuilds = table.index_rebuilds();

    table.invalidate_index().unwrap();
    assert!(!table.index_valid());

    let report = table.upsert(&[quote(&layout, 1, "B", 20.0)]).unwrap();

    assert_eq!(report.updated, 1);
    assert!(table.index_valid());
    assert_eq!(table.index_rebuilds(), rebuilds + 1);
    assert_eq!(
        table
            .lookup_by_key(&[RecordKey::new(1, "B", "BOOK")])
            .unwrap(),
        vec![Some(1)]
    );
    assert_eq!(table.index_rebuilds(), rebuilds + 1);
}

#[test]
fn replication_cycle_ships_only_changed_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quotes.mmt");
    let layout = layout();
    let mut table = Table::create(&path, layout.clone(), TableConfig::new()).unwrap();
    table
        .insert(&[
            quote(&layout, 1, "A", 1.0),
            quote(&layout, 1, "B", 2.0),
            quote(&layout, 1, "C", 3.0),
        ])
        .unwrap();

    let changes = table.changes();
    assert_eq!(changes.pending(), 0..3);
    let shipped = table.read_range(changes.pending().start, changes.pending().end).unwrap();
    assert_eq!(shipped.len(), 3);
    assert!(table.mark_observed(changes.minchgid.unwrap()).unwrap());

    table.upsert(&[quote(&layout, 1, "B", 22.0)]).unwrap();

    let changes = table.changes();
    assert_eq!(changes.pending(), 1..3);
    let ids: Vec<u64> = table
        .read_range(changes.pending().start, changes.pending().end)
        .unwrap()
        .iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(changes.mtime >= 1_700_000_000.0);
}

#[test]
fn insert_from_copies_down_wider_fields() {
    let layout = layout();
    let mut table = Table::ephemeral(layout.clone(), TableConfig::new()).unwrap();
    let feed = RecordLayout::keyed(
        12,
        4,
        [("px", FieldType::Float32), ("venue", FieldType::Bytes(4))],
    )
    .unwrap();
    let mut builder = RecordBuilder::new(&feed);
    builder.set_key(3, b"LONGSYMBOL12", b"BOOK").unwrap();
    builder.set_float32(PX, 2.5).unwrap();
    builder.set_bytes(4, b"XNYS").unwrap();

    let report = table.insert_from(&feed, &[builder.build()]).unwrap();

    assert!(report.is_complete());
    let stored = table.snapshot().get(0).unwrap();
    assert_eq!(stored.symbol(), b"LONGSYMB");
    assert_eq!(stored.portfolio(), b"BOOK");
    assert_eq!(stored.get(PX), Some(FieldValue::Float64(2.5)));
}

#[test]
fn upserts_over_a_long_single_symbol_history_update_in_place() {
    let layout = layout();
    let mut table =
        Table::ephemeral(layout.clone(), TableConfig::new().initial_capacity(5_000)).unwrap();
    let history: Vec<Record> = (0..5_000)
        .map(|day| quote(&layout, day, "AAPL", day as f64))
        .collect();
    table.upsert(&history).unwrap();

    let revised: Vec<Record> = (0..5_000)
        .step_by(7)
        .map(|day| quote(&layout, day, "AAPL", -1.0))
        .collect();
    let report = table.upsert(&revised).unwrap();

    assert_eq!(report.updated, revised.len());
    assert_eq!(report.appended, 0);
    assert_eq!(table.count(), 5_000);
    assert_eq!(px_of(&table, 7 * 100), Some(FieldValue::Float64(-1.0)));
    assert_eq!(px_of(&table, 1), Some(FieldValue::Float64(1.0)));

    let keys: Vec<RecordKey> = (0..5_000).map(|day| RecordKey::new(day, "AAPL", "BOOK")).collect();
    let found = table.lookup_by_key(&keys).unwrap();
    assert!(found.iter().enumerate().all(|(day, id)| *id == Some(day as u64)));
}
