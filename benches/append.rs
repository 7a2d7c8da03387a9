//! Append and lookup benchmarks for mmtable
//!
//! These benchmarks measure batch insert into a fresh mapped file, upsert
//! of existing keys, and key lookup through the local index.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mmtable::{FieldType, Record, RecordBuilder, RecordKey, RecordLayout, Table, TableConfig};
use tempfile::tempdir;

fn layout() -> RecordLayout {
    RecordLayout::keyed(
        8,
        8,
        [
            ("bid", FieldType::Float64),
            ("ask", FieldType::Float64),
            ("size", FieldType::Int64),
        ],
    )
    .unwrap()
}

fn quotes(layout: &RecordLayout, n: usize) -> Vec<Record> {
    let mut builder = RecordBuilder::new(layout);
    (0..n)
        .map(|i| {
            builder.reset();
            builder
                .set_key(19_000 + (i / 1000) as i32, format!("S{}", i % 1000).as_bytes(), b"BOOK")
                .unwrap();
            builder.set_float64(3, i as f64).unwrap();
            builder.set_float64(4, i as f64 + 0.01).unwrap();
            builder.set_int64(5, 100).unwrap();
            builder.build()
        })
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    let layout = layout();

    for size in [100usize, 1_000, 10_000] {
        let batch = quotes(&layout, size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("mapped", size), &batch, |b, batch| {
            b.iter_with_setup(
                || {
                    let dir = tempdir().unwrap();
                    let config = TableConfig::new().initial_capacity(size as u64);
                    let table = Table::create(dir.path().join("b.mmt"), layout.clone(), config).unwrap();
                    (dir, table)
                },
                |(_dir, mut table)| {
                    black_box(table.insert(batch).unwrap());
                },
            );
        });
        group.bench_with_input(BenchmarkId::new("ephemeral", size), &batch, |b, batch| {
            b.iter_with_setup(
                || {
                    let config = TableConfig::new().initial_capacity(size as u64);
                    Table::ephemeral(layout.clone(), config).unwrap()
                },
                |mut table| {
                    black_box(table.insert(batch).unwrap());
                },
            );
        });
    }

    group.finish();
}

fn bench_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("upsert");
    let layout = layout();
    let existing = quotes(&layout, 10_000);

    let dir = tempdir().unwrap();
    let mut table = Table::create(dir.path().join("b.mmt"), layout.clone(), TableConfig::new()).unwrap();
    table.extend(&existing).unwrap();
    table.create_index().unwrap();

    for size in [10usize, 100, 1_000] {
        let batch: Vec<Record> = existing.iter().rev().take(size).cloned().collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("in_place", size), &batch, |b, batch| {
            b.iter(|| black_box(table.upsert(batch).unwrap()));
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    let layout = layout();
    let existing = quotes(&layout, 100_000);

    let dir = tempdir().unwrap();
    let mut table = Table::create(dir.path().join("b.mmt"), layout.clone(), TableConfig::new()).unwrap();
    table.extend(&existing).unwrap();
    table.create_index().unwrap();

    let keys: Vec<RecordKey> = existing
        .iter()
        .step_by(997)
        .map(|r| layout.key_of(r.as_bytes()))
        .collect();

    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("by_key", |b| {
        b.iter(|| black_box(table.lookup_by_key(black_box(&keys)).unwrap()));
    });
    group.bench_function("by_symbol", |b| {
        b.iter(|| black_box(table.lookup_by_symbol(black_box(b"S42"), 0).unwrap()));
    });
    group.bench_function("by_date", |b| {
        b.iter(|| black_box(table.lookup_by_date_range(black_box(19_050)).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_upsert, bench_lookup);
criterion_main!(benches);
