//! Instance operation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use objdb_bench::{memory_instance, populate, random_text, schema, AGE, NAME};
use objdb_core::{
    AggregationKind, Filter, Instance, InstanceConfig, Query, Sort, StorageKind, Value,
};
use rand::Rng;
use tempfile::TempDir;

fn query(db: &Instance, filter: Option<Filter>, sort: Option<(u16, Sort)>) -> Query {
    let mut builder = db.query(0).unwrap();
    if let Some(filter) = filter {
        builder.set_filter(filter);
    }
    if let Some((property, order)) = sort {
        builder.sort_by(property, order, true);
    }
    builder.build().unwrap()
}

/// Benchmark single-object insert transactions.
fn bench_single_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_insert");

    for name_len in [16, 256, 4096].iter() {
        group.throughput(Throughput::Bytes(*name_len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name_len), name_len, |b, &name_len| {
            let db = memory_instance();
            b.iter(|| {
                populate(&db, 1, black_box(name_len)).unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark batched inserts.
fn bench_batch_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_insert");

    for batch_size in [10u32, 100, 1000].iter() {
        group.throughput(Throughput::Elements(u64::from(*batch_size)));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let db = memory_instance();
                b.iter(|| {
                    populate(&db, black_box(batch_size), 16).unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark commits to a native store, with and without fsync.
fn bench_native_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("native_commit");
    group.sample_size(20);

    for sync in [false, true].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(sync), sync, |b, &sync| {
            let temp_dir = TempDir::new().unwrap();
            let config = InstanceConfig::new("bench", temp_dir.path(), StorageKind::Native)
                .with_sync_on_commit(sync);
            let db = Instance::open(1, schema(), config).unwrap();
            b.iter(|| {
                populate(&db, 1, 16).unwrap();
            });
            db.close(true).unwrap();
        });
    }
    group.finish();
}

/// Benchmark point reads from a populated instance.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    for count in [100u32, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let db = memory_instance();
            let ids = populate(&db, count, 16).unwrap();
            let txn = db.begin_txn(false).unwrap();
            let mut rng = rand::thread_rng();

            b.iter(|| {
                let id = ids[rng.gen_range(0..ids.len())];
                black_box(db.get(&txn, 0, black_box(id)).unwrap());
            });
        });
    }
    group.finish();
}

/// Benchmark filtered queries: indexed range, full scan and text match.
fn bench_filtered_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("filtered_query");
    let db = memory_instance();
    populate(&db, 10_000, 16).unwrap();
    let txn = db.begin_txn(false).unwrap();

    let cases = [
        ("indexed_between", Filter::between(AGE, 20, 22)),
        ("scan_starts_with", Filter::starts_with(NAME, "a")),
        (
            "scan_or",
            Filter::or(vec![Filter::less(AGE, 5), Filter::ends_with(NAME, "z").ignore_case()]),
        ),
    ];
    for (name, filter) in cases {
        let query = query(&db, Some(filter), None);
        group.bench_function(name, |b| {
            b.iter(|| {
                let hits = db.cursor(&txn, black_box(&query), 0, None).unwrap().count();
                black_box(hits);
            });
        });
    }
    group.finish();
}

/// Benchmark sorted, windowed queries.
fn bench_sorted_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorted_window");

    for count in [1000u32, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let db = memory_instance();
            populate(&db, count, 16).unwrap();
            let txn = db.begin_txn(false).unwrap();
            let query = query(&db, None, Some((NAME, Sort::Desc)));

            b.iter(|| {
                let page: Vec<_> = db
                    .cursor(&txn, black_box(&query), 100, Some(20))
                    .unwrap()
                    .collect();
                black_box(page);
            });
        });
    }
    group.finish();
}

/// Benchmark aggregations over the whole collection.
fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    let db = memory_instance();
    populate(&db, 10_000, 16).unwrap();
    let txn = db.begin_txn(false).unwrap();
    let everyone = query(&db, None, None);

    for (name, kind, property) in [
        ("count", AggregationKind::Count, None),
        ("average_age", AggregationKind::Average, Some(AGE)),
        ("max_name", AggregationKind::Max, Some(NAME)),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                black_box(db.aggregate(&txn, &everyone, kind, property).unwrap());
            });
        });
    }
    group.finish();
}

/// Benchmark updating one property of one object.
fn bench_update(c: &mut Criterion) {
    c.bench_function("update", |b| {
        let db = memory_instance();
        let ids = populate(&db, 1000, 16).unwrap();
        let mut rng = rand::thread_rng();

        b.iter(|| {
            let id = ids[rng.gen_range(0..ids.len())];
            let mut txn = db.begin_txn(true).unwrap();
            let age = Value::Integer(rng.gen_range(0..100));
            db.update(&mut txn, 0, black_box(id), &[(AGE, Some(age))]).unwrap();
            db.commit_txn(txn).unwrap();
        });
    });
}

/// Benchmark object deletion.
fn bench_delete(c: &mut Criterion) {
    c.bench_function("delete", |b| {
        let db = memory_instance();

        b.iter_batched(
            || populate(&db, 1, 16).unwrap()[0],
            |id| {
                let mut txn = db.begin_txn(true).unwrap();
                db.delete(&mut txn, 0, black_box(id)).unwrap();
                db.commit_txn(txn).unwrap();
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

/// Benchmark transaction overhead (empty write transaction).
fn bench_transaction_overhead(c: &mut Criterion) {
    c.bench_function("transaction_overhead", |b| {
        let db = memory_instance();

        b.iter(|| {
            let txn = db.begin_txn(true).unwrap();
            db.commit_txn(txn).unwrap();
        });
    });
}

/// Benchmark JSON export and import.
fn bench_json(c: &mut Criterion) {
    let mut group = c.benchmark_group("json");
    group.throughput(Throughput::Elements(1000));

    let db = memory_instance();
    populate(&db, 1000, 16).unwrap();
    let txn = db.begin_txn(false).unwrap();
    let exported = db.export_json(&txn, 0).unwrap();
    db.abort_txn(txn).unwrap();

    group.bench_function("export_1000", |b| {
        let txn = db.begin_txn(false).unwrap();
        b.iter(|| black_box(db.export_json(&txn, 0).unwrap()));
    });

    group.bench_function("import_1000", |b| {
        let target = memory_instance();
        b.iter(|| {
            let mut txn = target.begin_txn(true).unwrap();
            target.import_json(&mut txn, 0, black_box(&exported)).unwrap();
            target.abort_txn(txn).unwrap();
        });
    });
    group.finish();
}

/// Benchmark compaction of a log full of overwritten objects.
fn bench_compact(c: &mut Criterion) {
    c.bench_function("compact_1000_live", |b| {
        b.iter_batched(
            || {
                let db = memory_instance();
                let ids = populate(&db, 1000, 16).unwrap();
                for id in ids.iter().step_by(2) {
                    let mut txn = db.begin_txn(true).unwrap();
                    let name = Value::String(random_text(16));
                    db.update(&mut txn, 0, *id, &[(NAME, Some(name))]).unwrap();
                    db.commit_txn(txn).unwrap();
                }
                db
            },
            |db| db.compact().unwrap(),
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    bench_single_insert,
    bench_batch_insert,
    bench_native_commit,
    bench_get,
    bench_filtered_query,
    bench_sorted_window,
    bench_aggregate,
    bench_update,
    bench_delete,
    bench_transaction_overhead,
    bench_json,
    bench_compact,
);

criterion_main!(benches);
