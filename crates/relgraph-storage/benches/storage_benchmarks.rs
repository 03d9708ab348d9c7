//! Storage layer benchmarks.
//!
//! Measures write batches and snapshot reads against stores of growing
//! size, to keep the per-(object, relation) read path independent of the
//! total number of tuples.
//!
//! Run with: cargo bench -p relgraph-storage

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relgraph_storage::{MemoryTupleStore, StoredTuple, TupleFilter, TupleStore};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Creates a store pre-populated with N tuples, written in batches of 1000.
async fn setup_store_with_tuples(n: usize) -> Arc<MemoryTupleStore> {
    let store = MemoryTupleStore::new_shared();

    let batch_size = 1000;
    for batch_start in (0..n).step_by(batch_size) {
        let batch_end = (batch_start + batch_size).min(n);
        let tuples: Vec<StoredTuple> = (batch_start..batch_end)
            .map(|i| StoredTuple::new("document", format!("doc{i}"), "viewer", "user", format!("user{i}")))
            .collect();
        store.write(tuples, vec![]).await.unwrap();
    }

    store
}

/// Benchmark: Write batch of 100 tuples to store with N existing tuples.
fn bench_write_batch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("write_batch_100");
    group.sample_size(30);

    for n in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(100));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let store = rt.block_on(setup_store_with_tuples(n));
            let mut counter = n;

            b.iter(|| {
                let batch: Vec<StoredTuple> = (0..100)
                    .map(|i| {
                        counter += 1;
                        StoredTuple::new(
                            "document",
                            format!("batch_doc{counter}_{i}"),
                            "viewer",
                            "user",
                            format!("batch_user{counter}_{i}"),
                        )
                    })
                    .collect();
                rt.block_on(store.write(batch, vec![])).unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark: Read one (object, relation) at the head revision.
fn bench_read_object_relation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("read_object_relation");
    group.sample_size(100);

    for n in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let store = rt.block_on(setup_store_with_tuples(n));
            let head = rt.block_on(store.head()).unwrap();
            let filter = TupleFilter::object_relation("document", format!("doc{}", n / 2), "viewer");

            b.iter(|| {
                let result = rt.block_on(store.read(black_box(&filter), head)).unwrap();
                black_box(result);
            });
        });
    }
    group.finish();
}

/// Benchmark: Reverse lookup by user, which scans every version.
fn bench_read_by_user(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("read_by_user");
    group.sample_size(50);

    for n in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let store = rt.block_on(setup_store_with_tuples(n));
            let head = rt.block_on(store.head()).unwrap();
            let filter = TupleFilter {
                object_type: Some("document".to_string()),
                relation: Some("viewer".to_string()),
                ..TupleFilter::default()
            }
            .with_user(format!("user:user{}", n / 2));

            b.iter(|| {
                let result = rt.block_on(store.read(black_box(&filter), head)).unwrap();
                black_box(result);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_write_batch,
    bench_read_object_relation,
    bench_read_by_user,
);

criterion_main!(benches);
