//! Performance benchmarks for hashing, reconstruction and closures.
//!
//! Run with: `cargo bench --bench hashing`
//!
//! ## Performance Targets
//!
//! | Operation | Target | Notes |
//! |-----------|--------|-------|
//! | Fragment tree | Linear in value size | One SHA-256 per fragment |
//! | Reconstruction | Linear in closure size | In-memory store |
//! | Cached closure | <10µs | LRU cache hit |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeMap;
use std::sync::Arc;

use kitsugi::store::InMemoryGraphStore;
use kitsugi::{fragment_tree, ClosureIndex, Ingestor, Reconstructor, Value};

/// Build a record list with `records` entries sharing a few sub-objects.
fn make_value(records: usize) -> Value {
    let items = (0..records)
        .map(|i| {
            let mut address = BTreeMap::new();
            address.insert("city".to_string(), Value::from(["Springfield", "Shelbyville"][i % 2]));
            address.insert("zip".to_string(), Value::from((i % 7) as i64));

            let mut record = BTreeMap::new();
            record.insert("id".to_string(), Value::from(i as i64));
            record.insert("name".to_string(), Value::String(format!("user_{i}")));
            record.insert("active".to_string(), Value::from(i % 3 == 0));
            record.insert("address".to_string(), Value::Object(address));
            record.insert(
                "tags".to_string(),
                Value::Array(vec![Value::from("a"), Value::from("b"), Value::Null]),
            );
            Value::Object(record)
        })
        .collect();
    Value::Array(items)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("tokio runtime")
}

/// Benchmark canonical hashing of a whole value.
fn bench_fragment_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragment_tree");

    for records in [10, 100, 1000] {
        let value = make_value(records);
        group.throughput(Throughput::Elements(records as u64));
        group.bench_with_input(BenchmarkId::new("records", records), &value, |b, value| {
            b.iter(|| fragment_tree(black_box(value)))
        });
    }

    group.finish();
}

/// Benchmark rebuilding a stored value from its root hash.
fn bench_reconstruct(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("reconstruct");

    for records in [10, 100, 1000] {
        let store = Arc::new(InMemoryGraphStore::new());
        let ingestor = Ingestor::with_extensions(Arc::clone(&store), vec![]);
        let value = make_value(records);
        let root = rt
            .block_on(ingestor.ingest_value("bench.json", &value))
            .expect("ingest")
            .root;
        let reconstructor = Reconstructor::new(store);

        group.throughput(Throughput::Elements(records as u64));
        group.bench_with_input(BenchmarkId::new("records", records), &root, |b, root| {
            b.iter(|| {
                let rebuilt = rt.block_on(reconstructor.reconstruct(black_box(root))).expect("reconstruct");
                assert_eq!(rebuilt, value);
                rebuilt
            })
        });
    }

    group.finish();
}

/// Benchmark closure lookups, cold and cached.
fn bench_closure(c: &mut Criterion) {
    let rt = runtime();
    let store = Arc::new(InMemoryGraphStore::new());
    let ingestor = Ingestor::with_extensions(Arc::clone(&store), vec![]);
    let root = rt
        .block_on(ingestor.ingest_value("bench.json", &make_value(500)))
        .expect("ingest")
        .root;

    let mut group = c.benchmark_group("closure");

    let cold = ClosureIndex::new(Arc::clone(&store), 0);
    group.bench_function("cold", |b| {
        b.iter(|| rt.block_on(cold.closure(black_box(&root))).expect("closure"))
    });

    let cached = ClosureIndex::new(Arc::clone(&store), 64);
    rt.block_on(cached.closure(&root)).expect("warm");
    group.bench_function("cached", |b| {
        b.iter(|| rt.block_on(cached.closure(black_box(&root))).expect("closure"))
    });

    group.finish();
}

criterion_group!(benches, bench_fragment_tree, bench_reconstruct, bench_closure);
criterion_main!(benches);
