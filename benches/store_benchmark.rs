use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use stashmq::core::entry::{Priority, QueueEntry};
use stashmq::core::identity::IdentityGenerator;
use stashmq::core::store::{QueueProperties, QueueStore, Relating, StorageId, UNBOUNDED};
use stashmq::RamStore;

const BATCH: usize = 1_000;

fn fresh_store(max_entries: u64) -> RamStore {
    RamStore::new(
        StorageId::new(Relating::Callback, "bench/1"),
        QueueProperties {
            max_entries,
            max_bytes: u64::MAX,
            ..QueueProperties::default()
        },
    )
}

fn entries(generator: &IdentityGenerator, count: usize) -> Vec<Arc<QueueEntry>> {
    (0..count)
        .map(|i| {
            Arc::new(QueueEntry::create(
                generator,
                Priority::new((i % 10) as u8).unwrap(),
                "benchmark-payload-benchmark-payload",
                false,
            ))
        })
        .collect()
}

fn bench_put_take(c: &mut Criterion) {
    let generator = IdentityGenerator::new();

    let mut group = c.benchmark_group("ram_store");
    group.throughput(Throughput::Elements(BATCH as u64));

    group.bench_function("put_take_cycle", |b| {
        b.iter(|| {
            let store = fresh_store(BATCH as u64 + 1);
            let batch = entries(&generator, BATCH);
            store.put_all(&batch, false).unwrap();
            let drained = store.take_n(UNBOUNDED, UNBOUNDED).unwrap();
            assert_eq!(drained.len(), BATCH);
        })
    });

    group.bench_function("peek_budgeted", |b| {
        let store = fresh_store(BATCH as u64 + 1);
        let batch = entries(&generator, BATCH);
        store.put_all(&batch, false).unwrap();
        b.iter(|| {
            let peeked = store.peek_n(64, 16 * 1024).unwrap();
            assert!(!peeked.is_empty());
        })
    });

    group.finish();
}

criterion_group!(benches, bench_put_take);
criterion_main!(benches);
