//! Durability behavior of the journal-backed store: restart recovery,
//! corrupt-tail tolerance, blob dedup and availability errors.

mod common;

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use tempfile::TempDir;

use common::{entry, identities};
use stashmq::core::entry::{Priority, QueueEntry};
use stashmq::core::store::swap::{SwapSettings, SwapStore};
use stashmq::core::store::{QueueProperties, QueueStore, Relating, StorageId, UNBOUNDED};
use stashmq::SwapPool;

fn settings() -> SwapSettings {
    SwapSettings {
        blob_threshold_bytes: 1024,
        ..SwapSettings::default()
    }
}

fn attach(pool: &Arc<SwapPool>, name: &str) -> SwapStore {
    SwapStore::attach(
        Arc::clone(pool),
        StorageId::new(Relating::History, name),
        QueueProperties::default(),
        settings(),
    )
    .unwrap()
}

fn big_entry(identity: u64, fill: u8) -> Arc<QueueEntry> {
    Arc::new(QueueEntry::with_identity(
        identity,
        Priority::NORM,
        vec![fill; 4096],
        true,
    ))
}

#[test]
fn persistent_rows_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let storage_id = StorageId::new(Relating::History, "weather");

    {
        let pool = SwapPool::open(dir.path()).unwrap();
        let store = SwapStore::attach(
            Arc::clone(&pool),
            storage_id.clone(),
            QueueProperties::default(),
            settings(),
        )
        .unwrap();
        store
            .put_all(
                &[
                    entry(1, 5, 100, true),
                    entry(2, 9, 100, true),
                    entry(3, 5, 100, false),
                ],
                false,
            )
            .unwrap();
        // Acknowledge one persistent entry before the restart.
        store.remove_random(&[entry(1, 5, 100, true)]).unwrap();
        store.shutdown();
    }

    let pool = SwapPool::open(dir.path()).unwrap();
    let store = SwapStore::attach(
        Arc::clone(&pool),
        storage_id,
        QueueProperties::default(),
        settings(),
    )
    .unwrap();
    // The transient row is swept; only the unacknowledged persistent
    // entry comes back.
    assert_eq!(store.num_entries(), 1);
    assert_eq!(store.num_persistent_entries(), 1);
    let recovered = store.peek_n(UNBOUNDED, UNBOUNDED).unwrap();
    assert_eq!(identities(&recovered), vec![2]);
    assert_eq!(recovered[0].payload().as_ref(), b"payload-2");
}

#[test]
fn corrupt_journal_tail_is_dropped() {
    let dir = TempDir::new().unwrap();
    let storage_id = StorageId::new(Relating::History, "garbled");

    {
        let pool = SwapPool::open(dir.path()).unwrap();
        let store = SwapStore::attach(
            Arc::clone(&pool),
            storage_id.clone(),
            QueueProperties::default(),
            settings(),
        )
        .unwrap();
        let batch: Vec<_> = (1..=3).map(|i| entry(i, 5, 100, true)).collect();
        store.put_all(&batch, false).unwrap();
        store.shutdown();
    }

    // Simulate a torn write at the end of the journal.
    let journal = dir.path().join(format!(
        "{}.swap",
        StorageId::new(Relating::History, "garbled").file_stem()
    ));
    let mut file = OpenOptions::new().append(true).open(&journal).unwrap();
    file.write_all(&[0xde, 0xad, 0xbe]).unwrap();
    drop(file);

    let pool = SwapPool::open(dir.path()).unwrap();
    let store = SwapStore::attach(
        Arc::clone(&pool),
        storage_id,
        QueueProperties::default(),
        settings(),
    )
    .unwrap();
    assert_eq!(store.num_entries(), 3);
    assert_eq!(
        identities(&store.peek_n(UNBOUNDED, UNBOUNDED).unwrap()),
        vec![1, 2, 3]
    );
}

#[test]
fn large_payloads_are_deduplicated_across_queues() {
    let dir = TempDir::new().unwrap();
    let pool = SwapPool::open(dir.path()).unwrap();
    let q1 = attach(&pool, "sensor/1");
    let q2 = attach(&pool, "sensor/2");

    // Identical content lands in both queues but occupies one blob.
    q1.put(big_entry(1, 0xab), false).unwrap();
    q2.put(big_entry(2, 0xab), false).unwrap();
    assert_eq!(pool.blob_count(), 1);

    // Different content gets its own blob.
    q1.put(big_entry(3, 0xcd), false).unwrap();
    assert_eq!(pool.blob_count(), 2);

    // Payloads are fetched back intact.
    let fetched = q2.peek().unwrap().unwrap();
    assert_eq!(fetched.payload().as_ref(), &[0xab; 4096][..]);

    // The shared blob disappears only with its last reference.
    q1.remove_random(&[big_entry(1, 0xab)]).unwrap();
    assert_eq!(pool.blob_count(), 2);
    q2.clear().unwrap();
    assert_eq!(pool.blob_count(), 1);
    q1.clear().unwrap();
    assert_eq!(pool.blob_count(), 0);
}

#[test]
fn operations_fail_distinctly_while_unavailable() {
    let dir = TempDir::new().unwrap();
    let pool = SwapPool::open(dir.path()).unwrap();
    let store = attach(&pool, "outage");
    store.put(entry(1, 5, 100, true), false).unwrap();

    pool.set_available(false);
    let err = store.put(entry(2, 5, 100, true), false).unwrap_err();
    assert!(err.is_unavailable(), "got {err}");
    assert!(!err.is_overflow());
    let err = store.peek().unwrap_err();
    assert!(err.is_unavailable(), "got {err}");

    pool.set_available(true);
    assert_eq!(store.num_entries(), 1);
    store.put(entry(2, 5, 100, true), false).unwrap();
    assert_eq!(store.num_entries(), 2);
}

#[test]
fn shared_pool_outlives_a_single_queue() {
    let dir = TempDir::new().unwrap();
    let pool = SwapPool::open(dir.path()).unwrap();
    let q1 = attach(&pool, "short/lived");
    let q2 = attach(&pool, "long/lived");

    q2.put(entry(1, 5, 100, true), false).unwrap();
    q1.shutdown();
    drop(q1);

    // The surviving queue keeps working on the same pool.
    q2.put(entry(2, 5, 100, true), false).unwrap();
    assert_eq!(q2.num_entries(), 2);
}
