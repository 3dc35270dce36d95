//! Contract tests run against every store realization.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use common::{entry, identities, norm};
use stashmq::core::accounting::{SizeDelta, SizeListener};
use stashmq::core::entry::Priority;
use stashmq::core::store::swap::SwapSettings;
use stashmq::core::store::{QueueProperties, QueueStore, Relating, StorageId, UNBOUNDED};
use stashmq::{CacheStore, RamStore, StoreError, SwapPool, SwapStore};

struct Fixture {
    name: &'static str,
    store: Arc<dyn QueueStore>,
    _pool: Option<Arc<SwapPool>>,
    _dir: Option<TempDir>,
}

/// One fixture per realization. The cache fixture gets a window as large
/// as the queue so the contract semantics are exercised without swapping;
/// swapping behavior has its own test file.
fn fixtures(props: QueueProperties) -> Vec<Fixture> {
    let storage_id = StorageId::new(Relating::Callback, "contract/1");
    let mut all = vec![Fixture {
        name: "ram",
        store: Arc::new(RamStore::new(storage_id.clone(), props)),
        _pool: None,
        _dir: None,
    }];

    let dir = TempDir::new().unwrap();
    let pool = SwapPool::open(dir.path()).unwrap();
    all.push(Fixture {
        name: "swap",
        store: Arc::new(
            SwapStore::attach(
                Arc::clone(&pool),
                storage_id.clone(),
                props,
                SwapSettings::default(),
            )
            .unwrap(),
        ),
        _pool: Some(pool),
        _dir: Some(dir),
    });

    let dir = TempDir::new().unwrap();
    let pool = SwapPool::open(dir.path()).unwrap();
    // Window strictly larger than the queue bound (plus its overflow
    // slack) so nothing is demoted during the contract tests.
    let cache_props = QueueProperties {
        max_entries_cache: props.max_entries + 16,
        max_bytes_cache: props.max_bytes,
        ..props
    };
    all.push(Fixture {
        name: "cache",
        store: CacheStore::attach(
            Arc::clone(&pool),
            storage_id,
            cache_props,
            SwapSettings::default(),
        )
        .unwrap() as Arc<dyn QueueStore>,
        _pool: Some(pool),
        _dir: Some(dir),
    });
    all
}

fn default_props() -> QueueProperties {
    QueueProperties {
        max_entries: 1_000,
        max_bytes: 1 << 30,
        ..QueueProperties::default()
    }
}

#[test]
fn capacity_allows_one_entry_of_slack() {
    let props = QueueProperties {
        max_entries: 3,
        ..default_props()
    };
    for f in fixtures(props) {
        for i in 1..=4 {
            f.store.put(norm(i), false).unwrap_or_else(|e| {
                panic!("[{}] put {i} should succeed: {e}", f.name);
            });
        }
        let err = f.store.put(norm(5), false).unwrap_err();
        assert!(err.is_overflow(), "[{}] expected overflow, got {err}", f.name);
        assert_eq!(f.store.num_entries(), 4, "[{}]", f.name);
    }
}

#[test]
fn duplicate_put_is_idempotent() {
    for f in fixtures(default_props()) {
        f.store.put(norm(7), false).unwrap();
        f.store.put(norm(7), false).unwrap();
        assert_eq!(f.store.num_entries(), 1, "[{}]", f.name);
        assert_eq!(f.store.num_bytes(), 100, "[{}]", f.name);
    }
}

#[test]
fn entries_come_back_priority_sorted() {
    // Shuffled physical insertion order; the order relation must not care.
    let shuffled = [
        entry(30, 1, 100, false),
        entry(10, 9, 100, false),
        entry(21, 5, 100, false),
        entry(11, 9, 100, false),
        entry(20, 5, 100, false),
    ];
    for f in fixtures(default_props()) {
        f.store.put_all(&shuffled, false).unwrap();
        let peeked = f.store.peek_n(UNBOUNDED, UNBOUNDED).unwrap();
        assert_eq!(identities(&peeked), vec![10, 11, 20, 21, 30], "[{}]", f.name);

        // Head is the highest-priority, oldest entry.
        let head = f.store.peek().unwrap().unwrap();
        assert_eq!(head.identity(), 10, "[{}]", f.name);
    }
}

#[test]
fn byte_budget_returns_ceil_and_at_least_one() {
    for f in fixtures(default_props()) {
        for i in 1..=10 {
            f.store.put(norm(i), false).unwrap();
        }
        // Uniform size 100: budget 250 admits entries while the running
        // total before the candidate is under 250.
        assert_eq!(f.store.peek_n(UNBOUNDED, 250).unwrap().len(), 3, "[{}]", f.name);
        assert_eq!(f.store.peek_n(UNBOUNDED, 300).unwrap().len(), 3, "[{}]", f.name);
        assert_eq!(f.store.peek_n(UNBOUNDED, 301).unwrap().len(), 4, "[{}]", f.name);
        // The progress guarantee: even a tiny budget yields one entry.
        assert_eq!(f.store.peek_n(UNBOUNDED, 1).unwrap().len(), 1, "[{}]", f.name);
        assert_eq!(f.store.peek_n(UNBOUNDED, 0).unwrap().len(), 1, "[{}]", f.name);
        // The count bound is the more restrictive one here.
        assert_eq!(f.store.peek_n(2, 100_000).unwrap().len(), 2, "[{}]", f.name);
    }
}

#[test]
fn peek_with_limit_entry_cases() {
    for f in fixtures(default_props()) {
        let stored: Vec<_> = (1..=5).map(norm).collect();
        f.store.put_all(&stored, false).unwrap();

        // Sorts after everything (same priority, higher identity).
        let after_all = norm(99);
        let all = f.store.peek_with_limit_entry(Some(&after_all)).unwrap();
        assert_eq!(identities(&all), vec![1, 2, 3, 4, 5], "[{}]", f.name);

        // Sorts before everything (higher priority).
        let before_all = entry(0, 9, 100, false);
        assert!(
            f.store.peek_with_limit_entry(Some(&before_all)).unwrap().is_empty(),
            "[{}]",
            f.name
        );

        // Equal to the stored entry at position 3: exactly the first 3.
        let third = norm(4);
        let first_three = f.store.peek_with_limit_entry(Some(&third)).unwrap();
        assert_eq!(identities(&first_three), vec![1, 2, 3], "[{}]", f.name);

        assert!(f.store.peek_with_limit_entry(None).unwrap().is_empty(), "[{}]", f.name);
    }
}

#[test]
fn remove_random_reports_found_flags() {
    for f in fixtures(default_props()) {
        let stored: Vec<_> = (1..=4).map(norm).collect();
        f.store.put_all(&stored, false).unwrap();

        let victims = [norm(2), norm(42), norm(4), norm(43)];
        let flags = f.store.remove_random(&victims).unwrap();
        assert_eq!(flags, vec![true, false, true, false], "[{}]", f.name);
        assert_eq!(f.store.num_entries(), 2, "[{}]", f.name);
        assert_eq!(
            identities(&f.store.peek_n(UNBOUNDED, UNBOUNDED).unwrap()),
            vec![1, 3],
            "[{}]",
            f.name
        );
    }
}

#[test]
fn take_lowest_walks_the_tail_newest_first() {
    for f in fixtures(default_props()) {
        f.store
            .put_all(
                &[
                    entry(1, 9, 100, false),
                    entry(2, 5, 100, false),
                    entry(3, 5, 100, false),
                    entry(4, 0, 100, false),
                ],
                false,
            )
            .unwrap();
        let evicted = f.store.take_lowest(2, UNBOUNDED, None, false).unwrap();
        assert_eq!(identities(&evicted), vec![4, 3], "[{}]", f.name);
        assert_eq!(f.store.num_entries(), 2, "[{}]", f.name);
    }
}

#[test]
fn take_lowest_respects_reference_watermark() {
    for f in fixtures(default_props()) {
        let stored: Vec<_> = (1..=5).map(norm).collect();
        f.store.put_all(&stored, false).unwrap();

        // Entries at or before identity 3 are protected.
        let reference = norm(3);
        let evicted = f
            .store
            .take_lowest(UNBOUNDED, UNBOUNDED, Some(&reference), false)
            .unwrap();
        assert_eq!(identities(&evicted), vec![5, 4], "[{}]", f.name);
        assert_eq!(f.store.num_entries(), 3, "[{}]", f.name);
    }
}

#[test]
fn take_lowest_leave_one_never_empties() {
    for f in fixtures(default_props()) {
        let stored: Vec<_> = (1..=4).map(norm).collect();
        f.store.put_all(&stored, false).unwrap();

        let first = f.store.take_lowest(UNBOUNDED, UNBOUNDED, None, true).unwrap();
        assert_eq!(first.len(), 3, "[{}]", f.name);
        assert_eq!(f.store.num_entries(), 1, "[{}]", f.name);

        // Repeated calls cannot drain the last entry.
        let again = f.store.take_lowest(UNBOUNDED, UNBOUNDED, None, true).unwrap();
        assert!(again.is_empty(), "[{}]", f.name);
        assert_eq!(f.store.num_entries(), 1, "[{}]", f.name);

        // Without leave_one the final entry goes too.
        let last = f.store.take_lowest(UNBOUNDED, UNBOUNDED, None, false).unwrap();
        assert_eq!(last.len(), 1, "[{}]", f.name);
        assert_eq!(f.store.num_entries(), 0, "[{}]", f.name);
    }
}

#[test]
fn accounting_round_trips_after_mutations() {
    for f in fixtures(default_props()) {
        f.store
            .put_all(
                &[
                    entry(1, 5, 100, true),
                    entry(2, 5, 250, false),
                    entry(3, 7, 50, true),
                    entry(4, 2, 400, false),
                ],
                false,
            )
            .unwrap();
        assert_eq!(f.store.num_entries(), 4, "[{}]", f.name);
        assert_eq!(f.store.num_bytes(), 800, "[{}]", f.name);
        assert_eq!(f.store.num_persistent_entries(), 2, "[{}]", f.name);
        assert_eq!(f.store.num_persistent_bytes(), 150, "[{}]", f.name);

        f.store.remove_random(&[entry(3, 7, 50, true)]).unwrap();
        assert_eq!(f.store.num_entries(), 3, "[{}]", f.name);
        assert_eq!(f.store.num_bytes(), 750, "[{}]", f.name);
        assert_eq!(f.store.num_persistent_entries(), 1, "[{}]", f.name);
        assert_eq!(f.store.num_persistent_bytes(), 100, "[{}]", f.name);

        assert_eq!(f.store.clear().unwrap(), 3, "[{}]", f.name);
        assert_eq!(f.store.num_entries(), 0, "[{}]", f.name);
        assert_eq!(f.store.num_bytes(), 0, "[{}]", f.name);
        assert_eq!(f.store.num_persistent_entries(), 0, "[{}]", f.name);
        assert_eq!(f.store.num_persistent_bytes(), 0, "[{}]", f.name);
    }
}

#[test]
fn overflow_scenario_with_max_entries_one() {
    let props = QueueProperties {
        max_entries: 1,
        ..default_props()
    };
    for f in fixtures(props) {
        f.store.put(norm(1), false).unwrap();
        f.store.put(norm(2), false).unwrap();
        assert_eq!(f.store.num_entries(), 2, "[{}]", f.name);

        let err = f.store.put(norm(3), false).unwrap_err();
        assert!(err.is_overflow(), "[{}]", f.name);

        let peeked = f.store.peek_n(4, UNBOUNDED).unwrap();
        assert_eq!(identities(&peeked), vec![1, 2], "[{}]", f.name);
    }
}

#[test]
fn peek_same_priority_stops_at_the_boundary() {
    for f in fixtures(default_props()) {
        f.store
            .put_all(
                &[
                    entry(1, 9, 100, false),
                    entry(2, 9, 100, false),
                    entry(3, 5, 100, false),
                ],
                false,
            )
            .unwrap();
        let same = f.store.peek_same_priority(UNBOUNDED, UNBOUNDED).unwrap();
        assert_eq!(identities(&same), vec![1, 2], "[{}]", f.name);

        let taken = f.store.take_same_priority(UNBOUNDED, UNBOUNDED).unwrap();
        assert_eq!(taken.len(), 2, "[{}]", f.name);
        assert_eq!(f.store.num_entries(), 1, "[{}]", f.name);
    }
}

#[test]
fn priority_range_reads_and_removals() {
    for f in fixtures(default_props()) {
        f.store
            .put_all(
                &[
                    entry(1, 9, 100, false),
                    entry(2, 7, 100, false),
                    entry(3, 5, 100, false),
                    entry(4, 2, 100, false),
                ],
                false,
            )
            .unwrap();

        let mid = f
            .store
            .peek_with_priority(
                UNBOUNDED,
                UNBOUNDED,
                Priority::new(3).unwrap(),
                Priority::new(7).unwrap(),
            )
            .unwrap();
        assert_eq!(identities(&mid), vec![2, 3], "[{}]", f.name);

        let err = f
            .store
            .peek_with_priority(UNBOUNDED, UNBOUNDED, Priority::MAX, Priority::MIN)
            .unwrap_err();
        assert!(
            matches!(err, StoreError::InvalidArgument(_)),
            "[{}] got {err}",
            f.name
        );

        let removed = f
            .store
            .remove_with_priority(
                UNBOUNDED,
                UNBOUNDED,
                Priority::new(3).unwrap(),
                Priority::new(7).unwrap(),
            )
            .unwrap();
        assert_eq!(removed, 2, "[{}]", f.name);
        assert_eq!(
            identities(&f.store.peek_n(UNBOUNDED, UNBOUNDED).unwrap()),
            vec![1, 4],
            "[{}]",
            f.name
        );
    }
}

#[test]
fn remove_and_take_consume_the_head() {
    for f in fixtures(default_props()) {
        let stored: Vec<_> = (1..=5).map(norm).collect();
        f.store.put_all(&stored, false).unwrap();

        assert_eq!(f.store.remove().unwrap(), 1, "[{}]", f.name);
        assert_eq!(f.store.remove_num(2).unwrap(), 2, "[{}]", f.name);

        let next = f.store.take().unwrap().unwrap();
        assert_eq!(next.identity(), 4, "[{}]", f.name);

        let rest = f.store.take_n(UNBOUNDED, UNBOUNDED).unwrap();
        assert_eq!(identities(&rest), vec![5], "[{}]", f.name);
        assert_eq!(f.store.num_entries(), 0, "[{}]", f.name);
    }
}

#[test]
fn remove_with_limit_entry_strips_the_head() {
    for f in fixtures(default_props()) {
        let stored: Vec<_> = (1..=5).map(norm).collect();
        f.store.put_all(&stored, false).unwrap();

        let limit = norm(3);
        assert_eq!(
            f.store.remove_with_limit_entry(Some(&limit), false).unwrap(),
            2,
            "[{}]",
            f.name
        );
        assert_eq!(
            f.store.remove_with_limit_entry(Some(&limit), true).unwrap(),
            1,
            "[{}]",
            f.name
        );
        assert_eq!(
            identities(&f.store.peek_n(UNBOUNDED, UNBOUNDED).unwrap()),
            vec![4, 5],
            "[{}]",
            f.name
        );
        assert_eq!(f.store.remove_with_limit_entry(None, true).unwrap(), 0, "[{}]", f.name);
    }
}

#[test]
fn empty_and_null_puts_are_noops() {
    for f in fixtures(default_props()) {
        f.store.put_all(&[], false).unwrap();
        assert_eq!(f.store.num_entries(), 0, "[{}]", f.name);
        assert!(f.store.peek().unwrap().is_none(), "[{}]", f.name);
        assert!(f.store.peek_n(UNBOUNDED, UNBOUNDED).unwrap().is_empty(), "[{}]", f.name);
    }
}

#[test]
fn shutdown_fails_fast() {
    for f in fixtures(default_props()) {
        f.store.put(norm(1), false).unwrap();
        f.store.shutdown();
        assert!(f.store.is_shutdown(), "[{}]", f.name);

        let err = f.store.put(norm(2), false).unwrap_err();
        assert!(matches!(err, StoreError::Shutdown), "[{}] got {err}", f.name);
        let err = f.store.peek().unwrap_err();
        assert!(matches!(err, StoreError::Shutdown), "[{}] got {err}", f.name);
        let err = f.store.clear().unwrap_err();
        assert!(matches!(err, StoreError::Shutdown), "[{}] got {err}", f.name);
    }
}

struct CountingListener {
    calls: Mutex<Vec<SizeDelta>>,
}

impl SizeListener for CountingListener {
    fn on_size_change(&self, _storage_id: &StorageId, delta: SizeDelta) {
        self.calls.lock().push(delta);
    }
}

#[test]
fn batch_put_notifies_listeners_once() {
    for f in fixtures(default_props()) {
        let listener = Arc::new(CountingListener {
            calls: Mutex::new(Vec::new()),
        });
        f.store
            .add_size_listener(Arc::clone(&listener) as Arc<dyn SizeListener>);

        let batch: Vec<_> = (1..=3).map(norm).collect();
        f.store.put_all(&batch, false).unwrap();

        let calls = listener.calls.lock().clone();
        assert_eq!(calls.len(), 1, "[{}]", f.name);
        assert_eq!(calls[0].entries, 3, "[{}]", f.name);
        assert_eq!(calls[0].bytes, 300, "[{}]", f.name);
    }
}

#[test]
fn failed_batch_put_leaves_queue_unchanged() {
    let props = QueueProperties {
        max_entries: 3,
        ..default_props()
    };
    for f in fixtures(props) {
        for i in 1..=3 {
            f.store.put(norm(i), false).unwrap();
        }
        // One more entry fits into the overflow slack, but not two; the
        // whole batch must be rejected.
        let err = f.store.put_all(&[norm(4), norm(5)], false).unwrap_err();
        assert!(err.is_overflow(), "[{}]", f.name);
        assert_eq!(f.store.num_entries(), 3, "[{}]", f.name);
        assert_eq!(
            identities(&f.store.peek_n(UNBOUNDED, UNBOUNDED).unwrap()),
            vec![1, 2, 3],
            "[{}]",
            f.name
        );
    }
}
