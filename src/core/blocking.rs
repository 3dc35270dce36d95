//! Bounded-wait access to a queue store.
//!
//! `blocking_peek` is the only suspending operation in the crate: it
//! waits until the store holds the requested number of entries or the
//! timeout elapses, whichever comes first. The wait is a condition
//! variable notified by the store's put listener, re-checked at least
//! every poll interval so puts issued with a bypassed notifier still make
//! progress.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::entry::QueueEntry;
use crate::core::error::StoreResult;
use crate::core::store::{PutListener, QueueStore, StorageId, UNBOUNDED};

/// Polling safety net; configurable through `[blocking].poll_interval_ms`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Default)]
struct PutSignal {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl PutListener for PutSignal {
    fn on_put(&self, _storage_id: &StorageId, _entries: &[Arc<QueueEntry>]) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

pub struct BlockingAccessor {
    store: Arc<dyn QueueStore>,
    signal: Arc<PutSignal>,
    poll_interval: Duration,
}

impl BlockingAccessor {
    pub fn new(store: Arc<dyn QueueStore>) -> StoreResult<Self> {
        Self::with_poll_interval(store, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        store: Arc<dyn QueueStore>,
        poll_interval: Duration,
    ) -> StoreResult<Self> {
        let signal = Arc::new(PutSignal::default());
        store.add_put_listener(Arc::clone(&signal) as Arc<dyn PutListener>)?;
        Ok(Self {
            store,
            signal,
            poll_interval,
        })
    }

    /// Waits until the store holds `num_entries` entries or `timeout`
    /// elapses, then returns a count-bounded peek, possibly with fewer
    /// entries than requested, possibly empty. A non-positive
    /// `num_entries` returns immediately.
    pub fn blocking_peek(
        &self,
        num_entries: i64,
        timeout: Duration,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        let deadline = Instant::now() + timeout;
        loop {
            if num_entries <= 0 || self.store.num_entries() >= num_entries as u64 {
                return self.store.peek_n(num_entries, UNBOUNDED);
            }
            let now = Instant::now();
            if now >= deadline {
                return self.store.peek_n(num_entries, UNBOUNDED);
            }
            let wait = self.poll_interval.min(deadline - now);
            let mut guard = self.signal.mutex.lock();
            self.signal.condvar.wait_for(&mut guard, wait);
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }
}

impl Drop for BlockingAccessor {
    fn drop(&mut self) {
        self.store.clear_put_listener();
    }
}
