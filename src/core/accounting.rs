//! Size accounting and listener fan-out.
//!
//! Every store keeps four incrementally maintained counters: entries,
//! bytes, persistent entries and persistent bytes. Mutating operations
//! apply their net effect under the store lock and publish afterwards;
//! registered listeners receive the delta since the last notification,
//! batched once per call rather than once per entry. Listeners must not
//! call back into the notifying store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::entry::QueueEntry;
use crate::core::store::StorageId;

/// Net counter change carried by one notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeDelta {
    pub entries: i64,
    pub bytes: i64,
    pub persistent_entries: i64,
    pub persistent_bytes: i64,
}

impl SizeDelta {
    pub fn added(entry: &QueueEntry) -> Self {
        let persistent = entry.persistent() as i64;
        Self {
            entries: 1,
            bytes: entry.size_bytes() as i64,
            persistent_entries: persistent,
            persistent_bytes: persistent * entry.size_bytes() as i64,
        }
    }

    pub fn removed(entry: &QueueEntry) -> Self {
        let added = Self::added(entry);
        Self {
            entries: -added.entries,
            bytes: -added.bytes,
            persistent_entries: -added.persistent_entries,
            persistent_bytes: -added.persistent_bytes,
        }
    }

    pub fn merge(&mut self, other: SizeDelta) {
        self.entries += other.entries;
        self.bytes += other.bytes;
        self.persistent_entries += other.persistent_entries;
        self.persistent_bytes += other.persistent_bytes;
    }

    pub fn is_zero(&self) -> bool {
        *self == SizeDelta::default()
    }
}

/// Receives batched counter deltas; used by the broker for backpressure
/// and shedding decisions.
pub trait SizeListener: Send + Sync {
    fn on_size_change(&self, storage_id: &StorageId, delta: SizeDelta);
}

#[derive(Debug, Default)]
struct Reported {
    entries: i64,
    bytes: i64,
    persistent_entries: i64,
    persistent_bytes: i64,
}

#[derive(Default)]
pub struct SizeAccountant {
    entries: AtomicU64,
    bytes: AtomicU64,
    persistent_entries: AtomicU64,
    persistent_bytes: AtomicU64,
    last_reported: Mutex<Reported>,
    listeners: Mutex<Vec<Arc<dyn SizeListener>>>,
}

impl SizeAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a net change to the counters. Callers hold their own data
    /// lock, which is what keeps the four counters mutually consistent.
    pub fn apply(&self, delta: SizeDelta) {
        add_signed(&self.entries, delta.entries);
        add_signed(&self.bytes, delta.bytes);
        add_signed(&self.persistent_entries, delta.persistent_entries);
        add_signed(&self.persistent_bytes, delta.persistent_bytes);
    }

    /// Overwrites the counters with absolute values; used by composite
    /// stores whose totals are derived from inner stores.
    pub fn set_counts(
        &self,
        entries: u64,
        bytes: u64,
        persistent_entries: u64,
        persistent_bytes: u64,
    ) {
        self.entries.store(entries, Ordering::Relaxed);
        self.bytes.store(bytes, Ordering::Relaxed);
        self.persistent_entries
            .store(persistent_entries, Ordering::Relaxed);
        self.persistent_bytes.store(persistent_bytes, Ordering::Relaxed);
    }

    pub fn entries(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn persistent_entries(&self) -> u64 {
        self.persistent_entries.load(Ordering::Relaxed)
    }

    pub fn persistent_bytes(&self) -> u64 {
        self.persistent_bytes.load(Ordering::Relaxed)
    }

    pub fn add_listener(&self, listener: Arc<dyn SizeListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn SizeListener>) {
        self.listeners
            .lock()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn clear_listeners(&self) {
        self.listeners.lock().clear();
    }

    /// Publishes the delta accumulated since the last notification.
    /// Must be called after the store lock has been released.
    pub fn publish(&self, storage_id: &StorageId) {
        let delta = {
            let mut reported = self.last_reported.lock();
            let current = (
                self.entries() as i64,
                self.bytes() as i64,
                self.persistent_entries() as i64,
                self.persistent_bytes() as i64,
            );
            let delta = SizeDelta {
                entries: current.0 - reported.entries,
                bytes: current.1 - reported.bytes,
                persistent_entries: current.2 - reported.persistent_entries,
                persistent_bytes: current.3 - reported.persistent_bytes,
            };
            reported.entries = current.0;
            reported.bytes = current.1;
            reported.persistent_entries = current.2;
            reported.persistent_bytes = current.3;
            delta
        };
        if delta.is_zero() {
            return;
        }
        let listeners: Vec<Arc<dyn SizeListener>> = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_size_change(storage_id, delta);
        }
    }
}

fn add_signed(counter: &AtomicU64, delta: i64) {
    if delta >= 0 {
        counter.fetch_add(delta as u64, Ordering::Relaxed);
    } else {
        counter.fetch_sub(delta.unsigned_abs(), Ordering::Relaxed);
    }
}
