//! Queue store abstraction and its backing realizations.
//!
//! One contract, three realizations selected at construction time:
//! - [`ram::RamStore`]   – ordered in-memory store
//! - [`swap::SwapStore`] – durable journal-backed store
//! - [`cache::CacheStore`] – ram window in front of a swap store
//!
//! All read operations traverse entries in the order relation (priority
//! descending, identity ascending) starting from the head, except the
//! eviction path `take_lowest` which walks from the tail.

pub mod cache;
pub mod pool;
pub mod ram;
pub mod registry;
pub mod swap;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::accounting::SizeListener;
use crate::core::entry::{Priority, QueueEntry};
use crate::core::error::{StoreError, StoreResult};

/// Sentinel for "no bound" in the count/byte arguments of the peek, take
/// and remove families.
pub const UNBOUNDED: i64 = -1;

/// What a queue buffers for; part of its stable identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relating {
    Callback,
    Subject,
    History,
    Client,
}

impl fmt::Display for Relating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Relating::Callback => "callback",
            Relating::Subject => "subject",
            Relating::History => "history",
            Relating::Client => "client",
        };
        write!(f, "{s}")
    }
}

/// Composite key identifying one queue instance, e.g. `callback:joe/2`.
/// Stable across restarts so persistent queues reattach to their rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageId {
    relating: Relating,
    name: String,
}

impl StorageId {
    pub fn new(relating: Relating, name: impl Into<String>) -> Self {
        Self {
            relating,
            name: name.into(),
        }
    }

    pub fn relating(&self) -> Relating {
        self.relating
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filesystem-safe rendering used to name the swap journal.
    pub fn file_stem(&self) -> String {
        let mut stem = format!("{}_{}", self.relating, self.name);
        stem.retain(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
        stem
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.relating, self.name)
    }
}

/// Capacity configuration of one queue. Mutable after creation through
/// `QueueStore::set_properties`; reconfiguration never drops entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueProperties {
    pub max_entries: u64,
    pub max_bytes: u64,
    pub max_entries_cache: u64,
    pub max_bytes_cache: u64,
}

impl Default for QueueProperties {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            max_bytes: 10 * 1024 * 1024,
            max_entries_cache: 100,
            max_bytes_cache: 2 * 1024 * 1024,
        }
    }
}

/// Informed after a successful, non-bypassed `put` has committed. At most
/// one listener per store; the blocking accessor registers here to wake
/// its waiters.
pub trait PutListener: Send + Sync {
    fn on_put(&self, storage_id: &StorageId, entries: &[Arc<QueueEntry>]);
}

/// The contract every queue realization satisfies.
///
/// All operations are thread safe and non-blocking; operations on one
/// instance observe a linearizable history. Count/byte getters are O(1)
/// reads maintained incrementally, never recomputed by scanning.
pub trait QueueStore: Send + Sync {
    fn storage_id(&self) -> &StorageId;

    fn properties(&self) -> QueueProperties;

    fn set_properties(&self, props: QueueProperties) -> StoreResult<()>;

    /// Inserts a batch. Duplicate identities are idempotent no-ops; a
    /// capacity violation fails the whole call leaving the queue
    /// unchanged; an empty batch succeeds trivially. One size
    /// notification covers the entire batch. `bypass_notifier` suppresses
    /// the put listener (not the size listeners).
    fn put_all(&self, entries: &[Arc<QueueEntry>], bypass_notifier: bool) -> StoreResult<()>;

    fn put(&self, entry: Arc<QueueEntry>, bypass_notifier: bool) -> StoreResult<()> {
        self.put_all(std::slice::from_ref(&entry), bypass_notifier)
    }

    /// Head entry without removing it.
    fn peek(&self) -> StoreResult<Option<Arc<QueueEntry>>>;

    /// Up to `num_entries` entries from the head under the byte budget:
    /// a candidate is appended while the running total accumulated before
    /// it is still under `num_bytes`. At least one entry is returned from
    /// a non-empty queue, and at most one entry overshoots the budget.
    /// Negative bounds mean unbounded.
    fn peek_n(&self, num_entries: i64, num_bytes: i64) -> StoreResult<Vec<Arc<QueueEntry>>>;

    /// Like `peek_n` but stops before crossing a priority boundary: only
    /// entries sharing the highest priority currently present.
    fn peek_same_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
    ) -> StoreResult<Vec<Arc<QueueEntry>>>;

    /// Like `peek_n`, restricted to priorities in `[min_prio, max_prio]`.
    fn peek_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> StoreResult<Vec<Arc<QueueEntry>>>;

    /// Every stored entry sorting strictly before `limit` under the order
    /// relation, head-to-tail. The limit entry itself need not be stored;
    /// `None` yields an empty result.
    fn peek_with_limit_entry(
        &self,
        limit: Option<&QueueEntry>,
    ) -> StoreResult<Vec<Arc<QueueEntry>>>;

    fn take(&self) -> StoreResult<Option<Arc<QueueEntry>>> {
        Ok(self.take_n(1, UNBOUNDED)?.into_iter().next())
    }

    /// Atomic peek-then-remove with `peek_n` selection rules.
    fn take_n(&self, num_entries: i64, num_bytes: i64) -> StoreResult<Vec<Arc<QueueEntry>>>;

    fn take_same_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
    ) -> StoreResult<Vec<Arc<QueueEntry>>>;

    fn take_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> StoreResult<Vec<Arc<QueueEntry>>>;

    /// Eviction: removes from the tail of the order relation (lowest
    /// priority, newest identity first) under the usual budget rule and
    /// returns the removed entries newest-first. `reference` protects
    /// entries sorting at or before it; `leave_one` guarantees the queue
    /// is not emptied by this call.
    fn take_lowest(
        &self,
        num_entries: i64,
        num_bytes: i64,
        reference: Option<&QueueEntry>,
        leave_one: bool,
    ) -> StoreResult<Vec<Arc<QueueEntry>>>;

    /// Removes the head entry; returns the number removed (0 or 1).
    fn remove(&self) -> StoreResult<u64> {
        self.remove_num(1)
    }

    /// Removes up to `num_entries` from the head (-1 removes everything);
    /// returns the number removed.
    fn remove_num(&self, num_entries: i64) -> StoreResult<u64>;

    /// Removes entries in the given priority range, head-first within the
    /// range; returns the number removed.
    fn remove_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> StoreResult<u64>;

    /// Removes exactly the given entries wherever they sit, identified by
    /// identity. Absent entries are reported `false` in the parallel
    /// result array, not treated as an error.
    fn remove_random(&self, entries: &[Arc<QueueEntry>]) -> StoreResult<Vec<bool>>;

    /// Removes every entry sorting strictly before `limit`; with
    /// `inclusive` also removes `limit` itself when physically present.
    /// Returns the number removed.
    fn remove_with_limit_entry(
        &self,
        limit: Option<&QueueEntry>,
        inclusive: bool,
    ) -> StoreResult<u64>;

    /// Removes everything; returns the number removed.
    fn clear(&self) -> StoreResult<u64>;

    /// Releases resources; further operations fail fast with
    /// `StoreError::Shutdown`. Persistent rows are not deleted.
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;

    fn num_entries(&self) -> u64;
    fn num_bytes(&self) -> u64;
    fn num_persistent_entries(&self) -> u64;
    fn num_persistent_bytes(&self) -> u64;
    fn max_num_entries(&self) -> u64;
    fn max_num_bytes(&self) -> u64;

    fn add_size_listener(&self, listener: Arc<dyn SizeListener>);
    fn remove_size_listener(&self, listener: &Arc<dyn SizeListener>);

    /// Registers the put listener; at most one may be registered.
    fn add_put_listener(&self, listener: Arc<dyn PutListener>) -> StoreResult<()>;
    fn clear_put_listener(&self);
}

/// Shared count/byte budget bookkeeping for the peek/take/evict walks.
pub(crate) struct BudgetWalk {
    max_entries: i64,
    max_bytes: i64,
    count: i64,
    bytes: i64,
}

impl BudgetWalk {
    pub(crate) fn new(num_entries: i64, num_bytes: i64) -> StoreResult<Self> {
        for (value, what) in [(num_entries, "numEntries"), (num_bytes, "numBytes")] {
            if value < UNBOUNDED {
                return Err(StoreError::InvalidArgument(format!(
                    "{what} must be -1 (unbounded) or non-negative, got {value}"
                )));
            }
        }
        Ok(Self {
            max_entries: num_entries,
            max_bytes: num_bytes,
            count: 0,
            bytes: 0,
        })
    }

    /// Admits a candidate of the given size, updating the running totals.
    /// Returns `false` once the walk must stop.
    pub(crate) fn admit(&mut self, size: u64) -> bool {
        if self.max_entries >= 0 && self.count >= self.max_entries {
            return false;
        }
        if self.max_bytes >= 0 && self.count > 0 && self.bytes >= self.max_bytes {
            return false;
        }
        self.count += 1;
        self.bytes += size as i64;
        true
    }
}

/// Put-capacity check shared by the realizations: the queue may be
/// overloaded by exactly one entry, so a put fails only when the current
/// count already exceeds the bound.
pub(crate) fn check_capacity(
    storage_id: &StorageId,
    props: &QueueProperties,
    current_entries: u64,
    current_bytes: u64,
) -> StoreResult<()> {
    use crate::core::error::OverflowKind;
    if current_entries > props.max_entries {
        return Err(StoreError::Overflow {
            queue: storage_id.to_string(),
            kind: OverflowKind::Entries,
            max: props.max_entries,
        });
    }
    if current_bytes > props.max_bytes {
        return Err(StoreError::Overflow {
            queue: storage_id.to_string(),
            kind: OverflowKind::Bytes,
            max: props.max_bytes,
        });
    }
    Ok(())
}

/// Validates a priority range before any mutation.
pub(crate) fn check_priority_range(min_prio: Priority, max_prio: Priority) -> StoreResult<()> {
    if min_prio > max_prio {
        return Err(StoreError::InvalidArgument(format!(
            "minPriority {min_prio} greater than maxPriority {max_prio}"
        )));
    }
    Ok(())
}

/// Single-slot put listener registry shared by the realizations.
#[derive(Default)]
pub(crate) struct PutListenerSlot {
    slot: parking_lot::Mutex<Option<Arc<dyn PutListener>>>,
}

impl PutListenerSlot {
    pub(crate) fn register(&self, listener: Arc<dyn PutListener>) -> StoreResult<()> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(StoreError::InvalidArgument(
                "a put listener is registered already".into(),
            ));
        }
        *slot = Some(listener);
        Ok(())
    }

    pub(crate) fn clear(&self) {
        *self.slot.lock() = None;
    }

    pub(crate) fn notify(&self, storage_id: &StorageId, entries: &[Arc<QueueEntry>]) {
        if entries.is_empty() {
            return;
        }
        let listener = self.slot.lock().clone();
        if let Some(listener) = listener {
            listener.on_put(storage_id, entries);
        }
    }
}
