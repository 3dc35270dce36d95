//! Cache tier: a ram window in front of a swap store.
//!
//! Puts land in the window; persistent entries are additionally written
//! to the swap store right away. When the window outgrows its cache
//! bounds the tail of the order relation is demoted to the swap store,
//! keeping the entries most likely to be consumed next in memory. Reads
//! are served from the window; removals refill it from the swap store.
//!
//! When the swap pool is unreachable the tier keeps accepting and serving
//! entries from memory (the window may overgrow its cache bound up to the
//! queue bound) and resynchronizes once availability returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::accounting::{SizeAccountant, SizeListener};
use crate::core::entry::{Priority, QueueEntry};
use crate::core::error::{StoreError, StoreResult};
use crate::core::store::pool::{AvailabilityListener, SwapPool};
use crate::core::store::ram::RamStore;
use crate::core::store::swap::{SwapSettings, SwapStore};
use crate::core::store::{
    check_capacity, check_priority_range, PutListener, PutListenerSlot, QueueProperties,
    QueueStore, StorageId, UNBOUNDED,
};

pub struct CacheStore {
    storage_id: StorageId,
    props: Mutex<QueueProperties>,
    ram: RamStore,
    swap: SwapStore,
    pool: Arc<SwapPool>,
    /// Serializes composite operations across the two inner stores.
    op_lock: Mutex<()>,
    accountant: SizeAccountant,
    put_listener: PutListenerSlot,
    shutdown: AtomicBool,
}

impl CacheStore {
    /// Builds the composite on `pool`, reattaching the swap side by
    /// `storage_id` and pre-warming the window from it.
    pub fn attach(
        pool: Arc<SwapPool>,
        storage_id: StorageId,
        props: QueueProperties,
        settings: SwapSettings,
    ) -> StoreResult<Arc<Self>> {
        let swap = SwapStore::attach(Arc::clone(&pool), storage_id.clone(), props, settings)?;
        // The window is bounded by demotion, not by its own capacity
        // check, so the inner ram store carries the queue-level bounds.
        let ram = RamStore::new(storage_id.clone(), props);
        let cache = Arc::new(Self {
            storage_id,
            props: Mutex::new(props),
            ram,
            swap,
            pool: Arc::clone(&pool),
            op_lock: Mutex::new(()),
            accountant: SizeAccountant::new(),
            put_listener: PutListenerSlot::default(),
            shutdown: AtomicBool::new(false),
        });
        {
            let _guard = cache.op_lock.lock();
            cache.load_from_swap();
        }
        cache.sync_counters();
        pool.add_availability_listener(Arc::downgrade(
            &(Arc::clone(&cache) as Arc<dyn AvailabilityListener>),
        ));
        Ok(cache)
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(StoreError::Shutdown);
        }
        Ok(())
    }

    fn swap_available(&self) -> bool {
        self.pool.is_available()
    }

    /// Combined counters. Persistent entries resident in the window exist
    /// in both inner stores and are counted once; while the pool is
    /// unreachable only the window is visible.
    fn combined(&self) -> (u64, u64, u64, u64) {
        if self.swap_available() {
            (
                self.swap.num_entries() + self.ram.num_entries()
                    - self.ram.num_persistent_entries(),
                self.swap.num_bytes() + self.ram.num_bytes() - self.ram.num_persistent_bytes(),
                self.swap.num_persistent_entries(),
                self.swap.num_persistent_bytes(),
            )
        } else {
            (
                self.ram.num_entries(),
                self.ram.num_bytes(),
                self.ram.num_persistent_entries(),
                self.ram.num_persistent_bytes(),
            )
        }
    }

    fn sync_counters(&self) {
        let (entries, bytes, persistent_entries, persistent_bytes) = self.combined();
        self.accountant
            .set_counts(entries, bytes, persistent_entries, persistent_bytes);
    }

    fn sync_and_publish(&self) {
        self.sync_counters();
        self.accountant.publish(&self.storage_id);
    }

    /// Entries living only in the swap store: swapped transients, or
    /// persistent entries not (or no longer) resident in the window.
    fn has_uncached(&self) -> bool {
        self.swap.num_entries() != self.swap.num_persistent_entries()
            || self.swap.num_persistent_entries() != self.ram.num_persistent_entries()
    }

    /// Demotes the window tail into the swap store until the window fits
    /// its cache bounds again. Caller holds the op lock.
    fn swap_out_excess(&self) {
        if !self.swap_available() {
            return;
        }
        loop {
            let props = *self.props.lock();
            let over_entries = self.ram.num_entries().saturating_sub(props.max_entries_cache);
            let over_bytes = self.ram.num_bytes().saturating_sub(props.max_bytes_cache);
            if over_entries == 0 && over_bytes == 0 {
                return;
            }
            let num = if over_entries > 0 {
                over_entries as i64
            } else {
                UNBOUNDED
            };
            let bytes = if over_bytes > 0 { over_bytes as i64 } else { UNBOUNDED };
            let evicted = match self.ram.take_lowest(num, bytes, None, true) {
                Ok(evicted) => evicted,
                Err(e) => {
                    warn!(queue = %self.storage_id, "window eviction failed: {e}");
                    return;
                }
            };
            if evicted.is_empty() {
                return;
            }
            debug!(queue = %self.storage_id, count = evicted.len(),
                   "demoting window tail to the swap store");
            let transients: Vec<Arc<QueueEntry>> = evicted
                .iter()
                .filter(|e| !e.persistent())
                .cloned()
                .collect();
            if let Err(e) = self.swap.put_all(&transients, true) {
                warn!(queue = %self.storage_id,
                      "swapping {} entries failed, keeping them in memory: {e}",
                      transients.len());
                if let Err(e) = self.ram.put_all(&evicted, true) {
                    warn!(queue = %self.storage_id, "re-inserting evicted entries failed: {e}");
                }
                return;
            }
        }
    }

    /// Promotes entries from the swap store into free window space.
    /// Re-promoted transients are deleted from the swap store; persistent
    /// entries keep their durable row. Caller holds the op lock.
    fn load_from_swap(&self) {
        if !self.swap_available() || !self.has_uncached() {
            return;
        }
        let props = *self.props.lock();
        let free_entries = props.max_entries_cache.saturating_sub(self.ram.num_entries());
        let free_bytes = props.max_bytes_cache.saturating_sub(self.ram.num_bytes());
        if free_entries == 0 || free_bytes == 0 {
            return;
        }
        let batch = match self.swap.peek_n(free_entries as i64, free_bytes as i64) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(queue = %self.storage_id, "reading back from the swap store failed: {e}");
                return;
            }
        };
        if batch.is_empty() {
            return;
        }
        // Duplicate identities (persistent entries already resident) are
        // no-ops on the window put.
        if let Err(e) = self.ram.put_all(&batch, true) {
            warn!(queue = %self.storage_id, "promoting entries into the window failed: {e}");
            return;
        }
        let transients: Vec<Arc<QueueEntry>> = batch
            .iter()
            .filter(|e| !e.persistent())
            .cloned()
            .collect();
        if !transients.is_empty() {
            if let Err(e) = self.swap.remove_random(&transients) {
                warn!(queue = %self.storage_id,
                      "deleting {} re-promoted entries from the swap store failed: {e}",
                      transients.len());
            }
        }
    }

    fn refill_if_empty(&self) {
        if self.ram.num_entries() == 0 {
            self.load_from_swap();
        }
    }

    /// Removes the given entries from both tiers. Caller holds the op
    /// lock; refills the window afterwards.
    fn remove_everywhere(&self, entries: &[Arc<QueueEntry>]) -> StoreResult<Vec<bool>> {
        let mut flags = self.ram.remove_random(entries)?;
        if self.swap_available() {
            // One swap round trip covers persistent entries and anything
            // the window did not hold (swapped transients).
            let mut swap_side: Vec<(usize, Arc<QueueEntry>)> = Vec::new();
            for (i, entry) in entries.iter().enumerate() {
                if entry.persistent() || !flags[i] {
                    swap_side.push((i, Arc::clone(entry)));
                }
            }
            if !swap_side.is_empty() {
                let batch: Vec<Arc<QueueEntry>> =
                    swap_side.iter().map(|(_, e)| Arc::clone(e)).collect();
                match self.swap.remove_random(&batch) {
                    Ok(swap_flags) => {
                        for ((i, _), removed) in swap_side.iter().zip(swap_flags) {
                            flags[*i] = flags[*i] || removed;
                        }
                    }
                    Err(e) => warn!(queue = %self.storage_id,
                                    "removing entries from the swap store failed: {e}"),
                }
            }
        }
        self.load_from_swap();
        Ok(flags)
    }

    /// Writes window-resident persistent entries that are missing from
    /// the swap store, after the pool came back. Caller holds the op lock.
    fn resync_persistents(&self) {
        let resident = match self.ram.peek_n(UNBOUNDED, UNBOUNDED) {
            Ok(resident) => resident,
            Err(_) => return,
        };
        let missing: Vec<Arc<QueueEntry>> = resident
            .into_iter()
            .filter(|e| e.persistent() && !self.swap.contains_identity(e.identity()))
            .collect();
        if missing.is_empty() {
            return;
        }
        if let Err(e) = self.swap.put_all(&missing, true) {
            warn!(queue = %self.storage_id,
                  "writing back {} persistent entries failed: {e}", missing.len());
        }
    }
}

impl QueueStore for CacheStore {
    fn storage_id(&self) -> &StorageId {
        &self.storage_id
    }

    fn properties(&self) -> QueueProperties {
        *self.props.lock()
    }

    fn set_properties(&self, props: QueueProperties) -> StoreResult<()> {
        let _guard = self.op_lock.lock();
        *self.props.lock() = props;
        self.ram.set_properties(props)?;
        self.swap.set_properties(props)?;
        self.swap_out_excess();
        Ok(())
    }

    fn put_all(&self, entries: &[Arc<QueueEntry>], bypass_notifier: bool) -> StoreResult<()> {
        self.ensure_open()?;
        if entries.is_empty() {
            return Ok(());
        }
        let fresh = {
            let _guard = self.op_lock.lock();
            let props = *self.props.lock();
            let (mut count, mut bytes, _, _) = self.combined();
            let mut fresh: Vec<Arc<QueueEntry>> = Vec::with_capacity(entries.len());
            for entry in entries {
                let identity = entry.identity();
                if self.ram.contains_identity(identity)
                    || self.swap.contains_identity(identity)
                    || fresh.iter().any(|e| e.identity() == identity)
                {
                    debug!(queue = %self.storage_id, identity,
                           "ignoring duplicate identity on put");
                    continue;
                }
                check_capacity(&self.storage_id, &props, count, bytes)?;
                count += 1;
                bytes += entry.size_bytes();
                fresh.push(Arc::clone(entry));
            }

            if self.swap_available() {
                let persistents: Vec<Arc<QueueEntry>> = fresh
                    .iter()
                    .filter(|e| e.persistent())
                    .cloned()
                    .collect();
                if !persistents.is_empty() {
                    if let Err(e) = self.swap.put_all(&persistents, true) {
                        // Degrade to transient handling rather than failing
                        // the put; the resync on reconnect writes them back.
                        warn!(queue = %self.storage_id,
                              "{} persistent entries temporarily handled as transient: {e}",
                              persistents.len());
                    }
                }
            }

            self.ram.put_all(&fresh, true)?;
            self.swap_out_excess();
            fresh
        };
        self.sync_and_publish();
        if !bypass_notifier {
            self.put_listener.notify(&self.storage_id, &fresh);
        }
        Ok(())
    }

    fn peek(&self) -> StoreResult<Option<Arc<QueueEntry>>> {
        self.ensure_open()?;
        let _guard = self.op_lock.lock();
        self.refill_if_empty();
        self.ram.peek()
    }

    fn peek_n(&self, num_entries: i64, num_bytes: i64) -> StoreResult<Vec<Arc<QueueEntry>>> {
        self.ensure_open()?;
        let _guard = self.op_lock.lock();
        self.refill_if_empty();
        self.ram.peek_n(num_entries, num_bytes)
    }

    fn peek_same_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        self.ensure_open()?;
        let _guard = self.op_lock.lock();
        self.refill_if_empty();
        self.ram.peek_same_priority(num_entries, num_bytes)
    }

    fn peek_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        self.ensure_open()?;
        let _guard = self.op_lock.lock();
        self.refill_if_empty();
        self.ram
            .peek_with_priority(num_entries, num_bytes, min_prio, max_prio)
    }

    fn peek_with_limit_entry(
        &self,
        limit: Option<&QueueEntry>,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        self.ensure_open()?;
        let _guard = self.op_lock.lock();
        self.refill_if_empty();
        self.ram.peek_with_limit_entry(limit)
    }

    fn take_n(&self, num_entries: i64, num_bytes: i64) -> StoreResult<Vec<Arc<QueueEntry>>> {
        self.ensure_open()?;
        let selected = {
            let _guard = self.op_lock.lock();
            self.refill_if_empty();
            let selected = self.ram.peek_n(num_entries, num_bytes)?;
            self.remove_everywhere(&selected)?;
            selected
        };
        self.sync_and_publish();
        Ok(selected)
    }

    fn take_same_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        self.ensure_open()?;
        let selected = {
            let _guard = self.op_lock.lock();
            self.refill_if_empty();
            let selected = self.ram.peek_same_priority(num_entries, num_bytes)?;
            self.remove_everywhere(&selected)?;
            selected
        };
        self.sync_and_publish();
        Ok(selected)
    }

    fn take_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        check_priority_range(min_prio, max_prio)?;
        self.ensure_open()?;
        let selected = {
            let _guard = self.op_lock.lock();
            self.refill_if_empty();
            let selected =
                self.ram
                    .peek_with_priority(num_entries, num_bytes, min_prio, max_prio)?;
            self.remove_everywhere(&selected)?;
            selected
        };
        self.sync_and_publish();
        Ok(selected)
    }

    fn take_lowest(
        &self,
        num_entries: i64,
        num_bytes: i64,
        reference: Option<&QueueEntry>,
        leave_one: bool,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        self.ensure_open()?;
        let selected = {
            let _guard = self.op_lock.lock();
            if self.swap_available() && self.has_uncached() {
                // The true tail lives in the swap store. Taking more than
                // one entry through the tier is not offered there.
                if num_entries != 1 {
                    return Err(StoreError::Unsupported(
                        "takeLowest through the cache tier is limited to one entry \
                         while entries are swapped",
                    ));
                }
                let selected = self.swap.take_lowest(num_entries, num_bytes, reference, leave_one)?;
                if !selected.is_empty() {
                    // A persistent tail entry may also be window resident.
                    let _ = self.ram.remove_random(&selected)?;
                }
                selected
            } else {
                let selected = self.ram.take_lowest(num_entries, num_bytes, reference, leave_one)?;
                if self.swap_available() && !selected.is_empty() {
                    let persistents: Vec<Arc<QueueEntry>> = selected
                        .iter()
                        .filter(|e| e.persistent())
                        .cloned()
                        .collect();
                    if !persistents.is_empty() {
                        if let Err(e) = self.swap.remove_random(&persistents) {
                            warn!(queue = %self.storage_id,
                                  "removing evicted persistent entries from swap failed: {e}");
                        }
                    }
                }
                selected
            }
        };
        self.sync_and_publish();
        Ok(selected)
    }

    fn remove_num(&self, num_entries: i64) -> StoreResult<u64> {
        self.ensure_open()?;
        let removed = {
            let _guard = self.op_lock.lock();
            let mut removed = 0u64;
            let mut remaining = num_entries;
            loop {
                if remaining == 0 {
                    break;
                }
                self.refill_if_empty();
                let batch = self.ram.peek_n(remaining, UNBOUNDED)?;
                if batch.is_empty() {
                    break;
                }
                let flags = self.remove_everywhere(&batch)?;
                let count = flags.iter().filter(|f| **f).count() as u64;
                removed += count;
                if remaining > 0 {
                    remaining -= count as i64;
                }
            }
            removed
        };
        self.sync_and_publish();
        Ok(removed)
    }

    fn remove_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> StoreResult<u64> {
        check_priority_range(min_prio, max_prio)?;
        self.ensure_open()?;
        let removed = {
            let _guard = self.op_lock.lock();
            self.refill_if_empty();
            let batch = self
                .ram
                .peek_with_priority(num_entries, num_bytes, min_prio, max_prio)?;
            let flags = self.remove_everywhere(&batch)?;
            flags.iter().filter(|f| **f).count() as u64
        };
        self.sync_and_publish();
        Ok(removed)
    }

    fn remove_random(&self, entries: &[Arc<QueueEntry>]) -> StoreResult<Vec<bool>> {
        self.ensure_open()?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let flags = {
            let _guard = self.op_lock.lock();
            self.remove_everywhere(entries)?
        };
        self.sync_and_publish();
        Ok(flags)
    }

    fn remove_with_limit_entry(
        &self,
        limit: Option<&QueueEntry>,
        inclusive: bool,
    ) -> StoreResult<u64> {
        self.ensure_open()?;
        let removed = {
            let _guard = self.op_lock.lock();
            let before = self.combined().0;
            self.ram.remove_with_limit_entry(limit, inclusive)?;
            if self.swap_available() {
                if let Err(e) = self.swap.remove_with_limit_entry(limit, inclusive) {
                    warn!(queue = %self.storage_id,
                          "limit-entry removal on the swap store failed: {e}");
                }
            }
            self.load_from_swap();
            before.saturating_sub(self.combined().0)
        };
        self.sync_and_publish();
        Ok(removed)
    }

    fn clear(&self) -> StoreResult<u64> {
        self.ensure_open()?;
        let removed = {
            let _guard = self.op_lock.lock();
            let before = self.combined().0;
            self.ram.clear()?;
            if self.swap_available() {
                if let Err(e) = self.swap.clear() {
                    warn!(queue = %self.storage_id, "clearing the swap store failed: {e}");
                }
            }
            before
        };
        self.sync_and_publish();
        Ok(removed)
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let _guard = self.op_lock.lock();
            self.ram.shutdown();
            self.swap.shutdown();
        }
        self.sync_and_publish();
        self.accountant.clear_listeners();
        self.put_listener.clear();
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn num_entries(&self) -> u64 {
        self.combined().0
    }

    fn num_bytes(&self) -> u64 {
        self.combined().1
    }

    fn num_persistent_entries(&self) -> u64 {
        self.combined().2
    }

    fn num_persistent_bytes(&self) -> u64 {
        self.combined().3
    }

    fn max_num_entries(&self) -> u64 {
        self.props.lock().max_entries
    }

    fn max_num_bytes(&self) -> u64 {
        self.props.lock().max_bytes
    }

    fn add_size_listener(&self, listener: Arc<dyn SizeListener>) {
        self.accountant.add_listener(listener);
    }

    fn remove_size_listener(&self, listener: &Arc<dyn SizeListener>) {
        self.accountant.remove_listener(listener);
    }

    fn add_put_listener(&self, listener: Arc<dyn PutListener>) -> StoreResult<()> {
        self.put_listener.register(listener)
    }

    fn clear_put_listener(&self) {
        self.put_listener.clear();
    }
}

impl AvailabilityListener for CacheStore {
    fn storage_available(&self) {
        if self.is_shutdown() {
            return;
        }
        {
            let _guard = self.op_lock.lock();
            self.resync_persistents();
            self.swap_out_excess();
            self.load_from_swap();
        }
        self.sync_and_publish();
    }

    fn storage_unavailable(&self) {
        warn!(queue = %self.storage_id,
              "swap store unreachable, continuing from memory");
    }
}
