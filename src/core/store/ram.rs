//! In-memory queue store.
//!
//! Entries live in a b-tree keyed by the order relation, so head-side
//! walks, tail-side eviction and limit-entry range reads all fall out of
//! plain map iteration. A side map from identity to key makes duplicate
//! detection and `remove_random` O(log n).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::accounting::{SizeAccountant, SizeDelta, SizeListener};
use crate::core::entry::{EntryKey, Priority, QueueEntry};
use crate::core::error::{StoreError, StoreResult};
use crate::core::store::{
    check_capacity, check_priority_range, BudgetWalk, PutListener, PutListenerSlot,
    QueueProperties, QueueStore, StorageId,
};

/// Priority selection mode of the head-side walks.
enum PrioFilter {
    All,
    Same,
    Range(Priority, Priority),
}

#[derive(Default)]
struct RamInner {
    entries: BTreeMap<EntryKey, Arc<QueueEntry>>,
    ids: HashMap<u64, EntryKey>,
    shutdown: bool,
}

pub struct RamStore {
    storage_id: StorageId,
    props: Mutex<QueueProperties>,
    inner: Mutex<RamInner>,
    accountant: SizeAccountant,
    put_listener: PutListenerSlot,
}

impl RamStore {
    pub fn new(storage_id: StorageId, props: QueueProperties) -> Self {
        Self {
            storage_id,
            props: Mutex::new(props),
            inner: Mutex::new(RamInner::default()),
            accountant: SizeAccountant::new(),
            put_listener: PutListenerSlot::default(),
        }
    }

    pub(crate) fn contains_identity(&self, identity: u64) -> bool {
        self.inner.lock().ids.contains_key(&identity)
    }

    fn select_head(
        inner: &RamInner,
        num_entries: i64,
        num_bytes: i64,
        filter: PrioFilter,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        let mut walk = BudgetWalk::new(num_entries, num_bytes)?;
        let mut selected = Vec::new();
        let mut locked_prio: Option<Priority> = None;
        for (key, entry) in &inner.entries {
            match &filter {
                PrioFilter::All => {}
                PrioFilter::Same => match locked_prio {
                    None => locked_prio = Some(key.priority),
                    Some(p) if key.priority != p => break,
                    _ => {}
                },
                PrioFilter::Range(min, max) => {
                    // Sorted by priority descending: below the range means
                    // nothing further can match.
                    if key.priority < *min {
                        break;
                    }
                    if key.priority > *max {
                        continue;
                    }
                }
            }
            if !walk.admit(entry.size_bytes()) {
                break;
            }
            selected.push(Arc::clone(entry));
        }
        Ok(selected)
    }

    /// Removes the given entries from the maps and updates the counters.
    /// Caller holds the inner lock and publishes afterwards.
    fn remove_selected(&self, inner: &mut RamInner, selected: &[Arc<QueueEntry>]) -> u64 {
        let mut delta = SizeDelta::default();
        let mut removed = 0u64;
        for entry in selected {
            if inner.entries.remove(&entry.key()).is_some() {
                inner.ids.remove(&entry.identity());
                delta.merge(SizeDelta::removed(entry));
                removed += 1;
            }
        }
        self.accountant.apply(delta);
        removed
    }

    fn ensure_open(inner: &RamInner) -> StoreResult<()> {
        if inner.shutdown {
            return Err(StoreError::Shutdown);
        }
        Ok(())
    }
}

impl QueueStore for RamStore {
    fn storage_id(&self) -> &StorageId {
        &self.storage_id
    }

    fn properties(&self) -> QueueProperties {
        *self.props.lock()
    }

    fn set_properties(&self, props: QueueProperties) -> StoreResult<()> {
        *self.props.lock() = props;
        Ok(())
    }

    fn put_all(&self, entries: &[Arc<QueueEntry>], bypass_notifier: bool) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let fresh = {
            let mut inner = self.inner.lock();
            Self::ensure_open(&inner)?;
            let props = *self.props.lock();

            // Validate the whole batch before touching the maps so a
            // failed put leaves the queue exactly as it was.
            let mut count = self.accountant.entries();
            let mut bytes = self.accountant.bytes();
            let mut fresh: Vec<Arc<QueueEntry>> = Vec::with_capacity(entries.len());
            for entry in entries {
                if inner.ids.contains_key(&entry.identity())
                    || fresh.iter().any(|e| e.identity() == entry.identity())
                {
                    debug!(queue = %self.storage_id, identity = entry.identity(),
                           "ignoring duplicate identity on put");
                    continue;
                }
                check_capacity(&self.storage_id, &props, count, bytes)?;
                count += 1;
                bytes += entry.size_bytes();
                fresh.push(Arc::clone(entry));
            }

            let mut delta = SizeDelta::default();
            for entry in &fresh {
                inner.ids.insert(entry.identity(), entry.key());
                inner.entries.insert(entry.key(), Arc::clone(entry));
                delta.merge(SizeDelta::added(entry));
            }
            self.accountant.apply(delta);
            fresh
        };

        self.accountant.publish(&self.storage_id);
        if !bypass_notifier {
            self.put_listener.notify(&self.storage_id, &fresh);
        }
        Ok(())
    }

    fn peek(&self) -> StoreResult<Option<Arc<QueueEntry>>> {
        let inner = self.inner.lock();
        Self::ensure_open(&inner)?;
        Ok(inner.entries.values().next().cloned())
    }

    fn peek_n(&self, num_entries: i64, num_bytes: i64) -> StoreResult<Vec<Arc<QueueEntry>>> {
        let inner = self.inner.lock();
        Self::ensure_open(&inner)?;
        Self::select_head(&inner, num_entries, num_bytes, PrioFilter::All)
    }

    fn peek_same_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        let inner = self.inner.lock();
        Self::ensure_open(&inner)?;
        Self::select_head(&inner, num_entries, num_bytes, PrioFilter::Same)
    }

    fn peek_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        check_priority_range(min_prio, max_prio)?;
        let inner = self.inner.lock();
        Self::ensure_open(&inner)?;
        Self::select_head(
            &inner,
            num_entries,
            num_bytes,
            PrioFilter::Range(min_prio, max_prio),
        )
    }

    fn peek_with_limit_entry(
        &self,
        limit: Option<&QueueEntry>,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        let inner = self.inner.lock();
        Self::ensure_open(&inner)?;
        let Some(limit) = limit else {
            return Ok(Vec::new());
        };
        Ok(inner
            .entries
            .range(..limit.key())
            .map(|(_, e)| Arc::clone(e))
            .collect())
    }

    fn take_n(&self, num_entries: i64, num_bytes: i64) -> StoreResult<Vec<Arc<QueueEntry>>> {
        let selected = {
            let mut inner = self.inner.lock();
            Self::ensure_open(&inner)?;
            let selected = Self::select_head(&inner, num_entries, num_bytes, PrioFilter::All)?;
            self.remove_selected(&mut inner, &selected);
            selected
        };
        self.accountant.publish(&self.storage_id);
        Ok(selected)
    }

    fn take_same_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        let selected = {
            let mut inner = self.inner.lock();
            Self::ensure_open(&inner)?;
            let selected = Self::select_head(&inner, num_entries, num_bytes, PrioFilter::Same)?;
            self.remove_selected(&mut inner, &selected);
            selected
        };
        self.accountant.publish(&self.storage_id);
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
        let selected = {
            let mut inner = self.inner.lock();
            Self::ensure_open(&inner)?;
            let selected = Self::select_head(
                &inner,
                num_entries,
                num_bytes,
                PrioFilter::Range(min_prio, max_prio),
            )?;
            self.remove_selected(&mut inner, &selected);
            selected
        };
        self.accountant.publish(&self.storage_id);
        Ok(selected)
    }

    fn take_lowest(
        &self,
        num_entries: i64,
        num_bytes: i64,
        reference: Option<&QueueEntry>,
        leave_one: bool,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        let selected = {
            let mut inner = self.inner.lock();
            Self::ensure_open(&inner)?;
            let mut walk = BudgetWalk::new(num_entries, num_bytes)?;
            let total = inner.entries.len();
            let mut selected = Vec::new();
            for (key, entry) in inner.entries.iter().rev() {
                // Entries at or before the watermark are protected.
                if let Some(reference) = reference {
                    if *key <= reference.key() {
                        break;
                    }
                }
                if !walk.admit(entry.size_bytes()) {
                    break;
                }
                selected.push(Arc::clone(entry));
            }
            if leave_one && selected.len() == total {
                selected.pop();
            }
            self.remove_selected(&mut inner, &selected);
            selected
        };
        self.accountant.publish(&self.storage_id);
        Ok(selected)
    }

    fn remove_num(&self, num_entries: i64) -> StoreResult<u64> {
        let removed = {
            let mut inner = self.inner.lock();
            Self::ensure_open(&inner)?;
            let selected = Self::select_head(&inner, num_entries, -1, PrioFilter::All)?;
            self.remove_selected(&mut inner, &selected)
        };
        self.accountant.publish(&self.storage_id);
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
        let removed = {
            let mut inner = self.inner.lock();
            Self::ensure_open(&inner)?;
            let selected = Self::select_head(
                &inner,
                num_entries,
                num_bytes,
                PrioFilter::Range(min_prio, max_prio),
            )?;
            self.remove_selected(&mut inner, &selected)
        };
        self.accountant.publish(&self.storage_id);
        Ok(removed)
    }

    fn remove_random(&self, entries: &[Arc<QueueEntry>]) -> StoreResult<Vec<bool>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let flags = {
            let mut inner = self.inner.lock();
            Self::ensure_open(&inner)?;
            let mut delta = SizeDelta::default();
            let mut flags = vec![false; entries.len()];
            for (i, entry) in entries.iter().enumerate() {
                if let Some(key) = inner.ids.remove(&entry.identity()) {
                    if let Some(stored) = inner.entries.remove(&key) {
                        delta.merge(SizeDelta::removed(&stored));
                        flags[i] = true;
                    }
                }
            }
            self.accountant.apply(delta);
            flags
        };
        self.accountant.publish(&self.storage_id);
        Ok(flags)
    }

    fn remove_with_limit_entry(
        &self,
        limit: Option<&QueueEntry>,
        inclusive: bool,
    ) -> StoreResult<u64> {
        let Some(limit) = limit else {
            return Ok(0);
        };
        let removed = {
            let mut inner = self.inner.lock();
            Self::ensure_open(&inner)?;
            let mut selected: Vec<Arc<QueueEntry>> = inner
                .entries
                .range(..limit.key())
                .map(|(_, e)| Arc::clone(e))
                .collect();
            if inclusive {
                if let Some(exact) = inner.entries.get(&limit.key()) {
                    selected.push(Arc::clone(exact));
                }
            }
            self.remove_selected(&mut inner, &selected)
        };
        self.accountant.publish(&self.storage_id);
        Ok(removed)
    }

    fn clear(&self) -> StoreResult<u64> {
        let removed = {
            let mut inner = self.inner.lock();
            Self::ensure_open(&inner)?;
            let selected: Vec<Arc<QueueEntry>> = inner.entries.values().cloned().collect();
            inner.entries.clear();
            inner.ids.clear();
            let mut delta = SizeDelta::default();
            for entry in &selected {
                delta.merge(SizeDelta::removed(entry));
            }
            self.accountant.apply(delta);
            selected.len() as u64
        };
        self.accountant.publish(&self.storage_id);
        Ok(removed)
    }

    fn shutdown(&self) {
        let remaining = {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                return;
            }
            inner.shutdown = true;
            inner.entries.len()
        };
        if remaining > 0 {
            debug!(queue = %self.storage_id, remaining,
                   "shutting down ram store with entries still queued");
        }
        self.accountant.publish(&self.storage_id);
        self.accountant.clear_listeners();
        self.put_listener.clear();
    }

    fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }

    fn num_entries(&self) -> u64 {
        self.accountant.entries()
    }

    fn num_bytes(&self) -> u64 {
        self.accountant.bytes()
    }

    fn num_persistent_entries(&self) -> u64 {
        self.accountant.persistent_entries()
    }

    fn num_persistent_bytes(&self) -> u64 {
        self.accountant.persistent_bytes()
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
