//! Durable queue store backed by a per-queue journal.
//!
//! Every mutation is appended to an append-only journal (length-prefixed,
//! crc32-checksummed bincode records) before the in-memory index is
//! touched, so a failed write leaves the store exactly as it was. On
//! attach the journal is replayed: a corrupt tail is dropped with a
//! warning, rows flagged persistent are kept and everything else (swap
//! residue of a previous process) is swept out, then the journal is
//! rewritten compactly.
//!
//! Payloads at or above the blob threshold are stored once per content
//! hash in the pool's shared blob store and fetched back on demand;
//! smaller payloads stay inline in the index.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::accounting::{SizeAccountant, SizeDelta, SizeListener};
use crate::core::entry::{EntryKey, Priority, QueueEntry};
use crate::core::error::{StoreError, StoreResult};
use crate::core::store::pool::{BlobHash, SwapPool};
use crate::core::store::{
    check_capacity, check_priority_range, BudgetWalk, PutListener, PutListenerSlot,
    QueueProperties, QueueStore, StorageId,
};

/// Tuning of the journal and blob handling, typically filled from the
/// `[swap]` section of the configuration.
#[derive(Debug, Clone)]
pub struct SwapSettings {
    /// Payloads of at least this many bytes go to the shared blob store.
    pub blob_threshold_bytes: u64,
    /// fsync the journal on every append instead of on shutdown only.
    pub sync_on_write: bool,
    /// Journals smaller than this are never compacted.
    pub compact_min_bytes: u64,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            blob_threshold_bytes: 16 * 1024,
            sync_on_write: false,
            compact_min_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum PayloadRef {
    Inline(Bytes),
    Blob { hash: BlobHash, len: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryRecord {
    identity: u64,
    priority: Priority,
    size_bytes: u64,
    persistent: bool,
    payload: PayloadRef,
}

impl EntryRecord {
    fn key(&self) -> EntryKey {
        EntryKey {
            priority: self.priority,
            identity: self.identity,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum JournalRecord {
    Put(EntryRecord),
    Remove { identity: u64 },
}

struct Journal {
    path: PathBuf,
    file: File,
    len: u64,
    dead_records: u64,
    sync_on_write: bool,
}

impl Journal {
    fn append(&mut self, record: &JournalRecord) -> StoreResult<()> {
        let payload = bincode::serialize(record)?;
        let mut frame = Vec::with_capacity(8 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
        frame.extend_from_slice(&payload);
        self.file.write_all(&frame)?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }
        self.len += frame.len() as u64;
        Ok(())
    }

    /// Rolls the file back to a known-good length after a failed batch.
    fn truncate_to(&mut self, len: u64) {
        if self.file.set_len(len).is_ok() {
            let _ = self.file.seek(SeekFrom::Start(len));
            self.len = len;
        }
    }
}

enum PrioFilter {
    All,
    Same,
    Range(Priority, Priority),
}

struct SwapInner {
    index: BTreeMap<EntryKey, EntryRecord>,
    ids: HashMap<u64, EntryKey>,
    journal: Journal,
    shutdown: bool,
}

pub struct SwapStore {
    storage_id: StorageId,
    pool: Arc<SwapPool>,
    props: Mutex<QueueProperties>,
    settings: SwapSettings,
    inner: Mutex<SwapInner>,
    accountant: SizeAccountant,
    put_listener: PutListenerSlot,
}

impl SwapStore {
    /// Opens (or creates) the journal for `storage_id` and replays it.
    /// Persistent rows written by a previous process are reattached;
    /// transient swap residue is swept out.
    pub fn attach(
        pool: Arc<SwapPool>,
        storage_id: StorageId,
        props: QueueProperties,
        settings: SwapSettings,
    ) -> StoreResult<Self> {
        pool.ensure_available()?;
        let path = pool
            .root()
            .join(format!("{}.swap", storage_id.file_stem()));

        let records = replay_journal(&path)?;
        let mut index: BTreeMap<EntryKey, EntryRecord> = BTreeMap::new();
        let mut ids: HashMap<u64, EntryKey> = HashMap::new();
        for record in records {
            match record {
                JournalRecord::Put(record) => {
                    if ids.contains_key(&record.identity) {
                        continue;
                    }
                    ids.insert(record.identity, record.key());
                    index.insert(record.key(), record);
                }
                JournalRecord::Remove { identity } => {
                    if let Some(key) = ids.remove(&identity) {
                        index.remove(&key);
                    }
                }
            }
        }

        let mut swept = 0usize;
        index.retain(|_, record| {
            if record.persistent {
                true
            } else {
                ids.remove(&record.identity);
                swept += 1;
                false
            }
        });
        if swept > 0 {
            info!(queue = %storage_id, swept,
                  "dropped transient swap residue while reattaching");
        }

        // Re-take blob references for the surviving rows.
        for record in index.values() {
            if let PayloadRef::Blob { hash, .. } = &record.payload {
                pool.blobs().retain(hash);
            }
        }

        // Rewrite the journal compactly so a dropped tail or swept rows
        // do not linger on disk.
        let journal = rewrite_journal(&path, index.values(), settings.sync_on_write)?;

        let accountant = SizeAccountant::new();
        let mut delta = SizeDelta::default();
        for record in index.values() {
            delta.merge(record_delta(record, 1));
        }
        accountant.apply(delta);

        info!(queue = %storage_id, entries = index.len(), "swap store attached");
        Ok(Self {
            storage_id,
            pool,
            props: Mutex::new(props),
            settings,
            inner: Mutex::new(SwapInner {
                index,
                ids,
                journal,
                shutdown: false,
            }),
            accountant,
            put_listener: PutListenerSlot::default(),
        })
    }

    pub(crate) fn contains_identity(&self, identity: u64) -> bool {
        self.inner.lock().ids.contains_key(&identity)
    }

    fn ensure_usable(&self, inner: &SwapInner) -> StoreResult<()> {
        if inner.shutdown {
            return Err(StoreError::Shutdown);
        }
        self.pool.ensure_available()
    }

    fn materialize(&self, record: &EntryRecord) -> StoreResult<Arc<QueueEntry>> {
        let payload = match &record.payload {
            PayloadRef::Inline(bytes) => bytes.clone(),
            PayloadRef::Blob { hash, .. } => self.pool.blobs().fetch(hash)?,
        };
        Ok(Arc::new(QueueEntry::with_size(
            record.identity,
            record.priority,
            record.size_bytes,
            payload,
            record.persistent,
        )))
    }

    fn select_keys(
        inner: &SwapInner,
        num_entries: i64,
        num_bytes: i64,
        filter: PrioFilter,
    ) -> StoreResult<Vec<EntryKey>> {
        let mut walk = BudgetWalk::new(num_entries, num_bytes)?;
        let mut selected = Vec::new();
        let mut locked_prio: Option<Priority> = None;
        for (key, record) in &inner.index {
            match &filter {
                PrioFilter::All => {}
                PrioFilter::Same => match locked_prio {
                    None => locked_prio = Some(key.priority),
                    Some(p) if key.priority != p => break,
                    _ => {}
                },
                PrioFilter::Range(min, max) => {
                    if key.priority < *min {
                        break;
                    }
                    if key.priority > *max {
                        continue;
                    }
                }
            }
            if !walk.admit(record.size_bytes) {
                break;
            }
            selected.push(*key);
        }
        Ok(selected)
    }

    fn peek_keys(&self, inner: &SwapInner, keys: &[EntryKey]) -> StoreResult<Vec<Arc<QueueEntry>>> {
        keys.iter()
            .map(|key| self.materialize(&inner.index[key]))
            .collect()
    }

    /// Appends removal records for `keys`, then drops them from the index
    /// and releases their blobs. All-or-nothing with respect to the
    /// journal: an append failure rolls the file back untouched.
    fn remove_keys(&self, inner: &mut SwapInner, keys: &[EntryKey]) -> StoreResult<u64> {
        let rollback_len = inner.journal.len;
        for key in keys {
            let Some(record) = inner.index.get(key) else {
                continue;
            };
            let identity = record.identity;
            if let Err(e) = inner.journal.append(&JournalRecord::Remove { identity }) {
                inner.journal.truncate_to(rollback_len);
                return Err(e);
            }
        }
        let mut delta = SizeDelta::default();
        let mut removed = 0u64;
        for key in keys {
            if let Some(record) = inner.index.remove(key) {
                inner.ids.remove(&record.identity);
                if let PayloadRef::Blob { hash, .. } = &record.payload {
                    self.pool.blobs().release(hash);
                }
                delta.merge(record_delta(&record, -1));
                inner.journal.dead_records += 2;
                removed += 1;
            }
        }
        self.accountant.apply(delta);
        self.maybe_compact(inner);
        Ok(removed)
    }

    /// Rewrites the journal from the live index once the dead records
    /// outnumber the live ones and the file has grown past the floor.
    fn maybe_compact(&self, inner: &mut SwapInner) {
        if inner.journal.len < self.settings.compact_min_bytes
            || inner.journal.dead_records <= inner.index.len() as u64
        {
            return;
        }
        match rewrite_journal(
            &inner.journal.path.clone(),
            inner.index.values(),
            self.settings.sync_on_write,
        ) {
            Ok(journal) => {
                debug!(queue = %self.storage_id, bytes = journal.len, "journal compacted");
                inner.journal = journal;
            }
            Err(e) => warn!(queue = %self.storage_id, "journal compaction failed: {e}"),
        }
    }

    /// Selection and removal happen under one lock acquisition so a take
    /// is atomic with respect to concurrent mutations.
    fn take_where<F>(&self, select: F) -> StoreResult<Vec<Arc<QueueEntry>>>
    where
        F: FnOnce(&SwapInner) -> StoreResult<Vec<EntryKey>>,
    {
        let selected = {
            let mut inner = self.inner.lock();
            self.ensure_usable(&inner)?;
            let keys = select(&inner)?;
            let selected = self.peek_keys(&inner, &keys)?;
            self.remove_keys(&mut inner, &keys)?;
            selected
        };
        self.accountant.publish(&self.storage_id);
        Ok(selected)
    }
}

impl QueueStore for SwapStore {
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
            self.ensure_usable(&inner)?;
            let props = *self.props.lock();

            let mut count = self.accountant.entries();
            let mut bytes = self.accountant.bytes();
            let mut fresh: Vec<&Arc<QueueEntry>> = Vec::with_capacity(entries.len());
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
                fresh.push(entry);
            }

            // Blob payloads first, then the journal, then the index; any
            // failure unwinds what was already done.
            let mut records: Vec<EntryRecord> = Vec::with_capacity(fresh.len());
            let mut inserted_blobs: Vec<BlobHash> = Vec::new();
            for entry in &fresh {
                let payload = if entry.payload().len() as u64 >= self.settings.blob_threshold_bytes
                {
                    match self.pool.blobs().insert(entry.payload()) {
                        Ok(hash) => {
                            inserted_blobs.push(hash);
                            PayloadRef::Blob {
                                hash,
                                len: entry.payload().len() as u64,
                            }
                        }
                        Err(e) => {
                            for hash in &inserted_blobs {
                                self.pool.blobs().release(hash);
                            }
                            return Err(e);
                        }
                    }
                } else {
                    PayloadRef::Inline(entry.payload().clone())
                };
                records.push(EntryRecord {
                    identity: entry.identity(),
                    priority: entry.priority(),
                    size_bytes: entry.size_bytes(),
                    persistent: entry.persistent(),
                    payload,
                });
            }

            let rollback_len = inner.journal.len;
            for record in &records {
                if let Err(e) = inner.journal.append(&JournalRecord::Put(record.clone())) {
                    inner.journal.truncate_to(rollback_len);
                    for hash in &inserted_blobs {
                        self.pool.blobs().release(hash);
                    }
                    return Err(e);
                }
            }

            let mut delta = SizeDelta::default();
            for record in records {
                delta.merge(record_delta(&record, 1));
                inner.ids.insert(record.identity, record.key());
                inner.index.insert(record.key(), record);
            }
            self.accountant.apply(delta);
            fresh.into_iter().cloned().collect::<Vec<_>>()
        };

        self.accountant.publish(&self.storage_id);
        if !bypass_notifier {
            self.put_listener.notify(&self.storage_id, &fresh);
        }
        Ok(())
    }

    fn peek(&self) -> StoreResult<Option<Arc<QueueEntry>>> {
        let inner = self.inner.lock();
        self.ensure_usable(&inner)?;
        match inner.index.values().next() {
            Some(record) => Ok(Some(self.materialize(record)?)),
            None => Ok(None),
        }
    }

    fn peek_n(&self, num_entries: i64, num_bytes: i64) -> StoreResult<Vec<Arc<QueueEntry>>> {
        let inner = self.inner.lock();
        self.ensure_usable(&inner)?;
        let keys = Self::select_keys(&inner, num_entries, num_bytes, PrioFilter::All)?;
        self.peek_keys(&inner, &keys)
    }

    fn peek_same_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        let inner = self.inner.lock();
        self.ensure_usable(&inner)?;
        let keys = Self::select_keys(&inner, num_entries, num_bytes, PrioFilter::Same)?;
        self.peek_keys(&inner, &keys)
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
        self.ensure_usable(&inner)?;
        let keys = Self::select_keys(
            &inner,
            num_entries,
            num_bytes,
            PrioFilter::Range(min_prio, max_prio),
        )?;
        self.peek_keys(&inner, &keys)
    }

    fn peek_with_limit_entry(
        &self,
        limit: Option<&QueueEntry>,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        let inner = self.inner.lock();
        self.ensure_usable(&inner)?;
        let Some(limit) = limit else {
            return Ok(Vec::new());
        };
        inner
            .index
            .range(..limit.key())
            .map(|(_, record)| self.materialize(record))
            .collect()
    }

    fn take_n(&self, num_entries: i64, num_bytes: i64) -> StoreResult<Vec<Arc<QueueEntry>>> {
        self.take_where(|inner| Self::select_keys(inner, num_entries, num_bytes, PrioFilter::All))
    }

    fn take_same_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        self.take_where(|inner| Self::select_keys(inner, num_entries, num_bytes, PrioFilter::Same))
    }

    fn take_with_priority(
        &self,
        num_entries: i64,
        num_bytes: i64,
        min_prio: Priority,
        max_prio: Priority,
    ) -> StoreResult<Vec<Arc<QueueEntry>>> {
        check_priority_range(min_prio, max_prio)?;
        self.take_where(|inner| {
            Self::select_keys(
                inner,
                num_entries,
                num_bytes,
                PrioFilter::Range(min_prio, max_prio),
            )
        })
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
            self.ensure_usable(&inner)?;
            let mut walk = BudgetWalk::new(num_entries, num_bytes)?;
            let total = inner.index.len();
            let mut keys = Vec::new();
            for (key, record) in inner.index.iter().rev() {
                if let Some(reference) = reference {
                    if *key <= reference.key() {
                        break;
                    }
                }
                if !walk.admit(record.size_bytes) {
                    break;
                }
                keys.push(*key);
            }
            if leave_one && keys.len() == total {
                keys.pop();
            }
            let selected = self.peek_keys(&inner, &keys)?;
            self.remove_keys(&mut inner, &keys)?;
            selected
        };
        self.accountant.publish(&self.storage_id);
        Ok(selected)
    }

    fn remove_num(&self, num_entries: i64) -> StoreResult<u64> {
        let removed = {
            let mut inner = self.inner.lock();
            self.ensure_usable(&inner)?;
            let keys = Self::select_keys(&inner, num_entries, -1, PrioFilter::All)?;
            self.remove_keys(&mut inner, &keys)?
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
            self.ensure_usable(&inner)?;
            let keys = Self::select_keys(
                &inner,
                num_entries,
                num_bytes,
                PrioFilter::Range(min_prio, max_prio),
            )?;
            self.remove_keys(&mut inner, &keys)?
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
            self.ensure_usable(&inner)?;
            let mut flags = vec![false; entries.len()];
            let mut keys = Vec::new();
            let mut claimed = std::collections::HashSet::new();
            for (i, entry) in entries.iter().enumerate() {
                if let Some(key) = inner.ids.get(&entry.identity()) {
                    if claimed.insert(entry.identity()) {
                        flags[i] = true;
                        keys.push(*key);
                    }
                }
            }
            self.remove_keys(&mut inner, &keys)?;
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
            self.ensure_usable(&inner)?;
            let mut keys: Vec<EntryKey> =
                inner.index.range(..limit.key()).map(|(k, _)| *k).collect();
            if inclusive && inner.index.contains_key(&limit.key()) {
                keys.push(limit.key());
            }
            self.remove_keys(&mut inner, &keys)?
        };
        self.accountant.publish(&self.storage_id);
        Ok(removed)
    }

    fn clear(&self) -> StoreResult<u64> {
        let removed = {
            let mut inner = self.inner.lock();
            self.ensure_usable(&inner)?;
            let mut delta = SizeDelta::default();
            for record in inner.index.values() {
                if let PayloadRef::Blob { hash, .. } = &record.payload {
                    self.pool.blobs().release(hash);
                }
                delta.merge(record_delta(record, -1));
            }
            let removed = inner.index.len() as u64;
            inner.index.clear();
            inner.ids.clear();
            inner.journal.truncate_to(0);
            inner.journal.dead_records = 0;
            self.accountant.apply(delta);
            removed
        };
        self.accountant.publish(&self.storage_id);
        Ok(removed)
    }

    fn shutdown(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                return;
            }
            inner.shutdown = true;
            if let Err(e) = inner.journal.file.sync_all() {
                warn!(queue = %self.storage_id, "journal sync on shutdown failed: {e}");
            }
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

fn record_delta(record: &EntryRecord, sign: i64) -> SizeDelta {
    let persistent = record.persistent as i64;
    SizeDelta {
        entries: sign,
        bytes: sign * record.size_bytes as i64,
        persistent_entries: sign * persistent,
        persistent_bytes: sign * persistent * record.size_bytes as i64,
    }
}

/// Reads every valid record from the journal; a short or checksum-broken
/// tail ends the replay with a warning instead of failing the attach.
fn replay_journal(path: &Path) -> StoreResult<Vec<JournalRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut raw = Vec::new();
    File::open(path)?.read_to_end(&mut raw)?;

    let mut records = Vec::new();
    let mut offset = 0usize;
    while raw.len() - offset >= 8 {
        let len = u32::from_be_bytes(raw[offset..offset + 4].try_into().unwrap()) as usize;
        let crc = u32::from_be_bytes(raw[offset + 4..offset + 8].try_into().unwrap());
        let start = offset + 8;
        if raw.len() < start + len {
            warn!(journal = %path.display(), offset, "truncated record at journal tail");
            break;
        }
        let payload = &raw[start..start + len];
        if crc32fast::hash(payload) != crc {
            warn!(journal = %path.display(), offset, "checksum mismatch, dropping journal tail");
            break;
        }
        match bincode::deserialize::<JournalRecord>(payload) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(journal = %path.display(), offset, "undecodable record, dropping tail: {e}");
                break;
            }
        }
        offset = start + len;
    }
    Ok(records)
}

/// Writes the live set to a fresh journal and swaps it into place.
fn rewrite_journal<'a>(
    path: &Path,
    records: impl Iterator<Item = &'a EntryRecord>,
    sync_on_write: bool,
) -> StoreResult<Journal> {
    let tmp = path.with_extension("swap.tmp");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    let mut journal = Journal {
        path: path.to_path_buf(),
        file,
        len: 0,
        dead_records: 0,
        sync_on_write,
    };
    for record in records {
        journal.append(&JournalRecord::Put(record.clone()))?;
    }
    journal.file.sync_all()?;
    std::fs::rename(&tmp, path)?;

    let mut file = OpenOptions::new().write(true).read(true).open(path)?;
    file.seek(SeekFrom::End(0))?;
    journal.file = file;
    Ok(journal)
}
