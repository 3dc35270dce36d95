//! Shared swap-store resources.
//!
//! All swap-backed queues of a process share one [`SwapPool`]: the journal
//! directory, the content-addressed blob store for large payloads, and the
//! availability state of the backing tier. The pool is reference counted
//! (`Arc`), so one queue shutting down never invalidates the others.
//!
//! Availability is the pool's model of "is the backing store reachable":
//! flipping it to `false` makes every swap operation fail with
//! `StoreError::Unavailable`, which is what the cache tier degrades
//! around; flipping it back notifies registered listeners so cache tiers
//! can resume swapping.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::core::error::{StoreError, StoreResult};

/// Informed when the backing tier becomes (un)reachable.
pub trait AvailabilityListener: Send + Sync {
    fn storage_available(&self);
    fn storage_unavailable(&self);
}

pub struct SwapPool {
    root: PathBuf,
    available: AtomicBool,
    listeners: Mutex<Vec<Weak<dyn AvailabilityListener>>>,
    blobs: BlobStore,
}

impl SwapPool {
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Arc<Self>> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let blobs = BlobStore::open(root.join("blobs"))?;
        info!(root = %root.display(), "swap pool opened");
        Ok(Arc::new(Self {
            root,
            available: AtomicBool::new(true),
            listeners: Mutex::new(Vec::new()),
            blobs,
        }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Flips the availability flag and notifies listeners on a change.
    /// Exercised by reconnection handling and by tests simulating a lost
    /// backing connection.
    pub fn set_available(&self, available: bool) {
        let previous = self.available.swap(available, Ordering::AcqRel);
        if previous == available {
            return;
        }
        if available {
            info!(root = %self.root.display(), "swap pool available again");
        } else {
            warn!(root = %self.root.display(), "swap pool marked unavailable");
        }
        let listeners: Vec<Arc<dyn AvailabilityListener>> = {
            let mut slots = self.listeners.lock();
            slots.retain(|w| w.strong_count() > 0);
            slots.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            if available {
                listener.storage_available();
            } else {
                listener.storage_unavailable();
            }
        }
    }

    pub fn add_availability_listener(&self, listener: Weak<dyn AvailabilityListener>) {
        self.listeners.lock().push(listener);
    }

    pub(crate) fn ensure_available(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "swap pool at {} is not reachable",
                self.root.display()
            )))
        }
    }

    pub(crate) fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Number of blobs currently held; exposed for monitoring and tests.
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }
}

pub(crate) type BlobHash = [u8; 32];

/// Content-addressed payload store with reference counting.
///
/// Large payloads are stored once per content hash no matter how many
/// queue rows reference them; the file disappears when the last reference
/// is released. Reference counts are rebuilt from the journals on attach,
/// so they live in memory only.
pub(crate) struct BlobStore {
    dir: PathBuf,
    refs: Mutex<HashMap<BlobHash, u64>>,
}

impl BlobStore {
    fn open(dir: PathBuf) -> StoreResult<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            refs: Mutex::new(HashMap::new()),
        })
    }

    fn path_for(&self, hash: &BlobHash) -> PathBuf {
        self.dir.join(hex(hash))
    }

    /// Stores the payload (once per content) and takes a reference.
    pub(crate) fn insert(&self, payload: &Bytes) -> StoreResult<BlobHash> {
        let hash: BlobHash = *blake3::hash(payload).as_bytes();
        let mut refs = self.refs.lock();
        let count = refs.entry(hash).or_insert(0);
        if *count == 0 {
            let path = self.path_for(&hash);
            if !path.exists() {
                let tmp = path.with_extension("tmp");
                fs::write(&tmp, payload)?;
                fs::rename(&tmp, &path)?;
            }
        }
        *count += 1;
        Ok(hash)
    }

    /// Takes a reference on an existing blob during journal replay.
    pub(crate) fn retain(&self, hash: &BlobHash) {
        *self.refs.lock().entry(*hash).or_insert(0) += 1;
    }

    pub(crate) fn fetch(&self, hash: &BlobHash) -> StoreResult<Bytes> {
        let path = self.path_for(hash);
        let data = fs::read(&path).map_err(|e| {
            StoreError::Corrupt(format!("blob {} unreadable: {e}", hex(hash)))
        })?;
        Ok(Bytes::from(data))
    }

    /// Drops one reference; the blob file is deleted with the last one.
    pub(crate) fn release(&self, hash: &BlobHash) {
        let mut refs = self.refs.lock();
        match refs.get_mut(hash) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                refs.remove(hash);
                let path = self.path_for(hash);
                if let Err(e) = fs::remove_file(&path) {
                    warn!(blob = %hex(hash), "failed to delete unreferenced blob: {e}");
                }
            }
            None => warn!(blob = %hex(hash), "release of untracked blob"),
        }
    }

    fn len(&self) -> usize {
        self.refs.lock().len()
    }
}

fn hex(hash: &BlobHash) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_payloads_share_one_blob() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SwapPool::open(dir.path()).unwrap();
        let payload = Bytes::from(vec![7u8; 4096]);

        let h1 = pool.blobs().insert(&payload).unwrap();
        let h2 = pool.blobs().insert(&payload).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(pool.blob_count(), 1);

        pool.blobs().release(&h1);
        assert_eq!(pool.blob_count(), 1);
        pool.blobs().release(&h2);
        assert_eq!(pool.blob_count(), 0);
        assert_eq!(pool.blobs().fetch(&h1).is_err(), true);
    }

    #[test]
    fn unavailable_pool_rejects_and_notifies() {
        struct Flag(AtomicBool);
        impl AvailabilityListener for Flag {
            fn storage_available(&self) {
                self.0.store(true, Ordering::SeqCst);
            }
            fn storage_unavailable(&self) {
                self.0.store(false, Ordering::SeqCst);
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let pool = SwapPool::open(dir.path()).unwrap();
        let flag = Arc::new(Flag(AtomicBool::new(true)));
        pool.add_availability_listener(Arc::downgrade(
            &(flag.clone() as Arc<dyn AvailabilityListener>),
        ));

        pool.set_available(false);
        assert!(pool.ensure_available().is_err());
        assert!(!flag.0.load(Ordering::SeqCst));

        pool.set_available(true);
        assert!(pool.ensure_available().is_ok());
        assert!(flag.0.load(Ordering::SeqCst));
    }
}
