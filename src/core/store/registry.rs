//! Registry of live queue stores.
//!
//! Uses DashMap for lock-free concurrent access; the backing realization
//! is selected by configuration at construction time, not at runtime.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;
use crate::core::error::{StoreError, StoreResult};
use crate::core::store::cache::CacheStore;
use crate::core::store::pool::SwapPool;
use crate::core::store::ram::RamStore;
use crate::core::store::swap::{SwapSettings, SwapStore};
use crate::core::store::{QueueProperties, QueueStore, StorageId};

/// Which realization newly created queues get.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Ram,
    Swap,
    Cache,
}

pub struct StoreRegistry {
    kind: StoreKind,
    defaults: QueueProperties,
    settings: SwapSettings,
    pool: Option<Arc<SwapPool>>,
    stores: DashMap<StorageId, Arc<dyn QueueStore>>,
}

impl StoreRegistry {
    pub fn from_config(config: &Config) -> StoreResult<Self> {
        let kind = config.store.kind;
        let pool = match kind {
            StoreKind::Ram => None,
            StoreKind::Swap | StoreKind::Cache => Some(SwapPool::open(&config.swap.directory)?),
        };
        Ok(Self {
            kind,
            defaults: config.queue_properties(),
            settings: config.swap_settings(),
            pool,
            stores: DashMap::new(),
        })
    }

    /// Returns the queue for `storage_id`, creating it with the default
    /// properties if not present.
    pub fn get_or_create(&self, storage_id: StorageId) -> StoreResult<Arc<dyn QueueStore>> {
        self.get_or_create_with(storage_id, self.defaults)
    }

    pub fn get_or_create_with(
        &self,
        storage_id: StorageId,
        props: QueueProperties,
    ) -> StoreResult<Arc<dyn QueueStore>> {
        match self.stores.entry(storage_id.clone()) {
            Entry::Occupied(existing) => Ok(Arc::clone(existing.get())),
            Entry::Vacant(slot) => {
                let store = self.build(storage_id, props)?;
                slot.insert(Arc::clone(&store));
                Ok(store)
            }
        }
    }

    fn build(
        &self,
        storage_id: StorageId,
        props: QueueProperties,
    ) -> StoreResult<Arc<dyn QueueStore>> {
        info!(queue = %storage_id, kind = ?self.kind, "creating queue store");
        match self.kind {
            StoreKind::Ram => Ok(Arc::new(RamStore::new(storage_id, props))),
            StoreKind::Swap => {
                let pool = self.pool()?;
                Ok(Arc::new(SwapStore::attach(
                    pool,
                    storage_id,
                    props,
                    self.settings.clone(),
                )?))
            }
            StoreKind::Cache => {
                let pool = self.pool()?;
                Ok(CacheStore::attach(pool, storage_id, props, self.settings.clone())?
                    as Arc<dyn QueueStore>)
            }
        }
    }

    fn pool(&self) -> StoreResult<Arc<SwapPool>> {
        self.pool
            .as_ref()
            .cloned()
            .ok_or_else(|| StoreError::Unavailable("no swap pool configured".into()))
    }

    pub fn get(&self, storage_id: &StorageId) -> Option<Arc<dyn QueueStore>> {
        self.stores.get(storage_id).map(|s| Arc::clone(&*s))
    }

    /// Shuts the queue down and forgets it. The shared pool stays up for
    /// the remaining queues.
    pub fn remove(&self, storage_id: &StorageId) {
        if let Some((_, store)) = self.stores.remove(storage_id) {
            store.shutdown();
        }
    }

    pub fn shutdown_all(&self) {
        for entry in self.stores.iter() {
            entry.value().shutdown();
        }
        self.stores.clear();
    }

    pub fn count(&self) -> usize {
        self.stores.len()
    }

    pub fn swap_pool(&self) -> Option<&Arc<SwapPool>> {
        self.pool.as_ref()
    }
}
