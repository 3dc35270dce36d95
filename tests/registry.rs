use std::sync::Arc;

use stashmq::core::store::registry::StoreKind;
use stashmq::core::store::{Relating, StorageId};
use stashmq::{Config, StoreRegistry};

fn ram_config() -> Config {
    let mut config = Config::default();
    config.store.kind = StoreKind::Ram;
    config
}

#[test]
fn same_storage_id_yields_the_same_store() {
    let registry = StoreRegistry::from_config(&ram_config()).unwrap();
    let id = StorageId::new(Relating::Subject, "joe");

    let first = registry.get_or_create(id.clone()).unwrap();
    let second = registry.get_or_create(id.clone()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.count(), 1);
}

#[test]
fn removing_a_queue_shuts_it_down() {
    let registry = StoreRegistry::from_config(&ram_config()).unwrap();
    let id = StorageId::new(Relating::Callback, "joe/1");

    let store = registry.get_or_create(id.clone()).unwrap();
    registry.remove(&id);
    assert!(store.is_shutdown());
    assert_eq!(registry.count(), 0);
    assert!(registry.get(&id).is_none());
}

#[test]
fn cache_registry_opens_a_shared_pool() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.store.kind = StoreKind::Cache;
    config.swap.directory = dir.path().to_string_lossy().into_owned();

    let registry = StoreRegistry::from_config(&config).unwrap();
    assert!(registry.swap_pool().is_some());

    let q1 = registry
        .get_or_create(StorageId::new(Relating::Client, "a"))
        .unwrap();
    let q2 = registry
        .get_or_create(StorageId::new(Relating::Client, "b"))
        .unwrap();
    q1.put(
        Arc::new(stashmq::QueueEntry::with_identity(
            1,
            stashmq::Priority::NORM,
            "hello",
            true,
        )),
        false,
    )
    .unwrap();
    assert_eq!(q1.num_entries(), 1);
    assert_eq!(q2.num_entries(), 0);

    registry.shutdown_all();
    assert!(q1.is_shutdown());
}
