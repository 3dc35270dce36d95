use std::io::Write;

use stashmq::config::load_config;
use stashmq::core::store::registry::StoreKind;
use stashmq::Config;

#[test]
fn load_config_matches_toml() {
    let cfg: Config = load_config("stashmq.toml").expect("failed to load config");

    assert_eq!(cfg.store.kind, StoreKind::Cache);
    assert_eq!(cfg.queues.max_entries, 2000);
    assert_eq!(cfg.queues.max_bytes, 20_971_520);
    assert_eq!(cfg.queues.max_entries_cache, 200);
    assert_eq!(cfg.queues.max_bytes_cache, 4_194_304);
    assert_eq!(cfg.swap.directory, "./swap");
    assert_eq!(cfg.swap.blob_threshold_bytes, 16_384);
    assert!(!cfg.swap.sync_on_write);
    assert_eq!(cfg.swap.compact_min_bytes, 1_048_576);
    assert_eq!(cfg.blocking.poll_interval_ms, 200);
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[store]\nkind = \"ram\"").unwrap();

    let cfg: Config = load_config(file.path()).expect("failed to load config");
    assert_eq!(cfg.store.kind, StoreKind::Ram);

    let defaults = Config::default();
    assert_eq!(cfg.queues.max_entries, defaults.queues.max_entries);
    assert_eq!(cfg.swap.directory, defaults.swap.directory);
    assert_eq!(cfg.blocking.poll_interval_ms, defaults.blocking.poll_interval_ms);
}
