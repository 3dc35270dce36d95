use serde::Deserialize;
use std::{fs, path::Path};

use crate::core::store::registry::StoreKind;
use crate::core::store::swap::SwapSettings;
use crate::core::store::QueueProperties;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Cache,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueuesConfig {
    pub max_entries: u64,
    pub max_bytes: u64,
    pub max_entries_cache: u64,
    pub max_bytes_cache: u64,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        let props = QueueProperties::default();
        Self {
            max_entries: props.max_entries,
            max_bytes: props.max_bytes,
            max_entries_cache: props.max_entries_cache,
            max_bytes_cache: props.max_bytes_cache,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SwapConfig {
    pub directory: String,
    pub blob_threshold_bytes: u64,
    pub sync_on_write: bool,
    pub compact_min_bytes: u64,
}

impl Default for SwapConfig {
    fn default() -> Self {
        let settings = SwapSettings::default();
        Self {
            directory: "./swap".to_string(),
            blob_threshold_bytes: settings.blob_threshold_bytes,
            sync_on_write: settings.sync_on_write,
            compact_min_bytes: settings.compact_min_bytes,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BlockingConfig {
    /// Polling safety net of the blocking accessor, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub queues: QueuesConfig,
    pub swap: SwapConfig,
    pub blocking: BlockingConfig,
}

impl Config {
    pub fn queue_properties(&self) -> QueueProperties {
        QueueProperties {
            max_entries: self.queues.max_entries,
            max_bytes: self.queues.max_bytes,
            max_entries_cache: self.queues.max_entries_cache,
            max_bytes_cache: self.queues.max_bytes_cache,
        }
    }

    pub fn swap_settings(&self) -> SwapSettings {
        SwapSettings {
            blob_threshold_bytes: self.swap.blob_threshold_bytes,
            sync_on_write: self.swap.sync_on_write,
            compact_min_bytes: self.swap.compact_min_bytes,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, anyhow::Error> {
    let raw: String = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&raw)?;
    Ok(config)
}
