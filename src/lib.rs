//! StashMQ – the storage engine of a message broker, written in Rust.
//!
//! This crate exports
//!  * `core`    – entries, ordering, queue stores (ram / swap / cache)
//!  * `config`  – TOML-driven runtime configuration
//!  * `logging` – tracing subscriber setup
//!
//! The surrounding broker embeds it as a library: producers `put` entries
//! into a [`crate::core::store::QueueStore`], consumers drain them in
//! priority order with the `peek`/`take` family, optionally waiting for
//! arrivals through a [`crate::core::blocking::BlockingAccessor`].

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod config;
pub mod core;
pub mod logging;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use crate::config::{load_config, Config};
pub use crate::core::blocking::BlockingAccessor;
pub use crate::core::entry::{Priority, QueueEntry};
pub use crate::core::error::{StoreError, StoreResult};
pub use crate::core::store::{
    cache::CacheStore, pool::SwapPool, ram::RamStore, registry::StoreRegistry, swap::SwapStore,
    QueueProperties, QueueStore, Relating, StorageId,
};
