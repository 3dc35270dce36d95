use std::sync::Arc;

use stashmq::core::entry::{Priority, QueueEntry};

/// Entry with an explicit identity and logical size, the building block of
/// most store tests.
pub fn entry(identity: u64, priority: u8, size: u64, persistent: bool) -> Arc<QueueEntry> {
    Arc::new(QueueEntry::with_size(
        identity,
        Priority::new(priority).unwrap(),
        size,
        format!("payload-{identity}"),
        persistent,
    ))
}

/// Normal-priority transient entry of 100 logical bytes.
pub fn norm(identity: u64) -> Arc<QueueEntry> {
    entry(identity, 5, 100, false)
}

pub fn identities(entries: &[Arc<QueueEntry>]) -> Vec<u64> {
    entries.iter().map(|e| e.identity()).collect()
}
