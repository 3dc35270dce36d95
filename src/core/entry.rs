//! Queue entries and their total order.
//!
//! An entry is an immutable unit of buffered work: a globally ordered
//! identity, a delivery priority, a logical size and the payload itself.
//! Entries are compared by priority descending, then identity ascending.
//! The head of a queue is the highest-priority, oldest entry, the tail is
//! the lowest-priority, newest one.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::error::{StoreError, StoreResult};
use crate::core::identity::IdentityGenerator;

/// Estimated per-entry bookkeeping overhead, counted on top of the payload
/// length when the logical size is derived from the payload.
pub const ENTRY_OVERHEAD_BYTES: u64 = 176;

/// Delivery priority, 0 (lowest) to 9 (highest).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const NORM: Priority = Priority(5);
    pub const MAX: Priority = Priority(9);

    pub fn new(value: u8) -> StoreResult<Self> {
        if value > Self::MAX.0 {
            return Err(StoreError::InvalidArgument(format!(
                "priority {value} out of range 0..=9"
            )));
        }
        Ok(Priority(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sort key of an entry. Comparing the two longs directly is cheaper than
/// a compound string key and is what every ordered container in the crate
/// keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub priority: Priority,
    pub identity: u64,
}

impl Ord for EntryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.identity.cmp(&other.identity))
    }
}

impl PartialOrd for EntryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An immutable queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    identity: u64,
    priority: Priority,
    size_bytes: u64,
    persistent: bool,
    payload: Bytes,
}

impl QueueEntry {
    /// Creates an entry with a fresh identity drawn from `generator`.
    pub fn create(
        generator: &IdentityGenerator,
        priority: Priority,
        payload: impl Into<Bytes>,
        persistent: bool,
    ) -> Self {
        let payload = payload.into();
        Self {
            identity: generator.next_id(),
            priority,
            size_bytes: payload.len() as u64 + ENTRY_OVERHEAD_BYTES,
            persistent,
            payload,
        }
    }

    /// Creates an entry with an explicit identity, e.g. when rebuilding
    /// from the swap journal.
    pub fn with_identity(
        identity: u64,
        priority: Priority,
        payload: impl Into<Bytes>,
        persistent: bool,
    ) -> Self {
        let payload = payload.into();
        Self {
            identity,
            priority,
            size_bytes: payload.len() as u64 + ENTRY_OVERHEAD_BYTES,
            persistent,
            payload,
        }
    }

    /// Creates an entry with an explicit logical size, overriding the
    /// payload-derived estimate. The byte-budget rules of the peek/take
    /// family account with this value.
    pub fn with_size(
        identity: u64,
        priority: Priority,
        size_bytes: u64,
        payload: impl Into<Bytes>,
        persistent: bool,
    ) -> Self {
        Self {
            identity,
            priority,
            size_bytes,
            persistent,
            payload: payload.into(),
        }
    }

    pub fn identity(&self) -> u64 {
        self.identity
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn key(&self) -> EntryKey {
        EntryKey {
            priority: self.priority,
            identity: self.identity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(priority: u8, identity: u64) -> EntryKey {
        EntryKey {
            priority: Priority::new(priority).unwrap(),
            identity,
        }
    }

    #[test]
    fn higher_priority_sorts_first() {
        assert!(key(9, 100) < key(5, 1));
        assert!(key(0, 1) > key(5, 100));
    }

    #[test]
    fn same_priority_sorts_by_identity() {
        assert!(key(5, 1) < key(5, 2));
        assert_eq!(key(5, 7), key(5, 7));
    }

    #[test]
    fn priority_range_is_enforced() {
        assert!(Priority::new(10).is_err());
        assert_eq!(Priority::new(9).unwrap(), Priority::MAX);
    }

    #[test]
    fn size_includes_overhead() {
        let entry = QueueEntry::with_identity(1, Priority::NORM, "hello", false);
        assert_eq!(entry.size_bytes(), 5 + ENTRY_OVERHEAD_BYTES);
    }
}
