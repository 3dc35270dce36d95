//! Entry identity generation.
//!
//! Identities are 64-bit values derived from the millisecond clock scaled
//! by one million, plus a per-process tie-breaking counter that is rewound
//! on every millisecond step. The result is strictly increasing within a
//! process even under concurrent inserts, so it doubles as the insertion
//! order of entries sharing a priority.
//!
//! The generator is injected into entry construction rather than hidden
//! behind a static, which keeps tests deterministic; `global()` provides
//! the process-wide default used by production call sites.

use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Tie-break slots available per millisecond.
const TIES_PER_MILLI: u64 = 1_000_000;

#[derive(Debug, Default)]
struct IdState {
    last_millis: u64,
    counter: u64,
}

#[derive(Debug, Default)]
pub struct IdentityGenerator {
    state: Mutex<IdState>,
}

impl IdentityGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next identity, strictly greater than any previously
    /// returned by this generator. A clock that stalls or jumps backwards
    /// is absorbed by the tie-break counter.
    pub fn next_id(&self) -> u64 {
        let now_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let mut state = self.state.lock();
        if now_millis > state.last_millis {
            state.last_millis = now_millis;
            state.counter = 0;
        } else {
            state.counter += 1;
            if state.counter >= TIES_PER_MILLI {
                // More than a million ids in one millisecond, or a clock
                // stuck in the past for that long. Move to the next slot.
                state.last_millis += 1;
                state.counter = 0;
            }
        }
        state.last_millis * TIES_PER_MILLI + state.counter
    }
}

static GLOBAL: Lazy<IdentityGenerator> = Lazy::new(IdentityGenerator::new);

/// Process-wide default generator.
pub fn global() -> &'static IdentityGenerator {
    &GLOBAL
}
