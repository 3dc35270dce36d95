use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Which capacity bound a rejected `put` ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowKind {
    Entries,
    Bytes,
}

impl std::fmt::Display for OverflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowKind::Entries => write!(f, "entries"),
            OverflowKind::Bytes => write!(f, "bytes"),
        }
    }
}

/// Error taxonomy of the storage engine.
///
/// Callers are expected to branch on the variant: `Overflow` means the queue
/// is full (retry after it drains, or shed load), `Unavailable` means the
/// swap tier is broken, and `Unsupported` is a non-fatal "feature absent"
/// signal for read shapes a given backing realization does not offer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("queue overflow on {queue}: {kind} limit of {max} is exhausted")]
    Overflow {
        queue: String,
        kind: OverflowKind,
        max: u64,
    },

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("swap store unavailable: {0}")]
    Unavailable(String),

    #[error("queue is shut down")]
    Shutdown,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("corrupt journal record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_overflow(&self) -> bool {
        matches!(self, StoreError::Overflow { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}
