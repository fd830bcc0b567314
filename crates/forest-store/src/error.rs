use std::path::PathBuf;

use thiserror::Error;

use crate::lock::LockError;

/// Errors surfaced by [`crate::DocumentStore`] operations.
///
/// I/O and lock failures are always returned to the caller and never
/// retried here. Structural problems inside HTA trees are not errors at
/// all: they are repaired by [`crate::validate`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("malformed document at {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("document already exists at {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("invalid {kind} {value:?} (must be non-empty and contain no path separators)")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("background write task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Returns `true` for lock timeouts, which callers may retry.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::Lock(LockError::Timeout { .. }))
    }

    /// Returns `true` when a file exists but is not valid JSON.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}
