//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The handle does not refer to the current pending shadow
    ///
    /// A later `shadow_write` superseded it, or it was already committed
    /// or discarded. Committing through a stale handle could resurrect an
    /// old document, so it is refused.
    #[error("stale shadow handle {token}")]
    StaleShadow {
        /// Token of the rejected handle
        token: u64,
    },

    /// No shadow copy is pending at all
    #[error("no pending shadow")]
    NoPendingShadow,

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, rename, fsync)
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
