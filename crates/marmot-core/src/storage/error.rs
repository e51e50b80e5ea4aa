//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Returns true if retrying the operation may succeed.
    ///
    /// Serialization failures are deterministic. I/O failures may clear up.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
