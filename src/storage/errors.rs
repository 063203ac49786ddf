//! Storage error types

use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors surfaced by a storage engine
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// A uniqueness constraint was violated at write time.
    ///
    /// The message follows the engine's native format and references the
    /// violated index by name; the collection layer parses field names
    /// back out of it.
    #[error("{message}")]
    DuplicateKey {
        /// Engine-native error message
        message: String,
    },

    /// Index does not exist
    #[error("index '{0}' not found")]
    IndexNotFound(String),

    /// Modifier uses an operator the engine does not implement
    #[error("unsupported modifier operator '{0}'")]
    UnsupportedOperator(String),

    /// Modifier is structurally invalid
    #[error("invalid modifier: {0}")]
    InvalidModifier(String),

    /// Catch-all engine failure
    #[error("storage engine failure: {0}")]
    Engine(String),
}

impl StorageError {
    /// Whether this error reports a duplicate-key constraint violation.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StorageError::DuplicateKey { .. })
    }
}
