//! Write-path error types
//!
//! Taxonomy:
//! - usage errors: malformed calls, always synchronous, never routed
//!   through a completion handler;
//! - validation failures: invalid-key lists, delivered through the
//!   completion handler when one exists;
//! - storage errors: passed through unchanged when they cannot be
//!   translated into a validation failure.

use std::fmt;

use thiserror::Error;

use crate::schema::{InvalidKey, SchemaError};
use crate::storage::StorageError;

/// Result type for write operations
pub type WriteResult<T> = Result<T, WriteError>;

/// Errors surfaced by the validating write path
#[derive(Debug, Error)]
pub enum WriteError {
    /// Malformed call (missing arguments, wrong shapes)
    #[error("invalid write call: {0}")]
    Usage(String),

    /// The document or modifier failed validation
    #[error("{0}")]
    Validation(ValidationFailure),

    /// A client-originated write was rejected by the guard chain
    #[error("write not permitted: {0}")]
    NotPermitted(String),

    /// A schema is already attached to the collection
    #[error("a schema is already attached to collection '{0}'")]
    SchemaAttached(String),

    /// Schema definition problem during attachment
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Untranslatable storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl WriteError {
    /// The validation failure, when this error carries one.
    pub fn validation(&self) -> Option<&ValidationFailure> {
        match self {
            WriteError::Validation(failure) => Some(failure),
            _ => None,
        }
    }
}

/// A failed validation pass: the ordered invalid keys plus a message
/// naming the first offending field.
#[derive(Debug, Clone)]
pub struct ValidationFailure {
    /// Validation context the findings were recorded under
    pub context: String,
    /// Ordered invalid-key records
    pub invalid_keys: Vec<InvalidKey>,
    /// Human-readable summary
    pub message: String,
}

impl ValidationFailure {
    /// Build a failure from the findings of one pass.
    pub fn new(context: impl Into<String>, invalid_keys: Vec<InvalidKey>) -> Self {
        let message = invalid_keys
            .first()
            .map(|key| key.message.clone())
            .unwrap_or_else(|| "validation failed".to_string());
        Self {
            context: context.into(),
            invalid_keys,
            message,
        }
    }

    /// The first offending field, when known.
    pub fn first_field(&self) -> Option<&str> {
        self.invalid_keys.first().map(|key| key.name.as_str())
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if self.invalid_keys.len() > 1 {
            write!(f, " (and {} more)", self.invalid_keys.len() - 1)?;
        }
        Ok(())
    }
}
