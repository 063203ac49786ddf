//! Schema error types
//!
//! Two families live here:
//! - `SchemaError`: definition-time failures (malformed definition,
//!   structural problems). These abort schema attachment.
//! - `InvalidKey` / `ErrorKind`: per-field validation findings collected
//!   during a validation pass. These never abort anything by themselves;
//!   the write pipeline decides how to deliver them.

use std::fmt;

use serde_json::Value;

/// Validation error kinds with stable wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Required field missing or null
    Required,
    /// Value does not match the declared field type
    ExpectedType,
    /// Key is not declared in the schema
    NotAllowed,
    /// Field carries `deny_insert` and appeared in an insert
    InsertNotAllowed,
    /// Field carries `deny_update` and appeared in an update modifier
    UpdateNotAllowed,
    /// Field carries `unique` and the value is already taken
    NotUnique,
}

impl ErrorKind {
    /// Returns the wire code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Required => "required",
            ErrorKind::ExpectedType => "expectedType",
            ErrorKind::NotAllowed => "notAllowed",
            ErrorKind::InsertNotAllowed => "insertNotAllowed",
            ErrorKind::UpdateNotAllowed => "updateNotAllowed",
            ErrorKind::NotUnique => "notUnique",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One invalid-key record produced by a validation pass.
#[derive(Debug, Clone)]
pub struct InvalidKey {
    /// Field path (e.g. `address.city`)
    pub name: String,
    /// What went wrong
    pub kind: ErrorKind,
    /// The offending value, when one was present
    pub value: Option<Value>,
    /// Rendered human-readable message
    pub message: String,
}

impl fmt::Display for InvalidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.name, self.kind, self.message)
    }
}

/// Definition-time schema errors.
#[derive(Debug)]
pub struct SchemaError {
    message: String,
}

impl SchemaError {
    /// Create an error for a malformed schema definition.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self {
            message: format!("malformed schema definition: {}", reason.into()),
        }
    }

    /// Create an error for a structurally invalid schema.
    pub fn structure(reason: impl Into<String>) -> Self {
        Self {
            message: format!("invalid schema structure: {}", reason.into()),
        }
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SchemaError {}

/// Result type for schema definition operations.
pub type SchemaResult<T> = Result<T, SchemaError>;
