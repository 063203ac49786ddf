//! Storage engine capability
//!
//! The write pipeline talks to storage exclusively through this trait:
//! index maintenance, count/find queries for uniqueness checks, and the
//! final insert/update calls. Implementations decide durability; the
//! pipeline only assumes the duplicate-key error contract from
//! `StorageError::DuplicateKey`.

use serde_json::Value;

use super::errors::StorageResult;

/// Request to create (or verify) an index.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    /// Index name; the collection layer derives it from the field name
    pub name: String,
    /// Indexed field (dotted paths allowed)
    pub field: String,
    /// Enforce uniqueness
    pub unique: bool,
    /// Skip documents missing the field
    pub sparse: bool,
    /// Build without blocking writes
    pub background: bool,
    /// Engine-specific index kind (e.g. "text"), when not a plain ordering
    pub kind: Option<String>,
}

/// Options for an update call.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Apply to every matched document instead of the first
    pub multi: bool,
    /// Insert a document when nothing matches
    pub upsert: bool,
}

/// Result of an update call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Documents matched by the selector
    pub matched: u64,
    /// Documents actually modified
    pub modified: u64,
    /// Identifier of the document inserted by an upsert, if any
    pub upserted_id: Option<String>,
}

/// The storage capability consumed by the write pipeline.
pub trait StorageEngine: Send + Sync {
    /// Idempotently create an index.
    fn ensure_index(&self, collection: &str, request: IndexRequest) -> StorageResult<()>;

    /// Drop an index by name. Returns `IndexNotFound` when absent.
    fn drop_index(&self, collection: &str, name: &str) -> StorageResult<()>;

    /// Count documents matching the selector.
    fn count(&self, collection: &str, selector: &Value) -> StorageResult<u64>;

    /// Fetch the first document matching the selector.
    fn find_one(&self, collection: &str, selector: &Value) -> StorageResult<Option<Value>>;

    /// Fetch all documents matching the selector, in identifier order.
    fn find(&self, collection: &str, selector: &Value) -> StorageResult<Vec<Value>>;

    /// Insert a document, returning its identifier.
    fn insert(&self, collection: &str, document: Value) -> StorageResult<String>;

    /// Apply a modifier to matching documents.
    fn update(
        &self,
        collection: &str,
        selector: &Value,
        modifier: &Value,
        options: &UpdateOptions,
    ) -> StorageResult<UpdateOutcome>;
}
