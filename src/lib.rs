//! docwarden - schema-enforced writes for document collections
//!
//! Wraps a storage engine's insert/update/upsert behind a validating
//! pipeline: field cleaning, type coercion, auto-values, field policy,
//! and uniqueness enforcement, with storage-level duplicate-key errors
//! translated back into structured validation failures.

pub mod collection;
pub mod guards;
pub mod observe;
pub mod schema;
pub mod storage;

pub use collection::{
    AttachedSchema, Collection, CollectionConfig, InsertRequest, UpdateRequest, ValidationFailure,
    WriteError, WriteOptions, WriteOutcome, WriteResult,
};
pub use schema::{AutoValue, FieldDef, FieldType, IndexSpec, Schema};
pub use storage::{MemoryEngine, StorageEngine, UpdateOutcome};
