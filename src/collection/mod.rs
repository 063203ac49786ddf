//! Collection subsystem for docwarden
//!
//! The write interceptor and its orchestration: request structs with
//! defined defaults, the per-call validation pipeline, field policy and
//! uniqueness rules, and the storage-boundary duplicate-key translator.
//!
//! Control flow for a validated write:
//! entry point -> validation pipeline (clean -> snapshot -> validate,
//! consulting the uniqueness rule) -> forward cleaned arguments to the
//! engine -> translate duplicate-key failures back into structured
//! validation errors.

#[allow(clippy::module_inception)]
mod collection;
mod errors;
mod options;
mod pipeline;
mod policy;
mod registry;
mod unique;

pub use collection::{Collection, CollectionConfig, SchemaSpec, VirtualFieldFn};
pub use errors::{ValidationFailure, WriteError, WriteResult};
pub use options::{
    CompletionHandler, InsertRequest, UpdateRequest, WriteOptions, WriteOutcome, DEFAULT_CONTEXT,
};
pub use policy::{DenyInsertRule, DenyUpdateRule};
pub use registry::AttachedSchema;
pub use unique::{duplicate_field_name, index_name_for, UniqueRule, INDEX_NAME_PREFIX};
