//! Storage subsystem for docwarden
//!
//! The write pipeline consumes storage through the `StorageEngine` trait:
//! index maintenance, count/find queries, and the final write calls. The
//! in-memory `MemoryEngine` is the reference implementation; it enforces
//! unique indexes and reports violations through the duplicate-key error
//! contract the collection layer translates at the storage boundary.

mod engine;
mod errors;
mod matcher;
mod memory;
mod modifier;

pub use engine::{IndexRequest, StorageEngine, UpdateOptions, UpdateOutcome};
pub use errors::{StorageError, StorageResult};
pub use matcher::{equality_fields, matches, resolve_path, values_equal};
pub use memory::MemoryEngine;
pub use modifier::{apply, build_upsert_document, set_path};
