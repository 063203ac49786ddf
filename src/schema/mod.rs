//! Schema subsystem for docwarden
//!
//! A schema declares, per field: type, optionality, display label, index
//! spec, uniqueness, insert/update policy flags, and an optional auto-value
//! function. The subsystem exposes the three operations the write pipeline
//! is built on:
//!
//! - field-definition lookup (`Schema::field_definition`, `allows_key`),
//! - cleaning (`clean`): filter, coerce, inject auto-values,
//! - validation (`validate`): collect invalid keys into a named
//!   `ValidationContext`, extended by custom `FieldRule`s.
//!
//! Schemas are immutable after construction and never touch storage; the
//! collection layer wires rules that do.

mod clean;
mod context;
mod definition;
mod errors;
mod messages;
mod types;
mod validate;

pub use clean::{clean, CleanOptions};
pub use context::{
    AutoValue, AutoValueInput, OperationContext, OperationKind, ValidationContext,
};
pub use errors::{ErrorKind, InvalidKey, SchemaError, SchemaResult};
pub use messages::{humanize, message_for};
pub use types::{AutoValueFn, FieldDef, FieldType, IndexSpec, Schema, SchemaBuilder};
pub use validate::{validate, FieldRule, RuleContext, RuleField, ValidateOptions};
