//! Observability subsystem for docwarden
//!
//! Structured, synchronous logging used by the write pipeline for
//! diagnostics that must not turn into panics: index setup outcomes,
//! client-side validation failures without a completion handler, and
//! storage-boundary translation fallthroughs.

mod logger;

pub use logger::{Logger, Severity};
