//! Per-call contexts
//!
//! `OperationContext` is the ephemeral value describing one write call; it
//! travels through cleaning, auto-value computation, and validation and is
//! discarded afterwards. Nothing here is ever stored on shared state, so
//! concurrent calls against one collection stay independent.
//!
//! `ValidationContext` holds the invalid-key findings of the most recent
//! validation pass under a caller-chosen name, so callers can inspect
//! errors after an asynchronous completion.

use std::fmt;

use serde_json::Value;

use super::errors::{ErrorKind, InvalidKey};
use super::messages::message_for;

/// The kind of write operation being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Insert,
    Update,
    Upsert,
}

impl OperationKind {
    /// Operation name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Upsert => "upsert",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Ephemeral context for one write operation.
///
/// Created per call by the write interceptor and handed by reference to
/// cleaning, auto-value functions, and field rules.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// What the caller asked for
    pub kind: OperationKind,
    /// Server-internal call (`true`) vs client-originated (`false`)
    pub trusted: bool,
    /// Acting user, when one is known
    pub user_id: Option<String>,
}

impl OperationContext {
    /// Context for a trusted, server-internal call.
    pub fn trusted(kind: OperationKind) -> Self {
        Self {
            kind,
            trusted: true,
            user_id: None,
        }
    }

    /// Context for a client-originated call.
    pub fn untrusted(kind: OperationKind, user_id: Option<String>) -> Self {
        Self {
            kind,
            trusted: false,
            user_id,
        }
    }

    /// Attach an acting user id.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn is_insert(&self) -> bool {
        self.kind == OperationKind::Insert
    }

    pub fn is_update(&self) -> bool {
        self.kind == OperationKind::Update
    }

    pub fn is_upsert(&self) -> bool {
        self.kind == OperationKind::Upsert
    }

    /// Acting user id, if known.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

/// Context handed to auto-value functions.
#[derive(Debug)]
pub struct AutoValueInput<'a> {
    /// Field the auto-value is declared on
    pub field_name: &'a str,
    /// Value currently present for the field, if any
    pub value: Option<&'a Value>,
    /// Whether the caller supplied a value for the field
    pub is_set: bool,
    /// Whether cleaning runs in modifier mode
    pub is_modifier: bool,
    /// The enclosing write operation
    pub operation: &'a OperationContext,
}

/// Directive returned by an auto-value function.
#[derive(Debug, Clone)]
pub enum AutoValue {
    /// Inject this value (document mode) or `$set` it (modifier mode)
    Set(Value),
    /// Remove the field (document mode) or `$unset` it (modifier mode)
    Unset,
    /// Leave the field exactly as submitted
    Keep,
}

/// A named collection of invalid-key findings.
///
/// One validation pass resets and repopulates the context; the storage
/// boundary may append translated findings afterwards.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    invalid: Vec<InvalidKey>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all findings, ready for a fresh pass.
    pub fn reset(&mut self) {
        self.invalid.clear();
    }

    /// Record a finding with a rendered message.
    pub fn add(&mut self, kind: ErrorKind, name: impl Into<String>, label: &str, value: Option<Value>) {
        let name = name.into();
        let message = message_for(kind, label);
        self.invalid.push(InvalidKey {
            name,
            kind,
            value,
            message,
        });
    }

    /// Record a pre-built finding.
    pub fn add_invalid_key(&mut self, key: InvalidKey) {
        self.invalid.push(key);
    }

    /// Whether the last pass found nothing.
    pub fn is_valid(&self) -> bool {
        self.invalid.is_empty()
    }

    /// The ordered findings of the last pass.
    pub fn invalid_keys(&self) -> &[InvalidKey] {
        &self.invalid
    }

    /// Message for the first finding on the given field, if any.
    pub fn key_error_message(&self, field: &str) -> Option<&str> {
        self.invalid
            .iter()
            .find(|k| k.name == field)
            .map(|k| k.message.as_str())
    }
}
