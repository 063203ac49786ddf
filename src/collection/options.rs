//! Write call inputs
//!
//! One explicit request struct per operation with defined-default options,
//! resolved once at the entry point. The completion handler slot is part
//! of the request, so there is no positional-argument ambiguity between
//! options and callbacks.

use serde_json::Value;

use super::errors::WriteError;
use crate::storage::UpdateOutcome;

/// Name of the validation context used when none is requested.
pub const DEFAULT_CONTEXT: &str = "default";

/// Result delivered to a completion handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// An insert completed with this identifier
    Inserted {
        /// Identifier of the stored document
        id: String,
        /// The document as persisted, after cleaning and auto-values
        document: Value,
    },
    /// An update/upsert completed
    Updated(UpdateOutcome),
}

/// Completion handler invoked exactly once with the write's outcome.
pub type CompletionHandler = Box<dyn FnOnce(Result<WriteOutcome, WriteError>) + Send>;

/// Options accepted by every write entry point.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Run the validation pipeline (default `true`)
    pub validate: bool,
    /// Record findings under this named validation context
    pub validation_context: Option<String>,
    /// Take the upsert path when nothing matches
    pub upsert: bool,
    /// Update every matched document instead of the first
    pub multi: bool,
    /// Compute auto-values during cleaning (default `true`)
    pub get_auto_values: bool,
    /// Server-internal call (`true`) vs client-originated (`false`)
    pub trusted: bool,
    /// Acting user, when one is known
    pub user_id: Option<String>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            validate: true,
            validation_context: None,
            upsert: false,
            multi: false,
            get_auto_values: true,
            trusted: true,
            user_id: None,
        }
    }
}

impl WriteOptions {
    /// Options for a client-originated call.
    pub fn untrusted(user_id: Option<String>) -> Self {
        Self {
            trusted: false,
            user_id,
            ..Self::default()
        }
    }

    /// Skip the validation pipeline entirely.
    pub fn skip_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    /// Record findings under a named validation context.
    pub fn context(mut self, name: impl Into<String>) -> Self {
        self.validation_context = Some(name.into());
        self
    }

    /// Resolved validation context name.
    pub fn context_name(&self) -> &str {
        self.validation_context.as_deref().unwrap_or(DEFAULT_CONTEXT)
    }
}

/// Input to an insert call.
pub struct InsertRequest {
    /// The document to store
    pub document: Value,
    /// Write options
    pub options: WriteOptions,
    /// Optional completion handler
    pub on_complete: Option<CompletionHandler>,
}

impl InsertRequest {
    pub fn new(document: Value) -> Self {
        Self {
            document,
            options: WriteOptions::default(),
            on_complete: None,
        }
    }

    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach a completion handler.
    pub fn on_complete<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(Result<WriteOutcome, WriteError>) + Send + 'static,
    {
        self.on_complete = Some(Box::new(handler));
        self
    }
}

/// Input to an update or upsert call.
pub struct UpdateRequest {
    /// Selector choosing the documents to update
    pub selector: Value,
    /// Update modifier (`$set`-style operators)
    pub modifier: Value,
    /// Write options
    pub options: WriteOptions,
    /// Optional completion handler
    pub on_complete: Option<CompletionHandler>,
}

impl UpdateRequest {
    pub fn new(selector: Value, modifier: Value) -> Self {
        Self {
            selector,
            modifier,
            options: WriteOptions::default(),
            on_complete: None,
        }
    }

    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach a completion handler.
    pub fn on_complete<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(Result<WriteOutcome, WriteError>) + Send + 'static,
    {
        self.on_complete = Some(Box::new(handler));
        self
    }
}
