//! Write validation pipeline
//!
//! The orchestration that runs between a write entry point and the
//! storage engine: argument checks, cleaning, snapshot construction,
//! validation, and failure delivery. Each pass builds its own
//! per-call state; nothing is stashed on the collection between calls,
//! so concurrent writes against one handle stay independent.

use serde_json::{Map, Value};

use super::collection::Collection;
use super::errors::{ValidationFailure, WriteError, WriteResult};
use super::options::{CompletionHandler, InsertRequest, UpdateRequest, WriteOptions};
use super::registry::AttachedSchema;
use crate::observe::Logger;
use crate::schema::{CleanOptions, OperationContext, OperationKind, ValidateOptions};
use crate::storage::{equality_fields, UpdateOptions};

/// Outcome of a validation pass.
pub(crate) enum Validated<T> {
    /// Forward the cleaned payload to the storage engine.
    Proceed {
        payload: T,
        on_complete: Option<CompletionHandler>,
        /// Validation context findings are recorded under
        context_name: String,
        /// Whether the call is server-internal
        trusted: bool,
        /// Whether duplicate-key errors should be translated
        translate: bool,
    },
    /// A validation failure was already delivered to the completion
    /// handler (or logged for a client call without one).
    Handled,
}

/// Deliver a validation failure per the callback contract: through the
/// handler when one exists, as a synchronous error for trusted callers
/// without one, and as a logged diagnostic for client callers without one
/// (clients cannot catch a thrown error).
fn deliver_failure<T>(
    failure: ValidationFailure,
    on_complete: Option<CompletionHandler>,
    trusted: bool,
    operation: OperationKind,
) -> WriteResult<Validated<T>> {
    match on_complete {
        Some(handler) => {
            handler(Err(WriteError::Validation(failure)));
            Ok(Validated::Handled)
        }
        None if trusted => Err(WriteError::Validation(failure)),
        None => {
            Logger::error(
                "client_write_rejected",
                &[
                    ("operation", operation.name()),
                    ("context", failure.context.as_str()),
                    ("message", failure.message.as_str()),
                ],
            );
            Ok(Validated::Handled)
        }
    }
}

impl Collection {
    /// Validate an insert request, returning the cleaned document.
    pub(crate) fn validate_insert(
        &self,
        registry: &AttachedSchema,
        request: InsertRequest,
    ) -> WriteResult<Validated<Value>> {
        let InsertRequest {
            mut document,
            options,
            on_complete,
        } = request;

        if document.is_null() {
            return Err(WriteError::Usage("insert requires a document".into()));
        }
        if !document.is_object() {
            return Err(WriteError::Usage("insert document must be an object".into()));
        }

        if !options.validate {
            return Ok(Validated::Proceed {
                payload: document,
                on_complete,
                context_name: options.context_name().to_string(),
                trusted: options.trusted,
                translate: false,
            });
        }

        let context = operation_context(OperationKind::Insert, &options);
        let context_name = options.context_name().to_string();

        // `_id` is never submitted to validation unless the schema
        // declares it.
        let detached_id = detach_id(registry, &mut document);

        registry.clean(
            &mut document,
            &CleanOptions {
                is_modifier: false,
                filter: true,
                auto_convert: true,
                get_auto_values: options.get_auto_values && options.trusted,
                context: &context,
            },
        );

        let mut snapshot = document.clone();
        if !options.trusted {
            // Compute types and auto-values for validation only; the
            // authoritative values never come from the client.
            registry.clean(
                &mut snapshot,
                &CleanOptions {
                    is_modifier: false,
                    filter: false,
                    auto_convert: true,
                    get_auto_values: true,
                    context: &context,
                },
            );
        }

        let (valid, invalid_keys) = registry.validate(
            &context_name,
            &snapshot,
            &ValidateOptions {
                modifier: false,
                upsert: false,
                operation: &context,
                selector: None,
            },
        );

        if !valid {
            return deliver_failure(
                ValidationFailure::new(context_name, invalid_keys),
                on_complete,
                options.trusted,
                OperationKind::Insert,
            );
        }

        restore_id(&mut document, detached_id);
        Ok(Validated::Proceed {
            payload: document,
            on_complete,
            context_name,
            trusted: options.trusted,
            translate: true,
        })
    }

    /// Validate an update/upsert request, returning cleaned arguments.
    pub(crate) fn validate_update(
        &self,
        registry: &AttachedSchema,
        kind: OperationKind,
        request: UpdateRequest,
    ) -> WriteResult<Validated<(Value, Value, UpdateOptions)>> {
        let UpdateRequest {
            selector,
            mut modifier,
            options,
            on_complete,
        } = request;

        if selector.is_null() {
            return Err(WriteError::Usage("update requires a selector".into()));
        }
        if !modifier.is_object() || modifier.as_object().map_or(true, Map::is_empty) {
            return Err(WriteError::Usage(
                "update requires a non-empty modifier".into(),
            ));
        }

        let is_upsert = kind == OperationKind::Upsert || options.upsert;
        let update_options = UpdateOptions {
            multi: options.multi,
            upsert: is_upsert,
        };

        if !options.validate {
            return Ok(Validated::Proceed {
                payload: (selector, modifier, update_options),
                on_complete,
                context_name: options.context_name().to_string(),
                trusted: options.trusted,
                translate: false,
            });
        }

        let effective_kind = if is_upsert {
            OperationKind::Upsert
        } else {
            OperationKind::Update
        };
        let context = operation_context(effective_kind, &options);
        let context_name = options.context_name().to_string();

        registry.clean(
            &mut modifier,
            &CleanOptions {
                is_modifier: true,
                filter: true,
                auto_convert: true,
                get_auto_values: options.get_auto_values && options.trusted,
                context: &context,
            },
        );

        let mut snapshot = modifier.clone();
        if options.trusted && is_upsert {
            // Selector fields land in the stored document when the upsert
            // takes its insert branch, so they must be validated too.
            merge_selector_into_set(registry, &selector, &mut snapshot);
        }
        if !options.trusted {
            registry.clean(
                &mut snapshot,
                &CleanOptions {
                    is_modifier: true,
                    filter: false,
                    auto_convert: true,
                    get_auto_values: true,
                    context: &context,
                },
            );
        }

        // The selector is handed to this one pass and dropped with it.
        let (valid, invalid_keys) = registry.validate(
            &context_name,
            &snapshot,
            &ValidateOptions {
                modifier: true,
                upsert: is_upsert,
                operation: &context,
                selector: Some(&selector),
            },
        );

        if !valid {
            return deliver_failure(
                ValidationFailure::new(context_name, invalid_keys),
                on_complete,
                options.trusted,
                effective_kind,
            );
        }

        Ok(Validated::Proceed {
            payload: (selector, modifier, update_options),
            on_complete,
            context_name,
            trusted: options.trusted,
            translate: true,
        })
    }
}

fn operation_context(kind: OperationKind, options: &WriteOptions) -> OperationContext {
    OperationContext {
        kind,
        trusted: options.trusted,
        user_id: options.user_id.clone(),
    }
}

fn detach_id(registry: &AttachedSchema, document: &mut Value) -> Option<Value> {
    if registry.allows_key("_id") {
        return None;
    }
    document.as_object_mut().and_then(|obj| obj.remove("_id"))
}

fn restore_id(document: &mut Value, id: Option<Value>) {
    if let (Some(obj), Some(id)) = (document.as_object_mut(), id) {
        obj.insert("_id".to_string(), id);
    }
}

/// Merge the selector's equality fields into the snapshot's `$set`;
/// existing `$set` entries win on key collision.
fn merge_selector_into_set(registry: &AttachedSchema, selector: &Value, snapshot: &mut Value) {
    let fields = equality_fields(selector);
    if fields.is_empty() {
        return;
    }
    let Some(ops) = snapshot.as_object_mut() else {
        return;
    };
    let set = ops
        .entry("$set".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(set_obj) = set.as_object_mut() else {
        return;
    };
    for (path, value) in fields {
        // `_id` stays out of validation unless declared.
        if path == "_id" && !registry.allows_key("_id") {
            continue;
        }
        if !set_obj.contains_key(&path) {
            set_obj.insert(path, value);
        }
    }
}
