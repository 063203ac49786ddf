//! Validating collection
//!
//! `Collection` wraps an injected storage engine behind the three write
//! entry points and applies the validation pipeline transparently: calls
//! against a collection without an attached schema pass straight through;
//! once a schema is attached, every insert/update/upsert is cleaned,
//! validated, and only then forwarded, with duplicate-key errors from the
//! engine translated back into structured validation failures.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;
use uuid::Uuid;

use super::errors::{WriteError, WriteResult};
use super::options::{
    CompletionHandler, InsertRequest, UpdateRequest, WriteOptions, WriteOutcome,
};
use super::pipeline::Validated;
use super::registry::AttachedSchema;
use super::policy::{DenyInsertRule, DenyUpdateRule};
use super::unique::{index_name_for, translate_duplicate_key, UniqueRule};
use crate::guards::{AllowGuard, DenyGuard, GuardContext, GuardOp, GuardSet};
use crate::observe::Logger;
use crate::schema::{
    CleanOptions, FieldRule, IndexSpec, OperationContext, OperationKind, Schema, ValidateOptions,
};
use crate::storage::{IndexRequest, StorageEngine, StorageError, UpdateOptions, UpdateOutcome};

/// A virtual field: a pure function of the document, materialized onto
/// documents delivered through the read-side transform.
pub type VirtualFieldFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Deployment configuration for a collection.
#[derive(Debug, Clone, Default)]
pub struct CollectionConfig {
    /// The deployment runs without access control; client writes are
    /// permitted without allow guards.
    pub insecure: bool,
}

/// A schema to attach: a ready instance or a raw JSON definition.
pub enum SchemaSpec {
    Instance(Schema),
    Definition(Value),
}

impl From<Schema> for SchemaSpec {
    fn from(schema: Schema) -> Self {
        SchemaSpec::Instance(schema)
    }
}

impl From<Value> for SchemaSpec {
    fn from(definition: Value) -> Self {
        SchemaSpec::Definition(definition)
    }
}

/// A document collection with an optional attached schema.
pub struct Collection {
    name: String,
    engine: Arc<dyn StorageEngine>,
    config: CollectionConfig,
    schema: OnceLock<Arc<AttachedSchema>>,
    virtual_fields: BTreeMap<String, VirtualFieldFn>,
    guards: Mutex<GuardSet>,
}

impl Collection {
    /// Create a collection handle over the given engine.
    pub fn new(name: impl Into<String>, engine: Arc<dyn StorageEngine>) -> Self {
        Self::with_config(name, engine, CollectionConfig::default())
    }

    /// Create a collection handle with deployment configuration.
    pub fn with_config(
        name: impl Into<String>,
        engine: Arc<dyn StorageEngine>,
        config: CollectionConfig,
    ) -> Self {
        Self {
            name: name.into(),
            engine,
            config,
            schema: OnceLock::new(),
            virtual_fields: BTreeMap::new(),
            guards: Mutex::new(GuardSet::new()),
        }
    }

    /// Create a collection with an embedded schema.
    pub fn with_schema(
        name: impl Into<String>,
        engine: Arc<dyn StorageEngine>,
        spec: impl Into<SchemaSpec>,
    ) -> WriteResult<Self> {
        let collection = Self::new(name, engine);
        collection.attach_schema(spec)?;
        Ok(collection)
    }

    /// Declare a virtual field, materialized by the read-side transform.
    pub fn virtual_field<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.virtual_fields.insert(name.into(), Arc::new(compute));
        self
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The attached schema registry, if any.
    pub fn schema(&self) -> Option<&AttachedSchema> {
        self.schema.get().map(Arc::as_ref)
    }

    /// Attach a schema. A schema can be attached exactly once.
    ///
    /// Side effects: index ensure/drop calls for every field with an index
    /// spec (failures are logged, never fatal: a collection is writable
    /// regardless of index outcome), registration of the uniqueness and
    /// field-policy rules, and installation of the client-write guards.
    pub fn attach_schema(&self, spec: impl Into<SchemaSpec>) -> WriteResult<()> {
        let schema = match spec.into() {
            SchemaSpec::Instance(schema) => schema,
            SchemaSpec::Definition(definition) => Schema::from_json(&definition)?,
        };

        let rules: Vec<Arc<dyn FieldRule>> = vec![
            Arc::new(DenyInsertRule),
            Arc::new(DenyUpdateRule),
            Arc::new(UniqueRule::new(self.engine.clone(), self.name.clone())),
        ];
        let registry = Arc::new(AttachedSchema::new(schema, rules));

        self.schema
            .set(registry.clone())
            .map_err(|_| WriteError::SchemaAttached(self.name.clone()))?;

        self.setup_indexes(&registry);
        self.install_guards(registry);
        Ok(())
    }

    fn setup_indexes(&self, registry: &AttachedSchema) {
        for (field, def) in registry.definition().field_definitions() {
            let Some(spec) = &def.index else {
                continue;
            };
            let index_name = index_name_for(field);

            match spec {
                IndexSpec::Disabled => match self.engine.drop_index(&self.name, &index_name) {
                    Ok(()) => {
                        Logger::info(
                            "index_dropped",
                            &[("collection", self.name.as_str()), ("index", &index_name)],
                        );
                    }
                    // Dropping an index that was never created is fine.
                    Err(StorageError::IndexNotFound(_)) => {}
                    Err(err) => {
                        Logger::warn(
                            "index_drop_failed",
                            &[
                                ("collection", self.name.as_str()),
                                ("index", &index_name),
                                ("error", &err.to_string()),
                            ],
                        );
                    }
                },
                usable => {
                    let kind = match usable {
                        IndexSpec::Typed(kind) => Some(kind.clone()),
                        _ => None,
                    };
                    let request = IndexRequest {
                        name: index_name.clone(),
                        field: field.clone(),
                        unique: def.unique,
                        sparse: def.optional,
                        background: true,
                        kind,
                    };
                    if let Err(err) = self.engine.ensure_index(&self.name, request) {
                        Logger::warn(
                            "index_ensure_failed",
                            &[
                                ("collection", self.name.as_str()),
                                ("index", &index_name),
                                ("error", &err.to_string()),
                            ],
                        );
                    }
                }
            }
        }
    }

    fn install_guards(&self, registry: Arc<AttachedSchema>) {
        let mut guards = self.guards.lock().unwrap();

        // First: cleaning guard. Always runs, sees the raw payload, and
        // never denies by itself. Auto-values are computed here because
        // this code runs server-side even for client writes. An
        // undeclared `_id` is detached around the clean and restored
        // unchanged.
        let clean_registry = registry.clone();
        guards.register_deny(DenyGuard {
            name: "schema_clean",
            respect_transform: false,
            handler: Arc::new(move |ctx, payload| {
                let operation = guard_operation(ctx);
                let detached_id = if ctx.op == GuardOp::Insert && !clean_registry.allows_key("_id")
                {
                    payload.as_object_mut().and_then(|obj| obj.remove("_id"))
                } else {
                    None
                };
                clean_registry.clean(
                    payload,
                    &CleanOptions {
                        is_modifier: ctx.op == GuardOp::Update,
                        filter: true,
                        auto_convert: true,
                        get_auto_values: true,
                        context: &operation,
                    },
                );
                if let (Some(obj), Some(id)) = (payload.as_object_mut(), detached_id) {
                    obj.insert("_id".to_string(), id);
                }
                false
            }),
        });

        // Second: re-validation guard. Sees the transformed payload and
        // fails the write when the full pipeline would reject it. An
        // undeclared `_id` stays out of validation here too.
        let validate_registry = registry;
        guards.register_deny(DenyGuard {
            name: "schema_validate",
            respect_transform: true,
            handler: Arc::new(move |ctx, payload| {
                let operation = guard_operation(ctx);
                let mut candidate = payload.clone();
                if ctx.op == GuardOp::Insert && !validate_registry.allows_key("_id") {
                    if let Some(obj) = candidate.as_object_mut() {
                        obj.remove("_id");
                    }
                }
                let (valid, _) = validate_registry.validate(
                    super::options::DEFAULT_CONTEXT,
                    &candidate,
                    &ValidateOptions {
                        modifier: ctx.op == GuardOp::Update,
                        upsert: false,
                        operation: &operation,
                        selector: ctx.selector,
                    },
                );
                !valid
            }),
        });

        if self.config.insecure {
            guards.allow_all();
        }
    }

    /// Register an allow guard for client-originated writes.
    pub fn register_allow(&self, guard: AllowGuard) {
        self.guards.lock().unwrap().register_allow(guard);
    }

    /// Register a deny guard for client-originated writes.
    pub fn register_deny(&self, guard: DenyGuard) {
        self.guards.lock().unwrap().register_deny(guard);
    }

    fn run_guards(&self, ctx: &GuardContext<'_>, payload: &mut Value) -> WriteResult<()> {
        let guards = self.guards.lock().unwrap();
        if !guards.permits(ctx, payload) {
            return Err(WriteError::NotPermitted(
                "no allow rule granted the write".into(),
            ));
        }
        for guard in guards.deny_guards() {
            let denied = if guard.respect_transform && !self.virtual_fields.is_empty() {
                let mut transformed = self.apply_transform(payload.clone());
                (guard.handler)(ctx, &mut transformed)
            } else {
                (guard.handler)(ctx, payload)
            };
            if denied {
                return Err(WriteError::NotPermitted(format!(
                    "denied by '{}'",
                    guard.name
                )));
            }
        }
        Ok(())
    }

    /// Insert a document.
    ///
    /// With a schema attached, the document is cleaned and validated
    /// first. On a validation failure delivered through the completion
    /// handler, a freshly generated identifier is still returned so an
    /// insert always yields an id-shaped result.
    pub fn insert(&self, request: InsertRequest) -> WriteResult<String> {
        let Some(registry) = self.schema.get() else {
            let InsertRequest {
                document,
                options,
                on_complete,
            } = request;
            return self.forward_insert(document, on_complete, None, options.trusted);
        };
        let registry = registry.as_ref();

        match self.validate_insert(registry, request)? {
            Validated::Handled => Ok(generated_id()),
            Validated::Proceed {
                payload,
                on_complete,
                context_name,
                trusted,
                translate,
            } => self.forward_insert(
                payload,
                on_complete,
                translate.then_some((registry, context_name)),
                trusted,
            ),
        }
    }

    fn forward_insert(
        &self,
        document: Value,
        on_complete: Option<CompletionHandler>,
        translate: Option<(&AttachedSchema, String)>,
        trusted: bool,
    ) -> WriteResult<String> {
        let mut stored = document.clone();
        match self.engine.insert(&self.name, document) {
            Ok(id) => {
                if let Some(handler) = on_complete {
                    if let Some(obj) = stored.as_object_mut() {
                        obj.entry("_id".to_string())
                            .or_insert_with(|| Value::String(id.clone()));
                    }
                    handler(Ok(WriteOutcome::Inserted {
                        id: id.clone(),
                        document: stored,
                    }));
                }
                Ok(id)
            }
            Err(err) => {
                let error = match translate {
                    Some((registry, context_name)) => {
                        translate_duplicate_key(err, &stored, registry, &context_name)
                    }
                    None => WriteError::Storage(err),
                };
                self.deliver_storage_failure(error, on_complete, trusted)
                    .map(|_| generated_id())
            }
        }
    }

    /// Update documents matching a selector.
    pub fn update(&self, request: UpdateRequest) -> WriteResult<UpdateOutcome> {
        self.update_with_kind(OperationKind::Update, request)
    }

    /// Update-or-insert: an update that takes the insert branch when the
    /// selector matches nothing.
    pub fn upsert(&self, mut request: UpdateRequest) -> WriteResult<UpdateOutcome> {
        request.options.upsert = true;
        self.update_with_kind(OperationKind::Upsert, request)
    }

    fn update_with_kind(
        &self,
        kind: OperationKind,
        request: UpdateRequest,
    ) -> WriteResult<UpdateOutcome> {
        let Some(registry) = self.schema.get() else {
            let UpdateRequest {
                selector,
                modifier,
                options,
                on_complete,
            } = request;
            let update_options = UpdateOptions {
                multi: options.multi,
                upsert: options.upsert || kind == OperationKind::Upsert,
            };
            return self.forward_update(
                selector,
                modifier,
                update_options,
                on_complete,
                None,
                options.trusted,
            );
        };
        let registry = registry.as_ref();

        match self.validate_update(registry, kind, request)? {
            Validated::Handled => Ok(UpdateOutcome::default()),
            Validated::Proceed {
                payload: (selector, modifier, update_options),
                on_complete,
                context_name,
                trusted,
                translate,
            } => self.forward_update(
                selector,
                modifier,
                update_options,
                on_complete,
                translate.then_some((registry, context_name)),
                trusted,
            ),
        }
    }

    fn forward_update(
        &self,
        selector: Value,
        modifier: Value,
        update_options: UpdateOptions,
        on_complete: Option<CompletionHandler>,
        translate: Option<(&AttachedSchema, String)>,
        trusted: bool,
    ) -> WriteResult<UpdateOutcome> {
        match self
            .engine
            .update(&self.name, &selector, &modifier, &update_options)
        {
            Ok(outcome) => {
                if let Some(handler) = on_complete {
                    handler(Ok(WriteOutcome::Updated(outcome.clone())));
                }
                Ok(outcome)
            }
            Err(err) => {
                let error = match translate {
                    Some((registry, context_name)) => {
                        translate_duplicate_key(err, &modifier, registry, &context_name)
                    }
                    None => WriteError::Storage(err),
                };
                self.deliver_storage_failure(error, on_complete, trusted)
                    .map(|_| UpdateOutcome::default())
            }
        }
    }

    /// Deliver a post-validation failure per the callback contract.
    fn deliver_storage_failure(
        &self,
        error: WriteError,
        on_complete: Option<CompletionHandler>,
        trusted: bool,
    ) -> WriteResult<()> {
        match on_complete {
            Some(handler) => {
                handler(Err(error));
                Ok(())
            }
            None if trusted => Err(error),
            None => {
                Logger::error(
                    "client_write_failed",
                    &[
                        ("collection", self.name.as_str()),
                        ("error", &error.to_string()),
                    ],
                );
                Ok(())
            }
        }
    }

    /// Insert arriving from a client: runs the guard chain, then the
    /// untrusted write pipeline.
    pub fn client_insert(
        &self,
        user_id: Option<&str>,
        document: Value,
        on_complete: Option<CompletionHandler>,
    ) -> WriteResult<String> {
        let mut document = document;
        let ctx = GuardContext {
            user_id,
            op: GuardOp::Insert,
            selector: None,
        };
        self.run_guards(&ctx, &mut document)?;

        self.insert(InsertRequest {
            document,
            options: WriteOptions::untrusted(user_id.map(String::from)),
            on_complete,
        })
    }

    /// Update arriving from a client: runs the guard chain, then the
    /// untrusted write pipeline.
    pub fn client_update(
        &self,
        user_id: Option<&str>,
        selector: Value,
        modifier: Value,
        on_complete: Option<CompletionHandler>,
    ) -> WriteResult<UpdateOutcome> {
        let mut modifier = modifier;
        let ctx = GuardContext {
            user_id,
            op: GuardOp::Update,
            selector: Some(&selector),
        };
        self.run_guards(&ctx, &mut modifier)?;

        self.update(UpdateRequest {
            selector,
            modifier,
            options: WriteOptions::untrusted(user_id.map(String::from)),
            on_complete,
        })
    }

    /// Fetch one document, with virtual fields materialized.
    pub fn find_one(&self, selector: &Value) -> WriteResult<Option<Value>> {
        let found = self.engine.find_one(&self.name, selector)?;
        Ok(found.map(|doc| self.apply_transform(doc)))
    }

    /// Fetch all matching documents, with virtual fields materialized.
    pub fn find(&self, selector: &Value) -> WriteResult<Vec<Value>> {
        let found = self.engine.find(&self.name, selector)?;
        Ok(found.into_iter().map(|doc| self.apply_transform(doc)).collect())
    }

    /// Count matching documents.
    pub fn count(&self, selector: &Value) -> WriteResult<u64> {
        Ok(self.engine.count(&self.name, selector)?)
    }

    pub(crate) fn apply_transform(&self, mut document: Value) -> Value {
        if self.virtual_fields.is_empty() {
            return document;
        }
        let base = document.clone();
        if let Some(obj) = document.as_object_mut() {
            for (name, compute) in &self.virtual_fields {
                obj.insert(name.clone(), compute(&base));
            }
        }
        document
    }
}

fn guard_operation(ctx: &GuardContext<'_>) -> OperationContext {
    let kind = match ctx.op {
        GuardOp::Insert => OperationKind::Insert,
        GuardOp::Update => OperationKind::Update,
    };
    OperationContext::untrusted(kind, ctx.user_id.map(String::from))
}

fn generated_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;
    use crate::storage::MemoryEngine;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::builder()
            .field("name", FieldDef::string())
            .field("age", FieldDef::int().optional())
            .build()
            .unwrap()
    }

    fn collection() -> Collection {
        let engine = Arc::new(MemoryEngine::new());
        Collection::with_schema("people", engine, schema()).unwrap()
    }

    #[test]
    fn test_schemaless_passthrough() {
        let engine = Arc::new(MemoryEngine::new());
        let coll = Collection::new("raw", engine);
        let id = coll
            .insert(InsertRequest::new(json!({ "anything": true })))
            .unwrap();
        assert!(!id.is_empty());
        assert_eq!(coll.count(&json!({ "anything": true })).unwrap(), 1);
    }

    #[test]
    fn test_attach_schema_twice_fails() {
        let coll = collection();
        let result = coll.attach_schema(schema());
        assert!(matches!(result, Err(WriteError::SchemaAttached(_))));
    }

    #[test]
    fn test_insert_validates() {
        let coll = collection();
        let err = coll
            .insert(InsertRequest::new(json!({ "age": 3 })))
            .unwrap_err();
        let failure = err.validation().unwrap();
        assert_eq!(failure.first_field(), Some("name"));
        // Nothing reached storage.
        assert_eq!(coll.count(&json!({})).unwrap(), 0);
    }

    #[test]
    fn test_insert_cleans_before_store() {
        let coll = collection();
        coll.insert(InsertRequest::new(json!({ "name": "A", "age": "30", "ghost": 1 })))
            .unwrap();
        let doc = coll.find_one(&json!({ "name": "A" })).unwrap().unwrap();
        assert_eq!(doc["age"], json!(30));
        assert!(doc.get("ghost").is_none());
    }

    #[test]
    fn test_virtual_fields_materialized_on_read() {
        let engine = Arc::new(MemoryEngine::new());
        let coll = Collection::with_schema("people", engine, schema())
            .unwrap()
            .virtual_field("greeting", |doc| {
                json!(format!("hello {}", doc["name"].as_str().unwrap_or("?")))
            });

        coll.insert(InsertRequest::new(json!({ "name": "A" }))).unwrap();
        let doc = coll.find_one(&json!({ "name": "A" })).unwrap().unwrap();
        assert_eq!(doc["greeting"], json!("hello A"));
        // The stored document is untouched.
        assert_eq!(coll.count(&json!({ "greeting": "hello A" })).unwrap(), 0);
    }

    #[test]
    fn test_update_validates_modifier() {
        let coll = collection();
        coll.insert(InsertRequest::new(json!({ "name": "A" }))).unwrap();
        let err = coll
            .update(UpdateRequest::new(
                json!({ "name": "A" }),
                json!({ "$set": { "age": "not a number" } }),
            ))
            .unwrap_err();
        assert!(err.validation().is_some());
    }

    #[test]
    fn test_usage_errors_are_synchronous() {
        let coll = collection();
        assert!(matches!(
            coll.insert(InsertRequest::new(Value::Null)),
            Err(WriteError::Usage(_))
        ));
        assert!(matches!(
            coll.update(UpdateRequest::new(json!({}), json!({}))),
            Err(WriteError::Usage(_))
        ));
    }
}
