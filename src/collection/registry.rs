//! Schema registry
//!
//! Associates one schema instance with a collection and exposes the three
//! capabilities the write pipeline consumes: field-definition lookup,
//! cleaning, and validation into named contexts. Custom field rules
//! (policy, uniqueness) are registered at attach time and run inside every
//! validation pass.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::schema::{
    clean, validate, CleanOptions, FieldDef, FieldRule, InvalidKey, Schema, ValidateOptions,
    ValidationContext,
};

/// A schema attached to a collection, with its registered rules and named
/// validation contexts.
pub struct AttachedSchema {
    schema: Arc<Schema>,
    rules: Vec<Arc<dyn FieldRule>>,
    contexts: Mutex<HashMap<String, ValidationContext>>,
}

impl AttachedSchema {
    pub(crate) fn new(schema: Schema, rules: Vec<Arc<dyn FieldRule>>) -> Self {
        Self {
            schema: Arc::new(schema),
            rules,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// The attached schema instance.
    pub fn definition(&self) -> &Schema {
        &self.schema
    }

    /// Whether the schema declares the given key.
    pub fn allows_key(&self, path: &str) -> bool {
        self.schema.allows_key(path)
    }

    /// Field definition lookup by dotted path.
    pub fn field_definition(&self, path: &str) -> Option<&FieldDef> {
        self.schema.field_definition(path)
    }

    /// Display label for a field path.
    pub fn label_for(&self, path: &str) -> String {
        self.schema.label_for(path)
    }

    /// Clean `target` in place.
    pub fn clean(&self, target: &mut Value, opts: &CleanOptions<'_>) {
        clean(&self.schema, target, opts);
    }

    /// Validate `target`, recording findings under the named context.
    ///
    /// Returns the pass/fail flag and a copy of the findings.
    pub fn validate(
        &self,
        context_name: &str,
        target: &Value,
        opts: &ValidateOptions<'_>,
    ) -> (bool, Vec<InvalidKey>) {
        let mut contexts = self.contexts.lock().unwrap();
        let ctx = contexts.entry(context_name.to_string()).or_default();
        let valid = validate(&self.schema, &self.rules, target, opts, ctx);
        (valid, ctx.invalid_keys().to_vec())
    }

    /// Append a finding to a named context after the fact (used by the
    /// storage-boundary translator).
    pub fn add_invalid_key(&self, context_name: &str, key: InvalidKey) {
        let mut contexts = self.contexts.lock().unwrap();
        contexts
            .entry(context_name.to_string())
            .or_default()
            .add_invalid_key(key);
    }

    /// The current findings of a named context.
    pub fn invalid_keys(&self, context_name: &str) -> Vec<InvalidKey> {
        let contexts = self.contexts.lock().unwrap();
        contexts
            .get(context_name)
            .map(|ctx| ctx.invalid_keys().to_vec())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ErrorKind, FieldDef, OperationContext, OperationKind};
    use serde_json::json;

    fn registry() -> AttachedSchema {
        let schema = Schema::builder()
            .field("name", FieldDef::string())
            .build()
            .unwrap();
        AttachedSchema::new(schema, Vec::new())
    }

    #[test]
    fn test_validate_records_into_named_context() {
        let registry = registry();
        let op = OperationContext::trusted(OperationKind::Insert);
        let opts = ValidateOptions {
            modifier: false,
            upsert: false,
            operation: &op,
            selector: None,
        };

        let (valid, keys) = registry.validate("signup", &json!({}), &opts);
        assert!(!valid);
        assert_eq!(keys[0].name, "name");
        assert_eq!(registry.invalid_keys("signup").len(), 1);
        assert!(registry.invalid_keys("default").is_empty());
    }

    #[test]
    fn test_contexts_reset_between_passes() {
        let registry = registry();
        let op = OperationContext::trusted(OperationKind::Insert);
        let opts = ValidateOptions {
            modifier: false,
            upsert: false,
            operation: &op,
            selector: None,
        };

        registry.validate("default", &json!({}), &opts);
        let (valid, keys) = registry.validate("default", &json!({ "name": "A" }), &opts);
        assert!(valid);
        assert!(keys.is_empty());
    }

    #[test]
    fn test_post_hoc_finding() {
        let registry = registry();
        registry.add_invalid_key(
            "default",
            InvalidKey {
                name: "name".into(),
                kind: ErrorKind::NotUnique,
                value: Some(json!("X")),
                message: "Name must be unique".into(),
            },
        );
        assert_eq!(registry.invalid_keys("default").len(), 1);
    }
}
