//! Uniqueness enforcement
//!
//! Two halves:
//! - `UniqueRule`: a per-field validation rule that decides, before the
//!   write reaches storage, whether a proposed value would collide with a
//!   declared uniqueness constraint. When the field carries a usable
//!   storage index the rule defers entirely: the index enforces the
//!   constraint at write time and the failure comes back through the
//!   translator below.
//! - `translate_duplicate_key`: the storage-boundary adapter that turns a
//!   raw duplicate-key error into a structured `notUnique` validation
//!   failure, appended to the relevant validation context. Parse failure
//!   passes the original error through unchanged.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::{Map, Value};

use super::errors::{ValidationFailure, WriteError};
use super::registry::AttachedSchema;
use crate::observe::Logger;
use crate::schema::{message_for, ErrorKind, FieldRule, InvalidKey, OperationKind, RuleContext, RuleField};
use crate::storage::{resolve_path, StorageEngine, StorageError};

/// Index names owned by this crate: `dw_` + field path.
///
/// This naming is a stable contract; the duplicate-key translator parses
/// field names back out of engine error messages with it.
pub const INDEX_NAME_PREFIX: &str = "dw_";

/// Index name for a field path.
pub fn index_name_for(field: &str) -> String {
    format!("{}{}", INDEX_NAME_PREFIX, field)
}

/// Per-field uniqueness rule consulted during validation.
pub struct UniqueRule {
    engine: Arc<dyn StorageEngine>,
    collection: String,
}

impl UniqueRule {
    pub(crate) fn new(engine: Arc<dyn StorageEngine>, collection: impl Into<String>) -> Self {
        Self {
            engine,
            collection: collection.into(),
        }
    }

    /// Documents already holding `value` for `field`, across the whole
    /// collection. `None` defers the decision to the storage engine.
    fn count_matching(&self, field: &str, value: &Value) -> Option<u64> {
        let mut selector = Map::new();
        selector.insert(field.to_string(), value.clone());
        self.count(&Value::Object(selector))
    }

    /// Documents matched by the update selector that do not already hold
    /// `value`, i.e. documents about to adopt it.
    ///
    /// The selector's own constraint on `field`, if any, is replaced by
    /// the `$ne` probe; this can miscount when the selector constrains the
    /// same field being checked, and that behavior is deliberate.
    fn count_adopting(&self, selector: &Value, field: &str, value: &Value) -> Option<u64> {
        let mut probe = selector.as_object().cloned().unwrap_or_default();
        let mut ne = Map::new();
        ne.insert("$ne".to_string(), value.clone());
        probe.insert(field.to_string(), Value::Object(ne));
        self.count(&Value::Object(probe))
    }

    fn count(&self, selector: &Value) -> Option<u64> {
        match self.engine.count(&self.collection, selector) {
            Ok(n) => Some(n),
            Err(err) => {
                Logger::warn(
                    "unique_count_failed",
                    &[
                        ("collection", self.collection.as_str()),
                        ("error", &err.to_string()),
                    ],
                );
                None
            }
        }
    }
}

impl FieldRule for UniqueRule {
    fn check(&self, field: &RuleField<'_>, ctx: &RuleContext<'_>) -> Option<ErrorKind> {
        if !field.def.unique {
            return None;
        }
        // Absence is governed by the `optional` policy, not uniqueness.
        let value = match field.value {
            Some(v) if !v.is_null() => v,
            _ => return None,
        };
        // A usable index means the engine enforces the constraint at
        // write time; the translator reports it after the fact.
        if field.def.has_usable_index() {
            return None;
        }
        // A delta, not an absolute value.
        if field.operator == Some("$inc") {
            return None;
        }

        let violation = match ctx.operation.kind {
            OperationKind::Insert => self.count_matching(field.name, value)? > 0,
            OperationKind::Update | OperationKind::Upsert => {
                // Without a selector the outcome cannot be determined
                // locally; defer to the storage engine.
                let selector = ctx.selector?;
                let matching = self.count_matching(field.name, value)?;
                let adopting = self.count_adopting(selector, field.name, value)?;
                matching + adopting > 1
            }
        };

        violation.then_some(ErrorKind::NotUnique)
    }
}

fn index_field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Matches "index: dw_<field>" and "index: db.coll.$dw_<field>".
        Regex::new(&format!(r"index:\s+(?:\S*\$)?{}(\S+)", INDEX_NAME_PREFIX)).unwrap()
    })
}

/// Extract the field name from a duplicate-key error message, when the
/// violated index follows this crate's naming convention.
pub fn duplicate_field_name(message: &str) -> Option<String> {
    index_field_pattern()
        .captures(message)
        .map(|captures| captures[1].to_string())
}

/// The value the caller submitted for `field`, for inclusion in the
/// translated finding.
fn submitted_value(payload: &Value, field: &str) -> Option<Value> {
    if let Some(value) = resolve_path(payload, field) {
        return Some(value.clone());
    }
    // Modifier payloads carry values under assignment operators.
    for op in ["$set", "$setOnInsert"] {
        if let Some(value) = payload.get(op).and_then(|args| args.get(field)) {
            return Some(value.clone());
        }
    }
    None
}

/// Translate a storage error into a structured validation failure when it
/// is a duplicate-key violation of one of this crate's indexes.
///
/// Appends a synthetic `notUnique` finding to the named validation context
/// so callers see the same structured error whether the violation was
/// caught locally or by the engine. Anything unrecognized passes through
/// unchanged.
pub fn translate_duplicate_key(
    error: StorageError,
    payload: &Value,
    registry: &AttachedSchema,
    context_name: &str,
) -> WriteError {
    let StorageError::DuplicateKey { message } = &error else {
        return WriteError::Storage(error);
    };
    let Some(field) = duplicate_field_name(message) else {
        Logger::warn(
            "duplicate_key_unrecognized",
            &[("message", message.as_str())],
        );
        return WriteError::Storage(error);
    };

    let label = registry.label_for(&field);
    let key = InvalidKey {
        name: field.clone(),
        kind: ErrorKind::NotUnique,
        value: submitted_value(payload, &field),
        message: message_for(ErrorKind::NotUnique, &label),
    };
    registry.add_invalid_key(context_name, key);

    WriteError::Validation(ValidationFailure::new(
        context_name,
        registry.invalid_keys(context_name),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, OperationContext, Schema};
    use crate::storage::{IndexRequest, MemoryEngine};
    use serde_json::json;

    fn rule_with_engine() -> (Arc<MemoryEngine>, UniqueRule) {
        let engine = Arc::new(MemoryEngine::new());
        let rule = UniqueRule::new(engine.clone(), "items");
        (engine, rule)
    }

    fn check(
        rule: &UniqueRule,
        def: &FieldDef,
        value: &Value,
        operator: Option<&str>,
        kind: OperationKind,
        selector: Option<&Value>,
    ) -> Option<ErrorKind> {
        let op = OperationContext::trusted(kind);
        let ctx = RuleContext {
            operation: &op,
            selector,
        };
        let field = RuleField {
            name: "code",
            def,
            value: Some(value),
            operator,
        };
        rule.check(&field, &ctx)
    }

    #[test]
    fn test_insert_collision_detected() {
        let (engine, rule) = rule_with_engine();
        engine.insert("items", json!({ "code": "X" })).unwrap();

        let def = FieldDef::string().unique();
        let value = json!("X");
        assert_eq!(
            check(&rule, &def, &value, None, OperationKind::Insert, None),
            Some(ErrorKind::NotUnique)
        );
        let fresh = json!("Y");
        assert_eq!(
            check(&rule, &def, &fresh, None, OperationKind::Insert, None),
            None
        );
    }

    #[test]
    fn test_indexed_field_defers_to_engine() {
        let (engine, rule) = rule_with_engine();
        engine.insert("items", json!({ "code": "X" })).unwrap();

        let def = FieldDef::string()
            .unique()
            .indexed(crate::schema::IndexSpec::Ascending);
        let value = json!("X");
        assert_eq!(
            check(&rule, &def, &value, None, OperationKind::Insert, None),
            None
        );
    }

    #[test]
    fn test_inc_bypasses() {
        let (engine, rule) = rule_with_engine();
        engine.insert("items", json!({ "code": 5 })).unwrap();

        let def = FieldDef::int().unique();
        let value = json!(5);
        let selector = json!({ "status": "open" });
        assert_eq!(
            check(&rule, &def, &value, Some("$inc"), OperationKind::Update, Some(&selector)),
            None
        );
    }

    #[test]
    fn test_update_without_selector_defers() {
        let (engine, rule) = rule_with_engine();
        engine.insert("items", json!({ "code": "X" })).unwrap();

        let def = FieldDef::string().unique();
        let value = json!("X");
        assert_eq!(
            check(&rule, &def, &value, Some("$set"), OperationKind::Update, None),
            None
        );
    }

    #[test]
    fn test_update_count_formula() {
        let (engine, rule) = rule_with_engine();
        // One holder of the value elsewhere; one matched doc adopting it.
        engine.insert("items", json!({ "status": "held", "code": "X" })).unwrap();
        engine.insert("items", json!({ "status": "open", "code": "A" })).unwrap();

        let def = FieldDef::string().unique();
        let value = json!("X");
        let selector = json!({ "status": "open" });
        // matching=1, adopting=1 -> violation
        assert_eq!(
            check(&rule, &def, &value, Some("$set"), OperationKind::Update, Some(&selector)),
            Some(ErrorKind::NotUnique)
        );

        // A value nobody holds, adopted by exactly one matched doc: fine.
        let fresh = json!("Z");
        assert_eq!(
            check(&rule, &def, &fresh, Some("$set"), OperationKind::Update, Some(&selector)),
            None
        );
    }

    #[test]
    fn test_update_two_adopters_violate() {
        let (engine, rule) = rule_with_engine();
        engine.insert("items", json!({ "status": "open", "code": "A" })).unwrap();
        engine.insert("items", json!({ "status": "open", "code": "B" })).unwrap();

        let def = FieldDef::string().unique();
        let value = json!("Z");
        let selector = json!({ "status": "open" });
        // matching=0, adopting=2 -> violation
        assert_eq!(
            check(&rule, &def, &value, Some("$set"), OperationKind::Update, Some(&selector)),
            Some(ErrorKind::NotUnique)
        );
    }

    #[test]
    fn test_null_and_non_unique_skip() {
        let (_engine, rule) = rule_with_engine();
        let plain = FieldDef::string();
        let value = json!("X");
        assert_eq!(check(&rule, &plain, &value, None, OperationKind::Insert, None), None);

        let def = FieldDef::string().unique();
        let null = Value::Null;
        assert_eq!(check(&rule, &def, &null, None, OperationKind::Insert, None), None);
    }

    #[test]
    fn test_duplicate_field_name_parsing() {
        assert_eq!(
            duplicate_field_name(
                "E11000 duplicate key error collection: docwarden.items index: dw_code dup key: { code: \"X\" }"
            ),
            Some("code".to_string())
        );
        assert_eq!(
            duplicate_field_name(
                "E11000 duplicate key error index: app.items.$dw_userName dup key"
            ),
            Some("userName".to_string())
        );
        assert_eq!(duplicate_field_name("E11000 duplicate key error index: items_pk"), None);
    }

    #[test]
    fn test_translate_appends_finding() {
        let schema = Schema::builder()
            .field("code", FieldDef::string().unique())
            .build()
            .unwrap();
        let registry = AttachedSchema::new(schema, Vec::new());

        let error = StorageError::DuplicateKey {
            message: "E11000 duplicate key error collection: docwarden.items index: dw_code dup key: { code: \"X\" }".into(),
        };
        let payload = json!({ "code": "X" });
        let translated = translate_duplicate_key(error, &payload, &registry, "default");

        let failure = translated.validation().expect("expected validation error");
        assert_eq!(failure.invalid_keys[0].name, "code");
        assert_eq!(failure.invalid_keys[0].kind, ErrorKind::NotUnique);
        assert_eq!(failure.invalid_keys[0].value, Some(json!("X")));
        assert_eq!(registry.invalid_keys("default").len(), 1);
    }

    #[test]
    fn test_untranslatable_error_passes_through() {
        let schema = Schema::builder()
            .field("code", FieldDef::string())
            .build()
            .unwrap();
        let registry = AttachedSchema::new(schema, Vec::new());

        let error = StorageError::DuplicateKey {
            message: "E11000 duplicate key error index: items_pk dup key".into(),
        };
        let translated = translate_duplicate_key(error, &json!({}), &registry, "default");
        assert!(matches!(translated, WriteError::Storage(_)));
    }

    #[test]
    fn test_modifier_value_lookup() {
        let schema = Schema::builder()
            .field("code", FieldDef::string().unique())
            .build()
            .unwrap();
        let registry = AttachedSchema::new(schema, Vec::new());

        let error = StorageError::DuplicateKey {
            message: "E11000 duplicate key error index: dw_code dup key".into(),
        };
        let modifier = json!({ "$set": { "code": "X" } });
        let translated = translate_duplicate_key(error, &modifier, &registry, "default");
        let failure = translated.validation().unwrap();
        assert_eq!(failure.invalid_keys[0].value, Some(json!("X")));
    }

    #[test]
    fn test_index_setup_enables_engine_enforcement() {
        let engine = Arc::new(MemoryEngine::new());
        engine
            .ensure_index(
                "items",
                IndexRequest {
                    name: index_name_for("code"),
                    field: "code".into(),
                    unique: true,
                    sparse: true,
                    background: true,
                    kind: None,
                },
            )
            .unwrap();
        engine.insert("items", json!({ "code": "X" })).unwrap();
        let err = engine.insert("items", json!({ "code": "X" })).unwrap_err();
        let StorageError::DuplicateKey { message } = err else {
            panic!("expected duplicate key");
        };
        assert_eq!(duplicate_field_name(&message), Some("code".to_string()));
    }
}
