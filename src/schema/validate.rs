//! Validation stage
//!
//! Walks a document or modifier against the schema, collecting invalid-key
//! findings into a `ValidationContext`. The walk never mutates the target
//! and is deterministic: the same input yields the same findings in the
//! same order.
//!
//! Custom `FieldRule`s extend the walk per field; the collection layer uses
//! them for field policy (deny on insert/update) and uniqueness.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::DateTime;
use serde_json::Value;

use super::context::{OperationContext, ValidationContext};
use super::errors::ErrorKind;
use super::messages::humanize;
use super::types::{FieldDef, FieldType, Schema};

/// Options controlling one validation pass.
#[derive(Debug, Clone, Copy)]
pub struct ValidateOptions<'a> {
    /// Treat the target as an update modifier
    pub modifier: bool,
    /// The write may take the insert branch of an upsert
    pub upsert: bool,
    /// The enclosing write operation
    pub operation: &'a OperationContext,
    /// The active update selector, when validating an update/upsert
    pub selector: Option<&'a Value>,
}

/// One field presented to a custom rule.
#[derive(Debug)]
pub struct RuleField<'a> {
    /// Dotted field path
    pub name: &'a str,
    /// The field's definition
    pub def: &'a FieldDef,
    /// Candidate value, when one is present
    pub value: Option<&'a Value>,
    /// Modifier operator the value appeared under, if any
    pub operator: Option<&'a str>,
}

/// Context shared by all rule invocations of one pass.
#[derive(Debug)]
pub struct RuleContext<'a> {
    /// The enclosing write operation
    pub operation: &'a OperationContext,
    /// The active update selector, if any
    pub selector: Option<&'a Value>,
}

/// A custom per-field validation rule.
pub trait FieldRule: Send + Sync {
    /// Check one field; `Some(kind)` records an invalid key of that kind.
    fn check(&self, field: &RuleField<'_>, ctx: &RuleContext<'_>) -> Option<ErrorKind>;
}

/// Validate `target` against `schema`, recording findings in `ctx`.
///
/// Returns `true` when the pass found nothing.
pub fn validate(
    schema: &Schema,
    rules: &[Arc<dyn FieldRule>],
    target: &Value,
    opts: &ValidateOptions<'_>,
    ctx: &mut ValidationContext,
) -> bool {
    ctx.reset();

    let rule_ctx = RuleContext {
        operation: opts.operation,
        selector: opts.selector,
    };

    if opts.modifier {
        validate_modifier(schema, rules, target, opts, &rule_ctx, ctx);
    } else {
        validate_document(schema, rules, target, &rule_ctx, ctx);
    }

    ctx.is_valid()
}

fn validate_document(
    schema: &Schema,
    rules: &[Arc<dyn FieldRule>],
    target: &Value,
    rule_ctx: &RuleContext<'_>,
    ctx: &mut ValidationContext,
) {
    let Some(obj) = target.as_object() else {
        ctx.add(
            ErrorKind::ExpectedType,
            "$root",
            "Document",
            Some(target.clone()),
        );
        return;
    };

    walk_object(schema.field_definitions(), obj, "", ctx);

    // Custom rules run over top-level declared fields that carry a value.
    for (name, def) in schema.field_definitions() {
        let value = obj.get(name);
        if let Some(value) = value {
            run_rules(rules, name, def, Some(value), None, rule_ctx, ctx);
        }
    }
}

fn validate_modifier(
    schema: &Schema,
    rules: &[Arc<dyn FieldRule>],
    target: &Value,
    opts: &ValidateOptions<'_>,
    rule_ctx: &RuleContext<'_>,
    ctx: &mut ValidationContext,
) {
    let Some(ops) = target.as_object() else {
        ctx.add(
            ErrorKind::ExpectedType,
            "$root",
            "Modifier",
            Some(target.clone()),
        );
        return;
    };

    for (op, args) in ops {
        if !op.starts_with('$') {
            // Replacement-style updates are not part of the schema contract.
            ctx.add(ErrorKind::NotAllowed, op.clone(), &humanize(op), None);
            continue;
        }
        let Some(args) = args.as_object() else {
            continue;
        };

        for (key, value) in args {
            let Some(def) = schema.field_definition(key) else {
                ctx.add(
                    ErrorKind::NotAllowed,
                    key.clone(),
                    &humanize(key),
                    Some(value.clone()),
                );
                continue;
            };
            let label = label_of(def, key);

            match op.as_str() {
                "$set" | "$setOnInsert" => {
                    if value.is_null() {
                        if !def.optional {
                            ctx.add(ErrorKind::Required, key.clone(), &label, None);
                        }
                    } else {
                        check_type(&def.field_type, value, key, &label, ctx);
                    }
                }
                "$unset" => {
                    if !def.optional {
                        ctx.add(ErrorKind::Required, key.clone(), &label, None);
                    }
                }
                "$inc" => {
                    let numeric = matches!(def.field_type, FieldType::Int | FieldType::Float);
                    if !numeric || !value.is_number() {
                        ctx.add(
                            ErrorKind::ExpectedType,
                            key.clone(),
                            &label,
                            Some(value.clone()),
                        );
                    }
                }
                "$push" => match &def.field_type {
                    FieldType::Array { element_type } => {
                        check_type(element_type, value, key, &label, ctx);
                    }
                    _ => {
                        ctx.add(
                            ErrorKind::ExpectedType,
                            key.clone(),
                            &label,
                            Some(value.clone()),
                        );
                    }
                },
                _ => {}
            }

            run_rules(rules, key, def, Some(value), Some(op.as_str()), rule_ctx, ctx);
        }
    }

    // The insert branch of an upsert stores a full document, so required
    // fields must be assigned somewhere in the modifier.
    if opts.upsert {
        for (name, def) in schema.field_definitions() {
            if def.optional {
                continue;
            }
            let assigned = ["$set", "$setOnInsert"].iter().any(|op| {
                ops.get(*op)
                    .and_then(Value::as_object)
                    .map_or(false, |args| args.contains_key(name.as_str()))
            });
            if !assigned {
                ctx.add(ErrorKind::Required, name.clone(), &label_of(def, name), None);
            }
        }
    }
}

fn run_rules(
    rules: &[Arc<dyn FieldRule>],
    name: &str,
    def: &FieldDef,
    value: Option<&Value>,
    operator: Option<&str>,
    rule_ctx: &RuleContext<'_>,
    ctx: &mut ValidationContext,
) {
    let field = RuleField {
        name,
        def,
        value,
        operator,
    };
    for rule in rules {
        if let Some(kind) = rule.check(&field, rule_ctx) {
            ctx.add(kind, name, &label_of(def, name), value.cloned());
        }
    }
}

fn walk_object(
    fields: &BTreeMap<String, FieldDef>,
    obj: &serde_json::Map<String, Value>,
    prefix: &str,
    ctx: &mut ValidationContext,
) {
    for key in obj.keys() {
        if !fields.contains_key(key) {
            let path = join_path(prefix, key);
            ctx.add(
                ErrorKind::NotAllowed,
                path.clone(),
                &humanize(&path),
                obj.get(key).cloned(),
            );
        }
    }

    for (name, def) in fields {
        let path = join_path(prefix, name);
        let label = label_of(def, &path);
        match obj.get(name) {
            Some(value) if value.is_null() => {
                if !def.optional {
                    ctx.add(ErrorKind::Required, path, &label, None);
                }
            }
            Some(value) => {
                check_type(&def.field_type, value, &path, &label, ctx);
            }
            None => {
                if !def.optional {
                    ctx.add(ErrorKind::Required, path, &label, None);
                }
            }
        }
    }
}

fn check_type(
    field_type: &FieldType,
    value: &Value,
    path: &str,
    label: &str,
    ctx: &mut ValidationContext,
) {
    let matches = match field_type {
        FieldType::String | FieldType::Id => value.is_string(),
        FieldType::Int => value.is_i64() || value.is_u64(),
        FieldType::Float => value.is_number(),
        FieldType::Bool => value.is_boolean(),
        FieldType::Date => value
            .as_str()
            .map_or(false, |s| DateTime::parse_from_rfc3339(s).is_ok()),
        FieldType::Object { fields } => {
            let Some(obj) = value.as_object() else {
                ctx.add(
                    ErrorKind::ExpectedType,
                    path,
                    label,
                    Some(value.clone()),
                );
                return;
            };
            walk_object(fields, obj, path, ctx);
            return;
        }
        FieldType::Array { element_type } => {
            let Some(arr) = value.as_array() else {
                ctx.add(
                    ErrorKind::ExpectedType,
                    path,
                    label,
                    Some(value.clone()),
                );
                return;
            };
            for (i, element) in arr.iter().enumerate() {
                let element_path = format!("{}.{}", path, i);
                check_type(element_type, element, &element_path, label, ctx);
            }
            return;
        }
    };

    if !matches {
        ctx.add(ErrorKind::ExpectedType, path, label, Some(value.clone()));
    }
}

fn label_of(def: &FieldDef, path: &str) -> String {
    def.label.clone().unwrap_or_else(|| humanize(path))
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}
