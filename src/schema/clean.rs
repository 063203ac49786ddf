//! Cleaning stage
//!
//! Normalizes a document or modifier in place before validation:
//! - filters out keys the schema does not declare,
//! - coerces values to their declared types where the conversion is
//!   unambiguous,
//! - computes and injects auto-values with the operation context.
//!
//! Cleaning an already-clean document is a no-op; the same input cleaned
//! twice is byte-identical.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Number, Value};

use super::context::{AutoValue, AutoValueInput, OperationContext};
use super::types::{FieldDef, FieldType, Schema};

/// Options controlling one cleaning pass.
#[derive(Debug, Clone, Copy)]
pub struct CleanOptions<'a> {
    /// Treat the target as an update modifier (`$set`-style operators)
    pub is_modifier: bool,
    /// Remove keys not declared in the schema
    pub filter: bool,
    /// Coerce values to declared types
    pub auto_convert: bool,
    /// Compute and inject auto-values
    pub get_auto_values: bool,
    /// The enclosing write operation
    pub context: &'a OperationContext,
}

/// Operators whose arguments assign absolute field values.
const ASSIGNING_OPERATORS: [&str; 2] = ["$set", "$setOnInsert"];

/// Clean `target` in place against `schema`.
pub fn clean(schema: &Schema, target: &mut Value, opts: &CleanOptions<'_>) {
    if opts.is_modifier {
        clean_modifier(schema, target, opts);
    } else {
        clean_document(schema, target, opts);
    }
}

fn clean_document(schema: &Schema, target: &mut Value, opts: &CleanOptions<'_>) {
    if let Some(obj) = target.as_object_mut() {
        clean_object(schema.field_definitions(), obj, opts);
    }
    if opts.get_auto_values {
        apply_document_auto_values(schema, target, opts.context);
    }
}

fn clean_object(
    fields: &std::collections::BTreeMap<String, FieldDef>,
    obj: &mut Map<String, Value>,
    opts: &CleanOptions<'_>,
) {
    if opts.filter {
        let disallowed: Vec<String> = obj
            .keys()
            .filter(|k| !fields.contains_key(*k))
            .cloned()
            .collect();
        for key in disallowed {
            obj.remove(&key);
        }
    }

    for (name, def) in fields {
        if let Some(value) = obj.get_mut(name) {
            clean_typed(&def.field_type, value, opts);
        }
    }
}

fn clean_typed(field_type: &FieldType, value: &mut Value, opts: &CleanOptions<'_>) {
    match field_type {
        FieldType::Object { fields } => {
            if let Some(obj) = value.as_object_mut() {
                clean_object(fields, obj, opts);
            }
        }
        FieldType::Array { element_type } => {
            if let Some(arr) = value.as_array_mut() {
                for element in arr {
                    clean_typed(element_type, element, opts);
                }
            }
        }
        scalar => {
            if opts.auto_convert {
                coerce(value, scalar);
            }
        }
    }
}

fn clean_modifier(schema: &Schema, target: &mut Value, opts: &CleanOptions<'_>) {
    let Some(ops) = target.as_object_mut() else {
        return;
    };

    let operator_names: Vec<String> = ops.keys().cloned().collect();
    for op in &operator_names {
        if !op.starts_with('$') {
            continue;
        }
        let Some(args) = ops.get_mut(op).and_then(Value::as_object_mut) else {
            continue;
        };

        if opts.filter {
            let disallowed: Vec<String> = args
                .keys()
                .filter(|k| schema.field_definition(k).is_none())
                .cloned()
                .collect();
            for key in disallowed {
                args.remove(&key);
            }
        }

        if opts.auto_convert && op != "$unset" {
            let keys: Vec<String> = args.keys().cloned().collect();
            for key in keys {
                let Some(def) = schema.field_definition(&key) else {
                    continue;
                };
                let Some(value) = args.get_mut(&key) else {
                    continue;
                };
                if ASSIGNING_OPERATORS.contains(&op.as_str()) {
                    clean_typed(&def.field_type, value, opts);
                } else if op == "$inc" {
                    coerce(value, &def.field_type);
                } else if op == "$push" {
                    if let FieldType::Array { element_type } = &def.field_type {
                        clean_typed(element_type, value, opts);
                    }
                }
            }
        }
    }

    if opts.get_auto_values {
        apply_modifier_auto_values(schema, ops, opts.context);
    }

    // Operators emptied by filtering are dropped entirely.
    let empty: Vec<String> = ops
        .iter()
        .filter(|(k, v)| k.starts_with('$') && v.as_object().map_or(false, Map::is_empty))
        .map(|(k, _)| k.clone())
        .collect();
    for key in empty {
        ops.remove(&key);
    }
}

fn apply_document_auto_values(schema: &Schema, target: &mut Value, context: &OperationContext) {
    let Some(obj) = target.as_object_mut() else {
        return;
    };

    for (name, def) in schema.field_definitions() {
        let Some(auto) = &def.auto_value else {
            continue;
        };
        let current = obj.get(name).cloned();
        let input = AutoValueInput {
            field_name: name,
            value: current.as_ref(),
            is_set: current.is_some(),
            is_modifier: false,
            operation: context,
        };
        match auto(&input) {
            AutoValue::Set(value) => {
                obj.insert(name.clone(), value);
            }
            AutoValue::Unset => {
                obj.remove(name);
            }
            AutoValue::Keep => {}
        }
    }
}

fn apply_modifier_auto_values(
    schema: &Schema,
    ops: &mut Map<String, Value>,
    context: &OperationContext,
) {
    for (name, def) in schema.field_definitions() {
        let Some(auto) = &def.auto_value else {
            continue;
        };

        let current = ASSIGNING_OPERATORS
            .iter()
            .find_map(|op| ops.get(*op).and_then(|args| args.get(name.as_str())))
            .cloned();
        let is_set = current.is_some()
            || ops.values().any(|args| {
                args.as_object().map_or(false, |a| a.contains_key(name.as_str()))
            });

        let input = AutoValueInput {
            field_name: name,
            value: current.as_ref(),
            is_set,
            is_modifier: true,
            operation: context,
        };
        match auto(&input) {
            AutoValue::Set(value) => {
                let set = ops
                    .entry("$set".to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(set_obj) = set.as_object_mut() {
                    set_obj.insert(name.clone(), value);
                }
            }
            AutoValue::Unset => {
                let unset = ops
                    .entry("$unset".to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(unset_obj) = unset.as_object_mut() {
                    unset_obj.insert(name.clone(), Value::String(String::new()));
                }
            }
            AutoValue::Keep => {}
        }
    }
}

/// Coerce a scalar value toward the declared type, when unambiguous.
///
/// Values that cannot be converted are left untouched for validation to
/// reject.
pub(crate) fn coerce(value: &mut Value, target: &FieldType) {
    match target {
        FieldType::String => {
            let converted = match &*value {
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            };
            if let Some(s) = converted {
                *value = Value::String(s);
            }
        }
        FieldType::Id => {
            if let Value::Number(n) = &*value {
                *value = Value::String(n.to_string());
            }
        }
        FieldType::Int => {
            let converted = match &*value {
                Value::String(s) => s.trim().parse::<i64>().ok(),
                Value::Number(n) if n.is_f64() => {
                    n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)
                }
                _ => None,
            };
            if let Some(i) = converted {
                *value = Value::Number(Number::from(i));
            }
        }
        FieldType::Float => {
            if let Value::String(s) = &*value {
                if let Some(n) = s.trim().parse::<f64>().ok().and_then(Number::from_f64) {
                    *value = Value::Number(n);
                }
            }
        }
        FieldType::Bool => {
            if let Value::String(s) = &*value {
                match s.trim() {
                    "true" => *value = Value::Bool(true),
                    "false" => *value = Value::Bool(false),
                    _ => {}
                }
            }
        }
        FieldType::Date => {
            let converted = match &*value {
                Value::Number(n) => n
                    .as_i64()
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                    .map(|dt| dt.to_rfc3339()),
                Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.to_rfc3339()),
                _ => None,
            };
            if let Some(s) = converted {
                *value = Value::String(s);
            }
        }
        FieldType::Object { .. } | FieldType::Array { .. } => {}
    }
}
