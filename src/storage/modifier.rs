//! Modifier application
//!
//! Applies `$set`-style update modifiers to documents. The reference
//! engine and the upsert insert-branch both route through here.

use serde_json::{Map, Number, Value};

use super::errors::{StorageError, StorageResult};
use super::matcher::equality_fields;

/// Apply `modifier` to `document` in place.
///
/// `insert_mode` enables `$setOnInsert`. Returns whether the document
/// changed.
pub fn apply(document: &mut Value, modifier: &Value, insert_mode: bool) -> StorageResult<bool> {
    let Some(ops) = modifier.as_object() else {
        return Err(StorageError::InvalidModifier(
            "modifier must be an object".into(),
        ));
    };

    let before = document.clone();

    for (op, args) in ops {
        if !op.starts_with('$') {
            return Err(StorageError::InvalidModifier(format!(
                "replacement-style key '{}' not supported",
                op
            )));
        }
        let Some(args) = args.as_object() else {
            return Err(StorageError::InvalidModifier(format!(
                "arguments of '{}' must be an object",
                op
            )));
        };

        match op.as_str() {
            "$set" => {
                for (path, value) in args {
                    set_path(document, path, value.clone());
                }
            }
            "$setOnInsert" => {
                if insert_mode {
                    for (path, value) in args {
                        set_path(document, path, value.clone());
                    }
                }
            }
            "$unset" => {
                for path in args.keys() {
                    remove_path(document, path);
                }
            }
            "$inc" => {
                for (path, delta) in args {
                    increment_path(document, path, delta)?;
                }
            }
            "$push" => {
                for (path, value) in args {
                    push_path(document, path, value.clone())?;
                }
            }
            other => {
                return Err(StorageError::UnsupportedOperator(other.to_string()));
            }
        }
    }

    Ok(*document != before)
}

/// Build the document stored by the insert branch of an upsert: the
/// selector's plain equality fields, with the modifier applied on top.
pub fn build_upsert_document(selector: &Value, modifier: &Value) -> StorageResult<Value> {
    let mut document = Value::Object(Map::new());
    for (path, value) in equality_fields(selector) {
        set_path(&mut document, &path, value);
    }
    apply(&mut document, modifier, true)?;
    Ok(document)
}

/// Set a dotted path, creating intermediate objects.
pub fn set_path(document: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = document;
    for segment in &segments[..segments.len() - 1] {
        if !current.is_object() {
            return;
        }
        let obj = current.as_object_mut().unwrap();
        current = obj
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if let Some(obj) = current.as_object_mut() {
        obj.insert(segments[segments.len() - 1].to_string(), value);
    }
}

fn remove_path(document: &mut Value, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = document;
    for segment in &segments[..segments.len() - 1] {
        match current.as_object_mut().and_then(|o| o.get_mut(*segment)) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(obj) = current.as_object_mut() {
        obj.remove(segments[segments.len() - 1]);
    }
}

fn increment_path(document: &mut Value, path: &str, delta: &Value) -> StorageResult<()> {
    let Some(delta_num) = delta.as_f64() else {
        return Err(StorageError::InvalidModifier(format!(
            "$inc value for '{}' must be numeric",
            path
        )));
    };

    let current = super::matcher::resolve_path(document, path).cloned();
    let next = match current {
        None => delta.clone(),
        Some(Value::Number(n)) => {
            if let (Some(a), Some(b)) = (n.as_i64(), delta.as_i64()) {
                Value::Number(Number::from(a + b))
            } else {
                let sum = n.as_f64().unwrap_or(0.0) + delta_num;
                Number::from_f64(sum)
                    .map(Value::Number)
                    .ok_or_else(|| StorageError::InvalidModifier(format!(
                        "$inc on '{}' produced a non-finite number",
                        path
                    )))?
            }
        }
        Some(_) => {
            return Err(StorageError::InvalidModifier(format!(
                "$inc target '{}' is not numeric",
                path
            )));
        }
    };
    set_path(document, path, next);
    Ok(())
}

fn push_path(document: &mut Value, path: &str, value: Value) -> StorageResult<()> {
    let current = super::matcher::resolve_path(document, path).cloned();
    match current {
        None => {
            set_path(document, path, Value::Array(vec![value]));
            Ok(())
        }
        Some(Value::Array(mut arr)) => {
            arr.push(value);
            set_path(document, path, Value::Array(arr));
            Ok(())
        }
        Some(_) => Err(StorageError::InvalidModifier(format!(
            "$push target '{}' is not an array",
            path
        ))),
    }
}
