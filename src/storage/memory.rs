//! In-memory reference engine
//!
//! Documents live in per-collection maps keyed by identifier; unique
//! secondary indexes are enforced on every insert and update, producing
//! duplicate-key errors in the engine's native message format. Intended
//! for tests and embedded use; durability is out of scope.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde_json::{Map, Value};
use uuid::Uuid;

use super::engine::{IndexRequest, StorageEngine, UpdateOptions, UpdateOutcome};
use super::errors::{StorageError, StorageResult};
use super::matcher::{matches, resolve_path, values_equal};
use super::modifier::{apply, build_upsert_document};

#[derive(Debug, Clone)]
struct IndexMeta {
    field: String,
    unique: bool,
    sparse: bool,
}

#[derive(Debug, Default)]
struct CollectionData {
    /// id -> document (the document always carries its `_id`)
    documents: BTreeMap<String, Value>,
    /// index name -> metadata
    indexes: BTreeMap<String, IndexMeta>,
}

/// In-memory storage engine.
#[derive(Default)]
pub struct MemoryEngine {
    state: Mutex<HashMap<String, CollectionData>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently stored in a collection.
    pub fn len(&self, collection: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.get(collection).map_or(0, |c| c.documents.len())
    }

    /// Whether a collection holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Whether an index with the given name exists.
    pub fn has_index(&self, collection: &str, name: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .get(collection)
            .map_or(false, |c| c.indexes.contains_key(name))
    }
}

fn duplicate_key_error(collection: &str, index: &IndexMeta, name: &str, value: &Value) -> StorageError {
    StorageError::DuplicateKey {
        message: format!(
            "E11000 duplicate key error collection: docwarden.{} index: {} dup key: {{ {}: {} }}",
            collection, name, index.field, value
        ),
    }
}

/// Check a candidate document against every unique index.
///
/// `exclude_id` skips the document being rewritten by an update.
fn check_unique(
    collection: &str,
    data: &CollectionData,
    candidate: &Value,
    exclude_id: Option<&str>,
) -> StorageResult<()> {
    for (name, index) in &data.indexes {
        if !index.unique {
            continue;
        }
        // Sparse indexes skip documents without the field; non-sparse
        // ones key missing/null values together, like a real engine.
        let value = match resolve_path(candidate, &index.field) {
            Some(v) if !v.is_null() => Some(v),
            _ if index.sparse => continue,
            _ => None,
        };

        let collision = data.documents.iter().any(|(id, doc)| {
            if exclude_id == Some(id.as_str()) {
                return false;
            }
            let existing = resolve_path(doc, &index.field).filter(|v| !v.is_null());
            match (value, existing) {
                (Some(candidate_value), Some(existing_value)) => {
                    values_equal(existing_value, candidate_value)
                }
                (None, None) => true,
                _ => false,
            }
        });
        if collision {
            return Err(duplicate_key_error(
                collection,
                index,
                name,
                value.unwrap_or(&Value::Null),
            ));
        }
    }
    Ok(())
}

impl StorageEngine for MemoryEngine {
    fn ensure_index(&self, collection: &str, request: IndexRequest) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        let data = state.entry(collection.to_string()).or_default();
        data.indexes.insert(
            request.name,
            IndexMeta {
                field: request.field,
                unique: request.unique,
                sparse: request.sparse,
            },
        );
        Ok(())
    }

    fn drop_index(&self, collection: &str, name: &str) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        let removed = state
            .get_mut(collection)
            .and_then(|data| data.indexes.remove(name));
        match removed {
            Some(_) => Ok(()),
            None => Err(StorageError::IndexNotFound(name.to_string())),
        }
    }

    fn count(&self, collection: &str, selector: &Value) -> StorageResult<u64> {
        let state = self.state.lock().unwrap();
        let Some(data) = state.get(collection) else {
            return Ok(0);
        };
        Ok(data
            .documents
            .values()
            .filter(|doc| matches(doc, selector))
            .count() as u64)
    }

    fn find_one(&self, collection: &str, selector: &Value) -> StorageResult<Option<Value>> {
        let state = self.state.lock().unwrap();
        let Some(data) = state.get(collection) else {
            return Ok(None);
        };
        Ok(data
            .documents
            .values()
            .find(|doc| matches(doc, selector))
            .cloned())
    }

    fn find(&self, collection: &str, selector: &Value) -> StorageResult<Vec<Value>> {
        let state = self.state.lock().unwrap();
        let Some(data) = state.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(data
            .documents
            .values()
            .filter(|doc| matches(doc, selector))
            .cloned()
            .collect())
    }

    fn insert(&self, collection: &str, document: Value) -> StorageResult<String> {
        let mut doc = match document {
            Value::Object(_) => document,
            _ => {
                return Err(StorageError::Engine(
                    "only object documents can be stored".into(),
                ))
            }
        };

        let existing_id = match doc.get("_id") {
            Some(Value::String(id)) => Some(id.clone()),
            Some(other) => {
                return Err(StorageError::Engine(format!(
                    "document _id must be a string, got {}",
                    other
                )))
            }
            None => None,
        };
        let id = existing_id.unwrap_or_else(|| {
            let id = Uuid::new_v4().to_string();
            if let Some(obj) = doc.as_object_mut() {
                obj.insert("_id".to_string(), Value::String(id.clone()));
            }
            id
        });

        let mut state = self.state.lock().unwrap();
        let data = state.entry(collection.to_string()).or_default();

        if data.documents.contains_key(&id) {
            let meta = IndexMeta {
                field: "_id".into(),
                unique: true,
                sparse: false,
            };
            return Err(duplicate_key_error(
                collection,
                &meta,
                "_id_",
                &Value::String(id),
            ));
        }
        check_unique(collection, data, &doc, None)?;

        data.documents.insert(id.clone(), doc);
        Ok(id)
    }

    fn update(
        &self,
        collection: &str,
        selector: &Value,
        modifier: &Value,
        options: &UpdateOptions,
    ) -> StorageResult<UpdateOutcome> {
        let mut state = self.state.lock().unwrap();
        let data = state.entry(collection.to_string()).or_default();

        let matched_ids: Vec<String> = data
            .documents
            .iter()
            .filter(|(_, doc)| matches(doc, selector))
            .map(|(id, _)| id.clone())
            .collect();

        if matched_ids.is_empty() {
            if !options.upsert {
                return Ok(UpdateOutcome::default());
            }
            let mut doc = build_upsert_document(selector, modifier)?;
            let existing_id = match doc.get("_id") {
                Some(Value::String(id)) => Some(id.clone()),
                _ => None,
            };
            let id = existing_id.unwrap_or_else(|| {
                let id = Uuid::new_v4().to_string();
                if let Some(obj) = doc.as_object_mut() {
                    obj.insert("_id".to_string(), Value::String(id.clone()));
                }
                id
            });
            check_unique(collection, data, &doc, None)?;
            data.documents.insert(id.clone(), doc);
            return Ok(UpdateOutcome {
                matched: 0,
                modified: 0,
                upserted_id: Some(id),
            });
        }

        let targets: Vec<String> = if options.multi {
            matched_ids
        } else {
            matched_ids.into_iter().take(1).collect()
        };

        // Apply to clones first so a constraint violation midway leaves
        // the collection untouched.
        let mut staged: Vec<(String, Value, bool)> = Vec::with_capacity(targets.len());
        for id in &targets {
            let mut doc = data.documents.get(id).cloned().unwrap_or_else(|| {
                Value::Object(Map::new())
            });
            let changed = apply(&mut doc, modifier, false)?;
            match doc.get("_id") {
                Some(Value::String(new_id)) if new_id == id => {}
                _ => {
                    return Err(StorageError::InvalidModifier(
                        "_id is immutable".into(),
                    ));
                }
            }
            staged.push((id.clone(), doc, changed));
        }

        for (id, doc, _) in &staged {
            check_unique(collection, data, doc, Some(id))?;
        }
        // Same-batch collisions: two matched documents adopting one value.
        for (i, (_, doc_a, _)) in staged.iter().enumerate() {
            for (_, doc_b, _) in staged.iter().skip(i + 1) {
                for (name, index) in &data.indexes {
                    if !index.unique {
                        continue;
                    }
                    let a = resolve_path(doc_a, &index.field);
                    let b = resolve_path(doc_b, &index.field);
                    if let (Some(a), Some(b)) = (a, b) {
                        if !a.is_null() && values_equal(a, b) {
                            return Err(duplicate_key_error(collection, index, name, a));
                        }
                    }
                }
            }
        }

        let mut modified = 0;
        let matched = staged.len() as u64;
        for (id, doc, changed) in staged {
            if changed {
                modified += 1;
            }
            data.documents.insert(id, doc);
        }

        Ok(UpdateOutcome {
            matched,
            modified,
            upserted_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine_with_unique_code() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine
            .ensure_index(
                "items",
                IndexRequest {
                    name: "dw_code".into(),
                    field: "code".into(),
                    unique: true,
                    sparse: true,
                    background: true,
                    kind: None,
                },
            )
            .unwrap();
        engine
    }

    #[test]
    fn test_insert_generates_id() {
        let engine = MemoryEngine::new();
        let id = engine.insert("items", json!({ "a": 1 })).unwrap();
        assert!(!id.is_empty());
        let stored = engine.find_one("items", &json!({ "a": 1 })).unwrap().unwrap();
        assert_eq!(stored["_id"], json!(id));
    }

    #[test]
    fn test_unique_index_enforced_on_insert() {
        let engine = engine_with_unique_code();
        engine.insert("items", json!({ "code": "X" })).unwrap();
        let err = engine.insert("items", json!({ "code": "X" })).unwrap_err();
        assert!(err.is_duplicate_key());
        assert!(err.to_string().contains("dw_code"));
    }

    #[test]
    fn test_unique_index_ignores_missing_values() {
        let engine = engine_with_unique_code();
        engine.insert("items", json!({ "a": 1 })).unwrap();
        engine.insert("items", json!({ "a": 2 })).unwrap();
        assert_eq!(engine.len("items"), 2);
    }

    #[test]
    fn test_update_applies_modifier() {
        let engine = MemoryEngine::new();
        engine.insert("items", json!({ "status": "open", "n": 1 })).unwrap();
        let outcome = engine
            .update(
                "items",
                &json!({ "status": "open" }),
                &json!({ "$inc": { "n": 1 } }),
                &UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.modified, 1);
        let doc = engine.find_one("items", &json!({ "status": "open" })).unwrap().unwrap();
        assert_eq!(doc["n"], json!(2));
    }

    #[test]
    fn test_update_multi() {
        let engine = MemoryEngine::new();
        engine.insert("items", json!({ "s": "a" })).unwrap();
        engine.insert("items", json!({ "s": "a" })).unwrap();
        let outcome = engine
            .update(
                "items",
                &json!({ "s": "a" }),
                &json!({ "$set": { "s": "b" } }),
                &UpdateOptions { multi: true, upsert: false },
            )
            .unwrap();
        assert_eq!(outcome.matched, 2);
        assert_eq!(engine.count("items", &json!({ "s": "b" })).unwrap(), 2);
    }

    #[test]
    fn test_update_unique_violation_rolls_back() {
        let engine = engine_with_unique_code();
        engine.insert("items", json!({ "code": "X", "k": 1 })).unwrap();
        engine.insert("items", json!({ "code": "Y", "k": 2 })).unwrap();

        let err = engine
            .update(
                "items",
                &json!({ "k": 2 }),
                &json!({ "$set": { "code": "X" } }),
                &UpdateOptions::default(),
            )
            .unwrap_err();
        assert!(err.is_duplicate_key());
        // The original value survives.
        assert_eq!(engine.count("items", &json!({ "code": "Y" })).unwrap(), 1);
    }

    #[test]
    fn test_multi_update_same_value_collides() {
        let engine = engine_with_unique_code();
        engine.insert("items", json!({ "s": "a", "code": "P" })).unwrap();
        engine.insert("items", json!({ "s": "a", "code": "Q" })).unwrap();

        let err = engine
            .update(
                "items",
                &json!({ "s": "a" }),
                &json!({ "$set": { "code": "Z" } }),
                &UpdateOptions { multi: true, upsert: false },
            )
            .unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[test]
    fn test_upsert_inserts_with_selector_fields() {
        let engine = MemoryEngine::new();
        let outcome = engine
            .update(
                "items",
                &json!({ "status": "open" }),
                &json!({ "$set": { "code": "X" } }),
                &UpdateOptions { multi: false, upsert: true },
            )
            .unwrap();
        let id = outcome.upserted_id.unwrap();
        let doc = engine.find_one("items", &json!({ "_id": id })).unwrap().unwrap();
        assert_eq!(doc["status"], json!("open"));
        assert_eq!(doc["code"], json!("X"));
    }

    #[test]
    fn test_id_immutable() {
        let engine = MemoryEngine::new();
        let id = engine.insert("items", json!({ "a": 1 })).unwrap();
        let result = engine.update(
            "items",
            &json!({ "_id": id }),
            &json!({ "$set": { "_id": "other" } }),
            &UpdateOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_drop_missing_index() {
        let engine = MemoryEngine::new();
        let result = engine.drop_index("items", "dw_ghost");
        assert!(matches!(result, Err(StorageError::IndexNotFound(_))));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let engine = MemoryEngine::new();
        engine.insert("items", json!({ "_id": "one" })).unwrap();
        let err = engine.insert("items", json!({ "_id": "one" })).unwrap_err();
        assert!(err.is_duplicate_key());
    }
}
