//! Schema definitions in JSON form
//!
//! A schema can be attached either as a ready `Schema` instance or as a raw
//! JSON definition document:
//!
//! ```json
//! {
//!   "fields": {
//!     "name": { "type": "string" },
//!     "age": { "type": "int", "optional": true },
//!     "code": { "type": "string", "unique": true, "index": 1 },
//!     "tags": { "type": "array", "element_type": { "type": "string" } }
//!   }
//! }
//! ```
//!
//! `index` accepts `true`/`1` (ascending), `-1` (descending), a string
//! (engine-specific kind), or `false` (drop a previously created index).
//! Auto-value functions cannot be expressed in JSON; attach them via the
//! builder API.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use super::errors::{SchemaError, SchemaResult};
use super::types::{FieldDef, FieldType, IndexSpec, Schema};

#[derive(Debug, Deserialize)]
struct SchemaDefinition {
    fields: BTreeMap<String, FieldDefinition>,
}

#[derive(Debug, Deserialize)]
struct FieldDefinition {
    #[serde(flatten)]
    type_def: TypeDef,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    index: Option<IndexSpecDef>,
    #[serde(default)]
    unique: bool,
    #[serde(default, alias = "denyInsert")]
    deny_insert: bool,
    #[serde(default, alias = "denyUpdate")]
    deny_update: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TypeDef {
    String,
    Int,
    Float,
    Bool,
    Date,
    Id,
    Object {
        fields: BTreeMap<String, FieldDefinition>,
    },
    Array {
        element_type: Box<TypeDef>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IndexSpecDef {
    Flag(bool),
    Direction(i64),
    Kind(String),
}

impl From<IndexSpecDef> for IndexSpec {
    fn from(def: IndexSpecDef) -> Self {
        match def {
            IndexSpecDef::Flag(true) => IndexSpec::Ascending,
            IndexSpecDef::Flag(false) => IndexSpec::Disabled,
            IndexSpecDef::Direction(n) if n < 0 => IndexSpec::Descending,
            IndexSpecDef::Direction(_) => IndexSpec::Ascending,
            IndexSpecDef::Kind(kind) => IndexSpec::Typed(kind),
        }
    }
}

fn convert_type(def: TypeDef) -> FieldType {
    match def {
        TypeDef::String => FieldType::String,
        TypeDef::Int => FieldType::Int,
        TypeDef::Float => FieldType::Float,
        TypeDef::Bool => FieldType::Bool,
        TypeDef::Date => FieldType::Date,
        TypeDef::Id => FieldType::Id,
        TypeDef::Object { fields } => FieldType::Object {
            fields: convert_fields(fields),
        },
        TypeDef::Array { element_type } => FieldType::Array {
            element_type: Box::new(convert_type(*element_type)),
        },
    }
}

fn convert_field(def: FieldDefinition) -> FieldDef {
    FieldDef {
        field_type: convert_type(def.type_def),
        optional: def.optional,
        label: def.label,
        index: def.index.map(IndexSpec::from),
        unique: def.unique,
        deny_insert: def.deny_insert,
        deny_update: def.deny_update,
        auto_value: None,
    }
}

fn convert_fields(fields: BTreeMap<String, FieldDefinition>) -> BTreeMap<String, FieldDef> {
    fields
        .into_iter()
        .map(|(name, def)| (name, convert_field(def)))
        .collect()
}

impl Schema {
    /// Parse a schema from a JSON definition document.
    pub fn from_json(definition: &Value) -> SchemaResult<Self> {
        let parsed: SchemaDefinition = serde_json::from_value(definition.clone())
            .map_err(|e| SchemaError::malformed(e.to_string()))?;
        Schema::from_fields(convert_fields(parsed.fields))
    }

    /// Parse a schema from a JSON definition string.
    pub fn from_json_str(definition: &str) -> SchemaResult<Self> {
        let parsed: SchemaDefinition = serde_json::from_str(definition)
            .map_err(|e| SchemaError::malformed(e.to_string()))?;
        Schema::from_fields(convert_fields(parsed.fields))
    }

    /// Load a schema definition from a JSON file.
    pub fn from_file(path: &Path) -> SchemaResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SchemaError::malformed(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_basic_definition() {
        let schema = Schema::from_json(&json!({
            "fields": {
                "name": { "type": "string" },
                "age": { "type": "int", "optional": true },
                "code": { "type": "string", "unique": true, "index": 1 }
            }
        }))
        .unwrap();

        assert!(schema.allows_key("name"));
        let code = schema.field_definition("code").unwrap();
        assert!(code.unique);
        assert_eq!(code.index, Some(IndexSpec::Ascending));
        assert!(schema.field_definition("age").unwrap().optional);
    }

    #[test]
    fn test_parse_index_variants() {
        let schema = Schema::from_json(&json!({
            "fields": {
                "a": { "type": "string", "index": true },
                "b": { "type": "string", "index": -1 },
                "c": { "type": "string", "index": "text" },
                "d": { "type": "string", "index": false }
            }
        }))
        .unwrap();

        assert_eq!(schema.field_definition("a").unwrap().index, Some(IndexSpec::Ascending));
        assert_eq!(schema.field_definition("b").unwrap().index, Some(IndexSpec::Descending));
        assert_eq!(
            schema.field_definition("c").unwrap().index,
            Some(IndexSpec::Typed("text".into()))
        );
        assert_eq!(schema.field_definition("d").unwrap().index, Some(IndexSpec::Disabled));
    }

    #[test]
    fn test_parse_nested_and_array() {
        let schema = Schema::from_json(&json!({
            "fields": {
                "address": {
                    "type": "object",
                    "fields": {
                        "city": { "type": "string" },
                        "zip": { "type": "string", "optional": true }
                    }
                },
                "tags": { "type": "array", "element_type": { "type": "string" } }
            }
        }))
        .unwrap();

        assert!(schema.allows_key("address.city"));
        assert!(schema.allows_key("tags"));
    }

    #[test]
    fn test_parse_deny_flag_aliases() {
        let schema = Schema::from_json(&json!({
            "fields": {
                "a": { "type": "date", "denyUpdate": true },
                "b": { "type": "date", "deny_insert": true }
            }
        }))
        .unwrap();
        assert!(schema.field_definition("a").unwrap().deny_update);
        assert!(schema.field_definition("b").unwrap().deny_insert);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = Schema::from_json(&json!({
            "fields": { "x": { "type": "decimal" } }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_fields_key_rejected() {
        let result = Schema::from_json(&json!({ "schema": {} }));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        fs::write(
            &path,
            r#"{ "fields": { "name": { "type": "string" } } }"#,
        )
        .unwrap();

        let schema = Schema::from_file(&path).unwrap();
        assert!(schema.allows_key("name"));
    }
}
