//! Schema type definitions
//!
//! Supported field types:
//! - string: UTF-8 string
//! - int: 64-bit signed integer
//! - float: 64-bit floating point
//! - bool: Boolean
//! - date: RFC 3339 timestamp
//! - id: document identifier (string-shaped, indexed as an id)
//! - object: nested object with its own field schema
//! - array: homogeneous array with an element type
//!
//! Field definitions are immutable after schema construction.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::context::{AutoValue, AutoValueInput};
use super::errors::{SchemaError, SchemaResult};
use super::messages::humanize;

/// Auto-value computation: a pure function of the auto-value input.
pub type AutoValueFn = Arc<dyn Fn(&AutoValueInput<'_>) -> AutoValue + Send + Sync>;

/// Supported field types.
#[derive(Clone)]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// 64-bit signed integer
    Int,
    /// 64-bit floating point
    Float,
    /// Boolean
    Bool,
    /// RFC 3339 timestamp
    Date,
    /// Document identifier
    Id,
    /// Nested object with its own field schema
    Object {
        /// Nested field definitions
        fields: BTreeMap<String, FieldDef>,
    },
    /// Homogeneous array with a single element type
    Array {
        /// Element type (boxed to allow recursive types)
        element_type: Box<FieldType>,
    },
}

impl FieldType {
    /// Returns the type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Date => "date",
            FieldType::Id => "id",
            FieldType::Object { .. } => "object",
            FieldType::Array { .. } => "array",
        }
    }

    /// Whether values of this type can carry a uniqueness constraint.
    pub fn supports_unique(&self) -> bool {
        !matches!(self, FieldType::Object { .. } | FieldType::Array { .. })
    }
}

impl fmt::Debug for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Object { fields } => f.debug_struct("Object").field("fields", fields).finish(),
            FieldType::Array { element_type } => {
                f.debug_struct("Array").field("element_type", element_type).finish()
            }
            other => write!(f, "{}", other.type_name()),
        }
    }
}

/// Index declaration on a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSpec {
    /// Ascending index
    Ascending,
    /// Descending index
    Descending,
    /// Engine-specific index kind (e.g. "text", "2dsphere")
    Typed(String),
    /// Explicitly disabled: a previously created index should be dropped
    Disabled,
}

impl IndexSpec {
    /// Whether this spec yields a queryable index on the storage engine.
    pub fn is_usable(&self) -> bool {
        !matches!(self, IndexSpec::Disabled)
    }
}

/// Per-field declaration.
///
/// Immutable after schema construction; built with the chainable
/// constructors below.
#[derive(Clone)]
pub struct FieldDef {
    /// Field data type
    pub field_type: FieldType,
    /// Whether the field may be absent
    pub optional: bool,
    /// Display label; defaults to a humanized field name
    pub label: Option<String>,
    /// Index declaration, if any
    pub index: Option<IndexSpec>,
    /// Uniqueness constraint across the collection
    pub unique: bool,
    /// Reject this field in insert payloads
    pub deny_insert: bool,
    /// Reject this field in update modifiers
    pub deny_update: bool,
    /// Auto-value computation, if any
    pub auto_value: Option<AutoValueFn>,
}

impl FieldDef {
    fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            optional: false,
            label: None,
            index: None,
            unique: false,
            deny_insert: false,
            deny_update: false,
            auto_value: None,
        }
    }

    /// A required string field.
    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    /// A required int field.
    pub fn int() -> Self {
        Self::new(FieldType::Int)
    }

    /// A required float field.
    pub fn float() -> Self {
        Self::new(FieldType::Float)
    }

    /// A required bool field.
    pub fn boolean() -> Self {
        Self::new(FieldType::Bool)
    }

    /// A required date field.
    pub fn date() -> Self {
        Self::new(FieldType::Date)
    }

    /// A required id field.
    pub fn id() -> Self {
        Self::new(FieldType::Id)
    }

    /// A required nested object field.
    pub fn object(fields: BTreeMap<String, FieldDef>) -> Self {
        Self::new(FieldType::Object { fields })
    }

    /// A required array field with the given element type.
    pub fn array(element_type: FieldType) -> Self {
        Self::new(FieldType::Array {
            element_type: Box::new(element_type),
        })
    }

    /// Mark the field optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Set a display label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Declare an index.
    pub fn indexed(mut self, spec: IndexSpec) -> Self {
        self.index = Some(spec);
        self
    }

    /// Declare a uniqueness constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Reject this field in insert payloads.
    pub fn deny_insert(mut self) -> Self {
        self.deny_insert = true;
        self
    }

    /// Reject this field in update modifiers.
    pub fn deny_update(mut self) -> Self {
        self.deny_update = true;
        self
    }

    /// Attach an auto-value function.
    pub fn auto<F>(mut self, f: F) -> Self
    where
        F: Fn(&AutoValueInput<'_>) -> AutoValue + Send + Sync + 'static,
    {
        self.auto_value = Some(Arc::new(f));
        self
    }

    /// Whether the field carries a usable storage index.
    pub fn has_usable_index(&self) -> bool {
        self.index.as_ref().map_or(false, IndexSpec::is_usable)
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("field_type", &self.field_type)
            .field("optional", &self.optional)
            .field("label", &self.label)
            .field("index", &self.index)
            .field("unique", &self.unique)
            .field("deny_insert", &self.deny_insert)
            .field("deny_update", &self.deny_update)
            .field("auto_value", &self.auto_value.is_some())
            .finish()
    }
}

/// Complete schema definition: an ordered field map.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: BTreeMap<String, FieldDef>,
}

impl Schema {
    /// Start building a schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder {
            fields: BTreeMap::new(),
        }
    }

    pub(crate) fn from_fields(fields: BTreeMap<String, FieldDef>) -> SchemaResult<Self> {
        let schema = Self { fields };
        schema.validate_structure()?;
        Ok(schema)
    }

    /// All top-level field definitions.
    pub fn field_definitions(&self) -> &BTreeMap<String, FieldDef> {
        &self.fields
    }

    /// Look up a field definition by dotted path.
    ///
    /// Descends through nested object types; array element positions are
    /// not addressable.
    pub fn field_definition(&self, path: &str) -> Option<&FieldDef> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut def = self.fields.get(first)?;

        for segment in segments {
            match &def.field_type {
                FieldType::Object { fields } => {
                    def = fields.get(segment)?;
                }
                _ => return None,
            }
        }
        Some(def)
    }

    /// Whether the schema declares the given key.
    pub fn allows_key(&self, path: &str) -> bool {
        self.field_definition(path).is_some()
    }

    /// Display label for a field path.
    pub fn label_for(&self, path: &str) -> String {
        self.field_definition(path)
            .and_then(|def| def.label.clone())
            .unwrap_or_else(|| humanize(path))
    }

    /// Validates the schema structure itself (not a document).
    fn validate_structure(&self) -> SchemaResult<()> {
        if self.fields.is_empty() {
            return Err(SchemaError::structure("schema declares no fields"));
        }
        for (name, def) in &self.fields {
            if name.is_empty() {
                return Err(SchemaError::structure("empty field name"));
            }
            if name.starts_with('$') || name.contains("..") {
                return Err(SchemaError::structure(format!(
                    "invalid field name '{}'",
                    name
                )));
            }
            if def.unique && !def.field_type.supports_unique() {
                return Err(SchemaError::structure(format!(
                    "field '{}' cannot be unique: {} values are not comparable as keys",
                    name,
                    def.field_type.type_name()
                )));
            }
        }
        Ok(())
    }
}

/// Builder for programmatic schema construction.
pub struct SchemaBuilder {
    fields: BTreeMap<String, FieldDef>,
}

impl SchemaBuilder {
    /// Add a field definition.
    pub fn field(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        self.fields.insert(name.into(), def);
        self
    }

    /// Finish, validating schema structure.
    pub fn build(self) -> SchemaResult<Schema> {
        Schema::from_fields(self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::builder()
            .field("name", FieldDef::string())
            .field("age", FieldDef::int().optional())
            .field("code", FieldDef::string().unique())
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_produces_lookup() {
        let schema = sample_schema();
        assert!(schema.allows_key("name"));
        assert!(schema.allows_key("age"));
        assert!(!schema.allows_key("missing"));
        assert!(schema.field_definition("age").unwrap().optional);
    }

    #[test]
    fn test_nested_path_lookup() {
        let mut address = BTreeMap::new();
        address.insert("city".to_string(), FieldDef::string());
        address.insert("zip".to_string(), FieldDef::string().optional());

        let schema = Schema::builder()
            .field("address", FieldDef::object(address))
            .build()
            .unwrap();

        assert!(schema.allows_key("address.city"));
        assert!(schema.allows_key("address.zip"));
        assert!(!schema.allows_key("address.country"));
        assert!(!schema.allows_key("address.city.extra"));
    }

    #[test]
    fn test_empty_schema_rejected() {
        let result = Schema::builder().build();
        assert!(result.is_err());
    }

    #[test]
    fn test_unique_on_object_rejected() {
        let result = Schema::builder()
            .field("meta", FieldDef::object(BTreeMap::new()).unique())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_label_defaults_to_humanized() {
        let schema = Schema::builder()
            .field("firstName", FieldDef::string())
            .field("nick", FieldDef::string().label("Handle"))
            .build()
            .unwrap();
        assert_eq!(schema.label_for("firstName"), "First name");
        assert_eq!(schema.label_for("nick"), "Handle");
    }

    #[test]
    fn test_usable_index() {
        let indexed = FieldDef::string().indexed(IndexSpec::Ascending);
        assert!(indexed.has_usable_index());
        let disabled = FieldDef::string().indexed(IndexSpec::Disabled);
        assert!(!disabled.has_usable_index());
        let plain = FieldDef::string();
        assert!(!plain.has_usable_index());
    }
}
