//! Schema descriptors and validation.
//!
//! Each record type registers a static [`EntitySchema`] mapping field names to
//! storage keys and kinds. The schema drives payload validation, the storage
//! representation of wrapped scalar lists, and key-path resolution for
//! queries.

use crate::{
    error::Result,
    record::{Document, ACL_KEY, ID_KEY, METADATA_KEY},
    CollectionName, Entity, Error, SchemaVersion,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Field holding the element of a wrapped scalar carrier.
pub const WRAPPED_VALUE_KEY: &str = "value";

/// Kinds of scalar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
}

impl ScalarKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            ScalarKind::String => value.is_string(),
            ScalarKind::Int => value.is_i64() || value.is_u64(),
            ScalarKind::Float => value.is_number(),
            ScalarKind::Bool => value.is_boolean(),
            ScalarKind::Timestamp => value.is_string() || value.is_i64() || value.is_u64(),
        }
    }
}

impl std::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarKind::String => write!(f, "String"),
            ScalarKind::Int => write!(f, "Int"),
            ScalarKind::Float => write!(f, "Float"),
            ScalarKind::Bool => write!(f, "Bool"),
            ScalarKind::Timestamp => write!(f, "Timestamp"),
        }
    }
}

/// Storage kind of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    Scalar(ScalarKind),
    /// Arbitrary nested JSON
    Json,
    /// Array of scalars stored as-is
    List(ScalarKind),
    /// Array of scalars stored as single-field carriers (`{"value": x}`)
    WrappedList(ScalarKind),
    /// Nested sub-record
    Embedded(Box<EntitySchema>),
    /// Array of nested sub-records
    EmbeddedList(Box<EntitySchema>),
}

impl FieldKind {
    /// Whether values of this kind are stored behind wrapped-scalar carriers.
    pub fn is_wrapped(&self) -> bool {
        matches!(self, FieldKind::WrappedList(_))
    }

    /// Nested schema for embedded kinds.
    pub fn nested(&self) -> Option<&EntitySchema> {
        match self {
            FieldKind::Embedded(schema) | FieldKind::EmbeddedList(schema) => Some(&**schema),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Scalar(kind) => write!(f, "{kind}"),
            FieldKind::Json => write!(f, "Json"),
            FieldKind::List(kind) => write!(f, "List<{kind}>"),
            FieldKind::WrappedList(kind) => write!(f, "WrappedList<{kind}>"),
            FieldKind::Embedded(schema) => write!(f, "{}", schema.name),
            FieldKind::EmbeddedList(schema) => write!(f, "List<{}>", schema.name),
        }
    }
}

/// Definition of a field in a record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name used in queries
    pub name: String,
    /// Key the field is stored and transmitted under
    pub storage_key: String,
    /// Field kind
    pub kind: FieldKind,
    /// Whether this field is required
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            storage_key: name.clone(),
            name,
            kind,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    /// Store the field under a different key than its name.
    pub fn stored_as(mut self, storage_key: impl Into<String>) -> Self {
        self.storage_key = storage_key.into();
        self
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None | Some(Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            None | Some(Value::Null) => Ok(()),
            Some(v) => self.validate_kind(v),
        }
    }

    fn validate_kind(&self, value: &Value) -> Result<()> {
        let valid = match &self.kind {
            FieldKind::Scalar(kind) => kind.accepts(value),
            FieldKind::Json => true,
            FieldKind::List(kind) | FieldKind::WrappedList(kind) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|item| kind.accepts(item))),
            FieldKind::Embedded(schema) => match value.as_object() {
                Some(nested) => return schema.validate_payload(nested),
                None => false,
            },
            FieldKind::EmbeddedList(schema) => match value.as_array() {
                Some(items) => {
                    for item in items {
                        let nested = item.as_object().ok_or_else(|| self.mismatch(item))?;
                        schema.validate_payload(nested)?;
                    }
                    true
                }
                None => false,
            },
        };

        if valid {
            Ok(())
        } else {
            Err(self.mismatch(value))
        }
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::TypeMismatch {
            field: self.name.clone(),
            expected: self.kind.to_string(),
            got: json_type_name(value).to_string(),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// A key path resolved against a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath<'a> {
    /// Dotted path of storage keys
    pub storage_path: String,
    /// Kind of the last segment, when every segment is declared
    pub kind: Option<&'a FieldKind>,
}

/// Schema descriptor for one record type (or one embedded sub-record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySchema {
    /// Collection name, or type name for embedded schemas
    pub name: CollectionName,
    /// Field definitions
    pub fields: Vec<FieldDef>,
}

impl EntitySchema {
    /// Create the schema of a collection.
    ///
    /// The reserved `id`, `metadata` and `acl` fields are added unless the
    /// caller declares them explicitly.
    pub fn new(name: impl Into<CollectionName>, fields: Vec<FieldDef>) -> Self {
        let mut schema = Self::embedded(name, fields);
        let reserved = [
            FieldDef::optional("id", FieldKind::Scalar(ScalarKind::String)).stored_as(ID_KEY),
            FieldDef::optional("metadata", FieldKind::Embedded(Box::new(metadata_schema())))
                .stored_as(METADATA_KEY),
            FieldDef::optional("acl", FieldKind::Json).stored_as(ACL_KEY),
        ];
        for field in reserved.into_iter().rev() {
            if schema.field_by_storage_key(&field.storage_key).is_none() {
                schema.fields.insert(0, field);
            }
        }
        schema
    }

    /// Create the schema of an embedded sub-record (no reserved fields).
    pub fn embedded(name: impl Into<CollectionName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Collection (or type) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a field by its query name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field by its storage key.
    pub fn field_by_storage_key(&self, key: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.storage_key == key)
    }

    /// Whether any field, at any depth, is a wrapped scalar list.
    pub fn has_wrapped_fields(&self) -> bool {
        self.fields.iter().any(|f| {
            f.kind.is_wrapped() || f.kind.nested().is_some_and(EntitySchema::has_wrapped_fields)
        })
    }

    /// Validate a payload against this schema.
    pub fn validate_payload(&self, payload: &Document) -> Result<()> {
        for field in &self.fields {
            field.validate(payload.get(&field.storage_key))?;
        }
        Ok(())
    }

    /// Resolve a dotted key path (field names or storage keys) to storage keys.
    ///
    /// Segments past an undeclared field are passed through unchanged.
    pub fn resolve_key_path(&self, path: &str) -> ResolvedPath<'_> {
        let mut storage = Vec::new();
        let mut schema = Some(self);
        let mut kind = None;

        for segment in path.split('.') {
            let field = schema
                .and_then(|s| s.field(segment).or_else(|| s.field_by_storage_key(segment)));
            match field {
                Some(field) => {
                    storage.push(field.storage_key.as_str());
                    kind = Some(&field.kind);
                    schema = field.kind.nested();
                }
                None => {
                    storage.push(segment);
                    kind = None;
                    schema = None;
                }
            }
        }

        ResolvedPath {
            storage_path: storage.join("."),
            kind,
        }
    }

    /// Convert a document to its storage representation (wrap scalar lists).
    pub fn to_storage(&self, mut document: Document) -> Document {
        for field in &self.fields {
            if let Some(value) = document.get_mut(&field.storage_key) {
                convert_value(&field.kind, value, Direction::Wrap);
            }
        }
        document
    }

    /// Convert a stored document back to its logical representation.
    pub fn from_storage(&self, mut document: Document) -> Document {
        for field in &self.fields {
            if let Some(value) = document.get_mut(&field.storage_key) {
                convert_value(&field.kind, value, Direction::Unwrap);
            }
        }
        document
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Wrap,
    Unwrap,
}

fn convert_value(kind: &FieldKind, value: &mut Value, direction: Direction) {
    match (kind, value) {
        (FieldKind::WrappedList(_), Value::Array(items)) => {
            for item in items.iter_mut() {
                let inner = item.take();
                *item = match direction {
                    Direction::Wrap => {
                        let mut carrier = serde_json::Map::new();
                        carrier.insert(WRAPPED_VALUE_KEY.to_string(), inner);
                        Value::Object(carrier)
                    }
                    Direction::Unwrap => match inner {
                        Value::Object(mut carrier) => carrier
                            .remove(WRAPPED_VALUE_KEY)
                            .unwrap_or(Value::Null),
                        other => other,
                    },
                };
            }
        }
        (FieldKind::Embedded(schema), Value::Object(nested)) => {
            convert_object(schema, nested, direction);
        }
        (FieldKind::EmbeddedList(schema), Value::Array(items)) => {
            for item in items.iter_mut() {
                if let Value::Object(nested) = item {
                    convert_object(schema, nested, direction);
                }
            }
        }
        _ => {}
    }
}

fn convert_object(schema: &EntitySchema, nested: &mut Document, direction: Direction) {
    let taken = std::mem::take(nested);
    *nested = match direction {
        Direction::Wrap => schema.to_storage(taken),
        Direction::Unwrap => schema.from_storage(taken),
    };
}

fn metadata_schema() -> EntitySchema {
    EntitySchema::embedded(
        "Metadata",
        vec![
            FieldDef::optional("lmt", FieldKind::Scalar(ScalarKind::Timestamp)),
            FieldDef::optional("ect", FieldKind::Scalar(ScalarKind::Timestamp)),
        ],
    )
}

/// Schema for the entire store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Schema version for migrations
    pub version: SchemaVersion,
    /// Collection schemas by name
    pub collections: HashMap<CollectionName, EntitySchema>,
}

impl Schema {
    /// Create a new schema.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            collections: HashMap::new(),
        }
    }

    /// Add a collection to the schema.
    pub fn add_collection(&mut self, collection: EntitySchema) -> &mut Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    /// Builder-style method to add a collection.
    pub fn with_collection(mut self, collection: EntitySchema) -> Self {
        self.add_collection(collection);
        self
    }

    /// Builder-style method to register a record type.
    pub fn with_entity<T: Entity>(self) -> Self {
        self.with_collection(T::schema().clone())
    }

    /// Get a collection schema by name.
    pub fn get_collection(&self, name: &str) -> Option<&EntitySchema> {
        self.collections.get(name)
    }

    /// Get a collection schema by name, or fail.
    pub fn collection(&self, name: &str) -> Result<&EntitySchema> {
        self.get_collection(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn author_schema() -> EntitySchema {
        EntitySchema::embedded(
            "Author",
            vec![
                FieldDef::required("name", FieldKind::Scalar(ScalarKind::String)),
                FieldDef::optional("aliases", FieldKind::WrappedList(ScalarKind::String)),
            ],
        )
    }

    fn book_schema() -> EntitySchema {
        EntitySchema::new(
            "books",
            vec![
                FieldDef::required("title", FieldKind::Scalar(ScalarKind::String)),
                FieldDef::optional("pages", FieldKind::Scalar(ScalarKind::Int)),
                FieldDef::optional("tags", FieldKind::WrappedList(ScalarKind::String)),
                FieldDef::optional("author", FieldKind::Embedded(Box::new(author_schema()))),
                FieldDef::optional("publishedAt", FieldKind::Scalar(ScalarKind::Timestamp))
                    .stored_as("published_at"),
            ],
        )
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn reserved_fields_are_added() {
        let schema = book_schema();
        assert_eq!(schema.field("id").unwrap().storage_key, "_id");
        assert_eq!(schema.field("metadata").unwrap().storage_key, "_kmd");
        assert_eq!(schema.field("acl").unwrap().storage_key, "_acl");
        assert_eq!(schema.fields.len(), 8);
    }

    #[test]
    fn validate_valid_payload() {
        let schema = book_schema();
        let payload = doc(json!({"title": "Dune", "pages": 412, "tags": ["sf"]}));
        assert!(schema.validate_payload(&payload).is_ok());
    }

    #[test]
    fn validate_missing_required_field() {
        let schema = book_schema();
        let result = schema.validate_payload(&doc(json!({"pages": 1})));
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "title"));
    }

    #[test]
    fn validate_wrong_type() {
        let schema = book_schema();
        let result = schema.validate_payload(&doc(json!({"title": "Dune", "pages": "many"})));
        assert!(matches!(result, Err(Error::TypeMismatch { field, .. }) if field == "pages"));
    }

    #[test]
    fn validate_list_elements() {
        let schema = book_schema();
        let result = schema.validate_payload(&doc(json!({"title": "Dune", "tags": ["sf", 3]})));
        assert!(matches!(result, Err(Error::TypeMismatch { field, .. }) if field == "tags"));
    }

    #[test]
    fn validate_embedded() {
        let schema = book_schema();
        let result = schema.validate_payload(&doc(json!({"title": "Dune", "author": {}})));
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "name"));
    }

    #[test]
    fn storage_roundtrip_wraps_nested_lists() {
        let schema = book_schema();
        let logical = doc(json!({
            "title": "Dune",
            "tags": ["sf", "classic"],
            "author": {"name": "Frank", "aliases": ["FH"]}
        }));

        let stored = schema.to_storage(logical.clone());
        assert_eq!(stored["tags"], json!([{"value": "sf"}, {"value": "classic"}]));
        assert_eq!(stored["author"]["aliases"], json!([{"value": "FH"}]));

        assert_eq!(schema.from_storage(stored), logical);
    }

    #[test]
    fn resolve_key_paths() {
        let schema = book_schema();

        let resolved = schema.resolve_key_path("metadata.lmt");
        assert_eq!(resolved.storage_path, "_kmd.lmt");

        let resolved = schema.resolve_key_path("publishedAt");
        assert_eq!(resolved.storage_path, "published_at");

        let resolved = schema.resolve_key_path("author.aliases");
        assert_eq!(resolved.storage_path, "author.aliases");
        assert!(resolved.kind.unwrap().is_wrapped());

        let resolved = schema.resolve_key_path("extra.thing");
        assert_eq!(resolved.storage_path, "extra.thing");
        assert!(resolved.kind.is_none());
    }

    #[test]
    fn has_wrapped_fields_looks_into_embedded() {
        let flat = EntitySchema::new(
            "plain",
            vec![FieldDef::optional(
                "nested",
                FieldKind::Embedded(Box::new(author_schema())),
            )],
        );
        assert!(flat.has_wrapped_fields());

        let none = EntitySchema::new(
            "none",
            vec![FieldDef::optional("tags", FieldKind::List(ScalarKind::String))],
        );
        assert!(!none.has_wrapped_fields());
    }

    #[test]
    fn schema_serialization() {
        let schema = Schema::new(1).with_collection(book_schema());
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
    }

    #[test]
    fn unknown_collection() {
        let schema = Schema::new(1);
        assert!(matches!(
            schema.collection("nope"),
            Err(Error::CollectionNotFound(c)) if c == "nope"
        ));
    }
}
