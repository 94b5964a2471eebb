//! Unified schema representation
//!
//! A [`Schema`] is either a declarative JSON-Schema document or a native
//! [`TypedSchema`] built programmatically. Tools declare their input schemas
//! with either surface; the validator accepts both.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchemaError;

/// A schema in one of the two supported representations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schema {
    /// Declarative JSON-Schema document
    Json(Value),
    /// Native structural schema
    Typed(TypedSchema),
}

impl Schema {
    /// Build a JSON-Schema document from a JSON value.
    #[inline]
    #[must_use]
    pub fn json(document: Value) -> Self {
        Self::Json(document)
    }

    /// Derive a JSON-Schema document from a Rust type.
    ///
    /// # Errors
    /// Returns [`SchemaError::DerivationFailed`] if the generated schema
    /// cannot be represented as a JSON value.
    pub fn of<T: JsonSchema>() -> Result<Self, SchemaError> {
        let root = schemars::gen::SchemaGenerator::default().into_root_schema_for::<T>();
        let document = serde_json::to_value(root)
            .map_err(|e| SchemaError::DerivationFailed(e.to_string()))?;
        Ok(Self::Json(document))
    }

    /// Render the schema as a JSON value for embedding into prompts.
    #[must_use]
    pub fn to_document(&self) -> Value {
        match self {
            Self::Json(document) => document.clone(),
            Self::Typed(typed) => typed.to_document(),
        }
    }
}

impl From<TypedSchema> for Schema {
    fn from(typed: TypedSchema) -> Self {
        Self::Typed(typed)
    }
}

/// Native structural schema.
///
/// Deliberately a closed set of kinds: the validator walks it without any
/// dynamic dispatch and every kind has statically-checked fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypedSchema {
    /// Object with named properties
    Object(ObjectSchema),
    /// Homogeneous array
    Array(Box<TypedSchema>),
    /// UTF-8 string
    String,
    /// Any JSON number
    Number,
    /// Integer-valued number
    Integer,
    /// Boolean
    Bool,
    /// Accepts any value
    Any,
}

impl TypedSchema {
    /// Empty object schema, to be populated with fields.
    #[inline]
    #[must_use]
    pub fn object() -> ObjectSchema {
        ObjectSchema::new()
    }

    /// Array of the given element schema.
    #[inline]
    #[must_use]
    pub fn array(element: TypedSchema) -> Self {
        Self::Array(Box::new(element))
    }

    /// Human-readable kind name, used in violation messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Bool => "boolean",
            Self::Any => "any",
        }
    }

    /// Render as an equivalent JSON-Schema document.
    #[must_use]
    pub fn to_document(&self) -> Value {
        match self {
            Self::Object(obj) => {
                let properties: serde_json::Map<String, Value> = obj
                    .properties
                    .iter()
                    .map(|(name, schema)| (name.clone(), schema.to_document()))
                    .collect();
                serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": obj.required.iter().collect::<Vec<_>>(),
                })
            }
            Self::Array(element) => serde_json::json!({
                "type": "array",
                "items": element.to_document(),
            }),
            Self::String => serde_json::json!({ "type": "string" }),
            Self::Number => serde_json::json!({ "type": "number" }),
            Self::Integer => serde_json::json!({ "type": "integer" }),
            Self::Bool => serde_json::json!({ "type": "boolean" }),
            Self::Any => serde_json::json!({}),
        }
    }
}

/// Object schema: named properties plus the required subset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectSchema {
    /// Property name to schema
    pub properties: BTreeMap<String, TypedSchema>,
    /// Names of required properties
    pub required: BTreeSet<String>,
}

impl ObjectSchema {
    /// Create an empty object schema.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required property.
    #[inline]
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, schema: TypedSchema) -> Self {
        let name = name.into();
        self.required.insert(name.clone());
        self.properties.insert(name, schema);
        self
    }

    /// Add an optional property.
    #[inline]
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, schema: TypedSchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Finish building.
    #[inline]
    #[must_use]
    pub fn build(self) -> TypedSchema {
        TypedSchema::Object(self)
    }
}
