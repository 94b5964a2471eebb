//! Schema validation with compliance scoring
//!
//! Both schema representations converge here: JSON-Schema documents run
//! through the compiled `jsonschema` validator, native schemas run through a
//! structural walk. Either way the caller gets the same [`ValidationResult`].

use jsonschema::{error::ValidationErrorKind, JSONSchema};
use serde_json::Value;

use crate::error::SchemaError;
use crate::schema::{Schema, TypedSchema};

/// A single structured validation violation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Violation {
    /// Slash-separated path to the offending value ("" for the root)
    pub path: String,
    /// Human-readable description
    pub message: String,
    /// What the schema expected at that path, when known
    pub expected: Option<String>,
}

/// Outcome of validating a value against a schema.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationResult {
    /// Whether the value satisfied the schema
    pub valid: bool,
    /// Structured violations (empty when valid)
    pub errors: Vec<Violation>,
    /// Compliance score in 0..=100
    pub score: u8,
}

impl ValidationResult {
    fn from_errors<F>(errors: Vec<Violation>, penalty: F) -> Self
    where
        F: Fn(usize) -> u8,
    {
        if errors.is_empty() {
            Self {
                valid: true,
                errors,
                score: 100,
            }
        } else {
            let score = penalty(errors.len()).min(100);
            Self {
                valid: false,
                errors,
                score,
            }
        }
    }
}

/// Default compliance penalty: `max(0, 100 - 20 * error_count)`.
#[inline]
#[must_use]
pub fn default_penalty(error_count: usize) -> u8 {
    let penalty = error_count.saturating_mul(20).min(100);
    u8::try_from(100 - penalty).unwrap_or(0)
}

/// Validate `data` against `schema` with the default penalty function.
///
/// Pure and deterministic: validating the same value twice yields the same
/// result, and an already-valid value always scores 100.
///
/// # Errors
/// Returns [`SchemaError`] only when the schema definition itself is broken;
/// ordinary violations are reported inside the [`ValidationResult`].
pub fn validate(data: &Value, schema: &Schema) -> Result<ValidationResult, SchemaError> {
    validate_with_penalty(data, schema, default_penalty)
}

/// Validate with a caller-supplied penalty function.
///
/// The penalty maps an error count to a score in 0..=100 and must be pure,
/// since the score feeds directly into run metrics.
///
/// # Errors
/// Returns [`SchemaError`] when the schema definition is invalid.
pub fn validate_with_penalty<F>(
    data: &Value,
    schema: &Schema,
    penalty: F,
) -> Result<ValidationResult, SchemaError>
where
    F: Fn(usize) -> u8,
{
    let errors = match schema {
        Schema::Json(document) => validate_document(data, document)?,
        Schema::Typed(typed) => {
            let mut errors = Vec::new();
            walk_typed(data, typed, "", &mut errors);
            errors
        }
    };
    Ok(ValidationResult::from_errors(errors, penalty))
}

/// Run a JSON-Schema document through the compiled validator.
fn validate_document(data: &Value, document: &Value) -> Result<Vec<Violation>, SchemaError> {
    let compiled = JSONSchema::compile(document)
        .map_err(|e| SchemaError::InvalidDefinition(e.to_string()))?;

    let mut violations = Vec::new();
    if let Err(errors) = compiled.validate(data) {
        for err in errors {
            let (path, expected) = match &err.kind {
                // Surface missing required properties under the property
                // name rather than the (empty) instance path.
                ValidationErrorKind::Required { property } => (
                    join_path(
                        trimmed_path(&err.instance_path.to_string()),
                        property.as_str().unwrap_or_default(),
                    ),
                    Some("required property".to_string()),
                ),
                _ => (
                    trimmed_path(&err.instance_path.to_string()).to_string(),
                    None,
                ),
            };
            violations.push(Violation {
                path,
                message: err.to_string(),
                expected,
            });
        }
    }
    Ok(violations)
}

/// Structural walk over a native schema.
fn walk_typed(value: &Value, schema: &TypedSchema, path: &str, out: &mut Vec<Violation>) {
    match schema {
        TypedSchema::Any => {}
        TypedSchema::String => expect_kind(value.is_string(), value, schema, path, out),
        TypedSchema::Number => expect_kind(value.is_number(), value, schema, path, out),
        TypedSchema::Integer => {
            expect_kind(value.is_i64() || value.is_u64(), value, schema, path, out);
        }
        TypedSchema::Bool => expect_kind(value.is_boolean(), value, schema, path, out),
        TypedSchema::Array(element) => match value.as_array() {
            Some(items) => {
                for (index, item) in items.iter().enumerate() {
                    walk_typed(item, element, &join_path(path, &index.to_string()), out);
                }
            }
            None => push_kind_mismatch(value, schema, path, out),
        },
        TypedSchema::Object(obj) => match value.as_object() {
            Some(map) => {
                for name in &obj.required {
                    if !map.contains_key(name) {
                        let expected = obj.properties.get(name).map(TypedSchema::kind_name);
                        out.push(Violation {
                            path: join_path(path, name),
                            message: format!("missing required property \"{name}\""),
                            expected: expected.map(ToString::to_string),
                        });
                    }
                }
                for (name, property_schema) in &obj.properties {
                    if let Some(property) = map.get(name) {
                        walk_typed(property, property_schema, &join_path(path, name), out);
                    }
                }
            }
            None => push_kind_mismatch(value, schema, path, out),
        },
    }
}

fn expect_kind(
    matched: bool,
    value: &Value,
    schema: &TypedSchema,
    path: &str,
    out: &mut Vec<Violation>,
) {
    if !matched {
        push_kind_mismatch(value, schema, path, out);
    }
}

fn push_kind_mismatch(value: &Value, schema: &TypedSchema, path: &str, out: &mut Vec<Violation>) {
    out.push(Violation {
        path: path.to_string(),
        message: format!("expected {}, got {}", schema.kind_name(), value_kind(value)),
        expected: Some(schema.kind_name().to_string()),
    });
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn trimmed_path(pointer: &str) -> &str {
    pointer.trim_start_matches('/')
}

fn join_path(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{base}/{segment}")
    }
}
