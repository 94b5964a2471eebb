//! Schema representations and validation for Gauntlet
//!
//! Provides the two schema surfaces the sandbox accepts:
//! - Declarative JSON-Schema documents (validated with the `jsonschema` crate)
//! - Native structural schemas built programmatically (`TypedSchema`)
//!
//! Both converge on the same [`ValidationResult`] shape with a deterministic
//! compliance score that feeds run metrics.

pub mod error;
pub mod schema;
pub mod validator;

pub use error::SchemaError;
pub use schema::{ObjectSchema, Schema, TypedSchema};
pub use validator::{
    default_penalty, validate, validate_with_penalty, ValidationResult, Violation,
};
