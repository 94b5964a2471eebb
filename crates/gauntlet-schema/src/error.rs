//! Error types for schema handling

/// Errors raised while interpreting a schema definition itself.
///
/// These are distinct from validation *violations*: a broken schema document
/// is a caller bug and is classified non-retryable by the core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    /// The JSON-Schema document failed to compile
    #[error("invalid schema definition: {0}")]
    InvalidDefinition(String),

    /// A native type could not be turned into a schema document
    #[error("schema derivation failed: {0}")]
    DerivationFailed(String),
}
