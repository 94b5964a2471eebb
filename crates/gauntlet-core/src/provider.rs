//! Completion provider seam
//!
//! The planner, toolless steps and the repair engine all consult an abstract
//! completion capability. Its internals are opaque to the core; failures are
//! classified so the retry controller can tell transient from fatal.

use async_trait::async_trait;
use gauntlet_schema::Schema;

use crate::config::ModelConfig;

/// Failures surfaced by a completion provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Transport-level failure; transient
    #[error("network failure: {0}")]
    Network(String),

    /// The provider did not answer in time; transient
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The provider answered with something unusable; not transient
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Whether a retry may reasonably succeed.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

/// An opaque text-completion capability.
///
/// Implementations may call a remote model, a local one, or a scripted stub;
/// the core only sees prompt in, text out.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Complete a prompt.
    ///
    /// `schema`, when present, describes the structure the caller expects
    /// back; providers may use it to constrain decoding but the core always
    /// re-validates.
    ///
    /// # Errors
    /// Returns a classified [`ProviderError`] on failure.
    async fn complete(
        &self,
        prompt: &str,
        model: &ModelConfig,
        schema: Option<&Schema>,
    ) -> Result<String, ProviderError>;
}
