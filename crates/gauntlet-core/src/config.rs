//! Run configuration
//!
//! [`AgentConfig`] is created once per run and never mutated. The fields
//! here are the complete recognized configuration surface: deserializing a
//! document with unknown fields is rejected, not silently ignored.

use gauntlet_schema::Schema;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::retry::Backoff;

/// Model parameters forwarded to the completion provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Completion-model identifier
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            temperature: 0.2,
        }
    }
}

/// Retry policy for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    /// When false, every operation gets exactly one attempt
    pub enabled: bool,
    /// Total attempt budget per operation (first attempt included)
    pub max_attempts: u32,
    /// Delay growth strategy
    pub backoff: Backoff,
    /// Base delay in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound every strategy clamps to
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            backoff: Backoff::Exponential,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

/// Repair policy for schema-invalid output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RepairConfig {
    /// Whether schema violations enter repair instead of failing outright
    pub enabled: bool,
    /// Attempt cap; falls back to the retry policy's `max_attempts`
    pub max_attempts: Option<u32>,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: None,
        }
    }
}

impl RepairConfig {
    /// Effective attempt cap. An explicit value is still clamped to the
    /// retry policy's `max_attempts` so repair never outlasts retry.
    #[inline]
    #[must_use]
    pub fn effective_max_attempts(&self, retry: &RetryConfig) -> u32 {
        self.max_attempts
            .unwrap_or(retry.max_attempts)
            .min(retry.max_attempts)
            .max(1)
    }
}

/// Immutable per-run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AgentConfig {
    /// Completion-model identifier
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Hard cap on executed plan steps
    pub max_steps: u32,
    /// Tool allowlist; empty means every registered tool is available
    pub tools: Vec<String>,
    /// Schema the final output must satisfy, if any
    pub output_schema: Option<Schema>,
    /// Retry policy
    pub retry: RetryConfig,
    /// Repair policy
    pub repair: RepairConfig,
    /// Wall-clock budget for the whole run, in milliseconds
    pub timeout_ms: u64,
    /// Concurrent dispatch limit for dependency-free steps
    pub fan_out: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            temperature: 0.2,
            max_steps: 10,
            tools: Vec::new(),
            output_schema: None,
            retry: RetryConfig::default(),
            repair: RepairConfig::default(),
            timeout_ms: 120_000,
            fan_out: 4,
        }
    }
}

impl AgentConfig {
    /// Create the default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With model identifier.
    #[inline]
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// With step budget.
    #[inline]
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// With output schema.
    #[inline]
    #[must_use]
    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// With retry policy.
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// With repair policy.
    #[inline]
    #[must_use]
    pub fn with_repair(mut self, repair: RepairConfig) -> Self {
        self.repair = repair;
        self
    }

    /// With run timeout in milliseconds.
    #[inline]
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// With tool allowlist.
    #[inline]
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    /// Whether a tool may be used by this run.
    ///
    /// An empty allowlist admits every registered tool.
    #[must_use]
    pub fn allows_tool(&self, name: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|t| t == name)
    }

    /// Model parameters for provider calls.
    #[inline]
    #[must_use]
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            model: self.model.clone(),
            temperature: self.temperature,
        }
    }

    /// Check the configuration at run creation.
    ///
    /// # Errors
    /// Returns [`AgentError::Config`] for non-positive budgets or limits.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_steps == 0 {
            return Err(AgentError::Config("max_steps must be positive".to_string()));
        }
        if self.fan_out == 0 {
            return Err(AgentError::Config("fan_out must be at least 1".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(AgentError::Config("timeout_ms must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(AgentError::Config(
                "retry.max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
