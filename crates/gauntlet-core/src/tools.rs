//! Tool abstraction and registry
//!
//! A tool is a named, schema-typed capability the executor can invoke. The
//! registry is the single lookup point; tools are registered once at
//! assembly time and shared across concurrent runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use gauntlet_schema::{Schema, TypedSchema};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;

/// A named executable capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Human-readable description, shown to the planner.
    fn description(&self) -> &str;

    /// Grouping label.
    fn category(&self) -> &str {
        "general"
    }

    /// Schema the input document must satisfy.
    fn input_schema(&self) -> Schema {
        Schema::Typed(TypedSchema::Any)
    }

    /// Free-form auxiliary details (version, provenance, cost hints).
    fn metadata(&self) -> Option<Value> {
        None
    }

    /// Run the tool.
    ///
    /// # Errors
    /// Returns a message describing the failure; the registry wraps it into
    /// a failed [`ToolResult`] so callers can decide whether to retry.
    async fn execute(&self, input: Value) -> Result<Value, String>;
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool ran to completion
    pub success: bool,
    /// Tool output on success
    pub output: Option<Value>,
    /// Failure message on failure
    pub error: Option<String>,
    /// Invocation latency in milliseconds
    pub latency_ms: u64,
    /// Auxiliary details carried over from the tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    /// A successful result.
    #[inline]
    #[must_use]
    pub fn ok(output: Value, latency_ms: u64) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            latency_ms,
            metadata: None,
        }
    }

    /// A failed result.
    #[inline]
    #[must_use]
    pub fn failed(error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            latency_ms,
            metadata: None,
        }
    }

    /// Attach auxiliary details.
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, metadata: Option<Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether the failure came from input-schema validation, before the
    /// tool ran. Retrying the same input cannot change the outcome.
    #[must_use]
    pub fn input_rejected(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(INPUT_REJECTED))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Metadata key marking a result rejected by input validation.
const INPUT_REJECTED: &str = "input_rejected";

/// Descriptive snapshot of a registered tool, as shown to the planner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    /// Tool name
    pub name: String,
    /// Description
    pub description: String,
    /// Grouping label
    pub category: String,
    /// Input schema
    pub schema: Schema,
    /// Auxiliary details, if the tool declares any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolSpec {
    fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            category: tool.category().to_string(),
            schema: tool.input_schema(),
            metadata: tool.metadata(),
        }
    }
}

/// Shared table of registered tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// Re-registering a tool whose name, description, category and input
    /// schema all match the existing entry is a no-op, so assembly code may
    /// run more than once.
    ///
    /// # Errors
    /// Returns [`AgentError::ToolConflict`] when the name is taken by a tool
    /// with a different definition.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        let mut tools = self.tools.write();
        if let Some(existing) = tools.get(&name) {
            if ToolSpec::of(existing.as_ref()) == ToolSpec::of(tool.as_ref()) {
                return Ok(());
            }
            return Err(AgentError::ToolConflict(name));
        }
        tools.insert(name, tool);
        Ok(())
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Specs of all registered tools, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<ToolSpec> {
        let tools = self.tools.read();
        let mut specs: Vec<_> = tools.values().map(|t| ToolSpec::of(t.as_ref())).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Invoke a tool, validating the input against its schema first.
    ///
    /// Failures come back as a failed [`ToolResult`]: a tool that runs and
    /// fails keeps its own error message, and input that does not fit the
    /// schema short-circuits with [`ToolResult::input_rejected`] set so the
    /// caller knows not to retry. Only an unknown tool is an error.
    ///
    /// # Errors
    /// [`AgentError::ToolNotFound`].
    pub async fn execute(&self, name: &str, input: Value) -> Result<ToolResult, AgentError> {
        let Some(tool) = self.get(name) else {
            return Err(AgentError::ToolNotFound(name.to_string()));
        };

        let schema = tool.input_schema();
        let check = gauntlet_schema::validate(&input, &schema)?;
        if !check.valid {
            let detail = check
                .errors
                .first()
                .map_or_else(|| "input rejected".to_string(), |v| v.message.clone());
            return Ok(
                ToolResult::failed(format!("invalid input for {name}: {detail}"), 0)
                    .with_metadata(Some(serde_json::json!({ INPUT_REJECTED: true }))),
            );
        }

        let started = Instant::now();
        let outcome = tool.execute(input).await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        Ok(match outcome {
            Ok(output) => ToolResult::ok(output, latency_ms),
            Err(message) => ToolResult::failed(message, latency_ms),
        }
        .with_metadata(tool.metadata()))
    }
}
