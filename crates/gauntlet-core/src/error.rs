//! Error taxonomy for the control loop
//!
//! Classification drives control flow: retryable errors re-enter the retry
//! loop, schema violations enter repair when enabled, and everything else is
//! fatal for its step or for the whole run. Every error is trace-recorded
//! before it propagates.

use gauntlet_schema::Violation;
use gauntlet_trace::{StepId, TraceError};

use crate::plan::RawStepId;
use crate::provider::ProviderError;
use crate::run::RunState;

/// Top-level error type of the control loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    /// The planner produced a malformed, empty or cyclic plan
    #[error("planning failed: {0}")]
    Planner(#[from] PlanError),

    /// A step referenced a tool that is not registered or not allowed
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// A tool invocation failed
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// A step's derived input did not satisfy the tool's input schema
    #[error("invalid tool input: {0}")]
    InvalidInput(String),

    /// A value failed schema validation
    #[error("schema violation: {} error(s)", violations.len())]
    SchemaViolation {
        /// Structured violations
        violations: Vec<Violation>,
    },

    /// Repair consumed its attempt budget without a valid result
    #[error("repair exhausted after {attempts} attempt(s)")]
    RepairExhausted {
        /// Attempts made
        attempts: u32,
    },

    /// The plan needs more steps than the configured budget
    #[error("step budget exceeded: plan has {planned} steps, budget is {budget}")]
    StepBudgetExceeded {
        /// Steps the plan requires
        planned: usize,
        /// Configured `max_steps`
        budget: u32,
    },

    /// The wall-clock deadline expired
    #[error("run timed out after {elapsed_ms}ms (budget {budget_ms}ms)")]
    Timeout {
        /// Elapsed milliseconds when the expiry was observed
        elapsed_ms: u64,
        /// Configured budget
        budget_ms: u64,
    },

    /// The run was cancelled; a distinct outcome, not a fault
    #[error("run cancelled")]
    Cancelled,

    /// A step was skipped because a dependency failed
    #[error("dependency {0} failed")]
    DependencyFailed(StepId),

    /// The completion provider failed
    #[error("completion provider failed: {0}")]
    Provider(#[from] ProviderError),

    /// The schema definition itself is broken
    #[error("schema definition error: {0}")]
    SchemaDefinition(String),

    /// A tool was re-registered with a different definition
    #[error("tool already registered with a different definition: {0}")]
    ToolConflict(String),

    /// Invalid run configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The run state machine rejected a transition
    #[error("illegal state transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state
        from: RunState,
        /// Requested state
        to: RunState,
    },

    /// Trace recording failed
    #[error("trace recording failed: {0}")]
    Trace(#[from] TraceError),
}

impl AgentError {
    /// Whether the retry controller may re-attempt after this error.
    ///
    /// Only transient execution failures qualify; planner errors, unknown
    /// tools, schema problems and budget conditions never do.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ToolExecution(_) => true,
            Self::Provider(provider) => provider.is_retryable(),
            _ => false,
        }
    }

    /// Stable kind tag used in trace error nodes and caller-facing reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Planner(_) => "planner_error",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::ToolExecution(_) => "tool_execution",
            Self::InvalidInput(_) => "invalid_input",
            Self::SchemaViolation { .. } => "schema_violation",
            Self::RepairExhausted { .. } => "repair_exhausted",
            Self::StepBudgetExceeded { .. } => "step_budget_exceeded",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::DependencyFailed(_) => "dependency_failed",
            Self::Provider(_) => "provider_error",
            Self::SchemaDefinition(_) => "schema_definition",
            Self::ToolConflict(_) => "tool_conflict",
            Self::Config(_) => "config_error",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::Trace(_) => "trace_error",
        }
    }
}

impl From<gauntlet_schema::SchemaError> for AgentError {
    fn from(err: gauntlet_schema::SchemaError) -> Self {
        Self::SchemaDefinition(err.to_string())
    }
}

/// Plan validation errors.
///
/// These are fatal and never retried inside the planner; whether the
/// orchestrator re-plans is its own policy decision.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// The planner returned zero steps
    #[error("planner returned no steps")]
    Empty,

    /// Two steps share an id
    #[error("duplicate step id: {0}")]
    DuplicateStep(RawStepId),

    /// A dependency references an id that is not in the plan
    #[error("step {step} references unknown dependency {dependency}")]
    UnknownDependency {
        /// Referencing step
        step: RawStepId,
        /// Missing dependency id
        dependency: RawStepId,
    },

    /// A dependency references a step that appears later in the plan.
    /// Backward-only references also rule out dependency cycles.
    #[error("step {step} references later step {dependency}")]
    ForwardDependency {
        /// Referencing step
        step: RawStepId,
        /// Later step id
        dependency: RawStepId,
    },

    /// The provider's plan response was not parseable JSON
    #[error("planner returned invalid JSON: {0}")]
    Json(String),
}
