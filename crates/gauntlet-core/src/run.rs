//! Run lifecycle: states, transitions and the run record
//!
//! The state machine is a closed transition table. Every state change goes
//! through [`validate_transition`]; terminal states have no outgoing edges
//! and cancellation is reachable from every live state.

use chrono::{DateTime, Utc};
use gauntlet_trace::RunId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::executor::StepResult;
use crate::metrics::RunMetrics;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, not yet started
    Idle,
    /// Producing a plan
    Planning,
    /// Executing plan steps
    Executing,
    /// Validating the aggregated output
    Validating,
    /// Repairing schema-invalid output
    Repairing,
    /// Finished successfully (terminal)
    Completed,
    /// Finished with a failure (terminal)
    Failed,
    /// Cancelled by request (terminal)
    Cancelled,
}

impl RunState {
    /// Whether the run can no longer change state.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// States reachable from this one.
    #[must_use]
    pub fn allowed_transitions(&self) -> Vec<RunState> {
        match self {
            Self::Idle => vec![Self::Planning, Self::Cancelled],
            Self::Planning => vec![Self::Executing, Self::Failed, Self::Cancelled],
            Self::Executing => vec![
                Self::Validating,
                Self::Completed,
                Self::Failed,
                Self::Cancelled,
            ],
            Self::Validating => vec![
                Self::Repairing,
                Self::Completed,
                Self::Failed,
                Self::Cancelled,
            ],
            Self::Repairing => vec![Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => vec![],
        }
    }

    /// Whether `to` is reachable in one step.
    #[inline]
    #[must_use]
    pub fn can_transition_to(&self, to: RunState) -> bool {
        self.allowed_transitions().contains(&to)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Validating => "validating",
            Self::Repairing => "repairing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Check a state transition against the table.
///
/// # Errors
/// Returns [`AgentError::IllegalTransition`] when `from` does not allow `to`.
pub fn validate_transition(from: RunState, to: RunState) -> Result<(), AgentError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(AgentError::IllegalTransition { from, to })
    }
}

/// Durable record of one run.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRun {
    /// Run identifier, also the trace key
    pub id: RunId,
    /// The task as submitted
    pub task: String,
    /// Configuration the run was created with
    pub config: AgentConfig,
    /// Final (or current) state
    pub state: RunState,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// When execution began
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal state was reached
    pub finished_at: Option<DateTime<Utc>>,
    /// Aggregate metrics, present once the run finishes
    pub metrics: Option<RunMetrics>,
}

impl AgentRun {
    /// Create an idle run record.
    #[must_use]
    pub fn new(task: impl Into<String>, config: AgentConfig) -> Self {
        Self {
            id: RunId::new(),
            task: task.into(),
            config,
            state: RunState::Idle,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            metrics: None,
        }
    }
}

/// Why a run ended in `Failed` or `Cancelled`.
#[derive(Debug, Clone, Serialize)]
pub struct RunFailure {
    /// State the run was in when the failure was decided
    pub stage: RunState,
    /// Stable error kind tag
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

impl RunFailure {
    /// Capture an error at a given stage.
    #[must_use]
    pub fn at(stage: RunState, error: &AgentError) -> Self {
        Self {
            stage,
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// Everything a caller gets back from a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// The run record, in its terminal state
    pub run: AgentRun,
    /// Final output; present only for completed runs
    pub output: Option<Value>,
    /// Per-step results in completion order
    pub step_results: Vec<StepResult>,
    /// Failure details for failed or cancelled runs
    pub failure: Option<RunFailure>,
}

impl RunResult {
    /// Whether the run completed successfully.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.run.state == RunState::Completed
    }
}
