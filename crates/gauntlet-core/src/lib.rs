//! Gauntlet core: the agent reliability control loop
//!
//! Drives a task through planning, dependency-ordered step execution against
//! schema-typed tools, output validation and LLM-assisted repair, bounded
//! retries with backoff, and full causal tracing. The pieces, leaf first:
//!
//! - [`tools`]: named, schema-typed executable capabilities and the registry
//! - [`retry`]: backoff strategies and the retry decision
//! - [`provider`]: the opaque completion-provider seam
//! - [`plan`] / [`planner`]: plan structure and provider-backed planning
//! - [`executor`]: single-step execution with retries and trace capture
//! - [`repair`]: schema-violation repair through the provider
//! - [`orchestrator`]: the run state machine owning all of the above
//!
//! Persistence, HTTP plumbing, auth and rendering are collaborators outside
//! this crate; the completion provider's internals are deliberately opaque.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod metrics;
pub mod orchestrator;
pub mod plan;
pub mod planner;
pub mod provider;
pub mod repair;
pub mod retry;
pub mod run;
pub mod tools;

pub use config::{AgentConfig, ModelConfig, RepairConfig, RetryConfig};
pub use context::RunContext;
pub use error::{AgentError, PlanError};
pub use events::{EventSink, RunEvent};
pub use executor::{StepExecutor, StepOutcome, StepResult, ToolCall};
pub use metrics::RunMetrics;
pub use orchestrator::AgentExecutor;
pub use plan::{Plan, PlanStep};
pub use planner::{PlanContext, Planner};
pub use provider::{CompletionProvider, ProviderError};
pub use repair::{RepairEngine, RepairResult};
pub use retry::{Backoff, RetryController};
pub use run::{AgentRun, RunFailure, RunResult, RunState};
pub use tools::{Tool, ToolRegistry, ToolResult, ToolSpec};

// Re-exported so downstream crates name ids from one place.
pub use gauntlet_trace::{NodeId, RunId, StepId};
