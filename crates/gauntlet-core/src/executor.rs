//! Single-step execution
//!
//! Runs one plan step to completion: invoke the tool (or the provider for
//! toolless steps), classify failures, retry with backoff, and record every
//! attempt in the trace. One trace chain per step:
//! `tool_call -> error -> retry -> tool_call -> ...`, ending at the node the
//! next step chains from.

use std::time::Instant;

use gauntlet_trace::{EdgeKind, NodeId, StepId, TraceData, TraceNode};
use serde::Serialize;
use serde_json::Value;

use crate::context::RunContext;
use crate::error::AgentError;
use crate::events::RunEvent;
use crate::plan::PlanStep;
use crate::retry::RetryController;
use crate::tools::ToolResult;

/// Record of one tool invocation attempt within a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    /// Tool name, or "completion" for toolless steps
    pub tool: String,
    /// 1-based attempt number
    pub attempt: u32,
    /// The invocation outcome
    pub result: ToolResult,
}

/// Final outcome of one plan step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    /// Step identifier
    pub step_id: StepId,
    /// Planner-assigned step name
    pub name: String,
    /// Whether the step produced an output
    pub success: bool,
    /// Output of the successful attempt
    pub output: Option<Value>,
    /// Every attempt made, in order
    pub tool_calls: Vec<ToolCall>,
    /// Messages of the failures encountered, in order
    pub errors: Vec<String>,
    /// Attempts beyond the first
    pub retries: u32,
    /// Wall-clock time spent on the step, in milliseconds
    pub latency_ms: u64,
}

impl StepResult {
    /// Result for a step that was never executed because a dependency failed.
    #[must_use]
    pub fn dependency_failure(step: &PlanStep, dependency: StepId) -> Self {
        let error = AgentError::DependencyFailed(dependency);
        Self {
            step_id: step.id,
            name: step.name.clone(),
            success: false,
            output: None,
            tool_calls: Vec::new(),
            errors: vec![error.to_string()],
            retries: 0,
            latency_ms: 0,
        }
    }
}

/// A finished step plus the trace node the next step chains from.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// The step's result
    pub result: StepResult,
    /// Last trace node of the step's chain
    pub tail: NodeId,
}

/// Executes one step at a time; stateless apart from the retry policy.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    retry: RetryController,
}

impl StepExecutor {
    /// Create an executor with the given retry policy.
    #[inline]
    #[must_use]
    pub fn new(retry: RetryController) -> Self {
        Self { retry }
    }

    /// Run a step to completion.
    ///
    /// Never returns an error: failures, cancellation and deadline expiry
    /// all end up inside the [`StepResult`] so the run can account for the
    /// step either way.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        step: &PlanStep,
        input: Value,
        parent: NodeId,
    ) -> StepOutcome {
        let started = Instant::now();
        let mut tool_calls = Vec::new();
        let mut errors = Vec::new();
        let mut attempt = 1u32;
        let mut tail = parent;
        let mut output = None;

        loop {
            if let Err(guard) = ctx.checkpoint() {
                errors.push(guard.to_string());
                tail = self.record_error(ctx, step, tail, &guard, attempt);
                break;
            }

            let attempt_outcome = match &step.tool {
                // A tool outside the run's tool set does not exist for this run.
                Some(tool) if !ctx.config.allows_tool(tool) => {
                    Err(AgentError::ToolNotFound(tool.clone()))
                }
                Some(tool) => {
                    self.run_tool(ctx, step, tool, &input, attempt, &mut tail, &mut tool_calls)
                        .await
                }
                None => {
                    self.run_completion(ctx, step, &input, attempt, &mut tail, &mut tool_calls)
                        .await
                }
            };

            match attempt_outcome {
                Ok(value) => {
                    output = Some(value);
                    break;
                }
                Err(error) => {
                    errors.push(error.to_string());
                    tail = self.record_error(ctx, step, tail, &error, attempt);

                    if !self.retry.should_retry(attempt, &error) {
                        break;
                    }
                    let delay = self.retry.next_delay(attempt);
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    ctx.events.emit(RunEvent::RetryScheduled {
                        step: step.id,
                        attempt,
                        delay_ms,
                    });
                    let retry_node = TraceNode::new(TraceData::Retry { attempt, delay_ms })
                        .with_step(step.id);
                    tail = record_child(ctx, retry_node, tail, EdgeKind::Retry).unwrap_or(tail);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }

        let result = StepResult {
            step_id: step.id,
            name: step.name.clone(),
            success: output.is_some(),
            output,
            tool_calls,
            errors,
            retries: attempt.saturating_sub(1),
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        StepOutcome { result, tail }
    }

    /// One tool-backed attempt.
    async fn run_tool(
        &self,
        ctx: &RunContext,
        step: &PlanStep,
        tool: &str,
        input: &Value,
        attempt: u32,
        tail: &mut NodeId,
        tool_calls: &mut Vec<ToolCall>,
    ) -> Result<Value, AgentError> {
        let result = ctx.registry.execute(tool, input.clone()).await?;

        let node = TraceNode::new(TraceData::ToolCall {
            tool: tool.to_string(),
            attempt,
            input: input.clone(),
            output: result.output.clone(),
            success: result.success,
        })
        .with_step(step.id)
        .with_latency(result.latency_ms);
        *tail = record_child(ctx, node, *tail, EdgeKind::Success).unwrap_or(*tail);

        let outcome = if result.success {
            Ok(result.output.clone().unwrap_or(Value::Null))
        } else {
            let message = result
                .error
                .clone()
                .unwrap_or_else(|| "tool failed".to_string());
            // Rejected input fails the same way on every attempt.
            Err(if result.input_rejected() {
                AgentError::InvalidInput(message)
            } else {
                AgentError::ToolExecution(message)
            })
        };
        tool_calls.push(ToolCall {
            tool: tool.to_string(),
            attempt,
            result,
        });
        outcome
    }

    /// One provider-backed attempt for a step without a tool.
    async fn run_completion(
        &self,
        ctx: &RunContext,
        step: &PlanStep,
        input: &Value,
        attempt: u32,
        tail: &mut NodeId,
        tool_calls: &mut Vec<ToolCall>,
    ) -> Result<Value, AgentError> {
        let prompt = completion_prompt(step, input);
        let model = ctx.config.model_config();
        let call_started = Instant::now();
        let response = ctx.provider.complete(&prompt, &model, None).await;
        let latency_ms = u64::try_from(call_started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (result, outcome) = match response {
            Ok(text) => {
                let value = parse_loose(&text);
                (ToolResult::ok(value.clone(), latency_ms), Ok(value))
            }
            Err(err) => (
                ToolResult::failed(err.to_string(), latency_ms),
                Err(AgentError::Provider(err)),
            ),
        };

        let node = TraceNode::new(TraceData::ToolCall {
            tool: "completion".to_string(),
            attempt,
            input: input.clone(),
            output: result.output.clone(),
            success: result.success,
        })
        .with_step(step.id)
        .with_latency(latency_ms);
        *tail = record_child(ctx, node, *tail, EdgeKind::Success).unwrap_or(*tail);

        tool_calls.push(ToolCall {
            tool: "completion".to_string(),
            attempt,
            result,
        });
        outcome
    }

    fn record_error(
        &self,
        ctx: &RunContext,
        step: &PlanStep,
        tail: NodeId,
        error: &AgentError,
        attempt: u32,
    ) -> NodeId {
        let node = TraceNode::new(TraceData::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
            attempts: attempt,
        })
        .with_step(step.id);
        record_child(ctx, node, tail, EdgeKind::Error).unwrap_or(tail)
    }
}

/// Append a node and link it to its parent with a classified edge.
///
/// Trace failures are logged and swallowed: recording must never take a
/// running step down with it.
pub(crate) fn record_child(
    ctx: &RunContext,
    node: TraceNode,
    parent: NodeId,
    kind: EdgeKind,
) -> Option<NodeId> {
    let id = match ctx.recorder.record_node(ctx.run_id, node) {
        Ok(id) => id,
        Err(err) => {
            tracing::warn!(run_id = %ctx.run_id, %err, "trace node dropped");
            return None;
        }
    };
    if let Err(err) = ctx
        .recorder
        .record_edge(ctx.run_id, parent, id, None, Some(kind))
    {
        tracing::warn!(run_id = %ctx.run_id, %err, "trace edge dropped");
    }
    Some(id)
}

fn completion_prompt(step: &PlanStep, input: &Value) -> String {
    let mut prompt = format!("Complete this step of a larger task.\n\nStep: {}", step.description);
    if let Some(expected) = &step.expected_output {
        prompt.push_str("\nExpected output: ");
        prompt.push_str(expected);
    }
    if !input.is_null() {
        prompt.push_str("\nContext:\n");
        prompt.push_str(&input.to_string());
    }
    prompt
}

/// Parse provider text as JSON when possible, else keep it as a string.
fn parse_loose(text: &str) -> Value {
    serde_json::from_str(text.trim()).unwrap_or_else(|_| Value::String(text.trim().to_string()))
}
