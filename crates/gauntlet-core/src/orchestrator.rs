//! Run orchestration
//!
//! [`AgentExecutor`] owns one run at a time and drives it through the state
//! machine: plan, execute steps in dependency order with bounded fan-out,
//! validate the aggregated output, repair if needed, and seal the trace.
//! Cancellation and the deadline are checked at every suspension point; work
//! already in flight finishes and is recorded.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use gauntlet_trace::{EdgeKind, NodeId, StepId, TraceData, TraceNode, TraceRecorder};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinSet;

use crate::config::AgentConfig;
use crate::context::RunContext;
use crate::error::AgentError;
use crate::events::{EventSink, RunEvent};
use crate::executor::{record_child, StepExecutor, StepOutcome, StepResult};
use crate::metrics::RunMetrics;
use crate::plan::{Plan, PlanStep};
use crate::planner::{PlanContext, Planner};
use crate::provider::CompletionProvider;
use crate::repair::RepairEngine;
use crate::retry::RetryController;
use crate::run::{validate_transition, AgentRun, RunFailure, RunResult, RunState};
use crate::tools::ToolRegistry;

/// What a finished drive phase hands to finalization.
struct Driven {
    terminal: RunState,
    output: Option<Value>,
    failure: Option<RunFailure>,
    compliance: u8,
    steps: Vec<StepResult>,
}

impl Driven {
    fn failed(stage: RunState, error: &AgentError, steps: Vec<StepResult>) -> Self {
        let terminal = if matches!(error, AgentError::Cancelled) {
            RunState::Cancelled
        } else {
            RunState::Failed
        };
        Self {
            terminal,
            output: None,
            failure: Some(RunFailure::at(stage, error)),
            compliance: 0,
            steps,
        }
    }
}

/// Drives one run at a time through the control loop.
pub struct AgentExecutor {
    config: Arc<AgentConfig>,
    provider: Arc<dyn CompletionProvider>,
    registry: Arc<ToolRegistry>,
    recorder: Arc<TraceRecorder>,
    state: Arc<RwLock<RunState>>,
    cancelled: Arc<AtomicBool>,
    events: EventSink,
}

impl std::fmt::Debug for AgentExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentExecutor")
            .field("state", &self.status())
            .finish_non_exhaustive()
    }
}

impl AgentExecutor {
    /// Assemble an executor.
    ///
    /// # Errors
    /// Returns [`AgentError::Config`] for an invalid configuration.
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn CompletionProvider>,
        registry: Arc<ToolRegistry>,
        recorder: Arc<TraceRecorder>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            provider,
            registry,
            recorder,
            state: Arc::new(RwLock::new(RunState::Idle)),
            cancelled: Arc::new(AtomicBool::new(false)),
            events: EventSink::new(),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> RunState {
        *self.state.read()
    }

    /// Request cancellation.
    ///
    /// Takes effect at the next suspension point; in-flight work finishes
    /// and its outcome is still recorded.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Subscribe to progress events, replacing any previous subscriber.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<RunEvent> {
        self.events.subscribe()
    }

    /// Run a task to a terminal state.
    ///
    /// # Errors
    /// Returns [`AgentError::IllegalTransition`] when the executor is not
    /// idle; every other condition ends up inside the [`RunResult`].
    pub async fn execute(&self, task: impl Into<String>) -> Result<RunResult, AgentError> {
        self.begin()?;

        let mut run = AgentRun::new(task, (*self.config).clone());
        run.state = RunState::Planning;
        run.started_at = Some(Utc::now());
        self.recorder.start_run(run.id)?;

        let started = Instant::now();
        let ctx = RunContext::new(
            run.id,
            Arc::clone(&self.config),
            Arc::clone(&self.provider),
            Arc::clone(&self.registry),
            Arc::clone(&self.recorder),
            self.events.clone(),
            Arc::clone(&self.cancelled),
        );

        let driven = self.drive(&ctx, &run.task).await;
        Ok(self.finish(run, driven, started))
    }

    /// Atomically claim the idle executor.
    fn begin(&self) -> Result<(), AgentError> {
        let mut state = self.state.write();
        validate_transition(*state, RunState::Planning)?;
        *state = RunState::Planning;
        drop(state);
        self.events.emit(RunEvent::StateChanged {
            from: RunState::Idle,
            to: RunState::Planning,
        });
        Ok(())
    }

    fn transition(&self, to: RunState) {
        let mut state = self.state.write();
        let from = *state;
        debug_assert!(from.can_transition_to(to), "{from} -> {to}");
        *state = to;
        drop(state);
        self.events.emit(RunEvent::StateChanged { from, to });
    }

    /// The run body: planning through validation and repair.
    async fn drive(&self, ctx: &RunContext, task: &str) -> Driven {
        // Planning.
        if let Err(guard) = ctx.checkpoint() {
            return Driven::failed(RunState::Planning, &guard, Vec::new());
        }

        let planner = Planner::new(Arc::clone(&ctx.provider), Arc::clone(&ctx.registry))
            .with_allowed_tools(ctx.config.tools.clone());
        let plan = match planner
            .generate_plan(task, &PlanContext::new(), &ctx.config.model_config())
            .await
        {
            Ok(plan) => plan,
            Err(error) => {
                self.record_root_error(ctx, &error);
                return Driven::failed(RunState::Planning, &error, Vec::new());
            }
        };

        let plan_node = match ctx.recorder.record_node(
            ctx.run_id,
            TraceNode::new(TraceData::Plan {
                task: task.to_string(),
                step_count: plan.len(),
                confidence: plan.confidence,
            }),
        ) {
            Ok(id) => id,
            Err(err) => {
                let error = AgentError::Trace(err);
                return Driven::failed(RunState::Planning, &error, Vec::new());
            }
        };
        ctx.events.emit(RunEvent::PlanReady {
            step_count: plan.len(),
            revision: plan.revision,
        });

        // The budget is enforced up front: an oversized plan never starts.
        if plan.len() > ctx.config.max_steps as usize {
            let error = AgentError::StepBudgetExceeded {
                planned: plan.len(),
                budget: ctx.config.max_steps,
            };
            self.record_error(ctx, plan_node, &error);
            return Driven::failed(RunState::Planning, &error, Vec::new());
        }

        // Execution.
        self.transition(RunState::Executing);
        let (steps, guard, last_tail) = self.run_steps(ctx, &plan, plan_node).await;

        if let Err(error) = guard {
            self.record_error(ctx, plan_node, &error);
            return Driven::failed(RunState::Executing, &error, steps);
        }

        // A run without a single successful leaf has nothing to deliver.
        let leaves = leaf_steps(&plan);
        let leaf_results: Vec<&StepResult> = steps
            .iter()
            .filter(|r| leaves.contains(&r.step_id))
            .collect();
        if leaf_results.iter().all(|r| !r.success) {
            let message = leaf_results
                .iter()
                .flat_map(|r| r.errors.last())
                .next_back()
                .cloned()
                .unwrap_or_else(|| "no step produced an output".to_string());
            let failure = RunFailure {
                stage: RunState::Executing,
                kind: "steps_failed".to_string(),
                message,
            };
            return Driven {
                terminal: RunState::Failed,
                output: None,
                failure: Some(failure),
                compliance: 0,
                steps,
            };
        }

        let mut output = aggregate_output(&plan, &leaf_results);

        // Validation and repair.
        let mut compliance = 100u8;
        if let Some(schema) = &ctx.config.output_schema {
            self.transition(RunState::Validating);
            let check = match gauntlet_schema::validate(&output, schema) {
                Ok(check) => check,
                Err(err) => {
                    let error = AgentError::from(err);
                    self.record_error(ctx, last_tail, &error);
                    return Driven::failed(RunState::Validating, &error, steps);
                }
            };
            let validation_node = record_child(
                ctx,
                TraceNode::new(TraceData::Validation {
                    valid: check.valid,
                    score: check.score,
                    error_count: check.errors.len(),
                }),
                last_tail,
                EdgeKind::Success,
            )
            .unwrap_or(last_tail);
            ctx.events.emit(RunEvent::ValidationCompleted {
                valid: check.valid,
                score: check.score,
            });
            compliance = check.score;

            if !check.valid {
                if !ctx.config.repair.enabled {
                    let error = AgentError::SchemaViolation {
                        violations: check.errors,
                    };
                    self.record_error(ctx, validation_node, &error);
                    return Driven::failed(RunState::Validating, &error, steps);
                }

                self.transition(RunState::Repairing);
                let engine = RepairEngine::new();
                match engine.repair(ctx, &output, schema, validation_node).await {
                    Ok((repair, repair_tail)) => {
                        if repair.success {
                            output = repair.value;
                            compliance = repair.score;
                        } else {
                            let error = AgentError::RepairExhausted {
                                attempts: repair.attempts,
                            };
                            self.record_error(ctx, repair_tail, &error);
                            return Driven {
                                terminal: RunState::Failed,
                                output: None,
                                failure: Some(RunFailure::at(RunState::Repairing, &error)),
                                compliance: repair.score,
                                steps,
                            };
                        }
                    }
                    Err(error) => {
                        self.record_error(ctx, validation_node, &error);
                        return Driven::failed(RunState::Repairing, &error, steps);
                    }
                }
            }
        }

        Driven {
            terminal: RunState::Completed,
            output: Some(output),
            failure: None,
            compliance,
            steps,
        }
    }

    /// Dependency-ordered step scheduling with bounded fan-out.
    ///
    /// Returns every accounted step plus the guard condition that stopped
    /// scheduling early, if any.
    async fn run_steps(
        &self,
        ctx: &RunContext,
        plan: &Plan,
        plan_node: NodeId,
    ) -> (Vec<StepResult>, Result<(), AgentError>, NodeId) {
        let executor = StepExecutor::new(RetryController::new(ctx.config.retry.clone()));
        let by_id: HashMap<StepId, &PlanStep> =
            plan.steps.iter().map(|s| (s.id, s)).collect();

        let mut unscheduled: Vec<StepId> = plan.steps.iter().map(|s| s.id).collect();
        let mut outputs: HashMap<StepId, Value> = HashMap::new();
        let mut failed: HashSet<StepId> = HashSet::new();
        let mut tails: HashMap<StepId, NodeId> = HashMap::new();
        let mut results: Vec<StepResult> = Vec::new();
        let mut running: JoinSet<StepOutcome> = JoinSet::new();
        let mut guard: Result<(), AgentError> = Ok(());
        let mut last_tail = plan_node;

        loop {
            // Steps whose dependencies failed are absorbed, not executed.
            let mut absorbed = true;
            while absorbed {
                absorbed = false;
                unscheduled.retain(|id| {
                    let step = by_id[id];
                    match step
                        .depends_on
                        .iter()
                        .copied()
                        .find(|dep| failed.contains(dep))
                    {
                        Some(dep) => {
                            let result = StepResult::dependency_failure(step, dep);
                            self.record_error(
                                ctx,
                                tails.get(&dep).copied().unwrap_or(plan_node),
                                &AgentError::DependencyFailed(dep),
                            );
                            ctx.events.emit(RunEvent::StepFinished {
                                step: step.id,
                                success: false,
                            });
                            failed.insert(step.id);
                            results.push(result);
                            absorbed = true;
                            false
                        }
                        None => true,
                    }
                });
            }

            if unscheduled.is_empty() && running.is_empty() {
                break;
            }

            // Dispatch while the guard holds and fan-out capacity remains.
            if guard.is_ok() {
                if let Err(err) = ctx.checkpoint() {
                    guard = Err(err);
                }
            }
            if guard.is_ok() {
                let ready: Vec<StepId> = unscheduled
                    .iter()
                    .copied()
                    .filter(|id| {
                        by_id[id]
                            .depends_on
                            .iter()
                            .all(|dep| outputs.contains_key(dep))
                    })
                    .collect();
                for id in ready {
                    if running.len() >= ctx.config.fan_out {
                        break;
                    }
                    let step = by_id[&id].clone();
                    let input = derive_input(&step, &outputs, &by_id);
                    let parent = step
                        .depends_on
                        .last()
                        .and_then(|dep| tails.get(dep).copied())
                        .unwrap_or(plan_node);
                    ctx.events.emit(RunEvent::StepStarted {
                        step: step.id,
                        name: step.name.clone(),
                    });
                    unscheduled.retain(|s| *s != id);
                    let ctx = ctx.clone();
                    let executor = executor.clone();
                    running
                        .spawn(async move { executor.execute(&ctx, &step, input, parent).await });
                }
            } else if running.is_empty() {
                // Nothing in flight and no new dispatch: the guard decides.
                break;
            }

            match running.join_next().await {
                Some(Ok(outcome)) => {
                    let result = outcome.result;
                    ctx.events.emit(RunEvent::StepFinished {
                        step: result.step_id,
                        success: result.success,
                    });
                    tails.insert(result.step_id, outcome.tail);
                    last_tail = outcome.tail;
                    if result.success {
                        outputs.insert(
                            result.step_id,
                            result.output.clone().unwrap_or(Value::Null),
                        );
                    } else {
                        failed.insert(result.step_id);
                    }
                    results.push(result);
                }
                Some(Err(join_error)) => {
                    tracing::error!(%join_error, "step task panicked");
                    guard = Err(AgentError::ToolExecution(join_error.to_string()));
                }
                None => {
                    if guard.is_err() {
                        break;
                    }
                    // No task in flight and nothing became ready: every
                    // remaining step waits on a dependency that can no
                    // longer complete.
                    if !unscheduled.is_empty() {
                        break;
                    }
                }
            }
        }

        (results, guard, last_tail)
    }

    /// Record an error node chained from `parent`.
    fn record_error(&self, ctx: &RunContext, parent: NodeId, error: &AgentError) {
        let node = TraceNode::new(TraceData::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
            attempts: 0,
        });
        record_child(ctx, node, parent, EdgeKind::Error);
    }

    /// Record a planning failure as the trace root.
    fn record_root_error(&self, ctx: &RunContext, error: &AgentError) {
        let node = TraceNode::new(TraceData::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
            attempts: 0,
        });
        if let Err(err) = ctx.recorder.record_node(ctx.run_id, node) {
            tracing::warn!(run_id = %ctx.run_id, %err, "trace node dropped");
        }
    }

    /// Settle the run record, seal the trace and emit the final event.
    fn finish(&self, mut run: AgentRun, driven: Driven, started: Instant) -> RunResult {
        let total_latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let metrics = RunMetrics::compute(&driven.steps, driven.compliance, total_latency_ms);

        self.transition(driven.terminal);
        run.state = driven.terminal;
        run.finished_at = Some(Utc::now());
        run.metrics = Some(metrics.clone());

        let metrics_value = serde_json::to_value(&metrics).unwrap_or(Value::Null);
        if let Err(err) = self.recorder.end_run(run.id, &metrics_value) {
            tracing::warn!(run_id = %run.id, %err, "trace seal reported an error");
        }
        self.events.emit(RunEvent::RunFinished {
            run: run.id,
            state: driven.terminal,
        });

        RunResult {
            run,
            output: driven.output,
            step_results: driven.steps,
            failure: driven.failure,
        }
    }
}

/// Steps no other step depends on.
fn leaf_steps(plan: &Plan) -> HashSet<StepId> {
    let mut leaves: HashSet<StepId> = plan.steps.iter().map(|s| s.id).collect();
    for step in &plan.steps {
        for dep in &step.depends_on {
            leaves.remove(dep);
        }
    }
    leaves
}

/// Final output: a single successful leaf passes through unwrapped,
/// several are keyed by step name.
fn aggregate_output(plan: &Plan, leaf_results: &[&StepResult]) -> Value {
    let successful: Vec<&&StepResult> = leaf_results.iter().filter(|r| r.success).collect();
    match successful.as_slice() {
        [] => Value::Null,
        [only] => only.output.clone().unwrap_or(Value::Null),
        many => {
            let mut object = serde_json::Map::new();
            for result in many {
                let name = plan
                    .step(result.step_id)
                    .map_or_else(|| result.name.clone(), |s| s.name.clone());
                object.insert(name, result.output.clone().unwrap_or(Value::Null));
            }
            Value::Object(object)
        }
    }
}

/// Input for a step: the planner's literal input wins, otherwise the outputs
/// of its dependencies keyed by step name.
fn derive_input(
    step: &PlanStep,
    outputs: &HashMap<StepId, Value>,
    by_id: &HashMap<StepId, &PlanStep>,
) -> Value {
    if let Some(input) = &step.input {
        return input.clone();
    }
    if step.depends_on.is_empty() {
        return Value::Null;
    }
    let mut object = serde_json::Map::new();
    for dep in &step.depends_on {
        let name = by_id.get(dep).map_or_else(String::new, |s| s.name.clone());
        object.insert(name, outputs.get(dep).cloned().unwrap_or(Value::Null));
    }
    Value::Object(object)
}
