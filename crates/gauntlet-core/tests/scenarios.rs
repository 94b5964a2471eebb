//! End-to-end control-loop scenarios against scripted collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gauntlet_core::{
    AgentConfig, AgentExecutor, RepairConfig, RunEvent, RunState, Tool, ToolRegistry,
};
use gauntlet_schema::{Schema, TypedSchema};
use gauntlet_test_utils::{
    fixture_config, fixture_registry, single_step_plan, FlakyTool, ScriptedProvider,
};
use gauntlet_trace::{MemoryTraceStorage, TraceRecorder, TraceStorage};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn executor(
    config: AgentConfig,
    provider: ScriptedProvider,
    registry: Arc<ToolRegistry>,
) -> (AgentExecutor, Arc<MemoryTraceStorage>) {
    let storage = Arc::new(MemoryTraceStorage::new());
    let recorder = Arc::new(TraceRecorder::new(
        Arc::clone(&storage) as Arc<dyn TraceStorage>
    ));
    let executor = AgentExecutor::new(config, Arc::new(provider), registry, recorder).unwrap();
    (executor, storage)
}

// Scenario: a one-step calculator task runs clean end to end.
#[tokio::test]
async fn calculator_task_completes() {
    let provider = ScriptedProvider::new()
        .respond(single_step_plan("calculator", &json!({"expression": "2+2"})));
    let (executor, storage) = executor(fixture_config(), provider, fixture_registry());

    let result = executor.execute("what is 2+2?").await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.output, Some(json!({"result": 4})));
    assert_eq!(result.step_results.len(), 1);
    assert!(result.step_results[0].success);
    assert!(result.failure.is_none());

    let metrics = result.run.metrics.unwrap();
    assert_eq!(metrics.successful_steps, 1);
    assert_eq!(metrics.retry_count, 0);
    assert_eq!(metrics.reliability, 100);
    assert_eq!(metrics.tool_usage["calculator"], 1);

    // The sealed trace was persisted with the metrics snapshot.
    let (trace, _) = storage.get(result.run.id).unwrap();
    assert!(trace.sealed);
    assert_eq!(trace.count_kind("plan"), 1);
    assert_eq!(trace.count_kind("tool_call"), 1);
    assert_eq!(trace.count_kind("error"), 0);
}

// Scenario: output missing a required field is repaired in one attempt.
#[tokio::test]
async fn invalid_output_is_repaired() {
    let schema = Schema::Typed(
        TypedSchema::object()
            .required("explanation", TypedSchema::String)
            .build(),
    );
    let provider = ScriptedProvider::new()
        .respond(single_step_plan("echo", &json!({"answer": 4})))
        .respond(r#"{"explanation": "two plus two is four"}"#);
    let config = fixture_config().with_output_schema(schema);
    let (executor, storage) = executor(config, provider, fixture_registry());

    let result = executor.execute("explain 2+2").await.unwrap();

    assert!(result.is_success());
    assert_eq!(
        result.output,
        Some(json!({"explanation": "two plus two is four"}))
    );

    let metrics = result.run.metrics.unwrap();
    assert_eq!(metrics.schema_compliance, 100);

    let (trace, _) = storage.get(result.run.id).unwrap();
    assert_eq!(trace.count_kind("validation"), 1);
    assert_eq!(trace.count_kind("repair"), 1);
}

// Scenario: a tool that never recovers exhausts three fixed-backoff attempts.
#[tokio::test]
async fn persistent_failure_exhausts_retries() {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(FlakyTool::new(u32::MAX))).unwrap();
    let provider =
        ScriptedProvider::new().respond(single_step_plan("flaky", &json!({})));
    let (executor, storage) = executor(fixture_config(), provider, Arc::new(registry));

    let result = executor.execute("doomed").await.unwrap();

    assert_eq!(result.run.state, RunState::Failed);
    assert!(result.output.is_none());
    let failure = result.failure.unwrap();
    assert_eq!(failure.kind, "steps_failed");

    let step = &result.step_results[0];
    assert!(!step.success);
    assert_eq!(step.tool_calls.len(), 3);
    assert_eq!(step.retries, 2);

    let (trace, _) = storage.get(result.run.id).unwrap();
    assert_eq!(trace.count_kind("tool_call"), 3);
    assert_eq!(trace.count_kind("retry"), 2);
    assert!(trace.sealed);
}

/// Sleeps long enough for a cancel to land while it runs.
struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "takes a while"
    }

    async fn execute(&self, _input: Value) -> Result<Value, String> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(json!({"done": true}))
    }
}

// Scenario: cancellation lets the in-flight step finish but starts nothing new.
#[tokio::test]
async fn cancel_stops_after_in_flight_step() {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(SlowTool)).unwrap();
    let plan = json!({
        "steps": [
            {"id": "s1", "description": "slow part", "tool": "slow", "input": {}},
            {"id": "s2", "description": "after", "tool": "slow", "input": {},
             "depends_on": ["s1"]}
        ]
    })
    .to_string();
    let provider = ScriptedProvider::new().respond(plan);
    let (executor, storage) = executor(fixture_config(), provider, Arc::new(registry));
    let executor = Arc::new(executor);

    let running = Arc::clone(&executor);
    let handle = tokio::spawn(async move { running.execute("two slow steps").await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    executor.cancel();

    let result = handle.await.unwrap().unwrap();

    assert_eq!(result.run.state, RunState::Cancelled);
    assert_eq!(result.failure.unwrap().kind, "cancelled");
    // The first step was in flight when the cancel landed: it finished and
    // was recorded. The second step never started.
    assert_eq!(result.step_results.len(), 1);
    assert!(result.step_results[0].success);

    let (trace, _) = storage.get(result.run.id).unwrap();
    assert_eq!(trace.count_kind("tool_call"), 1);
}

#[tokio::test]
async fn oversized_plan_is_rejected_before_execution() {
    let plan = json!({
        "steps": [
            {"id": "a", "description": "1", "tool": "echo", "input": {}},
            {"id": "b", "description": "2", "tool": "echo", "input": {}},
            {"id": "c", "description": "3", "tool": "echo", "input": {}}
        ]
    })
    .to_string();
    let provider = ScriptedProvider::new().respond(plan);
    let config = fixture_config().with_max_steps(2);
    let (executor, _) = executor(config, provider, fixture_registry());

    let result = executor.execute("too big").await.unwrap();

    assert_eq!(result.run.state, RunState::Failed);
    assert_eq!(result.failure.unwrap().kind, "step_budget_exceeded");
    // Nothing executed.
    assert!(result.step_results.is_empty());
}

// A step bound to a tool outside the run's allowlist never executes it.
#[tokio::test]
async fn step_outside_the_tool_allowlist_fails_the_run() {
    let provider =
        ScriptedProvider::new().respond(single_step_plan("echo", &json!({"answer": 4})));
    let config = fixture_config().with_tools(vec!["calculator".to_string()]);
    let (executor, _) = executor(config, provider, fixture_registry());

    let result = executor.execute("echo something").await.unwrap();

    assert_eq!(result.run.state, RunState::Failed);
    assert_eq!(result.failure.unwrap().kind, "steps_failed");
    let step = &result.step_results[0];
    assert!(!step.success);
    assert!(step.tool_calls.is_empty());
    assert!(step.errors[0].contains("echo"));
}

#[tokio::test]
async fn unparseable_plan_fails_the_run() {
    let provider = ScriptedProvider::new().respond("I refuse to make a plan.");
    let (executor, _) = executor(fixture_config(), provider, fixture_registry());

    let result = executor.execute("anything").await.unwrap();

    assert_eq!(result.run.state, RunState::Failed);
    assert_eq!(result.failure.unwrap().kind, "planner_error");
}

#[tokio::test]
async fn validation_failure_without_repair_fails_the_run() {
    let schema = Schema::Typed(
        TypedSchema::object()
            .required("explanation", TypedSchema::String)
            .build(),
    );
    let provider = ScriptedProvider::new()
        .respond(single_step_plan("echo", &json!({"answer": 4})));
    let mut config = fixture_config().with_output_schema(schema);
    config.repair = RepairConfig {
        enabled: false,
        max_attempts: None,
    };
    let (executor, _) = executor(config, provider, fixture_registry());

    let result = executor.execute("explain").await.unwrap();

    assert_eq!(result.run.state, RunState::Failed);
    assert_eq!(result.failure.unwrap().kind, "schema_violation");
}

#[tokio::test]
async fn repair_exhaustion_fails_the_run() {
    let schema = Schema::Typed(
        TypedSchema::object()
            .required("explanation", TypedSchema::String)
            .build(),
    );
    let provider = ScriptedProvider::new()
        .respond(single_step_plan("echo", &json!({"answer": 4})))
        .respond(r#"{"still": "wrong"}"#)
        .respond(r#"{"wrong": "again"}"#)
        .respond(r#"{"no": "luck"}"#);
    let config = fixture_config().with_output_schema(schema);
    let (executor, storage) = executor(config, provider, fixture_registry());

    let result = executor.execute("explain").await.unwrap();

    assert_eq!(result.run.state, RunState::Failed);
    assert_eq!(result.failure.unwrap().kind, "repair_exhausted");

    let (trace, _) = storage.get(result.run.id).unwrap();
    assert_eq!(trace.count_kind("repair"), 3);
}

// Independent steps fan out; their outputs aggregate keyed by step name.
#[tokio::test]
async fn independent_steps_aggregate_by_name() {
    let plan = json!({
        "steps": [
            {"id": "left", "description": "l", "tool": "calculator",
             "input": {"expression": "1+1"}},
            {"id": "right", "description": "r", "tool": "calculator",
             "input": {"expression": "3*3"}}
        ]
    })
    .to_string();
    let provider = ScriptedProvider::new().respond(plan);
    let (executor, _) = executor(fixture_config(), provider, fixture_registry());

    let result = executor.execute("two sums").await.unwrap();

    assert!(result.is_success());
    assert_eq!(
        result.output,
        Some(json!({"left": {"result": 2}, "right": {"result": 9}}))
    );
}

// A failed dependency absorbs its dependents without executing them.
#[tokio::test]
async fn dependents_of_failed_steps_are_absorbed() {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(FlakyTool::new(u32::MAX))).unwrap();
    registry
        .register(Arc::new(gauntlet_test_utils::EchoTool))
        .unwrap();
    let plan = json!({
        "steps": [
            {"id": "broken", "description": "fails", "tool": "flaky", "input": {}},
            {"id": "after", "description": "never runs", "tool": "echo",
             "input": {}, "depends_on": ["broken"]}
        ]
    })
    .to_string();
    let provider = ScriptedProvider::new().respond(plan);
    let (executor, _) = executor(fixture_config(), provider, Arc::new(registry));

    let result = executor.execute("chain").await.unwrap();

    assert_eq!(result.run.state, RunState::Failed);
    assert_eq!(result.step_results.len(), 2);
    let absorbed = result
        .step_results
        .iter()
        .find(|s| s.name == "after")
        .unwrap();
    assert!(!absorbed.success);
    assert!(absorbed.tool_calls.is_empty());
    assert!(absorbed.errors[0].contains("dependency"));
}

#[tokio::test]
async fn executor_reaches_exactly_one_terminal_state() {
    let provider = ScriptedProvider::new()
        .respond(single_step_plan("calculator", &json!({"expression": "2+2"})));
    let (executor, _) = executor(fixture_config(), provider, fixture_registry());

    let result = executor.execute("2+2").await.unwrap();
    assert!(result.run.state.is_terminal());
    assert_eq!(executor.status(), result.run.state);

    // A finished executor refuses a second run.
    let err = executor.execute("again").await.unwrap_err();
    assert!(matches!(
        err,
        gauntlet_core::AgentError::IllegalTransition { .. }
    ));
}

#[tokio::test]
async fn events_narrate_the_run() {
    let provider = ScriptedProvider::new()
        .respond(single_step_plan("calculator", &json!({"expression": "2+2"})));
    let (executor, _) = executor(fixture_config(), provider, fixture_registry());
    let mut events = executor.subscribe();

    let result = executor.execute("2+2").await.unwrap();
    assert!(result.is_success());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(
        seen.first(),
        Some(RunEvent::StateChanged {
            from: RunState::Idle,
            to: RunState::Planning,
        })
    ));
    assert!(seen
        .iter()
        .any(|e| matches!(e, RunEvent::PlanReady { step_count: 1, .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, RunEvent::StepFinished { success: true, .. })));
    assert!(matches!(
        seen.last(),
        Some(RunEvent::RunFinished {
            state: RunState::Completed,
            ..
        })
    ));
}
