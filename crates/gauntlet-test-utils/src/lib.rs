//! Test fixtures for the gauntlet workspace
//!
//! Deterministic stand-ins for the real collaborators: a scripted completion
//! provider and a handful of fixture tools with known behavior. Everything
//! here is deterministic so scenario tests can assert exact outcomes.

pub mod provider;
pub mod tools;

pub use provider::ScriptedProvider;
pub use tools::{CalculatorTool, EchoTool, FlakyTool};

use std::sync::Arc;

use gauntlet_core::{AgentConfig, Backoff, RetryConfig, ToolRegistry};

/// Registry preloaded with the fixture tools.
///
/// # Panics
/// Panics on registration conflicts, which cannot happen with the fixtures.
#[must_use]
pub fn fixture_registry() -> Arc<ToolRegistry> {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(CalculatorTool)).unwrap();
    registry.register(Arc::new(EchoTool)).unwrap();
    registry.register(Arc::new(FlakyTool::new(2))).unwrap();
    Arc::new(registry)
}

/// Retry policy with millisecond delays, for tests that exercise the loop.
#[must_use]
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        enabled: true,
        max_attempts,
        backoff: Backoff::Fixed,
        initial_delay_ms: 1,
        max_delay_ms: 1,
    }
}

/// Default test configuration: fast retries, short timeout.
#[must_use]
pub fn fixture_config() -> AgentConfig {
    AgentConfig::default()
        .with_retry(fast_retry(3))
        .with_timeout_ms(10_000)
}

/// A plan response naming a single tool step, as the planner prompt expects.
#[must_use]
pub fn single_step_plan(tool: &str, input: &serde_json::Value) -> String {
    serde_json::json!({
        "steps": [{
            "id": "s1",
            "description": format!("run {tool}"),
            "tool": tool,
            "input": input,
        }],
        "confidence": 1.0
    })
    .to_string()
}
