//! Schema-violation repair
//!
//! When a run's output fails validation and repair is enabled, the engine
//! asks the provider to fix the value, re-validates the candidate, and
//! repeats up to the attempt cap. Valid input is passed through untouched;
//! the engine never makes an already-valid value worse.

use gauntlet_schema::{Schema, ValidationResult, Violation};
use gauntlet_trace::{EdgeKind, NodeId, TraceData, TraceNode};
use serde_json::Value;

use crate::context::RunContext;
use crate::error::AgentError;
use crate::events::RunEvent;
use crate::executor::record_child;
use crate::planner::extract_json;

/// Outcome of a repair pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairResult {
    /// Whether the final value satisfies the schema
    pub success: bool,
    /// The valid value on success, the best candidate otherwise
    pub value: Value,
    /// Repair attempts made (zero for already-valid input)
    pub attempts: u32,
    /// Violations present before repair started
    pub original_errors: Vec<Violation>,
    /// Violations still present in the final value
    pub remaining_errors: Vec<Violation>,
    /// Compliance score of the final value
    pub score: u8,
}

/// Provider-backed repair loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepairEngine;

impl RepairEngine {
    /// Create a repair engine.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Repair `value` until it satisfies `schema` or attempts run out.
    ///
    /// Returns the result plus the trace node the caller chains from.
    /// Exhaustion is not an error here; the caller decides what an invalid
    /// final value means for the run.
    ///
    /// # Errors
    /// Broken schema definitions, provider transport failures, cancellation
    /// and deadline expiry.
    pub async fn repair(
        &self,
        ctx: &RunContext,
        value: &Value,
        schema: &Schema,
        parent: NodeId,
    ) -> Result<(RepairResult, NodeId), AgentError> {
        let initial = gauntlet_schema::validate(value, schema)?;
        if initial.valid {
            return Ok((pass_through(value, &initial), parent));
        }

        let max_attempts = ctx.config.repair.effective_max_attempts(&ctx.config.retry);
        let original_errors = initial.errors.clone();
        let mut current = value.clone();
        let mut check = initial;
        let mut tail = parent;

        for attempt in 1..=max_attempts {
            ctx.checkpoint()?;

            let prompt = repair_prompt(&current, schema, &check.errors);
            let model = ctx.config.model_config();
            let reply = ctx
                .provider
                .complete(&prompt, &model, Some(schema))
                .await?;

            // An unparseable reply burns the attempt but keeps the loop alive.
            if let Some(candidate) = parse_candidate(&reply) {
                let candidate_check = gauntlet_schema::validate(&candidate, schema)?;
                current = candidate;
                check = candidate_check;
            }

            let node = TraceNode::new(TraceData::Repair {
                attempt,
                success: check.valid,
                remaining_errors: check.errors.len(),
            });
            tail = record_child(ctx, node, tail, EdgeKind::Success).unwrap_or(tail);
            ctx.events.emit(RunEvent::RepairAttempted {
                attempt,
                success: check.valid,
            });

            if check.valid {
                return Ok((
                    RepairResult {
                        success: true,
                        value: current,
                        attempts: attempt,
                        original_errors,
                        remaining_errors: Vec::new(),
                        score: check.score,
                    },
                    tail,
                ));
            }
        }

        Ok((
            RepairResult {
                success: false,
                value: current,
                attempts: max_attempts,
                original_errors,
                remaining_errors: check.errors,
                score: check.score,
            },
            tail,
        ))
    }
}

fn pass_through(value: &Value, check: &ValidationResult) -> RepairResult {
    RepairResult {
        success: true,
        value: value.clone(),
        attempts: 0,
        original_errors: Vec::new(),
        remaining_errors: Vec::new(),
        score: check.score,
    }
}

fn parse_candidate(reply: &str) -> Option<Value> {
    let json = extract_json(reply).ok()?;
    serde_json::from_str(json).ok()
}

fn repair_prompt(value: &Value, schema: &Schema, errors: &[Violation]) -> String {
    let mut prompt = format!(
        "Fix this JSON value so it satisfies the schema. Respond with only \
         the corrected JSON.\n\nSchema:\n{}\n\nValue:\n{value}\n\nViolations:\n",
        schema.to_document()
    );
    for violation in errors {
        let path = if violation.path.is_empty() {
            "(root)"
        } else {
            &violation.path
        };
        prompt.push_str(&format!("- {path}: {}\n", violation.message));
    }
    prompt
}
