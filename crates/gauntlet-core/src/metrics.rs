//! Aggregate run metrics
//!
//! Computed once when a run reaches a terminal state and persisted alongside
//! the sealed trace. The reliability score folds success rate, schema
//! compliance, retry pressure and latency into a single 0..=100 number.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::executor::StepResult;

/// Aggregate metrics for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Steps accounted for, executed or absorbed
    pub total_steps: usize,
    /// Steps that produced an output
    pub successful_steps: usize,
    /// Steps that failed or were skipped
    pub failed_steps: usize,
    /// Attempts beyond the first, summed over all steps
    pub retry_count: u32,
    /// Wall-clock run duration in milliseconds
    pub total_latency_ms: u64,
    /// Mean step latency in milliseconds
    pub avg_step_latency_ms: u64,
    /// Compliance score of the final output (100 when no schema applies)
    pub schema_compliance: u8,
    /// Invocation count per tool
    pub tool_usage: BTreeMap<String, u32>,
    /// Composite reliability score in 0..=100
    pub reliability: u8,
}

impl RunMetrics {
    /// Compute metrics from the finished steps.
    ///
    /// `schema_compliance` is the final output's validation score;
    /// pass 100 when the run has no output schema.
    #[must_use]
    pub fn compute(steps: &[StepResult], schema_compliance: u8, total_latency_ms: u64) -> Self {
        let total_steps = steps.len();
        let successful_steps = steps.iter().filter(|s| s.success).count();
        let failed_steps = total_steps - successful_steps;
        let retry_count: u32 = steps.iter().map(|s| s.retries).sum();

        let step_latency: u64 = steps.iter().map(|s| s.latency_ms).sum();
        let avg_step_latency_ms = if total_steps == 0 {
            0
        } else {
            step_latency / total_steps as u64
        };

        let mut tool_usage: BTreeMap<String, u32> = BTreeMap::new();
        for step in steps {
            for call in &step.tool_calls {
                *tool_usage.entry(call.tool.clone()).or_insert(0) += 1;
            }
        }

        let reliability = reliability_score(
            total_steps,
            successful_steps,
            retry_count,
            schema_compliance,
            avg_step_latency_ms,
        );

        Self {
            total_steps,
            successful_steps,
            failed_steps,
            retry_count,
            total_latency_ms,
            avg_step_latency_ms,
            schema_compliance,
            tool_usage,
            reliability,
        }
    }
}

/// Weighted reliability score.
///
/// `0.5 * success_rate + 0.2 * compliance + 0.15 * retry_factor
///  + 0.15 * latency_factor`, each component in 0..=100.
fn reliability_score(
    total_steps: usize,
    successful_steps: usize,
    retry_count: u32,
    schema_compliance: u8,
    avg_step_latency_ms: u64,
) -> u8 {
    if total_steps == 0 {
        return 0;
    }

    let success_rate = 100.0 * successful_steps as f64 / total_steps as f64;
    let retries_per_step = f64::from(retry_count) / total_steps as f64;
    let retry_factor = 100.0 / (1.0 + retries_per_step);
    let latency_factor = latency_factor(avg_step_latency_ms);

    let score = 0.5 * success_rate
        + 0.2 * f64::from(schema_compliance)
        + 0.15 * retry_factor
        + 0.15 * latency_factor;
    score.round().clamp(0.0, 100.0) as u8
}

/// 100 under one second, linear decay to 0 at thirty seconds.
fn latency_factor(avg_ms: u64) -> f64 {
    const FULL_MS: f64 = 1_000.0;
    const ZERO_MS: f64 = 30_000.0;

    let avg = avg_ms as f64;
    if avg <= FULL_MS {
        100.0
    } else if avg >= ZERO_MS {
        0.0
    } else {
        100.0 * (ZERO_MS - avg) / (ZERO_MS - FULL_MS)
    }
}
