//! Trace node and edge types
//!
//! Node payloads are a closed tagged enum: each event kind carries exactly
//! the fields it needs and nothing is stuffed into an open map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{NodeId, StepId};

/// Type-specific payload of a trace node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceData {
    /// A plan was produced for the run
    Plan {
        /// Task the plan was generated for
        task: String,
        /// Number of steps in the plan
        step_count: usize,
        /// Advisory planner confidence in [0, 1]
        confidence: Option<f64>,
    },
    /// One tool invocation attempt
    ToolCall {
        /// Tool name, or "completion" for toolless steps
        tool: String,
        /// 1-based attempt number
        attempt: u32,
        /// Input passed to the tool
        input: Value,
        /// Output produced, when the attempt succeeded
        output: Option<Value>,
        /// Whether the attempt succeeded
        success: bool,
    },
    /// A value was validated against a schema
    Validation {
        /// Whether validation passed
        valid: bool,
        /// Compliance score in 0..=100
        score: u8,
        /// Number of violations found
        error_count: usize,
    },
    /// One repair attempt
    Repair {
        /// 1-based attempt number
        attempt: u32,
        /// Whether the repaired value passed re-validation
        success: bool,
        /// Violations still present after this attempt
        remaining_errors: usize,
    },
    /// An error event, recovered or fatal
    Error {
        /// Error kind from the taxonomy
        kind: String,
        /// Human-readable message
        message: String,
        /// Attempts made before this error was recorded
        attempts: u32,
    },
    /// A retry decision with its backoff delay
    Retry {
        /// Attempt number that just failed
        attempt: u32,
        /// Delay before the next attempt, in milliseconds
        delay_ms: u64,
    },
}

impl TraceData {
    /// Stable kind tag for rendering and filtering.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Plan { .. } => "plan",
            Self::ToolCall { .. } => "tool_call",
            Self::Validation { .. } => "validation",
            Self::Repair { .. } => "repair",
            Self::Error { .. } => "error",
            Self::Retry { .. } => "retry",
        }
    }

    /// Short human-readable label for layout consumers.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Plan { step_count, .. } => format!("plan ({step_count} steps)"),
            Self::ToolCall { tool, attempt, .. } => format!("{tool} #{attempt}"),
            Self::Validation { valid, score, .. } => {
                format!("validation {} ({score})", if *valid { "ok" } else { "failed" })
            }
            Self::Repair { attempt, success, .. } => {
                format!("repair #{attempt} {}", if *success { "ok" } else { "failed" })
            }
            Self::Error { kind, .. } => format!("error: {kind}"),
            Self::Retry { attempt, delay_ms } => format!("retry after #{attempt} (+{delay_ms}ms)"),
        }
    }
}

/// One recorded event in a run's trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceNode {
    /// Unique node id within the run
    pub id: NodeId,
    /// Type-specific payload
    pub data: TraceData,
    /// Plan step this event belongs to, if any
    pub step: Option<StepId>,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// Causal parent; recording a node with a parent also records the edge
    pub parent: Option<NodeId>,
    /// Latency of the operation the node describes, in milliseconds
    pub latency_ms: Option<u64>,
}

impl TraceNode {
    /// Create a node with a fresh id and the current timestamp.
    #[inline]
    #[must_use]
    pub fn new(data: TraceData) -> Self {
        Self {
            id: NodeId::new(),
            data,
            step: None,
            timestamp: Utc::now(),
            parent: None,
            latency_ms: None,
        }
    }

    /// Attach the owning plan step.
    #[inline]
    #[must_use]
    pub fn with_step(mut self, step: StepId) -> Self {
        self.step = Some(step);
        self
    }

    /// Attach the causal parent.
    #[inline]
    #[must_use]
    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Attach the measured latency.
    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Edge classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Successful continuation
    Success,
    /// Propagation into an error node
    Error,
    /// Link from a failed attempt to its retry
    Retry,
}

/// A directed edge between two recorded nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEdge {
    /// Source node
    pub source: NodeId,
    /// Target node
    pub target: NodeId,
    /// Optional display label
    pub label: Option<String>,
    /// Optional classification
    pub kind: Option<EdgeKind>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_builder_sets_fields() {
        let parent = NodeId::new();
        let step = StepId::new();
        let node = TraceNode::new(TraceData::Retry {
            attempt: 1,
            delay_ms: 100,
        })
        .with_step(step)
        .with_parent(parent)
        .with_latency(5);

        assert_eq!(node.step, Some(step));
        assert_eq!(node.parent, Some(parent));
        assert_eq!(node.latency_ms, Some(5));
        assert_eq!(node.data.kind(), "retry");
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let data = TraceData::ToolCall {
            tool: "calculator".to_string(),
            attempt: 1,
            input: json!({"expression": "2+2"}),
            output: Some(json!({"result": 4})),
            success: true,
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["type"], json!("tool_call"));
        assert_eq!(value["tool"], json!("calculator"));
    }

    #[test]
    fn labels_are_compact() {
        let data = TraceData::Validation {
            valid: false,
            score: 80,
            error_count: 1,
        };
        assert_eq!(data.label(), "validation failed (80)");
    }
}
