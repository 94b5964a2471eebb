//! Run progress events
//!
//! Observers subscribe to a run and receive coarse progress notifications.
//! Emission never blocks the control loop: the channel is unbounded and a
//! dropped or absent receiver is silently ignored.

use gauntlet_trace::{RunId, StepId};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::run::RunState;

/// A progress notification emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// The run state machine advanced
    StateChanged {
        /// Previous state
        from: RunState,
        /// New state
        to: RunState,
    },
    /// Planning produced a validated plan
    PlanReady {
        /// Number of steps
        step_count: usize,
        /// Plan revision
        revision: u32,
    },
    /// A step was dispatched
    StepStarted {
        /// Step identifier
        step: StepId,
        /// Planner-assigned name
        name: String,
    },
    /// A step finished, successfully or not
    StepFinished {
        /// Step identifier
        step: StepId,
        /// Whether it succeeded
        success: bool,
    },
    /// A failed attempt will be retried after a delay
    RetryScheduled {
        /// Step being retried
        step: StepId,
        /// Attempt number that just failed
        attempt: u32,
        /// Delay before the next attempt
        delay_ms: u64,
    },
    /// Output validation finished
    ValidationCompleted {
        /// Whether the output satisfied the schema
        valid: bool,
        /// Compliance score
        score: u8,
    },
    /// A repair attempt finished
    RepairAttempted {
        /// Attempt number
        attempt: u32,
        /// Whether the repaired value validated
        success: bool,
    },
    /// The run reached a terminal state
    RunFinished {
        /// Run identifier
        run: RunId,
        /// Terminal state
        state: RunState,
    },
}

/// Shared, clonable event outlet.
///
/// At most one subscriber at a time; subscribing again replaces the previous
/// receiver.
#[derive(Clone, Default)]
pub struct EventSink {
    sender: Arc<RwLock<Option<mpsc::UnboundedSender<RunEvent>>>>,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("subscribed", &self.sender.read().is_some())
            .finish()
    }
}

impl EventSink {
    /// Create a sink with no subscriber.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events, replacing any previous subscriber.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RunEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.write() = Some(tx);
        rx
    }

    /// Emit an event. Never blocks; a closed or missing receiver drops it.
    pub fn emit(&self, event: RunEvent) {
        if let Some(sender) = self.sender.read().as_ref() {
            let _ = sender.send(event);
        }
    }
}
