//! Per-run shared context
//!
//! One [`RunContext`] is cloned into every concurrently executing step. It
//! bundles the immutable configuration with the shared collaborators and the
//! two run-wide guards, the cancellation flag and the wall-clock deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use gauntlet_trace::{RunId, TraceRecorder};

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::events::EventSink;
use crate::provider::CompletionProvider;
use crate::tools::ToolRegistry;

/// Shared state for one run.
#[derive(Clone)]
pub struct RunContext {
    /// Run identifier, also the trace key
    pub run_id: RunId,
    /// Immutable run configuration
    pub config: Arc<AgentConfig>,
    /// Completion provider
    pub provider: Arc<dyn CompletionProvider>,
    /// Tool table
    pub registry: Arc<ToolRegistry>,
    /// Trace recorder
    pub recorder: Arc<TraceRecorder>,
    /// Progress event outlet
    pub events: EventSink,
    cancelled: Arc<AtomicBool>,
    started: Instant,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Assemble the context at run start.
    #[must_use]
    pub fn new(
        run_id: RunId,
        config: Arc<AgentConfig>,
        provider: Arc<dyn CompletionProvider>,
        registry: Arc<ToolRegistry>,
        recorder: Arc<TraceRecorder>,
        events: EventSink,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            run_id,
            config,
            provider,
            registry,
            recorder,
            events,
            cancelled,
            started: Instant::now(),
        }
    }

    /// Whether cancellation has been requested.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Milliseconds since the run started.
    #[inline]
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Suspension-point check: cancellation first, then the deadline.
    ///
    /// Called before dispatching a step, before every retry attempt and
    /// between control-loop phases. Work already in flight is not torn down;
    /// it finishes and its outcome is still recorded.
    ///
    /// # Errors
    /// [`AgentError::Cancelled`] or [`AgentError::Timeout`].
    pub fn checkpoint(&self) -> Result<(), AgentError> {
        if self.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let elapsed_ms = self.elapsed_ms();
        if elapsed_ms >= self.config.timeout_ms {
            return Err(AgentError::Timeout {
                elapsed_ms,
                budget_ms: self.config.timeout_ms,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoProvider;

    #[async_trait::async_trait]
    impl CompletionProvider for NoProvider {
        async fn complete(
            &self,
            _prompt: &str,
            _model: &crate::config::ModelConfig,
            _schema: Option<&gauntlet_schema::Schema>,
        ) -> Result<String, crate::provider::ProviderError> {
            Ok(String::new())
        }
    }

    fn context(config: AgentConfig) -> (RunContext, Arc<AtomicBool>) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let ctx = RunContext::new(
            RunId::new(),
            Arc::new(config),
            Arc::new(NoProvider),
            Arc::new(ToolRegistry::new()),
            Arc::new(TraceRecorder::ephemeral()),
            EventSink::new(),
            Arc::clone(&cancelled),
        );
        (ctx, cancelled)
    }

    #[test]
    fn checkpoint_passes_while_live() {
        let (ctx, _) = context(AgentConfig::default());
        assert!(ctx.checkpoint().is_ok());
    }

    #[test]
    fn checkpoint_reports_cancellation_first() {
        let (ctx, cancelled) = context(AgentConfig::default().with_timeout_ms(1));
        cancelled.store(true, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(matches!(ctx.checkpoint(), Err(AgentError::Cancelled)));
    }

    #[test]
    fn checkpoint_reports_expired_deadline() {
        let (ctx, _) = context(AgentConfig::default().with_timeout_ms(1));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(matches!(ctx.checkpoint(), Err(AgentError::Timeout { .. })));
    }
}
