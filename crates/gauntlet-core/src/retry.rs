//! Retry decisions and backoff delays
//!
//! A stateless utility: the executor and repair engine ask whether a failed
//! attempt may be retried and how long to wait. Strategy math is pure, so
//! the delay schedule for a given policy is fully deterministic.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;
use crate::error::AgentError;

/// Delay growth strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Constant delay
    Fixed,
    /// `initial * attempt`
    Linear,
    /// `initial * 2^(attempt - 1)`
    Exponential,
}

/// Stateless retry decision maker for one policy.
#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
}

impl RetryController {
    /// Wrap a retry policy.
    #[inline]
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The wrapped policy.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether another attempt is allowed after `attempt` attempts failed.
    ///
    /// A disabled policy means a single attempt; error classification
    /// (`ToolNotFound`, schema-definition errors, ...) comes from the
    /// taxonomy, not from this controller.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, error: &AgentError) -> bool {
        self.config.enabled && attempt < self.config.max_attempts && error.is_retryable()
    }

    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// Non-decreasing in `attempt` and clamped to `max_delay_ms` for every
    /// strategy.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let initial = self.config.initial_delay_ms;
        let raw = match self.config.backoff {
            Backoff::Fixed => initial,
            Backoff::Linear => initial.saturating_mul(u64::from(attempt)),
            Backoff::Exponential => {
                let doublings = attempt - 1;
                if doublings >= 63 {
                    u64::MAX
                } else {
                    initial.saturating_mul(1u64 << doublings)
                }
            }
        };
        Duration::from_millis(raw.min(self.config.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(backoff: Backoff) -> RetryController {
        RetryController::new(RetryConfig {
            enabled: true,
            max_attempts: 3,
            backoff,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
        })
    }

    #[test]
    fn fixed_delay_is_constant() {
        let retry = controller(Backoff::Fixed);
        assert_eq!(retry.next_delay(1), Duration::from_millis(100));
        assert_eq!(retry.next_delay(7), Duration::from_millis(100));
    }

    #[test]
    fn linear_delay_scales_with_attempt() {
        let retry = controller(Backoff::Linear);
        assert_eq!(retry.next_delay(1), Duration::from_millis(100));
        assert_eq!(retry.next_delay(3), Duration::from_millis(300));
    }

    #[test]
    fn exponential_delay_doubles_and_clamps() {
        let retry = controller(Backoff::Exponential);
        assert_eq!(retry.next_delay(1), Duration::from_millis(100));
        assert_eq!(retry.next_delay(2), Duration::from_millis(200));
        assert_eq!(retry.next_delay(3), Duration::from_millis(400));
        assert_eq!(retry.next_delay(20), Duration::from_millis(5_000));
    }

    #[test]
    fn disabled_policy_means_single_attempt() {
        let retry = RetryController::new(RetryConfig {
            enabled: false,
            ..RetryConfig::default()
        });
        let transient = AgentError::ToolExecution("flaky".to_string());
        assert!(!retry.should_retry(1, &transient));
    }

    #[test]
    fn attempts_stop_at_budget() {
        let retry = controller(Backoff::Fixed);
        let transient = AgentError::ToolExecution("flaky".to_string());
        assert!(retry.should_retry(1, &transient));
        assert!(retry.should_retry(2, &transient));
        assert!(!retry.should_retry(3, &transient));
    }

    #[test]
    fn non_retryable_errors_never_retry() {
        let retry = controller(Backoff::Fixed);
        assert!(!retry.should_retry(1, &AgentError::ToolNotFound("x".to_string())));
        assert!(!retry.should_retry(1, &AgentError::Cancelled));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn any_backoff() -> impl Strategy<Value = Backoff> {
            prop_oneof![
                Just(Backoff::Fixed),
                Just(Backoff::Linear),
                Just(Backoff::Exponential),
            ]
        }

        proptest! {
            #[test]
            fn prop_delay_non_decreasing_and_clamped(
                backoff in any_backoff(),
                initial in 1u64..1_000,
                max in 1u64..60_000,
                attempt in 1u32..64,
            ) {
                let retry = RetryController::new(RetryConfig {
                    enabled: true,
                    max_attempts: 10,
                    backoff,
                    initial_delay_ms: initial,
                    max_delay_ms: max,
                });
                let current = retry.next_delay(attempt);
                let next = retry.next_delay(attempt + 1);
                prop_assert!(next >= current);
                prop_assert!(current <= Duration::from_millis(max));
            }
        }
    }
}
