//! Retry budget and backoff schedule for transient resource errors.
//!
//! Stateless like the rest of the workflow helpers: all logic lives in
//! associated functions that take the `BackoffConfig` as a parameter.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use treadle_types::config::{BackoffConfig, BackoffStrategy};

/// Stateless retry policy.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt is allowed after `attempt` failed.
    ///
    /// `attempt` is 1-based (the first execution is attempt 1).
    pub fn should_retry(config: &BackoffConfig, attempt: u32) -> bool {
        attempt < config.max_attempts
    }

    /// Delay to wait after the failed `attempt` before the next one.
    pub fn delay_for(config: &BackoffConfig, attempt: u32) -> Duration {
        let initial = config.initial_backoff_ms;
        let ms = match config.strategy {
            BackoffStrategy::Fixed => initial,
            BackoffStrategy::Exponential => {
                let exponent = attempt.saturating_sub(1).min(32);
                initial.saturating_mul(1u64 << exponent)
            }
        };
        Duration::from_millis(ms.min(config.max_backoff_ms))
    }

    /// Sleep for `delay` unless `cancel` fires first.
    ///
    /// Returns `false` when cancelled.
    pub async fn sleep(delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
