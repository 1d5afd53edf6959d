//! Retry logic with exponential backoff.

use crate::errors::{CkanError, CkanResult};
use std::future::Future;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (total attempts = `max_retries + 1`)
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap applied to every computed delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay before retry number `retry` (1-indexed):
    /// `min(max_delay, initial_delay * multiplier^(retry - 1))`.
    ///
    /// Deterministic; no jitter is applied.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let delay = self.initial_delay.as_secs_f64() * exp;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Executes an operation with bounded exponential-backoff retry.
///
/// Only transient upstream conditions ([`CkanError::is_retryable`]) are
/// retried; everything else surfaces immediately. Policy violations such as
/// an oversized response are never retried. The executor holds no state
/// between calls.
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with default configuration
    pub fn new() -> Self {
        Self::with_config(RetryConfig::default())
    }

    /// Create a new retry executor with custom configuration
    pub fn with_config(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Retry configuration in effect
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation, retrying transient failures.
    ///
    /// When the upstream supplies a retry-after hint on the error it
    /// overrides the computed backoff delay. Exhausting the attempt budget
    /// surfaces the last observed failure.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> CkanResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CkanResult<T>>,
    {
        let max_attempts = self.config.max_retries + 1;

        for attempt in 1..=max_attempts {
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "call succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_retryable() {
                        return Err(error);
                    }

                    if attempt == max_attempts {
                        tracing::warn!(
                            attempts = max_attempts,
                            error = %error,
                            "retry budget exhausted"
                        );
                        return Err(error);
                    }

                    let delay = error.retry_after().unwrap_or_else(|| self.config.delay_for(attempt));
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(CkanError::Internal {
            message: "retry loop exited without a result".to_string(),
        })
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new()
    }
}
