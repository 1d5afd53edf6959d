//! Circuit breaker implementation.

use crate::errors::{CkanError, CkanResult};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests are allowed
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, allowing trial requests
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for the circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of counted failures before opening the circuit
    pub failure_threshold: u32,
    /// Duration to wait after the last failure before allowing a trial call
    pub recovery_timeout: Duration,
    /// Consecutive successes in half-open state needed to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the recovery timeout
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Set the success threshold
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }
}

/// Predicate deciding which errors count as upstream-health failures.
///
/// Errors it rejects pass through the breaker without touching its counters:
/// a validation error says nothing about whether the upstream is alive.
pub type FailurePredicate = Arc<dyn Fn(&CkanError) -> bool + Send + Sync>;

/// Read-only diagnostics for the breaker
#[derive(Debug, Clone)]
pub struct CircuitSnapshot {
    /// Current state
    pub state: CircuitState,
    /// Counted failures since the last success while closed
    pub failure_count: u32,
    /// Consecutive successes while half-open
    pub success_count: u32,
    /// Configured failure threshold
    pub failure_threshold: u32,
    /// Configured success threshold
    pub success_threshold: u32,
    /// Configured recovery timeout
    pub recovery_timeout: Duration,
    /// Time since the last counted failure, if any
    pub last_failure_age: Option<Duration>,
}

impl fmt::Display for CircuitSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (failures {}/{}",
            self.state, self.failure_count, self.failure_threshold
        )?;
        if let Some(age) = self.last_failure_age {
            write!(f, ", last failure {:.1}s ago", age.as_secs_f64())?;
        }
        write!(f, ")")
    }
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Circuit breaker protecting one upstream dependency.
///
/// Closed is normal operation; crossing the failure threshold opens the
/// circuit and calls fail fast without touching the network. After the
/// recovery timeout the next call transitions to half-open and probes the
/// upstream; enough consecutive successes close the circuit again, while a
/// single failure reopens it.
///
/// Instances are constructed explicitly and shared by `Arc`; there is no
/// process-global breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    counts_failure: FailurePredicate,
    inner: Mutex<BreakerInner>,
    total_calls: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom configuration.
    ///
    /// By default only transient upstream errors ([`CkanError::is_retryable`])
    /// count toward the failure threshold.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            counts_failure: Arc::new(CkanError::is_retryable),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
            total_calls: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    /// Replace the failure classification predicate
    pub fn with_failure_predicate(
        mut self,
        predicate: impl Fn(&CkanError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.counts_failure = Arc::new(predicate);
        self
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// The state check (including the open-to-half-open transition) happens
    /// under the lock before the operation runs; the operation itself runs
    /// with no lock held; counters are updated under the lock afterwards.
    /// Errors the failure predicate rejects propagate without affecting
    /// breaker state.
    pub async fn call<F, Fut, T>(&self, operation: F) -> CkanResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CkanResult<T>>,
    {
        self.check_gate()?;
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match operation().await {
            Ok(result) => {
                self.on_success();
                Ok(result)
            }
            Err(error) => {
                if (self.counts_failure)(&error) {
                    self.on_failure();
                }
                Err(error)
            }
        }
    }

    /// Current state, without side effects
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Read-only snapshot for diagnostics
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        Self::snapshot_locked(&inner, &self.config)
    }

    /// Total calls admitted through the gate since construction
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Total rejected calls since construction
    pub fn total_rejections(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }

    /// Force the breaker back to closed with zeroed counters.
    ///
    /// Operator escape hatch; the automatic recovery path never uses it.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        tracing::info!("circuit breaker manually reset to closed");
    }

    /// Gate a call on the current state, applying the open-to-half-open
    /// transition when the recovery timeout has elapsed.
    fn check_gate(&self) -> CkanResult<()> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let recovered = inner
                .last_failure
                .map(|at| at.elapsed() >= self.config.recovery_timeout)
                .unwrap_or(true);

            if recovered {
                Self::transition(&mut inner, CircuitState::HalfOpen);
            } else {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                return Err(CkanError::CircuitOpen {
                    snapshot: Self::snapshot_locked(&inner, &self.config),
                });
            }
        }

        Ok(())
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                // One success fully forgives prior failures while closed
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    Self::transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    Self::transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // Any failure during the trial reopens the circuit
                Self::transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn transition(inner: &mut BreakerInner, new_state: CircuitState) {
        let old_state = inner.state;
        if old_state == new_state {
            return;
        }

        inner.state = new_state;
        match new_state {
            CircuitState::Open => {
                inner.success_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count = 0;
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
            }
        }

        tracing::warn!(
            from = %old_state,
            to = %new_state,
            failures = inner.failure_count,
            "circuit breaker state change"
        );
    }

    fn snapshot_locked(inner: &BreakerInner, config: &CircuitBreakerConfig) -> CircuitSnapshot {
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            recovery_timeout: config.recovery_timeout,
            last_failure_age: inner.last_failure.map(|at| at.elapsed()),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn server_error() -> CkanError {
        CkanError::Server {
            message: "upstream exploded".to_string(),
            status_code: Some(503),
        }
    }

    async fn failing_call(breaker: &CircuitBreaker, calls: &Arc<AtomicU32>) -> CkanResult<()> {
        let calls = calls.clone();
        breaker
            .call(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(server_error())
            })
            .await
    }

    #[tokio::test]
    async fn test_starts_closed_and_allows_calls() {
        let breaker = CircuitBreaker::new();
        assert_eq!(breaker.state(), CircuitState::Closed);

        let result = breaker.call(|| async { Ok::<_, CkanError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_opens_after_failure_threshold() {
        let breaker = CircuitBreaker::with_config(
            CircuitBreakerConfig::new().with_failure_threshold(3),
        );
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let _ = failing_call(&breaker, &calls).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // The next call is rejected without invoking the unit of work
        let err = failing_call(&breaker, &calls).await.unwrap_err();
        assert!(matches!(err, CkanError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.total_rejections(), 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count_while_closed() {
        let breaker = CircuitBreaker::with_config(
            CircuitBreakerConfig::new().with_failure_threshold(3),
        );
        let calls = Arc::new(AtomicU32::new(0));

        let _ = failing_call(&breaker, &calls).await;
        let _ = failing_call(&breaker, &calls).await;
        let _ = breaker.call(|| async { Ok::<_, CkanError>(()) }).await;
        let _ = failing_call(&breaker, &calls).await;

        // 2 failures, success, 1 failure: still under the threshold
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_unexpected_errors_do_not_count() {
        let breaker = CircuitBreaker::with_config(
            CircuitBreakerConfig::new().with_failure_threshold(1),
        );

        let result: CkanResult<()> = breaker
            .call(|| async {
                Err(CkanError::Validation {
                    message: "bad params".to_string(),
                })
            })
            .await;

        assert!(matches!(result, Err(CkanError::Validation { .. })));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn test_custom_failure_predicate() {
        let breaker = CircuitBreaker::with_config(
            CircuitBreakerConfig::new().with_failure_threshold(1),
        )
        .with_failure_predicate(|e| matches!(e, CkanError::NotFound { .. }));

        let result: CkanResult<()> = breaker
            .call(|| async {
                Err(CkanError::NotFound {
                    message: "gone".to_string(),
                    resource_type: "package".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_after_recovery_timeout() {
        let breaker = CircuitBreaker::with_config(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_recovery_timeout(Duration::from_millis(50)),
        );
        let calls = Arc::new(AtomicU32::new(0));

        let _ = failing_call(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Before the timeout: rejected, unit of work not invoked
        let err = failing_call(&breaker, &calls).await.unwrap_err();
        assert!(matches!(err, CkanError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;

        // After the timeout: the trial call goes through
        let result = breaker.call(|| async { Ok::<_, CkanError>("probe") }).await;
        assert_eq!(result.unwrap(), "probe");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::with_config(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_recovery_timeout(Duration::from_millis(20)),
        );
        let calls = Arc::new(AtomicU32::new(0));

        let _ = failing_call(&breaker, &calls).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let _ = failing_call(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().success_count, 0);
    }

    #[tokio::test]
    async fn test_closes_after_success_threshold() {
        let breaker = CircuitBreaker::with_config(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_success_threshold(2)
                .with_recovery_timeout(Duration::from_millis(20)),
        );
        let calls = Arc::new(AtomicU32::new(0));

        let _ = failing_call(&breaker, &calls).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let _ = breaker.call(|| async { Ok::<_, CkanError>(()) }).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let _ = breaker.call(|| async { Ok::<_, CkanError>(()) }).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let breaker = CircuitBreaker::with_config(
            CircuitBreakerConfig::new().with_failure_threshold(1),
        );
        let calls = Arc::new(AtomicU32::new(0));

        let _ = failing_call(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert!(snapshot.last_failure_age.is_none());
    }
}
