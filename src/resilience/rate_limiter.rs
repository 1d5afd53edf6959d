//! Token bucket rate limiting.

use crate::errors::{CkanError, CkanResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval between successive acquisition attempts while waiting for tokens.
///
/// Polling is a deliberate simplicity/latency tradeoff over an event-driven
/// wake-on-refill design; waiters are not woken sooner than this.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Key under which the shared default bucket is stored.
const GLOBAL_CLIENT: &str = "global";

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Capacity of each per-client bucket (and the shared default bucket)
    pub default_capacity: f64,
    /// Refill rate of per-client buckets, in tokens per second
    pub default_refill_rate: f64,
    /// Capacity of the shared burst bucket
    pub burst_capacity: f64,
    /// Refill rate of the burst bucket, in tokens per second
    pub burst_refill_rate: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_capacity: 100.0,
            default_refill_rate: 100.0 / 60.0,
            burst_capacity: 20.0,
            burst_refill_rate: 20.0 / 60.0,
        }
    }
}

impl RateLimitConfig {
    /// Create a new rate limit configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default bucket capacity
    pub fn with_default_capacity(mut self, capacity: f64) -> Self {
        self.default_capacity = capacity;
        self
    }

    /// Set the default refill rate (tokens per second)
    pub fn with_default_refill_rate(mut self, rate: f64) -> Self {
        self.default_refill_rate = rate;
        self
    }

    /// Set the burst bucket capacity
    pub fn with_burst_capacity(mut self, capacity: f64) -> Self {
        self.burst_capacity = capacity;
        self
    }

    /// Set the burst refill rate (tokens per second)
    pub fn with_burst_refill_rate(mut self, rate: f64) -> Self {
        self.burst_refill_rate = rate;
        self
    }
}

/// Observable state of a single bucket
#[derive(Debug, Clone)]
pub struct BucketStatus {
    /// Tokens currently available
    pub tokens_available: f64,
    /// Maximum tokens the bucket can hold
    pub capacity: f64,
    /// Refill rate in tokens per second
    pub refill_rate: f64,
    /// When the bucket last refilled
    pub last_refill: Instant,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A single token bucket with lazy, elapsed-time-based refill.
///
/// Tokens are replenished on access rather than by a background timer, so an
/// idle bucket costs nothing. Refill and decrement happen under one lock,
/// which is never held across an await point.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a bucket holding `capacity` tokens, refilling at
    /// `refill_rate` tokens per second. Starts full.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to consume `tokens` from the bucket.
    ///
    /// Refills from elapsed time first, then decrements atomically. Returns
    /// false with no state change if not enough tokens are available.
    pub fn consume(&self, tokens: f64) -> bool {
        let mut state = self.state.lock();
        Self::refill(&mut state, self.capacity, self.refill_rate);

        if state.tokens >= tokens {
            state.tokens -= tokens;
            true
        } else {
            false
        }
    }

    /// Wait until `tokens` can be consumed, polling every 100ms.
    ///
    /// Requests for more tokens than the bucket can ever hold fail
    /// immediately: no amount of waiting makes them satisfiable.
    pub async fn wait_for(&self, tokens: f64, timeout: Duration) -> bool {
        if tokens > self.capacity {
            return false;
        }

        let start = Instant::now();
        loop {
            if self.consume(tokens) {
                return true;
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return false;
            }

            tokio::time::sleep(POLL_INTERVAL.min(timeout - elapsed)).await;
        }
    }

    /// Snapshot of the bucket for observability. Refills before reading so
    /// the reported token count is current.
    pub fn status(&self) -> BucketStatus {
        let mut state = self.state.lock();
        Self::refill(&mut state, self.capacity, self.refill_rate);
        BucketStatus {
            tokens_available: state.tokens,
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            last_refill: state.last_refill,
        }
    }

    fn refill(state: &mut BucketState, capacity: f64, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        let new_tokens = elapsed * refill_rate;

        if new_tokens > 0.0 {
            state.tokens = (state.tokens + new_tokens).min(capacity);
            state.last_refill = now;
        }
    }
}

/// Rate limiter with per-client buckets and a shared burst bucket.
///
/// Each distinct client identifier maps to exactly one bucket for the
/// lifetime of the limiter; keyless callers share a single default bucket.
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: Mutex<HashMap<String, Arc<TokenBucket>>>,
    burst: TokenBucket,
    total_acquired: AtomicU64,
    total_rejected: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter with default configuration
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    /// Create a new rate limiter with custom configuration
    pub fn with_config(config: RateLimitConfig) -> Self {
        let burst = TokenBucket::new(config.burst_capacity, config.burst_refill_rate);
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
            burst,
            total_acquired: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Acquire `tokens` for a request, waiting up to `timeout`.
    ///
    /// Burst requests draw from the shared burst bucket; otherwise the
    /// bucket keyed by `client_id` is used, falling back to the shared
    /// default bucket when no identifier is given. Keyed buckets are created
    /// lazily on first use.
    ///
    /// Fails with [`CkanError::RateLimit`] carrying a worst-case
    /// `retry_after` of `capacity / refill_rate` for the bucket kind used.
    pub async fn acquire(
        &self,
        client_id: Option<&str>,
        tokens: f64,
        burst: bool,
        timeout: Duration,
    ) -> CkanResult<()> {
        let acquired = if burst {
            self.burst.wait_for(tokens, timeout).await
        } else {
            let bucket = self.bucket_for(client_id.unwrap_or(GLOBAL_CLIENT));
            bucket.wait_for(tokens, timeout).await
        };

        if acquired {
            self.total_acquired.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            let retry_after = self.retry_after(burst);
            Err(CkanError::RateLimit {
                message: format!("try again in {:.1} seconds", retry_after.as_secs_f64()),
                retry_after: Some(retry_after),
            })
        }
    }

    /// Snapshot of the bucket for `client_id` (or the shared default
    /// bucket). Reports a zeroed snapshot if the bucket does not exist yet.
    pub fn status(&self, client_id: Option<&str>) -> BucketStatus {
        let clients = self.clients.lock();
        match clients.get(client_id.unwrap_or(GLOBAL_CLIENT)) {
            Some(bucket) => bucket.status(),
            None => BucketStatus {
                tokens_available: 0.0,
                capacity: self.config.default_capacity,
                refill_rate: self.config.default_refill_rate,
                last_refill: Instant::now(),
            },
        }
    }

    /// Acquisition counters for observability
    pub fn metrics(&self) -> RateLimiterMetrics {
        RateLimiterMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            active_buckets: self.clients.lock().len(),
        }
    }

    /// Get or lazily create the bucket for a client key.
    ///
    /// The map lock is scoped to the lookup/insert only; waiting happens on
    /// the returned handle. First caller wins under concurrent creation.
    fn bucket_for(&self, key: &str) -> Arc<TokenBucket> {
        let mut clients = self.clients.lock();
        clients
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(TokenBucket::new(
                    self.config.default_capacity,
                    self.config.default_refill_rate,
                ))
            })
            .clone()
    }

    /// Coarse worst-case wait estimate: the time to refill a bucket of the
    /// given kind from empty.
    fn retry_after(&self, burst: bool) -> Duration {
        let secs = if burst {
            self.config.burst_capacity / self.config.burst_refill_rate
        } else {
            self.config.default_capacity / self.config.default_refill_rate
        };
        Duration::from_secs_f64(secs)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterMetrics {
    /// Total successful acquisitions
    pub total_acquired: u64,
    /// Total rejected acquisitions
    pub total_rejected: u64,
    /// Number of client buckets created so far
    pub active_buckets: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_drains_to_zero() {
        let bucket = TokenBucket::new(5.0, 1.0);

        for _ in 0..5 {
            assert!(bucket.consume(1.0));
        }
        assert!(!bucket.consume(1.0));
    }

    #[test]
    fn test_consume_leaves_state_unchanged_on_failure() {
        let bucket = TokenBucket::new(3.0, 0.001);

        assert!(bucket.consume(2.0));
        // 1 token left; a request for 2 fails and does not touch the balance
        assert!(!bucket.consume(2.0));
        assert!(bucket.consume(1.0));
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let bucket = TokenBucket::new(10.0, 1000.0);

        assert!(bucket.consume(5.0));
        std::thread::sleep(Duration::from_millis(50));

        let status = bucket.status();
        assert!(status.tokens_available <= 10.0);
        assert_eq!(status.capacity, 10.0);
    }

    #[tokio::test]
    async fn test_wait_for_rejects_impossible_request_immediately() {
        let bucket = TokenBucket::new(5.0, 1.0);

        let start = Instant::now();
        let ok = bucket.wait_for(6.0, Duration::from_secs(10)).await;
        assert!(!ok);
        // Permanent failure, not a timeout: returns well before the deadline
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let bucket = TokenBucket::new(1.0, 0.001);
        assert!(bucket.consume(1.0));

        let ok = bucket.wait_for(1.0, Duration::from_millis(150)).await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_wait_for_succeeds_after_refill() {
        // 50 tokens/sec: a drained bucket has a fresh token within ~20ms
        let bucket = TokenBucket::new(1.0, 50.0);
        assert!(bucket.consume(1.0));

        let ok = bucket.wait_for(1.0, Duration::from_secs(2)).await;
        assert!(ok);
    }

    #[tokio::test]
    async fn test_acquire_uses_separate_burst_bucket() {
        let limiter = RateLimiter::with_config(
            RateLimitConfig::new()
                .with_default_capacity(1.0)
                .with_default_refill_rate(0.001)
                .with_burst_capacity(2.0)
                .with_burst_refill_rate(0.001),
        );

        // Drain the default bucket
        assert!(limiter
            .acquire(None, 1.0, false, Duration::from_millis(10))
            .await
            .is_ok());
        assert!(limiter
            .acquire(None, 1.0, false, Duration::from_millis(10))
            .await
            .is_err());

        // Burst bucket is unaffected
        assert!(limiter
            .acquire(None, 1.0, true, Duration::from_millis(10))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_acquire_per_client_isolation() {
        let limiter = RateLimiter::with_config(
            RateLimitConfig::new()
                .with_default_capacity(1.0)
                .with_default_refill_rate(0.001),
        );

        assert!(limiter
            .acquire(Some("alice"), 1.0, false, Duration::from_millis(10))
            .await
            .is_ok());
        // Alice is drained, Bob is not
        assert!(limiter
            .acquire(Some("alice"), 1.0, false, Duration::from_millis(10))
            .await
            .is_err());
        assert!(limiter
            .acquire(Some("bob"), 1.0, false, Duration::from_millis(10))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit_error_carries_retry_after() {
        let limiter = RateLimiter::with_config(
            RateLimitConfig::new()
                .with_default_capacity(10.0)
                .with_default_refill_rate(2.0),
        );

        // Drain, then fail fast
        assert!(limiter
            .acquire(None, 10.0, false, Duration::from_millis(10))
            .await
            .is_ok());
        let err = limiter
            .acquire(None, 1.0, false, Duration::from_millis(10))
            .await
            .unwrap_err();

        match err {
            CkanError::RateLimit { retry_after, .. } => {
                // capacity / refill_rate = 10 / 2
                assert_eq!(retry_after, Some(Duration::from_secs(5)));
            }
            other => panic!("expected RateLimit, got {other:?}"),
        }
    }

    #[test]
    fn test_status_for_unknown_client_is_zeroed() {
        let limiter = RateLimiter::new();

        let status = limiter.status(Some("never-seen"));
        assert_eq!(status.tokens_available, 0.0);
        assert_eq!(status.capacity, 100.0);
    }

    #[tokio::test]
    async fn test_status_reflects_consumption() {
        let limiter = RateLimiter::with_config(
            RateLimitConfig::new()
                .with_default_capacity(10.0)
                .with_default_refill_rate(0.001),
        );

        limiter
            .acquire(Some("alice"), 3.0, false, Duration::from_millis(10))
            .await
            .unwrap();

        let status = limiter.status(Some("alice"));
        assert!(status.tokens_available < 7.5);
        assert!(status.tokens_available >= 6.9);
    }

    #[tokio::test]
    async fn test_metrics_count_rejections() {
        let limiter = RateLimiter::with_config(
            RateLimitConfig::new()
                .with_default_capacity(1.0)
                .with_default_refill_rate(0.001),
        );

        let _ = limiter
            .acquire(None, 1.0, false, Duration::from_millis(10))
            .await;
        let _ = limiter
            .acquire(None, 1.0, false, Duration::from_millis(10))
            .await;

        let metrics = limiter.metrics();
        assert_eq!(metrics.total_acquired, 1);
        assert_eq!(metrics.total_rejected, 1);
        assert_eq!(metrics.active_buckets, 1);
    }
}
