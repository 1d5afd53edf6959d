//! Configuration types for the CKAN API client.

use crate::errors::{CkanError, CkanResult};
use crate::resilience::{CircuitBreakerConfig, RateLimitConfig, RetryConfig};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default CKAN action API base URL (Boston OpenData portal).
pub const DEFAULT_BASE_URL: &str = "https://data.boston.gov/api/3/action";

/// Default connect timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default read timeout (30 seconds).
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Default maximum response size (10 MiB).
pub const DEFAULT_MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// Default maximum request size (1 MiB).
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Configuration for the CKAN client.
#[derive(Debug, Clone)]
pub struct CkanConfig {
    /// Base URL of the CKAN action API
    pub base_url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Read timeout
    pub read_timeout: Duration,
    /// Rate limiter configuration
    pub rate_limit: RateLimitConfig,
    /// How long a call may wait for a rate-limit token before giving up
    pub rate_acquire_timeout: Duration,
    /// Circuit breaker configuration
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry configuration
    pub retry: RetryConfig,
    /// Maximum response size in bytes
    pub max_response_size: u64,
    /// Maximum serialized request size in bytes
    pub max_request_size: usize,
    /// Maximum idle connections per host
    pub pool_max_idle_per_host: usize,
    /// TCP keep-alive interval
    pub tcp_keepalive: Duration,
}

impl Default for CkanConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            rate_limit: RateLimitConfig::default(),
            rate_acquire_timeout: Duration::from_secs(30),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            pool_max_idle_per_host: 20,
            tcp_keepalive: Duration::from_secs(30),
        }
    }
}

impl CkanConfig {
    /// Create a new configuration builder.
    pub fn builder() -> CkanConfigBuilder {
        CkanConfigBuilder::default()
    }

    /// Create configuration from environment variables.
    ///
    /// Unset or unparseable variables fall back to their defaults.
    pub fn from_env() -> CkanResult<Self> {
        let rate_limit = RateLimitConfig {
            default_capacity: env_or("CKAN_RATE_LIMIT_CAPACITY", 100.0),
            default_refill_rate: env_or("CKAN_RATE_LIMIT_REFILL_RATE", 100.0 / 60.0),
            burst_capacity: env_or("CKAN_BURST_CAPACITY", 20.0),
            burst_refill_rate: env_or("CKAN_BURST_REFILL_RATE", 20.0 / 60.0),
        };

        let circuit_breaker = CircuitBreakerConfig {
            failure_threshold: env_or("CKAN_CB_FAILURE_THRESHOLD", 3),
            recovery_timeout: Duration::from_secs_f64(env_or(
                "CKAN_CB_RECOVERY_TIMEOUT_SECS",
                30.0,
            )),
            success_threshold: env_or("CKAN_CB_SUCCESS_THRESHOLD", 3),
        };

        let retry = RetryConfig {
            max_retries: env_or("CKAN_MAX_RETRIES", 3),
            initial_delay: Duration::from_secs_f64(env_or("CKAN_RETRY_DELAY_SECS", 1.0)),
            max_delay: Duration::from_secs_f64(env_or("CKAN_MAX_RETRY_DELAY_SECS", 60.0)),
            multiplier: env_or("CKAN_RETRY_BACKOFF_MULTIPLIER", 2.0),
        };

        let config = Self {
            base_url: std::env::var("CKAN_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            connect_timeout: Duration::from_secs_f64(env_or(
                "CKAN_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS as f64,
            )),
            read_timeout: Duration::from_secs_f64(env_or(
                "CKAN_READ_TIMEOUT_SECS",
                DEFAULT_READ_TIMEOUT_SECS as f64,
            )),
            rate_limit,
            circuit_breaker,
            retry,
            max_response_size: env_or("CKAN_MAX_RESPONSE_SIZE", DEFAULT_MAX_RESPONSE_SIZE),
            max_request_size: env_or("CKAN_MAX_REQUEST_SIZE", DEFAULT_MAX_REQUEST_SIZE),
            ..Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CkanResult<()> {
        if self.base_url.is_empty() {
            return Err(CkanError::Configuration {
                message: "base URL is required".to_string(),
            });
        }
        Url::parse(&self.base_url)?;

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(CkanError::Configuration {
                message: "circuit breaker failure threshold must be at least 1".to_string(),
            });
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err(CkanError::Configuration {
                message: "circuit breaker success threshold must be at least 1".to_string(),
            });
        }
        if self.rate_limit.default_refill_rate <= 0.0 || self.rate_limit.burst_refill_rate <= 0.0 {
            return Err(CkanError::Configuration {
                message: "rate limiter refill rates must be positive".to_string(),
            });
        }
        if self.retry.multiplier < 1.0 {
            return Err(CkanError::Configuration {
                message: "retry backoff multiplier must be at least 1.0".to_string(),
            });
        }

        Ok(())
    }
}

fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Builder for [`CkanConfig`].
#[derive(Default)]
pub struct CkanConfigBuilder {
    base_url: Option<String>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    rate_limit: Option<RateLimitConfig>,
    rate_acquire_timeout: Option<Duration>,
    circuit_breaker: Option<CircuitBreakerConfig>,
    retry: Option<RetryConfig>,
    max_response_size: Option<u64>,
    max_request_size: Option<usize>,
    pool_max_idle_per_host: Option<usize>,
    tcp_keepalive: Option<Duration>,
}

impl CkanConfigBuilder {
    /// Set the base URL of the CKAN action API.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the rate limiter configuration.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    /// Set the maximum wait for a rate-limit token.
    pub fn rate_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.rate_acquire_timeout = Some(timeout);
        self
    }

    /// Set the circuit breaker configuration.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Set the retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Set the maximum response size in bytes.
    pub fn max_response_size(mut self, size: u64) -> Self {
        self.max_response_size = Some(size);
        self
    }

    /// Set the maximum serialized request size in bytes.
    pub fn max_request_size(mut self, size: usize) -> Self {
        self.max_request_size = Some(size);
        self
    }

    /// Set the maximum idle connections per host.
    pub fn pool_max_idle_per_host(mut self, size: usize) -> Self {
        self.pool_max_idle_per_host = Some(size);
        self
    }

    /// Set the TCP keep-alive interval.
    pub fn tcp_keepalive(mut self, interval: Duration) -> Self {
        self.tcp_keepalive = Some(interval);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> CkanResult<CkanConfig> {
        let defaults = CkanConfig::default();
        let config = CkanConfig {
            base_url: self.base_url.unwrap_or(defaults.base_url),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            read_timeout: self.read_timeout.unwrap_or(defaults.read_timeout),
            rate_limit: self.rate_limit.unwrap_or(defaults.rate_limit),
            rate_acquire_timeout: self
                .rate_acquire_timeout
                .unwrap_or(defaults.rate_acquire_timeout),
            circuit_breaker: self.circuit_breaker.unwrap_or(defaults.circuit_breaker),
            retry: self.retry.unwrap_or(defaults.retry),
            max_response_size: self.max_response_size.unwrap_or(defaults.max_response_size),
            max_request_size: self.max_request_size.unwrap_or(defaults.max_request_size),
            pool_max_idle_per_host: self
                .pool_max_idle_per_host
                .unwrap_or(defaults.pool_max_idle_per_host),
            tcp_keepalive: self.tcp_keepalive.unwrap_or(defaults.tcp_keepalive),
        };

        config.validate()?;
        Ok(config)
    }
}
