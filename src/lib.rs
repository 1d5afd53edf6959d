//! # CKAN API Client
//!
//! Production-ready Rust client core for CKAN-based open data portals.
//!
//! ## Features
//!
//! - Resilient outbound calls: token-bucket rate limiting (per-client and
//!   burst), circuit breaker, bounded exponential-backoff retry
//! - Typed error taxonomy covering transport, upstream and policy failures
//! - CKAN envelope classification (`success` flag, error message refinement)
//! - Response/request size limits enforced before data moves
//! - Health probing against the `status_show` action
//! - Observability via `tracing` events and state snapshots
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_ckan::{CkanClient, CkanConfig};
//! use serde_json::{json, Map};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CkanConfig::builder()
//!         .base_url("https://data.boston.gov/api/3/action")
//!         .build()?;
//!     let client = CkanClient::new(config)?;
//!
//!     let mut params = Map::new();
//!     params.insert("q".to_string(), json!("crime"));
//!     let results = client.get("package_search", params).await?;
//!     println!("{}", results);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - `client` - Main client and the resilient call composition
//! - `config` - Configuration types, builder, environment loading
//! - `errors` - Error types and taxonomy
//! - `resilience` - Rate limiting, circuit breaker, retry
//! - `transport` - HTTP transport layer

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod client;
pub mod config;
pub mod errors;
pub mod resilience;
pub mod transport;

// Development/testing modules
#[cfg(test)]
pub mod mocks;

// Re-exports for convenience
pub use client::{CkanClient, HealthStatus};
pub use config::{CkanConfig, CkanConfigBuilder};
pub use errors::{CkanError, CkanResult};
pub use resilience::{
    BucketStatus, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
    RateLimitConfig, RateLimiter, RetryConfig, RetryExecutor, TokenBucket,
};
pub use transport::{HttpTransport, ReqwestTransport, TransportResponse};

/// The default CKAN action API base URL (Boston OpenData)
pub use config::DEFAULT_BASE_URL;
