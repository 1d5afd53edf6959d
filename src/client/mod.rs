//! CKAN client: the composition root wiring rate limiting, circuit breaking
//! and retry around every outbound API call.

use crate::config::CkanConfig;
use crate::errors::{CkanError, CkanResult};
use crate::resilience::{
    BucketStatus, CircuitBreaker, CircuitSnapshot, RateLimiter, RateLimiterMetrics, RetryExecutor,
};
use crate::transport::{HttpTransport, ReqwestTransport, TransportResponse};
use chrono::{DateTime, Utc};
use http::Method;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use url::Url;

/// Result of a CKAN health probe
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status: "healthy" or "unhealthy"
    pub status: String,
    /// Upstream availability: "available" or "unavailable"
    pub ckan_api: String,
    /// When the probe ran
    pub timestamp: DateTime<Utc>,
    /// Failure detail when unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Client for a CKAN action API with built-in resilience.
///
/// Each outbound call flows through the rate limiter, then the circuit
/// breaker, then the retrying transport attempt, and finally response
/// classification. All layers are owned by the client instance; construct
/// one per upstream and share it by reference or `Arc`.
pub struct CkanClient {
    config: Arc<CkanConfig>,
    transport: Arc<dyn HttpTransport>,
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor,
}

impl CkanClient {
    /// Create a new client from configuration
    pub fn new(config: CkanConfig) -> CkanResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Self::with_transport(config, transport)
    }

    /// Create a new client with an injected transport
    pub fn with_transport(
        config: CkanConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> CkanResult<Self> {
        config.validate()?;

        Ok(Self {
            rate_limiter: Arc::new(RateLimiter::with_config(config.rate_limit.clone())),
            circuit_breaker: Arc::new(CircuitBreaker::with_config(
                config.circuit_breaker.clone(),
            )),
            retry: RetryExecutor::with_config(config.retry.clone()),
            config: Arc::new(config),
            transport,
        })
    }

    /// Create a new client from environment variables
    pub fn from_env() -> CkanResult<Self> {
        Self::new(CkanConfig::from_env()?)
    }

    /// The configuration in effect
    pub fn config(&self) -> &CkanConfig {
        &self.config
    }

    /// Call a CKAN action with a GET request
    pub async fn get(&self, action: &str, params: Map<String, Value>) -> CkanResult<Value> {
        self.api_call(action, params, Method::GET, None).await
    }

    /// Call a CKAN action with a POST request
    pub async fn post(&self, action: &str, params: Map<String, Value>) -> CkanResult<Value> {
        self.api_call(action, params, Method::POST, None).await
    }

    /// Call a CKAN action with full control over method and rate-limit
    /// attribution.
    ///
    /// Returns the `result` payload of the CKAN envelope on success. Every
    /// failure surfaces as a typed [`CkanError`]; a local rate-limit
    /// rejection fails the call, but an internal limiter fault merely logs
    /// and lets the call proceed.
    pub async fn api_call(
        &self,
        action: &str,
        params: Map<String, Value>,
        method: Method,
        client_id: Option<&str>,
    ) -> CkanResult<Value> {
        if action.is_empty() {
            return Err(CkanError::Validation {
                message: "action must be a non-empty string".to_string(),
            });
        }
        if method != Method::GET && method != Method::POST {
            return Err(CkanError::Validation {
                message: format!("method must be GET or POST, got {}", method),
            });
        }

        if method == Method::POST {
            let size = serde_json::to_vec(&params)?.len();
            if size > self.config.max_request_size {
                return Err(CkanError::RequestTooLarge {
                    size,
                    limit: self.config.max_request_size,
                });
            }
        }

        match self
            .rate_limiter
            .acquire(client_id, 1.0, false, self.config.rate_acquire_timeout)
            .await
        {
            Ok(()) => {}
            Err(error @ CkanError::RateLimit { .. }) => return Err(error),
            // Rate limiting degrades open: an internal limiter fault must
            // not take the whole call down with it
            Err(error) => {
                tracing::warn!(error = %error, "rate limiter failed, proceeding unthrottled");
            }
        }

        let url = self.action_url(action)?;

        let result = self
            .circuit_breaker
            .call(|| async {
                let response = self
                    .retry
                    .execute(|| self.transport.send(method.clone(), url.clone(), &params))
                    .await?;
                classify_envelope(response)
            })
            .await;

        match &result {
            Ok(_) => tracing::debug!(action, "ckan api call succeeded"),
            Err(error) => tracing::debug!(action, error = %error, "ckan api call failed"),
        }

        result
    }

    /// Probe the upstream with the `status_show` action.
    ///
    /// Never fails; an unreachable upstream is reported as data.
    pub async fn health_check(&self) -> HealthStatus {
        match self.get("status_show", Map::new()).await {
            Ok(_) => HealthStatus {
                status: "healthy".to_string(),
                ckan_api: "available".to_string(),
                timestamp: Utc::now(),
                error: None,
            },
            Err(error) => {
                tracing::error!(error = %error, "health check failed");
                HealthStatus {
                    status: "unhealthy".to_string(),
                    ckan_api: "unavailable".to_string(),
                    timestamp: Utc::now(),
                    error: Some(error.to_string()),
                }
            }
        }
    }

    /// Circuit breaker diagnostics
    pub fn circuit_snapshot(&self) -> CircuitSnapshot {
        self.circuit_breaker.snapshot()
    }

    /// Force the circuit breaker back to closed
    pub fn reset_circuit_breaker(&self) {
        self.circuit_breaker.reset();
    }

    /// Rate limiter bucket status for a client (or the shared bucket)
    pub fn rate_limit_status(&self, client_id: Option<&str>) -> BucketStatus {
        self.rate_limiter.status(client_id)
    }

    /// Rate limiter counters
    pub fn rate_limiter_metrics(&self) -> RateLimiterMetrics {
        self.rate_limiter.metrics()
    }

    fn action_url(&self, action: &str) -> CkanResult<Url> {
        let joined = format!("{}/{}", self.config.base_url.trim_end_matches('/'), action);
        Ok(Url::parse(&joined)?)
    }
}

/// Classify a 2xx CKAN response envelope into a payload or a typed error.
///
/// CKAN reports application-level failures inside a 200 response: the
/// envelope carries `success: false` and an error description, which is
/// refined by message inspection.
fn classify_envelope(response: TransportResponse) -> CkanResult<Value> {
    let envelope: Value =
        serde_json::from_slice(&response.body).map_err(|e| CkanError::Api {
            status: response.status,
            message: format!("invalid JSON response: {}", e),
        })?;

    let success = envelope
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if !success {
        let message = error_message(envelope.get("error"));
        let lowered = message.to_lowercase();

        if lowered.contains("not found") {
            return Err(CkanError::NotFound {
                message,
                resource_type: "resource".to_string(),
            });
        }
        if lowered.contains("permission") || lowered.contains("access") {
            return Err(CkanError::Api {
                status: 403,
                message: format!("permission denied: {}", message),
            });
        }
        return Err(CkanError::Api {
            status: response.status,
            message: format!("CKAN API error: {}", message),
        });
    }

    Ok(envelope
        .get("result")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new())))
}

/// Extract a human-readable message from a CKAN error object.
fn error_message(error: Option<&Value>) -> String {
    match error {
        Some(Value::Object(obj)) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(obj.clone()).to_string()),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "unknown error".to_string(),
    }
}
