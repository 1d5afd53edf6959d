//! Error types for the CKAN API client.

use crate::resilience::CircuitSnapshot;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for CKAN operations
pub type CkanResult<T> = Result<T, CkanError>;

/// Main error type for the CKAN API client.
///
/// Every failure that crosses the client boundary is one of these variants;
/// raw transport or serialization errors never leak through.
#[derive(Error, Debug, Clone)]
pub enum CkanError {
    /// Configuration error (invalid settings, missing required fields)
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Validation error (invalid request parameters)
    #[error("Validation error: {message}")]
    Validation {
        /// Error message describing the validation issue
        message: String,
    },

    /// Request body exceeds the configured maximum size
    #[error("Request too large: {size} bytes (limit {limit})")]
    RequestTooLarge {
        /// Serialized request size in bytes
        size: usize,
        /// Configured maximum request size
        limit: usize,
    },

    /// Response exceeds the configured maximum size
    #[error("Response too large: {size} bytes (limit {limit})")]
    ResponseTooLarge {
        /// Declared response size in bytes
        size: u64,
        /// Configured maximum response size
        limit: u64,
    },

    /// Rate limit exceeded, either by the local limiter or by the upstream API
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        /// Error message describing which limit was hit
        message: String,
        /// Duration to wait before retrying
        retry_after: Option<Duration>,
    },

    /// Circuit breaker rejected the call without attempting any I/O
    #[error("Circuit breaker is open: {snapshot}")]
    CircuitOpen {
        /// Breaker diagnostics at the moment of rejection
        snapshot: CircuitSnapshot,
    },

    /// Network error (connection failed, timeout, DNS issues)
    #[error("Network error: {message}")]
    Network {
        /// Error message describing the network issue
        message: String,
    },

    /// Server error (5xx responses from the CKAN API)
    #[error("Server error: {message}")]
    Server {
        /// Error message from the server
        message: String,
        /// HTTP status code
        status_code: Option<u16>,
    },

    /// Resource not found, from an HTTP 404 or a CKAN "not found" error
    #[error("Not found: {resource_type} {message}")]
    NotFound {
        /// Error message
        message: String,
        /// Type of resource that was not found
        resource_type: String,
    },

    /// API error (non-retryable HTTP status or CKAN application-level failure)
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Internal error (unexpected conditions, library bugs)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal issue
        message: String,
    },
}

impl CkanError {
    /// Returns true if this error is a transient upstream condition worth
    /// retrying with exponential backoff.
    ///
    /// Retryable errors include:
    /// - Rate limit errors (429)
    /// - Network errors (connection failures, timeouts)
    /// - Server errors (5xx)
    /// - Request timeout (408)
    pub fn is_retryable(&self) -> bool {
        match self {
            CkanError::RateLimit { .. } | CkanError::Network { .. } => true,
            CkanError::Server { status_code, .. } => {
                matches!(status_code, Some(s) if *s >= 500)
            }
            CkanError::Api { status, .. } => *status == 408,
            _ => false,
        }
    }

    /// Returns the retry-after duration if available.
    ///
    /// Set on rate limit errors when the upstream provides a Retry-After
    /// header, or when the local limiter computes a worst-case wait.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CkanError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Get the HTTP status code if available
    pub fn status_code(&self) -> Option<u16> {
        match self {
            CkanError::Server { status_code, .. } => *status_code,
            CkanError::Api { status, .. } => Some(*status),
            CkanError::RateLimit { .. } => Some(429),
            CkanError::NotFound { .. } => Some(404),
            _ => None,
        }
    }
}

// Conversions from common error types
impl From<reqwest::Error> for CkanError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CkanError::Network {
                message: format!("Request timed out: {}", err),
            }
        } else if err.is_connect() {
            CkanError::Network {
                message: format!("Connection failed: {}", err),
            }
        } else {
            CkanError::Network {
                message: format!("Network error: {}", err),
            }
        }
    }
}

impl From<serde_json::Error> for CkanError {
    fn from(err: serde_json::Error) -> Self {
        CkanError::Internal {
            message: format!("JSON serialization/deserialization error: {}", err),
        }
    }
}

impl From<url::ParseError> for CkanError {
    fn from(err: url::ParseError) -> Self {
        CkanError::Configuration {
            message: format!("Invalid URL: {}", err),
        }
    }
}
