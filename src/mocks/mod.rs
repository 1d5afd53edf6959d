//! Mock implementations for testing.
//!
//! Provides a scripted [`HttpTransport`] so the client composition can be
//! exercised without a network.

use crate::errors::{CkanError, CkanResult};
use crate::transport::{HttpTransport, TransportResponse};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use url::Url;

/// A request recorded by the mock transport
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method
    pub method: Method,
    /// Request URL
    pub url: String,
    /// Request parameters
    pub params: Map<String, Value>,
}

/// Scripted HTTP transport: returns queued outcomes in order and records
/// every request it receives.
pub struct MockTransport {
    outcomes: Mutex<VecDeque<CkanResult<TransportResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    /// Create a new mock transport with an empty script
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue an outcome to return
    pub fn push(&self, outcome: CkanResult<TransportResponse>) {
        self.outcomes.lock().push_back(outcome);
    }

    /// Queue a successful JSON response
    pub fn push_json(&self, status: u16, body: &Value) {
        self.push(Ok(TransportResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::from(serde_json::to_vec(body).unwrap()),
        }));
    }

    /// Queue a transport-level error
    pub fn push_error(&self, error: CkanError) {
        self.push(Err(error));
    }

    /// Number of requests seen so far
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// All requests seen so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(
        &self,
        method: Method,
        url: Url,
        params: &Map<String, Value>,
    ) -> CkanResult<TransportResponse> {
        self.requests.lock().push(RecordedRequest {
            method,
            url: url.to_string(),
            params: params.clone(),
        });

        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| {
                Err(CkanError::Internal {
                    message: "mock transport script exhausted".to_string(),
                })
            })
    }
}
