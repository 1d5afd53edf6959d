//! HTTP transport implementation.

use crate::config::CkanConfig;
use crate::errors::{CkanError, CkanResult};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

/// Response from the HTTP transport
#[derive(Debug)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

/// HTTP transport trait for making requests to the CKAN API.
///
/// GET requests carry `params` as query string pairs; POST requests carry
/// them as a JSON body, matching the CKAN action API convention.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a single HTTP request.
    ///
    /// Returns `Ok` only for 2xx responses within the configured size limit;
    /// every other outcome is mapped to a typed error.
    async fn send(
        &self,
        method: Method,
        url: Url,
        params: &Map<String, Value>,
    ) -> CkanResult<TransportResponse>;
}

/// Reqwest-based HTTP transport implementation
pub struct ReqwestTransport {
    client: Client,
    max_response_size: u64,
}

impl ReqwestTransport {
    /// Create a new transport from the client configuration.
    pub fn new(config: &CkanConfig) -> CkanResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_keepalive(config.tcp_keepalive)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| CkanError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            max_response_size: config.max_response_size,
        })
    }

    /// Create a transport around an existing reqwest client.
    pub fn with_client(client: Client, max_response_size: u64) -> Self {
        Self {
            client,
            max_response_size,
        }
    }

    /// Render a JSON parameter value as a query string value.
    ///
    /// Strings go through verbatim; everything else uses its JSON rendering
    /// (numbers, booleans, and the JSON text of nested structures).
    fn query_value(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Map a non-success HTTP status to a typed error.
    fn map_http_error(status: u16, headers: &HeaderMap, body: &Bytes) -> CkanError {
        let body_str = truncate(&String::from_utf8_lossy(body), 500);

        match status {
            404 => CkanError::NotFound {
                message: body_str,
                resource_type: "resource".to_string(),
            },
            429 => CkanError::RateLimit {
                message: "rate limit imposed by the CKAN API".to_string(),
                retry_after: parse_retry_after(headers),
            },
            500..=599 => CkanError::Server {
                message: format!("CKAN API server error: HTTP {} {}", status, body_str),
                status_code: Some(status),
            },
            _ => CkanError::Api {
                status,
                message: body_str,
            },
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        method: Method,
        url: Url,
        params: &Map<String, Value>,
    ) -> CkanResult<TransportResponse> {
        let request = if method == Method::GET {
            let query: Vec<(String, String)> = params
                .iter()
                .map(|(k, v)| (k.clone(), Self::query_value(v)))
                .collect();
            self.client.get(url.as_str()).query(&query)
        } else {
            self.client.post(url.as_str()).json(params)
        };

        let response = request.send().await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();

        // An oversized response is rejected on the declared length alone,
        // before the body is pulled over the wire
        if let Some(length) = response.content_length() {
            if length > self.max_response_size {
                return Err(CkanError::ResponseTooLarge {
                    size: length,
                    limit: self.max_response_size,
                });
            }
        }

        let body = response.bytes().await?;

        if !(200..300).contains(&status) {
            return Err(Self::map_http_error(status, &headers, &body));
        }

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// Parse a Retry-After header given in seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
