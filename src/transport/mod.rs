//! HTTP transport layer for the CKAN API.

mod http;

pub use http::{HttpTransport, ReqwestTransport, TransportResponse};
