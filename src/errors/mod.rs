//! Error types for the CKAN API client.
//!
//! This module provides the error taxonomy every failure is mapped into
//! before it reaches a caller.

mod error;

pub use error::{CkanError, CkanResult};
