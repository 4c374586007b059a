//! Error types for the SPARQL client.

use thiserror::Error;

/// Result type for SPARQL client operations.
pub type Result<T> = std::result::Result<T, SparqlError>;

/// SPARQL client errors.
///
/// Variants keep enough detail for callers to tell a slow endpoint apart from a
/// rejected query.
#[derive(Debug, Error)]
pub enum SparqlError {
    /// The request deadline elapsed before a response arrived
    #[error("query timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Endpoint answered with a non-2xx status
    #[error("endpoint returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// Transport failure (DNS, connect, reset)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// 2xx response whose body is not a SPARQL JSON result set
    #[error("could not decode result set: {0}")]
    Decode(String),
}

impl SparqlError {
    /// HTTP status of an `Api` error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            SparqlError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
