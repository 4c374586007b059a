//! Typed errors for the harvest engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so the retry policy can
//! decide over data instead of matching on message strings.

use std::path::PathBuf;
use thiserror::Error;

/// Outcome class of one failed remote call.
///
/// Every failure is exactly one of these four kinds. The kind alone decides
/// whether and how a call is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// Deadline elapsed before the service answered
    #[error("timeout: {0}")]
    Timeout(String),

    /// Service-side failure under load (5xx, 429, truncated body)
    #[error("server error: {0}")]
    ServerError(String),

    /// Malformed request; retrying cannot succeed
    #[error("client error: {0}")]
    ClientError(String),

    /// Transport failure unrelated to request volume
    #[error("network error: {0}")]
    NetworkError(String),
}

impl Failure {
    /// Whether the failure is plausibly caused by the requested volume.
    pub fn is_load_related(&self) -> bool {
        matches!(self, Failure::Timeout(_) | Failure::ServerError(_))
    }

    /// Short name for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Failure::Timeout(_) => "timeout",
            Failure::ServerError(_) => "server_error",
            Failure::ClientError(_) => "client_error",
            Failure::NetworkError(_) => "network_error",
        }
    }
}

/// Errors that escape a unit of work.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Operator asked the run to stop
    #[error("interrupted by operator")]
    Interrupted,

    /// A call was rejected without retry
    #[error("request rejected: {0}")]
    Rejected(Failure),

    /// Checkpoint artifact could not be written or read
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Job profile is unusable
    #[error("invalid profile: {reason}")]
    Profile { reason: String },

    /// Unexpected failure escaping every recovery layer
    #[error("fatal error: {reason}")]
    Fatal {
        reason: String,
        /// Artifact holding whatever was accumulated, if one could be written
        artifact: Option<PathBuf>,
    },
}

impl HarvestError {
    pub fn profile(reason: impl Into<String>) -> Self {
        HarvestError::Profile {
            reason: reason.into(),
        }
    }
}

/// Errors from the checkpoint writer.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A commit would durably drop records already written
    #[error("checkpoint regression: {attempted} records after {previous}")]
    Regression { previous: usize, attempted: usize },
}

/// Result type alias for harvest operations.
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for a single remote call.
pub type CallResult<T> = std::result::Result<T, Failure>;
