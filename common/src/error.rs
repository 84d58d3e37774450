//! Error types for Replicant cluster coordination.

use crate::CoordinationState;
use thiserror::Error;

/// Main error type for cluster coordination operations.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The naming directory could not be reached or did not answer in time.
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// The primary name is bound to a different address.
    #[error("Primary name {name} already claimed by {holder}")]
    AlreadyClaimed { name: String, holder: String },

    /// A role-specific preparation hook failed.
    #[error("Preparation failed: {0}")]
    PreparationError(String),

    /// The database process could not be started.
    #[error("Process start failed: {0}")]
    StartError(String),

    /// The database process reported a failed start.
    #[error("Process failed to start: {0}")]
    ProcessFailed(String),

    /// No process outcome was produced before the poll deadline.
    #[error("No process outcome after {timeout_secs}s")]
    PollTimeout { timeout_secs: u64 },

    /// The database published under the primary name could not be reached.
    #[error("Incumbent at {address} unreachable: {reason}")]
    IncumbentUnreachable { address: String, reason: String },

    /// The local database is not a replica and cannot be promoted.
    #[error("Local database is not a replica: {0}")]
    NotReplica(String),

    /// The local promote operation failed after the guard approved it.
    #[error("Promotion failed: {0}")]
    PromotionFailed(String),

    /// A required metadata key is missing.
    #[error("Missing metadata key: {0}")]
    MissingMetadata(String),

    /// A template placeholder has no value.
    #[error("Missing template value: {0}")]
    MissingTemplateKey(String),

    /// Invalid coordination state transition.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: CoordinationState,
        to: CoordinationState,
    },

    /// A coordinator instance was asked to run a second time.
    #[error("Coordination run already started")]
    RunAlreadyStarted,

    /// The coordination run was cancelled by the caller.
    #[error("Coordination cancelled")]
    Cancelled,

    /// Database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    /// Check if this error is retryable by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClusterError::DirectoryUnavailable(_) | ClusterError::DatabaseError(_)
        )
    }

    /// Get a stable error code for operator-facing output.
    pub fn error_code(&self) -> &'static str {
        match self {
            ClusterError::DirectoryUnavailable(_) => "DIRECTORY_UNAVAILABLE",
            ClusterError::AlreadyClaimed { .. } => "ALREADY_CLAIMED",
            ClusterError::PreparationError(_) => "PREPARATION_ERROR",
            ClusterError::StartError(_) => "START_ERROR",
            ClusterError::ProcessFailed(_) => "PROCESS_FAILED",
            ClusterError::PollTimeout { .. } => "POLL_TIMEOUT",
            ClusterError::IncumbentUnreachable { .. } => "INCUMBENT_UNREACHABLE",
            ClusterError::NotReplica(_) => "NOT_REPLICA",
            ClusterError::PromotionFailed(_) => "PROMOTION_FAILED",
            ClusterError::MissingMetadata(_) => "MISSING_METADATA",
            ClusterError::MissingTemplateKey(_) => "MISSING_TEMPLATE_KEY",
            ClusterError::InvalidTransition { .. } => "INVALID_TRANSITION",
            ClusterError::RunAlreadyStarted => "RUN_ALREADY_STARTED",
            ClusterError::Cancelled => "CANCELLED",
            ClusterError::DatabaseError(_) => "DATABASE_ERROR",
            ClusterError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            ClusterError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for cluster coordination operations.
pub type Result<T> = std::result::Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_unavailable_is_retryable() {
        let err = ClusterError::DirectoryUnavailable("connection refused".to_string());
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), "DIRECTORY_UNAVAILABLE");
    }

    #[test]
    fn test_already_claimed_is_fatal() {
        let err = ClusterError::AlreadyClaimed {
            name: "master.test.example.com".to_string(),
            holder: "10.0.0.2".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Primary name master.test.example.com already claimed by 10.0.0.2"
        );
    }

    #[test]
    fn test_only_transient_failures_are_retryable() {
        let timed_out = ClusterError::PollTimeout { timeout_secs: 30 };
        assert!(!timed_out.is_retryable());
        assert_eq!(timed_out.error_code(), "POLL_TIMEOUT");

        assert!(ClusterError::DatabaseError("connection reset".to_string()).is_retryable());
        assert!(!ClusterError::Cancelled.is_retryable());
    }
}
