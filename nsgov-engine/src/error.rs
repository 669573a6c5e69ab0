//! Error types for the governance engine
//!
//! `GatewayError` is what a cluster gateway reports, `BackupError` what the
//! backup coordinator reports, and `GovernanceError` is what callers of the
//! engine see.

use nsgov_common::Stage;
use thiserror::Error;

/// Errors reported by a cluster gateway
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Object does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency precondition failed or object already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transient failure (network, timeout, server error)
    #[error("Cluster gateway unavailable: {0}")]
    Unavailable(String),

    /// Request refused by the cluster (forbidden, invalid); never retried
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Only transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Errors raised while taking or verifying a backup
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("failed to export namespace resources: {0}")]
    Export(GatewayError),

    #[error("failed to encode backup artifact: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("backup store error: {0}")]
    Store(String),

    #[error("backup artifact {key} is missing")]
    Missing { key: String },

    #[error("checksum mismatch for {key}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the governance engine
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// Bad name, stage or attribute input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Edge not present in the lifecycle graph
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },

    /// Archived namespaces can only be reactivated with the reactivation capability
    #[error("Reactivating '{name}' from archived to {to} requires the allow_reactivation capability")]
    ReactivationDenied { name: String, to: Stage },

    /// Stage missing from the policy catalog
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Namespace not found: {0}")]
    NotFound(String),

    /// Stale write or concurrent reclamation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A backup-guarded transition could not obtain its backup
    #[error("Backup required before '{name}' can enter {stage}")]
    BackupRequired {
        name: String,
        stage: Stage,
        #[source]
        source: BackupError,
    },

    /// Backup for a deletion failed
    #[error("Backup failed for '{name}'")]
    BackupFailure {
        name: String,
        #[source]
        source: BackupError,
    },

    /// Lifecycle labels/annotations on the object cannot be interpreted
    #[error("Corrupt lifecycle metadata on '{name}': {reason}")]
    Corrupt { name: String, reason: String },

    #[error("Cluster gateway error: {0}")]
    Gateway(GatewayError),
}

impl GovernanceError {
    /// Stable error kind name, shown in non-verbose output
    pub fn kind(&self) -> &'static str {
        match self {
            GovernanceError::Validation(_) => "ValidationError",
            GovernanceError::InvalidTransition { .. } => "InvalidTransitionError",
            GovernanceError::ReactivationDenied { .. } => "ReactivationDeniedError",
            GovernanceError::UnknownStage(_) => "UnknownStageError",
            GovernanceError::NotFound(_) => "NotFoundError",
            GovernanceError::Conflict(_) => "ConflictError",
            GovernanceError::BackupRequired { .. } => "BackupRequiredError",
            GovernanceError::BackupFailure { .. } => "BackupFailure",
            GovernanceError::Corrupt { .. } => "CorruptRecordError",
            GovernanceError::Gateway(_) => "GatewayUnavailable",
        }
    }
}

impl From<GatewayError> for GovernanceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(name) => GovernanceError::NotFound(name),
            GatewayError::Conflict(name) => GovernanceError::Conflict(name),
            other => GovernanceError::Gateway(other),
        }
    }
}

/// Result type alias for engine operations
pub type GovernanceResult<T> = std::result::Result<T, GovernanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_mapping() {
        let err: GovernanceError = GatewayError::NotFound("team-a".to_string()).into();
        assert!(matches!(err, GovernanceError::NotFound(ref n) if n == "team-a"));

        let err: GovernanceError = GatewayError::Conflict("team-a".to_string()).into();
        assert_eq!(err.kind(), "ConflictError");

        let err: GovernanceError = GatewayError::Unavailable("timeout".to_string()).into();
        assert_eq!(err.kind(), "GatewayUnavailable");
    }

    #[test]
    fn test_conflict_message_reads_as_sentence() {
        let err = GovernanceError::Conflict("reclamation of 'team-a' is in progress".to_string());
        assert_eq!(err.to_string(), "Conflict: reclamation of 'team-a' is in progress");
    }

    #[test]
    fn test_retryable() {
        assert!(GatewayError::Unavailable("x".into()).is_retryable());
        assert!(!GatewayError::Conflict("x".into()).is_retryable());
        assert!(!GatewayError::Rejected("x".into()).is_retryable());
        assert!(!GatewayError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_backup_required_keeps_source() {
        use std::error::Error as _;

        let err = GovernanceError::BackupRequired {
            name: "team-a".to_string(),
            stage: Stage::Archived,
            source: BackupError::Store("disk full".to_string()),
        };
        assert_eq!(err.to_string(), "Backup required before 'team-a' can enter archived");
        assert!(err.source().unwrap().to_string().contains("disk full"));
    }
}
