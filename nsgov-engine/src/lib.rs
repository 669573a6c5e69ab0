//! nsgov Engine Library
//!
//! Namespace lifecycle and resource governance: stage transitions with
//! per-stage policy bundles, readiness diagnostics, backed-up reclamation of
//! expired namespaces, all against an abstract cluster gateway.

// Core modules
pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

// Policy
pub mod catalog;
pub mod quantity;

// Lifecycle
pub mod lifecycle;
pub mod locks;
pub mod record;

// Cluster access
pub mod gateway;

// Operations
pub mod backup;
pub mod diagnostics;
pub mod engine;
pub mod sweeper;

pub use backup::{BackupCoordinator, BackupHandle, BackupStore, FsBackupStore};
pub use catalog::{PolicyBundle, PolicyCatalog};
pub use config::{ConfigError, GovernanceConfig};
pub use diagnostics::{DiagnosticReport, DiagnosticScorer};
pub use engine::{CreateRequest, GovernanceEngine, TransitionOutcome};
pub use error::{BackupError, GatewayError, GovernanceError, GovernanceResult};
pub use gateway::ClusterGateway;
pub use lifecycle::StateMachine;
pub use nsgov_common::{DiagnosticBucket, ParseStageError, Priority, Stage};
pub use record::NamespaceRecord;
pub use sweeper::{ExpirationSweeper, ReclaimAction, ReclaimOutcome};
