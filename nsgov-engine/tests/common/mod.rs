//! Common test utilities and helpers

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use nsgov_engine::gateway::memory::InMemoryGateway;
use nsgov_engine::gateway::NamespaceObject;
use nsgov_engine::record::format_timestamp;
use nsgov_engine::backup::BackupArtifact;
use nsgov_engine::{BackupCoordinator, FsBackupStore, GovernanceConfig, GovernanceEngine};
use std::sync::Arc;
use tempfile::TempDir;

/// Engine wired to an in-memory cluster and a scratch backup directory
pub struct TestEnv {
    pub gateway: InMemoryGateway,
    pub engine: GovernanceEngine,
    pub backup_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(mut config: GovernanceConfig) -> Self {
        let backup_dir = TempDir::new().unwrap();
        config.backup.dir = backup_dir.path().to_path_buf();

        let gateway = InMemoryGateway::new();
        let store = Arc::new(FsBackupStore::new(backup_dir.path()));
        let engine = GovernanceEngine::new(&config, Arc::new(gateway.clone()), store).unwrap();

        Self {
            gateway,
            engine,
            backup_dir,
        }
    }

    /// Number of artifact files written for a namespace
    pub fn backup_files(&self, namespace: &str) -> usize {
        std::fs::read_dir(self.backup_dir.path().join(namespace))
            .map(|entries| entries.filter_map(Result::ok).count())
            .unwrap_or(0)
    }

    /// Load a stored backup artifact by key
    pub async fn load_backup(&self, key: &str) -> BackupArtifact {
        BackupCoordinator::new(
            Arc::new(self.gateway.clone()),
            Arc::new(FsBackupStore::new(self.backup_dir.path())),
        )
        .load(key)
        .await
        .unwrap()
    }

    /// Overwrite one annotation directly on the stored object
    pub async fn set_annotation(&self, namespace: &str, key: &str, value: &str) {
        let mut object: NamespaceObject = self.gateway.peek(namespace).await.unwrap();
        object.annotations.insert(key.to_string(), value.to_string());
        self.gateway.insert_namespace(object).await;
    }

    pub async fn set_marker(&self, namespace: &str, since: DateTime<Utc>) {
        self.set_annotation(
            namespace,
            nsgov_engine::record::ANN_DELETION_STARTED_AT,
            &format_timestamp(&since),
        )
        .await;
    }
}

/// Default configuration with millisecond backoff
pub fn test_config() -> GovernanceConfig {
    let mut config = GovernanceConfig::default();
    config.gateway.max_attempts = 2;
    config.gateway.initial_backoff_ms = 1;
    config.gateway.max_backoff_ms = 2;
    config.gateway.call_timeout_secs = 5;
    config.gateway.deadline_secs = 10;
    config
}

/// Noon UTC on the given day
pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}
