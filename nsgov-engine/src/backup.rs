//! Backup coordinator
//!
//! Snapshots a namespace's resource set before anything destructive happens
//! to it. Artifacts are JSON documents addressed by namespace, capture time
//! and checksum; a store never overwrites an existing artifact.

use crate::error::BackupError;
use crate::gateway::{ClusterGateway, ExportedResource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Current artifact layout version
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Write-once artifact storage
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Store `bytes` under `key`; an existing key is an error
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, BackupError>;

    /// Read an artifact back, `None` if absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackupError>;

    /// Human-readable location of `key`
    fn location(&self, key: &str) -> String;
}

/// Filesystem store rooted at a directory: `<root>/<namespace>/<file>.json`
#[derive(Debug, Clone)]
pub struct FsBackupStore {
    root: PathBuf,
}

impl FsBackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BackupError> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(BackupError::Store(format!("invalid backup key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BackupStore for FsBackupStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, BackupError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write aside, then link into place; linking never replaces an existing file
        let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
        tokio::fs::write(&tmp, bytes).await?;
        let linked = tokio::fs::hard_link(&tmp, &path).await;
        let _ = tokio::fs::remove_file(&tmp).await;

        match linked {
            Ok(()) => Ok(path.display().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(BackupError::Store(format!(
                "backup artifact {} already exists",
                path.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackupError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn location(&self, key: &str) -> String {
        self.root.join(key).display().to_string()
    }
}

/// Serialized backup document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub format_version: u32,
    pub namespace: String,
    pub captured_at: DateTime<Utc>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub resources: Vec<ExportedResource>,
}

/// Proof that a verified backup exists
///
/// Only this module constructs handles; destructive operations take one as
/// an argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupHandle {
    namespace: String,
    key: String,
    location: String,
    checksum: String,
    resource_count: usize,
    created_at: DateTime<Utc>,
}

impl BackupHandle {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Store key, recorded on the namespace as its last backup
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Hex SHA-256 of the stored artifact
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn resource_count(&self) -> usize {
        self.resource_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Takes and verifies backups
#[derive(Clone)]
pub struct BackupCoordinator {
    gateway: Arc<dyn ClusterGateway>,
    store: Arc<dyn BackupStore>,
    store_attempts: u32,
}

impl BackupCoordinator {
    pub fn new(gateway: Arc<dyn ClusterGateway>, store: Arc<dyn BackupStore>) -> Self {
        Self {
            gateway,
            store,
            store_attempts: 3,
        }
    }

    pub fn with_store_attempts(mut self, attempts: u32) -> Self {
        self.store_attempts = attempts.max(1);
        self
    }

    /// Export, store and verify a backup of `name`
    pub async fn snapshot(&self, name: &str) -> Result<BackupHandle, BackupError> {
        let object = self.gateway.get(name).await.map_err(BackupError::Export)?;
        let resources = self
            .gateway
            .export_resources(name)
            .await
            .map_err(BackupError::Export)?;

        let artifact = BackupArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            namespace: name.to_string(),
            captured_at: Utc::now(),
            labels: object.labels,
            annotations: object.annotations,
            resources,
        };
        let bytes = serde_json::to_vec_pretty(&artifact)?;
        let sum = checksum(&bytes);
        let key = format!(
            "{}/{}-{}.json",
            name,
            artifact.captured_at.format("%Y%m%dT%H%M%S%.3fZ"),
            &sum[..12]
        );

        let location = self.store_until_confirmed(&key, &bytes, &sum).await?;
        self.confirm(&key, &sum).await?;

        info!(
            namespace = name,
            key = %key,
            resources = artifact.resources.len(),
            "Backup verified"
        );

        Ok(BackupHandle {
            namespace: name.to_string(),
            key,
            location,
            checksum: sum,
            resource_count: artifact.resources.len(),
            created_at: artifact.captured_at,
        })
    }

    /// Retry the write only while the artifact is not confirmed present
    async fn store_until_confirmed(&self, key: &str, bytes: &[u8], sum: &str) -> Result<String, BackupError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.put(key, bytes).await {
                Ok(location) => return Ok(location),
                Err(err) => {
                    if self.confirm(key, sum).await.is_ok() {
                        debug!(key, "Backup write reported failure but artifact is present");
                        return Ok(self.store.location(key));
                    }
                    if attempt >= self.store_attempts {
                        return Err(err);
                    }
                    warn!(key, attempt, "Retrying backup write: {}", err);
                }
            }
        }
    }

    /// Read an artifact back and compare its checksum
    pub async fn confirm(&self, key: &str, expected: &str) -> Result<(), BackupError> {
        let bytes = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| BackupError::Missing { key: key.to_string() })?;

        let actual = checksum(&bytes);
        if actual != expected {
            return Err(BackupError::ChecksumMismatch {
                key: key.to_string(),
                expected: expected.to_string(),
                actual,
            });
        }

        Ok(())
    }

    /// Re-verify a previously recorded backup and rebuild its handle
    pub async fn recover(&self, name: &str, key: &str, expected: &str) -> Result<BackupHandle, BackupError> {
        self.confirm(key, expected).await?;
        let artifact = self.load(key).await?;

        if artifact.namespace != name {
            return Err(BackupError::Store(format!(
                "backup {} belongs to '{}', not '{}'",
                key, artifact.namespace, name
            )));
        }

        Ok(BackupHandle {
            namespace: name.to_string(),
            key: key.to_string(),
            location: self.store.location(key),
            checksum: expected.to_string(),
            resource_count: artifact.resources.len(),
            created_at: artifact.captured_at,
        })
    }

    /// Decode a stored artifact
    pub async fn load(&self, key: &str) -> Result<BackupArtifact, BackupError> {
        let bytes = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| BackupError::Missing { key: key.to_string() })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
