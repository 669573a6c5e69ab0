//! Expiration sweep and reclamation
//!
//! Reclaiming a namespace runs, under the per-name lock:
//! 1. Re-read the object and claim it with the `deletion-started-at` marker
//! 2. Take a verified backup (or reuse the one taken by an interrupted run)
//! 3. Apply the `deleting` bundle and write the stage
//! 4. Delete the object
//!
//! A namespace that disappears at any step is reported as already gone.

use crate::backup::{BackupCoordinator, BackupHandle};
use crate::error::{BackupError, GatewayError, GatewayResult, GovernanceError, GovernanceResult};
use crate::gateway::{ClusterGateway, MetadataPatch};
use crate::lifecycle::StateMachine;
use crate::locks::NamespaceLocks;
use crate::record::{managed_selector, NamespaceRecord, ANN_DELETION_STARTED_AT};
use crate::{log_reclaim, log_transition};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use nsgov_common::Stage;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of reclaiming one namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ReclaimOutcome {
    /// Dry run: would be reclaimed
    Eligible,
    Reclaimed { backup: BackupHandle },
    AlreadyGone,
    /// Another reclaimer holds a fresh marker
    InProgress { since: DateTime<Utc> },
    Failed { kind: String, message: String },
}

impl ReclaimOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReclaimOutcome::Eligible => "eligible",
            ReclaimOutcome::Reclaimed { .. } => "reclaimed",
            ReclaimOutcome::AlreadyGone => "already-gone",
            ReclaimOutcome::InProgress { .. } => "in-progress",
            ReclaimOutcome::Failed { .. } => "failed",
        }
    }
}

/// Per-namespace sweep entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReclaimAction {
    pub name: String,
    /// Unknown when the record could not be read
    pub stage: Option<Stage>,
    pub expires_at: Option<NaiveDate>,
    #[serde(flatten)]
    pub outcome: ReclaimOutcome,
}

/// `Ok(None)` for a vanished object, the value otherwise
fn present<T>(result: GatewayResult<T>) -> GovernanceResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(GatewayError::NotFound(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[derive(Clone)]
pub struct ExpirationSweeper {
    gateway: Arc<dyn ClusterGateway>,
    machine: StateMachine,
    backups: BackupCoordinator,
    locks: NamespaceLocks,
    stale_after: Duration,
}

impl ExpirationSweeper {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        machine: StateMachine,
        backups: BackupCoordinator,
        locks: NamespaceLocks,
        stale_marker_minutes: u32,
    ) -> Self {
        Self {
            gateway,
            machine,
            backups,
            locks,
            stale_after: Duration::minutes(i64::from(stale_marker_minutes)),
        }
    }

    /// Reclaim every managed namespace past expiry plus `grace_days`
    ///
    /// Per-namespace failures are reported in the returned actions; only a
    /// failure to list namespaces fails the sweep.
    pub async fn sweep(&self, now: DateTime<Utc>, grace_days: u32, dry_run: bool) -> GovernanceResult<Vec<ReclaimAction>> {
        let objects = self.gateway.list(&managed_selector()).await?;
        let mut actions = Vec::new();

        for object in &objects {
            let record = match NamespaceRecord::from_object(object) {
                Ok(record) => record,
                Err(err) => {
                    warn!(namespace = %object.name, "Skipping unreadable namespace: {}", err);
                    actions.push(ReclaimAction {
                        name: object.name.clone(),
                        stage: None,
                        expires_at: None,
                        outcome: ReclaimOutcome::Failed {
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                        },
                    });
                    continue;
                }
            };

            if !record.is_eligible(now, grace_days) {
                continue;
            }

            let outcome = if dry_run {
                ReclaimOutcome::Eligible
            } else {
                match self.reclaim(&record.name, "expired", now).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        warn!(namespace = %record.name, "Reclamation failed: {}", err);
                        ReclaimOutcome::Failed {
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                        }
                    }
                }
            };

            actions.push(ReclaimAction {
                name: record.name.clone(),
                stage: Some(record.stage),
                expires_at: record.expires_at,
                outcome,
            });
        }

        let failed = actions
            .iter()
            .filter(|a| matches!(a.outcome, ReclaimOutcome::Failed { .. }))
            .count();
        if failed > 0 {
            warn!(failed, total = actions.len(), "Sweep completed degraded");
        } else {
            info!(
                scanned = objects.len(),
                actions = actions.len(),
                dry_run,
                "Sweep completed"
            );
        }

        Ok(actions)
    }

    /// Back up, freeze and delete one namespace
    pub async fn reclaim(&self, name: &str, reason: &str, now: DateTime<Utc>) -> GovernanceResult<ReclaimOutcome> {
        let _guard = self.locks.acquire(name).await;

        let Some(record) = self.claim(name, now).await? else {
            log_reclaim!(name, "already-gone");
            return Ok(ReclaimOutcome::AlreadyGone);
        };
        let (record, resumed_since) = match record {
            Claim::Held { record, resumed_since } => (record, resumed_since),
            Claim::Busy(since) => return Ok(ReclaimOutcome::InProgress { since }),
        };
        log_reclaim!(name, "marked");

        let handle = match self.backup_for(&record, resumed_since).await {
            Ok(handle) => handle,
            Err(source) => {
                self.release(&record).await;
                return Err(GovernanceError::BackupFailure {
                    name: name.to_string(),
                    source,
                });
            }
        };

        let plan = self.machine.reclaim(&record, reason, now)?;
        if present(self.gateway.apply_policy_bundle(name, &plan.bundle).await)?.is_none() {
            log_reclaim!(name, "already-gone");
            return Ok(ReclaimOutcome::AlreadyGone);
        }

        let from = plan.from;
        let next = plan.commit(Some(&handle))?;
        if present(self.gateway.patch_metadata(name, &next.metadata_patch()).await)?.is_none() {
            log_reclaim!(name, "already-gone");
            return Ok(ReclaimOutcome::AlreadyGone);
        }
        log_transition!(name, from, Stage::Deleting, reason);

        if !self.delete_backed_up(&handle).await? {
            log_reclaim!(name, "already-gone");
            return Ok(ReclaimOutcome::AlreadyGone);
        }
        log_reclaim!(name, "deleted", backup = handle.key());

        Ok(ReclaimOutcome::Reclaimed { backup: handle })
    }

    /// Re-read the object and set the deletion marker
    ///
    /// `None` if the object is gone.
    async fn claim(&self, name: &str, now: DateTime<Utc>) -> GovernanceResult<Option<Claim>> {
        let mut retried = false;

        loop {
            let Some(object) = present(self.gateway.get(name).await)? else {
                return Ok(None);
            };
            if object.terminating {
                return Ok(None);
            }

            let record = NamespaceRecord::from_object(&object)?;
            match record.deletion_started_at {
                Some(since) if now - since < self.stale_after => return Ok(Some(Claim::Busy(since))),
                Some(since) => {
                    warn!(namespace = name, since = %since, "Taking over stale reclamation marker");
                }
                None => {}
            }

            let mut marked = record.clone();
            marked.deletion_started_at = Some(now);

            match self.gateway.patch_metadata(name, &marked.metadata_patch()).await {
                Ok(patched) => {
                    return Ok(Some(Claim::Held {
                        record: NamespaceRecord::from_object(&patched)?,
                        resumed_since: record.deletion_started_at,
                    }));
                }
                Err(GatewayError::NotFound(_)) => return Ok(None),
                Err(GatewayError::Conflict(_)) if !retried => {
                    retried = true;
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Reuse the backup of an interrupted reclamation when it still verifies
    async fn backup_for(
        &self,
        record: &NamespaceRecord,
        resumed_since: Option<DateTime<Utc>>,
    ) -> Result<BackupHandle, BackupError> {
        if let (Some(started), Some(key), Some(sum)) = (
            resumed_since,
            record.last_backup.as_deref(),
            record.last_backup_checksum.as_deref(),
        ) {
            match self.backups.recover(&record.name, key, sum).await {
                Ok(handle) if handle.created_at() >= started => {
                    log_reclaim!(record.name, "backup-reused", backup = key);
                    return Ok(handle);
                }
                Ok(_) => {}
                Err(err) => warn!(namespace = %record.name, "Recorded backup unusable, taking a new one: {}", err),
            }
        }

        let handle = self.backups.snapshot(&record.name).await?;
        log_reclaim!(record.name, "backup-taken", backup = handle.key());
        Ok(handle)
    }

    /// Clear our marker so a later sweep can retry immediately
    async fn release(&self, record: &NamespaceRecord) {
        let patch = MetadataPatch::new()
            .remove_annotation(ANN_DELETION_STARTED_AT)
            .expect_version(record.resource_version.clone());

        if let Err(err) = self.gateway.patch_metadata(&record.name, &patch).await {
            warn!(namespace = %record.name, "Could not clear reclamation marker: {}", err);
        }
    }

    /// Delete a namespace covered by `backup`; `false` if it was already gone
    async fn delete_backed_up(&self, backup: &BackupHandle) -> GovernanceResult<bool> {
        Ok(present(self.gateway.delete(backup.namespace()).await)?.is_some())
    }
}

enum Claim {
    /// Marker set by us; `resumed_since` is the start of a stale run we took over
    Held {
        record: NamespaceRecord,
        resumed_since: Option<DateTime<Utc>>,
    },
    Busy(DateTime<Utc>),
}
