//! Governance engine
//!
//! Orchestrates the state machine, policy catalog, diagnostics, backups and
//! sweeper against a cluster gateway. Every mutating operation takes the
//! per-namespace lock and re-reads the object before acting.

use crate::backup::{BackupCoordinator, BackupHandle, BackupStore};
use crate::catalog::PolicyCatalog;
use crate::config::{ConfigError, GovernanceConfig};
use crate::diagnostics::{DiagnosticReport, DiagnosticScorer};
use crate::error::{GatewayError, GovernanceError, GovernanceResult};
use crate::gateway::retry::{RetryPolicy, RetryingGateway};
use crate::gateway::ClusterGateway;
use crate::lifecycle::{can_transition, StateMachine};
use crate::locks::NamespaceLocks;
use crate::log_transition;
use crate::record::{
    date_after, is_reserved_annotation, is_reserved_label, managed_selector, NamespaceRecord, LABEL_STAGE,
};
use crate::sweeper::{ExpirationSweeper, ReclaimAction, ReclaimOutcome};
use crate::validation::{
    validate_label_value, validate_metadata_key, validate_namespace_name, validate_retention_days,
};
use chrono::{DateTime, Utc};
use nsgov_common::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Reason recorded for promotions performed while provisioning
pub const INITIAL_PROVISIONING: &str = "initial-provisioning";

/// Input to [`GovernanceEngine::create`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub name: String,
    pub team: String,
    pub environment: String,
    #[serde(default = "default_stage")]
    pub stage: Stage,
    /// Defaults to the requested stage's bundle
    #[serde(default)]
    pub retention_days: Option<u32>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

fn default_stage() -> Stage {
    Stage::Development
}

impl CreateRequest {
    pub fn new(name: impl Into<String>, team: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            team: team.into(),
            environment: environment.into(),
            stage: Stage::Development,
            retention_days: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    fn validate(&self) -> GovernanceResult<()> {
        validate_namespace_name(&self.name)?;
        validate_label_value("team", &self.team)?;
        validate_label_value("environment", &self.environment)?;

        if let Some(days) = self.retention_days {
            validate_retention_days(days)?;
        }

        if !matches!(self.stage, Stage::Development | Stage::Testing | Stage::Production) {
            return Err(GovernanceError::Validation(format!(
                "Namespaces can only be created at development, testing or production, not {}",
                self.stage
            )));
        }

        for key in self.labels.keys() {
            validate_metadata_key(key)?;
            if is_reserved_label(key) {
                return Err(GovernanceError::Validation(format!("Label '{}' is managed by nsgov", key)));
            }
        }
        for value in self.labels.values() {
            if !value.is_empty() {
                validate_label_value("label value", value)?;
            }
        }
        for key in self.annotations.keys() {
            validate_metadata_key(key)?;
            if is_reserved_annotation(key) {
                return Err(GovernanceError::Validation(format!("Annotation '{}' is managed by nsgov", key)));
            }
        }

        Ok(())
    }
}

/// Result of [`GovernanceEngine::transition`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum TransitionOutcome {
    /// Already at the requested stage; nothing written
    Unchanged { record: NamespaceRecord },
    Transitioned {
        record: NamespaceRecord,
        backup: Option<BackupHandle>,
    },
    /// `archived -> deleting`: the namespace was reclaimed
    Reclaimed { backup: BackupHandle },
}

impl TransitionOutcome {
    pub fn record(&self) -> Option<&NamespaceRecord> {
        match self {
            TransitionOutcome::Unchanged { record } | TransitionOutcome::Transitioned { record, .. } => Some(record),
            TransitionOutcome::Reclaimed { .. } => None,
        }
    }
}

pub struct GovernanceEngine {
    gateway: Arc<dyn ClusterGateway>,
    machine: StateMachine,
    scorer: DiagnosticScorer,
    backups: BackupCoordinator,
    sweeper: ExpirationSweeper,
    locks: NamespaceLocks,
    grace_days: u32,
}

impl GovernanceEngine {
    /// Build an engine from configuration; gateway calls get the configured retry policy
    pub fn new(
        config: &GovernanceConfig,
        gateway: Arc<dyn ClusterGateway>,
        store: Arc<dyn BackupStore>,
    ) -> Result<Self, ConfigError> {
        let catalog = config.catalog()?;
        Ok(Self::with_catalog(config, catalog, gateway, store))
    }

    pub fn with_catalog(
        config: &GovernanceConfig,
        catalog: PolicyCatalog,
        gateway: Arc<dyn ClusterGateway>,
        store: Arc<dyn BackupStore>,
    ) -> Self {
        let gateway: Arc<dyn ClusterGateway> =
            Arc::new(RetryingGateway::new(gateway, RetryPolicy::from_config(&config.gateway)));
        let machine = StateMachine::new(Arc::new(catalog), config.engine.allow_reactivation);
        let backups = BackupCoordinator::new(gateway.clone(), store).with_store_attempts(config.backup.store_attempts);
        let locks = NamespaceLocks::new();
        let sweeper = ExpirationSweeper::new(
            gateway.clone(),
            machine.clone(),
            backups.clone(),
            locks.clone(),
            config.sweep.stale_marker_minutes,
        );

        Self {
            scorer: DiagnosticScorer::new(gateway.clone(), config.diagnostics.clone()),
            gateway,
            machine,
            backups,
            sweeper,
            locks,
            grace_days: config.sweep.grace_days,
        }
    }

    pub fn catalog(&self) -> &PolicyCatalog {
        self.machine.catalog()
    }

    /// Configured default grace period
    pub fn grace_days(&self) -> u32 {
        self.grace_days
    }

    /// Provision a namespace
    pub async fn create(&self, request: CreateRequest) -> GovernanceResult<NamespaceRecord> {
        self.create_at(request, Utc::now()).await
    }

    pub async fn create_at(&self, request: CreateRequest, now: DateTime<Utc>) -> GovernanceResult<NamespaceRecord> {
        request.validate()?;

        let catalog = self.machine.catalog();
        let requested = catalog.resolve(request.stage)?;
        let initial = catalog.resolve(Stage::Development)?.clone();
        let retention_days = request.retention_days.unwrap_or(requested.retention_days);
        validate_retention_days(retention_days)?;

        let name = request.name.as_str();
        let _guard = self.locks.acquire(name).await;

        let mut record = NamespaceRecord::new(
            name,
            &request.team,
            &request.environment,
            now,
            retention_days,
            requested.review_interval_days,
        )?;
        record.labels = request.labels.clone();
        record.annotations = request.annotations.clone();
        record.policy_ref = Some(initial.reference());
        record.last_transition_at = Some(now);
        record.last_transition_reason = Some("created".to_string());

        let created = match self.gateway.create(&record.to_object()).await {
            Ok(object) => object,
            Err(GatewayError::Conflict(_)) => {
                return Err(GovernanceError::Validation(format!("Namespace '{}' already exists", name)));
            }
            Err(err) => return Err(err.into()),
        };

        if let Err(err) = self.gateway.apply_policy_bundle(name, &initial).await {
            warn!(namespace = name, "Policy materialization failed, removing namespace: {}", err);
            self.rollback(name).await;
            return Err(err.into());
        }

        let mut record = NamespaceRecord::from_object(&created)?;
        let promotions: &[Stage] = match request.stage {
            Stage::Testing => &[Stage::Testing],
            Stage::Production => &[Stage::Testing, Stage::Production],
            _ => &[],
        };
        for stage in promotions {
            match self.apply_transition(&record, *stage, INITIAL_PROVISIONING, now).await {
                Ok(Some((next, _))) => record = next,
                Ok(None) => {}
                Err(err) => {
                    warn!(namespace = name, stage = %stage, "Initial promotion failed, removing namespace: {}", err);
                    self.rollback(name).await;
                    return Err(err);
                }
            }
        }

        info!(
            namespace = name,
            stage = %record.stage,
            team = %record.team,
            expires_at = ?record.expires_at,
            "Namespace created"
        );

        Ok(record)
    }

    async fn rollback(&self, name: &str) {
        if let Err(err) = self.gateway.delete(name).await {
            error!(namespace = name, "Failed to remove partially created namespace: {}", err);
        }
    }

    /// Move a namespace to another stage
    pub async fn transition(&self, name: &str, to: Stage, reason: &str) -> GovernanceResult<TransitionOutcome> {
        self.transition_at(name, to, reason, Utc::now()).await
    }

    pub async fn transition_at(
        &self,
        name: &str,
        to: Stage,
        reason: &str,
        now: DateTime<Utc>,
    ) -> GovernanceResult<TransitionOutcome> {
        let guard = self.locks.acquire(name).await;
        let mut record = self.read(name).await?;

        if record.stage == to {
            return Ok(TransitionOutcome::Unchanged { record });
        }

        if record.deletion_started_at.is_some() {
            return Err(GovernanceError::Conflict(format!("reclamation of '{}' is in progress", name)));
        }

        if to == Stage::Deleting {
            if !can_transition(record.stage, to) {
                return Err(GovernanceError::InvalidTransition { from: record.stage, to });
            }
            // The sweeper takes the lock itself
            drop(guard);
            return match self.sweeper.reclaim(name, reason, now).await? {
                ReclaimOutcome::Reclaimed { backup } => Ok(TransitionOutcome::Reclaimed { backup }),
                outcome => Err(Self::reclaim_error(name, outcome)),
            };
        }

        let mut retried = false;
        loop {
            match self.apply_transition(&record, to, reason, now).await {
                Ok(Some((record, backup))) => return Ok(TransitionOutcome::Transitioned { record, backup }),
                Ok(None) => return Ok(TransitionOutcome::Unchanged { record }),
                Err(GovernanceError::Conflict(_)) if !retried => {
                    retried = true;
                    warn!(namespace = name, "Namespace changed concurrently, retrying transition");
                    record = self.read(name).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Plan, back up, materialize and write one transition
    ///
    /// Returns `None` for a same-stage request. The caller holds the lock.
    async fn apply_transition(
        &self,
        record: &NamespaceRecord,
        to: Stage,
        reason: &str,
        now: DateTime<Utc>,
    ) -> GovernanceResult<Option<(NamespaceRecord, Option<BackupHandle>)>> {
        let name = record.name.as_str();
        let Some(plan) = self.machine.transition(record, to, reason, now)? else {
            return Ok(None);
        };

        let backup = if plan.backup_required {
            let handle = self
                .backups
                .snapshot(name)
                .await
                .map_err(|source| GovernanceError::BackupRequired {
                    name: name.to_string(),
                    stage: to,
                    source,
                })?;
            Some(handle)
        } else {
            None
        };

        self.gateway.apply_policy_bundle(name, &plan.bundle).await?;

        let from = plan.from;
        let previous_bundle = plan.previous_bundle.clone();
        let next = plan.commit(backup.as_ref())?;

        match self.gateway.patch_metadata(name, &next.metadata_patch()).await {
            Ok(object) => {
                let written = NamespaceRecord::from_object(&object)?;
                log_transition!(
                    name,
                    from,
                    to,
                    reason,
                    policy_ref = written.policy_ref.as_deref().unwrap_or_default()
                );
                Ok(Some((written, backup)))
            }
            Err(err) => {
                if let Some(previous) = previous_bundle {
                    if let Err(comp) = self.gateway.apply_policy_bundle(name, &previous).await {
                        error!(
                            namespace = name,
                            stage = %from,
                            "Failed to restore previous policy bundle: {}",
                            comp
                        );
                    }
                }
                Err(err.into())
            }
        }
    }

    /// Score a namespace against best practices; takes no lock
    pub async fn diagnose(&self, name: &str) -> GovernanceResult<DiagnosticReport> {
        self.scorer.score(name).await
    }

    /// Reclaim namespaces past expiry plus `grace_days`
    pub async fn sweep(&self, now: DateTime<Utc>, grace_days: u32, dry_run: bool) -> GovernanceResult<Vec<ReclaimAction>> {
        self.sweeper.sweep(now, grace_days, dry_run).await
    }

    /// Back up and delete a namespace now
    pub async fn delete(&self, name: &str) -> GovernanceResult<BackupHandle> {
        self.read(name).await?;
        match self.sweeper.reclaim(name, "deleted-by-operator", Utc::now()).await? {
            ReclaimOutcome::Reclaimed { backup } => Ok(backup),
            outcome => Err(Self::reclaim_error(name, outcome)),
        }
    }

    fn reclaim_error(name: &str, outcome: ReclaimOutcome) -> GovernanceError {
        match outcome {
            ReclaimOutcome::InProgress { since } => {
                GovernanceError::Conflict(format!("reclamation of '{}' in progress since {}", name, since))
            }
            _ => GovernanceError::NotFound(name.to_string()),
        }
    }

    /// Current record of a managed namespace
    pub async fn get(&self, name: &str) -> GovernanceResult<NamespaceRecord> {
        self.read(name).await
    }

    /// Every managed namespace, by name; unreadable records are skipped
    pub async fn list(&self) -> GovernanceResult<Vec<NamespaceRecord>> {
        let objects = self.gateway.list(&managed_selector()).await?;
        let mut records: Vec<NamespaceRecord> = objects
            .iter()
            .filter_map(|object| match NamespaceRecord::from_object(object) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(namespace = %object.name, "Skipping unreadable namespace: {}", err);
                    None
                }
            })
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Re-provision retention: expiry and review restart from today
    pub async fn renew(&self, name: &str, retention_days: Option<u32>) -> GovernanceResult<NamespaceRecord> {
        self.renew_at(name, retention_days, Utc::now()).await
    }

    pub async fn renew_at(
        &self,
        name: &str,
        retention_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> GovernanceResult<NamespaceRecord> {
        let _guard = self.locks.acquire(name).await;
        let mut retried = false;

        loop {
            let record = self.read(name).await?;
            if record.stage == Stage::Deleting || record.deletion_started_at.is_some() {
                return Err(GovernanceError::Conflict(format!("reclamation of '{}' is in progress", name)));
            }

            let bundle = self.machine.catalog().resolve(record.stage)?;
            let days = retention_days.unwrap_or(bundle.retention_days);
            validate_retention_days(days)?;

            let mut renewed = record.clone();
            renewed.retention_days = days;
            renewed.expires_at = Some(date_after(now.date_naive(), days)?);
            renewed.review_at = Some(date_after(now.date_naive(), bundle.review_interval_days)?);

            match self.gateway.patch_metadata(name, &renewed.metadata_patch()).await {
                Ok(object) => {
                    let written = NamespaceRecord::from_object(&object)?;
                    info!(
                        namespace = name,
                        retention_days = days,
                        expires_at = ?written.expires_at,
                        "Namespace renewed"
                    );
                    return Ok(written);
                }
                Err(GatewayError::Conflict(_)) if !retried => retried = true,
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn read(&self, name: &str) -> GovernanceResult<NamespaceRecord> {
        let object = self.gateway.get(name).await?;
        if !object.labels.contains_key(LABEL_STAGE) {
            return Err(GovernanceError::NotFound(format!("{} (not managed by nsgov)", name)));
        }
        NamespaceRecord::from_object(&object)
    }
}
