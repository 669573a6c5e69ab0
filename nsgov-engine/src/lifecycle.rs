//! Lifecycle state machine
//!
//! Validates stage changes against the lifecycle graph and produces a
//! [`TransitionPlan`] describing the resulting record and the policy bundle to
//! materialize. Plans for backup-guarded stages can only be committed with a
//! [`BackupHandle`], which only the backup coordinator can construct.

use crate::backup::BackupHandle;
use crate::catalog::{PolicyBundle, PolicyCatalog};
use crate::error::{BackupError, GovernanceError, GovernanceResult};
use crate::record::NamespaceRecord;
use chrono::{DateTime, Utc};
use nsgov_common::Stage;
use std::collections::VecDeque;
use std::sync::Arc;

/// Direct successors of `from`
pub fn allowed_targets(from: Stage) -> &'static [Stage] {
    match from {
        Stage::Development => &[Stage::Testing, Stage::Deprecated],
        Stage::Testing => &[Stage::Production, Stage::Deprecated],
        Stage::Production => &[Stage::Deprecated, Stage::Archived],
        Stage::Deprecated => &[Stage::Archived],
        Stage::Archived => &[Stage::Development, Stage::Testing, Stage::Deleting],
        Stage::Deleting => &[],
    }
}

/// Edge lookup; no implicit self-loops
pub fn can_transition(from: Stage, to: Stage) -> bool {
    allowed_targets(from).contains(&to)
}

/// `to` is reachable from `from` through one or more edges
pub fn reaches(from: Stage, to: Stage) -> bool {
    let mut seen = vec![from];
    let mut queue = VecDeque::from([from]);

    while let Some(stage) = queue.pop_front() {
        for next in allowed_targets(stage) {
            if *next == to {
                return true;
            }
            if !seen.contains(next) {
                seen.push(*next);
                queue.push_back(*next);
            }
        }
    }

    false
}

/// Stage change ready to be materialized and written
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub from: Stage,
    pub to: Stage,
    /// Bundle applied on entry to `to`
    pub bundle: PolicyBundle,
    /// Bundle of `from`, re-applied if the stage write fails
    pub previous_bundle: Option<PolicyBundle>,
    pub backup_required: bool,
    record: NamespaceRecord,
}

impl TransitionPlan {
    /// Record as it will look once committed (without backup bookkeeping)
    pub fn target(&self) -> &NamespaceRecord {
        &self.record
    }

    /// Produce the record to write
    ///
    /// Guarded plans need a backup of the same namespace.
    pub fn commit(self, backup: Option<&BackupHandle>) -> GovernanceResult<NamespaceRecord> {
        let mut record = self.record;

        match backup {
            Some(handle) if handle.namespace() == record.name => {
                record.last_backup = Some(handle.key().to_string());
                record.last_backup_checksum = Some(handle.checksum().to_string());
            }
            Some(handle) => {
                return Err(GovernanceError::Validation(format!(
                    "backup {} belongs to '{}', not '{}'",
                    handle.key(),
                    handle.namespace(),
                    record.name
                )));
            }
            None if self.backup_required => {
                return Err(GovernanceError::BackupRequired {
                    name: record.name.clone(),
                    stage: self.to,
                    source: BackupError::Missing {
                        key: format!("{}/<none>", record.name),
                    },
                });
            }
            None => {}
        }

        Ok(record)
    }
}

/// Lifecycle rules bound to a policy catalog
#[derive(Debug, Clone)]
pub struct StateMachine {
    catalog: Arc<PolicyCatalog>,
    allow_reactivation: bool,
}

impl StateMachine {
    pub fn new(catalog: Arc<PolicyCatalog>, allow_reactivation: bool) -> Self {
        Self {
            catalog,
            allow_reactivation,
        }
    }

    pub fn catalog(&self) -> &PolicyCatalog {
        &self.catalog
    }

    pub fn allows_reactivation(&self) -> bool {
        self.allow_reactivation
    }

    /// Plan a user-requested transition
    ///
    /// Returns `None` when the record is already at `to`.
    pub fn transition(
        &self,
        record: &NamespaceRecord,
        to: Stage,
        reason: &str,
        now: DateTime<Utc>,
    ) -> GovernanceResult<Option<TransitionPlan>> {
        let from = record.stage;
        if from == to {
            return Ok(None);
        }

        if !can_transition(from, to) {
            return Err(GovernanceError::InvalidTransition { from, to });
        }

        if from == Stage::Archived && matches!(to, Stage::Development | Stage::Testing) && !self.allow_reactivation {
            return Err(GovernanceError::ReactivationDenied {
                name: record.name.clone(),
                to,
            });
        }

        self.plan(record, to, reason, now).map(Some)
    }

    /// Plan the terminal move used by reclamation
    ///
    /// Allowed from any stage that can reach `deleting`, and from `deleting`
    /// itself so an interrupted reclamation can resume.
    pub fn reclaim(
        &self,
        record: &NamespaceRecord,
        reason: &str,
        now: DateTime<Utc>,
    ) -> GovernanceResult<TransitionPlan> {
        let from = record.stage;
        if from != Stage::Deleting && !reaches(from, Stage::Deleting) {
            return Err(GovernanceError::InvalidTransition {
                from,
                to: Stage::Deleting,
            });
        }

        self.plan(record, Stage::Deleting, reason, now)
    }

    fn plan(
        &self,
        record: &NamespaceRecord,
        to: Stage,
        reason: &str,
        now: DateTime<Utc>,
    ) -> GovernanceResult<TransitionPlan> {
        let from = record.stage;
        let bundle = self.catalog.resolve(to)?.clone();
        let previous_bundle = self.catalog.resolve(from).ok().cloned();

        let mut next = record.clone();
        next.stage = to;
        if from != to {
            next.previous_stage = Some(from);
        }
        next.policy_ref = Some(bundle.reference());
        next.last_transition_at = Some(now);
        next.last_transition_reason = Some(reason.to_string());

        Ok(TransitionPlan {
            from,
            to,
            bundle,
            previous_bundle,
            backup_required: to.requires_backup(),
            record: next,
        })
    }
}
