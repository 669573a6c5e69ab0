//! Namespace records and their on-object encoding
//!
//! The engine keeps no private store. Everything it knows about a namespace
//! lives in the object's labels and annotations, and a [`NamespaceRecord`] is
//! rebuilt from them on every read.

use crate::error::{GovernanceError, GovernanceResult};
use crate::gateway::{LabelSelector, MetadataPatch, NamespaceObject};
use chrono::{DateTime, Days, Duration, NaiveDate, SecondsFormat, Utc};
use nsgov_common::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LABEL_STAGE: &str = "lifecycle-stage";
pub const LABEL_CREATED_DATE: &str = "created-date";
pub const LABEL_RETENTION: &str = "retention-policy";
pub const LABEL_TEAM: &str = "team";
pub const LABEL_ENVIRONMENT: &str = "environment";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "nsgov";

pub const ANNOTATION_PREFIX: &str = "lifecycle.nsgov.io/";
pub const ANN_CREATED_AT: &str = "lifecycle.nsgov.io/created-at";
pub const ANN_REVIEW_DATE: &str = "lifecycle.nsgov.io/review-date";
pub const ANN_EXPIRY_DATE: &str = "lifecycle.nsgov.io/expiry-date";
pub const ANN_RETENTION_DAYS: &str = "lifecycle.nsgov.io/retention-days";
pub const ANN_PREVIOUS_STAGE: &str = "lifecycle.nsgov.io/previous-stage";
pub const ANN_POLICY_REF: &str = "lifecycle.nsgov.io/policy-ref";
pub const ANN_LAST_TRANSITION_AT: &str = "lifecycle.nsgov.io/last-transition-at";
pub const ANN_LAST_TRANSITION_REASON: &str = "lifecycle.nsgov.io/last-transition-reason";
pub const ANN_DELETION_STARTED_AT: &str = "lifecycle.nsgov.io/deletion-started-at";
pub const ANN_LAST_BACKUP: &str = "lifecycle.nsgov.io/last-backup";
pub const ANN_LAST_BACKUP_CHECKSUM: &str = "lifecycle.nsgov.io/last-backup-checksum";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Labels owned by the engine; callers may not set them directly
pub fn is_reserved_label(key: &str) -> bool {
    matches!(
        key,
        LABEL_STAGE | LABEL_CREATED_DATE | LABEL_RETENTION | LABEL_TEAM | LABEL_ENVIRONMENT | LABEL_MANAGED_BY
    )
}

/// Annotations owned by the engine
pub fn is_reserved_annotation(key: &str) -> bool {
    key.starts_with(ANNOTATION_PREFIX)
}

/// Selector matching every namespace under lifecycle management
pub fn managed_selector() -> LabelSelector {
    LabelSelector::exists(LABEL_STAGE)
}

/// Format a timestamp the way it is stored in annotations
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// `start + days`, failing only when the calendar overflows
pub fn date_after(start: NaiveDate, days: u32) -> GovernanceResult<NaiveDate> {
    start
        .checked_add_days(Days::new(u64::from(days)))
        .ok_or_else(|| GovernanceError::Validation(format!("{} days after {} is out of range", days, start)))
}

/// Last calendar date that is no longer inside the grace window at `now`
pub fn grace_cutoff(now: DateTime<Utc>, grace_days: u32) -> NaiveDate {
    (now - Duration::days(i64::from(grace_days))).date_naive()
}

/// Lifecycle view of a managed namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRecord {
    pub name: String,
    pub stage: Stage,
    pub team: String,
    pub environment: String,
    pub created_at: DateTime<Utc>,
    pub review_at: Option<NaiveDate>,
    pub expires_at: Option<NaiveDate>,
    pub retention_days: u32,
    /// Caller labels, excluding engine bookkeeping
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Caller annotations, excluding engine bookkeeping
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub policy_ref: Option<String>,
    pub previous_stage: Option<Stage>,
    pub last_transition_at: Option<DateTime<Utc>>,
    pub last_transition_reason: Option<String>,
    /// Reclamation-in-progress marker
    pub deletion_started_at: Option<DateTime<Utc>>,
    /// Store key of the most recent verified backup
    pub last_backup: Option<String>,
    pub last_backup_checksum: Option<String>,
    #[serde(skip)]
    pub resource_version: Option<String>,
}

impl NamespaceRecord {
    /// Fresh record; expiry and review dates are counted from `created_at`
    pub fn new(
        name: impl Into<String>,
        team: impl Into<String>,
        environment: impl Into<String>,
        created_at: DateTime<Utc>,
        retention_days: u32,
        review_interval_days: u32,
    ) -> GovernanceResult<Self> {
        let created = created_at.date_naive();
        Ok(Self {
            name: name.into(),
            stage: Stage::Development,
            team: team.into(),
            environment: environment.into(),
            created_at,
            review_at: Some(date_after(created, review_interval_days)?),
            expires_at: Some(date_after(created, retention_days)?),
            retention_days,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            policy_ref: None,
            previous_stage: None,
            last_transition_at: None,
            last_transition_reason: None,
            deletion_started_at: None,
            last_backup: None,
            last_backup_checksum: None,
            resource_version: None,
        })
    }

    /// Past expiry plus grace at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>, grace_days: u32) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at < grace_cutoff(now, grace_days),
            None => false,
        }
    }

    /// Engine-owned labels
    pub fn bookkeeping_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_STAGE.to_string(), self.stage.to_string());
        labels.insert(
            LABEL_CREATED_DATE.to_string(),
            self.created_at.format(DATE_FORMAT).to_string(),
        );
        labels.insert(LABEL_RETENTION.to_string(), format!("{}d", self.retention_days));
        labels.insert(LABEL_TEAM.to_string(), self.team.clone());
        labels.insert(LABEL_ENVIRONMENT.to_string(), self.environment.clone());
        labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
        labels
    }

    /// Engine-owned annotations; unset optional fields are absent
    pub fn bookkeeping_annotations(&self) -> BTreeMap<String, String> {
        self.annotation_entries()
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
            .collect()
    }

    fn annotation_entries(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            (ANN_CREATED_AT, Some(format_timestamp(&self.created_at))),
            (ANN_REVIEW_DATE, self.review_at.map(|d| d.format(DATE_FORMAT).to_string())),
            (ANN_EXPIRY_DATE, self.expires_at.map(|d| d.format(DATE_FORMAT).to_string())),
            (ANN_RETENTION_DAYS, Some(self.retention_days.to_string())),
            (ANN_PREVIOUS_STAGE, self.previous_stage.map(|s| s.to_string())),
            (ANN_POLICY_REF, self.policy_ref.clone()),
            (ANN_LAST_TRANSITION_AT, self.last_transition_at.as_ref().map(format_timestamp)),
            (ANN_LAST_TRANSITION_REASON, self.last_transition_reason.clone()),
            (ANN_DELETION_STARTED_AT, self.deletion_started_at.as_ref().map(format_timestamp)),
            (ANN_LAST_BACKUP, self.last_backup.clone()),
            (ANN_LAST_BACKUP_CHECKSUM, self.last_backup_checksum.clone()),
        ]
    }

    /// Full object representation: caller metadata merged with bookkeeping
    pub fn to_object(&self) -> NamespaceObject {
        let mut labels = self.labels.clone();
        labels.extend(self.bookkeeping_labels());

        let mut annotations = self.annotations.clone();
        annotations.extend(self.bookkeeping_annotations());

        NamespaceObject {
            name: self.name.clone(),
            labels,
            annotations,
            resource_version: self.resource_version.clone(),
            created_at: Some(self.created_at),
            terminating: false,
        }
    }

    /// Patch rewriting every bookkeeping key, guarded by the record's version
    pub fn metadata_patch(&self) -> MetadataPatch {
        let mut patch = MetadataPatch::new().expect_version(self.resource_version.clone());

        for (key, value) in self.bookkeeping_labels() {
            patch = patch.label(key, value);
        }
        for (key, value) in self.annotation_entries() {
            patch = match value {
                Some(v) => patch.annotate(key, v),
                None => patch.remove_annotation(key),
            };
        }

        patch
    }

    /// Rebuild a record from an object's metadata
    pub fn from_object(object: &NamespaceObject) -> GovernanceResult<Self> {
        let name = object.name.as_str();
        let labels = &object.labels;
        let annotations = &object.annotations;

        let stage = match labels.get(LABEL_STAGE) {
            Some(raw) => raw.parse::<Stage>().map_err(|e| corrupt(name, e.to_string()))?,
            None => return Err(corrupt(name, format!("missing label {}", LABEL_STAGE))),
        };

        let team = required(name, labels, LABEL_TEAM)?;
        let environment = required(name, labels, LABEL_ENVIRONMENT)?;

        let created_at = match annotations.get(ANN_CREATED_AT) {
            Some(raw) => parse_timestamp(name, ANN_CREATED_AT, raw)?,
            None => object
                .created_at
                .ok_or_else(|| corrupt(name, format!("missing annotation {}", ANN_CREATED_AT)))?,
        };

        let retention_days = match (annotations.get(ANN_RETENTION_DAYS), labels.get(LABEL_RETENTION)) {
            (Some(raw), _) => raw
                .parse::<u32>()
                .map_err(|_| corrupt(name, format!("invalid {} '{}'", ANN_RETENTION_DAYS, raw)))?,
            (None, Some(raw)) => parse_retention_label(raw)
                .ok_or_else(|| corrupt(name, format!("invalid {} '{}'", LABEL_RETENTION, raw)))?,
            (None, None) => return Err(corrupt(name, "missing retention".to_string())),
        };

        let previous_stage = annotations
            .get(ANN_PREVIOUS_STAGE)
            .map(|raw| raw.parse::<Stage>().map_err(|e| corrupt(name, e.to_string())))
            .transpose()?;

        let optional_date = |key: &str| -> GovernanceResult<Option<NaiveDate>> {
            annotations
                .get(key)
                .map(|raw| {
                    NaiveDate::parse_from_str(raw, DATE_FORMAT)
                        .map_err(|_| corrupt(name, format!("invalid {} '{}'", key, raw)))
                })
                .transpose()
        };
        let optional_timestamp = |key: &str| -> GovernanceResult<Option<DateTime<Utc>>> {
            annotations
                .get(key)
                .map(|raw| parse_timestamp(name, key, raw))
                .transpose()
        };

        Ok(Self {
            name: name.to_string(),
            stage,
            team,
            environment,
            created_at,
            review_at: optional_date(ANN_REVIEW_DATE)?,
            expires_at: optional_date(ANN_EXPIRY_DATE)?,
            retention_days,
            labels: labels
                .iter()
                .filter(|(k, _)| !is_reserved_label(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            annotations: annotations
                .iter()
                .filter(|(k, _)| !is_reserved_annotation(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            policy_ref: annotations.get(ANN_POLICY_REF).cloned(),
            previous_stage,
            last_transition_at: optional_timestamp(ANN_LAST_TRANSITION_AT)?,
            last_transition_reason: annotations.get(ANN_LAST_TRANSITION_REASON).cloned(),
            deletion_started_at: optional_timestamp(ANN_DELETION_STARTED_AT)?,
            last_backup: annotations.get(ANN_LAST_BACKUP).cloned(),
            last_backup_checksum: annotations.get(ANN_LAST_BACKUP_CHECKSUM).cloned(),
            resource_version: object.resource_version.clone(),
        })
    }
}

fn corrupt(name: &str, reason: String) -> GovernanceError {
    GovernanceError::Corrupt {
        name: name.to_string(),
        reason,
    }
}

fn required(name: &str, labels: &BTreeMap<String, String>, key: &str) -> GovernanceResult<String> {
    labels
        .get(key)
        .cloned()
        .ok_or_else(|| corrupt(name, format!("missing label {}", key)))
}

fn parse_timestamp(name: &str, key: &str, raw: &str) -> GovernanceResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| corrupt(name, format!("invalid {} '{}'", key, raw)))
}

/// Accepts `90d`, `90-days` and bare `90`
fn parse_retention_label(raw: &str) -> Option<u32> {
    let digits = raw
        .strip_suffix("-days")
        .or_else(|| raw.strip_suffix('d'))
        .unwrap_or(raw);
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap()
    }

    fn record() -> NamespaceRecord {
        NamespaceRecord::new("payments-dev", "payments", "dev", created(), 90, 30).unwrap()
    }

    #[test]
    fn test_expiry_arithmetic() {
        let record = record();
        assert_eq!(record.expires_at, NaiveDate::from_ymd_opt(2024, 3, 31));
        assert_eq!(record.review_at, NaiveDate::from_ymd_opt(2024, 1, 31));
    }

    #[test]
    fn test_grace_eligibility() {
        let record = record();
        let at = |m, d| Utc.with_ymd_and_hms(2024, m, d, 12, 0, 0).unwrap();

        assert!(record.is_eligible(at(4, 8), 7));
        assert!(!record.is_eligible(at(4, 6), 7));
        assert!(!record.is_eligible(at(3, 31), 0));
        assert!(record.is_eligible(at(4, 1), 0));
    }

    #[test]
    fn test_round_trip_is_lossless() {
        let mut record = record();
        record.stage = Stage::Production;
        record.previous_stage = Some(Stage::Testing);
        record.policy_ref = Some("production:0123456789ab".to_string());
        record.last_transition_at = Some(Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap());
        record.last_transition_reason = Some("release 1.2".to_string());
        record.deletion_started_at = Some(Utc::now());
        record.last_backup = Some("payments-dev/20240203T040506Z-0123456789ab.json".to_string());
        record.last_backup_checksum = Some("ab".repeat(32));
        record.labels.insert("app.kubernetes.io/name".to_string(), "payments".to_string());
        record.annotations.insert("owner".to_string(), "alice@example.com".to_string());
        record.resource_version = Some("42".to_string());

        let object = record.to_object();
        assert_eq!(object.labels.get(LABEL_STAGE).unwrap(), "production");
        assert_eq!(object.labels.get(LABEL_CREATED_DATE).unwrap(), "2024-01-01");
        assert_eq!(object.labels.get(LABEL_RETENTION).unwrap(), "90d");
        assert_eq!(object.labels.get(LABEL_MANAGED_BY).unwrap(), "nsgov");
        assert_eq!(object.annotations.get(ANN_EXPIRY_DATE).unwrap(), "2024-03-31");

        let parsed = NamespaceRecord::from_object(&object).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_missing_stage_is_corrupt() {
        let mut object = record().to_object();
        object.labels.remove(LABEL_STAGE);
        let err = NamespaceRecord::from_object(&object).unwrap_err();
        assert_eq!(err.kind(), "CorruptRecordError");
    }

    #[test]
    fn test_bad_stage_is_corrupt() {
        let mut object = record().to_object();
        object.labels.insert(LABEL_STAGE.to_string(), "staging".to_string());
        assert!(matches!(
            NamespaceRecord::from_object(&object),
            Err(GovernanceError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_retention_label_fallback() {
        let mut object = record().to_object();
        object.annotations.remove(ANN_RETENTION_DAYS);

        for (raw, expected) in [("45d", 45), ("45-days", 45), ("45", 45)] {
            object.labels.insert(LABEL_RETENTION.to_string(), raw.to_string());
            assert_eq!(NamespaceRecord::from_object(&object).unwrap().retention_days, expected);
        }
    }

    #[test]
    fn test_patch_clears_unset_annotations() {
        let record = record();
        let patch = record.metadata_patch();
        assert_eq!(patch.annotations.get(ANN_DELETION_STARTED_AT), Some(&None));
        assert_eq!(patch.labels.get(LABEL_STAGE), Some(&Some("development".to_string())));
    }
}
