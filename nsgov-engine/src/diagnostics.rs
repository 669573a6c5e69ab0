//! Best-practices diagnostics
//!
//! Scores a namespace out of ten, one point per check:
//! - Security: network policy, pod-security enforcement, RBAC bindings
//! - Resource management: quota, limit range, requests and limits coverage
//! - Operational: required labels, monitoring, health probes
//!
//! A check whose inventory read fails counts as failed and is reported as
//! unavailable. Only a failure to read the namespace itself fails the report.

use crate::config::DiagnosticsConfig;
use crate::error::{GatewayError, GatewayResult, GovernanceResult};
use crate::gateway::{ArtifactKind, ArtifactRef, ClusterGateway, ExportedResource, NamespaceObject, WorkloadInfo};
use chrono::{DateTime, Utc};
use nsgov_common::{DiagnosticBucket, Priority};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const POD_SECURITY_LABEL: &str = "pod-security.kubernetes.io/enforce";
pub const SCRAPE_ANNOTATION: &str = "prometheus.io/scrape";

/// Check grouping, in report order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Security,
    ResourceManagement,
    Operational,
}

impl Category {
    pub fn priority(&self) -> Priority {
        match self {
            Category::Security => Priority::High,
            Category::ResourceManagement => Priority::Medium,
            Category::Operational => Priority::Low,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Security => write!(f, "security"),
            Category::ResourceManagement => write!(f, "resource-management"),
            Category::Operational => write!(f, "operational"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckId {
    NetworkPolicy,
    PodSecurity,
    RoleBindings,
    ResourceQuota,
    LimitRange,
    ResourceRequests,
    ResourceLimits,
    RequiredLabels,
    Monitoring,
    HealthProbes,
}

impl CheckId {
    /// Every check, in report order
    pub const ALL: [CheckId; 10] = [
        CheckId::NetworkPolicy,
        CheckId::PodSecurity,
        CheckId::RoleBindings,
        CheckId::ResourceQuota,
        CheckId::LimitRange,
        CheckId::ResourceRequests,
        CheckId::ResourceLimits,
        CheckId::RequiredLabels,
        CheckId::Monitoring,
        CheckId::HealthProbes,
    ];

    pub fn category(&self) -> Category {
        match self {
            CheckId::NetworkPolicy | CheckId::PodSecurity | CheckId::RoleBindings => Category::Security,
            CheckId::ResourceQuota
            | CheckId::LimitRange
            | CheckId::ResourceRequests
            | CheckId::ResourceLimits => Category::ResourceManagement,
            CheckId::RequiredLabels | CheckId::Monitoring | CheckId::HealthProbes => Category::Operational,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            CheckId::NetworkPolicy => "Network policy present",
            CheckId::PodSecurity => "Pod security standard enforced",
            CheckId::RoleBindings => "RBAC role bindings present",
            CheckId::ResourceQuota => "Resource quota present",
            CheckId::LimitRange => "Limit range present",
            CheckId::ResourceRequests => "Workloads declare resource requests",
            CheckId::ResourceLimits => "Workloads declare resource limits",
            CheckId::RequiredLabels => "Resources carry required labels",
            CheckId::Monitoring => "Monitoring endpoint registered",
            CheckId::HealthProbes => "Workloads declare health probes",
        }
    }

    fn advice(&self) -> &'static str {
        match self {
            CheckId::NetworkPolicy => "Add a NetworkPolicy restricting ingress and egress",
            CheckId::PodSecurity => "Label the namespace pod-security.kubernetes.io/enforce=baseline or restricted",
            CheckId::RoleBindings => "Grant access through namespace RoleBindings",
            CheckId::ResourceQuota => "Apply a ResourceQuota (re-run the stage transition to restore it)",
            CheckId::LimitRange => "Apply a LimitRange (re-run the stage transition to restore it)",
            CheckId::ResourceRequests => "Set CPU and memory requests on every container",
            CheckId::ResourceLimits => "Set CPU and memory limits on every container",
            CheckId::RequiredLabels => "Label resources with the required ownership labels",
            CheckId::Monitoring => "Register a ServiceMonitor or annotate the namespace prometheus.io/scrape=true",
            CheckId::HealthProbes => "Add liveness or readiness probes to every container",
        }
    }
}

impl std::fmt::Display for CheckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: CheckId,
    pub category: Category,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub category: Category,
    pub check: CheckId,
    pub message: String,
}

/// Check that could not be evaluated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableCheck {
    pub check: CheckId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub namespace: String,
    pub generated_at: DateTime<Utc>,
    pub checks: Vec<CheckResult>,
    pub score: u32,
    pub max_score: u32,
    pub percentage: u32,
    pub bucket: DiagnosticBucket,
    pub recommendations: Vec<Recommendation>,
    pub unavailable: Vec<UnavailableCheck>,
}

impl DiagnosticReport {
    pub fn passed(&self, check: CheckId) -> bool {
        self.checks.iter().any(|c| c.check == check && c.passed)
    }
}

/// `matching / total` meets `threshold_percent`; an empty population passes
pub fn coverage_ok(matching: usize, total: usize, threshold_percent: u32) -> bool {
    if total == 0 {
        return true;
    }
    matching * 100 >= threshold_percent as usize * total
}

fn percent(matching: usize, total: usize) -> usize {
    if total == 0 {
        100
    } else {
        matching * 100 / total
    }
}

/// Accumulates check outcomes
struct Tally {
    checks: Vec<CheckResult>,
    unavailable: Vec<UnavailableCheck>,
}

impl Tally {
    fn record(&mut self, check: CheckId, passed: bool, detail: String) {
        self.checks.push(CheckResult {
            check,
            category: check.category(),
            passed,
            detail,
        });
    }

    fn unavailable(&mut self, check: CheckId, err: &GatewayError) {
        warn!(check = ?check, "Diagnostic check unavailable: {}", err);
        self.unavailable.push(UnavailableCheck {
            check,
            error: err.to_string(),
        });
        self.record(check, false, "could not be evaluated".to_string());
    }

    fn presence(&mut self, check: CheckId, found: &GatewayResult<Vec<ArtifactRef>>, kind: ArtifactKind) {
        match found {
            Ok(items) if !items.is_empty() => {
                self.record(check, true, format!("{} {}(s) found", items.len(), kind));
            }
            Ok(_) => self.record(check, false, format!("no {} found", kind)),
            Err(err) => self.unavailable(check, err),
        }
    }

    fn coverage(
        &mut self,
        check: CheckId,
        population: &GatewayResult<Vec<WorkloadInfo>>,
        threshold: u32,
        predicate: impl Fn(&WorkloadInfo) -> bool,
    ) {
        match population {
            Ok(workloads) => {
                let matching = workloads.iter().filter(|&w| predicate(w)).count();
                self.record(
                    check,
                    coverage_ok(matching, workloads.len(), threshold),
                    format!(
                        "{}/{} workloads ({}%)",
                        matching,
                        workloads.len(),
                        percent(matching, workloads.len())
                    ),
                );
            }
            Err(err) => self.unavailable(check, err),
        }
    }
}

/// Computes [`DiagnosticReport`]s through the gateway
#[derive(Clone)]
pub struct DiagnosticScorer {
    gateway: Arc<dyn ClusterGateway>,
    settings: DiagnosticsConfig,
}

impl DiagnosticScorer {
    pub fn new(gateway: Arc<dyn ClusterGateway>, settings: DiagnosticsConfig) -> Self {
        Self { gateway, settings }
    }

    /// Score a namespace; fails only if the namespace itself cannot be read
    pub async fn score(&self, name: &str) -> GovernanceResult<DiagnosticReport> {
        let object = self.gateway.get(name).await?;

        let gw = &self.gateway;
        let (network_policies, role_bindings, quotas, limit_ranges, monitors, workloads, resources) = tokio::join!(
            gw.list_artifacts(name, ArtifactKind::NetworkPolicy),
            gw.list_artifacts(name, ArtifactKind::RoleBinding),
            gw.list_artifacts(name, ArtifactKind::ResourceQuota),
            gw.list_artifacts(name, ArtifactKind::LimitRange),
            gw.list_artifacts(name, ArtifactKind::ServiceMonitor),
            gw.list_workloads(name),
            gw.export_resources(name),
        );

        let threshold = self.settings.coverage_threshold_percent;
        let mut tally = Tally {
            checks: Vec::with_capacity(CheckId::ALL.len()),
            unavailable: Vec::new(),
        };

        // Security
        tally.presence(CheckId::NetworkPolicy, &network_policies, ArtifactKind::NetworkPolicy);
        let (enforced, detail) = pod_security(&object);
        tally.record(CheckId::PodSecurity, enforced, detail);
        tally.presence(CheckId::RoleBindings, &role_bindings, ArtifactKind::RoleBinding);

        // Resource management
        tally.presence(CheckId::ResourceQuota, &quotas, ArtifactKind::ResourceQuota);
        tally.presence(CheckId::LimitRange, &limit_ranges, ArtifactKind::LimitRange);
        tally.coverage(CheckId::ResourceRequests, &workloads, threshold, WorkloadInfo::declares_requests);
        tally.coverage(CheckId::ResourceLimits, &workloads, threshold, WorkloadInfo::declares_limits);

        // Operational
        match &resources {
            Ok(resources) => {
                let (passed, detail) = self.required_labels(resources);
                tally.record(CheckId::RequiredLabels, passed, detail);
            }
            Err(err) => tally.unavailable(CheckId::RequiredLabels, err),
        }
        let scrape = object.annotations.get(SCRAPE_ANNOTATION).map(String::as_str) == Some("true");
        match (&monitors, scrape) {
            (_, true) => tally.record(
                CheckId::Monitoring,
                true,
                format!("namespace annotated {}=true", SCRAPE_ANNOTATION),
            ),
            (Err(err), false) => tally.unavailable(CheckId::Monitoring, err),
            (_, false) => tally.presence(CheckId::Monitoring, &monitors, ArtifactKind::ServiceMonitor),
        }
        tally.coverage(CheckId::HealthProbes, &workloads, threshold, WorkloadInfo::declares_probes);

        let report = build_report(name, tally);
        debug!(
            namespace = name,
            score = report.score,
            bucket = %report.bucket,
            "Diagnostics scored"
        );

        Ok(report)
    }

    fn required_labels(&self, resources: &[ExportedResource]) -> (bool, String) {
        let required = &self.settings.required_labels;
        let matching = resources
            .iter()
            .filter(|r| required.iter().all(|key| r.labels.contains_key(key)))
            .count();

        (
            coverage_ok(matching, resources.len(), self.settings.coverage_threshold_percent),
            format!(
                "{}/{} resources labelled {} ({}%)",
                matching,
                resources.len(),
                required.join(", "),
                percent(matching, resources.len())
            ),
        )
    }
}

fn pod_security(object: &NamespaceObject) -> (bool, String) {
    match object.labels.get(POD_SECURITY_LABEL).map(String::as_str) {
        Some(level @ ("baseline" | "restricted")) => (true, format!("enforcing {}", level)),
        Some(level) => (false, format!("enforcing {}", level)),
        None => (false, format!("{} not set", POD_SECURITY_LABEL)),
    }
}

fn build_report(name: &str, tally: Tally) -> DiagnosticReport {
    let Tally { mut checks, unavailable } = tally;
    checks.sort_by_key(|c| c.check);

    let score = checks.iter().filter(|c| c.passed).count() as u32;
    let max_score = CheckId::ALL.len() as u32;
    let percentage = score * 100 / max_score;

    let recommendations = checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| Recommendation {
            priority: c.category.priority(),
            category: c.category,
            check: c.check,
            message: c.check.advice().to_string(),
        })
        .collect();

    DiagnosticReport {
        namespace: name.to_string(),
        generated_at: Utc::now(),
        checks,
        score,
        max_score,
        percentage,
        bucket: DiagnosticBucket::from_percentage(percentage),
        recommendations,
        unavailable,
    }
}
