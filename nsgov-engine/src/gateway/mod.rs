//! Cluster gateway
//!
//! The engine never talks to a cluster API directly. Everything it needs from
//! the platform goes through the [`ClusterGateway`] trait:
//! - Namespace objects (get, list, create, metadata patch, delete)
//! - Policy materialization (ResourceQuota + LimitRange)
//! - Read-only inventory used by diagnostics and backups
//!
//! Adapters:
//! - [`memory::InMemoryGateway`]: in-process cluster with fault injection
//! - [`kubernetes::KubeGateway`]: kube-rs client (feature `kubernetes`)
//! - [`retry::RetryingGateway`]: timeout + bounded backoff decorator

pub mod memory;
pub mod retry;

#[cfg(feature = "kubernetes")]
pub mod kubernetes;

use crate::catalog::PolicyBundle;
use crate::error::GatewayResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Namespace-like object as seen through the gateway
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceObject {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Optimistic-concurrency token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Set once the platform has started tearing the object down
    #[serde(default)]
    pub terminating: bool,
}

/// Label/annotation changes; `None` removes the key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    pub labels: BTreeMap<String, Option<String>>,
    pub annotations: BTreeMap<String, Option<String>>,
    /// Reject the patch with `Conflict` unless the object still has this version
    pub expected_version: Option<String>,
}

impl MetadataPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), Some(value.into()));
        self
    }

    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), Some(value.into()));
        self
    }

    pub fn remove_annotation(mut self, key: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), None);
        self
    }

    pub fn expect_version(mut self, version: Option<String>) -> Self {
        self.expected_version = version;
        self
    }

    /// Apply the patch to plain maps (used by in-process gateways)
    pub fn apply_to(
        &self,
        labels: &mut BTreeMap<String, String>,
        annotations: &mut BTreeMap<String, String>,
    ) {
        for (key, value) in &self.labels {
            match value {
                Some(v) => labels.insert(key.clone(), v.clone()),
                None => labels.remove(key),
            };
        }
        for (key, value) in &self.annotations {
            match value {
                Some(v) => annotations.insert(key.clone(), v.clone()),
                None => annotations.remove(key),
            };
        }
    }
}

/// Single label-selector requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    Exists(String),
}

/// Conjunction of label requirements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    pub requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            requirements: vec![Requirement::Exists(key.into())],
        }
    }

    pub fn and_equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.push(Requirement::Equals(key.into(), value.into()));
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|req| match req {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
        })
    }

    /// Kubernetes selector syntax (`a=b,c`)
    pub fn to_query(&self) -> String {
        self.requirements
            .iter()
            .map(|req| match req {
                Requirement::Equals(k, v) => format!("{}={}", k, v),
                Requirement::Exists(k) => k.clone(),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Policy and security objects inspected by diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    NetworkPolicy,
    RoleBinding,
    ResourceQuota,
    LimitRange,
    ServiceMonitor,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NetworkPolicy => write!(f, "NetworkPolicy"),
            Self::RoleBinding => write!(f, "RoleBinding"),
            Self::ResourceQuota => write!(f, "ResourceQuota"),
            Self::LimitRange => write!(f, "LimitRange"),
            Self::ServiceMonitor => write!(f, "ServiceMonitor"),
        }
    }
}

/// Reference to an artifact found in a namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub name: String,
}

/// Per-container declarations relevant to diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub name: String,
    pub has_requests: bool,
    pub has_limits: bool,
    pub has_liveness_probe: bool,
    pub has_readiness_probe: bool,
}

/// Deployment, StatefulSet or DaemonSet summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    pub kind: String,
    pub name: String,
    pub containers: Vec<ContainerSummary>,
}

impl WorkloadInfo {
    pub fn declares_requests(&self) -> bool {
        !self.containers.is_empty() && self.containers.iter().all(|c| c.has_requests)
    }

    pub fn declares_limits(&self) -> bool {
        !self.containers.is_empty() && self.containers.iter().all(|c| c.has_limits)
    }

    pub fn declares_probes(&self) -> bool {
        !self.containers.is_empty()
            && self
                .containers
                .iter()
                .all(|c| c.has_liveness_probe || c.has_readiness_probe)
    }
}

/// Full manifest of a namespaced resource, captured for backups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedResource {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub manifest: serde_json::Value,
}

/// Abstract cluster API consumed by the engine
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Fetch a namespace object
    async fn get(&self, name: &str) -> GatewayResult<NamespaceObject>;

    /// List namespace objects matching a selector
    async fn list(&self, selector: &LabelSelector) -> GatewayResult<Vec<NamespaceObject>>;

    /// Create a namespace object; `Conflict` if it already exists
    async fn create(&self, object: &NamespaceObject) -> GatewayResult<NamespaceObject>;

    /// Patch labels and annotations, honoring `expected_version`
    async fn patch_metadata(&self, name: &str, patch: &MetadataPatch) -> GatewayResult<NamespaceObject>;

    /// Delete a namespace object and everything in it
    async fn delete(&self, name: &str) -> GatewayResult<()>;

    /// Create or replace the namespace's ResourceQuota and LimitRange
    async fn apply_policy_bundle(&self, name: &str, bundle: &PolicyBundle) -> GatewayResult<()>;

    /// List policy/security artifacts of one kind in a namespace
    async fn list_artifacts(&self, namespace: &str, kind: ArtifactKind) -> GatewayResult<Vec<ArtifactRef>>;

    /// List workloads in a namespace
    async fn list_workloads(&self, namespace: &str) -> GatewayResult<Vec<WorkloadInfo>>;

    /// Export every namespaced resource the engine backs up
    async fn export_resources(&self, namespace: &str) -> GatewayResult<Vec<ExportedResource>>;
}
