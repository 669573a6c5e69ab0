//! In-process cluster gateway
//!
//! Holds namespaces, their inventory and every applied policy bundle in
//! memory. Used by the test suites and for offline dry runs. Faults can be
//! injected per operation to exercise the engine's failure paths.

use super::{
    ArtifactKind, ArtifactRef, ClusterGateway, ExportedResource, LabelSelector, MetadataPatch,
    NamespaceObject, WorkloadInfo,
};
use crate::catalog::{PolicyBundle, LIMIT_RANGE_OBJECT_NAME, QUOTA_OBJECT_NAME};
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Gateway operation names used for fault injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    Get,
    List,
    Create,
    PatchMetadata,
    Delete,
    ApplyPolicyBundle,
    ListArtifacts,
    ListWorkloads,
    ExportResources,
}

#[derive(Debug, Default)]
struct StoredNamespace {
    object: NamespaceObject,
    applied: Vec<PolicyBundle>,
    artifacts: BTreeMap<ArtifactKind, Vec<String>>,
    workloads: Vec<WorkloadInfo>,
    resources: Vec<ExportedResource>,
}

#[derive(Debug, Default)]
struct MemoryState {
    namespaces: BTreeMap<String, StoredNamespace>,
    next_version: u64,
    /// Remaining forced failures per operation
    faults: BTreeMap<Operation, (GatewayError, u32)>,
    /// Artifact kinds whose listing always fails
    broken_artifacts: BTreeSet<ArtifactKind>,
    calls: BTreeMap<Operation, u32>,
}

impl MemoryState {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    /// Count the call and return an injected fault if one is armed
    fn enter(&mut self, op: Operation) -> GatewayResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;

        if let Some((err, remaining)) = self.faults.get_mut(&op) {
            let err = err.clone();
            *remaining -= 1;
            if *remaining == 0 {
                self.faults.remove(&op);
            }
            return Err(err);
        }

        Ok(())
    }

    fn namespace(&self, name: &str) -> GatewayResult<&StoredNamespace> {
        self.namespaces
            .get(name)
            .ok_or_else(|| GatewayError::NotFound(name.to_string()))
    }

    fn namespace_mut(&mut self, name: &str) -> GatewayResult<&mut StoredNamespace> {
        self.namespaces
            .get_mut(name)
            .ok_or_else(|| GatewayError::NotFound(name.to_string()))
    }
}

/// In-memory [`ClusterGateway`]
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a namespace object as-is
    pub async fn insert_namespace(&self, mut object: NamespaceObject) {
        let mut state = self.state.write().await;
        object.resource_version = Some(state.bump_version());
        let entry = state.namespaces.entry(object.name.clone()).or_default();
        entry.object = object;
    }

    pub async fn add_artifact(&self, namespace: &str, kind: ArtifactKind, name: &str) {
        let mut state = self.state.write().await;
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            ns.artifacts.entry(kind).or_default().push(name.to_string());
        }
    }

    pub async fn add_workload(&self, namespace: &str, workload: WorkloadInfo) {
        let mut state = self.state.write().await;
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            ns.workloads.push(workload);
        }
    }

    pub async fn add_resource(&self, namespace: &str, resource: ExportedResource) {
        let mut state = self.state.write().await;
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            ns.resources.push(resource);
        }
    }

    /// Make the next `times` calls of `op` fail with `err`
    pub async fn fail_next(&self, op: Operation, err: GatewayError, times: u32) {
        if times == 0 {
            return;
        }
        let mut state = self.state.write().await;
        state.faults.insert(op, (err, times));
    }

    /// Make every listing of `kind` fail with `Unavailable`
    pub async fn break_artifact(&self, kind: ArtifactKind) {
        let mut state = self.state.write().await;
        state.broken_artifacts.insert(kind);
    }

    pub async fn clear_faults(&self) {
        let mut state = self.state.write().await;
        state.faults.clear();
        state.broken_artifacts.clear();
    }

    /// Number of times `op` was invoked, including failed calls
    pub async fn calls(&self, op: Operation) -> u32 {
        let state = self.state.read().await;
        state.calls.get(&op).copied().unwrap_or(0)
    }

    /// Every bundle applied to `namespace`, oldest first
    pub async fn applied_bundles(&self, namespace: &str) -> Vec<PolicyBundle> {
        let state = self.state.read().await;
        state
            .namespaces
            .get(namespace)
            .map(|ns| ns.applied.clone())
            .unwrap_or_default()
    }

    pub async fn contains(&self, namespace: &str) -> bool {
        let state = self.state.read().await;
        state.namespaces.contains_key(namespace)
    }

    /// Current object without counting a call
    pub async fn peek(&self, namespace: &str) -> Option<NamespaceObject> {
        let state = self.state.read().await;
        state.namespaces.get(namespace).map(|ns| ns.object.clone())
    }
}

#[async_trait]
impl ClusterGateway for InMemoryGateway {
    async fn get(&self, name: &str) -> GatewayResult<NamespaceObject> {
        let mut state = self.state.write().await;
        state.enter(Operation::Get)?;
        Ok(state.namespace(name)?.object.clone())
    }

    async fn list(&self, selector: &LabelSelector) -> GatewayResult<Vec<NamespaceObject>> {
        let mut state = self.state.write().await;
        state.enter(Operation::List)?;
        Ok(state
            .namespaces
            .values()
            .filter(|ns| selector.matches(&ns.object.labels))
            .map(|ns| ns.object.clone())
            .collect())
    }

    async fn create(&self, object: &NamespaceObject) -> GatewayResult<NamespaceObject> {
        let mut state = self.state.write().await;
        state.enter(Operation::Create)?;

        if state.namespaces.contains_key(&object.name) {
            return Err(GatewayError::Conflict(format!(
                "namespace '{}' already exists",
                object.name
            )));
        }

        let mut created = object.clone();
        created.resource_version = Some(state.bump_version());
        if created.created_at.is_none() {
            created.created_at = Some(chrono::Utc::now());
        }

        state.namespaces.insert(
            created.name.clone(),
            StoredNamespace {
                object: created.clone(),
                ..Default::default()
            },
        );

        Ok(created)
    }

    async fn patch_metadata(&self, name: &str, patch: &MetadataPatch) -> GatewayResult<NamespaceObject> {
        let mut state = self.state.write().await;
        state.enter(Operation::PatchMetadata)?;
        let version = state.bump_version();

        let ns = state.namespace_mut(name)?;
        if let Some(expected) = &patch.expected_version {
            if ns.object.resource_version.as_ref() != Some(expected) {
                return Err(GatewayError::Conflict(format!(
                    "namespace '{}' changed (expected version {})",
                    name, expected
                )));
            }
        }

        let object = &mut ns.object;
        patch.apply_to(&mut object.labels, &mut object.annotations);
        object.resource_version = Some(version);

        Ok(object.clone())
    }

    async fn delete(&self, name: &str) -> GatewayResult<()> {
        let mut state = self.state.write().await;
        state.enter(Operation::Delete)?;
        state
            .namespaces
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(name.to_string()))
    }

    async fn apply_policy_bundle(&self, name: &str, bundle: &PolicyBundle) -> GatewayResult<()> {
        let mut state = self.state.write().await;
        state.enter(Operation::ApplyPolicyBundle)?;

        let ns = state.namespace_mut(name)?;
        ns.applied.push(bundle.clone());
        for (kind, object_name) in [
            (ArtifactKind::ResourceQuota, QUOTA_OBJECT_NAME),
            (ArtifactKind::LimitRange, LIMIT_RANGE_OBJECT_NAME),
        ] {
            let names = ns.artifacts.entry(kind).or_default();
            if !names.iter().any(|n| n == object_name) {
                names.push(object_name.to_string());
            }
        }

        Ok(())
    }

    async fn list_artifacts(&self, namespace: &str, kind: ArtifactKind) -> GatewayResult<Vec<ArtifactRef>> {
        let mut state = self.state.write().await;
        state.enter(Operation::ListArtifacts)?;

        if state.broken_artifacts.contains(&kind) {
            return Err(GatewayError::Unavailable(format!("{} listing unavailable", kind)));
        }

        let ns = state.namespace(namespace)?;
        Ok(ns
            .artifacts
            .get(&kind)
            .map(|names| {
                names
                    .iter()
                    .map(|name| ArtifactRef {
                        kind,
                        name: name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_workloads(&self, namespace: &str) -> GatewayResult<Vec<WorkloadInfo>> {
        let mut state = self.state.write().await;
        state.enter(Operation::ListWorkloads)?;
        Ok(state.namespace(namespace)?.workloads.clone())
    }

    async fn export_resources(&self, namespace: &str) -> GatewayResult<Vec<ExportedResource>> {
        let mut state = self.state.write().await;
        state.enter(Operation::ExportResources)?;
        Ok(state.namespace(namespace)?.resources.clone())
    }
}
