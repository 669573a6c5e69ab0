//! Kubernetes cluster gateway
//!
//! Implements [`ClusterGateway`] on top of a kube-rs client. Namespace
//! bookkeeping is written with JSON merge patches carrying
//! `metadata.resourceVersion`, so a stale write comes back as HTTP 409.
//! Policy bundles are materialized with server-side apply.

use super::{
    ArtifactKind, ArtifactRef, ClusterGateway, ContainerSummary, ExportedResource, LabelSelector,
    MetadataPatch, NamespaceObject, WorkloadInfo,
};
use crate::catalog::{PolicyBundle, LIMIT_RANGE_OBJECT_NAME, QUOTA_OBJECT_NAME};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::quantity::ResourceAmount;
use crate::record::{LABEL_MANAGED_BY, MANAGED_BY};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, LimitRange, Namespace, PersistentVolumeClaim, ResourceQuota, Secret,
    Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
    PatchParams, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt::Debug;
use tracing::debug;

/// Field manager used for server-side apply
const FIELD_MANAGER: &str = "nsgov";

/// Map a kube-rs error onto the gateway error taxonomy
fn map_error(err: kube::Error, target: &str) -> GatewayError {
    match err {
        kube::Error::Api(response) => match response.code {
            404 => GatewayError::NotFound(target.to_string()),
            409 => GatewayError::Conflict(format!("{}: {}", target, response.message)),
            408 | 429 => GatewayError::Unavailable(response.message),
            code if (400..500).contains(&code) => GatewayError::Rejected(response.message),
            _ => GatewayError::Unavailable(response.message),
        },
        other => GatewayError::Unavailable(other.to_string()),
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

fn namespace_to_object(namespace: Namespace) -> NamespaceObject {
    let terminating = namespace.metadata.deletion_timestamp.is_some()
        || namespace
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            == Some("Terminating");
    let meta = namespace.metadata;

    NamespaceObject {
        name: meta.name.unwrap_or_default(),
        labels: meta.labels.unwrap_or_default(),
        annotations: meta.annotations.unwrap_or_default(),
        resource_version: meta.resource_version,
        created_at: meta.creation_timestamp.map(|ts| ts.0),
        terminating,
    }
}

fn container_summary(container: &Container) -> ContainerSummary {
    let resources = container.resources.as_ref();
    ContainerSummary {
        name: container.name.clone(),
        has_requests: resources
            .and_then(|r| r.requests.as_ref())
            .is_some_and(|requests| !requests.is_empty()),
        has_limits: resources
            .and_then(|r| r.limits.as_ref())
            .is_some_and(|limits| !limits.is_empty()),
        has_liveness_probe: container.liveness_probe.is_some(),
        has_readiness_probe: container.readiness_probe.is_some(),
    }
}

fn workload_info(kind: &str, name: String, containers: Option<&Vec<Container>>) -> WorkloadInfo {
    WorkloadInfo {
        kind: kind.to_string(),
        name,
        containers: containers
            .map(|list| list.iter().map(container_summary).collect())
            .unwrap_or_default(),
    }
}

fn amount(value: &ResourceAmount) -> Value {
    json!({
        "cpu": value.cpu.to_string(),
        "memory": value.memory.to_string(),
    })
}

fn managed_metadata(name: &str, namespace: &str) -> Value {
    json!({
        "name": name,
        "namespace": namespace,
        "labels": { LABEL_MANAGED_BY: MANAGED_BY },
    })
}

/// ResourceQuota manifest for a bundle
fn quota_manifest(namespace: &str, bundle: &PolicyBundle) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ResourceQuota",
        "metadata": managed_metadata(QUOTA_OBJECT_NAME, namespace),
        "spec": { "hard": bundle.quota.to_hard() },
    })
}

/// LimitRange manifest for a bundle
fn limit_range_manifest(namespace: &str, bundle: &PolicyBundle) -> Value {
    let limits = &bundle.limits;
    json!({
        "apiVersion": "v1",
        "kind": "LimitRange",
        "metadata": managed_metadata(LIMIT_RANGE_OBJECT_NAME, namespace),
        "spec": {
            "limits": [
                {
                    "type": "Container",
                    "defaultRequest": amount(&limits.container_default_request),
                    "default": amount(&limits.container_default_limit),
                    "min": amount(&limits.container_min),
                    "max": amount(&limits.container_max),
                },
                {
                    "type": "Pod",
                    "min": amount(&limits.pod_min),
                    "max": amount(&limits.pod_max),
                },
            ],
        },
    })
}

/// Merge-patch body for a metadata patch; `null` removes a key
fn merge_patch_body(patch: &MetadataPatch) -> Value {
    let entries = |map: &std::collections::BTreeMap<String, Option<String>>| -> Map<String, Value> {
        map.iter()
            .map(|(key, value)| {
                let value = value.clone().map(Value::String).unwrap_or(Value::Null);
                (key.clone(), value)
            })
            .collect()
    };

    let mut metadata = Map::new();
    if !patch.labels.is_empty() {
        metadata.insert("labels".to_string(), Value::Object(entries(&patch.labels)));
    }
    if !patch.annotations.is_empty() {
        metadata.insert("annotations".to_string(), Value::Object(entries(&patch.annotations)));
    }
    if let Some(version) = &patch.expected_version {
        metadata.insert("resourceVersion".to_string(), Value::String(version.clone()));
    }

    json!({ "metadata": metadata })
}

/// Gateway backed by a Kubernetes API server
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the gateway configuration
    ///
    /// An explicit kubeconfig path or context selects that kubeconfig entry;
    /// otherwise the in-cluster or default kubeconfig is inferred.
    pub async fn connect(config: &GatewayConfig) -> GatewayResult<Self> {
        let options = KubeConfigOptions {
            context: config.context.clone(),
            ..Default::default()
        };

        let kube_config = match &config.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    GatewayError::Rejected(format!(
                        "Failed to read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| GatewayError::Rejected(format!("Failed to create config: {}", e)))?
            }
            None if config.context.is_some() => Config::from_kubeconfig(&options)
                .await
                .map_err(|e| GatewayError::Rejected(format!("Failed to create config: {}", e)))?,
            None => Config::infer()
                .await
                .map_err(|e| GatewayError::Rejected(format!("Failed to infer config: {}", e)))?,
        };

        debug!(cluster = %kube_config.cluster_url, "Connecting to Kubernetes API");

        let client = Client::try_from(kube_config)
            .map_err(|e| GatewayError::Rejected(format!("Failed to create client: {}", e)))?;

        Ok(Self::new(client))
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    async fn names_of<K>(&self, namespace: &str, kind: ArtifactKind) -> GatewayResult<Vec<ArtifactRef>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(e, namespace))?;

        Ok(list
            .items
            .iter()
            .map(|item| ArtifactRef {
                kind,
                name: item.name_any(),
            })
            .collect())
    }

    /// ServiceMonitor is a CRD; a cluster without it has none
    async fn service_monitors(&self, namespace: &str) -> GatewayResult<Vec<ArtifactRef>> {
        let gvk = GroupVersionKind::gvk("monitoring.coreos.com", "v1", "ServiceMonitor");
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &resource);

        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list
                .items
                .iter()
                .map(|item| ArtifactRef {
                    kind: ArtifactKind::ServiceMonitor,
                    name: item.name_any(),
                })
                .collect()),
            Err(err) if is_not_found(&err) => Ok(Vec::new()),
            Err(err) => Err(map_error(err, namespace)),
        }
    }

    async fn export_kind<K>(&self, namespace: &str, out: &mut Vec<ExportedResource>) -> GatewayResult<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        let kind = K::kind(&Default::default()).to_string();
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(e, namespace))?;

        for item in list.items {
            let mut manifest = serde_json::to_value(&item)
                .map_err(|e| GatewayError::Rejected(format!("Failed to encode {}: {}", kind, e)))?;
            if let Some(meta) = manifest.get_mut("metadata").and_then(Value::as_object_mut) {
                meta.remove("managedFields");
            }
            if let Some(obj) = manifest.as_object_mut() {
                obj.entry("kind").or_insert_with(|| Value::String(kind.clone()));
            }

            out.push(ExportedResource {
                kind: kind.clone(),
                name: item.name_any(),
                labels: item.labels().clone(),
                manifest,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn get(&self, name: &str) -> GatewayResult<NamespaceObject> {
        let namespace = self.namespaces().get(name).await.map_err(|e| map_error(e, name))?;
        Ok(namespace_to_object(namespace))
    }

    async fn list(&self, selector: &LabelSelector) -> GatewayResult<Vec<NamespaceObject>> {
        let params = ListParams::default().labels(&selector.to_query());
        let list = self
            .namespaces()
            .list(&params)
            .await
            .map_err(|e| map_error(e, "namespaces"))?;

        Ok(list.items.into_iter().map(namespace_to_object).collect())
    }

    async fn create(&self, object: &NamespaceObject) -> GatewayResult<NamespaceObject> {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(object.name.clone()),
                labels: Some(object.labels.clone()),
                annotations: Some(object.annotations.clone()),
                ..Default::default()
            },
            ..Default::default()
        };

        let created = self
            .namespaces()
            .create(&PostParams::default(), &namespace)
            .await
            .map_err(|e| map_error(e, &object.name))?;

        Ok(namespace_to_object(created))
    }

    async fn patch_metadata(&self, name: &str, patch: &MetadataPatch) -> GatewayResult<NamespaceObject> {
        let body = merge_patch_body(patch);
        let patched = self
            .namespaces()
            .patch(name, &PatchParams::default(), &Patch::Merge(&body))
            .await
            .map_err(|e| map_error(e, name))?;

        Ok(namespace_to_object(patched))
    }

    async fn delete(&self, name: &str) -> GatewayResult<()> {
        self.namespaces()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_error(e, name))?;
        Ok(())
    }

    async fn apply_policy_bundle(&self, name: &str, bundle: &PolicyBundle) -> GatewayResult<()> {
        let params = PatchParams::apply(FIELD_MANAGER).force();

        let quotas: Api<ResourceQuota> = Api::namespaced(self.client.clone(), name);
        quotas
            .patch(QUOTA_OBJECT_NAME, &params, &Patch::Apply(quota_manifest(name, bundle)))
            .await
            .map_err(|e| map_error(e, name))?;

        let limit_ranges: Api<LimitRange> = Api::namespaced(self.client.clone(), name);
        limit_ranges
            .patch(
                LIMIT_RANGE_OBJECT_NAME,
                &params,
                &Patch::Apply(limit_range_manifest(name, bundle)),
            )
            .await
            .map_err(|e| map_error(e, name))?;

        debug!(namespace = name, policy = %bundle.reference(), "Applied policy bundle");
        Ok(())
    }

    async fn list_artifacts(&self, namespace: &str, kind: ArtifactKind) -> GatewayResult<Vec<ArtifactRef>> {
        match kind {
            ArtifactKind::NetworkPolicy => self.names_of::<NetworkPolicy>(namespace, kind).await,
            ArtifactKind::RoleBinding => self.names_of::<RoleBinding>(namespace, kind).await,
            ArtifactKind::ResourceQuota => self.names_of::<ResourceQuota>(namespace, kind).await,
            ArtifactKind::LimitRange => self.names_of::<LimitRange>(namespace, kind).await,
            ArtifactKind::ServiceMonitor => self.service_monitors(namespace).await,
        }
    }

    async fn list_workloads(&self, namespace: &str) -> GatewayResult<Vec<WorkloadInfo>> {
        let mut workloads = Vec::new();

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        for item in deployments
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(e, namespace))?
            .items
        {
            let containers = item
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .map(|pod| &pod.containers);
            workloads.push(workload_info("Deployment", item.name_any(), containers));
        }

        let stateful_sets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        for item in stateful_sets
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(e, namespace))?
            .items
        {
            let containers = item
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .map(|pod| &pod.containers);
            workloads.push(workload_info("StatefulSet", item.name_any(), containers));
        }

        let daemon_sets: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        for item in daemon_sets
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(e, namespace))?
            .items
        {
            let containers = item
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .map(|pod| &pod.containers);
            workloads.push(workload_info("DaemonSet", item.name_any(), containers));
        }

        Ok(workloads)
    }

    async fn export_resources(&self, namespace: &str) -> GatewayResult<Vec<ExportedResource>> {
        // Probe first so a missing namespace is NotFound rather than an empty export
        self.get(namespace).await?;

        let mut resources = Vec::new();
        self.export_kind::<ConfigMap>(namespace, &mut resources).await?;
        self.export_kind::<Secret>(namespace, &mut resources).await?;
        self.export_kind::<Service>(namespace, &mut resources).await?;
        self.export_kind::<ServiceAccount>(namespace, &mut resources).await?;
        self.export_kind::<PersistentVolumeClaim>(namespace, &mut resources).await?;
        self.export_kind::<Deployment>(namespace, &mut resources).await?;
        self.export_kind::<StatefulSet>(namespace, &mut resources).await?;
        self.export_kind::<DaemonSet>(namespace, &mut resources).await?;
        self.export_kind::<Ingress>(namespace, &mut resources).await?;
        self.export_kind::<NetworkPolicy>(namespace, &mut resources).await?;
        self.export_kind::<Role>(namespace, &mut resources).await?;
        self.export_kind::<RoleBinding>(namespace, &mut resources).await?;
        self.export_kind::<ResourceQuota>(namespace, &mut resources).await?;
        self.export_kind::<LimitRange>(namespace, &mut resources).await?;

        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PolicyCatalog;
    use nsgov_common::Stage;

    #[test]
    fn test_merge_patch_body() {
        let patch = MetadataPatch::new()
            .label("lifecycle-stage", "testing")
            .remove_annotation("lifecycle.nsgov.io/deletion-started-at")
            .expect_version(Some("42".to_string()));

        let body = merge_patch_body(&patch);
        assert_eq!(body["metadata"]["labels"]["lifecycle-stage"], "testing");
        assert!(body["metadata"]["annotations"]["lifecycle.nsgov.io/deletion-started-at"].is_null());
        assert_eq!(body["metadata"]["resourceVersion"], "42");
    }

    #[test]
    fn test_merge_patch_without_version() {
        let body = merge_patch_body(&MetadataPatch::new().label("team", "payments"));
        assert!(body["metadata"].get("resourceVersion").is_none());
        assert!(body["metadata"].get("annotations").is_none());
    }

    #[test]
    fn test_policy_manifests() {
        let catalog = PolicyCatalog::builtin();
        let bundle = catalog.resolve(Stage::Production).unwrap();

        let quota = quota_manifest("team-a", bundle);
        assert_eq!(quota["metadata"]["name"], QUOTA_OBJECT_NAME);
        assert_eq!(quota["metadata"]["labels"][LABEL_MANAGED_BY], MANAGED_BY);
        assert_eq!(
            quota["spec"]["hard"]["pods"],
            bundle.quota.max_pods.to_string()
        );

        let limits = limit_range_manifest("team-a", bundle);
        assert_eq!(limits["spec"]["limits"][0]["type"], "Container");
        assert_eq!(limits["spec"]["limits"][1]["type"], "Pod");
        assert_eq!(
            limits["spec"]["limits"][0]["max"]["cpu"],
            bundle.limits.container_max.cpu.to_string()
        );
    }

    #[test]
    fn test_terminating_namespace() {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some("team-a".to_string()),
                resource_version: Some("7".to_string()),
                ..Default::default()
            },
            status: Some(k8s_openapi::api::core::v1::NamespaceStatus {
                phase: Some("Terminating".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let object = namespace_to_object(namespace);
        assert_eq!(object.name, "team-a");
        assert_eq!(object.resource_version.as_deref(), Some("7"));
        assert!(object.terminating);
    }

    #[test]
    fn test_container_summary() {
        let container = Container {
            name: "app".to_string(),
            ..Default::default()
        };
        let summary = container_summary(&container);
        assert!(!summary.has_requests);
        assert!(!summary.has_liveness_probe);
    }
}
