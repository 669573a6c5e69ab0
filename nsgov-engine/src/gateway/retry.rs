//! Timeouts and bounded exponential backoff for gateway calls
//!
//! Every call is bounded by `call_timeout`; a timed-out call counts as
//! `Unavailable`. Only `Unavailable` is retried, and only for operations that
//! are safe to repeat. Namespace creation gets a single attempt.

use super::{
    ArtifactKind, ArtifactRef, ClusterGateway, ExportedResource, LabelSelector, MetadataPatch,
    NamespaceObject, WorkloadInfo,
};
use crate::catalog::PolicyBundle;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Retry budget for gateway calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
    /// Overall budget for one operation including backoff
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            deadline: if config.deadline_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(config.deadline_secs))
            },
        }
    }

    /// Same timeouts, one attempt
    pub fn single_attempt(&self) -> Self {
        Self {
            max_attempts: 1,
            ..self.clone()
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from `initial_backoff`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

/// Run `call` until it succeeds, fails with a non-retryable error, or the budget runs out
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Unavailable(format!(
                "{} timed out after {:?}",
                operation, policy.call_timeout
            ))),
        };

        match result {
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff_for(attempt);
                if let Some(deadline) = policy.deadline {
                    if started.elapsed() + delay >= deadline {
                        warn!(operation, attempt, "Gateway deadline exhausted: {}", err);
                        return Err(err);
                    }
                }
                debug!(operation, attempt, delay_ms = delay.as_millis() as u64, "Retrying gateway call: {}", err);
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// Gateway decorator applying [`RetryPolicy`] to every call
#[derive(Clone)]
pub struct RetryingGateway {
    inner: Arc<dyn ClusterGateway>,
    policy: RetryPolicy,
}

impl RetryingGateway {
    pub fn new(inner: Arc<dyn ClusterGateway>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl ClusterGateway for RetryingGateway {
    async fn get(&self, name: &str) -> GatewayResult<NamespaceObject> {
        with_retry(&self.policy, "get", || self.inner.get(name)).await
    }

    async fn list(&self, selector: &LabelSelector) -> GatewayResult<Vec<NamespaceObject>> {
        with_retry(&self.policy, "list", || self.inner.list(selector)).await
    }

    async fn create(&self, object: &NamespaceObject) -> GatewayResult<NamespaceObject> {
        // An ambiguous failure may have created the object; never repeat blindly
        with_retry(&self.policy.single_attempt(), "create", || self.inner.create(object)).await
    }

    async fn patch_metadata(&self, name: &str, patch: &MetadataPatch) -> GatewayResult<NamespaceObject> {
        with_retry(&self.policy, "patch_metadata", || self.inner.patch_metadata(name, patch)).await
    }

    async fn delete(&self, name: &str) -> GatewayResult<()> {
        with_retry(&self.policy, "delete", || self.inner.delete(name)).await
    }

    async fn apply_policy_bundle(&self, name: &str, bundle: &PolicyBundle) -> GatewayResult<()> {
        with_retry(&self.policy, "apply_policy_bundle", || {
            self.inner.apply_policy_bundle(name, bundle)
        })
        .await
    }

    async fn list_artifacts(&self, namespace: &str, kind: ArtifactKind) -> GatewayResult<Vec<ArtifactRef>> {
        with_retry(&self.policy, "list_artifacts", || self.inner.list_artifacts(namespace, kind)).await
    }

    async fn list_workloads(&self, namespace: &str) -> GatewayResult<Vec<WorkloadInfo>> {
        with_retry(&self.policy, "list_workloads", || self.inner.list_workloads(namespace)).await
    }

    async fn export_resources(&self, namespace: &str) -> GatewayResult<Vec<ExportedResource>> {
        with_retry(&self.policy, "export_resources", || self.inner.export_resources(namespace)).await
    }
}
