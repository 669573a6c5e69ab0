//! Policy catalog
//!
//! Maps each lifecycle stage to the quota and limit-range bundle applied when
//! a namespace enters it. Values are configuration data: the built-in defaults
//! can be replaced per stage from the `[policies.<stage>]` config tables.

use crate::error::{GovernanceError, GovernanceResult};
use crate::quantity::{Cpu, Memory, ResourceAmount};
use nsgov_common::Stage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

/// ResourceQuota object name used for materialized bundles
pub const QUOTA_OBJECT_NAME: &str = "lifecycle-quota";
/// LimitRange object name used for materialized bundles
pub const LIMIT_RANGE_OBJECT_NAME: &str = "lifecycle-limits";

/// Namespace-wide quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub cpu_requests: Cpu,
    pub memory_requests: Memory,
    pub cpu_limits: Cpu,
    pub memory_limits: Memory,
    pub max_pods: u32,
    pub max_services: u32,
    pub max_pvcs: u32,
    pub max_secrets: u32,
    pub max_config_maps: u32,
}

impl QuotaLimits {
    /// `spec.hard` entries of a ResourceQuota
    pub fn to_hard(&self) -> BTreeMap<String, String> {
        let mut hard = BTreeMap::new();
        hard.insert("requests.cpu".to_string(), self.cpu_requests.to_string());
        hard.insert("requests.memory".to_string(), self.memory_requests.to_string());
        hard.insert("limits.cpu".to_string(), self.cpu_limits.to_string());
        hard.insert("limits.memory".to_string(), self.memory_limits.to_string());
        hard.insert("pods".to_string(), self.max_pods.to_string());
        hard.insert("services".to_string(), self.max_services.to_string());
        hard.insert("persistentvolumeclaims".to_string(), self.max_pvcs.to_string());
        hard.insert("secrets".to_string(), self.max_secrets.to_string());
        hard.insert("configmaps".to_string(), self.max_config_maps.to_string());
        hard
    }
}

/// Container and pod limit-range profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitProfile {
    pub container_default_request: ResourceAmount,
    pub container_default_limit: ResourceAmount,
    pub container_min: ResourceAmount,
    pub container_max: ResourceAmount,
    pub pod_min: ResourceAmount,
    pub pod_max: ResourceAmount,
}

/// Immutable policy bundle for one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBundle {
    pub stage: Stage,
    pub quota: QuotaLimits,
    pub limits: LimitProfile,
    /// Days until expiry when a namespace is provisioned at this stage
    pub retention_days: u32,
    /// Days until the first review when provisioned at this stage
    pub review_interval_days: u32,
}

impl PolicyBundle {
    /// Check the limit-range ordering invariants
    pub fn validate(&self) -> Result<(), CatalogError> {
        let l = &self.limits;
        let checks = [
            (l.container_min.fits_within(&l.container_default_request), "container_min must not exceed container_default_request"),
            (l.container_default_request.fits_within(&l.container_default_limit), "container_default_request must not exceed container_default_limit"),
            (l.container_default_limit.fits_within(&l.container_max), "container_default_limit must not exceed container_max"),
            (l.container_min.fits_within(&l.pod_min), "pod_min must be at least container_min"),
            (l.container_max.fits_within(&l.pod_max), "pod_max must be at least container_max"),
            (l.pod_min.fits_within(&l.pod_max), "pod_min must not exceed pod_max"),
        ];

        for (ok, reason) in checks {
            if !ok {
                return Err(CatalogError::InvalidBundle {
                    stage: self.stage,
                    reason: reason.to_string(),
                });
            }
        }

        Ok(())
    }

    /// SHA-256 over the canonical JSON encoding of the bundle
    pub fn fingerprint(&self) -> String {
        // Struct fields serialize in declaration order, so the encoding is stable
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }

    /// Identifier recorded as the namespace's policy reference
    pub fn reference(&self) -> String {
        format!("{}:{}", self.stage, &self.fingerprint()[..12])
    }
}

/// Per-stage override loaded from configuration; present sections replace the built-in ones
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<LimitProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_interval_days: Option<u32>,
}

/// Catalog construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Invalid policy for stage {stage}: {reason}")]
    InvalidBundle { stage: Stage, reason: String },

    #[error("Unknown stage '{0}' in policy configuration")]
    UnknownStage(String),
}

/// Stage -> bundle mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyCatalog {
    bundles: BTreeMap<Stage, PolicyBundle>,
}

impl PolicyCatalog {
    /// Built-in defaults covering every stage
    pub fn builtin() -> Self {
        let bundles = Stage::ALL
            .iter()
            .map(|stage| (*stage, builtin_bundle(*stage)))
            .collect();
        Self { bundles }
    }

    /// Built-in defaults with configured overrides applied
    pub fn with_overrides(overrides: &BTreeMap<String, PolicyOverride>) -> Result<Self, CatalogError> {
        let mut catalog = Self::builtin();

        for (stage_name, policy) in overrides {
            let stage: Stage = stage_name
                .parse()
                .map_err(|_| CatalogError::UnknownStage(stage_name.clone()))?;

            let bundle = catalog
                .bundles
                .get_mut(&stage)
                .ok_or_else(|| CatalogError::UnknownStage(stage_name.clone()))?;

            if let Some(quota) = &policy.quota {
                bundle.quota = quota.clone();
            }
            if let Some(limits) = &policy.limits {
                bundle.limits = limits.clone();
            }
            if let Some(days) = policy.retention_days {
                bundle.retention_days = days;
            }
            if let Some(days) = policy.review_interval_days {
                bundle.review_interval_days = days;
            }
        }

        for bundle in catalog.bundles.values() {
            bundle.validate()?;
        }

        Ok(catalog)
    }

    /// Catalog from an explicit bundle list; stages without a bundle stay unresolvable
    pub fn from_bundles(bundles: Vec<PolicyBundle>) -> Result<Self, CatalogError> {
        let mut map = BTreeMap::new();
        for bundle in bundles {
            bundle.validate()?;
            map.insert(bundle.stage, bundle);
        }
        Ok(Self { bundles: map })
    }

    /// Bundle applied on entry to `stage`
    pub fn resolve(&self, stage: Stage) -> GovernanceResult<&PolicyBundle> {
        self.bundles.get(&stage).ok_or_else(|| {
            tracing::error!(stage = %stage, "Policy catalog has no bundle for stage");
            GovernanceError::UnknownStage(stage.to_string())
        })
    }

    pub fn bundles(&self) -> impl Iterator<Item = &PolicyBundle> {
        self.bundles.values()
    }
}

impl Default for PolicyCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn amount(cpu_millis: u64, memory_mib: u64) -> ResourceAmount {
    ResourceAmount::new(Cpu::millis(cpu_millis), Memory::mebibytes(memory_mib))
}

fn builtin_bundle(stage: Stage) -> PolicyBundle {
    // Shared by the wind-down stages
    let minimal_limits = LimitProfile {
        container_default_request: amount(100, 128),
        container_default_limit: amount(500, 512),
        container_min: amount(50, 64),
        container_max: amount(1000, 2048),
        pod_min: amount(50, 64),
        pod_max: amount(2000, 4096),
    };

    match stage {
        Stage::Development => PolicyBundle {
            stage,
            quota: QuotaLimits {
                cpu_requests: Cpu::cores(2),
                memory_requests: Memory::gibibytes(4),
                cpu_limits: Cpu::cores(4),
                memory_limits: Memory::gibibytes(8),
                max_pods: 20,
                max_services: 10,
                max_pvcs: 5,
                max_secrets: 20,
                max_config_maps: 20,
            },
            limits: minimal_limits,
            retention_days: 90,
            review_interval_days: 30,
        },
        Stage::Testing => PolicyBundle {
            stage,
            quota: QuotaLimits {
                cpu_requests: Cpu::cores(4),
                memory_requests: Memory::gibibytes(8),
                cpu_limits: Cpu::cores(8),
                memory_limits: Memory::gibibytes(16),
                max_pods: 40,
                max_services: 20,
                max_pvcs: 10,
                max_secrets: 40,
                max_config_maps: 40,
            },
            limits: LimitProfile {
                container_default_request: amount(200, 256),
                container_default_limit: amount(1000, 1024),
                container_min: amount(50, 64),
                container_max: amount(2000, 4096),
                pod_min: amount(50, 64),
                pod_max: amount(4000, 8192),
            },
            retention_days: 60,
            review_interval_days: 14,
        },
        Stage::Production => PolicyBundle {
            stage,
            quota: QuotaLimits {
                cpu_requests: Cpu::cores(16),
                memory_requests: Memory::gibibytes(32),
                cpu_limits: Cpu::cores(32),
                memory_limits: Memory::gibibytes(64),
                max_pods: 200,
                max_services: 50,
                max_pvcs: 50,
                max_secrets: 100,
                max_config_maps: 100,
            },
            limits: LimitProfile {
                container_default_request: amount(250, 512),
                container_default_limit: amount(2000, 2048),
                container_min: amount(100, 128),
                container_max: amount(8000, 16384),
                pod_min: amount(100, 128),
                pod_max: amount(16000, 32768),
            },
            retention_days: 365,
            review_interval_days: 90,
        },
        Stage::Deprecated => PolicyBundle {
            stage,
            quota: QuotaLimits {
                cpu_requests: Cpu::cores(2),
                memory_requests: Memory::gibibytes(4),
                cpu_limits: Cpu::cores(4),
                memory_limits: Memory::gibibytes(8),
                max_pods: 10,
                max_services: 5,
                max_pvcs: 5,
                max_secrets: 20,
                max_config_maps: 20,
            },
            limits: minimal_limits,
            retention_days: 30,
            review_interval_days: 7,
        },
        // No new compute; volumes and config kept for restore
        Stage::Archived => PolicyBundle {
            stage,
            quota: QuotaLimits {
                cpu_requests: Cpu::millis(0),
                memory_requests: Memory::bytes(0),
                cpu_limits: Cpu::millis(0),
                memory_limits: Memory::bytes(0),
                max_pods: 0,
                max_services: 0,
                max_pvcs: 5,
                max_secrets: 20,
                max_config_maps: 20,
            },
            limits: minimal_limits,
            retention_days: 90,
            review_interval_days: 30,
        },
        Stage::Deleting => PolicyBundle {
            stage,
            quota: QuotaLimits {
                cpu_requests: Cpu::millis(0),
                memory_requests: Memory::bytes(0),
                cpu_limits: Cpu::millis(0),
                memory_limits: Memory::bytes(0),
                max_pods: 0,
                max_services: 0,
                max_pvcs: 0,
                max_secrets: 0,
                max_config_maps: 0,
            },
            limits: minimal_limits,
            retention_days: 0,
            review_interval_days: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_total_and_pure() {
        let catalog = PolicyCatalog::builtin();
        for stage in Stage::ALL {
            let first = catalog.resolve(stage).unwrap().clone();
            let second = catalog.resolve(stage).unwrap().clone();
            assert_eq!(first, second);
            assert_eq!(first.stage, stage);
            assert_eq!(first.fingerprint(), second.fingerprint());
        }
    }

    #[test]
    fn test_builtin_bundles_are_valid() {
        for bundle in PolicyCatalog::builtin().bundles() {
            bundle.validate().unwrap();
        }
    }

    #[test]
    fn test_references_differ_per_stage() {
        let catalog = PolicyCatalog::builtin();
        let refs: std::collections::BTreeSet<String> = Stage::ALL
            .iter()
            .map(|s| catalog.resolve(*s).unwrap().reference())
            .collect();
        assert_eq!(refs.len(), Stage::ALL.len());

        let dev = catalog.resolve(Stage::Development).unwrap().reference();
        assert!(dev.starts_with("development:"));
        assert_eq!(dev.len(), "development:".len() + 12);
    }

    #[test]
    fn test_quota_hard_keys() {
        let catalog = PolicyCatalog::builtin();
        let hard = catalog.resolve(Stage::Development).unwrap().quota.to_hard();
        assert_eq!(hard.get("requests.cpu").unwrap(), "2");
        assert_eq!(hard.get("limits.memory").unwrap(), "8Gi");
        assert_eq!(hard.get("pods").unwrap(), "20");
        assert_eq!(hard.len(), 9);
    }

    #[test]
    fn test_override_replaces_sections() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "production".to_string(),
            PolicyOverride {
                retention_days: Some(730),
                ..Default::default()
            },
        );

        let catalog = PolicyCatalog::with_overrides(&overrides).unwrap();
        let production = catalog.resolve(Stage::Production).unwrap();
        assert_eq!(production.retention_days, 730);
        assert_eq!(production.quota.max_pods, 200);
        assert_ne!(
            production.reference(),
            PolicyCatalog::builtin().resolve(Stage::Production).unwrap().reference()
        );
    }

    #[test]
    fn test_override_unknown_stage_rejected() {
        let mut overrides = BTreeMap::new();
        overrides.insert("staging".to_string(), PolicyOverride::default());
        let err = PolicyCatalog::with_overrides(&overrides).unwrap_err();
        assert_eq!(err, CatalogError::UnknownStage("staging".to_string()));
    }

    #[test]
    fn test_override_violating_invariant_rejected() {
        let mut limits = PolicyCatalog::builtin()
            .resolve(Stage::Testing)
            .unwrap()
            .limits
            .clone();
        limits.pod_max = amount(100, 64);

        let mut overrides = BTreeMap::new();
        overrides.insert(
            "testing".to_string(),
            PolicyOverride {
                limits: Some(limits),
                ..Default::default()
            },
        );

        let err = PolicyCatalog::with_overrides(&overrides).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidBundle { stage: Stage::Testing, .. }));
    }

    #[test]
    fn test_unknown_stage_on_partial_catalog() {
        let dev = PolicyCatalog::builtin()
            .resolve(Stage::Development)
            .unwrap()
            .clone();
        let catalog = PolicyCatalog::from_bundles(vec![dev]).unwrap();

        assert!(catalog.resolve(Stage::Development).is_ok());
        let err = catalog.resolve(Stage::Production).unwrap_err();
        assert_eq!(err.kind(), "UnknownStageError");
    }
}
