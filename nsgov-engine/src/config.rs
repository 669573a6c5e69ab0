//! Configuration management for nsgov
//!
//! Settings are layered, lowest priority first:
//! 1. Default values
//! 2. Configuration file (TOML format)
//! 3. Environment variables (`NSGOV_*`)

use crate::catalog::{CatalogError, PolicyCatalog, PolicyOverride};
use crate::logging::LogRotation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main configuration struct for nsgov
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Engine behaviour
    pub engine: EngineConfig,
    /// Expiration sweep
    pub sweep: SweepConfig,
    /// Cluster gateway timeouts and retries
    pub gateway: GatewayConfig,
    /// Backup storage
    pub backup: BackupConfig,
    /// Diagnostic scoring
    pub diagnostics: DiagnosticsConfig,
    /// Logging
    pub logging: LoggingSettings,
    /// Per-stage policy overrides, keyed by stage name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub policies: BTreeMap<String, PolicyOverride>,
}

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Permit archived -> development/testing reactivation
    pub allow_reactivation: bool,
}

/// Expiration sweep configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Days past expiry before a namespace is reclaimed
    pub grace_days: u32,
    /// Age after which another reclaimer's marker is taken over
    pub stale_marker_minutes: u32,
}

/// Cluster gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Timeout for a single gateway call
    pub call_timeout_secs: u64,
    /// Budget for one operation including retries (0 disables)
    pub deadline_secs: u64,
    /// Attempts per retryable call
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Kubeconfig path; in-cluster or default kubeconfig when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Backup storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory holding backup artifacts
    pub dir: PathBuf,
    /// Writes attempted before a backup is declared failed
    pub store_attempts: u32,
}

/// Diagnostic scoring configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Share of workloads/resources that must comply for a coverage check to pass
    pub coverage_threshold_percent: u32,
    /// Labels every namespaced resource should carry
    pub required_labels: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Enable file logging
    pub file_logging_enabled: bool,
    /// JSON lines on the console as well as in files
    pub json_format: bool,
    /// Log file rotation (hourly, daily, never)
    pub rotation: String,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            grace_days: 7,
            stale_marker_minutes: 60,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 10,
            deadline_secs: 60,
            max_attempts: 4,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            kubeconfig: None,
            context: None,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/nsgov/backups"),
            store_attempts: 3,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            coverage_threshold_percent: 80,
            required_labels: vec!["app.kubernetes.io/name".to_string(), "team".to_string()],
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("/var/log/nsgov"),
            file_logging_enabled: false,
            json_format: false,
            rotation: "daily".to_string(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl GovernanceConfig {
    /// Load configuration from the standard locations and the environment
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(config_path) = Self::find_config_file() {
            match Self::load_from_file(&config_path) {
                Ok(file_config) => config = file_config,
                Err(e) => tracing::warn!("Ignoring config file: {}", e),
            }
        }

        config.apply_env_overrides();
        config
    }

    /// Like [`load`](Self::load), but an explicit path must exist and parse
    pub fn load_with(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => return Ok(Self::load()),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e.to_string()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("NSGOV_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/nsgov/config.toml")),
            Some(PathBuf::from("./nsgov.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply `NSGOV_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup; unparsable values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }

        // Engine
        if let Some(allow) = parsed(lookup("NSGOV_ALLOW_REACTIVATION")) {
            self.engine.allow_reactivation = allow;
        }

        // Sweep
        if let Some(days) = parsed(lookup("NSGOV_GRACE_DAYS")) {
            self.sweep.grace_days = days;
        }
        if let Some(minutes) = parsed(lookup("NSGOV_STALE_MARKER_MINUTES")) {
            self.sweep.stale_marker_minutes = minutes;
        }

        // Gateway
        if let Some(secs) = parsed(lookup("NSGOV_CALL_TIMEOUT_SECS")) {
            self.gateway.call_timeout_secs = secs;
        }
        if let Some(secs) = parsed(lookup("NSGOV_DEADLINE_SECS")) {
            self.gateway.deadline_secs = secs;
        }
        if let Some(attempts) = parsed(lookup("NSGOV_MAX_ATTEMPTS")) {
            self.gateway.max_attempts = attempts;
        }
        if let Some(path) = lookup("NSGOV_KUBECONFIG") {
            self.gateway.kubeconfig = Some(PathBuf::from(path));
        }
        if let Some(context) = lookup("NSGOV_KUBE_CONTEXT") {
            self.gateway.context = Some(context);
        }

        // Backup
        if let Some(dir) = lookup("NSGOV_BACKUP_DIR") {
            self.backup.dir = PathBuf::from(dir);
        }
        if let Some(attempts) = parsed(lookup("NSGOV_BACKUP_STORE_ATTEMPTS")) {
            self.backup.store_attempts = attempts;
        }

        // Diagnostics
        if let Some(threshold) = parsed(lookup("NSGOV_COVERAGE_THRESHOLD")) {
            self.diagnostics.coverage_threshold_percent = threshold;
        }
        if let Some(labels) = lookup("NSGOV_REQUIRED_LABELS") {
            self.diagnostics.required_labels = labels
                .split(',')
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
        }

        // Logging
        if let Some(level) = lookup("NSGOV_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(dir) = lookup("NSGOV_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(dir);
        }
        if let Some(enabled) = parsed(lookup("NSGOV_FILE_LOGGING")) {
            self.logging.file_logging_enabled = enabled;
        }
        if let Some(json) = parsed(lookup("NSGOV_LOG_JSON")) {
            self.logging.json_format = json;
        }
        if let Some(rotation) = lookup("NSGOV_LOG_ROTATION") {
            self.logging.rotation = rotation;
        }
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = Self::default();
        let mut sample = toml::to_string_pretty(&config).unwrap_or_default();
        sample.push_str(
            "\n# Per-stage policy overrides replace whole sections of the built-in bundle:\n\
             #\n\
             # [policies.production]\n\
             # retention_days = 730\n\
             #\n\
             # [policies.production.quota]\n\
             # cpu_requests = \"16\"\n\
             # memory_requests = \"32Gi\"\n\
             # cpu_limits = \"32\"\n\
             # memory_limits = \"64Gi\"\n\
             # max_pods = 200\n\
             # max_services = 50\n\
             # max_pvcs = 50\n\
             # max_secrets = 100\n\
             # max_config_maps = 100\n",
        );
        sample
    }

    /// Built-in policy catalog with the configured overrides applied
    pub fn catalog(&self) -> Result<PolicyCatalog, ConfigError> {
        Ok(PolicyCatalog::with_overrides(&self.policies)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.max_attempts == 0 {
            return Err(ConfigError::Validation("gateway.max_attempts must be at least 1".to_string()));
        }

        if self.gateway.call_timeout_secs == 0 {
            return Err(ConfigError::Validation("gateway.call_timeout_secs cannot be 0".to_string()));
        }

        if self.gateway.initial_backoff_ms > self.gateway.max_backoff_ms {
            return Err(ConfigError::Validation(
                "gateway.initial_backoff_ms cannot exceed gateway.max_backoff_ms".to_string(),
            ));
        }

        if self.sweep.stale_marker_minutes == 0 {
            return Err(ConfigError::Validation("sweep.stale_marker_minutes cannot be 0".to_string()));
        }

        if self.diagnostics.coverage_threshold_percent > 100 {
            return Err(ConfigError::Validation(
                "diagnostics.coverage_threshold_percent must be between 0 and 100".to_string(),
            ));
        }

        if self.backup.dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation("backup.dir cannot be empty".to_string()));
        }

        if self.backup.store_attempts == 0 {
            return Err(ConfigError::Validation("backup.store_attempts must be at least 1".to_string()));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level '{}' is not one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        if LogRotation::from_name(&self.logging.rotation).is_none() {
            return Err(ConfigError::Validation(format!(
                "logging.rotation '{}' is not one of hourly, daily, never",
                self.logging.rotation
            )));
        }

        self.catalog()?;

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file {0:?}: {1}")]
    FileRead(PathBuf, String),

    /// Failed to parse configuration
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// Configuration validation failed
    #[error("Config validation failed: {0}")]
    Validation(String),

    /// A `[policies.<stage>]` table is unusable
    #[error("Invalid policy configuration: {0}")]
    Policy(#[from] CatalogError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsgov_common::Stage;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = GovernanceConfig::default();
        assert!(!config.engine.allow_reactivation);
        assert_eq!(config.sweep.grace_days, 7);
        assert_eq!(config.diagnostics.coverage_threshold_percent, 80);
        assert_eq!(config.diagnostics.required_labels, vec!["app.kubernetes.io/name", "team"]);
        assert!(config.policies.is_empty());
    }

    #[test]
    fn test_config_validation() {
        let config = GovernanceConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid = GovernanceConfig::default();
        invalid.gateway.max_attempts = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = GovernanceConfig::default();
        invalid.diagnostics.coverage_threshold_percent = 120;
        assert!(invalid.validate().is_err());

        let mut invalid = GovernanceConfig::default();
        invalid.logging.level = "loud".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = GovernanceConfig::default();
        invalid.logging.rotation = "weekly".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = GovernanceConfig::default();
        invalid.backup.store_attempts = 0;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_generate_sample_config() {
        let sample = GovernanceConfig::generate_sample();
        assert!(sample.contains("[engine]"));
        assert!(sample.contains("[sweep]"));
        assert!(sample.contains("[gateway]"));
        assert!(sample.contains("[backup]"));
        assert!(sample.contains("[diagnostics]"));
        assert!(sample.contains("[logging]"));

        // The sample must load back to the defaults
        let parsed = GovernanceConfig::from_toml(&sample).unwrap();
        assert_eq!(parsed, GovernanceConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = GovernanceConfig::from_toml(
            r#"
            [sweep]
            grace_days = 14

            [engine]
            allow_reactivation = true
            "#,
        )
        .unwrap();

        assert_eq!(config.sweep.grace_days, 14);
        assert_eq!(config.sweep.stale_marker_minutes, 60);
        assert!(config.engine.allow_reactivation);
        assert_eq!(config.gateway.max_attempts, 4);
    }

    #[test]
    fn test_policy_override_from_toml() {
        let config = GovernanceConfig::from_toml(
            r#"
            [policies.production]
            retention_days = 730
            "#,
        )
        .unwrap();

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.resolve(Stage::Production).unwrap().retention_days, 730);
        assert_eq!(catalog.resolve(Stage::Testing).unwrap().retention_days, 60);
    }

    #[test]
    fn test_unknown_policy_stage_fails_validation() {
        let config = GovernanceConfig::from_toml(
            r#"
            [policies.staging]
            retention_days = 5
            "#,
        )
        .unwrap();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Policy(CatalogError::UnknownStage(_)))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("NSGOV_GRACE_DAYS", "3"),
            ("NSGOV_ALLOW_REACTIVATION", "true"),
            ("NSGOV_REQUIRED_LABELS", "owner, tier,"),
            ("NSGOV_MAX_ATTEMPTS", "not-a-number"),
            ("NSGOV_BACKUP_DIR", "/tmp/nsgov-backups"),
            ("NSGOV_BACKUP_STORE_ATTEMPTS", "5"),
            ("NSGOV_LOG_ROTATION", "hourly"),
        ]
        .into_iter()
        .collect();

        let mut config = GovernanceConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.sweep.grace_days, 3);
        assert!(config.engine.allow_reactivation);
        assert_eq!(config.diagnostics.required_labels, vec!["owner", "tier"]);
        assert_eq!(config.gateway.max_attempts, 4);
        assert_eq!(config.backup.dir, PathBuf::from("/tmp/nsgov-backups"));
        assert_eq!(config.backup.store_attempts, 5);
        assert_eq!(config.logging.rotation, "hourly");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = GovernanceConfig::load_with(Some(Path::new("/nonexistent/nsgov.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(_, _)));
    }
}
