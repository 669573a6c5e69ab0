//! Logging configuration module
//! Structured logging with a console layer and optional rolling JSON files

use crate::config::LoggingSettings;
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,               // log level (trace, debug, info, warn, error)
    pub file_dir: Option<PathBuf>,   // directory for rolling log files
    pub rotation: LogRotation,       // log rotation policy
    pub json_format: bool,           // JSON on the console too
}

/// Log rotation policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl LogRotation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "hourly" => Some(LogRotation::Hourly),
            "daily" => Some(LogRotation::Daily),
            "never" => Some(LogRotation::Never),
            _ => None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_dir: None,
            rotation: LogRotation::Daily,
            json_format: false,
        }
    }
}

impl From<&LoggingSettings> for LoggingConfig {
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            level: settings.level.clone(),
            file_dir: settings
                .file_logging_enabled
                .then(|| settings.log_dir.clone()),
            rotation: LogRotation::from_name(&settings.rotation).unwrap_or(LogRotation::Daily),
            json_format: settings.json_format,
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber
    ///
    /// Console output goes to stderr so command output on stdout stays
    /// machine-readable. The returned guard flushes the file writer on drop
    /// and must be held for the life of the process.
    pub fn init(&self) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))?;

        let console_layer = if self.json_format {
            fmt::layer()
                .with_target(true)
                .with_writer(io::stderr)
                .json()
                .boxed()
        } else {
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_ansi(true)
                .with_writer(io::stderr)
                .boxed()
        };

        let mut guard = None;
        let file_layer = match &self.file_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let file_appender = match self.rotation {
                    LogRotation::Hourly => rolling::hourly(dir, "nsgov.log"),
                    LogRotation::Daily => rolling::daily(dir, "nsgov.log"),
                    LogRotation::Never => rolling::never(dir, "nsgov.log"),
                };
                let (writer, worker_guard) = non_blocking(file_appender);
                guard = Some(worker_guard);

                Some(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_ansi(false)
                        .json()
                        .with_writer(writer),
                )
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;

        tracing::debug!("Logging initialized - level: {}", self.level);

        Ok(guard)
    }
}

/// Log a committed lifecycle transition
#[macro_export]
macro_rules! log_transition {
    ($namespace:expr, $from:expr, $to:expr, $reason:expr) => {
        tracing::info!(
            namespace = %$namespace,
            from = %$from,
            to = %$to,
            reason = %$reason,
            "Lifecycle transition"
        )
    };
    ($namespace:expr, $from:expr, $to:expr, $reason:expr, $($key:ident = $value:expr),+) => {
        tracing::info!(
            namespace = %$namespace,
            from = %$from,
            to = %$to,
            reason = %$reason,
            $($key = %$value),+,
            "Lifecycle transition"
        )
    };
}

/// Log a reclamation step
#[macro_export]
macro_rules! log_reclaim {
    ($namespace:expr, $step:expr) => {
        tracing::info!(
            namespace = %$namespace,
            operation = "reclaim",
            step = $step,
            "Reclamation"
        )
    };
    ($namespace:expr, $step:expr, $($key:ident = $value:expr),+) => {
        tracing::info!(
            namespace = %$namespace,
            operation = "reclaim",
            step = $step,
            $($key = %$value),+,
            "Reclamation"
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.file_dir.is_none());
        assert_eq!(config.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_from_settings() {
        let mut settings = LoggingSettings::default();
        assert!(LoggingConfig::from(&settings).file_dir.is_none());

        settings.file_logging_enabled = true;
        settings.level = "debug".to_string();
        let config = LoggingConfig::from(&settings);
        assert_eq!(config.file_dir, Some(settings.log_dir.clone()));
        assert_eq!(config.level, "debug");
        assert_eq!(config.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_rotation_from_settings() {
        let mut settings = LoggingSettings::default();
        settings.rotation = "Hourly".to_string();
        assert_eq!(LoggingConfig::from(&settings).rotation, LogRotation::Hourly);

        settings.rotation = "never".to_string();
        assert_eq!(LoggingConfig::from(&settings).rotation, LogRotation::Never);

        assert_eq!(LogRotation::from_name("weekly"), None);
    }
}
