//! Input validation for namespace provisioning
//! Names, label keys and values follow the Kubernetes object-name rules

use crate::error::{GovernanceError, GovernanceResult};
use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of a namespace name or a label value
pub const MAX_LABEL_LENGTH: usize = 63;
/// Maximum length of a label-key prefix (DNS subdomain)
pub const MAX_PREFIX_LENGTH: usize = 253;
/// Retention bounds in days
pub const MIN_RETENTION_DAYS: u32 = 1;
pub const MAX_RETENTION_DAYS: u32 = 3650;

static DNS_LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap()
});

static LABEL_VALUE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9_.-]*[A-Za-z0-9])?$").unwrap()
});

static DNS_SUBDOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)*$").unwrap()
});

/// Namespace name: DNS label, at most 63 characters
pub fn validate_namespace_name(name: &str) -> GovernanceResult<()> {
    if name.is_empty() {
        return Err(GovernanceError::Validation("Namespace name cannot be empty".to_string()));
    }

    if name.len() > MAX_LABEL_LENGTH {
        return Err(GovernanceError::Validation(format!(
            "Namespace name too long (max {} characters)",
            MAX_LABEL_LENGTH
        )));
    }

    if !DNS_LABEL_REGEX.is_match(name) {
        return Err(GovernanceError::Validation(format!(
            "Invalid namespace name '{}': use lowercase alphanumerics and '-', starting and ending with an alphanumeric",
            name
        )));
    }

    Ok(())
}

/// Non-empty label value (used for team and environment)
pub fn validate_label_value(field: &str, value: &str) -> GovernanceResult<()> {
    if value.is_empty() {
        return Err(GovernanceError::Validation(format!("{} cannot be empty", field)));
    }

    if value.len() > MAX_LABEL_LENGTH {
        return Err(GovernanceError::Validation(format!(
            "{} too long (max {} characters)",
            field, MAX_LABEL_LENGTH
        )));
    }

    if !LABEL_VALUE_REGEX.is_match(value) {
        return Err(GovernanceError::Validation(format!(
            "Invalid {} '{}': use alphanumerics, '-', '_' or '.', starting and ending with an alphanumeric",
            field, value
        )));
    }

    Ok(())
}

/// Label or annotation key: `[prefix/]name`
pub fn validate_metadata_key(key: &str) -> GovernanceResult<()> {
    let (prefix, name) = match key.rsplit_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LENGTH || !DNS_SUBDOMAIN_REGEX.is_match(prefix) {
            return Err(GovernanceError::Validation(format!("Invalid key prefix in '{}'", key)));
        }
    }

    if name.is_empty() || name.len() > MAX_LABEL_LENGTH || !LABEL_VALUE_REGEX.is_match(name) {
        return Err(GovernanceError::Validation(format!("Invalid metadata key '{}'", key)));
    }

    Ok(())
}

/// Retention in days, 1..=3650
pub fn validate_retention_days(days: u32) -> GovernanceResult<()> {
    if !(MIN_RETENTION_DAYS..=MAX_RETENTION_DAYS).contains(&days) {
        return Err(GovernanceError::Validation(format!(
            "Retention must be between {} and {} days, got {}",
            MIN_RETENTION_DAYS, MAX_RETENTION_DAYS, days
        )));
    }

    Ok(())
}
