//! Common types shared between nsgov-engine and nsgov-cli

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Namespace lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Development,
    Testing,
    Production,
    Deprecated,
    Archived,
    Deleting, // terminal, object is removed
}

impl Stage {
    /// Every stage, in lifecycle order
    pub const ALL: [Stage; 6] = [
        Stage::Development,
        Stage::Testing,
        Stage::Production,
        Stage::Deprecated,
        Stage::Archived,
        Stage::Deleting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Production => "production",
            Self::Deprecated => "deprecated",
            Self::Archived => "archived",
            Self::Deleting => "deleting",
        }
    }

    /// Entering this stage destroys or freezes workloads, so a backup must exist first
    pub fn requires_backup(&self) -> bool {
        matches!(self, Self::Deprecated | Self::Archived | Self::Deleting)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a string does not name a lifecycle stage
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown lifecycle stage '{0}' (expected one of development, testing, production, deprecated, archived, deleting)")]
pub struct ParseStageError(pub String);

impl FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "testing" | "test" => Ok(Self::Testing),
            "production" | "prod" => Ok(Self::Production),
            "deprecated" => Ok(Self::Deprecated),
            "archived" => Ok(Self::Archived),
            "deleting" => Ok(Self::Deleting),
            other => Err(ParseStageError(other.to_string())),
        }
    }
}

/// Qualitative label for a diagnostic percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticBucket {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl DiagnosticBucket {
    /// Fixed threshold ladder over a 0-100 percentage
    pub fn from_percentage(percentage: u32) -> Self {
        match percentage {
            p if p >= 90 => Self::Excellent,
            p if p >= 70 => Self::Good,
            p if p >= 50 => Self::Fair,
            _ => Self::Poor,
        }
    }
}

impl std::fmt::Display for DiagnosticBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Excellent => write!(f, "excellent"),
            Self::Good => write!(f, "good"),
            Self::Fair => write!(f, "fair"),
            Self::Poor => write!(f, "poor"),
        }
    }
}

/// Recommendation priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_parse_and_display() {
        for stage in Stage::ALL {
            let parsed: Stage = stage.to_string().parse().unwrap();
            assert_eq!(parsed, stage);
        }
        assert_eq!("prod".parse::<Stage>().unwrap(), Stage::Production);
        assert_eq!(" Testing ".parse::<Stage>().unwrap(), Stage::Testing);
        assert!("staging".parse::<Stage>().is_err());
    }

    #[test]
    fn test_stage_serde_lowercase() {
        let json = serde_json::to_string(&Stage::Deprecated).unwrap();
        assert_eq!(json, "\"deprecated\"");
    }

    #[test]
    fn test_bucket_ladder() {
        assert_eq!(DiagnosticBucket::from_percentage(100), DiagnosticBucket::Excellent);
        assert_eq!(DiagnosticBucket::from_percentage(90), DiagnosticBucket::Excellent);
        assert_eq!(DiagnosticBucket::from_percentage(80), DiagnosticBucket::Good);
        assert_eq!(DiagnosticBucket::from_percentage(70), DiagnosticBucket::Good);
        assert_eq!(DiagnosticBucket::from_percentage(60), DiagnosticBucket::Fair);
        assert_eq!(DiagnosticBucket::from_percentage(50), DiagnosticBucket::Fair);
        assert_eq!(DiagnosticBucket::from_percentage(40), DiagnosticBucket::Poor);
        assert_eq!(DiagnosticBucket::from_percentage(0), DiagnosticBucket::Poor);
    }

    #[test]
    fn test_backup_required_stages() {
        assert!(!Stage::Development.requires_backup());
        assert!(!Stage::Production.requires_backup());
        assert!(Stage::Deprecated.requires_backup());
        assert!(Stage::Archived.requires_backup());
        assert!(Stage::Deleting.requires_backup());
    }
}
