//! Scan lifecycle types
//!
//! A scan moves `pending -> running -> {completed | failed}` and never
//! leaves a terminal state. Every status write in the storage layer is a
//! conditional update against the expected prior status, so replayed or
//! out-of-order callbacks degrade to no-ops instead of corrupting state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scan record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScanStatus::Pending),
            "running" => Some(ScanStatus::Running),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    /// Whether `self -> to` is a legal forward move in the lifecycle.
    pub fn can_transition(&self, to: ScanStatus) -> bool {
        matches!(
            (self, to),
            (ScanStatus::Pending, ScanStatus::Running)
                | (ScanStatus::Pending, ScanStatus::Failed)
                | (ScanStatus::Running, ScanStatus::Completed)
                | (ScanStatus::Running, ScanStatus::Failed)
        )
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finding severity as reported by the scanning backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One vulnerability finding carried by a completion callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFinding {
    pub vulnerability_type: String,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Terminal outcome reported by the scanning backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Completed,
    Failed,
}

/// Callback body posted by the scanning backend on completion.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackPayload {
    pub scan_id: uuid::Uuid,
    pub status: CallbackStatus,
    #[serde(default)]
    pub results: Vec<NewFinding>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_only_moves_forward() {
        assert!(ScanStatus::Pending.can_transition(ScanStatus::Running));
        assert!(ScanStatus::Pending.can_transition(ScanStatus::Failed));
        assert!(ScanStatus::Running.can_transition(ScanStatus::Completed));
        assert!(ScanStatus::Running.can_transition(ScanStatus::Failed));

        assert!(!ScanStatus::Running.can_transition(ScanStatus::Pending));
        assert!(!ScanStatus::Completed.can_transition(ScanStatus::Running));
        assert!(!ScanStatus::Completed.can_transition(ScanStatus::Failed));
        assert!(!ScanStatus::Failed.can_transition(ScanStatus::Completed));
        assert!(!ScanStatus::Pending.can_transition(ScanStatus::Completed));
    }

    #[test]
    fn terminal_states() {
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
        assert!(!ScanStatus::Pending.is_terminal());
        assert!(!ScanStatus::Running.is_terminal());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            ScanStatus::Pending,
            ScanStatus::Running,
            ScanStatus::Completed,
            ScanStatus::Failed,
        ] {
            assert_eq!(ScanStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ScanStatus::parse("cancelled"), None);
    }

    #[test]
    fn severity_parses_fixed_enum_only() {
        assert_eq!(Severity::parse("critical"), Some(Severity::Critical));
        assert_eq!(Severity::parse("informational"), None);
        assert_eq!(Severity::parse("HIGH"), None);
    }

    #[test]
    fn callback_payload_deserializes_with_optional_fields() {
        let payload: CallbackPayload = serde_json::from_str(
            r#"{
                "scan_id": "7f2c0a9e-52f1-4b3c-9d4e-8a27cf8d1a11",
                "status": "completed",
                "results": [{
                    "vulnerability_type": "xss",
                    "severity": "high",
                    "description": "Reflected XSS on /search"
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(payload.status, CallbackStatus::Completed);
        assert_eq!(payload.results.len(), 1);
        assert!(payload.results[0].recommendation.is_none());

        let failed: CallbackPayload = serde_json::from_str(
            r#"{
                "scan_id": "7f2c0a9e-52f1-4b3c-9d4e-8a27cf8d1a11",
                "status": "failed",
                "error": "target unreachable"
            }"#,
        )
        .unwrap();
        assert_eq!(failed.status, CallbackStatus::Failed);
        assert!(failed.results.is_empty());
    }
}
