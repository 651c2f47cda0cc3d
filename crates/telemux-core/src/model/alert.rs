// ── Alert domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AlertSeverity {
    Info,
    #[strum(to_string = "warning", serialize = "warn")]
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    /// Errors and criticals both count as critical on the dashboard.
    pub fn is_critical(self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }
}

/// An infrastructure alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Option<String>,
    pub device_id: Option<String>,
    pub severity: AlertSeverity,
    pub message: String,
    pub source: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(severity: AlertSeverity, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            device_id: None,
            severity,
            message: message.into(),
            source: None,
            timestamp,
        }
    }
}
