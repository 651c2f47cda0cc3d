//! Wire frames exchanged with the telemetry server.
//!
//! Inbound frames have the shape `{ "type": "...", "data": { ... } }`.
//! The `type` tag selects the payload struct; everything the server sends
//! beyond the known fields is kept in `extra` so nothing is silently
//! dropped. Outbound traffic is limited to small control messages that
//! declare or retract interest in a topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Inbound ──────────────────────────────────────────────────────────

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum InboundFrame {
    Metrics(MetricsData),
    Container(ContainerData),
    Alert(AlertData),
}

impl InboundFrame {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The wire `type` tag of this frame.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Metrics(_) => "metrics",
            Self::Container(_) => "container",
            Self::Alert(_) => "alert",
        }
    }
}

/// One system-metrics sample for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsData {
    pub device_id: String,

    /// RFC 3339 sample time. Missing means "now" to the consumer.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, alias = "cpu")]
    pub cpu_percent: Option<f64>,

    #[serde(default, alias = "memory")]
    pub memory_percent: Option<f64>,

    #[serde(default, alias = "disk")]
    pub disk_percent: Option<f64>,

    #[serde(default, alias = "network_rx")]
    pub network_rx_bytes: Option<u64>,

    #[serde(default, alias = "network_tx")]
    pub network_tx_bytes: Option<u64>,

    /// Reported device status (`"online"`, `"offline"`), if the agent sends one.
    #[serde(default)]
    pub status: Option<String>,

    /// All remaining fields the server sends.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A container lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerData {
    pub device_id: String,

    #[serde(alias = "id")]
    pub container_id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Container state after the event: `"running"`, `"exited"`, ...
    #[serde(alias = "state")]
    pub status: String,

    /// What happened: `"start"`, `"stop"`, `"die"`, ...
    #[serde(default)]
    pub action: Option<String>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An infrastructure alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertData {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub device_id: Option<String>,

    /// `"info"`, `"warning"`, `"error"` or `"critical"`.
    pub severity: String,

    #[serde(alias = "msg")]
    pub message: String,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Outbound ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
}

/// Topic declaration sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub action: ControlAction,
    pub topic: String,
}

impl ControlMessage {
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            action: ControlAction::Subscribe,
            topic: topic.into(),
        }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self {
            action: ControlAction::Unsubscribe,
            topic: topic.into(),
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_text(&self) -> String {
        serde_json::json!({
            "action": self.action,
            "topic": self.topic,
        })
        .to_string()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
