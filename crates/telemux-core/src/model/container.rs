// ── Container domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ContainerStatus {
    Running,
    Paused,
    Restarting,
    Created,
    #[strum(to_string = "exited", serialize = "stopped")]
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

/// A container lifecycle event as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEvent {
    pub device_id: String,
    pub container_id: String,
    pub name: Option<String>,
    pub status: ContainerStatus,
    /// `start`, `stop`, `die`, ... when the server says what happened.
    pub action: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Latest known state of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub device_id: String,
    pub container_id: String,
    pub name: Option<String>,
    pub status: ContainerStatus,
}

impl ContainerState {
    pub fn new(
        device_id: impl Into<String>,
        container_id: impl Into<String>,
        status: ContainerStatus,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            container_id: container_id.into(),
            name: None,
            status,
        }
    }

    /// Container ids are only unique per host.
    pub fn key(&self) -> (String, String) {
        (self.device_id.clone(), self.container_id.clone())
    }
}

impl From<&ContainerEvent> for ContainerState {
    fn from(event: &ContainerEvent) -> Self {
        Self {
            device_id: event.device_id.clone(),
            container_id: event.container_id.clone(),
            name: event.name.clone(),
            status: event.status,
        }
    }
}
