// ── Device domain types ──

use serde::{Deserialize, Serialize};

/// Device reachability.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DeviceStatus {
    #[strum(to_string = "online", serialize = "up")]
    Online,
    #[strum(to_string = "offline", serialize = "down")]
    Offline,
    Unknown,
}

impl DeviceStatus {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Latest known state of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub device_id: String,
    pub name: Option<String>,
    pub status: DeviceStatus,
}

impl DeviceState {
    pub fn new(device_id: impl Into<String>, status: DeviceStatus) -> Self {
        Self {
            device_id: device_id.into(),
            name: None,
            status,
        }
    }
}
