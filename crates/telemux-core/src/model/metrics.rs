// ── Metrics domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::device::DeviceStatus;

/// One system-metrics sample for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub device_id: String,
    /// Sample time from the agent, or arrival time when the agent sent none.
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
    pub network_rx_bytes: Option<u64>,
    pub network_tx_bytes: Option<u64>,
    /// A device that reports is online unless it says otherwise.
    pub status: DeviceStatus,
    pub extra: Map<String, Value>,
}
