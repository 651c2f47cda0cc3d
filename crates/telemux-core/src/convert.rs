// ── Wire-to-domain conversions ──
//
// Bridges raw `telemux_api` frame and inventory types into the typed
// `crate::model` values. Status strings are parsed into enums; values
// the server invents later fall back to `Unknown` (or `Info` for alert
// severity) instead of failing the whole frame.

use chrono::{DateTime, Utc};
use tracing::debug;

use telemux_api::{
    AlertData, ContainerData, InboundFrame, InventoryContainer, InventoryDevice, MetricsData,
};

use crate::error::DecodeError;
use crate::model::{
    Alert, AlertSeverity, ContainerEvent, ContainerState, ContainerStatus, DeviceState,
    DeviceStatus, Envelope, Message, MetricSample,
};

// ── Helpers ────────────────────────────────────────────────────────

fn parse_device_status(raw: Option<&str>) -> DeviceStatus {
    match raw {
        // A device that reports without a status is up.
        None => DeviceStatus::Online,
        Some(s) => s.parse().unwrap_or(DeviceStatus::Unknown),
    }
}

fn parse_container_status(raw: &str) -> ContainerStatus {
    raw.parse().unwrap_or(ContainerStatus::Unknown)
}

fn parse_severity(raw: &str) -> AlertSeverity {
    raw.parse().unwrap_or_else(|_| {
        debug!(severity = raw, "unknown alert severity, treating as info");
        AlertSeverity::Info
    })
}

// ── Frames ─────────────────────────────────────────────────────────

impl MetricSample {
    pub(crate) fn from_wire(data: MetricsData, received_at: DateTime<Utc>) -> Self {
        Self {
            status: parse_device_status(data.status.as_deref()),
            device_id: data.device_id,
            timestamp: data.timestamp.unwrap_or(received_at),
            cpu_percent: data.cpu_percent,
            memory_percent: data.memory_percent,
            disk_percent: data.disk_percent,
            network_rx_bytes: data.network_rx_bytes,
            network_tx_bytes: data.network_tx_bytes,
            extra: data.extra,
        }
    }
}

impl ContainerEvent {
    pub(crate) fn from_wire(data: ContainerData, received_at: DateTime<Utc>) -> Self {
        Self {
            status: parse_container_status(&data.status),
            device_id: data.device_id,
            container_id: data.container_id,
            name: data.name,
            action: data.action,
            timestamp: data.timestamp.unwrap_or(received_at),
        }
    }
}

impl Alert {
    pub(crate) fn from_wire(data: AlertData, received_at: DateTime<Utc>) -> Self {
        Self {
            severity: parse_severity(&data.severity),
            id: data.id,
            device_id: data.device_id,
            message: data.message,
            source: data.source,
            timestamp: data.timestamp.unwrap_or(received_at),
        }
    }
}

impl Message {
    /// Turn a decoded wire frame into a typed message.
    pub fn from_frame(frame: InboundFrame, received_at: DateTime<Utc>) -> Self {
        match frame {
            InboundFrame::Metrics(data) => Self::Metrics(MetricSample::from_wire(data, received_at)),
            InboundFrame::Container(data) => {
                Self::Container(ContainerEvent::from_wire(data, received_at))
            }
            InboundFrame::Alert(data) => Self::Alert(Alert::from_wire(data, received_at)),
        }
    }
}

/// Decode one raw text frame into an envelope stamped with `received_at`.
pub fn decode_envelope(text: &str, received_at: DateTime<Utc>) -> Result<Envelope, DecodeError> {
    let frame = InboundFrame::parse(text)?;
    let message = Message::from_frame(frame, received_at);
    let device_missing = match &message {
        Message::Metrics(m) => m.device_id.is_empty(),
        Message::Container(c) => c.device_id.is_empty(),
        Message::Alert(_) => false,
    };
    if device_missing {
        return Err(DecodeError::MissingDevice);
    }
    Ok(Envelope::new(message, received_at))
}

// ── Inventory ──────────────────────────────────────────────────────

impl From<InventoryDevice> for DeviceState {
    fn from(d: InventoryDevice) -> Self {
        Self {
            status: d.status.parse().unwrap_or(DeviceStatus::Unknown),
            device_id: d.id,
            name: d.name,
        }
    }
}

impl From<InventoryContainer> for ContainerState {
    fn from(c: InventoryContainer) -> Self {
        Self {
            status: parse_container_status(&c.status),
            device_id: c.device_id,
            container_id: c.id,
            name: c.name,
        }
    }
}
