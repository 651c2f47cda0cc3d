// ── Runtime hub configuration ──
//
// Describes how a `Hub` connects and how much history its adapters keep.
// Never touches disk; the binary builds one from `telemux-config` and
// hands it in.

use telemux_api::{ConnectionConfig, ReconnectConfig};
use url::Url;

/// Samples kept per device for charts.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Alerts kept by an alerts stream.
pub const DEFAULT_ALERT_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// WebSocket endpoint, reconnect policy and upgrade headers.
    pub connection: ConnectionConfig,
    pub history_capacity: usize,
    pub alert_capacity: usize,
}

impl HubConfig {
    pub fn new(url: Url) -> Self {
        Self {
            connection: ConnectionConfig::new(url),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            alert_capacity: DEFAULT_ALERT_CAPACITY,
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.connection = self.connection.with_reconnect(reconnect);
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_alert_capacity(mut self, capacity: usize) -> Self {
        self.alert_capacity = capacity;
        self
    }

    pub fn url(&self) -> &Url {
        &self.connection.url
    }
}
