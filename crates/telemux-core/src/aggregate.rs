// ── Dashboard aggregation ──
//
// `compute_summary` is the reference: a pure function of the latest
// device, container and alert state. `SummaryTracker` keeps the same
// counters up to date from per-entity deltas so live updates never walk
// the full state, and `Aggregator` publishes the tracker's summary on a
// watch channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use telemux_api::InventoryResponse;

use crate::model::{Alert, AlertSeverity, ContainerState, ContainerStatus, DeviceState, DeviceStatus};

// ── Summary ──────────────────────────────────────────────────────────

/// Overall infrastructure health.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Health {
    #[default]
    Excellent,
    Good,
    Warning,
    Critical,
}

impl Health {
    /// Classify from the device-online and container-running ratios.
    pub fn classify(device_ratio: f64, container_ratio: f64) -> Self {
        if device_ratio > 0.9 && container_ratio > 0.85 {
            Self::Excellent
        } else if device_ratio > 0.75 && container_ratio > 0.7 {
            Self::Good
        } else if device_ratio > 0.5 || container_ratio > 0.5 {
            Self::Warning
        } else {
            Self::Critical
        }
    }
}

/// Derived dashboard summary. Never stored; always recomputable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateSummary {
    pub total_devices: usize,
    pub online_devices: usize,
    pub offline_devices: usize,
    pub total_containers: usize,
    pub running_containers: usize,
    pub stopped_containers: usize,
    pub health: Health,
    pub total_alerts: usize,
    /// Errors plus criticals.
    pub critical_alerts: usize,
    pub warning_alerts: usize,
    pub info_alerts: usize,
}

/// `part / total`, or 1.0 when there is nothing to count.
#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        part as f64 / total as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counts {
    devices: usize,
    online: usize,
    containers: usize,
    running: usize,
    critical: usize,
    warning: usize,
    info: usize,
}

impl Counts {
    fn alert(&mut self, severity: AlertSeverity, add: bool) {
        let slot = match severity {
            AlertSeverity::Error | AlertSeverity::Critical => &mut self.critical,
            AlertSeverity::Warning => &mut self.warning,
            AlertSeverity::Info => &mut self.info,
        };
        if add {
            *slot += 1;
        } else {
            *slot = slot.saturating_sub(1);
        }
    }

    fn summary(self) -> AggregateSummary {
        AggregateSummary {
            total_devices: self.devices,
            online_devices: self.online,
            offline_devices: self.devices - self.online,
            total_containers: self.containers,
            running_containers: self.running,
            stopped_containers: self.containers - self.running,
            health: Health::classify(
                ratio(self.online, self.devices),
                ratio(self.running, self.containers),
            ),
            total_alerts: self.critical + self.warning + self.info,
            critical_alerts: self.critical,
            warning_alerts: self.warning,
            info_alerts: self.info,
        }
    }
}

/// Summarize the given state. Deterministic and side-effect free.
pub fn compute_summary<'a>(
    devices: impl IntoIterator<Item = &'a DeviceState>,
    containers: impl IntoIterator<Item = &'a ContainerState>,
    alerts: impl IntoIterator<Item = &'a Alert>,
) -> AggregateSummary {
    let mut counts = Counts::default();
    for device in devices {
        counts.devices += 1;
        counts.online += usize::from(device.status.is_online());
    }
    for container in containers {
        counts.containers += 1;
        counts.running += usize::from(container.status.is_running());
    }
    for alert in alerts {
        counts.alert(alert.severity, true);
    }
    counts.summary()
}

// ── SummaryTracker ───────────────────────────────────────────────────

/// Incrementally maintained summary. Every update is O(1).
#[derive(Debug, Default)]
pub struct SummaryTracker {
    devices: HashMap<String, DeviceStatus>,
    containers: HashMap<(String, String), ContainerStatus>,
    counts: Counts,
}

impl SummaryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> AggregateSummary {
        self.counts.summary()
    }

    /// Record the latest status of a device.
    pub fn upsert_device(&mut self, device_id: &str, status: DeviceStatus) {
        let previous = self.devices.insert(device_id.to_owned(), status);
        match previous {
            Some(old) => {
                self.counts.online -= usize::from(old.is_online());
            }
            None => self.counts.devices += 1,
        }
        self.counts.online += usize::from(status.is_online());
    }

    pub fn remove_device(&mut self, device_id: &str) {
        if let Some(old) = self.devices.remove(device_id) {
            self.counts.devices -= 1;
            self.counts.online -= usize::from(old.is_online());
        }
    }

    /// Record the latest status of a container.
    pub fn upsert_container(&mut self, state: &ContainerState) {
        let previous = self.containers.insert(state.key(), state.status);
        match previous {
            Some(old) => {
                self.counts.running -= usize::from(old.is_running());
            }
            None => self.counts.containers += 1,
        }
        self.counts.running += usize::from(state.status.is_running());
    }

    pub fn remove_container(&mut self, device_id: &str, container_id: &str) {
        let key = (device_id.to_owned(), container_id.to_owned());
        if let Some(old) = self.containers.remove(&key) {
            self.counts.containers -= 1;
            self.counts.running -= usize::from(old.is_running());
        }
    }

    /// An alert entered the retained set.
    pub fn alert_added(&mut self, severity: AlertSeverity) {
        self.counts.alert(severity, true);
    }

    /// An alert left the retained set (evicted).
    pub fn alert_removed(&mut self, severity: AlertSeverity) {
        self.counts.alert(severity, false);
    }

    /// Replace device and container state with an authoritative snapshot.
    pub fn replace_inventory(&mut self, devices: &[DeviceState], containers: &[ContainerState]) {
        self.devices.clear();
        self.containers.clear();
        self.counts.devices = 0;
        self.counts.online = 0;
        self.counts.containers = 0;
        self.counts.running = 0;
        for d in devices {
            self.upsert_device(&d.device_id, d.status);
        }
        for c in containers {
            self.upsert_container(c);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ── Aggregator ───────────────────────────────────────────────────────

/// Shared, observable summary. Adapters push deltas; consumers read
/// [`summary`](Self::summary) or await [`watch`](Self::watch).
pub struct Aggregator {
    tracker: Mutex<SummaryTracker>,
    summary: watch::Sender<AggregateSummary>,
}

impl Aggregator {
    pub fn new() -> Arc<Self> {
        let (summary, _) = watch::channel(AggregateSummary::default());
        Arc::new(Self {
            tracker: Mutex::new(SummaryTracker::new()),
            summary,
        })
    }

    pub fn summary(&self) -> AggregateSummary {
        self.summary.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<AggregateSummary> {
        self.summary.subscribe()
    }

    /// Summaries as a `Stream`, starting with the current one.
    pub fn stream(&self) -> WatchStream<AggregateSummary> {
        WatchStream::new(self.summary.subscribe())
    }

    /// Apply a delta and publish the new summary if it changed.
    pub fn update(&self, f: impl FnOnce(&mut SummaryTracker)) {
        let mut tracker = self.lock();
        f(&mut tracker);
        let next = tracker.summary();
        // Published under the tracker lock so summaries never go backwards.
        self.summary.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Take the latest inventory poll result as the device/container baseline.
    pub fn apply_inventory(&self, inventory: InventoryResponse) {
        let devices: Vec<DeviceState> = inventory.devices.into_iter().map(Into::into).collect();
        let containers: Vec<ContainerState> =
            inventory.containers.into_iter().map(Into::into).collect();
        debug!(
            devices = devices.len(),
            containers = containers.len(),
            "applying inventory snapshot"
        );
        self.update(|t| t.replace_inventory(&devices, &containers));
    }

    pub fn reset(&self) {
        self.update(SummaryTracker::reset);
    }

    fn lock(&self) -> MutexGuard<'_, SummaryTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
