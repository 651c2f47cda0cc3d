// ── Per-device metrics stream ──

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use indexmap::{IndexMap, IndexSet};
use tokio::sync::watch;
use tracing::debug;

use super::{Resettable, StreamContext, bump_version, lock};
use crate::aggregate::Aggregator;
use crate::color::Rgb;
use crate::history::HistoryBuffer;
use crate::model::{Envelope, MetricSample, Topic};
use crate::registry::Subscription;

struct MetricsState {
    histories: HashMap<String, HistoryBuffer<MetricSample>>,
    latest: Option<MetricSample>,
    /// Devices whose status this adapter has pushed to the aggregator.
    reported: HashSet<String>,
}

struct MetricsShared {
    state: Mutex<MetricsState>,
    version: watch::Sender<u64>,
    capacity: usize,
    aggregator: Option<Arc<Aggregator>>,
}

impl MetricsShared {
    fn on_envelope(&self, envelope: &Envelope) {
        let Some(sample) = envelope.as_metrics() else {
            return;
        };
        {
            let mut state = lock(&self.state);
            // Device left the watched set after the frame was routed.
            let Some(history) = state.histories.get_mut(&sample.device_id) else {
                return;
            };
            history.push(sample.clone());
            state.latest = Some(sample.clone());
            // Still under the state lock, so a concurrent removal cannot be undone.
            if let Some(aggregator) = &self.aggregator {
                state.reported.insert(sample.device_id.clone());
                aggregator.update(|t| t.upsert_device(&sample.device_id, sample.status));
            }
        }
        bump_version(&self.version);
    }

    /// Take back the device statuses this adapter contributed.
    fn withdraw(&self, device_ids: &[String]) {
        let Some(aggregator) = &self.aggregator else {
            return;
        };
        if device_ids.is_empty() {
            return;
        }
        aggregator.update(|t| {
            for id in device_ids {
                t.remove_device(id);
            }
        });
    }
}

impl Resettable for MetricsShared {
    fn reset(&self) {
        {
            let mut state = lock(&self.state);
            for history in state.histories.values_mut() {
                history.clear();
            }
            state.latest = None;
            let reported: Vec<String> = state.reported.drain().collect();
            self.withdraw(&reported);
        }
        bump_version(&self.version);
    }
}

/// Live metrics for a set of devices.
///
/// Subscribes `metrics:<id>` for every watched device and keeps a bounded
/// history per device. [`set_devices`](Self::set_devices) only touches the
/// devices that actually changed.
pub struct MetricsStream {
    ctx: StreamContext,
    shared: Arc<MetricsShared>,
    subscriptions: IndexMap<String, Subscription>,
    version: watch::Receiver<u64>,
}

impl MetricsStream {
    pub fn new<I, S>(ctx: &StreamContext, device_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (version_tx, version) = watch::channel(0);
        let shared = Arc::new(MetricsShared {
            state: Mutex::new(MetricsState {
                histories: HashMap::new(),
                latest: None,
                reported: HashSet::new(),
            }),
            version: version_tx,
            capacity: ctx.history_capacity,
            aggregator: ctx.aggregator.clone(),
        });
        let weak = Arc::downgrade(&shared);
        ctx.track(weak);

        let mut stream = Self {
            ctx: ctx.clone(),
            shared,
            subscriptions: IndexMap::new(),
            version,
        };
        stream.set_devices(device_ids);
        stream
    }

    /// Change the watched set. Unchanged devices keep their subscription
    /// and history.
    pub fn set_devices<I, S>(&mut self, device_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: IndexSet<String> = device_ids
            .into_iter()
            .map(|id| id.as_ref().to_owned())
            .collect();

        let removed: Vec<String> = self
            .subscriptions
            .keys()
            .filter(|id| !wanted.contains(*id))
            .cloned()
            .collect();
        let added: Vec<String> = wanted
            .iter()
            .filter(|id| !self.subscriptions.contains_key(*id))
            .cloned()
            .collect();
        if removed.is_empty() && added.is_empty() {
            return;
        }
        debug!(added = added.len(), removed = removed.len(), "metrics device set changed");

        for id in &removed {
            if let Some(sub) = self.subscriptions.shift_remove(id) {
                sub.unsubscribe();
            }
        }
        {
            let mut state = lock(&self.shared.state);
            let mut withdrawn = Vec::new();
            for id in &removed {
                state.histories.remove(id);
                if state.reported.remove(id) {
                    withdrawn.push(id.clone());
                }
            }
            self.shared.withdraw(&withdrawn);
            for id in &added {
                state
                    .histories
                    .insert(id.clone(), HistoryBuffer::new(self.shared.capacity));
            }
            let stale = state
                .latest
                .as_ref()
                .is_some_and(|s| !state.histories.contains_key(&s.device_id));
            if stale {
                state.latest = state
                    .histories
                    .values()
                    .filter_map(HistoryBuffer::latest)
                    .max_by_key(|s| s.timestamp)
                    .cloned();
            }
        }

        for id in added {
            self.ctx.colors.color_for(&id);
            let shared = Arc::clone(&self.shared);
            let sub = self.ctx.registry.subscribe_fn(Topic::metrics(&id), move |env| {
                shared.on_envelope(env);
                Ok(())
            });
            self.subscriptions.insert(id, sub);
        }
        // Keep the caller's order.
        self.subscriptions
            .sort_by_cached_key(|id, _| wanted.get_index_of(id));
        bump_version(&self.shared.version);
    }

    /// Watched devices, in the order last given.
    pub fn devices(&self) -> Vec<String> {
        self.subscriptions.keys().cloned().collect()
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.is_connected()
    }

    /// Most recent sample across all watched devices.
    pub fn latest(&self) -> Option<MetricSample> {
        lock(&self.shared.state).latest.clone()
    }

    /// Chart history for one device. `None` if it is not watched.
    pub fn history(&self, device_id: &str) -> Option<HistoryBuffer<MetricSample>> {
        lock(&self.shared.state).histories.get(device_id).cloned()
    }

    /// Stable chart color for a device.
    pub fn color(&self, device_id: &str) -> Rgb {
        self.ctx.colors.color_for(device_id)
    }

    /// Bumps on every state change.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    /// Wait until the state changes.
    pub async fn changed(&mut self) -> bool {
        self.version.changed().await.is_ok()
    }
}

impl Drop for MetricsStream {
    fn drop(&mut self) {
        // An empty watched set also turns away frames already in flight.
        let mut state = lock(&self.shared.state);
        state.histories.clear();
        state.latest = None;
        let reported: Vec<String> = state.reported.drain().collect();
        self.shared.withdraw(&reported);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateSummary, compute_summary};
    use crate::model::{ContainerState, DeviceState};
    use crate::stream::testing::Harness;
    use pretty_assertions::assert_eq;
    use telemux_api::{ControlAction, ControlMessage};

    fn sample(device: &str, cpu: f64) -> serde_json::Value {
        serde_json::json!({
            "type": "metrics",
            "data": { "device_id": device, "cpu": cpu }
        })
    }

    fn cpus(buf: &HistoryBuffer<MetricSample>) -> Vec<f64> {
        buf.iter().filter_map(|s| s.cpu_percent).collect()
    }

    fn status(device: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "metrics",
            "data": { "device_id": device, "status": status }
        })
    }

    /// What the stream itself shows, summarized from scratch.
    fn visible_summary(stream: &MetricsStream) -> AggregateSummary {
        let devices: Vec<DeviceState> = stream
            .devices()
            .iter()
            .filter_map(|id| {
                let history = stream.history(id)?;
                history.latest().map(|s| DeviceState::new(id.as_str(), s.status))
            })
            .collect();
        compute_summary(&devices, Vec::<&ContainerState>::new(), [])
    }

    #[test]
    fn history_keeps_last_capacity_samples() {
        let h = Harness::new(50, 10);
        let stream = MetricsStream::new(&h.ctx, ["dev-a", "dev-b"]);

        for i in 1..=60_i32 {
            h.push(sample("dev-a", f64::from(i)));
        }

        let history = stream.history("dev-a").unwrap();
        assert_eq!(history.len(), 50);
        let expected: Vec<f64> = (11..=60_i32).map(f64::from).collect();
        assert_eq!(cpus(&history), expected);
        assert!(stream.history("dev-b").unwrap().is_empty());
        assert_eq!(stream.latest().unwrap().cpu_percent, Some(60.0));
    }

    #[test]
    fn set_devices_issues_incremental_declarations() {
        let h = Harness::new(5, 5);
        h.set_connected();
        let mut stream = MetricsStream::new(&h.ctx, ["a", "b"]);
        h.sink.reset();

        stream.set_devices(["b", "c"]);

        assert_eq!(
            h.sink.sent(),
            vec![
                (1, ControlMessage::unsubscribe("metrics:a")),
                (1, ControlMessage::subscribe("metrics:c")),
            ]
        );
        assert_eq!(stream.devices(), vec!["b", "c"]);
        assert!(stream.history("a").is_none());
    }

    #[test]
    fn unchanged_devices_keep_history() {
        let h = Harness::new(5, 5);
        let mut stream = MetricsStream::new(&h.ctx, ["a"]);
        h.push(sample("a", 1.0));

        stream.set_devices(["a", "b"]);
        stream.set_devices(["a", "b"]);
        assert_eq!(cpus(&stream.history("a").unwrap()), vec![1.0]);
        assert_eq!(h.registry.refcount(&Topic::metrics("a")), 1);
    }

    #[test]
    fn empty_device_list_is_fine() {
        let h = Harness::new(5, 5);
        let mut stream = MetricsStream::new(&h.ctx, Vec::<String>::new());
        assert!(stream.devices().is_empty());
        assert!(stream.latest().is_none());
        assert!(h.registry.topics().is_empty());

        stream.set_devices(["x"]);
        stream.set_devices(Vec::<&str>::new());
        assert!(h.registry.topics().is_empty());
    }

    #[test]
    fn dropping_stream_releases_subscriptions() {
        let h = Harness::new(5, 5);
        h.set_connected();
        let stream = MetricsStream::new(&h.ctx, ["a", "b"]);
        drop(stream);

        assert!(h.registry.topics().is_empty());
        assert_eq!(h.sink.count(ControlAction::Unsubscribe, "metrics:a"), 1);
        assert_eq!(h.sink.count(ControlAction::Unsubscribe, "metrics:b"), 1);
    }

    #[test]
    fn colors_are_shared_across_adapters() {
        let h = Harness::new(5, 5);
        let first = MetricsStream::new(&h.ctx, ["a", "b"]);
        let second = MetricsStream::new(&h.ctx, ["b", "a"]);
        assert_eq!(first.color("a"), second.color("a"));
        assert_eq!(first.color("b"), second.color("b"));
        assert_ne!(first.color("a"), first.color("b"));
    }

    #[test]
    fn removing_latest_device_falls_back_to_remaining() {
        let h = Harness::new(5, 5);
        let mut stream = MetricsStream::new(&h.ctx, ["a", "b"]);
        h.push(serde_json::json!({"type":"metrics","data":{"device_id":"a","cpu":1.0,"timestamp":"2026-01-01T00:00:00Z"}}));
        h.push(serde_json::json!({"type":"metrics","data":{"device_id":"b","cpu":2.0,"timestamp":"2026-01-01T00:00:05Z"}}));
        assert_eq!(stream.latest().unwrap().device_id, "b");

        stream.set_devices(["a"]);
        assert_eq!(stream.latest().unwrap().device_id, "a");
    }

    #[test]
    fn samples_feed_the_aggregator() {
        let h = Harness::new(5, 5);
        let aggregator = Aggregator::new();
        let ctx = h.ctx.clone().with_aggregator(Arc::clone(&aggregator));
        let _stream = MetricsStream::new(&ctx, ["a", "b"]);

        h.push(serde_json::json!({"type":"metrics","data":{"device_id":"a","status":"online"}}));
        h.push(serde_json::json!({"type":"metrics","data":{"device_id":"b","status":"offline"}}));

        let summary = aggregator.summary();
        assert_eq!(summary.total_devices, 2);
        assert_eq!(summary.online_devices, 1);
    }

    #[tokio::test]
    async fn changed_fires_on_sample() {
        let h = Harness::new(5, 5);
        let mut stream = MetricsStream::new(&h.ctx, ["a"]);
        h.push(sample("a", 9.0));
        assert!(stream.changed().await);
        assert_eq!(stream.latest().unwrap().cpu_percent, Some(9.0));
    }

    #[test]
    fn reset_clears_history_but_keeps_subscriptions() {
        let h = Harness::new(5, 5);
        let stream = MetricsStream::new(&h.ctx, ["a"]);
        h.push(sample("a", 1.0));

        h.ctx.teardown.reset_all();
        assert!(stream.history("a").unwrap().is_empty());
        assert!(stream.latest().is_none());
        assert_eq!(h.registry.refcount(&Topic::metrics("a")), 1);
    }

    #[test]
    fn removed_device_leaves_the_aggregator() {
        let h = Harness::new(5, 5);
        let aggregator = Aggregator::new();
        let ctx = h.ctx.clone().with_aggregator(Arc::clone(&aggregator));
        let mut stream = MetricsStream::new(&ctx, ["a", "b"]);
        h.push(status("a", "online"));
        h.push(status("b", "offline"));

        stream.set_devices(["b"]);

        let summary = aggregator.summary();
        assert_eq!(summary, visible_summary(&stream));
        assert_eq!(summary.total_devices, 1);
        assert_eq!(summary.offline_devices, 1);
    }

    #[test]
    fn dropped_stream_withdraws_its_devices() {
        let h = Harness::new(5, 5);
        let aggregator = Aggregator::new();
        let ctx = h.ctx.clone().with_aggregator(Arc::clone(&aggregator));
        let stream = MetricsStream::new(&ctx, ["a", "b"]);
        h.push(status("a", "online"));
        assert_eq!(aggregator.summary().total_devices, 1);

        drop(stream);
        assert_eq!(aggregator.summary(), AggregateSummary::default());
    }

    #[test]
    fn reset_withdraws_devices_from_the_aggregator() {
        let h = Harness::new(5, 5);
        let aggregator = Aggregator::new();
        let ctx = h.ctx.clone().with_aggregator(Arc::clone(&aggregator));
        let stream = MetricsStream::new(&ctx, ["a"]);
        h.push(status("a", "offline"));

        h.ctx.teardown.reset_all();
        assert_eq!(aggregator.summary(), visible_summary(&stream));
        assert_eq!(aggregator.summary().total_devices, 0);

        h.push(status("a", "online"));
        assert_eq!(aggregator.summary(), visible_summary(&stream));
        assert_eq!(aggregator.summary().online_devices, 1);
    }
}
