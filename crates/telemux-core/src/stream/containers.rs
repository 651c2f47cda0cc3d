// ── Container lifecycle stream ──

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use indexmap::{IndexMap, IndexSet};
use tokio::sync::watch;
use tracing::debug;

use super::{Resettable, StreamContext, bump_version, lock};
use crate::aggregate::Aggregator;
use crate::model::{ContainerEvent, ContainerState, Envelope, Topic};
use crate::registry::Subscription;

/// Actions after which a container no longer exists.
const GONE_ACTIONS: [&str; 2] = ["destroy", "remove"];

#[derive(Default)]
struct ContainersState {
    /// Keyed by `(device_id, container_id)`, in first-seen order.
    containers: IndexMap<(String, String), ContainerState>,
    latest_event: Option<ContainerEvent>,
    /// Watched devices; events for anything else are ignored.
    devices: HashSet<String>,
}

struct ContainersShared {
    state: Mutex<ContainersState>,
    version: watch::Sender<u64>,
    aggregator: Option<Arc<Aggregator>>,
}

impl ContainersShared {
    fn on_envelope(&self, envelope: &Envelope) {
        let Some(event) = envelope.as_container() else {
            return;
        };
        let state = ContainerState::from(event);
        let gone = event
            .action
            .as_deref()
            .is_some_and(|a| GONE_ACTIONS.contains(&a));

        {
            let mut guard = lock(&self.state);
            if !guard.devices.contains(&state.device_id) {
                return;
            }
            if gone {
                guard.containers.shift_remove(&state.key());
            } else {
                guard.containers.insert(state.key(), state.clone());
            }
            guard.latest_event = Some(event.clone());

            if let Some(aggregator) = &self.aggregator {
                aggregator.update(|t| {
                    if gone {
                        t.remove_container(&state.device_id, &state.container_id);
                    } else {
                        t.upsert_container(&state);
                    }
                });
            }
        }
        bump_version(&self.version);
    }

    /// Take the given containers back out of the aggregator.
    fn withdraw(&self, keys: &[(String, String)]) {
        let Some(aggregator) = &self.aggregator else {
            return;
        };
        if keys.is_empty() {
            return;
        }
        aggregator.update(|t| {
            for (device, container) in keys {
                t.remove_container(device, container);
            }
        });
    }

    /// Forget every known container. Caller holds the state lock.
    fn forget_all(&self, state: &mut ContainersState) {
        let keys: Vec<(String, String)> = state.containers.drain(..).map(|(k, _)| k).collect();
        state.latest_event = None;
        self.withdraw(&keys);
    }
}

impl Resettable for ContainersShared {
    fn reset(&self) {
        self.forget_all(&mut lock(&self.state));
        bump_version(&self.version);
    }
}

/// Latest container state for a set of devices.
///
/// Subscribes `containers:<id>` per device, like
/// [`MetricsStream`](super::MetricsStream) does for metrics.
pub struct ContainerStream {
    ctx: StreamContext,
    shared: Arc<ContainersShared>,
    subscriptions: IndexMap<String, Subscription>,
    version: watch::Receiver<u64>,
}

impl ContainerStream {
    pub fn new<I, S>(ctx: &StreamContext, device_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (version_tx, version) = watch::channel(0);
        let shared = Arc::new(ContainersShared {
            state: Mutex::new(ContainersState::default()),
            version: version_tx,
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

    /// Change the watched set, (un)subscribing only what changed. State of
    /// devices that leave the set is forgotten.
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
        for id in &removed {
            if let Some(sub) = self.subscriptions.shift_remove(id) {
                sub.unsubscribe();
            }
        }
        if !removed.is_empty() {
            let mut state = lock(&self.shared.state);
            let mut forgotten = Vec::new();
            state.containers.retain(|key, _| {
                let keep = !removed.contains(&key.0);
                if !keep {
                    forgotten.push(key.clone());
                }
                keep
            });
            for id in &removed {
                state.devices.remove(id);
            }
            self.shared.withdraw(&forgotten);
        }

        let mut added = 0;
        for id in &wanted {
            if self.subscriptions.contains_key(id) {
                continue;
            }
            self.ctx.colors.color_for(id);
            lock(&self.shared.state).devices.insert(id.clone());
            let shared = Arc::clone(&self.shared);
            let sub = self
                .ctx
                .registry
                .subscribe_fn(Topic::containers(id), move |env| {
                    shared.on_envelope(env);
                    Ok(())
                });
            self.subscriptions.insert(id.clone(), sub);
            added += 1;
        }

        if added > 0 || !removed.is_empty() {
            debug!(added, removed = removed.len(), "container device set changed");
            self.subscriptions
                .sort_by_cached_key(|id, _| wanted.get_index_of(id));
            bump_version(&self.shared.version);
        }
    }

    pub fn devices(&self) -> Vec<String> {
        self.subscriptions.keys().cloned().collect()
    }

    /// Every known container across watched devices, in first-seen order.
    pub fn containers(&self) -> Vec<ContainerState> {
        lock(&self.shared.state).containers.values().cloned().collect()
    }

    /// Known containers of one device.
    pub fn containers_for(&self, device_id: &str) -> Vec<ContainerState> {
        lock(&self.shared.state)
            .containers
            .values()
            .filter(|c| c.device_id == device_id)
            .cloned()
            .collect()
    }

    pub fn latest_event(&self) -> Option<ContainerEvent> {
        lock(&self.shared.state).latest_event.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.is_connected()
    }

    pub fn watch(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    pub async fn changed(&mut self) -> bool {
        self.version.changed().await.is_ok()
    }
}

impl Drop for ContainerStream {
    fn drop(&mut self) {
        let mut state = lock(&self.shared.state);
        state.devices.clear();
        self.shared.forget_all(&mut state);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateSummary, compute_summary};
    use crate::model::{ContainerStatus, DeviceState};
    use crate::stream::testing::Harness;
    use pretty_assertions::assert_eq;
    use telemux_api::ControlMessage;

    fn event(device: &str, id: &str, state: &str, action: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "container",
            "data": { "device_id": device, "id": id, "state": state, "action": action }
        })
    }

    fn visible_summary(stream: &ContainerStream) -> AggregateSummary {
        compute_summary(Vec::<&DeviceState>::new(), &stream.containers(), [])
    }

    #[test]
    fn keeps_latest_state_per_container() {
        let h = Harness::new(5, 5);
        let stream = ContainerStream::new(&h.ctx, ["nas"]);

        h.push(event("nas", "db", "running", "start"));
        h.push(event("nas", "web", "running", "start"));
        h.push(event("nas", "db", "exited", "die"));

        let states = stream.containers();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].container_id, "db");
        assert_eq!(states[0].status, ContainerStatus::Exited);
        assert_eq!(stream.latest_event().unwrap().action.as_deref(), Some("die"));
    }

    #[test]
    fn destroyed_containers_are_forgotten() {
        let h = Harness::new(5, 5);
        let stream = ContainerStream::new(&h.ctx, ["nas"]);
        h.push(event("nas", "tmp", "running", "start"));
        h.push(event("nas", "tmp", "exited", "destroy"));
        assert!(stream.containers().is_empty());
    }

    #[test]
    fn set_devices_diffs_subscriptions() {
        let h = Harness::new(5, 5);
        h.set_connected();
        let mut stream = ContainerStream::new(&h.ctx, ["a", "b"]);
        h.push(event("a", "x", "running", "start"));
        h.sink.reset();

        stream.set_devices(["b", "c"]);
        assert_eq!(
            h.sink.sent(),
            vec![
                (1, ControlMessage::unsubscribe("containers:a")),
                (1, ControlMessage::subscribe("containers:c")),
            ]
        );
        assert!(stream.containers_for("a").is_empty());
        assert_eq!(stream.devices(), vec!["b", "c"]);
    }

    #[test]
    fn feeds_container_counts() {
        let h = Harness::new(5, 5);
        let aggregator = Aggregator::new();
        let _stream =
            ContainerStream::new(&h.ctx.clone().with_aggregator(Arc::clone(&aggregator)), ["a"]);

        h.push(event("a", "1", "running", "start"));
        h.push(event("a", "2", "exited", "die"));
        let summary = aggregator.summary();
        assert_eq!(summary.running_containers, 1);
        assert_eq!(summary.stopped_containers, 1);

        h.push(event("a", "2", "exited", "destroy"));
        assert_eq!(aggregator.summary().total_containers, 1);
    }

    #[test]
    fn empty_and_dropped() {
        let h = Harness::new(5, 5);
        let stream = ContainerStream::new(&h.ctx, Vec::<String>::new());
        assert!(stream.containers().is_empty());
        drop(stream);

        let stream = ContainerStream::new(&h.ctx, ["a"]);
        assert_eq!(h.registry.topics(), vec![Topic::containers("a")]);
        drop(stream);
        assert!(h.registry.is_empty());
    }

    #[test]
    fn removed_device_takes_its_containers_out_of_the_aggregator() {
        let h = Harness::new(5, 5);
        let aggregator = Aggregator::new();
        let ctx = h.ctx.clone().with_aggregator(Arc::clone(&aggregator));
        let mut stream = ContainerStream::new(&ctx, ["a", "b"]);
        h.push(event("a", "web", "running", "start"));
        h.push(event("b", "db", "exited", "die"));

        stream.set_devices(["b"]);

        let summary = aggregator.summary();
        assert_eq!(summary, visible_summary(&stream));
        assert_eq!(summary.total_containers, 1);
        assert_eq!(summary.stopped_containers, 1);
    }

    #[test]
    fn dropped_stream_withdraws_its_containers() {
        let h = Harness::new(5, 5);
        let aggregator = Aggregator::new();
        let ctx = h.ctx.clone().with_aggregator(Arc::clone(&aggregator));
        let stream = ContainerStream::new(&ctx, ["a", "b"]);
        h.push(event("a", "web", "running", "start"));
        assert_eq!(aggregator.summary().total_containers, 1);

        drop(stream);
        assert_eq!(aggregator.summary(), AggregateSummary::default());
    }

    #[test]
    fn reset_withdraws_containers_but_keeps_watching() {
        let h = Harness::new(5, 5);
        let aggregator = Aggregator::new();
        let ctx = h.ctx.clone().with_aggregator(Arc::clone(&aggregator));
        let stream = ContainerStream::new(&ctx, ["a"]);
        h.push(event("a", "web", "running", "start"));

        h.ctx.teardown.reset_all();
        assert!(stream.containers().is_empty());
        assert!(stream.latest_event().is_none());
        assert_eq!(aggregator.summary(), AggregateSummary::default());

        h.push(event("a", "web", "running", "restart"));
        assert_eq!(aggregator.summary(), visible_summary(&stream));
        assert_eq!(aggregator.summary().running_containers, 1);
    }
}
