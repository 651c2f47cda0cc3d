// ── Typed stream adapters ──
//
// Facades that turn registry subscriptions into consumer-friendly state:
// latest values, bounded history, connection status and a version watch
// that bumps on every change. Adapters only use the registry's public
// contract; dropping an adapter releases every subscription it holds.

mod alerts;
mod containers;
mod metrics;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;

use telemux_api::ConnectionState;

use crate::aggregate::Aggregator;
use crate::color::ColorAssigner;
use crate::model::{Envelope, Topic};
use crate::registry::{Registry, Subscription};

pub use alerts::AlertsStream;
pub use containers::ContainerStream;
pub use metrics::MetricsStream;

/// Adapter state the hub can wipe on shutdown.
pub(crate) trait Resettable: Send + Sync {
    fn reset(&self);
}

/// Weak handles to every live adapter's state.
#[derive(Default)]
pub(crate) struct Teardown {
    entries: Mutex<Vec<Weak<dyn Resettable>>>,
}

impl Teardown {
    pub(crate) fn register(&self, entry: Weak<dyn Resettable>) {
        let mut entries = lock(&self.entries);
        entries.retain(|e| e.strong_count() > 0);
        entries.push(entry);
    }

    /// Reset every adapter that is still alive.
    pub(crate) fn reset_all(&self) {
        let live: Vec<_> = lock(&self.entries)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for entry in live {
            entry.reset();
        }
    }
}

/// Everything an adapter needs from the hub.
///
/// Obtained from [`Hub::context`](crate::Hub::context). Attach an
/// [`Aggregator`] with [`with_aggregator`](Self::with_aggregator) to have
/// adapters built from this context feed it.
#[derive(Clone)]
pub struct StreamContext {
    pub(crate) registry: Arc<Registry>,
    pub(crate) connection: watch::Receiver<ConnectionState>,
    pub(crate) colors: Arc<ColorAssigner>,
    pub(crate) teardown: Arc<Teardown>,
    pub(crate) history_capacity: usize,
    pub(crate) alert_capacity: usize,
    pub(crate) aggregator: Option<Arc<Aggregator>>,
}

impl StreamContext {
    #[must_use]
    pub fn with_aggregator(mut self, aggregator: Arc<Aggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connection.borrow().is_connected()
    }

    pub fn colors(&self) -> &Arc<ColorAssigner> {
        &self.colors
    }

    pub(crate) fn track(&self, entry: Weak<dyn Resettable>) {
        self.teardown.register(entry);
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn bump_version(version: &watch::Sender<u64>) {
    version.send_modify(|v| *v = v.wrapping_add(1));
}

// ── TopicStream ──────────────────────────────────────────────────────

/// The latest envelope on a single topic.
///
/// The generic surface for consumers that just want "whatever arrives on
/// this topic": [`data`](Self::data), [`is_connected`](Self::is_connected)
/// and [`unsubscribe`](Self::unsubscribe).
pub struct TopicStream {
    subscription: Subscription,
    data: watch::Receiver<Option<Arc<Envelope>>>,
    connection: watch::Receiver<ConnectionState>,
}

impl TopicStream {
    pub fn new(ctx: &StreamContext, topic: Topic) -> Self {
        let (tx, data) = watch::channel(None);
        let subscription = ctx.registry.subscribe_fn(topic, move |env| {
            tx.send_replace(Some(Arc::clone(env)));
            Ok(())
        });
        Self {
            subscription,
            data,
            connection: ctx.connection.clone(),
        }
    }

    pub fn topic(&self) -> &Topic {
        self.subscription.topic()
    }

    /// Most recent envelope, if any arrived yet.
    pub fn data(&self) -> Option<Arc<Envelope>> {
        self.data.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.borrow().is_connected()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_active()
    }

    /// Stop receiving. The last value stays readable.
    pub fn unsubscribe(&self) {
        self.subscription.unsubscribe();
    }

    /// Wait for the next envelope. `None` once unsubscribed.
    pub async fn changed(&mut self) -> Option<Arc<Envelope>> {
        if !self.subscription.is_active() {
            return None;
        }
        self.data.changed().await.ok()?;
        self.data.borrow_and_update().clone()
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::testing::Harness;
    use super::*;

    #[test]
    fn topic_stream_tracks_latest_envelope() {
        let h = Harness::new(10, 10);
        let stream = TopicStream::new(&h.ctx, Topic::alerts());
        assert!(stream.data().is_none());
        assert!(!stream.is_connected());

        h.set_connected();
        assert!(stream.is_connected());

        h.push(serde_json::json!({"type":"alert","data":{"severity":"info","message":"one"}}));
        h.push(serde_json::json!({"type":"alert","data":{"severity":"info","message":"two"}}));
        let latest = stream.data().unwrap();
        assert_eq!(latest.as_alert().unwrap().message, "two");
    }

    #[test]
    fn topic_stream_unsubscribe_keeps_last_value() {
        let h = Harness::new(10, 10);
        let stream = TopicStream::new(&h.ctx, Topic::alerts());
        h.push(serde_json::json!({"type":"alert","data":{"severity":"info","message":"kept"}}));

        stream.unsubscribe();
        stream.unsubscribe();
        assert!(!stream.is_subscribed());
        assert_eq!(h.registry.refcount(&Topic::alerts()), 0);

        h.push(serde_json::json!({"type":"alert","data":{"severity":"info","message":"missed"}}));
        assert_eq!(stream.data().unwrap().as_alert().unwrap().message, "kept");
    }

    #[tokio::test]
    async fn topic_stream_changed_wakes_on_envelope() {
        let h = Harness::new(10, 10);
        let mut stream = TopicStream::new(&h.ctx, Topic::metrics("dev-a"));
        h.push(serde_json::json!({"type":"metrics","data":{"device_id":"dev-a","cpu":3.0}}));

        let env = stream.changed().await.unwrap();
        assert_eq!(env.as_metrics().unwrap().cpu_percent, Some(3.0));

        stream.unsubscribe();
        assert!(stream.changed().await.is_none());
    }

    #[test]
    fn teardown_skips_dropped_adapters() {
        struct Flag(Mutex<bool>);
        impl Resettable for Flag {
            fn reset(&self) {
                *lock(&self.0) = true;
            }
        }

        let teardown = Teardown::default();
        let alive = Arc::new(Flag(Mutex::new(false)));
        let gone = Arc::new(Flag(Mutex::new(false)));
        teardown.register(Arc::downgrade(&alive) as Weak<dyn Resettable>);
        teardown.register(Arc::downgrade(&gone) as Weak<dyn Resettable>);
        drop(gone);

        teardown.reset_all();
        assert!(*lock(&alive.0));
    }

    #[test]
    fn topic_stream_changed_pends_until_data() {
        use tokio_test::{assert_pending, assert_ready, task};

        let h = Harness::new(10, 10);
        let mut stream = TopicStream::new(&h.ctx, Topic::alerts());
        let mut changed = task::spawn(stream.changed());
        assert_pending!(changed.poll());

        h.push(serde_json::json!({"type":"alert","data":{"severity":"error","message":"fan"}}));
        assert!(changed.is_woken());
        let env = assert_ready!(changed.poll()).unwrap();
        assert_eq!(env.as_alert().unwrap().message, "fan");
    }
}
