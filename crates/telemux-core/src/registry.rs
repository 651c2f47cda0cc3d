// ── Subscription registry ──
//
// Maps topics to the listeners interested in them and keeps the server's
// view of our interest in sync: a topic is declared when its first
// listener arrives and retracted when its last one leaves. Declarations
// are tagged with the socket generation they were issued for, and the
// registry's idea of "connected" only changes under its own lock, so a
// topic is declared at most once per live socket.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use indexmap::IndexMap;
use tracing::{debug, info};

use telemux_api::{Connection, ControlMessage};

use crate::error::ListenerError;
use crate::model::{Envelope, Topic};

/// A consumer callback. Runs on the dispatch task; must not block.
pub type Listener = Arc<dyn Fn(&Arc<Envelope>) -> Result<(), ListenerError> + Send + Sync>;

/// Where the registry sends topic declarations.
pub trait CommandSink: Send + Sync {
    /// Queue `command` for the socket of `generation`. Returns whether it
    /// was queued.
    fn send_command(&self, generation: u64, command: &ControlMessage) -> bool;
}

impl CommandSink for Connection {
    fn send_command(&self, generation: u64, command: &ControlMessage) -> bool {
        self.send_for(generation, command.to_text())
    }
}

/// Identifies one registration. Unique for the lifetime of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// A listener as seen by the dispatcher.
#[derive(Clone)]
pub(crate) struct Registered {
    pub(crate) id: ListenerId,
    pub(crate) listener: Listener,
    pub(crate) active: Arc<AtomicBool>,
}

impl Registered {
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct RegistryState {
    /// Live topics in first-declaration order.
    topics: IndexMap<Topic, Vec<Registered>>,
    /// Generation of the socket our declarations currently live on.
    connected: Option<u64>,
}

pub struct Registry {
    sink: Arc<dyn CommandSink>,
    state: Mutex<RegistryState>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new(sink: Arc<dyn CommandSink>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            state: Mutex::new(RegistryState::default()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register `listener` for `topic`.
    ///
    /// The first listener of a topic declares it to the server if a socket
    /// is up; otherwise the declaration happens on the next connect.
    pub fn subscribe(self: &Arc<Self>, topic: Topic, listener: Listener) -> Subscription {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let active = Arc::new(AtomicBool::new(true));

        let mut state = self.lock();
        let connected = state.connected;
        let entries = state.topics.entry(topic.clone()).or_default();
        let first = entries.is_empty();
        entries.push(Registered {
            id,
            listener,
            active: Arc::clone(&active),
        });

        if first {
            debug!(topic = %topic, "first listener, declaring topic");
            if let Some(generation) = connected {
                self.sink
                    .send_command(generation, &ControlMessage::subscribe(topic.as_str()));
            }
        }
        drop(state);

        Subscription {
            topic,
            id,
            active,
            registry: Arc::downgrade(self),
        }
    }

    /// Convenience wrapper around [`subscribe`](Self::subscribe) for closures.
    pub fn subscribe_fn<F>(self: &Arc<Self>, topic: Topic, f: F) -> Subscription
    where
        F: Fn(&Arc<Envelope>) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.subscribe(topic, Arc::new(f))
    }

    /// Number of listeners currently registered for `topic`.
    pub fn refcount(&self, topic: &Topic) -> usize {
        self.lock().topics.get(topic).map_or(0, Vec::len)
    }

    /// Live topics in first-declaration order.
    pub fn topics(&self) -> Vec<Topic> {
        self.lock().topics.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().topics.is_empty()
    }

    /// A socket of `generation` opened: declare every live topic on it once.
    pub fn on_connected(&self, generation: u64) {
        let mut state = self.lock();
        if state.connected == Some(generation) {
            return;
        }
        state.connected = Some(generation);
        if !state.topics.is_empty() {
            info!(
                generation,
                topics = state.topics.len(),
                "re-declaring topics"
            );
        }
        for topic in state.topics.keys() {
            self.sink
                .send_command(generation, &ControlMessage::subscribe(topic.as_str()));
        }
    }

    /// The socket of `generation` is gone. Declarations wait for the next
    /// connect. Stale notifications for an older socket are ignored.
    pub fn on_disconnected(&self, generation: u64) {
        let mut state = self.lock();
        if state.connected == Some(generation) {
            state.connected = None;
        }
    }

    /// Drop every registration. Outstanding [`Subscription`]s become inert.
    pub fn clear(&self) {
        let mut state = self.lock();
        let connected = state.connected;
        let drained: Vec<_> = state.topics.drain(..).collect();
        for (topic, entries) in &drained {
            for entry in entries {
                entry.active.store(false, Ordering::SeqCst);
            }
            if let Some(generation) = connected {
                self.sink
                    .send_command(generation, &ControlMessage::unsubscribe(topic.as_str()));
            }
        }
        // Listeners may own subscriptions; drop them with the lock released.
        drop(state);
        drop(drained);
    }

    /// Snapshot of the listeners of `topic`, in registration order.
    pub(crate) fn listeners(&self, topic: &Topic) -> Vec<Registered> {
        self.lock().topics.get(topic).cloned().unwrap_or_default()
    }

    fn remove(&self, topic: &Topic, id: ListenerId) -> Option<Registered> {
        let mut state = self.lock();
        let entries = state.topics.get_mut(topic)?;
        let pos = entries.iter().position(|e| e.id == id)?;
        let removed = entries.remove(pos);
        if entries.is_empty() {
            state.topics.shift_remove(topic);
            debug!(topic = %topic, "last listener gone, retracting topic");
            if let Some(generation) = state.connected {
                self.sink
                    .send_command(generation, &ControlMessage::unsubscribe(topic.as_str()));
            }
        }
        Some(removed)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Handle to one registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    topic: Topic,
    id: ListenerId,
    active: Arc<AtomicBool>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop delivery to this listener. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            // Dropped here, after the registry lock is released.
            let _removed = registry.remove(&self.topic, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

// ── Test support ─────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use telemux_api::ControlAction;

    /// Records every declaration instead of sending it.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        sent: Mutex<Vec<(u64, ControlMessage)>>,
    }

    impl RecordingSink {
        pub(crate) fn sent(&self) -> Vec<(u64, ControlMessage)> {
            self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        pub(crate) fn count(&self, action: ControlAction, topic: &str) -> usize {
            self.sent()
                .iter()
                .filter(|(_, m)| m.action == action && m.topic == topic)
                .count()
        }

        pub(crate) fn reset(&self) {
            self.sent.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    impl CommandSink for RecordingSink {
        fn send_command(&self, generation: u64, command: &ControlMessage) -> bool {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((generation, command.clone()));
            true
        }
    }

    pub(crate) fn noop() -> Listener {
        Arc::new(|_| Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{RecordingSink, noop};
    use super::*;
    use pretty_assertions::assert_eq;
    use telemux_api::ControlAction;

    fn setup() -> (Arc<RecordingSink>, Arc<Registry>) {
        let sink = Arc::new(RecordingSink::default());
        let registry = Registry::new(Arc::clone(&sink) as Arc<dyn CommandSink>);
        (sink, registry)
    }

    #[test]
    fn refcount_tracks_listener_count() {
        let (_sink, registry) = setup();
        let topic = Topic::metrics("dev-a");

        let a = registry.subscribe(topic.clone(), noop());
        let b = registry.subscribe(topic.clone(), noop());
        let c = registry.subscribe(topic.clone(), noop());
        assert_eq!(registry.refcount(&topic), 3);

        b.unsubscribe();
        assert_eq!(registry.refcount(&topic), 2);
        drop(a);
        assert_eq!(registry.refcount(&topic), 1);
        drop(c);
        assert_eq!(registry.refcount(&topic), 0);
        assert!(registry.topics().is_empty());
    }

    #[test]
    fn declares_once_per_topic_while_connected() {
        let (sink, registry) = setup();
        registry.on_connected(1);

        let _a = registry.subscribe(Topic::alerts(), noop());
        let _b = registry.subscribe(Topic::alerts(), noop());
        let _c = registry.subscribe(Topic::alerts(), noop());

        assert_eq!(
            sink.sent(),
            vec![(1, ControlMessage::subscribe("alerts"))]
        );
    }

    #[test]
    fn last_unsubscribe_retracts_topic() {
        let (sink, registry) = setup();
        registry.on_connected(1);
        let topic = Topic::containers("nas");

        let a = registry.subscribe(topic.clone(), noop());
        let b = registry.subscribe(topic.clone(), noop());
        a.unsubscribe();
        assert_eq!(sink.count(ControlAction::Unsubscribe, "containers:nas"), 0);
        b.unsubscribe();
        assert_eq!(sink.count(ControlAction::Unsubscribe, "containers:nas"), 1);
    }

    #[test]
    fn subscribe_while_disconnected_defers_declaration() {
        let (sink, registry) = setup();
        let _a = registry.subscribe(Topic::metrics("dev-a"), noop());
        assert!(sink.sent().is_empty());

        registry.on_connected(1);
        assert_eq!(
            sink.sent(),
            vec![(1, ControlMessage::subscribe("metrics:dev-a"))]
        );
    }

    #[test]
    fn unsubscribe_while_disconnected_sends_nothing() {
        let (sink, registry) = setup();
        let a = registry.subscribe(Topic::alerts(), noop());
        a.unsubscribe();
        assert!(sink.sent().is_empty());

        registry.on_connected(1);
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn unsubscribe_twice_is_noop() {
        let (sink, registry) = setup();
        registry.on_connected(7);
        let topic = Topic::alerts();

        let keep = registry.subscribe(topic.clone(), noop());
        let gone = registry.subscribe(topic.clone(), noop());
        gone.unsubscribe();
        gone.unsubscribe();
        drop(gone);

        assert!(keep.is_active());
        assert_eq!(registry.refcount(&topic), 1);
        assert_eq!(sink.count(ControlAction::Unsubscribe, "alerts"), 0);
    }

    #[test]
    fn reconnect_redeclares_every_topic_once() {
        let (sink, registry) = setup();
        registry.on_connected(1);

        let topics = [
            Topic::metrics("dev-a"),
            Topic::metrics("dev-b"),
            Topic::containers("dev-a"),
            Topic::alerts(),
        ];
        let subs: Vec<_> = topics
            .iter()
            .flat_map(|t| [registry.subscribe(t.clone(), noop()), registry.subscribe(t.clone(), noop())])
            .collect();
        sink.reset();

        registry.on_disconnected(1);
        registry.on_connected(2);
        // A duplicate notification for the same socket is ignored.
        registry.on_connected(2);

        let expected: Vec<_> = topics
            .iter()
            .map(|t| (2, ControlMessage::subscribe(t.as_str())))
            .collect();
        assert_eq!(sink.sent(), expected);
        for t in &topics {
            assert_eq!(registry.refcount(t), 2);
        }
        assert!(subs.iter().all(Subscription::is_active));
    }

    #[test]
    fn stale_disconnect_does_not_hide_new_socket() {
        let (sink, registry) = setup();
        registry.on_connected(1);
        registry.on_connected(2);
        registry.on_disconnected(1);
        sink.reset();

        let _sub = registry.subscribe(Topic::alerts(), noop());
        assert_eq!(sink.sent(), vec![(2, ControlMessage::subscribe("alerts"))]);
    }

    #[test]
    fn replay_follows_first_declaration_order() {
        let (sink, registry) = setup();
        let a = registry.subscribe(Topic::from("a"), noop());
        let _b = registry.subscribe(Topic::from("b"), noop());
        let _c = registry.subscribe(Topic::from("c"), noop());
        drop(a);
        let _a_again = registry.subscribe(Topic::from("a"), noop());

        registry.on_connected(1);
        let order: Vec<_> = sink.sent().into_iter().map(|(_, m)| m.topic).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
        assert_eq!(
            registry.topics(),
            vec![Topic::from("b"), Topic::from("c"), Topic::from("a")]
        );
    }

    #[test]
    fn clear_deactivates_outstanding_subscriptions() {
        let (sink, registry) = setup();
        registry.on_connected(3);
        let a = registry.subscribe(Topic::alerts(), noop());
        let b = registry.subscribe(Topic::metrics("x"), noop());
        sink.reset();

        registry.clear();
        assert!(registry.is_empty());
        assert!(!a.is_active());
        assert!(!b.is_active());
        assert_eq!(sink.sent().len(), 2);

        // Dropping inert handles does not retract again.
        drop(a);
        drop(b);
        assert_eq!(sink.sent().len(), 2);
    }

    #[test]
    fn subscription_outliving_registry_is_harmless() {
        let (_sink, registry) = setup();
        let sub = registry.subscribe(Topic::alerts(), noop());
        drop(registry);
        sub.unsubscribe();
        assert!(!sub.is_active());
    }

    #[test]
    fn listener_snapshot_keeps_registration_order() {
        let (_sink, registry) = setup();
        let topic = Topic::alerts();
        let a = registry.subscribe(topic.clone(), noop());
        let b = registry.subscribe(topic.clone(), noop());

        let ids: Vec<_> = registry.listeners(&topic).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
        assert!(a.id() < b.id());
    }
}
