// ── Hub ──
//
// The session-wide service: one connection, one registry, one dispatcher,
// one color map. A single bridge task drains transport events in order,
// so envelopes of a topic are delivered strictly one after another even
// on a multi-threaded runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use telemux_api::{Connection, ConnectionState, TransportEvent};

use crate::color::ColorAssigner;
use crate::config::HubConfig;
use crate::dispatch::{Dispatcher, ListenerFailure};
use crate::model::Topic;
use crate::registry::{CommandSink, Listener, Registry, Subscription};
use crate::stream::{
    AlertsStream, ContainerStream, MetricsStream, StreamContext, Teardown, TopicStream,
};

/// Entry point for consumers.
///
/// Cheaply cloneable via `Arc<HubInner>`. Construct one per session and
/// pass it around; adapters built from it share its connection.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: HubConfig,
    connection: Connection,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    colors: Arc<ColorAssigner>,
    teardown: Arc<Teardown>,
    /// Stops the bridge task.
    cancel: CancellationToken,
    bridge: Mutex<Bridge>,
    shut_down: AtomicBool,
}

enum Bridge {
    /// Not started yet; holds the transport's event receiver.
    Pending(mpsc::UnboundedReceiver<TransportEvent>),
    Running(JoinHandle<()>),
    Stopped,
}

impl Hub {
    /// Build a hub. Does NOT connect.
    pub fn new(config: HubConfig) -> Self {
        let (connection, events) = Connection::new(config.connection.clone());
        let registry = Registry::new(Arc::new(connection.clone()) as Arc<dyn CommandSink>);
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry)));

        Self {
            inner: Arc::new(HubInner {
                config,
                connection,
                registry,
                dispatcher,
                colors: Arc::new(ColorAssigner::new()),
                teardown: Arc::new(Teardown::default()),
                cancel: CancellationToken::new(),
                bridge: Mutex::new(Bridge::Pending(events)),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open the shared connection. Idempotent; must run inside a tokio
    /// runtime. Ignored after [`shutdown`](Self::shutdown).
    pub fn connect(&self) {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            warn!("connect() after shutdown ignored");
            return;
        }
        self.start_bridge();
        self.inner.connection.connect();
    }

    /// Close the connection deliberately. Subscriptions stay registered
    /// and are re-declared on the next [`connect`](Self::connect).
    pub fn disconnect(&self) {
        self.inner.connection.disconnect();
    }

    /// End the session: disconnect, stop dispatching, drop every
    /// registration and wipe adapter state.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("hub shutting down");
        self.inner.connection.disconnect();
        self.inner.cancel.cancel();
        let previous = std::mem::replace(&mut *lock(&self.inner.bridge), Bridge::Stopped);
        if let Bridge::Running(handle) = previous {
            handle.abort();
        }
        self.inner.registry.clear();
        self.inner.teardown.reset_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    fn start_bridge(&self) {
        let mut bridge = lock(&self.inner.bridge);
        let events = match std::mem::replace(&mut *bridge, Bridge::Stopped) {
            Bridge::Pending(events) => events,
            other => {
                *bridge = other;
                return;
            }
        };
        let handle = tokio::spawn(bridge_task(
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.dispatcher),
            events,
            self.inner.cancel.clone(),
        ));
        *bridge = Bridge::Running(handle);
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.state().is_connected()
    }

    /// Watch connection state transitions.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.watch_state()
    }

    /// Listener failures, as they happen.
    pub fn listener_errors(&self) -> broadcast::Receiver<ListenerFailure> {
        self.inner.dispatcher.subscribe_errors()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn colors(&self) -> &Arc<ColorAssigner> {
        &self.inner.colors
    }

    // ── Subscriptions & adapters ─────────────────────────────────────

    /// Register a raw listener on `topic`.
    pub fn subscribe(&self, topic: Topic, listener: Listener) -> Subscription {
        self.inner.registry.subscribe(topic, listener)
    }

    /// Shared plumbing for building adapters.
    pub fn context(&self) -> StreamContext {
        StreamContext {
            registry: Arc::clone(&self.inner.registry),
            connection: self.inner.connection.watch_state(),
            colors: Arc::clone(&self.inner.colors),
            teardown: Arc::clone(&self.inner.teardown),
            history_capacity: self.inner.config.history_capacity,
            alert_capacity: self.inner.config.alert_capacity,
            aggregator: None,
        }
    }

    pub fn topic(&self, topic: Topic) -> TopicStream {
        TopicStream::new(&self.context(), topic)
    }

    pub fn metrics<I, S>(&self, device_ids: I) -> MetricsStream
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        MetricsStream::new(&self.context(), device_ids)
    }

    pub fn containers<I, S>(&self, device_ids: I) -> ContainerStream
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ContainerStream::new(&self.context(), device_ids)
    }

    pub fn alerts(&self) -> AlertsStream {
        AlertsStream::new(&self.context())
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.connection.disconnect();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Bridge task ──────────────────────────────────────────────────────

/// Drain transport events in order: socket lifecycle goes to the
/// registry, frames go to the dispatcher.
async fn bridge_task(
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    TransportEvent::Connected { generation } => {
                        registry.on_connected(generation);
                    }
                    TransportEvent::Disconnected { generation } => {
                        debug!(generation, "socket closed");
                        registry.on_disconnected(generation);
                    }
                    TransportEvent::Frame(text) => {
                        dispatcher.dispatch_text(&text);
                    }
                }
            }
        }
    }
    debug!("bridge task exiting");
}
