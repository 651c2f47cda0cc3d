// ── Alert feed ──

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use super::{Resettable, StreamContext, bump_version, lock};
use crate::aggregate::Aggregator;
use crate::history::HistoryBuffer;
use crate::model::{Alert, Envelope, Topic};
use crate::registry::Subscription;

struct AlertsState {
    retained: HistoryBuffer<Alert>,
    /// Set once the owning stream is gone.
    closed: bool,
}

struct AlertsShared {
    state: Mutex<AlertsState>,
    version: watch::Sender<u64>,
    aggregator: Option<Arc<Aggregator>>,
}

impl AlertsShared {
    fn on_envelope(&self, envelope: &Envelope) {
        let Some(alert) = envelope.as_alert() else {
            return;
        };
        {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            let evicted = state.retained.push(alert.clone());
            if let Some(aggregator) = &self.aggregator {
                // Add before removing: with capacity 0 the evicted alert is this one.
                aggregator.update(|t| {
                    t.alert_added(alert.severity);
                    if let Some(old) = &evicted {
                        t.alert_removed(old.severity);
                    }
                });
            }
        }
        bump_version(&self.version);
    }

    /// Drop the retained alerts and only their share of the tallies.
    fn forget_all(&self, state: &mut AlertsState) {
        if let Some(aggregator) = &self.aggregator {
            aggregator.update(|t| {
                for alert in &state.retained {
                    t.alert_removed(alert.severity);
                }
            });
        }
        state.retained.clear();
    }

    fn clear(&self) {
        self.forget_all(&mut lock(&self.state));
        bump_version(&self.version);
    }
}

impl Resettable for AlertsShared {
    fn reset(&self) {
        self.clear();
    }
}

/// The `alerts` topic as an ordered, capped list (oldest first).
pub struct AlertsStream {
    ctx: StreamContext,
    shared: Arc<AlertsShared>,
    subscription: Subscription,
    version: watch::Receiver<u64>,
}

impl AlertsStream {
    pub fn new(ctx: &StreamContext) -> Self {
        let (version_tx, version) = watch::channel(0);
        let shared = Arc::new(AlertsShared {
            state: Mutex::new(AlertsState {
                retained: HistoryBuffer::new(ctx.alert_capacity),
                closed: false,
            }),
            version: version_tx,
            aggregator: ctx.aggregator.clone(),
        });
        let weak = Arc::downgrade(&shared);
        ctx.track(weak);

        let listener_state = Arc::clone(&shared);
        let subscription = ctx.registry.subscribe_fn(Topic::alerts(), move |env| {
            listener_state.on_envelope(env);
            Ok(())
        });

        Self {
            ctx: ctx.clone(),
            shared,
            subscription,
            version,
        }
    }

    /// Retained alerts, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        lock(&self.shared.state).retained.to_vec()
    }

    pub fn latest(&self) -> Option<Alert> {
        lock(&self.shared.state).retained.latest().cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.state).retained.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.shared.state).retained.is_empty()
    }

    /// Forget every retained alert. The subscription stays.
    pub fn clear(&self) {
        self.shared.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.is_connected()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_active()
    }

    pub fn watch(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    pub async fn changed(&mut self) -> bool {
        self.version.changed().await.is_ok()
    }
}

impl Drop for AlertsStream {
    fn drop(&mut self) {
        let mut state = lock(&self.shared.state);
        state.closed = true;
        self.shared.forget_all(&mut state);
    }
}
