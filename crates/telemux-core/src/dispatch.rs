// ── Frame dispatcher ──
//
// Decodes raw frames into envelopes and hands each envelope to every
// listener of its topic, synchronously and in registration order. A
// listener that returns an error or panics is reported and skipped; the
// rest of the fan-out continues.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::convert::decode_envelope;
use crate::error::ListenerError;
use crate::model::{Envelope, Topic};
use crate::registry::{ListenerId, Registry};

const ERROR_CHANNEL_CAPACITY: usize = 64;

/// A listener that failed while handling an envelope.
#[derive(Debug, Clone)]
pub struct ListenerFailure {
    pub topic: Topic,
    pub listener: ListenerId,
    pub error: ListenerError,
    /// `true` when the listener panicked rather than returning `Err`.
    pub panicked: bool,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    errors: broadcast::Sender<ListenerFailure>,
    parse_errors: AtomicU64,
    delivered: AtomicU64,
    listener_failures: AtomicU64,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            registry,
            errors,
            parse_errors: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            listener_failures: AtomicU64::new(0),
        }
    }

    /// Decode one raw frame and deliver it.
    ///
    /// Undecodable frames are dropped and counted. Returns the envelope
    /// when decoding succeeded.
    pub fn dispatch_text(&self, text: &str) -> Option<Arc<Envelope>> {
        match decode_envelope(text, Utc::now()) {
            Ok(envelope) => {
                let envelope = Arc::new(envelope);
                self.dispatch(&envelope);
                Some(envelope)
            }
            Err(e) => {
                self.parse_errors.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, len = text.len(), "dropping undecodable frame");
                None
            }
        }
    }

    /// Deliver `envelope` to every listener of its topic. Returns how many
    /// listeners accepted it.
    pub fn dispatch(&self, envelope: &Arc<Envelope>) -> usize {
        let topic = envelope.topic();
        let listeners = self.registry.listeners(topic);
        if listeners.is_empty() {
            trace!(topic = %topic, "no listeners for envelope");
            return 0;
        }

        let mut accepted: usize = 0;
        for entry in listeners {
            // Unsubscribed after the snapshot was taken.
            if !entry.is_active() {
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (entry.listener)(envelope)));
            match outcome {
                Ok(Ok(())) => accepted += 1,
                Ok(Err(error)) => self.report(topic, entry.id, error, false),
                Err(payload) => {
                    let error = ListenerError::new(panic_message(payload.as_ref()));
                    self.report(topic, entry.id, error, true);
                }
            }
        }

        self.delivered
            .fetch_add(u64::try_from(accepted).unwrap_or(u64::MAX), Ordering::Relaxed);
        accepted
    }

    /// Receive listener failures as they happen.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ListenerFailure> {
        self.errors.subscribe()
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn listener_failures(&self) -> u64 {
        self.listener_failures.load(Ordering::Relaxed)
    }

    fn report(&self, topic: &Topic, listener: ListenerId, error: ListenerError, panicked: bool) {
        self.listener_failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            topic = %topic,
            listener = ?listener,
            panicked,
            error = %error,
            "listener failed"
        );
        // No receivers is fine.
        let _ = self.errors.send(ListenerFailure {
            topic: topic.clone(),
            listener,
            error,
            panicked,
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("listener panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("listener panicked: {s}")
    } else {
        "listener panicked".into()
    }
}
