//! WebSocket transport with auto-reconnect.
//!
//! Owns the single physical socket to the telemetry server. Inbound text
//! frames are forwarded, in arrival order, as [`TransportEvent::Frame`]
//! through an unbounded channel. Connection status is published on a
//! [`tokio::sync::watch`] channel. Unexpected closes are retried with
//! exponential backoff + jitter until [`Connection::disconnect`] is called.
//!
//! # Example
//!
//! ```rust,ignore
//! use telemux_api::websocket::{Connection, ConnectionConfig, TransportEvent};
//! use url::Url;
//!
//! let url = Url::parse("ws://127.0.0.1:8080/ws")?;
//! let (conn, mut events) = Connection::new(ConnectionConfig::new(url));
//! conn.connect();
//!
//! while let Some(event) = events.recv().await {
//!     if let TransportEvent::Frame(text) = event {
//!         println!("{text}");
//!     }
//! }
//!
//! conn.disconnect();
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::Error;
use crate::frame::ControlMessage;

// ── ConnectionState ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Connection status observable by consumers.
///
/// Only the transport writes this; everyone else reads it through
/// [`Connection::state`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Failed attempts since the last successful open.
    pub retry_count: u32,
    /// Why the last session or attempt ended, if it ended badly.
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Jitter applied on top of the exponential delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Exact exponential delay.
    None,
    /// Uniform in `[0, delay]`.
    #[default]
    Full,
}

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,

    /// Default: full jitter.
    pub jitter: Jitter,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
            jitter: Jitter::Full,
        }
    }
}

// ── ConnectionConfig ─────────────────────────────────────────────────

/// Where and how to open the socket.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: Url,
    pub reconnect: ReconnectConfig,
    /// Extra headers for the upgrade request (e.g. a session cookie
    /// obtained by the caller).
    pub headers: Vec<(String, String)>,
}

impl ConnectionConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect: ReconnectConfig::default(),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

// ── TransportEvent ───────────────────────────────────────────────────

/// Everything the transport reports to its owner, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A socket opened. `generation` increases with every successful open.
    Connected { generation: u64 },
    /// A raw text frame from the server.
    Frame(String),
    /// The socket of `generation` is gone (for any reason).
    Disconnected { generation: u64 },
}

/// A queued outbound frame, bound to the socket generation it was meant for.
#[derive(Debug)]
struct Outbound {
    generation: u64,
    text: String,
}

// ── Connection ───────────────────────────────────────────────────────

/// Handle to the one physical connection.
///
/// Cheaply cloneable. [`connect`](Self::connect) spawns the background
/// loop (requires a tokio runtime); [`disconnect`](Self::disconnect)
/// stops it, including any pending backoff sleep.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    /// Generation of the currently open socket, 0 when none.
    live_generation: AtomicU64,
    next_generation: AtomicU64,
    events: mpsc::UnboundedSender<TransportEvent>,
    session: Mutex<Option<Session>>,
}

struct Session {
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

impl Connection {
    /// Create a connection handle and the receiver for its events.
    /// Does NOT connect.
    pub fn new(config: ConnectionConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::default());

        let conn = Self {
            inner: Arc::new(Inner {
                config,
                state,
                live_generation: AtomicU64::new(0),
                next_generation: AtomicU64::new(0),
                events,
                session: Mutex::new(None),
            }),
        };
        (conn, events_rx)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Start the connection loop. No-op while a loop is already running
    /// (`Connecting`, `Connected` or `Reconnecting`).
    pub fn connect(&self) {
        let mut session = lock(&self.inner.session);
        if session.as_ref().is_some_and(|s| !s.task.is_finished()) {
            debug!(status = %self.inner.state.borrow().status, "connect() ignored, loop already running");
            return;
        }

        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        self.inner.publish(&cancel, |state| {
            state.status = ConnectionStatus::Connecting;
            state.retry_count = 0;
            state.last_error = None;
        });

        let task = tokio::spawn(connection_loop(
            Arc::clone(&self.inner),
            cancel.clone(),
            outbound_rx,
        ));

        *session = Some(Session {
            cancel,
            outbound: outbound_tx,
            task,
        });
    }

    /// Close deliberately. Transitions to `Disconnected` and never reconnects.
    pub fn disconnect(&self) {
        if let Some(session) = lock(&self.inner.session).take() {
            session.cancel.cancel();
            info!("WebSocket disconnect requested");
        }
        self.inner.live_generation.store(0, Ordering::SeqCst);
        self.inner.state.send_modify(|state| {
            *state = ConnectionState::default();
        });
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Watch connection state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Generation of the open socket, if connected.
    pub fn live_generation(&self) -> Option<u64> {
        match self.inner.live_generation.load(Ordering::SeqCst) {
            0 => None,
            generation => Some(generation),
        }
    }

    /// Queue a raw text frame on the current socket.
    ///
    /// Dropped while not connected. Returns whether the frame was queued.
    pub fn send(&self, text: impl Into<String>) -> bool {
        match self.live_generation() {
            Some(generation) => self.send_for(generation, text),
            None => {
                debug!("not connected, dropping outbound frame");
                false
            }
        }
    }

    /// Queue a raw text frame for one specific socket generation.
    ///
    /// If that socket is already gone by the time the writer sees the
    /// frame, the frame is discarded rather than sent on a newer socket.
    pub fn send_for(&self, generation: u64, text: impl Into<String>) -> bool {
        let session = lock(&self.inner.session);
        let Some(session) = session.as_ref() else {
            debug!(generation, "no active session, dropping outbound frame");
            return false;
        };
        session
            .outbound
            .send(Outbound {
                generation,
                text: text.into(),
            })
            .is_ok()
    }

    /// Queue a control message on the current socket.
    pub fn send_command(&self, command: &ControlMessage) -> bool {
        self.send(command.to_text())
    }
}

impl Inner {
    /// Apply a state update unless the session that issued it was cancelled.
    ///
    /// `send_if_modified` holds the watch lock while the closure runs, so
    /// a `disconnect()` that cancels first and writes second always wins.
    fn publish(&self, cancel: &CancellationToken, update: impl FnOnce(&mut ConnectionState)) {
        self.state.send_if_modified(|state| {
            if cancel.is_cancelled() {
                return false;
            }
            let before = state.clone();
            update(state);
            *state != before
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Background reconnection loop ─────────────────────────────────────

enum SessionEnd {
    /// `disconnect()` was called.
    Cancelled,
    /// The socket failed to open or dropped.
    Failed { error: Error, was_connected: bool },
}

/// Main loop: connect → read/write → on failure, backoff → reconnect.
async fn connection_loop(
    inner: Arc<Inner>,
    cancel: CancellationToken,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let mut retry_count: u32 = 0;

    loop {
        let (error, was_connected) = match run_session(&inner, &cancel, &mut outbound).await {
            SessionEnd::Cancelled => break,
            SessionEnd::Failed {
                error,
                was_connected,
            } => (error, was_connected),
        };
        if cancel.is_cancelled() {
            break;
        }
        if was_connected {
            retry_count = 0;
        }

        warn!(error = %error, retry_count, "WebSocket session ended");

        if let Some(max) = inner.config.reconnect.max_retries {
            if retry_count >= max {
                error!(max_retries = max, "WebSocket reconnection limit reached, giving up");
                inner.publish(&cancel, |state| {
                    state.status = ConnectionStatus::Disconnected;
                    state.last_error = Some(error.to_string());
                });
                break;
            }
        }

        let delay = calculate_backoff(retry_count, &inner.config.reconnect);
        retry_count += 1;
        inner.publish(&cancel, |state| {
            state.status = ConnectionStatus::Reconnecting;
            state.retry_count = retry_count;
            state.last_error = Some(error.to_string());
        });

        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            retry_count,
            "Waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    debug!("WebSocket loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Open one socket and pump it until it drops or the session is cancelled.
async fn run_session(
    inner: &Inner,
    cancel: &CancellationToken,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
) -> SessionEnd {
    let url = &inner.config.url;
    info!(url = %url, "Connecting to WebSocket");

    let request = match build_request(&inner.config) {
        Ok(r) => r,
        Err(error) => {
            return SessionEnd::Failed {
                error,
                was_connected: false,
            };
        }
    };

    let ws_stream = tokio::select! {
        biased;
        () = cancel.cancelled() => return SessionEnd::Cancelled,
        result = tokio_tungstenite::connect_async(request) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                return SessionEnd::Failed {
                    error: Error::WebSocketConnect(e.to_string()),
                    was_connected: false,
                };
            }
        },
    };

    let generation = inner.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
    inner.live_generation.store(generation, Ordering::SeqCst);

    // Frames queued for an older socket must never reach this one.
    while let Ok(stale) = outbound.try_recv() {
        trace!(generation = stale.generation, "discarding stale outbound frame");
    }

    inner.publish(cancel, |state| {
        state.status = ConnectionStatus::Connected;
        state.retry_count = 0;
        state.last_error = None;
    });
    let _ = inner.events.send(TransportEvent::Connected { generation });
    info!(generation, "WebSocket connected");

    let (mut write, mut read) = ws_stream.split();

    let end = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                break SessionEnd::Cancelled;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        let _ = inner.events.send(TransportEvent::Frame(text.as_str().to_owned()));
                    }
                    Some(Ok(tungstenite::Message::Binary(bytes))) => {
                        match std::str::from_utf8(&bytes) {
                            Ok(text) => {
                                let _ = inner.events.send(TransportEvent::Frame(text.to_owned()));
                            }
                            Err(e) => debug!(error = %e, "dropping non-UTF-8 binary frame"),
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let error = match frame {
                            Some(cf) => {
                                info!(code = %cf.code, reason = %cf.reason.as_str(), "WebSocket close frame received");
                                Error::WebSocketClosed {
                                    code: u16::from(cf.code),
                                    reason: cf.reason.as_str().to_owned(),
                                }
                            }
                            None => {
                                info!("WebSocket close frame received (no payload)");
                                Error::WebSocketClosed { code: 1005, reason: String::new() }
                            }
                        };
                        break SessionEnd::Failed { error, was_connected: true };
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong/raw frames; tungstenite answers pings itself.
                        trace!("WebSocket control frame");
                    }
                    Some(Err(e)) => {
                        break SessionEnd::Failed {
                            error: Error::WebSocketConnect(e.to_string()),
                            was_connected: true,
                        };
                    }
                    None => {
                        break SessionEnd::Failed { error: Error::StreamEnded, was_connected: true };
                    }
                }
            }
            Some(out) = outbound.recv() => {
                if out.generation != generation {
                    debug!(frame_generation = out.generation, generation, "discarding outbound frame for a dead socket");
                    continue;
                }
                trace!(text = %out.text, "sending frame");
                if let Err(e) = write.send(tungstenite::Message::text(out.text)).await {
                    break SessionEnd::Failed {
                        error: Error::WebSocketConnect(e.to_string()),
                        was_connected: true,
                    };
                }
            }
        }
    };

    let _ = inner.live_generation.compare_exchange(
        generation,
        0,
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
    let _ = inner.events.send(TransportEvent::Disconnected { generation });
    end
}

fn build_request(config: &ConnectionConfig) -> Result<ClientRequestBuilder, Error> {
    let uri: tungstenite::http::Uri = config
        .url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    for (name, value) in &config.headers {
        request = request.with_header(name.clone(), value.clone());
    }
    Ok(request)
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with optional full jitter.
///
/// `ceiling = min(initial * 2^attempt, max)`; with [`Jitter::Full`] the
/// delay is uniform in `[0, ceiling]`, otherwise exactly `ceiling`.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(31)).unwrap_or(31);
    let ceiling = (config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent))
        .min(config.max_delay.as_secs_f64())
        .max(0.0);

    let secs = match config.jitter {
        Jitter::None => ceiling,
        Jitter::Full => rand::thread_rng().gen_range(0.0..=ceiling),
    };

    Duration::from_secs_f64(secs)
}

// ── Tests ────────────────────────────────────────────────────────────
