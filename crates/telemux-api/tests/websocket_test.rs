#![allow(clippy::unwrap_used)]
// Integration tests for `Connection` against an in-process WebSocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use telemux_api::{
    Connection, ConnectionConfig, ConnectionState, ConnectionStatus, ControlMessage, Jitter,
    ReconnectConfig, TransportEvent,
};

// ── Helpers ─────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;

/// Start a server that hands every accepted WebSocket to the test.
async fn start_server() -> (Url, mpsc::UnboundedReceiver<ServerSocket>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                if tx.send(ws).is_err() {
                    break;
                }
            }
        }
    });

    (Url::parse(&format!("ws://{addr}/ws")).unwrap(), rx)
}

/// A URL nothing listens on.
async fn refused_url() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Url::parse(&format!("ws://{addr}/ws")).unwrap()
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        max_retries: None,
        jitter: Jitter::None,
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

async fn accept(server: &mut mpsc::UnboundedReceiver<ServerSocket>) -> ServerSocket {
    tokio::time::timeout(WAIT, server.recv())
        .await
        .expect("timed out waiting for client connection")
        .expect("server channel closed")
}

async fn next_text(ws: &mut ServerSocket) -> String {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for client frame")
            .expect("client stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    pred: impl Fn(&ConnectionState) -> bool,
) -> ConnectionState {
    tokio::time::timeout(WAIT, async {
        loop {
            {
                let state = rx.borrow_and_update();
                if pred(&*state) {
                    return state.clone();
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("timed out waiting for connection state")
}

// ── Connect / receive ───────────────────────────────────────────────

#[tokio::test]
async fn test_forwards_text_frames_in_order() {
    let (url, mut server) = start_server().await;
    let (conn, mut events) = Connection::new(ConnectionConfig::new(url));
    conn.connect();

    let mut ws = accept(&mut server).await;
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Connected { generation: 1 }
    );

    for i in 0..3 {
        ws.send(Message::text(format!("frame-{i}"))).await.unwrap();
    }
    for i in 0..3 {
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Frame(format!("frame-{i}"))
        );
    }

    assert!(conn.state().is_connected());
    conn.disconnect();
}

#[tokio::test]
async fn test_send_reaches_server_when_connected() {
    let (url, mut server) = start_server().await;
    let (conn, mut events) = Connection::new(ConnectionConfig::new(url));
    conn.connect();

    let mut ws = accept(&mut server).await;
    next_event(&mut events).await;

    assert!(conn.send_command(&ControlMessage::subscribe("metrics:dev-a")));
    let text = next_text(&mut ws).await;
    let msg: ControlMessage = serde_json::from_str(&text).unwrap();
    assert_eq!(msg, ControlMessage::subscribe("metrics:dev-a"));

    conn.disconnect();
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let (url, mut server) = start_server().await;
    let (conn, mut events) = Connection::new(ConnectionConfig::new(url));
    conn.connect();
    conn.connect();

    let _ws = accept(&mut server).await;
    next_event(&mut events).await;
    conn.connect();

    let second = tokio::time::timeout(Duration::from_millis(200), server.recv()).await;
    assert!(second.is_err(), "a second socket was opened");
    assert_eq!(conn.live_generation(), Some(1));

    conn.disconnect();
}

// ── Reconnect ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let (url, mut server) = start_server().await;
    let config = ConnectionConfig::new(url).with_reconnect(fast_reconnect());
    let (conn, mut events) = Connection::new(config);
    let mut state_rx = conn.watch_state();
    conn.connect();

    let ws = accept(&mut server).await;
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Connected { generation: 1 }
    );
    wait_for_state(&mut state_rx, ConnectionState::is_connected).await;

    drop(ws);

    let reconnecting = wait_for_state(&mut state_rx, |s| {
        s.status == ConnectionStatus::Reconnecting
    })
    .await;
    assert_eq!(reconnecting.retry_count, 1);
    assert!(reconnecting.last_error.is_some());

    let _ws2 = accept(&mut server).await;
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Disconnected { generation: 1 }
    );
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Connected { generation: 2 }
    );

    let connected = wait_for_state(&mut state_rx, ConnectionState::is_connected).await;
    assert_eq!(connected.retry_count, 0);
    assert!(connected.last_error.is_none());

    conn.disconnect();
}

#[tokio::test]
async fn test_frames_for_dead_socket_are_discarded() {
    let (url, mut server) = start_server().await;
    let config = ConnectionConfig::new(url).with_reconnect(fast_reconnect());
    let (conn, mut events) = Connection::new(config);
    conn.connect();

    let ws1 = accept(&mut server).await;
    next_event(&mut events).await;
    drop(ws1);

    let mut ws2 = accept(&mut server).await;
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Disconnected { generation: 1 }
    );
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Connected { generation: 2 }
    );

    assert!(conn.send_for(1, "stale"));
    assert!(conn.send_for(2, "fresh"));
    assert_eq!(next_text(&mut ws2).await, "fresh");

    conn.disconnect();
}

// ── Disconnect / give up ────────────────────────────────────────────

#[tokio::test]
async fn test_disconnect_cancels_pending_retry() {
    let url = refused_url().await;
    let config = ConnectionConfig::new(url).with_reconnect(ReconnectConfig {
        initial_delay: Duration::from_secs(60),
        ..fast_reconnect()
    });
    let (conn, _events) = Connection::new(config);
    let mut state_rx = conn.watch_state();
    conn.connect();

    let state = wait_for_state(&mut state_rx, |s| {
        s.status == ConnectionStatus::Reconnecting
    })
    .await;
    assert_eq!(state.retry_count, 1);

    conn.disconnect();
    assert_eq!(conn.state(), ConnectionState::default());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(conn.state().status, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_gives_up_after_max_retries() {
    let url = refused_url().await;
    let config = ConnectionConfig::new(url).with_reconnect(ReconnectConfig {
        max_retries: Some(2),
        ..fast_reconnect()
    });
    let (conn, _events) = Connection::new(config);
    let mut state_rx = conn.watch_state();
    conn.connect();

    let state = wait_for_state(&mut state_rx, |s| {
        s.status == ConnectionStatus::Disconnected && s.last_error.is_some()
    })
    .await;
    assert_eq!(state.retry_count, 2);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The loop is gone, so connect() starts a fresh one.
    conn.connect();
    assert_eq!(conn.state().status, ConnectionStatus::Connecting);
    conn.disconnect();
}
