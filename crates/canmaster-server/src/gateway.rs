//! Operator Gateway (C8): a WebSocket/JSON duplex port. One Tokio task per
//! connection reads and forwards parsed messages to the engine task; a
//! per-connection outbound channel, registered in [`GatewayRegistry`],
//! mirrors the teacher's `SharedState.outbound_streams` map.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use canmaster_proto::gateway::{InboundMessage, OutboundMessage};

/// Interval between keep-alive pings sent to each operator connection.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Gateway transport or protocol failure.
#[derive(Debug)]
pub enum GatewayError {
    /// The listen address could not be bound.
    Bind(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind(msg) => write!(f, "failed to bind operator gateway: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// An event the gateway forwards to the engine task.
#[derive(Debug)]
pub enum GatewayEvent {
    /// A new operator connected.
    Connected {
        /// Session id assigned to the new connection.
        session_id: u64,
    },
    /// A message arrived from an operator.
    Message {
        /// Originating session.
        session_id: u64,
        /// The parsed message.
        message: InboundMessage,
    },
    /// An operator connection closed.
    Disconnected {
        /// Session that closed.
        session_id: u64,
    },
}

/// Registry of connected operator sessions: session id → outbound sender.
/// Readers and writers both go through the lock; sends are fire-and-forget
/// against an unbounded channel so a slow operator never blocks the engine
/// task.
#[derive(Default)]
pub struct GatewayRegistry {
    sessions: RwLock<HashMap<u64, mpsc::UnboundedSender<Message>>>,
    next_id: AtomicU64,
}

impl GatewayRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn register(&self, session_id: u64, sender: mpsc::UnboundedSender<Message>) {
        self.sessions.write().await.insert(session_id, sender);
    }

    async fn unregister(&self, session_id: u64) {
        self.sessions.write().await.remove(&session_id);
    }

    /// Send one message to a single operator. Silently dropped if that
    /// session has since disconnected (§5: in-flight responses to a dead
    /// port are dropped).
    pub async fn send_to(&self, session_id: u64, message: &OutboundMessage) {
        if let Some(sender) = self.sessions.read().await.get(&session_id) {
            if let Ok(text) = serde_json::to_string(message) {
                let _ = sender.send(Message::Text(text));
            }
        }
    }

    /// Send one message to every connected operator.
    pub async fn broadcast(&self, message: &OutboundMessage) {
        let Ok(text) = serde_json::to_string(message) else { return };
        for sender in self.sessions.read().await.values() {
            let _ = sender.send(Message::Text(text.clone()));
        }
    }

    /// Number of connected operators.
    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Register a session's outbound sender directly, bypassing the
    /// WebSocket accept loop. Used by run-loop tests that exercise
    /// [`GatewayRegistry`] without a real socket.
    #[cfg(test)]
    pub async fn register_for_test(&self, session_id: u64, sender: mpsc::UnboundedSender<Message>) {
        self.register(session_id, sender).await;
    }
}

/// Accept operator connections on `addr` until the listener is dropped,
/// forwarding events to `events_tx`.
///
/// # Errors
///
/// Returns [`GatewayError::Bind`] if `addr` can't be bound.
pub async fn run(
    addr: SocketAddr,
    registry: Arc<GatewayRegistry>,
    events_tx: mpsc::Sender<GatewayEvent>,
) -> Result<(), GatewayError> {
    let listener = TcpListener::bind(addr).await.map_err(|e| GatewayError::Bind(e.to_string()))?;
    tracing::info!(%addr, "operator gateway listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept operator connection");
                continue;
            }
        };
        let session_id = registry.allocate_session_id();
        tokio::spawn(handle_connection(stream, peer, session_id, registry.clone(), events_tx.clone()));
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    session_id: u64,
    registry: Arc<GatewayRegistry>,
    events_tx: mpsc::Sender<GatewayEvent>,
) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, %peer, "websocket handshake failed");
            return;
        }
    };
    tracing::info!(session_id, %peer, "operator connected");

    let (mut write, mut read) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    registry.register(session_id, outbound_tx).await;

    if events_tx.send(GatewayEvent::Connected { session_id }).await.is_err() {
        return;
    }

    // Ping-sending and pong-tracking live in the same task (unlike the
    // read loop) so the "awaiting pong" flag needs no cross-task sharing:
    // a missed reply to the previous ping terminates the session on the
    // next tick, per the 30s liveness window.
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await; // first tick fires immediately
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            msg = outbound_rx.recv() => {
                match msg {
                    Some(msg) => {
                        if write.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping_interval.tick() => {
                if awaiting_pong {
                    tracing::warn!(session_id, "no pong within the liveness window, terminating");
                    break;
                }
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<InboundMessage>(&text) {
                        Ok(message) => {
                            if events_tx.send(GatewayEvent::Message { session_id, message }).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(session_id, error = %e, "malformed operator message, dropping");
                        }
                    },
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::info!(session_id, error = %e, "operator connection closed");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    registry.unregister(session_id).await;
    let _ = events_tx.send(GatewayEvent::Disconnected { session_id }).await;
    tracing::info!(session_id, "operator disconnected");
}
