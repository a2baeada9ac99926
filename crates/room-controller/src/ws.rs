//! Bundled WebSocket transport.
//!
//! One upgrade per participant: a server-assigned UUIDv4 connection handle,
//! a read loop feeding the gateway, and a write loop draining a
//! per-connection unbounded sender. The registry of senders is the
//! [`EventSink`] the controller broadcasts through.
//!
//! The broker core never depends on this module; any transport that can
//! implement `EventSink` and call the gateway works the same way.

use crate::events::ServerEvent;
use crate::gateway::EventGateway;
use crate::transport::EventSink;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Registry of live WebSocket connections and their outbound queues.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
}

impl ClientRegistry {
    /// Create a new shared registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, connection: &str, sender: mpsc::UnboundedSender<String>) {
        self.lock().insert(connection.to_string(), sender);
    }

    fn unregister(&self, connection: &str) {
        self.lock().remove(connection);
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<String>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for ClientRegistry {
    fn unicast(&self, connection: &str, event: &ServerEvent) {
        let Ok(text) = serde_json::to_string(event) else {
            return;
        };
        if let Some(sender) = self.lock().get(connection) {
            // A closed receiver means the connection is going away; the
            // disconnect path cleans up
            let _ = sender.send(text);
        }
    }

    fn multicast(&self, connections: &[String], event: &ServerEvent) {
        // Serialize once for the whole group
        let Ok(text) = serde_json::to_string(event) else {
            return;
        };
        let clients = self.lock();
        for connection in connections {
            if let Some(sender) = clients.get(connection) {
                let _ = sender.send(text.clone());
            }
        }
    }
}

/// Shared state for the WebSocket route.
#[derive(Clone)]
pub struct WsState {
    /// Inbound event dispatch.
    pub gateway: EventGateway,
    /// Outbound delivery registry.
    pub registry: Arc<ClientRegistry>,
}

/// Router exposing the `/ws` upgrade endpoint.
pub fn ws_router(state: WsState) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one WebSocket connection until it closes.
async fn handle_socket(socket: WebSocket, state: WsState) {
    let connection = uuid::Uuid::new_v4().to_string();

    info!(
        target: "rc.ws",
        connection = %connection,
        "WebSocket connection established"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (sender, mut outbound) = mpsc::unbounded_channel::<String>();
    state.registry.register(&connection, sender);

    // Write loop: registry queue -> socket
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Read loop: socket -> gateway
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                state.gateway.dispatch_text(&connection, &text).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol
            Ok(_) => {}
        }
    }

    state.registry.unregister(&connection);
    state.gateway.on_disconnect(&connection).await;
    writer.abort();

    debug!(
        target: "rc.ws",
        connection = %connection,
        "WebSocket connection closed"
    );
}
