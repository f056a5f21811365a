//! WebSocket listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::error::TransportResult;
use crate::http::{bind, spawn_server};
use crate::listener::{ListenerHandle, ListenerKind};

/// One accepted WebSocket connection.
#[derive(Debug, Clone)]
pub struct WsConnection {
    id: u64,
    remote_addr: SocketAddr,
    tx: mpsc::Sender<String>,
}

impl WsConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Queues a text frame for this connection.
    ///
    /// Returns `false` if the connection has already closed.
    pub async fn send(&self, text: impl Into<String>) -> bool {
        self.tx.send(text.into()).await.is_ok()
    }
}

/// Callbacks for a WebSocket listener.
#[async_trait]
pub trait WsHandler: Send + Sync + 'static {
    /// Called once a connection has been upgraded.
    async fn on_connect(&self, _conn: &WsConnection) {}

    /// Called for every text frame. A returned string is sent back.
    async fn on_message(&self, conn: &WsConnection, text: String) -> Option<String>;

    /// Called after the connection closed.
    async fn on_close(&self, _conn: &WsConnection) {}
}

struct ServerState {
    handler: Arc<dyn WsHandler>,
    next_id: AtomicU64,
}

/// Binds `addr` and accepts WebSocket upgrades on `path`.
pub async fn serve(
    addr: &str,
    path: &str,
    handler: Arc<dyn WsHandler>,
) -> TransportResult<ListenerHandle> {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    let state = Arc::new(ServerState {
        handler,
        next_id: AtomicU64::new(1),
    });
    let router = Router::new()
        .route(&path, get(ws_handler))
        .with_state(state);

    let listener = bind(addr).await?;
    let local_addr = listener.local_addr()?;

    info!(addr = %local_addr, path = %path, "WebSocket listener started");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = spawn_server(listener, router, shutdown_rx, ListenerKind::WebSocket);

    Ok(ListenerHandle::new(
        ListenerKind::WebSocket,
        local_addr,
        shutdown_tx,
        task,
    ))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    debug!(remote_addr = %addr, "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: Arc<ServerState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(64);

    let conn = WsConnection {
        id: state.next_id.fetch_add(1, Ordering::Relaxed),
        remote_addr: addr,
        tx,
    };
    info!(conn_id = conn.id, remote_addr = %addr, "WebSocket connection established");
    state.handler.on_connect(&conn).await;

    let conn_id = conn.id;
    let send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                warn!(conn_id, "Failed to send frame, connection closed");
                break;
            }
        }
    });

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => {
                trace!(conn_id, len = text.len(), "Received text frame");
                if let Some(reply) = state.handler.on_message(&conn, text.to_string()).await {
                    conn.send(reply).await;
                }
            }
            Ok(Message::Close(_)) => {
                debug!(conn_id, "WebSocket closed by peer");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    state.handler.on_close(&conn).await;
    send_task.abort();
    info!(conn_id, "WebSocket connection closed");
}
