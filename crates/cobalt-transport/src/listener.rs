//! Handles to running listeners.

use std::fmt;
use std::net::SocketAddr;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

/// What a listener serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Http,
    WebSocket,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::WebSocket => f.write_str("ws"),
        }
    }
}

/// Handle to a running listener.
///
/// Stopping or dropping the handle shuts the listener down. Only
/// [`stop`](Self::stop) waits for the socket to be released.
#[derive(Debug)]
pub struct ListenerHandle {
    kind: ListenerKind,
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub(crate) fn new(
        kind: ListenerKind,
        local_addr: SocketAddr,
        shutdown_tx: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            kind,
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// The address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the listener and waits until its socket is closed.
    pub async fn stop(mut self) {
        self.signal();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(kind = %self.kind, error = %e, "Listener task failed");
        }
    }

    fn signal(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.signal();
    }
}
