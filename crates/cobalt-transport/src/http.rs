//! HTTP listener.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{TransportError, TransportResult};
use crate::listener::{ListenerHandle, ListenerKind};

/// Binds `addr` and serves `router` until the returned handle is stopped.
pub async fn serve(addr: &str, router: Router) -> TransportResult<ListenerHandle> {
    let listener = bind(addr).await?;
    let local_addr = listener.local_addr()?;

    info!(addr = %local_addr, "HTTP listener started");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = spawn_server(listener, router, shutdown_rx, ListenerKind::Http);

    Ok(ListenerHandle::new(
        ListenerKind::Http,
        local_addr,
        shutdown_tx,
        task,
    ))
}

pub(crate) async fn bind(addr: &str) -> TransportResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })
}

pub(crate) fn spawn_server(
    listener: TcpListener,
    router: Router,
    shutdown_rx: oneshot::Receiver<()>,
    kind: ListenerKind,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let server = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

        if let Err(e) = server.await {
            error!(kind = %kind, error = %e, "Listener error");
        }
        info!(kind = %kind, "Listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_serve_and_stop() {
        let router = Router::new().route("/ping", get(|| async { "pong" }));
        let handle = serve("127.0.0.1:0", router).await.unwrap();
        let addr = handle.local_addr();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("pong"));

        handle.stop().await;
        assert!(TcpListener::bind(addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = serve("127.0.0.1:0", Router::new()).await.unwrap();
        let addr = first.local_addr().to_string();

        let err = serve(&addr, Router::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }
}
