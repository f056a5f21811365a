//! Port-keyed listener registry.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{TransportError, TransportResult};
use crate::listener::ListenerHandle;
use crate::websocket::WsHandler;
use crate::{http, websocket};

/// Slot state for one port.
enum Slot {
    /// A bind is in flight.
    Binding,
    Open(ListenerHandle),
}

/// Tracks every listener opened by plugins, keyed by port.
///
/// A port is reserved before the bind starts, so two concurrent opens of the
/// same port cannot both succeed.
pub struct ListenerRegistry {
    host: String,
    slots: Mutex<HashMap<u16, Slot>>,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerRegistry {
    /// Creates a registry that binds on all interfaces.
    pub fn new() -> Self {
        Self::with_host("0.0.0.0")
    }

    /// Creates a registry that binds on `host`.
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Opens an HTTP listener on `port`.
    pub async fn open_http(&self, port: u16, router: Router) -> TransportResult<()> {
        self.reserve(port)?;
        let result = http::serve(&self.addr(port), router).await;
        self.settle(port, result)
    }

    /// Opens a WebSocket listener on `port`, accepting upgrades on `path`.
    pub async fn open_ws(
        &self,
        port: u16,
        path: &str,
        handler: Arc<dyn WsHandler>,
    ) -> TransportResult<()> {
        self.reserve(port)?;
        let result = websocket::serve(&self.addr(port), path, handler).await;
        self.settle(port, result)
    }

    /// Stops the listener on `port` and waits until the port is free.
    pub async fn close(&self, port: u16) -> TransportResult<()> {
        let handle = self.take(port)?;
        info!(port, kind = %handle.kind(), "Closing listener");
        handle.stop().await;
        Ok(())
    }

    /// Signals the listener on `port` to stop without waiting for it.
    pub fn close_detached(&self, port: u16) -> TransportResult<()> {
        let handle = self.take(port)?;
        debug!(port, kind = %handle.kind(), "Closing listener in background");
        drop(handle);
        Ok(())
    }

    pub fn is_open(&self, port: u16) -> bool {
        matches!(self.slots.lock().get(&port), Some(Slot::Open(_)))
    }

    /// Returns the ports with an open listener, sorted.
    pub fn ports(&self) -> Vec<u16> {
        let slots = self.slots.lock();
        let mut ports: Vec<u16> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Open(_)))
            .map(|(port, _)| *port)
            .collect();
        ports.sort_unstable();
        ports
    }

    /// Stops every listener.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.slots.lock().drain().collect();
        for (port, slot) in drained {
            if let Slot::Open(handle) = slot {
                debug!(port, "Closing listener");
                handle.stop().await;
            }
        }
    }

    fn addr(&self, port: u16) -> String {
        format!("{}:{port}", self.host)
    }

    fn take(&self, port: u16) -> TransportResult<ListenerHandle> {
        let mut slots = self.slots.lock();
        match slots.remove(&port) {
            Some(Slot::Open(handle)) => Ok(handle),
            Some(Slot::Binding) => {
                slots.insert(port, Slot::Binding);
                Err(TransportError::PortNotOpen(port))
            }
            None => Err(TransportError::PortNotOpen(port)),
        }
    }

    fn reserve(&self, port: u16) -> TransportResult<()> {
        let mut slots = self.slots.lock();
        if slots.contains_key(&port) {
            return Err(TransportError::PortInUse(port));
        }
        slots.insert(port, Slot::Binding);
        Ok(())
    }

    fn settle(&self, port: u16, result: TransportResult<ListenerHandle>) -> TransportResult<()> {
        let mut slots = self.slots.lock();
        match result {
            Ok(handle) => {
                slots.insert(port, Slot::Open(handle));
                Ok(())
            }
            Err(e) => {
                slots.remove(&port);
                Err(e)
            }
        }
    }
}
