//! # Cobalt Transport
//!
//! Auxiliary network listeners that plugins may open next to the chat
//! session: plain HTTP servers built from an [`axum::Router`] and WebSocket
//! servers driven by a [`WsHandler`].
//!
//! Listeners are keyed by port in a [`ListenerRegistry`]. A port can be held
//! by one listener at a time, and every listener is shut down when its
//! [`ListenerHandle`] is stopped or dropped.
//!
//! ```rust,ignore
//! use cobalt_transport::ListenerRegistry;
//! use axum::{Router, routing::get};
//!
//! let registry = ListenerRegistry::new();
//! registry.open_http(8080, Router::new().route("/health", get(|| async { "ok" }))).await?;
//! // ...
//! registry.close(8080).await?;
//! ```

pub mod error;
pub mod http;
pub mod listener;
pub mod registry;
pub mod websocket;

pub use error::{TransportError, TransportResult};
pub use listener::{ListenerHandle, ListenerKind};
pub use registry::ListenerRegistry;
pub use websocket::{WsConnection, WsHandler};

// Re-export axum so plugins can build routers without a direct dependency.
pub use axum;
