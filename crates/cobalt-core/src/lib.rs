//! # Cobalt Core
//!
//! Foundation types shared by every other Cobalt crate.
//!
//! - **Message model**: a message is an ordered list of typed [`Element`]s.
//!   The element set is closed; steps pattern-match on [`ElementKind`].
//! - **Event model**: [`MessageEvent`] describes one inbound private or group
//!   message, and [`EventClass`] selects which events a route listens to.
//! - **Client contract**: the messaging-platform client is an external
//!   collaborator behind the [`Client`] trait. Cobalt never speaks the wire
//!   protocol itself.
//!
//! ```text
//! ┌──────────────┐  MessageEvent  ┌──────────┐   Route    ┌──────────┐
//! │    Client    │───────────────▶│  Router  │───────────▶│  Plugin  │
//! │  (external)  │◀───────────────│          │            │ handlers │
//! └──────────────┘  send_*_msg    └──────────┘            └──────────┘
//! ```

pub mod client;
pub mod error;
pub mod event;
pub mod message;

pub use client::{BoxedClient, Client, SentMessage};
pub use error::{ClientError, ClientResult, ParseKindError};
pub use event::{EventClass, MessageEvent, Scene, Sender};
pub use message::{AtTarget, Element, ElementKind, Message};
