//! # Cobalt
//!
//! A chat-automation host. Cobalt receives inbound messages from an external
//! messaging client, runs them through per-route middleware chains and hands
//! matches to plugins that can be enabled, disabled and rebooted while the
//! host keeps running.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  events  ┌──────────────┐     ┌──────────────────────────────────┐
//! │   Client   │─────────▶│ CobaltRuntime│────▶│ Router                           │
//! │ (external) │◀─────────│              │     │  admin route   [sender,prefix,..]│
//! └────────────┘  replies └──────┬───────┘     │  plugin routes [gate, steps, ..] │
//!                                │             └──────────────────────────────────┘
//!                         ┌──────▼───────┐
//!                         │PluginManager │── enable / disable / reboot ──▶ plugins.json
//!                         └──────────────┘
//! ```
//!
//! - **Runtime**: configuration, logging, startup and the supervised event loop
//! - **Router**: runs every route whose event class matches
//! - **Chains**: ordered steps that either halt, fail or fill the result bag
//! - **Plugins**: units registered with [`export_unit!`](prelude::export_unit),
//!   owning routes, cron jobs, listeners and key-value stores
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cobalt::prelude::*;
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl PluginUnit for Echo {
//!     async fn setup(&self, host: PluginHost, metadata: PluginMetadata) -> Result<Plugin, BoxError> {
//!         let plugin = host.plugin(metadata);
//!         plugin.on_message(Chain::builder().prefix(["/echo"]).build(), |ctx, _| async move {
//!             ctx.reply(ctx.event().message.plain_text()).await?;
//!             Ok(())
//!         })?;
//!         Ok(plugin)
//!     }
//! }
//!
//! export_unit!("echo", Echo);
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): `cobalt.toml` configuration files
//! - `yaml-config`: `cobalt.yaml` configuration files
//! - `json-log`: JSON log output

pub use cobalt_core as core;
pub use cobalt_framework as framework;
pub use cobalt_runtime as runtime;
pub use cobalt_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use cobalt::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use cobalt_runtime::{CobaltConfig, CobaltRuntime};

    // Plugin system
    pub use cobalt_framework::export_unit;
    pub use cobalt_framework::{
        BoxError, Plugin, PluginHost, PluginMetadata, PluginUnit, StaticUnitLoader, unit_fn,
    };

    // Routing and chains
    pub use cobalt_framework::{
        ArgKind, Chain, ChainBuilder, CommandOption, EventContext, MiddlewareError, Outcome,
        ResultBag, Route, step_fn,
    };

    // Messages and the client contract
    pub use cobalt_core::{
        BoxedClient, Client, Element, ElementKind, EventClass, Message, MessageEvent,
    };

    // Listeners
    pub use cobalt_transport::WsHandler;
}
