//! Cobalt Runtime - configuration, logging and orchestration.
//!
//! This crate provides:
//! - Layered configuration loading (`figment`) and validation
//! - Logging setup over `tracing-subscriber` and `tracing-appender`
//! - [`CobaltRuntime`]: startup, supervised event dispatch and shutdown
//!
//! ```ignore
//! use cobalt_runtime::CobaltRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (tx, rx) = tokio::sync::mpsc::channel(64);
//!     let client = MyClient::connect(tx).await?;
//!
//!     let runtime = CobaltRuntime::builder().build(client)?;
//!     runtime.run(rx).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{CobaltConfig, ConfigError, ConfigLoader, ConfigResult, LoggingConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{CobaltRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// Provides the logging macros, `span`, `event`, `instrument` and `Level`.
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
