//! Configuration module for the Cobalt runtime.
//!
//! Layered loading through `figment` plus validation of the resulting
//! [`CobaltConfig`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config};
pub use schema::{
    BotConfig, CobaltConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    PluginsConfig, SpanEventConfig, StorageConfig,
};
pub use validation::validate_config;
