//! Runtime error types.

use cobalt_framework::LifecycleError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Loading or unloading plugins failed as a whole.
    #[error("Plugin lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Runtime is already running")]
    AlreadyRunning,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
