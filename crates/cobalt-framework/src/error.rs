//! Error types for the framework layer.

use cobalt_core::ClientError;
use cobalt_transport::TransportError;
use thiserror::Error;

/// Error type for plugin-authored code (setup, handlers, cron jobs).
pub use tower::BoxError;

// =============================================================================
// Middleware Errors
// =============================================================================

/// What went wrong inside a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareErrorKind {
    /// A step matched the event's scope but rejected its shape.
    Rejected,
    /// A step short-circuited with a usage string.
    Help,
    /// A continuation was invoked more than once.
    DoubleNext,
    /// The terminal handler failed.
    Handler,
}

/// A failure raised while executing a chain.
///
/// The error is tagged with the step that raised it. Outer layers propagate
/// it unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{step}] {reason}")]
pub struct MiddlewareError {
    step: String,
    reason: String,
    kind: MiddlewareErrorKind,
}

impl MiddlewareError {
    pub fn rejected(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(step, reason, MiddlewareErrorKind::Rejected)
    }

    pub fn help(step: impl Into<String>, usage: impl Into<String>) -> Self {
        Self::new(step, usage, MiddlewareErrorKind::Help)
    }

    pub fn double_next(step: impl Into<String>) -> Self {
        Self::new(
            step,
            "next() called multiple times",
            MiddlewareErrorKind::DoubleNext,
        )
    }

    pub fn handler(reason: impl Into<String>) -> Self {
        Self::new("handler", reason, MiddlewareErrorKind::Handler)
    }

    fn new(step: impl Into<String>, reason: impl Into<String>, kind: MiddlewareErrorKind) -> Self {
        Self {
            step: step.into(),
            reason: reason.into(),
            kind,
        }
    }

    /// Name of the step that raised the error.
    pub fn step(&self) -> &str {
        &self.step
    }

    /// Human-readable reason, suitable for replying to the end user.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn kind(&self) -> MiddlewareErrorKind {
        self.kind
    }
}

// =============================================================================
// Plugin Resource Errors
// =============================================================================

/// Failures of the host resources a plugin can acquire.
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    /// Listener errors, including duplicate and unknown ports.
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("store '{0}' is already open")]
    StoreAlreadyOpen(String),

    #[error("store '{0}' is not open")]
    StoreNotOpen(String),

    #[error("invalid store location '{0}'")]
    InvalidLocation(String),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    /// The owning plugin has already been torn down.
    #[error("plugin has been destroyed")]
    Destroyed,
}

impl From<std::io::Error> for ResourceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// A resource failure attributed to one plugin.
#[derive(Debug, Clone, Error)]
#[error("plugin '{plugin}': {source}")]
pub struct PluginError {
    pub plugin: String,
    pub source: ResourceError,
}

impl PluginError {
    pub fn new(plugin: impl Into<String>, source: impl Into<ResourceError>) -> Self {
        Self {
            plugin: plugin.into(),
            source: source.into(),
        }
    }
}

// =============================================================================
// Lifecycle Errors
// =============================================================================

/// Errors reported by the plugin lifecycle manager.
#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    #[error("plugin '{0}' is already active")]
    AlreadyActive(String),

    #[error("plugin '{0}' is not active")]
    NotActive(String),

    /// Another enable, disable or reboot of the name has not finished.
    #[error("plugin '{0}' is busy, try again later")]
    Busy(String),

    #[error("plugin '{0}' not found")]
    NotFound(String),

    /// The name is not a single directory under the plugin root.
    #[error("invalid plugin name '{0}'")]
    InvalidName(String),

    /// The unit's code could not be loaded.
    #[error("failed to load plugin '{name}': {reason}")]
    Load { name: String, reason: String },

    /// The unit's setup entry point failed or panicked.
    #[error("plugin '{name}' setup failed: {reason}")]
    Setup { name: String, reason: String },

    /// The persisted state file is unreadable or unwritable.
    #[error("plugin state error: {0}")]
    State(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl LifecycleError {
    pub fn load(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Load {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn setup(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Setup {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for LifecycleError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
