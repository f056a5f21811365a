//! # Cobalt Framework
//!
//! Everything between an inbound message and a plugin's handler.
//!
//! This layer provides:
//! - Onion-style middleware composition with a double-`next` guard
//! - Chains of predicate/extractor steps that fill a result bag
//! - A router running chains per event class, exposed as tower services
//! - The plugin host API (routes, cron jobs, listeners, key-value stores)
//! - The plugin lifecycle manager and its code registry
//! - The operator command route
//!
//! ```text
//! MessageEvent ─► Router ─► Route(class) ─► Chain[gate, step, step, ...] ─► handler(ctx, bag)
//!                                                         │
//!                                               Halt: silent │ Fail: on_error
//! ```

pub mod admin;
pub mod bag;
pub mod context;
pub mod error;
pub mod host;
pub mod middleware;
pub mod plugin;
pub mod router;

pub use admin::{Admin, AdminCommand};
pub use bag::ResultBag;
pub use context::{ChainContext, EventContext};
pub use error::{
    BoxError, LifecycleError, LifecycleResult, MiddlewareError, MiddlewareErrorKind, PluginError,
    ResourceError,
};
pub use host::{CronJob, HostOptions, KvStore, PluginHost, StoreRegistry};
pub use middleware::predicates;
pub use middleware::{
    ArgKind, Chain, ChainBuilder, CommandOption, CommandStep, Composed, Execution, Middleware,
    Next, Outcome, Step, StepMiddleware, Terminal, compose, step_fn,
};
pub use plugin::{
    LoadReport, METADATA_FILE, Plugin, PluginDescriptor, PluginManager, PluginMetadata,
    PluginState, PluginUnit, StaticUnitLoader, UnitLoader, unit_fn,
};
pub use router::{Route, RouteId, RouteOutcome, Router};

// Re-exported for `export_unit!`.
pub use linkme;
