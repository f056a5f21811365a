//! Plugins: discovery, code loading, runtime instances and lifecycle.

pub mod instance;
pub mod manager;
pub mod metadata;
pub mod registry;
pub mod resolver;
pub mod state;
pub mod unit;

pub use instance::Plugin;
pub use manager::{LoadReport, PluginManager};
pub use metadata::{METADATA_FILE, PluginMetadata};
pub use registry::CodeRegistry;
pub use resolver::{PluginDescriptor, discover};
pub use state::{PluginState, StateStore};
pub use unit::{
    FnUnit, LoadedUnit, PLUGIN_UNITS, PluginUnit, StaticUnitLoader, UnitEntry, UnitLoader,
    unit_fn,
};
