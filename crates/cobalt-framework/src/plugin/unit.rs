//! Plugin units: the code behind a plugin directory.
//!
//! A unit is registered under its directory name, either at link time with
//! [`export_unit!`](crate::export_unit) or explicitly on a
//! [`StaticUnitLoader`].
//!
//! ```rust,ignore
//! struct Echo;
//!
//! #[async_trait]
//! impl PluginUnit for Echo {
//!     async fn setup(&self, host: PluginHost, metadata: PluginMetadata) -> Result<Plugin, BoxError> {
//!         let plugin = host.plugin(metadata);
//!         plugin.on_message(Chain::builder().prefix(["/echo"]).build(), |ctx, bag| async move {
//!             ctx.reply(bag.get::<String>("prefix").unwrap_or_default()).await?;
//!             Ok(())
//!         })?;
//!         Ok(plugin)
//!     }
//! }
//!
//! export_unit!("echo", Echo);
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use linkme::distributed_slice;
use parking_lot::RwLock;

use super::Plugin;
use super::metadata::PluginMetadata;
use crate::error::BoxError;
use crate::host::PluginHost;

/// Entry point of a plugin.
#[async_trait]
pub trait PluginUnit: Send + Sync + 'static {
    /// Builds the runtime instance. Everything the instance acquires is
    /// released by [`Plugin::destroy`].
    async fn setup(&self, host: PluginHost, metadata: PluginMetadata) -> Result<Plugin, BoxError>;
}

/// A unit backed by an async closure.
pub struct FnUnit<F>(F);

/// Creates a unit from an async closure.
pub fn unit_fn<F, Fut>(f: F) -> FnUnit<F>
where
    F: Fn(PluginHost, PluginMetadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Plugin, BoxError>> + Send + 'static,
{
    FnUnit(f)
}

#[async_trait]
impl<F, Fut> PluginUnit for FnUnit<F>
where
    F: Fn(PluginHost, PluginMetadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Plugin, BoxError>> + Send + 'static,
{
    async fn setup(&self, host: PluginHost, metadata: PluginMetadata) -> Result<Plugin, BoxError> {
        (self.0)(host, metadata).await
    }
}

/// A link-time registration produced by [`export_unit!`](crate::export_unit).
pub struct UnitEntry {
    /// Directory name the unit serves.
    pub name: &'static str,
    pub create: fn() -> Arc<dyn PluginUnit>,
    /// Modules the unit pulls in, relative to its directory or absolute.
    pub modules: &'static [&'static str],
}

/// Units registered with [`export_unit!`](crate::export_unit).
#[distributed_slice]
pub static PLUGIN_UNITS: [UnitEntry];

/// Registers a unit for the default loader.
///
/// ```rust,ignore
/// export_unit!("weather", Weather::default());
/// export_unit!("weather", Weather::default(), modules = ["api", "/opt/shared/geo"]);
/// ```
#[macro_export]
macro_rules! export_unit {
    ($name:literal, $unit:expr $(, modules = [$($module:literal),* $(,)?])? $(,)?) => {
        const _: () = {
            fn create() -> ::std::sync::Arc<dyn $crate::plugin::PluginUnit> {
                ::std::sync::Arc::new($unit)
            }

            #[$crate::linkme::distributed_slice($crate::plugin::PLUGIN_UNITS)]
            #[linkme(crate = $crate::linkme)]
            static UNIT: $crate::plugin::UnitEntry = $crate::plugin::UnitEntry {
                name: $name,
                create,
                modules: &[$($($module),*)?],
            };
        };
    };
}

/// A freshly loaded unit and the modules it declares.
#[derive(Clone)]
pub struct LoadedUnit {
    pub unit: Arc<dyn PluginUnit>,
    pub modules: Vec<String>,
}

/// Resolves a plugin directory to its code.
pub trait UnitLoader: Send + Sync + 'static {
    fn load(&self, name: &str, dir: &Path) -> Result<LoadedUnit, BoxError>;
}

type UnitFactory = Arc<dyn Fn() -> Arc<dyn PluginUnit> + Send + Sync>;

/// Loader over link-time and explicitly registered units.
///
/// Explicit registrations take precedence over [`PLUGIN_UNITS`].
#[derive(Default)]
pub struct StaticUnitLoader {
    registered: RwLock<HashMap<String, (UnitFactory, Vec<String>)>>,
}

impl StaticUnitLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`, replacing any previous registration.
    pub fn register<F, U>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> U + Send + Sync + 'static,
        U: PluginUnit,
    {
        self.register_with_modules(name, Vec::<String>::new(), factory);
    }

    pub fn register_with_modules<F, U>(
        &self,
        name: impl Into<String>,
        modules: impl IntoIterator<Item = impl Into<String>>,
        factory: F,
    ) where
        F: Fn() -> U + Send + Sync + 'static,
        U: PluginUnit,
    {
        let factory: UnitFactory = Arc::new(move || Arc::new(factory()) as Arc<dyn PluginUnit>);
        let modules = modules.into_iter().map(Into::into).collect();
        self.registered
            .write()
            .insert(name.into(), (factory, modules));
    }

    /// Names of every known unit, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registered.read().keys().cloned().collect();
        names.extend(PLUGIN_UNITS.iter().map(|e| e.name.to_string()));
        names.sort();
        names.dedup();
        names
    }
}

impl UnitLoader for StaticUnitLoader {
    fn load(&self, name: &str, _dir: &Path) -> Result<LoadedUnit, BoxError> {
        if let Some((factory, modules)) = self.registered.read().get(name) {
            return Ok(LoadedUnit {
                unit: factory(),
                modules: modules.clone(),
            });
        }

        PLUGIN_UNITS
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| LoadedUnit {
                unit: (entry.create)(),
                modules: entry.modules.iter().map(|m| m.to_string()).collect(),
            })
            .ok_or_else(|| format!("no unit registered for '{name}'").into())
    }
}
