//! The plugin lifecycle manager.
//!
//! ```text
//! absent ──enable──► loading ──ok──► active ──disable──► absent
//!                       │                │
//!                       └──err──► error  └──reboot──► active
//! ```
//!
//! The active map holds at most one slot per name. A name is reserved as
//! loading before the first suspension point of `enable`, and stays
//! reserved as unloading until `disable` or `reboot` has destroyed the
//! instance, purged its code and saved the state. An enable that meets a
//! loading or active slot gets [`LifecycleError::AlreadyActive`]; any
//! operation that meets an unloading slot gets [`LifecycleError::Busy`].

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::instance::Plugin;
use super::metadata::{METADATA_FILE, PluginMetadata};
use super::registry::CodeRegistry;
use super::resolver::{PluginDescriptor, discover};
use super::state::{PluginState, StateStore};
use super::unit::UnitLoader;
use crate::error::{LifecycleError, LifecycleResult};
use crate::host::PluginHost;

enum Slot {
    Loading,
    Active(Plugin),
    Unloading,
}

/// Outcome of [`PluginManager::load_saved`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub success: usize,
    pub failed: usize,
}

/// Enables, disables and reboots plugins, and persists the result.
pub struct PluginManager {
    host: PluginHost,
    plugin_dir: PathBuf,
    registry: CodeRegistry,
    store: StateStore,
    state: Mutex<PluginState>,
    active: Mutex<HashMap<String, Slot>>,
}

impl PluginManager {
    pub fn new(
        host: PluginHost,
        plugin_dir: impl Into<PathBuf>,
        state_file: impl Into<PathBuf>,
        loader: Arc<dyn UnitLoader>,
    ) -> Self {
        Self {
            host,
            plugin_dir: plugin_dir.into(),
            registry: CodeRegistry::new(loader),
            store: StateStore::new(state_file),
            state: Mutex::new(PluginState::default()),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Loads the persisted state, creating the file if needed.
    pub async fn init(&self) -> LifecycleResult<()> {
        let loaded = self.store.load_or_create().await?;
        *self.state.lock() = loaded;
        Ok(())
    }

    pub fn host(&self) -> &PluginHost {
        &self.host
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Lists installed plugins, sorted by name.
    pub async fn discover(&self) -> LifecycleResult<Vec<PluginDescriptor>> {
        discover(&self.plugin_dir).await
    }

    /// Snapshot of the persisted state.
    pub fn state(&self) -> PluginState {
        self.state.lock().clone()
    }

    pub fn is_active(&self, name: &str) -> bool {
        matches!(self.active.lock().get(name), Some(Slot::Active(_)))
    }

    pub fn plugin(&self, name: &str) -> Option<Plugin> {
        match self.active.lock().get(name) {
            Some(Slot::Active(plugin)) => Some(plugin.clone()),
            _ => None,
        }
    }

    /// Active plugins with their current metadata, sorted by name.
    pub fn active_plugins(&self) -> Vec<(String, PluginMetadata)> {
        let mut plugins: Vec<_> = self
            .active
            .lock()
            .iter()
            .filter_map(|(name, slot)| match slot {
                Slot::Active(plugin) => Some((name.clone(), plugin.metadata())),
                Slot::Loading | Slot::Unloading => None,
            })
            .collect();
        plugins.sort_by(|a, b| a.0.cmp(&b.0));
        plugins
    }

    pub fn active_names(&self) -> Vec<String> {
        self.active_plugins().into_iter().map(|(name, _)| name).collect()
    }

    /// Number of times `name`'s code has been loaded.
    pub fn generation(&self, name: &str) -> u64 {
        self.registry.generation(name)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Loads and activates `name`, then records it as enabled.
    pub async fn enable(&self, name: &str) -> LifecycleResult<()> {
        let result = self.activate(name).await;
        if let Err(
            LifecycleError::AlreadyActive(_)
            | LifecycleError::Busy(_)
            | LifecycleError::InvalidName(_),
        ) = result
        {
            return result;
        }
        self.record(name, &result);
        self.persist_logged().await;
        result
    }

    /// Tears down `name` and forgets it.
    pub async fn disable(&self, name: &str) -> LifecycleResult<()> {
        let plugin = self.begin_unload(name)?;
        self.teardown(name, plugin).await;
        self.state.lock().mark_disabled(name);
        self.persist_logged().await;
        self.active.lock().remove(name);
        Ok(())
    }

    /// Reloads `name` from fresh code. Enables it if it is not active.
    pub async fn reboot(&self, name: &str) -> LifecycleResult<()> {
        let plugin = match self.begin_unload(name) {
            Ok(plugin) => plugin,
            Err(LifecycleError::NotActive(_)) => return self.enable(name).await,
            Err(e) => return Err(e),
        };

        info!(plugin = %name, "Rebooting plugin");
        self.teardown(name, plugin).await;
        self.active.lock().insert(name.to_string(), Slot::Loading);
        let result = self.load(name).await;
        self.record(name, &result);
        self.persist_logged().await;
        result
    }

    /// Activates every enabled plugin concurrently.
    ///
    /// Failures are captured per plugin and recorded; the state is persisted
    /// once at the end.
    pub async fn load_saved(&self) -> LifecycleResult<LoadReport> {
        let names: Vec<String> = {
            let mut state = self.state.lock();
            state.reset_derived();
            state.enabled.iter().cloned().collect()
        };
        info!(count = names.len(), "Loading saved plugins");

        let results = join_all(names.iter().map(|name| async move {
            let result = match self.activate(name).await {
                Err(LifecycleError::AlreadyActive(_)) => Ok(()),
                other => other,
            };
            (name, result)
        }))
        .await;

        let mut report = LoadReport::default();
        for (name, result) in &results {
            self.record(name, result);
            match result {
                Ok(()) => report.success += 1,
                Err(_) => report.failed += 1,
            }
        }

        self.persist_logged().await;
        info!(success = report.success, failed = report.failed, "Saved plugins loaded");
        Ok(report)
    }

    /// Tears down every active plugin without touching durable intent, and
    /// writes each plugin's metadata back to its `plugin.json`.
    pub async fn shutdown(&self) -> LifecycleResult<()> {
        let plugins: Vec<(String, Plugin)> = {
            let mut active = self.active.lock();
            let names: Vec<String> = active
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Active(_)))
                .map(|(name, _)| name.clone())
                .collect();
            names
                .into_iter()
                .filter_map(|name| match active.insert(name.clone(), Slot::Unloading) {
                    Some(Slot::Active(plugin)) => Some((name, plugin)),
                    _ => None,
                })
                .collect()
        };

        for (name, plugin) in plugins {
            let metadata = plugin.metadata();
            let dir = self.plugin_dir.join(&name);
            self.teardown(&name, plugin).await;
            if matches!(tokio::fs::try_exists(dir.join(METADATA_FILE)).await, Ok(true))
                && let Err(e) = metadata.write(&dir).await
            {
                warn!(plugin = %name, error = %e, "Failed to write plugin metadata");
            }
            self.active.lock().remove(&name);
        }

        self.persist().await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Swaps an active slot for an unloading reservation and hands out the
    /// instance.
    fn begin_unload(&self, name: &str) -> LifecycleResult<Plugin> {
        let mut active = self.active.lock();
        match active.remove(name) {
            Some(Slot::Active(plugin)) => {
                active.insert(name.to_string(), Slot::Unloading);
                Ok(plugin)
            }
            Some(slot) => {
                active.insert(name.to_string(), slot);
                Err(LifecycleError::Busy(name.to_string()))
            }
            None => Err(LifecycleError::NotActive(name.to_string())),
        }
    }

    fn record(&self, name: &str, result: &LifecycleResult<()>) {
        let mut state = self.state.lock();
        match result {
            Ok(()) => state.mark_active(name),
            Err(_) => state.mark_failed(name),
        }
    }

    async fn persist(&self) -> LifecycleResult<()> {
        let snapshot = self.state.lock().clone();
        self.store.save(&snapshot).await
    }

    /// Saves the state. The in-memory state and the active map stay
    /// authoritative if the write fails.
    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            error!(path = %self.store.path().display(), error = %e, "Failed to save plugin state");
        }
    }

    /// Reserves the name, then loads it. State is not touched.
    async fn activate(&self, name: &str) -> LifecycleResult<()> {
        check_name(name)?;
        {
            let mut active = self.active.lock();
            match active.get(name) {
                Some(Slot::Unloading) => return Err(LifecycleError::Busy(name.to_string())),
                Some(_) => return Err(LifecycleError::AlreadyActive(name.to_string())),
                None => {
                    active.insert(name.to_string(), Slot::Loading);
                }
            }
        }
        self.load(name).await
    }

    /// Loads the unit and runs its setup. The caller holds the loading
    /// reservation.
    async fn load(&self, name: &str) -> LifecycleResult<()> {
        info!(plugin = %name, "Loading plugin");
        let dir = self.plugin_dir.join(name);
        match self.instantiate(name, &dir).await {
            Ok(plugin) => {
                self.active.lock().insert(name.to_string(), Slot::Active(plugin));
                info!(plugin = %name, generation = self.registry.generation(name), "Plugin loaded");
                Ok(())
            }
            Err(e) => {
                self.active.lock().remove(name);
                self.registry.purge(&dir);
                error!(plugin = %name, error = %e, "Plugin failed to load");
                Err(e)
            }
        }
    }

    async fn instantiate(&self, name: &str, dir: &Path) -> LifecycleResult<Plugin> {
        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(LifecycleError::NotFound(name.to_string())),
        }

        let (unit, generation) = self.registry.require(name, dir)?;
        let mut metadata = PluginMetadata::read_optional(dir)
            .await
            .map_err(|e| LifecycleError::load(name, e))?
            .unwrap_or_default();
        if metadata.name.is_none() {
            metadata.name = Some(name.to_string());
        }
        debug!(plugin = %name, generation, "Running plugin setup");

        match AssertUnwindSafe(unit.setup(self.host.clone(), metadata))
            .catch_unwind()
            .await
        {
            Ok(Ok(plugin)) => Ok(plugin),
            Ok(Err(e)) => Err(LifecycleError::setup(name, e)),
            Err(panic) => Err(LifecycleError::setup(name, panic_message(&*panic))),
        }
    }

    /// Destroys the instance and purges its code.
    async fn teardown(&self, name: &str, plugin: Plugin) {
        info!(plugin = %name, "Unloading plugin");
        plugin.destroy().await;
        self.registry.purge(&self.plugin_dir.join(name));
    }
}

/// A plugin name must be one plain directory under the plugin root.
fn check_name(name: &str) -> LifecycleResult<()> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if single && !name.contains(['/', '\\']) {
        Ok(())
    } else {
        Err(LifecycleError::InvalidName(name.to_string()))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        String::from("panicked")
    }
}
