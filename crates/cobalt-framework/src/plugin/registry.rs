//! The code registry: which unit code is currently loaded.
//!
//! Loaded code is tracked as a module graph keyed by path. The root module of
//! a unit is its directory; its children are the modules the unit declares.
//! Relative module paths resolve under the unit directory, absolute paths
//! name modules shared between units.
//!
//! ```text
//! plugins/echo            (root, generation 2)
//!   ├─ plugins/echo/fmt   (private, purged with the unit)
//!   └─ /opt/shared/http   (shared, survives the purge)
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::unit::{PluginUnit, UnitLoader};
use crate::error::{LifecycleError, LifecycleResult};

#[derive(Debug, Default)]
struct ModuleNode {
    parents: BTreeSet<PathBuf>,
    children: BTreeSet<PathBuf>,
}

struct LoadedEntry {
    root: PathBuf,
    unit: Arc<dyn PluginUnit>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, LoadedEntry>,
    generations: HashMap<String, u64>,
    modules: HashMap<PathBuf, ModuleNode>,
}

/// Cache of loaded unit code.
pub struct CodeRegistry {
    loader: Arc<dyn UnitLoader>,
    state: Mutex<RegistryState>,
}

impl CodeRegistry {
    pub fn new(loader: Arc<dyn UnitLoader>) -> Self {
        Self {
            loader,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Returns the loaded unit for `name`, loading it from `dir` if needed.
    ///
    /// Every fresh load bumps the unit's generation.
    pub fn require(&self, name: &str, dir: &Path) -> LifecycleResult<(Arc<dyn PluginUnit>, u64)> {
        let mut state = self.state.lock();

        if let Some(entry) = state.entries.get(name)
            && state.modules.contains_key(&entry.root)
        {
            let generation = state.generations.get(name).copied().unwrap_or_default();
            trace!(plugin = name, generation, "Unit cache hit");
            return Ok((Arc::clone(&entry.unit), generation));
        }

        let loaded = self
            .loader
            .load(name, dir)
            .map_err(|e| LifecycleError::load(name, e))?;

        let root = dir.to_path_buf();
        let children: BTreeSet<PathBuf> = loaded
            .modules
            .iter()
            .map(|m| {
                let path = Path::new(m);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    root.join(path)
                }
            })
            .collect();

        for child in &children {
            state
                .modules
                .entry(child.clone())
                .or_default()
                .parents
                .insert(root.clone());
        }
        state.modules.entry(root.clone()).or_default().children = children;

        let generation = {
            let counter = state.generations.entry(name.to_string()).or_default();
            *counter += 1;
            *counter
        };
        state.entries.insert(
            name.to_string(),
            LoadedEntry {
                root,
                unit: Arc::clone(&loaded.unit),
            },
        );

        debug!(plugin = name, generation, "Loaded unit code");
        Ok((loaded.unit, generation))
    }

    /// Evicts the unit rooted at `dir` and every module under `dir`.
    ///
    /// Modules outside `dir` are only unlinked. Returns how many modules were
    /// evicted.
    pub fn purge(&self, dir: &Path) -> usize {
        let mut state = self.state.lock();
        state.entries.retain(|_, entry| entry.root != dir);
        let evicted = evict(&mut state.modules, dir, dir);
        if evicted > 0 {
            debug!(dir = %dir.display(), evicted, "Purged unit code");
        }
        evicted
    }

    /// Number of times `name` has been loaded.
    pub fn generation(&self, name: &str) -> u64 {
        self.state
            .lock()
            .generations
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.state.lock().entries.contains_key(name)
    }

    pub fn contains_module(&self, path: &Path) -> bool {
        self.state.lock().modules.contains_key(path)
    }

    pub fn module_count(&self) -> usize {
        self.state.lock().modules.len()
    }
}

fn evict(modules: &mut HashMap<PathBuf, ModuleNode>, path: &Path, scope: &Path) -> usize {
    let Some(node) = modules.remove(path) else {
        return 0;
    };
    let mut evicted = 1;

    for child in &node.children {
        if child.starts_with(scope) {
            evicted += evict(modules, child, scope);
        } else if let Some(shared) = modules.get_mut(child) {
            shared.parents.remove(path);
        }
    }

    for parent in &node.parents {
        if let Some(parent) = modules.get_mut(parent) {
            parent.children.remove(path);
        }
    }

    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::unit::StaticUnitLoader;
    use crate::plugin::{Plugin, PluginMetadata};
    use crate::host::PluginHost;
    use crate::error::BoxError;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl PluginUnit for Noop {
        async fn setup(&self, host: PluginHost, metadata: PluginMetadata) -> Result<Plugin, BoxError> {
            Ok(host.plugin(metadata))
        }
    }

    fn registry() -> CodeRegistry {
        let loader = StaticUnitLoader::new();
        loader.register_with_modules("echo", ["fmt", "/opt/shared/http"], || Noop);
        loader.register_with_modules("wiki", ["/opt/shared/http"], || Noop);
        CodeRegistry::new(Arc::new(loader))
    }

    #[test]
    fn test_require_caches_and_counts_generations() {
        let registry = registry();
        let dir = Path::new("plugins/echo");

        let (first, g1) = registry.require("echo", dir).unwrap();
        let (second, g2) = registry.require("echo", dir).unwrap();
        assert_eq!(g1, 1);
        assert_eq!(g2, 1);
        assert!(Arc::ptr_eq(&first, &second));

        registry.purge(dir);
        let (third, g3) = registry.require("echo", dir).unwrap();
        assert_eq!(g3, 2);
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_purge_keeps_shared_modules() {
        let registry = registry();
        registry.require("echo", Path::new("plugins/echo")).unwrap();
        registry.require("wiki", Path::new("plugins/wiki")).unwrap();
        assert_eq!(registry.module_count(), 4);

        let evicted = registry.purge(Path::new("plugins/echo"));

        assert_eq!(evicted, 2);
        assert!(!registry.is_loaded("echo"));
        assert!(!registry.contains_module(Path::new("plugins/echo/fmt")));
        assert!(registry.contains_module(Path::new("/opt/shared/http")));
        assert!(registry.is_loaded("wiki"));
    }

    #[test]
    fn test_purge_unknown_dir_is_noop() {
        let registry = registry();
        assert_eq!(registry.purge(Path::new("plugins/none")), 0);
    }

    #[test]
    fn test_load_failure() {
        let registry = registry();
        let err = registry.require("ghost", Path::new("plugins/ghost")).err().unwrap();
        assert!(matches!(err, LifecycleError::Load { ref name, .. } if name == "ghost"));
        assert_eq!(registry.generation("ghost"), 0);
    }
}
