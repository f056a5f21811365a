//! The persisted plugin state record.
//!
//! `enabled` is durable intent: the plugins an operator switched on. The
//! other two sets are derived from the last load attempt of each enabled
//! plugin:
//!
//! - `actived ∩ error = ∅`
//! - `actived ∪ error ⊆ enabled`

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{LifecycleError, LifecycleResult};

/// Name sets persisted across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginState {
    pub enabled: BTreeSet<String>,
    pub error: BTreeSet<String>,
    pub actived: BTreeSet<String>,
}

impl PluginState {
    /// Records a successful load.
    pub fn mark_active(&mut self, name: &str) {
        self.enabled.insert(name.to_string());
        self.actived.insert(name.to_string());
        self.error.remove(name);
    }

    /// Records a failed load. The failure counts as an error only if the
    /// plugin is meant to be enabled.
    pub fn mark_failed(&mut self, name: &str) {
        self.actived.remove(name);
        if self.enabled.contains(name) {
            self.error.insert(name.to_string());
        }
    }

    /// Forgets `name` entirely.
    pub fn mark_disabled(&mut self, name: &str) {
        self.enabled.remove(name);
        self.actived.remove(name);
        self.error.remove(name);
    }

    /// Clears the derived sets before a fresh load pass.
    pub fn reset_derived(&mut self) {
        self.actived.clear();
        self.error.clear();
    }

    pub fn is_consistent(&self) -> bool {
        self.actived.is_disjoint(&self.error)
            && self.actived.is_subset(&self.enabled)
            && self.error.is_subset(&self.enabled)
    }
}

/// File-backed [`PluginState`].
///
/// Writes go to a temporary file that is renamed over the target, one
/// write at a time.
pub struct StateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the record, creating an empty one if the file does not exist.
    pub async fn load_or_create(&self) -> LifecycleResult<PluginState> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let state: PluginState = serde_json::from_slice(&bytes).map_err(|e| {
                    LifecycleError::State(format!("{}: {e}", self.path.display()))
                })?;
                debug!(path = %self.path.display(), enabled = state.enabled.len(), "Loaded plugin state");
                Ok(state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "Creating empty plugin state");
                let state = PluginState::default();
                self.save(&state).await?;
                Ok(state)
            }
            Err(e) => Err(LifecycleError::State(e.to_string())),
        }
    }

    pub async fn save(&self, state: &PluginState) -> LifecycleResult<()> {
        let _guard = self.write_lock.lock().await;

        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| LifecycleError::State(e.to_string()))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_keep_invariants() {
        let mut state = PluginState::default();

        state.mark_active("echo");
        state.mark_failed("ghost");
        assert!(state.is_consistent());
        assert!(!state.error.contains("ghost"));

        state.enabled.insert("weather".into());
        state.mark_failed("weather");
        assert!(state.error.contains("weather"));

        state.mark_active("weather");
        assert!(!state.error.contains("weather"));
        assert!(state.is_consistent());

        state.mark_disabled("echo");
        assert!(!state.enabled.contains("echo"));
        assert!(!state.actived.contains("echo"));
        assert!(state.is_consistent());
    }

    #[tokio::test]
    async fn test_round_trip_and_create() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state/plugins.json"));

        let state = store.load_or_create().await.unwrap();
        assert_eq!(state, PluginState::default());
        assert!(store.path().exists());

        let mut state = state;
        state.mark_active("b");
        state.mark_active("a");
        store.save(&state).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["enabled"], serde_json::json!(["a", "b"]));
        assert_eq!(store.load_or_create().await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = StateStore::new(path).load_or_create().await.unwrap_err();
        assert!(matches!(err, LifecycleError::State(_)));
    }
}
