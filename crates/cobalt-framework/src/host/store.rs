//! JSON-file-backed key-value stores.
//!
//! Each store lives at `<root>/<location>.json`. A location may be open at
//! most once at a time; writes go through to disk immediately.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::ResourceError;

/// Returns `true` if `location` is a single, non-hidden path component.
fn valid_location(location: &str) -> bool {
    !location.is_empty()
        && !location.starts_with('.')
        && location
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

struct KvInner {
    location: String,
    path: PathBuf,
    data: tokio::sync::Mutex<Map<String, Value>>,
}

/// Handle to one open store. Clones share the same data.
#[derive(Clone)]
pub struct KvStore {
    inner: Arc<KvInner>,
}

impl KvStore {
    pub fn location(&self) -> &str {
        &self.inner.location
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let data = self.inner.data.lock().await;
        data.get(key).and_then(|v| T::deserialize(v).ok())
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.data.lock().await.contains_key(key)
    }

    pub async fn put(&self, key: impl Into<String>, value: impl Serialize) -> Result<(), ResourceError> {
        let value = serde_json::to_value(value).map_err(|e| ResourceError::Io(e.to_string()))?;
        let mut data = self.inner.data.lock().await;
        data.insert(key.into(), value);
        self.flush(&data).await
    }

    /// Removes `key`. Returns whether it was present.
    pub async fn delete(&self, key: &str) -> Result<bool, ResourceError> {
        let mut data = self.inner.data.lock().await;
        if data.remove(key).is_none() {
            return Ok(false);
        }
        self.flush(&data).await?;
        Ok(true)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.inner.data.lock().await.keys().cloned().collect()
    }

    async fn flush(&self, data: &Map<String, Value>) -> Result<(), ResourceError> {
        let bytes = serde_json::to_vec_pretty(data).map_err(|e| ResourceError::Io(e.to_string()))?;
        let tmp = self.inner.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.inner.path).await?;
        Ok(())
    }
}

/// Tracks which store locations are open.
pub struct StoreRegistry {
    root: PathBuf,
    open: Mutex<HashMap<String, KvStore>>,
}

impl StoreRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Opens `location`, loading existing contents from disk.
    pub async fn open(&self, location: &str) -> Result<KvStore, ResourceError> {
        if !valid_location(location) {
            return Err(ResourceError::InvalidLocation(location.to_string()));
        }
        if self.is_open(location) {
            return Err(ResourceError::StoreAlreadyOpen(location.to_string()));
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(format!("{location}.json"));
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Map<String, Value>>(&bytes)
                .map_err(|e| ResourceError::Io(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        let store = KvStore {
            inner: Arc::new(KvInner {
                location: location.to_string(),
                path,
                data: tokio::sync::Mutex::new(data),
            }),
        };

        let mut open = self.open.lock();
        if open.contains_key(location) {
            return Err(ResourceError::StoreAlreadyOpen(location.to_string()));
        }
        open.insert(location.to_string(), store.clone());
        info!(location, "Opened store");
        Ok(store)
    }

    pub fn get(&self, location: &str) -> Result<KvStore, ResourceError> {
        self.open
            .lock()
            .get(location)
            .cloned()
            .ok_or_else(|| ResourceError::StoreNotOpen(location.to_string()))
    }

    pub fn close(&self, location: &str) -> Result<(), ResourceError> {
        match self.open.lock().remove(location) {
            Some(_) => {
                debug!(location, "Closed store");
                Ok(())
            }
            None => Err(ResourceError::StoreNotOpen(location.to_string())),
        }
    }

    pub fn is_open(&self, location: &str) -> bool {
        self.open.lock().contains_key(location)
    }
}
