//! Plugin metadata, read from `plugin.json` in the unit directory.

use std::path::Path;

use cobalt_core::MessageEvent;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LifecycleError, LifecycleResult};

/// File name of the metadata document inside a unit directory.
pub const METADATA_FILE: &str = "plugin.json";

/// Descriptive metadata and free-form configuration of a plugin.
///
/// Unknown keys are preserved in [`extra`](Self::extra) and written back
/// unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Text the concatenated message must start with to reach the plugin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Users whose messages never reach the plugin.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub black_users: Vec<i64>,
    /// Groups whose messages never reach the plugin.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub black_groups: Vec<i64>,
    /// Whether replies quote the triggering message by default.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub quote: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PluginMetadata {
    /// Reads `<dir>/plugin.json`.
    pub async fn read(dir: &Path) -> LifecycleResult<Self> {
        let path = dir.join(METADATA_FILE);
        let bytes = tokio::fs::read(&path).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| LifecycleError::Io(format!("{}: {e}", path.display())))
    }

    /// Reads `<dir>/plugin.json`, returning `None` if the file is absent.
    pub async fn read_optional(dir: &Path) -> LifecycleResult<Option<Self>> {
        if !tokio::fs::try_exists(dir.join(METADATA_FILE)).await? {
            return Ok(None);
        }
        Self::read(dir).await.map(Some)
    }

    /// Writes `<dir>/plugin.json`, pretty-printed.
    pub async fn write(&self, dir: &Path) -> LifecycleResult<()> {
        let path = dir.join(METADATA_FILE);
        let bytes =
            serde_json::to_vec_pretty(self).map_err(|e| LifecycleError::Io(e.to_string()))?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    /// Whether `event` passes the deny-lists.
    pub fn allows(&self, event: &MessageEvent) -> bool {
        if self.black_users.contains(&event.user_id()) {
            return false;
        }
        match event.group_id() {
            Some(group_id) => !self.black_groups.contains(&group_id),
            None => true,
        }
    }

    /// Whether `text` starts with the configured prefix. No prefix matches all.
    pub fn matches_prefix(&self, text: &str) -> bool {
        self.prefix
            .as_deref()
            .is_none_or(|prefix| text.starts_with(prefix))
    }

    /// Deserializes the free-form configuration keys as `T`.
    pub fn config<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(Value::Object(self.extra.clone()))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra.insert(key.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_preserve_extra() {
        let meta: PluginMetadata = serde_json::from_value(json!({
            "name": "echo",
            "version": "1.0.0",
            "prefix": "/echo",
            "blackUsers": [5],
            "blackGroups": [9],
            "quote": true,
            "type": "module",
            "apiKey": "secret"
        }))
        .unwrap();

        assert_eq!(meta.name.as_deref(), Some("echo"));
        assert_eq!(meta.black_users, vec![5]);
        assert!(meta.quote);
        assert_eq!(meta.kind.as_deref(), Some("module"));
        assert_eq!(meta.get("apiKey"), Some(&json!("secret")));

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["blackUsers"], json!([5]));
        assert_eq!(back["apiKey"], json!("secret"));
    }

    #[test]
    fn test_deny_lists() {
        let meta = PluginMetadata {
            black_users: vec![5],
            black_groups: vec![9],
            ..Default::default()
        };

        assert!(meta.allows(&MessageEvent::private(1, "x")));
        assert!(!meta.allows(&MessageEvent::private(5, "x")));
        assert!(meta.allows(&MessageEvent::group(8, 1, "x")));
        assert!(!meta.allows(&MessageEvent::group(9, 1, "x")));
        assert!(!meta.allows(&MessageEvent::group(8, 5, "x")));
    }

    #[test]
    fn test_prefix() {
        let mut meta = PluginMetadata::default();
        assert!(meta.matches_prefix("anything"));

        meta.prefix = Some("/w".into());
        assert!(meta.matches_prefix("/weather"));
        assert!(!meta.matches_prefix("weather"));
    }

    #[test]
    fn test_typed_config() {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Conf {
            api_key: String,
        }

        let mut meta = PluginMetadata::default();
        meta.set("apiKey", "k");
        assert_eq!(meta.config::<Conf>().unwrap().api_key, "k");
    }

    #[tokio::test]
    async fn test_read_write() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PluginMetadata::read_optional(dir.path()).await.unwrap().is_none());

        let meta = PluginMetadata {
            version: Some("0.2.0".into()),
            ..Default::default()
        };
        meta.write(dir.path()).await.unwrap();

        assert_eq!(PluginMetadata::read(dir.path()).await.unwrap(), meta);

        tokio::fs::write(dir.path().join(METADATA_FILE), "{").await.unwrap();
        assert!(PluginMetadata::read_optional(dir.path()).await.is_err());
    }
}
