//! Plugin catalog: the unit directories found under the plugin root.

use std::path::{Path, PathBuf};

use tracing::warn;

use super::metadata::PluginMetadata;
use crate::error::LifecycleResult;

/// One installed plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginDescriptor {
    /// Directory name, the plugin's identity.
    pub name: String,
    pub dir: PathBuf,
    pub metadata: PluginMetadata,
}

/// Lists every unit directory under `root`, sorted by name.
///
/// A directory without `plugin.json` is listed with default metadata. One
/// whose metadata cannot be parsed is skipped. A missing root yields an
/// empty catalog.
pub async fn discover(root: &Path) -> LifecycleResult<Vec<PluginDescriptor>> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(root = %root.display(), "Plugin directory does not exist");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut catalog = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let dir = entry.path();
        match PluginMetadata::read_optional(&dir).await {
            Ok(Some(metadata)) => catalog.push(PluginDescriptor { name, dir, metadata }),
            Ok(None) => {
                warn!(plugin = %name, "No plugin.json, using default metadata");
                catalog.push(PluginDescriptor {
                    name,
                    dir,
                    metadata: PluginMetadata::default(),
                });
            }
            Err(e) => warn!(plugin = %name, error = %e, "Skipping plugin with malformed metadata"),
        }
    }

    catalog.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discover_sorted_with_defaults() {
        let root = tempfile::tempdir().unwrap();
        for name in ["zeta", "alpha", "broken", "bare"] {
            std::fs::create_dir(root.path().join(name)).unwrap();
        }
        std::fs::write(root.path().join("alpha/plugin.json"), r#"{"version":"1.0.0"}"#).unwrap();
        std::fs::write(root.path().join("zeta/plugin.json"), r#"{"description":"z"}"#).unwrap();
        std::fs::write(root.path().join("broken/plugin.json"), "{").unwrap();
        std::fs::write(root.path().join("stray.txt"), "").unwrap();

        let catalog = discover(root.path()).await.unwrap();
        let names: Vec<&str> = catalog.iter().map(|d| d.name.as_str()).collect();

        assert_eq!(names, vec!["alpha", "bare", "zeta"]);
        assert_eq!(catalog[0].metadata.version.as_deref(), Some("1.0.0"));
        assert_eq!(catalog[1].metadata, PluginMetadata::default());
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let root = tempfile::tempdir().unwrap();
        assert!(discover(&root.path().join("nope")).await.unwrap().is_empty());
    }
}
