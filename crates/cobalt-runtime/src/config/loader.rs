//! Layered configuration loading with figment.
//!
//! Layers, lowest first: built-in defaults, programmatic merges, the
//! profile file (`cobalt.<profile>.toml`), the base file (`cobalt.toml`)
//! and `COBALT_*` environment variables, where `__` separates keys:
//! `COBALT_PLUGINS__DIR=/srv/plugins` sets `plugins.dir`.
//!
//! YAML files (`cobalt.yaml`, `cobalt.yml`) are searched with the
//! `yaml-config` feature.

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::CobaltConfig;
use super::validation::validate_config;

const ENV_PREFIX: &str = "COBALT_";
const PROFILE_VAR: &str = "COBALT_PROFILE";

/// Base file names tried in each search path, in order.
const FILE_NAMES: &[&str] = &[
    #[cfg(feature = "toml-config")]
    "cobalt.toml",
    #[cfg(feature = "toml-config")]
    "config.toml",
    #[cfg(feature = "yaml-config")]
    "cobalt.yaml",
    #[cfg(feature = "yaml-config")]
    "cobalt.yml",
    #[cfg(feature = "yaml-config")]
    "config.yaml",
    #[cfg(feature = "yaml-config")]
    "config.yml",
];

/// Selects the profile file layered under the base file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name, accepting the usual short forms.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `COBALT_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ConfigLoader {
    /// Programmatic layers merged over the defaults.
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Replaces the search when set.
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Adds the user config directory (`~/.config/cobalt` on Linux).
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join("cobalt")),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    pub fn merge(mut self, config: CobaltConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads, extracts and validates the configuration.
    pub fn load(self) -> ConfigResult<CobaltConfig> {
        let profile = self.profile.clone();
        let config: CobaltConfig = self.build_figment()?.extract().map_err(|e| {
            ConfigError::ParseError(format!("Failed to extract configuration: {e}"))
        })?;
        validate_config(&config)?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            plugin_dir = %config.plugins.dir.display(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn build_figment(self) -> ConfigResult<Figment> {
        let mut figment =
            Figment::from(Serialized::defaults(CobaltConfig::default())).merge(self.figment.clone());

        figment = match &self.config_file {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading configuration file");
                merge_file(figment, path)?
            }
            Some(path) => return Err(ConfigError::FileNotFound(path.clone())),
            None => self.merge_search_paths(figment)?,
        };

        if self.load_env {
            figment = figment.merge(
                Env::prefixed(ENV_PREFIX)
                    .ignore(&["PROFILE"])
                    .split("__"),
            );
        }
        Ok(figment)
    }

    /// Merges the first base file found, preceded by its profile variant.
    fn merge_search_paths(&self, mut figment: Figment) -> ConfigResult<Figment> {
        let mut search_paths = self.search_paths.clone();
        if search_paths.is_empty() {
            search_paths.extend(std::env::current_dir().ok());
            search_paths.extend(dirs::config_dir().map(|dir| dir.join("cobalt")));
        }

        for dir in &search_paths {
            for name in FILE_NAMES {
                let base = dir.join(name);
                if !base.exists() {
                    continue;
                }
                if let Some((stem, ext)) = name.rsplit_once('.') {
                    let profiled = dir.join(format!("{stem}.{}.{ext}", self.profile));
                    if profiled.exists() {
                        debug!(path = %profiled.display(), "Loading profile configuration");
                        figment = merge_file(figment, &profiled)?;
                    }
                }
                info!(path = %base.display(), "Loading configuration file");
                return merge_file(figment, &base);
            }
        }

        warn!(paths = ?search_paths, "No configuration file found, using defaults");
        Ok(figment)
    }
}

/// Merges one file, dispatching on the extensions enabled by features.
#[allow(unused_variables)]
fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        #[cfg(feature = "toml-config")]
        "toml" => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        _ => Err(ConfigError::ParseError(format!(
            "Unsupported or disabled configuration file format: .{ext}"
        ))),
    }
}

/// Loads configuration from the current directory and the user config
/// directory, with environment overrides.
pub fn load_config() -> ConfigResult<CobaltConfig> {
    ConfigLoader::new()
        .with_current_dir()
        .with_user_config_dir()
        .load()
}
