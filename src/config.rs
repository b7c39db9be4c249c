//! Process and project configuration.
//!
//! Process settings come from `IDE_BUILD_*` environment variables. Per-project
//! build configurations live in an optional `.buildconfig.toml` at the project
//! root.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_LOG_LEVEL: &str = "warn";
const DEFAULT_SETTLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PODMAN_PROGRAM: &str = "podman";
const DEFAULT_BUILDDIR: &str = "_build";

pub const PROJECT_CONFIG_FILE: &str = ".buildconfig.toml";
pub const DEFAULT_CONFIG_ID: &str = "default";
pub const HOST_RUNTIME_ID: &str = "host";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid project configuration {}: {source}", path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FoundryConfig {
    pub log_level: String,
    pub log_json: bool,
    pub settle_timeout: Duration,
    /// `None` disables the container runtime provider.
    pub podman_program: Option<PathBuf>,
}

impl Default for FoundryConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            settle_timeout: Duration::from_secs(DEFAULT_SETTLE_TIMEOUT_SECS),
            podman_program: Some(PathBuf::from(DEFAULT_PODMAN_PROGRAM)),
        }
    }
}

impl FoundryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(level) = lookup("IDE_BUILD_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(json) = lookup("IDE_BUILD_LOG_JSON") {
            config.log_json = json.parse::<bool>().map_err(|e| ConfigError::ParseError {
                field: "IDE_BUILD_LOG_JSON".to_string(),
                error: e.to_string(),
            })?;
        }

        if let Some(secs) = lookup("IDE_BUILD_SETTLE_TIMEOUT") {
            let secs = secs.parse::<u64>().map_err(|e| ConfigError::ParseError {
                field: "IDE_BUILD_SETTLE_TIMEOUT".to_string(),
                error: e.to_string(),
            })?;
            config.settle_timeout = Duration::from_secs(secs);
        }

        if let Some(program) = lookup("IDE_BUILD_PODMAN") {
            let program = program.trim();
            config.podman_program = if program.is_empty() || program.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(PathBuf::from(program))
            };
        }

        Ok(config)
    }
}

/// Contents of `.buildconfig.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectConfig {
    pub build_system: Option<String>,
    #[serde(default)]
    pub config: BTreeMap<String, ConfigurationEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigurationEntry {
    pub name: Option<String>,
    pub runtime: Option<String>,
    pub config_opts: Option<String>,
    #[serde(default)]
    pub prebuild: Vec<String>,
    #[serde(default)]
    pub postbuild: Vec<String>,
    pub builddir: Option<PathBuf>,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl ProjectConfig {
    /// Loads the project file, or an empty configuration when there is none.
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let path = project_dir.join(PROJECT_CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        Self::parse(&content).map_err(|source| ConfigError::Invalid { path, source })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn active_configuration(&self, project_dir: &Path) -> BuildConfiguration {
        let selected = self
            .config
            .iter()
            .find(|(_, entry)| entry.default)
            .or_else(|| self.config.get_key_value(DEFAULT_CONFIG_ID));

        match selected {
            Some((id, entry)) => BuildConfiguration::from_entry(id, entry, project_dir),
            None => BuildConfiguration::new(project_dir),
        }
    }
}

/// The resolved configuration a builder is constructed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfiguration {
    pub id: String,
    pub display_name: String,
    pub runtime_id: String,
    pub config_opts: Vec<String>,
    pub prebuild: Vec<String>,
    pub postbuild: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub builddir: PathBuf,
    pub rebuild: bool,
}

impl BuildConfiguration {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            id: DEFAULT_CONFIG_ID.to_string(),
            display_name: "Default".to_string(),
            runtime_id: HOST_RUNTIME_ID.to_string(),
            config_opts: Vec::new(),
            prebuild: Vec::new(),
            postbuild: Vec::new(),
            environment: BTreeMap::new(),
            builddir: project_dir.join(DEFAULT_BUILDDIR),
            rebuild: false,
        }
    }

    fn from_entry(id: &str, entry: &ConfigurationEntry, project_dir: &Path) -> Self {
        let builddir = match &entry.builddir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => project_dir.join(dir),
            None => project_dir.join(DEFAULT_BUILDDIR),
        };

        Self {
            id: id.to_string(),
            display_name: entry.name.clone().unwrap_or_else(|| id.to_string()),
            runtime_id: entry
                .runtime
                .clone()
                .unwrap_or_else(|| HOST_RUNTIME_ID.to_string()),
            config_opts: entry
                .config_opts
                .as_deref()
                .map(|opts| opts.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            prebuild: entry.prebuild.clone(),
            postbuild: entry.postbuild.clone(),
            environment: entry.environment.clone(),
            builddir,
            rebuild: false,
        }
    }
}
