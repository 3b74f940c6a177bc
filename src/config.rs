use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use conceptsync_core::OrchestratorConfig;

const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Sync settings with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct SyncConfig {
    /// Shared directory holding the remote copy of every document
    pub remote_dir: ConfigValue<PathBuf>,
    /// Seconds before an abandoned document lock can be reclaimed
    pub lock_timeout_secs: ConfigValue<u64>,
    /// Resolve conflicts automatically when they are detected
    pub auto_resolve: ConfigValue<bool>,
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Local data directory (queue, documents, conflicts)
    pub data_dir: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub sync: SyncConfig,
}

/// Internal structs for deserializing the config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    sync: SyncFile,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SyncFile {
    remote_dir: Option<PathBuf>,
    lock_timeout_secs: Option<u64>,
    auto_resolve: Option<bool>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut data_dir = ConfigValue::new(Self::default_data_dir(), ConfigSource::Default);
        let mut remote_dir = ConfigValue::new(
            Self::default_data_dir().join("remote"),
            ConfigSource::Default,
        );
        let mut lock_timeout_secs =
            ConfigValue::new(DEFAULT_LOCK_TIMEOUT_SECS, ConfigSource::Default);
        let mut auto_resolve = ConfigValue::new(false, ConfigSource::Default);
        let mut config_file = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(dir) = file_config.data_dir {
                data_dir = ConfigValue::new(resolve_relative(&path, dir), ConfigSource::File);
            }
            if let Some(dir) = file_config.sync.remote_dir {
                remote_dir = ConfigValue::new(resolve_relative(&path, dir), ConfigSource::File);
            }
            if let Some(secs) = file_config.sync.lock_timeout_secs {
                lock_timeout_secs = ConfigValue::new(secs, ConfigSource::File);
            }
            if let Some(auto) = file_config.sync.auto_resolve {
                auto_resolve = ConfigValue::new(auto, ConfigSource::File);
            }
        }

        // Apply environment variable overrides
        if let Ok(dir) = std::env::var("CONCEPTSYNC_DATA_DIR") {
            data_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Ok(dir) = std::env::var("CONCEPTSYNC_REMOTE_DIR") {
            remote_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Ok(value) = std::env::var("CONCEPTSYNC_AUTO_RESOLVE") {
            let auto = parse_bool(&value).ok_or_else(|| {
                ConfigError::InvalidEnv("CONCEPTSYNC_AUTO_RESOLVE".to_string(), value.clone())
            })?;
            auto_resolve = ConfigValue::new(auto, ConfigSource::Environment);
        }

        Ok(Self {
            data_dir,
            config_file,
            sync: SyncConfig {
                remote_dir,
                lock_timeout_secs,
                auto_resolve,
            },
        })
    }

    /// Engine settings derived from this configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            lock_timeout: Duration::from_secs(self.sync.lock_timeout_secs.value),
            auto_resolve: self.sync.auto_resolve.value,
            ..OrchestratorConfig::default()
        }
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/conceptsync/
    /// - macOS: ~/Library/Application Support/conceptsync/
    /// - Windows: %APPDATA%/conceptsync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("conceptsync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/conceptsync/
    /// - macOS: ~/Library/Application Support/conceptsync/
    /// - Windows: %APPDATA%/conceptsync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("conceptsync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }

    /// YAML written by `config init`.
    pub fn template(&self) -> String {
        format!(
            "data_dir: {}\nsync:\n  remote_dir: {}\n  lock_timeout_secs: {}\n  auto_resolve: {}\n",
            self.data_dir.value.display(),
            self.sync.remote_dir.value.display(),
            self.sync.lock_timeout_secs.value,
            self.sync.auto_resolve.value
        )
    }
}

/// Resolves relative paths against the config file's directory.
fn resolve_relative(config_path: &Path, path: PathBuf) -> PathBuf {
    if path.is_relative() {
        config_path
            .parent()
            .map(|p| p.join(&path))
            .unwrap_or(path)
    } else {
        path
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidEnv(String, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidEnv(name, value) => {
                write!(f, "Invalid value '{}' for {}", value, name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
