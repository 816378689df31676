//! Astra configuration.
//!
//! Settings are read from a YAML file (`$ASTRA_CONFIG`, falling back to
//! `~/.astra/astra.yml`) and then overridden from the environment. A missing
//! file is not an error: every setting has a default except the database URL,
//! which is only required once a connection is opened.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides the configured database URL.
pub const DATABASE_URL_ENV: &str = "ASTRA_DATABASE_URL";

/// Environment variable naming an alternative configuration file.
pub const CONFIG_PATH_ENV: &str = "ASTRA_CONFIG";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No database URL was configured.
    #[error("No database URL configured: set ASTRA_DATABASE_URL or astra_database.url")]
    MissingDatabaseUrl,

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Connection settings for the bookkeeping database.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL, e.g. `sqlite:///data/astra.db`.
    pub url: Option<String>,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection.
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            acquire_timeout_secs: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// The configured URL, or an error if none is set.
    pub fn require_url(&self) -> Result<&str, ConfigError> {
        self.url.as_deref().ok_or(ConfigError::MissingDatabaseUrl)
    }
}

/// Top-level Astra configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AstraConfig {
    pub astra_database: DatabaseConfig,
    /// Extra or replacement path templates, keyed by filetype.
    pub data_product_paths: HashMap<String, String>,
    /// Seconds between polls when watching bundle progress.
    pub watch_interval_secs: u64,
}

impl Default for AstraConfig {
    fn default() -> Self {
        Self {
            astra_database: DatabaseConfig::default(),
            data_product_paths: HashMap::new(),
            watch_interval_secs: 1,
        }
    }
}

impl AstraConfig {
    /// Loads the configuration file (if any) and applies environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `ASTRA_CONFIG`: Path of the configuration file (default: ~/.astra/astra.yml)
    /// - `ASTRA_DATABASE_URL`: Database URL, overriding the file
    /// - `ASTRA_DATABASE_MAX_CONNECTIONS`: Pool size
    /// - `ASTRA_WATCH_INTERVAL_SECS`: Bundle watch poll interval
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Reads configuration from a YAML file without environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml(&contents)?;
        tracing::debug!(path = %path.as_ref().display(), "Loaded configuration file");
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        // An empty file deserialises to null rather than an empty mapping.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(DATABASE_URL_ENV).filter(|v| !v.is_empty()) {
            tracing::info!("Using {} environment variable", DATABASE_URL_ENV);
            self.astra_database.url = Some(url);
        }

        if let Some(val) = lookup("ASTRA_DATABASE_MAX_CONNECTIONS") {
            self.astra_database.max_connections =
                parse_env_value(&val, "ASTRA_DATABASE_MAX_CONNECTIONS")?;
        }

        if let Some(val) = lookup("ASTRA_WATCH_INTERVAL_SECS") {
            self.watch_interval_secs = parse_env_value(&val, "ASTRA_WATCH_INTERVAL_SECS")?;
        }

        Ok(())
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }
}

/// Location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".astra").join("astra.yml"))
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
