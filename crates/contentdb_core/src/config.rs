//! Connection configuration.
//!
//! # Responsibility
//! - Describe named connections and the default connection.
//! - Load configuration from TOML files.
//!
//! # Invariants
//! - A validated config has at least one connection.
//! - `default_connection` always names a configured connection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config declares no connections")]
    NoConnections,
    #[error("default connection `{0}` is not configured")]
    UnknownDefaultConnection(String),
    #[error("connection `{0}` does not name a connector")]
    MissingConnector(String),
}

/// `[connections.<name>]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connector kind, e.g. `sqlite` or `memory`.
    pub connector: String,
    #[serde(default)]
    pub settings: ConnectionSettings,
    #[serde(default)]
    pub options: ConnectionOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Database file. Absent or `:memory:` opens a private in-memory database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<PathBuf>,
}

impl ConnectionSettings {
    /// On-disk location, if any.
    pub fn file(&self) -> Option<&Path> {
        self.filename
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty() && *path != Path::new(":memory:"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl ConnectionOptions {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_connection_name() -> String {
    "default".to_string()
}

/// Connection map plus the default connection name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    #[serde(default = "default_connection_name")]
    pub default_connection: String,
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

impl DatabaseConfig {
    /// Single `sqlite` connection named `default` backed by `path`.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self::single(ConnectionConfig {
            connector: "sqlite".to_string(),
            settings: ConnectionSettings {
                filename: Some(path.into()),
            },
            options: ConnectionOptions::default(),
        })
    }

    /// Single `memory` connection named `default`.
    pub fn memory() -> Self {
        Self::single(ConnectionConfig {
            connector: "memory".to_string(),
            settings: ConnectionSettings::default(),
            options: ConnectionOptions::default(),
        })
    }

    fn single(connection: ConnectionConfig) -> Self {
        let name = default_connection_name();
        Self {
            connections: BTreeMap::from([(name.clone(), connection)]),
            default_connection: name,
        }
    }

    /// Adds or replaces one named connection.
    pub fn with_connection(mut self, name: impl Into<String>, connection: ConnectionConfig) -> Self {
        self.connections.insert(name.into(), connection);
        self
    }

    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.connections.is_empty() {
            return Err(ConfigError::NoConnections);
        }
        if !self.connections.contains_key(self.default_connection.as_str()) {
            return Err(ConfigError::UnknownDefaultConnection(
                self.default_connection.clone(),
            ));
        }
        if let Some((name, _)) = self
            .connections
            .iter()
            .find(|(_, connection)| connection.connector.trim().is_empty())
        {
            return Err(ConfigError::MissingConnector(name.clone()));
        }
        Ok(())
    }
}
