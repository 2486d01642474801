//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults, then applies
//!     environment overrides and validates the result.
//!
//! structure:
//!     - ServerConfig: Bind address for the ingest endpoint and dashboard.
//!     - StoreConfig: Retention cap of the in-memory message window.
//!     - LoggingConfig: Level, output format, per-message summaries.
//!     - StorageConfig: Whether and where messages are persisted.
//!
//! ==============================================================================

use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["compact", "json"];

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct HostConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// most recent messages kept in memory
    pub max_messages: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "compact" or "json"
    pub format: String,
    pub show_sensor_data: bool,
    /// also write json lines to `<data_dir>/logs/sensor-hub.log`
    pub file_log: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub enabled: bool,
    pub data_dir: PathBuf,
    /// keep every accepted request body under `<data_dir>/raw`
    pub archive_raw: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 18000 }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_messages: 100 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            show_sensor_data: true,
            file_log: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            data_dir: PathBuf::from("./data"),
            archive_raw: true,
        }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        let config: HostConfig = toml::from_str(&content)
            .context("Failed to parse config")?;

        Ok(config)
    }

    /// Load with default fallback
    ///
    /// runs before the subscriber exists, so problems are returned as
    /// notes for the caller to log once logging is up.
    pub fn load_or_default() -> (Self, Vec<String>) {
        let paths = [
            PathBuf::from("config").join("host.toml"),
            PathBuf::from("..").join("config").join("host.toml"),
        ];
        let mut notes = Vec::new();

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        notes.push(format!("Loaded from {}", path.display()));
                        return (config, notes);
                    }
                    Err(e) => {
                        notes.push(format!("Failed to load {}: {:#}", path.display(), e));
                    }
                }
            }
        }

        notes.push("No config file found - using defaults".to_string());
        (Self::default(), notes)
    }

    /// apply overrides from a variable lookup (std::env::var in main)
    pub fn apply_env<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut notes = Vec::new();

        if let Some(v) = lookup("SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("SERVER_PORT") {
            match v.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => notes.push(format!("ignoring SERVER_PORT={}", v)),
            }
        }
        if let Some(v) = lookup("MAX_DATA_STORE") {
            match v.parse() {
                Ok(max) => self.store.max_messages = max,
                Err(_) => notes.push(format!("ignoring MAX_DATA_STORE={}", v)),
            }
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
        if let Some(v) = lookup("LOG_FORMAT") {
            self.logging.format = v.to_lowercase();
        }
        if let Some(v) = lookup("DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ENABLE_STORAGE") {
            self.storage.enabled = v.eq_ignore_ascii_case("true");
        }
        // one switch for both file outputs
        if let Some(v) = lookup("ENABLE_FILE_LOG") {
            let on = v.eq_ignore_ascii_case("true");
            self.logging.file_log = on;
            self.storage.archive_raw = on;
        }

        notes
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            bail!("invalid server port: 0");
        }
        if self.store.max_messages == 0 {
            bail!("store.max_messages must be greater than 0");
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!("invalid log level {:?}, expected one of {:?}", self.logging.level, LOG_LEVELS);
        }
        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            bail!("invalid log format {:?}, expected one of {:?}", self.logging.format, LOG_FORMATS);
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.logging
            .file_log
            .then(|| self.storage.data_dir.join("logs").join("sensor-hub.log"))
    }

    pub fn archive_dir(&self) -> Option<PathBuf> {
        self.storage.archive_raw.then(|| self.storage.data_dir.join("raw"))
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│           HOST CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Listen: {}", self.server_addr());
        println!("│ Store Cap: {} messages", self.store.max_messages);
        println!("│ Log Level: {} ({})", self.logging.level, self.logging.format);
        if self.storage.enabled {
            println!("│ Storage: {}", self.storage.data_dir.display());
        } else {
            println!("│ Storage: disabled");
        }
        if let Some(dir) = self.archive_dir() {
            println!("│ Raw Archive: {}", dir.display());
        }
        if let Some(path) = self.log_file_path() {
            println!("│ Log File: {}", path.display());
        }
        println!("└─────────────────────────────────────────┘");
    }

    /// log what the summary printed, for file/json log consumers
    pub fn log_summary(&self) {
        info!(
            addr = %self.server_addr(),
            max_messages = self.store.max_messages,
            storage = self.storage.enabled,
            show_sensor_data = self.logging.show_sensor_data,
            file_log = self.logging.file_log,
            archive_raw = self.storage.archive_raw,
            "configuration active"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.server_addr(), "0.0.0.0:18000");
        assert_eq!(config.store.max_messages, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: HostConfig = toml::from_str(
            r#"
            [store]
            max_messages = 5

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.max_messages, 5);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SERVER_PORT", "9000"),
            ("MAX_DATA_STORE", "lots"),
            ("LOG_LEVEL", "DEBUG"),
            ("ENABLE_STORAGE", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = HostConfig::default();
        let notes = config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.store.max_messages, 100);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.storage.enabled);
        assert_eq!(notes, ["ignoring MAX_DATA_STORE=lots"]);
    }

    #[test]
    fn test_file_outputs() {
        let mut config = HostConfig::default();
        config.storage.data_dir = PathBuf::from("/srv/hub");
        assert_eq!(config.log_file_path(), Some(PathBuf::from("/srv/hub/logs/sensor-hub.log")));
        assert_eq!(config.archive_dir(), Some(PathBuf::from("/srv/hub/raw")));

        let notes = config.apply_env(|k| (k == "ENABLE_FILE_LOG").then(|| "false".to_string()));
        assert!(notes.is_empty());
        assert_eq!(config.log_file_path(), None);
        assert_eq!(config.archive_dir(), None);
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = HostConfig::default();
        config.store.max_messages = 0;
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }
}
