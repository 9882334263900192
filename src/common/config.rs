//! Configuration loading
//!
//! Reads an optional TOML file, applies `FAIRWAGER_*` environment overrides,
//! then validates the result.

use crate::config::{EngineConfig, LogLevel, StorageBackend};
use crate::errors::{ConfigurationError, EngineResult};
use std::env;
use std::path::Path;
use std::str::FromStr;

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => EngineConfig::default(),
        };

        apply_overrides(&mut config, |name| env::var(name).ok())?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> Result<EngineConfig, ConfigurationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        Ok(toml::from_str(&content)?)
    }

    /// Write a config as pretty TOML
    pub fn save(&self, config: &EngineConfig, path: &str) -> EngineResult<()> {
        let toml_string = toml::to_string_pretty(config).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to write {}: {}", path, e)))?;
        Ok(())
    }
}

/// Apply environment overrides through `lookup`, so tests need not touch the
/// real process environment.
fn apply_overrides<F>(config: &mut EngineConfig, lookup: F) -> Result<(), ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("FAIRWAGER_DATA_DIR") {
        config.storage.data_directory = v;
    }
    if let Some(v) = lookup("FAIRWAGER_STORAGE_BACKEND") {
        config.storage.backend = match v.to_ascii_lowercase().as_str() {
            "memory" => StorageBackend::Memory,
            "rocksdb" => StorageBackend::RocksDb,
            _ => return Err(invalid("FAIRWAGER_STORAGE_BACKEND", v, "expected memory or rocksdb")),
        };
    }
    if let Some(v) = lookup("FAIRWAGER_LOG_LEVEL") {
        config.monitoring.log_level = match v.to_ascii_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => return Err(invalid("FAIRWAGER_LOG_LEVEL", v, "unknown log level")),
        };
    }

    if let Some(v) = lookup("FAIRWAGER_CRASH_EDGE_BPS") {
        config.games.crash.house_edge_bps = parse("FAIRWAGER_CRASH_EDGE_BPS", v)?;
    }
    if let Some(v) = lookup("FAIRWAGER_COINFLIP_EDGE_BPS") {
        config.games.coin_flip.house_edge_bps = parse("FAIRWAGER_COINFLIP_EDGE_BPS", v)?;
    }
    if let Some(v) = lookup("FAIRWAGER_SWEEPER_EDGE_BPS") {
        config.games.sweeper.house_edge_bps = parse("FAIRWAGER_SWEEPER_EDGE_BPS", v)?;
    }
    if let Some(v) = lookup("FAIRWAGER_LOBBY_TTL_SECONDS") {
        config.lobby.ttl_seconds = parse("FAIRWAGER_LOBBY_TTL_SECONDS", v)?;
    }
    if let Some(v) = lookup("FAIRWAGER_LOBBY_CAP") {
        config.lobby.max_waiting_per_creator = parse("FAIRWAGER_LOBBY_CAP", v)?;
    }

    Ok(())
}

fn parse<T: FromStr>(field: &str, value: String) -> Result<T, ConfigurationError> {
    value
        .parse()
        .map_err(|_| invalid(field, value, "not a valid number"))
}

fn invalid(field: &str, value: String, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    }
}
