//! Configuration management with validation and defaults
//!
//! House edges, payout tables and rarity tables live here rather than being
//! scattered through the game code. Every round snapshots the rules it was
//! resolved under, so changing these values never invalidates old rounds.

use crate::errors::ConfigurationError;
use crate::games::sweeper;
use crate::games::types::{CrateTier, GameRules, GameType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub games: GamesConfig,
    pub lobby: LobbyConfig,
    pub ledger: LedgerConfig,
    pub storage: StorageConfig,
    pub monitoring: MonitoringConfig,
}

/// Per-game constants
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GamesConfig {
    pub crash: CrashConfig,
    pub plinko: PlinkoConfig,
    pub coin_flip: CoinFlipConfig,
    pub sweeper: SweeperConfig,
    pub crates: CrateConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashConfig {
    /// Probability (in basis points) of an instant 1.00x crash
    pub house_edge_bps: u32,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self { house_edge_bps: 400 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlinkoConfig {
    /// Bucket multipliers in hundredths; the board has `len - 1` rows
    pub payouts: Vec<u64>,
}

impl Default for PlinkoConfig {
    fn default() -> Self {
        Self {
            payouts: vec![560, 210, 110, 100, 50, 100, 110, 210, 560],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoinFlipConfig {
    /// Cut taken from a lobby pot before it is paid to the winner
    pub house_edge_bps: u32,
}

impl Default for CoinFlipConfig {
    fn default() -> Self {
        Self { house_edge_bps: 500 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub tiles: u8,
    pub house_edge_bps: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            tiles: 25,
            house_edge_bps: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CrateConfig {
    pub tiers: Vec<CrateTier>,
}

impl Default for CrateConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                CrateTier::new("common", 70, 50),
                CrateTier::new("rare", 25, 150),
                CrateTier::new("legendary", 5, 500),
            ],
        }
    }
}

impl GamesConfig {
    /// Rules snapshot for one game type
    pub fn rules_for(&self, game_type: GameType) -> GameRules {
        match game_type {
            GameType::Crash => GameRules::Crash {
                house_edge_bps: self.crash.house_edge_bps,
            },
            GameType::Plinko => GameRules::Plinko {
                payouts: self.plinko.payouts.clone(),
            },
            GameType::CoinFlip => GameRules::CoinFlip {
                house_edge_bps: self.coin_flip.house_edge_bps,
            },
            GameType::Sweeper => GameRules::Sweeper {
                tiles: self.sweeper.tiles,
                house_edge_bps: self.sweeper.house_edge_bps,
            },
            GameType::Crate => GameRules::Crate {
                tiers: self.crates.tiers.clone(),
            },
        }
    }
}

/// Peer-vs-peer lobby settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    pub ttl_seconds: u64,
    pub max_waiting_per_creator: u32,
    pub sweep_interval_ms: u64,
}

impl LobbyConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_seconds as i64)
    }
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            max_waiting_per_creator: 5,
            sweep_interval_ms: 5_000,
        }
    }
}

/// Wager limits and ledger currency
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub currency: String,
    pub min_wager: u64,
    pub max_wager: u64,
    /// Age after which an unsettled wager is settled by the maintenance task
    pub reservation_grace_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            currency: "CREDIT".to_string(),
            min_wager: 1,
            max_wager: 1_000_000_000,
            reservation_grace_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    RocksDb,
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
    pub write_buffer_size_mb: usize,
    /// Whether to clear the database on startup (testing only!)
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_directory: "./DB/fairwager_data".to_string(),
            write_buffer_size_mb: 64,
            clear_on_start: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Logging and event settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: LogLevel,
    /// Capacity of the engine event broadcast channel
    pub event_buffer: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            event_buffer: 1_024,
        }
    }
}

impl EngineConfig {
    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let games = &self.games;

        check_edge("games.crash.house_edge_bps", games.crash.house_edge_bps)?;
        check_edge("games.coin_flip.house_edge_bps", games.coin_flip.house_edge_bps)?;
        check_edge("games.sweeper.house_edge_bps", games.sweeper.house_edge_bps)?;

        if games.plinko.payouts.len() < 2 || games.plinko.payouts.len() > 33 {
            return Err(ConfigurationError::ValidationFailed(
                "games.plinko.payouts must describe 1-32 rows".to_string(),
            ));
        }

        if games.sweeper.tiles < 2 || games.sweeper.tiles > sweeper::MAX_TILES {
            return Err(ConfigurationError::ValidationFailed(format!(
                "games.sweeper.tiles must be between 2 and {}",
                sweeper::MAX_TILES
            )));
        }

        if games.crates.tiers.is_empty() {
            return Err(ConfigurationError::ValidationFailed(
                "games.crates.tiers must not be empty".to_string(),
            ));
        }
        if let Some(tier) = games.crates.tiers.iter().find(|t| t.weight == 0) {
            return Err(ConfigurationError::InvalidValue {
                field: "games.crates.tiers.weight".to_string(),
                value: tier.name.clone(),
                reason: "weight must be > 0".to_string(),
            });
        }

        if self.lobby.ttl_seconds == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "lobby.ttl_seconds must be > 0".to_string(),
            ));
        }
        if self.lobby.max_waiting_per_creator == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "lobby.max_waiting_per_creator must be > 0".to_string(),
            ));
        }
        if self.lobby.sweep_interval_ms == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "lobby.sweep_interval_ms must be > 0".to_string(),
            ));
        }

        if self.ledger.currency.trim().is_empty() {
            return Err(ConfigurationError::ValidationFailed(
                "ledger.currency must not be empty".to_string(),
            ));
        }
        if self.ledger.min_wager == 0 || self.ledger.min_wager > self.ledger.max_wager {
            return Err(ConfigurationError::ValidationFailed(
                "ledger wager limits must satisfy 0 < min_wager <= max_wager".to_string(),
            ));
        }

        if self.monitoring.event_buffer == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "monitoring.event_buffer must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.lobby.sweep_interval_ms)
    }
}

fn check_edge(field: &str, bps: u32) -> Result<(), ConfigurationError> {
    if bps >= 10_000 {
        return Err(ConfigurationError::InvalidValue {
            field: field.to_string(),
            value: bps.to_string(),
            reason: "house edge must be below 10000 bps".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config_validation() {
        let mut config = EngineConfig::default();
        config.games.crash.house_edge_bps = 10_000;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.games.plinko.payouts = vec![100];
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.games.crates.tiers[1].weight = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.games.sweeper.tiles = 31;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.ledger.min_wager = 10;
        config.ledger.max_wager = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rules_snapshot_matches_config() {
        let config = EngineConfig::default();
        match config.games.rules_for(GameType::Plinko) {
            GameRules::Plinko { payouts } => assert_eq!(payouts.len(), 9),
            other => panic!("unexpected rules {:?}", other),
        }
        assert_eq!(
            config.games.rules_for(GameType::Crash),
            GameRules::Crash { house_edge_bps: 400 }
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [lobby]
            ttl_seconds = 60

            [storage]
            backend = "rocksdb"
            "#,
        )
        .unwrap();

        assert_eq!(config.lobby.ttl_seconds, 60);
        assert_eq!(config.lobby.max_waiting_per_creator, 5);
        assert_eq!(config.storage.backend, StorageBackend::RocksDb);
        assert_eq!(config.games.crash.house_edge_bps, 400);
    }

    #[test]
    fn test_duration_conversions() {
        let config = EngineConfig::default();
        assert_eq!(config.lobby.ttl(), chrono::Duration::minutes(5));
        assert_eq!(config.sweep_interval(), Duration::from_secs(5));
    }
}
