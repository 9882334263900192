//! Error types for the fairwager engine
//!
//! Funds and seed-integrity failures always propagate explicitly. Lobby races
//! are expected control flow and surface as `LobbyUnavailable`.

use thiserror::Error;

/// Root error type for all engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Balance below the requested debit. Never retried.
    #[error("Insufficient funds for {owner}: required {required}, available {available}")]
    InsufficientFunds {
        owner: String,
        required: u64,
        available: u64,
    },

    /// Rotation has not run yet; nothing can be resolved.
    #[error("No active server seed")]
    NoActiveSeed,

    /// A (server seed, owner, nonce) triple was about to be used twice.
    #[error("Nonce {nonce} already used by {owner} on server seed {server_seed_id}")]
    InvalidNonceReuse {
        server_seed_id: String,
        owner: String,
        nonce: u64,
    },

    /// Lost a join race, or the lobby is already resolved or expired.
    #[error("Lobby {0} is no longer available")]
    LobbyUnavailable(String),

    #[error("Wager {0} has already been settled")]
    AlreadySettled(String),

    /// Attempted to reveal the secret of a seed that is still active.
    #[error("Round {0} uses a seed that has not been revealed yet")]
    RevealNotAllowed(String),

    /// Stored seed material does not match its published commitment.
    #[error("Seed integrity violation: {0}")]
    SeedIntegrity(String),

    /// The active seed changed between reading it and placing the wager.
    #[error("Server seed {0} was rotated before the wager was placed")]
    StaleSeed(String),

    #[error("{owner} already has {cap} waiting lobbies")]
    LobbyCapReached { owner: String, cap: u32 },

    #[error("Cannot join your own lobby")]
    CannotJoinOwnLobby,

    #[error("Invalid wager: {0}")]
    InvalidWager(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Storage system errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// Conditional writes on `key` kept conflicting.
    #[error("Gave up on {key} after {attempts} conflicting commits")]
    Contention { key: String, attempts: usize },
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
}

impl EngineError {
    /// Seed and nonce integrity failures are logged as security events and
    /// never detailed to the end user.
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            EngineError::NoActiveSeed
                | EngineError::InvalidNonceReuse { .. }
                | EngineError::RevealNotAllowed(_)
                | EngineError::SeedIntegrity(_)
        )
    }

    /// Safe to retry the same operation (possibly against another lobby).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::LobbyUnavailable(_)
                | EngineError::StaleSeed(_)
                | EngineError::Storage(StorageError::Contention { .. })
        )
    }

    /// Message suitable for showing to a player.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::InsufficientFunds { .. } => "Insufficient funds".to_string(),
            EngineError::LobbyUnavailable(_) => "This lobby is no longer available".to_string(),
            EngineError::AlreadySettled(_) => "This wager has already been settled".to_string(),
            EngineError::LobbyCapReached { cap, .. } => {
                format!("You can have at most {} open lobbies", cap)
            }
            EngineError::CannotJoinOwnLobby => "You cannot join your own lobby".to_string(),
            EngineError::InvalidWager(msg) | EngineError::InvalidRequest(msg) => msg.clone(),
            EngineError::NotFound(_) => "Not found".to_string(),
            EngineError::StaleSeed(_) => "Please try again".to_string(),
            _ => "Something went wrong. Please try again later.".to_string(),
        }
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

impl From<rocksdb::Error> for EngineError {
    fn from(e: rocksdb::Error) -> Self {
        EngineError::Storage(e.into())
    }
}

impl From<toml::de::Error> for ConfigurationError {
    fn from(e: toml::de::Error) -> Self {
        ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e))
    }
}

/// Convenience type alias for Results
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_error_display() {
        let err = EngineError::InsufficientFunds {
            owner: "alice".to_string(),
            required: 100,
            available: 40,
        };

        assert!(err.to_string().contains("required 100"));
        assert!(err.to_string().contains("available 40"));
    }

    #[test]
    fn test_security_events_are_not_detailed_to_users() {
        let err = EngineError::InvalidNonceReuse {
            server_seed_id: "seed-1".to_string(),
            owner: "alice".to_string(),
            nonce: 7,
        };

        assert!(err.is_security_event());
        assert!(!err.user_message().contains("seed-1"));
        assert!(!err.user_message().contains('7'));

        assert!(EngineError::RevealNotAllowed("r".into()).is_security_event());
        assert!(!EngineError::LobbyUnavailable("l".into()).is_security_event());
    }

    #[test]
    fn test_lobby_races_are_retryable() {
        assert!(EngineError::LobbyUnavailable("l".into()).is_retryable());
        assert!(!EngineError::CannotJoinOwnLobby.is_retryable());
        assert!(!EngineError::InsufficientFunds {
            owner: "a".into(),
            required: 1,
            available: 0
        }
        .is_retryable());
    }

    #[test]
    fn test_error_conversion() {
        let storage_error = StorageError::ReadFailed("disk".to_string());
        let engine_error: EngineError = storage_error.into();

        match engine_error {
            EngineError::Storage(_) => {}
            _ => panic!("Expected storage error"),
        }
    }

    #[test]
    fn test_error_source() {
        let err = EngineError::Configuration(ConfigurationError::ValidationFailed("x".into()));
        assert!(err.source().is_some());
    }
}
