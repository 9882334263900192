//! Persistent record layout.
//!
//! Records are JSON; counters and balances are little-endian u64. Callers that
//! intend to write back a row load it through [`load`], which also returns the
//! raw bytes to use as the commit expectation.

use crate::common::types::{parse_u64_le, to_u64_le};
use crate::errors::{EngineResult, StorageError};
use crate::common::traits::RowStore;
use serde::{de::DeserializeOwned, Serialize};

/// How many times a conditional write is retried before giving up.
pub(crate) const MAX_COMMIT_ATTEMPTS: usize = 256;

pub(crate) const ACTIVE_SEED_KEY: &str = "seed:active";
pub(crate) const RESERVATION_PREFIX: &str = "reservation:";
pub(crate) const LOBBY_PREFIX: &str = "lobby:row:";
/// One row per `waiting` lobby, holding the creator id
pub(crate) const LOBBY_WAITING_PREFIX: &str = "lobby:waiting:";
const SERVER_SEED_PREFIX: &str = "seed:server:";
const CLIENT_SEED_PREFIX: &str = "seed:client:";
const CURRENT_CLIENT_SEED_PREFIX: &str = "seed:client-current:";
const NONCE_PREFIX: &str = "nonce:";
const NONCE_USED_PREFIX: &str = "nonce-used:";
const BALANCE_PREFIX: &str = "balance:";
const LEDGER_PREFIX: &str = "ledger:";
const ROUND_PREFIX: &str = "round:";
const LOBBY_OPEN_COUNT_PREFIX: &str = "lobby:open:";

pub(crate) fn server_seed_key(id: &str) -> String {
    format!("{}{}", SERVER_SEED_PREFIX, id)
}

pub(crate) fn client_seed_key(id: &str) -> String {
    format!("{}{}", CLIENT_SEED_PREFIX, id)
}

pub(crate) fn current_client_seed_key(owner: &str) -> String {
    format!("{}{}", CURRENT_CLIENT_SEED_PREFIX, owner)
}

pub(crate) fn nonce_key(server_seed_id: &str, owner: &str) -> String {
    format!("{}{}:{}", NONCE_PREFIX, server_seed_id, owner)
}

pub(crate) fn nonce_used_key(server_seed_id: &str, owner: &str, nonce: u64) -> String {
    format!("{}{}:{}:{}", NONCE_USED_PREFIX, server_seed_id, owner, nonce)
}

pub(crate) fn balance_key(owner: &str) -> String {
    format!("{}{}", BALANCE_PREFIX, owner)
}

/// Entries sort by their (time-ordered) sequence within an owner.
pub(crate) fn ledger_key(owner: &str, sequence: u64, entry_id: &str) -> String {
    format!("{}{}:{:020}:{}", LEDGER_PREFIX, owner, sequence, entry_id)
}

pub(crate) fn ledger_prefix(owner: &str) -> String {
    format!("{}{}:", LEDGER_PREFIX, owner)
}

pub(crate) fn reservation_key(token: &str) -> String {
    format!("{}{}", RESERVATION_PREFIX, token)
}

pub(crate) fn round_key(id: &str) -> String {
    format!("{}{}", ROUND_PREFIX, id)
}

pub(crate) fn lobby_key(id: &str) -> String {
    format!("{}{}", LOBBY_PREFIX, id)
}

pub(crate) fn lobby_waiting_key(id: &str) -> String {
    format!("{}{}", LOBBY_WAITING_PREFIX, id)
}

pub(crate) fn lobby_open_count_key(owner: &str) -> String {
    format!("{}{}", LOBBY_OPEN_COUNT_PREFIX, owner)
}

pub(crate) fn encode<T: Serialize>(what: &str, value: &T) -> EngineResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        StorageError::WriteFailed(format!("Failed to encode {}: {}", what, e)).into()
    })
}

pub(crate) fn decode<T: DeserializeOwned>(what: &str, bytes: &[u8]) -> EngineResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        StorageError::CorruptedData(format!("Failed to decode {}: {}", what, e)).into()
    })
}

/// Load and decode a JSON record, keeping its raw bytes.
pub(crate) async fn load<T: DeserializeOwned>(
    store: &dyn RowStore,
    key: &str,
) -> EngineResult<Option<(T, Vec<u8>)>> {
    match store.get(key.as_bytes()).await? {
        Some(raw) => {
            let value = decode(key, &raw)?;
            Ok(Some((value, raw)))
        }
        None => Ok(None),
    }
}

/// Load a u64 counter; an absent row reads as zero with no raw bytes.
pub(crate) async fn load_counter(
    store: &dyn RowStore,
    key: &str,
) -> EngineResult<(u64, Option<Vec<u8>>)> {
    match store.get(key.as_bytes()).await? {
        Some(raw) => {
            let value = parse_u64_le(&raw).ok_or_else(|| {
                StorageError::CorruptedData(format!("{} is not a u64 counter", key))
            })?;
            Ok((value, Some(raw)))
        }
        None => Ok((0, None)),
    }
}

pub(crate) fn counter_bytes(value: u64) -> Vec<u8> {
    to_u64_le(value)
}

pub(crate) fn contention(key: &str) -> StorageError {
    tracing::warn!(key, attempts = MAX_COMMIT_ATTEMPTS, "Conditional write kept conflicting");
    StorageError::Contention {
        key: key.to_string(),
        attempts: MAX_COMMIT_ATTEMPTS,
    }
}
