//! Seed registry: the rotating server seed, per-owner client seeds and the
//! per-(server seed, owner) nonce counters.
//!
//! The active server seed is named by a single pointer row. Rotation swaps
//! the pointer, retires the old seed and reveals it in one conditional write.

use crate::common::traits::{RowStore, WriteSet};
use crate::common::types::{new_id, validate_owner_id};
use crate::errors::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::games::rng::commitment_hash;
use crate::metrics::EngineMetrics;
use crate::records::{self, ACTIVE_SEED_KEY, MAX_COMMIT_ATTEMPTS};
use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const MAX_CLIENT_SEED_LEN: usize = 64;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSeed {
    pub id: String,
    pub secret: String,
    pub commitment_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub revealed_at: Option<DateTime<Utc>>,
}

impl ServerSeed {
    fn generate(now: DateTime<Utc>) -> Self {
        let secret = random_hex(32);
        Self {
            id: new_id(),
            commitment_hash: commitment_hash(&secret),
            secret,
            active: true,
            created_at: now,
            revealed_at: None,
        }
    }

    pub fn is_revealed(&self) -> bool {
        !self.active && self.revealed_at.is_some()
    }

    /// `sha256(secret) == commitment`
    pub fn matches_commitment(&self) -> bool {
        commitment_hash(&self.secret) == self.commitment_hash
    }
}

// The secret must never end up in logs.
impl fmt::Debug for ServerSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSeed")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .field("commitment_hash", &self.commitment_hash)
            .field("active", &self.active)
            .field("created_at", &self.created_at)
            .field("revealed_at", &self.revealed_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSeed {
    pub id: String,
    pub owner_id: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

/// What a player sees before playing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSeedInfo {
    pub server_seed_id: String,
    pub commitment_hash: String,
    pub client_seed: String,
    pub next_nonce: u64,
}

pub struct SeedRegistry {
    store: Arc<dyn RowStore>,
    events: EventBus,
    metrics: Arc<EngineMetrics>,
}

impl SeedRegistry {
    pub fn new(store: Arc<dyn RowStore>, events: EventBus, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            store,
            events,
            metrics,
        }
    }

    /// The seed rounds are currently resolved with, integrity-checked.
    pub async fn get_active_server_seed(&self) -> EngineResult<ServerSeed> {
        let pointer = self
            .store
            .get(ACTIVE_SEED_KEY.as_bytes())
            .await?
            .ok_or(EngineError::NoActiveSeed)?;
        let id = String::from_utf8(pointer)
            .map_err(|_| integrity_failure("active seed pointer is not UTF-8".to_string()))?;

        let seed = self.server_seed(&id).await.map_err(|e| match e {
            EngineError::NotFound(_) => {
                integrity_failure(format!("active seed {} has no record", id))
            }
            other => other,
        })?;

        if !seed.active || !seed.matches_commitment() {
            return Err(integrity_failure(format!(
                "active seed {} does not match its commitment",
                id
            )));
        }
        Ok(seed)
    }

    /// Retire and reveal the active seed, then activate a fresh one.
    pub async fn rotate_server_seed(&self, now: DateTime<Utc>) -> EngineResult<ServerSeed> {
        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let pointer = self.store.get(ACTIVE_SEED_KEY.as_bytes()).await?;
            if let Some(seed) = self.try_rotate(pointer, now).await? {
                return Ok(seed);
            }
            self.metrics.record_commit_retry();
            tokio::task::yield_now().await;
        }
        Err(records::contention(ACTIVE_SEED_KEY).into())
    }

    /// Boot-time init: rotate only if no seed has ever been activated.
    pub async fn ensure_active_seed(&self, now: DateTime<Utc>) -> EngineResult<ServerSeed> {
        for _ in 0..MAX_COMMIT_ATTEMPTS {
            if self.store.get(ACTIVE_SEED_KEY.as_bytes()).await?.is_some() {
                return self.get_active_server_seed().await;
            }
            if let Some(seed) = self.try_rotate(None, now).await? {
                return Ok(seed);
            }
            tokio::task::yield_now().await;
        }
        Err(records::contention(ACTIVE_SEED_KEY).into())
    }

    async fn try_rotate(
        &self,
        pointer: Option<Vec<u8>>,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<ServerSeed>> {
        let next = ServerSeed::generate(now);
        let mut ws = WriteSet::new();
        ws.expect(ACTIVE_SEED_KEY, pointer.clone());

        let mut revealed_id = None;
        if let Some(raw_id) = pointer {
            let old_id = String::from_utf8(raw_id)
                .map_err(|_| integrity_failure("active seed pointer is not UTF-8".to_string()))?;
            let key = records::server_seed_key(&old_id);
            let (mut old, raw): (ServerSeed, _) = records::load(self.store.as_ref(), &key)
                .await?
                .ok_or_else(|| integrity_failure(format!("active seed {} has no record", old_id)))?;

            if !old.matches_commitment() {
                return Err(integrity_failure(format!(
                    "seed {} does not match its commitment",
                    old_id
                )));
            }

            old.active = false;
            old.revealed_at = Some(now);
            ws.expect(key.as_str(), Some(raw))
                .put(key.as_str(), records::encode("server seed", &old)?);
            revealed_id = Some(old_id);
        }

        ws.put(
            records::server_seed_key(&next.id),
            records::encode("server seed", &next)?,
        )
        .put(ACTIVE_SEED_KEY, next.id.clone().into_bytes());

        if !self.store.commit(ws).await? {
            tracing::debug!("Seed rotation raced another rotation, retrying");
            return Ok(None);
        }

        tracing::info!(
            revealed = ?revealed_id,
            active = %next.id,
            commitment = %next.commitment_hash,
            "Rotated server seed"
        );
        self.metrics.record_rotation();
        self.events.publish(EngineEvent::SeedRotated {
            revealed_seed_id: revealed_id,
            active_seed_id: next.id.clone(),
            commitment_hash: next.commitment_hash.clone(),
        });
        Ok(Some(next))
    }

    pub async fn server_seed(&self, id: &str) -> EngineResult<ServerSeed> {
        records::load(self.store.as_ref(), &records::server_seed_key(id))
            .await?
            .map(|(seed, _)| seed)
            .ok_or_else(|| EngineError::NotFound(format!("server seed {}", id)))
    }

    /// The owner's current client seed, created with random bytes on first use.
    pub async fn get_or_create_client_seed(
        &self,
        owner: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<ClientSeed> {
        validate_owner_id(owner)?;
        let current_key = records::current_client_seed_key(owner);

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            if let Some(raw) = self.store.get(current_key.as_bytes()).await? {
                let id = String::from_utf8(raw).map_err(|_| {
                    EngineError::Storage(crate::errors::StorageError::CorruptedData(format!(
                        "{} is not UTF-8",
                        current_key
                    )))
                })?;
                return self.client_seed(&id).await;
            }

            let seed = ClientSeed {
                id: new_id(),
                owner_id: owner.to_string(),
                value: random_hex(16),
                created_at: now,
            };
            let mut ws = WriteSet::new();
            ws.expect_absent(current_key.as_str())
                .put(records::client_seed_key(&seed.id), records::encode("client seed", &seed)?)
                .put(current_key.as_str(), seed.id.clone().into_bytes());

            if self.store.commit(ws).await? {
                tracing::debug!(owner, client_seed = %seed.id, "Created client seed");
                return Ok(seed);
            }
            tokio::task::yield_now().await;
        }
        Err(records::contention(&current_key).into())
    }

    /// Point the owner at a new client seed. Old seeds stay readable, so
    /// settled rounds keep verifying.
    pub async fn rotate_client_seed(
        &self,
        owner: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<ClientSeed> {
        validate_owner_id(owner)?;
        validate_client_seed(value)?;
        let current_key = records::current_client_seed_key(owner);

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let current = self.store.get(current_key.as_bytes()).await?;
            let seed = ClientSeed {
                id: new_id(),
                owner_id: owner.to_string(),
                value: value.to_string(),
                created_at: now,
            };

            let mut ws = WriteSet::new();
            ws.expect(current_key.as_str(), current)
                .put(records::client_seed_key(&seed.id), records::encode("client seed", &seed)?)
                .put(current_key.as_str(), seed.id.clone().into_bytes());

            if self.store.commit(ws).await? {
                tracing::info!(owner, client_seed = %seed.id, "Rotated client seed");
                return Ok(seed);
            }
            self.metrics.record_commit_retry();
            tokio::task::yield_now().await;
        }
        Err(records::contention(&current_key).into())
    }

    pub async fn client_seed(&self, id: &str) -> EngineResult<ClientSeed> {
        records::load(self.store.as_ref(), &records::client_seed_key(id))
            .await?
            .map(|(seed, _)| seed)
            .ok_or_else(|| EngineError::NotFound(format!("client seed {}", id)))
    }

    /// Consume and return the owner's next nonce under the active seed.
    ///
    /// Rounds claim their nonce inside their own commit through
    /// [`NonceClaim`]; this standalone form burns one without playing.
    pub async fn next_nonce(&self, owner: &str) -> EngineResult<u64> {
        validate_owner_id(owner)?;
        let mut key = String::new();

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let seed = self.get_active_server_seed().await?;
            let claim = NonceClaim::read(self.store.as_ref(), &seed.id, owner).await?;
            key = claim.counter_key.clone();

            let mut ws = WriteSet::new();
            claim.stage(&mut ws, b"burned".to_vec());
            if self.store.commit(ws).await? {
                return Ok(claim.nonce);
            }
            claim.check_conflict(self.store.as_ref()).await?;
            self.metrics.record_commit_retry();
            tokio::task::yield_now().await;
        }
        Err(records::contention(&key).into())
    }

    /// The nonce the owner's next round will use, without consuming it.
    pub async fn peek_nonce(&self, server_seed_id: &str, owner: &str) -> EngineResult<u64> {
        let key = records::nonce_key(server_seed_id, owner);
        Ok(records::load_counter(self.store.as_ref(), &key).await?.0)
    }

    pub async fn public_seed_info(
        &self,
        owner: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<PublicSeedInfo> {
        let server = self.get_active_server_seed().await?;
        let client = self.get_or_create_client_seed(owner, now).await?;
        let next_nonce = self.peek_nonce(&server.id, owner).await?;

        Ok(PublicSeedInfo {
            server_seed_id: server.id,
            commitment_hash: server.commitment_hash,
            client_seed: client.value,
            next_nonce,
        })
    }
}

/// The owner's next nonce under one server seed, read for a conditional write.
///
/// Staging it expects the seed to still be active and the counter unmoved,
/// bumps the counter and marks the nonce used, all in the caller's commit.
#[derive(Debug, Clone)]
pub(crate) struct NonceClaim {
    pub nonce: u64,
    server_seed_id: String,
    owner: String,
    counter_key: String,
    counter_raw: Option<Vec<u8>>,
    used_key: String,
}

impl NonceClaim {
    pub(crate) async fn read(
        store: &dyn RowStore,
        server_seed_id: &str,
        owner: &str,
    ) -> EngineResult<Self> {
        let counter_key = records::nonce_key(server_seed_id, owner);
        let (nonce, counter_raw) = records::load_counter(store, &counter_key).await?;
        Ok(Self {
            nonce,
            server_seed_id: server_seed_id.to_string(),
            owner: owner.to_string(),
            used_key: records::nonce_used_key(server_seed_id, owner, nonce),
            counter_key,
            counter_raw,
        })
    }

    /// `marker` is what the used row records, normally the round id.
    pub(crate) fn stage(&self, ws: &mut WriteSet, marker: Vec<u8>) {
        ws.expect(ACTIVE_SEED_KEY, Some(self.server_seed_id.clone().into_bytes()))
            .expect(self.counter_key.as_str(), self.counter_raw.clone())
            .put(self.counter_key.as_str(), records::counter_bytes(self.nonce + 1))
            .expect_absent(self.used_key.as_str())
            .put(self.used_key.as_str(), marker);
    }

    /// Classify a failed commit that staged this claim.
    ///
    /// A used row next to a counter that never moved means the counter fell
    /// behind an issued nonce. Anything else is ordinary contention and the
    /// caller retries with a fresh claim.
    pub(crate) async fn check_conflict(&self, store: &dyn RowStore) -> EngineResult<()> {
        // Used row first: a legitimate claim of this nonce moves the counter
        // in the same commit, so a later counter read can no longer match.
        if store.get(self.used_key.as_bytes()).await?.is_none() {
            return Ok(());
        }
        let counter = store.get(self.counter_key.as_bytes()).await?;
        if counter == self.counter_raw {
            return Err(nonce_reuse(&self.server_seed_id, &self.owner, self.nonce));
        }
        Ok(())
    }
}

fn nonce_reuse(server_seed_id: &str, owner: &str, nonce: u64) -> EngineError {
    tracing::error!(
        security_event = true,
        server_seed_id,
        owner,
        nonce,
        "Nonce already consumed"
    );
    EngineError::InvalidNonceReuse {
        server_seed_id: server_seed_id.to_string(),
        owner: owner.to_string(),
        nonce,
    }
}

pub fn validate_client_seed(value: &str) -> EngineResult<()> {
    if value.is_empty()
        || value.len() > MAX_CLIENT_SEED_LEN
        || !value.chars().all(|c| c.is_ascii_graphic() || c == ' ')
    {
        return Err(EngineError::InvalidRequest(format!(
            "client seed must be 1-{} printable ASCII characters",
            MAX_CLIENT_SEED_LEN
        )));
    }
    Ok(())
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn integrity_failure(detail: String) -> EngineError {
    tracing::error!(security_event = true, %detail, "Seed integrity check failed");
    EngineError::SeedIntegrity(detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn registry() -> (SeedRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = SeedRegistry::new(store.clone(), EventBus::default(), Arc::new(EngineMetrics::new()));
        (registry, store)
    }

    #[tokio::test]
    async fn test_no_active_seed_before_rotation() {
        let (registry, _) = registry();
        assert!(matches!(
            registry.get_active_server_seed().await,
            Err(EngineError::NoActiveSeed)
        ));
        assert!(matches!(
            registry.next_nonce("alice").await,
            Err(EngineError::NoActiveSeed)
        ));
    }

    #[tokio::test]
    async fn test_rotation_reveals_previous_seed() {
        let (registry, _) = registry();
        let now = Utc::now();
        let first = registry.rotate_server_seed(now).await.unwrap();
        assert!(first.active);
        assert_eq!(first.commitment_hash, commitment_hash(&first.secret));
        assert_eq!(first.secret.len(), 64);

        let second = registry.rotate_server_seed(now).await.unwrap();
        let active = registry.get_active_server_seed().await.unwrap();
        assert_eq!(active.id, second.id);

        let retired = registry.server_seed(&first.id).await.unwrap();
        assert!(retired.is_revealed());
        assert!(retired.matches_commitment());
    }

    #[tokio::test]
    async fn test_ensure_active_seed_is_idempotent() {
        let (registry, _) = registry();
        let now = Utc::now();
        let a = registry.ensure_active_seed(now).await.unwrap();
        let b = registry.ensure_active_seed(now).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_tampered_secret_is_rejected() {
        let (registry, store) = registry();
        let seed = registry.rotate_server_seed(Utc::now()).await.unwrap();

        let mut tampered = seed.clone();
        tampered.secret = "0".repeat(64);
        let mut ws = WriteSet::new();
        ws.put(
            records::server_seed_key(&seed.id),
            serde_json::to_vec(&tampered).unwrap(),
        );
        store.commit(ws).await.unwrap();

        let err = registry.get_active_server_seed().await.unwrap_err();
        assert!(matches!(err, EngineError::SeedIntegrity(_)));
        assert!(err.is_security_event());
    }

    #[tokio::test]
    async fn test_nonces_are_scoped_to_active_seed() {
        let (registry, _) = registry();
        let now = Utc::now();
        registry.rotate_server_seed(now).await.unwrap();

        assert_eq!(registry.next_nonce("alice").await.unwrap(), 0);
        assert_eq!(registry.next_nonce("alice").await.unwrap(), 1);
        assert_eq!(registry.next_nonce("bob").await.unwrap(), 0);

        registry.rotate_server_seed(now).await.unwrap();
        assert_eq!(registry.next_nonce("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claim_beaten_by_another_request_is_plain_contention() {
        let (registry, store) = registry();
        let seed = registry.rotate_server_seed(Utc::now()).await.unwrap();

        let late = NonceClaim::read(store.as_ref(), &seed.id, "alice").await.unwrap();
        assert_eq!(registry.next_nonce("alice").await.unwrap(), 0);

        let mut ws = WriteSet::new();
        late.stage(&mut ws, b"late".to_vec());
        assert!(!store.commit(ws).await.unwrap());
        late.check_conflict(store.as_ref()).await.unwrap();

        let fresh = NonceClaim::read(store.as_ref(), &seed.id, "alice").await.unwrap();
        assert_eq!(fresh.nonce, 1);
    }

    #[tokio::test]
    async fn test_counter_behind_used_nonce_is_reuse() {
        let (registry, store) = registry();
        let seed = registry.rotate_server_seed(Utc::now()).await.unwrap();

        let mut ws = WriteSet::new();
        ws.put(records::nonce_used_key(&seed.id, "alice", 0), b"earlier".to_vec());
        store.commit(ws).await.unwrap();

        let err = registry.next_nonce("alice").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidNonceReuse { nonce: 0, .. }));
        assert!(err.is_security_event());
    }

    #[tokio::test]
    async fn test_client_seed_rotation_keeps_old_record() {
        let (registry, _) = registry();
        let now = Utc::now();
        let original = registry.get_or_create_client_seed("alice", now).await.unwrap();
        assert_eq!(original.value.len(), 32);
        assert_eq!(
            registry.get_or_create_client_seed("alice", now).await.unwrap(),
            original
        );

        let rotated = registry.rotate_client_seed("alice", "lucky seven", now).await.unwrap();
        assert_eq!(
            registry.get_or_create_client_seed("alice", now).await.unwrap().id,
            rotated.id
        );
        assert_eq!(registry.client_seed(&original.id).await.unwrap(), original);

        assert!(registry.rotate_client_seed("alice", "", now).await.is_err());
        assert!(registry.rotate_client_seed("alice", "tab\tseed", now).await.is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let seed = ServerSeed::generate(Utc::now());
        let rendered = format!("{:?}", seed);
        assert!(!rendered.contains(&seed.secret));
        assert!(rendered.contains("<redacted>"));
    }
}
