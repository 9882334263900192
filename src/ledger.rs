//! Wager ledger and single-player settlement
//!
//! Each owner has one account row holding the balance and an entry counter.
//! Every balance movement rewrites that row under an expectation on its old
//! bytes and appends a ledger entry in the same commit, so the balance always
//! equals the sum of the owner's signed entries.

use crate::common::traits::{RowStore, WriteSet};
use crate::common::types::{new_id, validate_owner_id};
use crate::config::LedgerConfig;
use crate::errors::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::games::rng;
use crate::games::types::{GameRequest, GameRound, GameRules, Outcome};
use crate::metrics::EngineMetrics;
use crate::records::{self, ACTIVE_SEED_KEY, MAX_COMMIT_ATTEMPTS, RESERVATION_PREFIX};
use crate::seeds::{ClientSeed, NonceClaim, ServerSeed};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryReason {
    Deposit,
    Wager,
    Payout,
    LobbyStake,
    LobbyPayout,
    LobbyRefund,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub owner_id: String,
    pub sequence: u64,
    pub kind: EntryKind,
    pub reason: EntryReason,
    pub amount: u64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_round_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_lobby_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn signed_amount(&self) -> i128 {
        match self.kind {
            EntryKind::Debit => -(self.amount as i128),
            EntryKind::Credit => self.amount as i128,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Account {
    balance: u64,
    entry_count: u64,
}

/// Links an entry to the round or lobby that caused it
#[derive(Debug, Clone, Default)]
pub(crate) struct EntryRef {
    pub round_id: Option<String>,
    pub lobby_id: Option<String>,
}

/// Staged balance changes for one owner, committed as part of a WriteSet.
pub(crate) struct AccountTxn {
    owner: String,
    key: String,
    account: Account,
    raw: Option<Vec<u8>>,
    entries: Vec<LedgerEntry>,
}

impl AccountTxn {
    pub(crate) async fn load(store: &dyn RowStore, owner: &str) -> EngineResult<Self> {
        let key = records::balance_key(owner);
        let (account, raw) = match records::load::<Account>(store, &key).await? {
            Some((account, raw)) => (account, Some(raw)),
            None => (Account::default(), None),
        };
        Ok(Self {
            owner: owner.to_string(),
            key,
            account,
            raw,
            entries: Vec::new(),
        })
    }

    pub(crate) fn balance(&self) -> u64 {
        self.account.balance
    }

    pub(crate) fn debit(
        &mut self,
        amount: u64,
        reason: EntryReason,
        currency: &str,
        related: &EntryRef,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        if self.account.balance < amount {
            return Err(EngineError::InsufficientFunds {
                owner: self.owner.clone(),
                required: amount,
                available: self.account.balance,
            });
        }
        self.account.balance -= amount;
        self.push(EntryKind::Debit, amount, reason, currency, related, now);
        Ok(())
    }

    pub(crate) fn credit(
        &mut self,
        amount: u64,
        reason: EntryReason,
        currency: &str,
        related: &EntryRef,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.account.balance = self.account.balance.checked_add(amount).ok_or_else(|| {
            EngineError::InvalidWager(format!("credit of {} overflows balance", amount))
        })?;
        self.push(EntryKind::Credit, amount, reason, currency, related, now);
        Ok(())
    }

    fn push(
        &mut self,
        kind: EntryKind,
        amount: u64,
        reason: EntryReason,
        currency: &str,
        related: &EntryRef,
        now: DateTime<Utc>,
    ) {
        let sequence = self.account.entry_count;
        self.account.entry_count += 1;
        self.entries.push(LedgerEntry {
            id: new_id(),
            owner_id: self.owner.clone(),
            sequence,
            kind,
            reason,
            amount,
            currency: currency.to_string(),
            related_round_id: related.round_id.clone(),
            related_lobby_id: related.lobby_id.clone(),
            created_at: now,
        });
    }

    /// Add the account row and new entries to `ws`; returns the new balance.
    pub(crate) fn stage(self, ws: &mut WriteSet) -> EngineResult<(u64, Vec<LedgerEntry>)> {
        ws.expect(self.key.as_str(), self.raw)
            .put(self.key.as_str(), records::encode("account", &self.account)?);
        for entry in &self.entries {
            ws.put(
                records::ledger_key(&self.owner, entry.sequence, &entry.id),
                records::encode("ledger entry", entry)?,
            );
        }
        Ok((self.account.balance, self.entries))
    }
}

/// A debited, not yet settled wager. Its token is the id the round will get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub token: String,
    pub owner_id: String,
    pub wager: u64,
    pub currency: String,
    pub request: GameRequest,
    pub rules: GameRules,
    pub server_seed_id: String,
    pub commitment_hash: String,
    pub client_seed_id: String,
    pub client_seed: String,
    pub nonce: u64,
    /// Hex HMAC digest for (server seed, client seed, nonce)
    pub digest: String,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    /// Recompute the outcome this reservation is bound to.
    pub fn resolve(&self) -> EngineResult<Outcome> {
        let bytes = hex::decode(&self.digest).map_err(|e| {
            crate::errors::StorageError::CorruptedData(format!("reservation digest: {}", e))
        })?;
        let digest: [u8; 32] = bytes.try_into().map_err(|_| {
            crate::errors::StorageError::CorruptedData("reservation digest length".to_string())
        })?;
        rng::resolve(&self.rules, &self.request, &digest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub round: GameRound,
    pub new_balance: u64,
}

pub struct WagerLedger {
    store: Arc<dyn RowStore>,
    config: LedgerConfig,
    events: EventBus,
    metrics: Arc<EngineMetrics>,
}

impl WagerLedger {
    pub fn new(
        store: Arc<dyn RowStore>,
        config: LedgerConfig,
        events: EventBus,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            config,
            events,
            metrics,
        }
    }

    pub fn currency(&self) -> &str {
        &self.config.currency
    }

    /// Wager bounds shared by single-player rounds and lobbies
    pub fn check_wager(&self, wager: u64) -> EngineResult<()> {
        if wager == 0 || wager < self.config.min_wager || wager > self.config.max_wager {
            return Err(EngineError::InvalidWager(format!(
                "wager must be between {} and {}",
                self.config.min_wager.max(1),
                self.config.max_wager
            )));
        }
        Ok(())
    }

    /// Deposit credit. Returns the new balance.
    pub async fn fund(&self, owner: &str, amount: u64, now: DateTime<Utc>) -> EngineResult<u64> {
        validate_owner_id(owner)?;
        if amount == 0 {
            return Err(EngineError::InvalidWager("deposit must be positive".to_string()));
        }

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let mut account = AccountTxn::load(self.store.as_ref(), owner).await?;
            account.credit(amount, EntryReason::Deposit, &self.config.currency, &EntryRef::default(), now)?;

            let mut ws = WriteSet::new();
            let (balance, _) = account.stage(&mut ws)?;
            if self.store.commit(ws).await? {
                tracing::debug!(owner, amount, balance, "Funded account");
                return Ok(balance);
            }
            self.metrics.record_commit_retry();
            tokio::task::yield_now().await;
        }
        Err(records::contention(&records::balance_key(owner)).into())
    }

    pub async fn balance(&self, owner: &str) -> EngineResult<u64> {
        Ok(AccountTxn::load(self.store.as_ref(), owner).await?.balance())
    }

    /// All entries for `owner`, oldest first
    pub async fn entries(&self, owner: &str) -> EngineResult<Vec<LedgerEntry>> {
        let rows = self
            .store
            .scan_prefix(records::ledger_prefix(owner).as_bytes())
            .await?;
        rows.iter()
            .map(|(_, raw)| records::decode("ledger entry", raw))
            .collect()
    }

    pub async fn round(&self, round_id: &str) -> EngineResult<GameRound> {
        records::load(self.store.as_ref(), &records::round_key(round_id))
            .await?
            .map(|(round, _)| round)
            .ok_or_else(|| EngineError::NotFound(format!("round {}", round_id)))
    }

    /// Debit `wager` and bind it to the next nonce under `server_seed`.
    ///
    /// The commit is conditioned on `server_seed` still being active; if a
    /// rotation slipped in, this fails with `StaleSeed` and the caller
    /// starts over with the new seed.
    pub async fn place_wager(
        &self,
        owner: &str,
        wager: u64,
        request: &GameRequest,
        rules: &GameRules,
        server_seed: &ServerSeed,
        client_seed: &ClientSeed,
        now: DateTime<Utc>,
    ) -> EngineResult<Reservation> {
        validate_owner_id(owner)?;
        self.check_wager(wager)?;
        rng::validate_request(rules, request)?;

        let token = new_id();
        let related = EntryRef {
            round_id: Some(token.clone()),
            lobby_id: None,
        };

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let mut account = AccountTxn::load(self.store.as_ref(), owner).await?;
            account.debit(wager, EntryReason::Wager, &self.config.currency, &related, now)?;

            let claim = NonceClaim::read(self.store.as_ref(), &server_seed.id, owner).await?;
            let nonce = claim.nonce;
            let digest = rng::derive(&server_seed.secret, &client_seed.value, nonce)?;
            let reservation = Reservation {
                token: token.clone(),
                owner_id: owner.to_string(),
                wager,
                currency: self.config.currency.clone(),
                request: request.clone(),
                rules: rules.clone(),
                server_seed_id: server_seed.id.clone(),
                commitment_hash: server_seed.commitment_hash.clone(),
                client_seed_id: client_seed.id.clone(),
                client_seed: client_seed.value.clone(),
                nonce,
                digest: hex::encode(digest),
                created_at: now,
            };

            let mut ws = WriteSet::new();
            claim.stage(&mut ws, token.clone().into_bytes());
            ws.put(
                records::reservation_key(&token),
                records::encode("reservation", &reservation)?,
            );
            account.stage(&mut ws)?;

            if self.store.commit(ws).await? {
                tracing::debug!(owner, wager, nonce, token = %token, "Placed wager");
                return Ok(reservation);
            }

            let active = self.store.get(ACTIVE_SEED_KEY.as_bytes()).await?;
            if active.as_deref() != Some(server_seed.id.as_bytes()) {
                return Err(EngineError::StaleSeed(server_seed.id.clone()));
            }
            claim.check_conflict(self.store.as_ref()).await?;
            self.metrics.record_commit_retry();
            tracing::debug!(owner, "Wager placement conflicted, retrying");
            tokio::task::yield_now().await;
        }
        Err(records::contention(&records::balance_key(owner)).into())
    }

    /// Credit the payout for `outcome` and write the immutable round.
    pub async fn settle(
        &self,
        token: &str,
        outcome: &Outcome,
        now: DateTime<Utc>,
    ) -> EngineResult<Settlement> {
        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let key = records::reservation_key(token);
            let Some((reservation, raw)) =
                records::load::<Reservation>(self.store.as_ref(), &key).await?
            else {
                if self.store.get(records::round_key(token).as_bytes()).await?.is_some() {
                    return Err(EngineError::AlreadySettled(token.to_string()));
                }
                return Err(EngineError::NotFound(format!("reservation {}", token)));
            };

            if &reservation.resolve()? != outcome {
                return Err(EngineError::InvalidRequest(format!(
                    "outcome does not match the seeds bound to {}",
                    token
                )));
            }

            let payout = outcome.payout(reservation.wager);
            let round = GameRound {
                id: reservation.token.clone(),
                owner_id: reservation.owner_id.clone(),
                counterparty_id: None,
                game_type: outcome.game_type(),
                server_seed_id: reservation.server_seed_id.clone(),
                client_seed_id: reservation.client_seed_id.clone(),
                nonce: reservation.nonce,
                wager: reservation.wager,
                request: reservation.request.clone(),
                rules: reservation.rules.clone(),
                outcome: outcome.clone(),
                payout,
                resolved_at: now,
            };

            let mut account = AccountTxn::load(self.store.as_ref(), &reservation.owner_id).await?;
            let related = EntryRef {
                round_id: Some(round.id.clone()),
                lobby_id: None,
            };
            // Written even for a zero payout so every wager has its pair.
            account.credit(payout, EntryReason::Payout, &reservation.currency, &related, now)?;

            let round_key = records::round_key(&round.id);
            let mut ws = WriteSet::new();
            ws.expect(key.as_str(), Some(raw))
                .delete(key.as_str())
                .expect_absent(round_key.as_str())
                .put(round_key.as_str(), records::encode("round", &round)?);
            let (new_balance, _) = account.stage(&mut ws)?;

            if self.store.commit(ws).await? {
                tracing::info!(
                    round_id = %round.id,
                    owner = %round.owner_id,
                    game = %round.game_type,
                    wager = round.wager,
                    payout,
                    "Settled round"
                );
                self.metrics.record_round(round.game_type, round.wager, payout);
                self.events.publish(EngineEvent::RoundSettled {
                    round_id: round.id.clone(),
                    owner_id: round.owner_id.clone(),
                    game_type: round.game_type,
                    wager: round.wager,
                    payout,
                });
                return Ok(Settlement { round, new_balance });
            }
            self.metrics.record_commit_retry();
            tokio::task::yield_now().await;
        }
        Err(records::contention(&records::reservation_key(token)).into())
    }

    pub async fn open_reservations(&self) -> EngineResult<Vec<Reservation>> {
        let rows = self.store.scan_prefix(RESERVATION_PREFIX.as_bytes()).await?;
        rows.iter()
            .map(|(_, raw)| records::decode("reservation", raw))
            .collect()
    }

    /// Settle every wager whose caller went away between debit and settle.
    ///
    /// Meant for boot, when no play from this process can still be running.
    pub async fn recover_open_reservations(&self, now: DateTime<Utc>) -> EngineResult<Vec<Settlement>> {
        self.recover(|_| true, now).await
    }

    /// Settle wagers placed before `placed_before`, leaving younger ones to
    /// the plays that are presumably still settling them.
    pub async fn recover_stale_reservations(
        &self,
        placed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Settlement>> {
        self.recover(|r| r.created_at < placed_before, now).await
    }

    pub fn reservation_grace(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.config.reservation_grace_ms as i64)
    }

    async fn recover(
        &self,
        select: impl Fn(&Reservation) -> bool,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Settlement>> {
        let mut settled = Vec::new();
        for reservation in self.open_reservations().await?.into_iter().filter(|r| select(r)) {
            let outcome = reservation.resolve()?;
            match self.settle(&reservation.token, &outcome, now).await {
                Ok(settlement) => settled.push(settlement),
                // Settled concurrently by its original caller.
                Err(EngineError::AlreadySettled(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if !settled.is_empty() {
            tracing::info!(count = settled.len(), "Recovered open reservations");
        }
        Ok(settled)
    }
}
