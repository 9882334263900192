//! Peer-vs-peer coin flip lobbies
//!
//! `waiting` lobbies leave by exactly one conditional write on the lobby row:
//! either a join (debit joiner, flip, pay winner, `completed`) or an expiry
//! (refund creator, `expired`). Whichever commits first wins; the other sees a
//! changed row and backs off. Expiry is evaluated lazily on every read and
//! join, and by the periodic maintenance task.
//!
//! Waiting lobbies are also indexed under their own prefix, so listing and
//! sweeping never walk the resolved history.

use crate::common::traits::{RowStore, WriteSet};
use crate::common::types::{apply_house_edge, new_id, validate_owner_id};
use crate::config::{CoinFlipConfig, LobbyConfig};
use crate::errors::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::games::rng;
use crate::games::types::{
    CoinSide, GameRequest, GameRound, GameRules, GameType, Outcome, VerificationMaterial,
};
use crate::ledger::{AccountTxn, EntryReason, EntryRef, WagerLedger};
use crate::metrics::EngineMetrics;
use crate::records::{self, LOBBY_WAITING_PREFIX, MAX_COMMIT_ATTEMPTS};
use crate::seeds::{NonceClaim, SeedRegistry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LobbyState {
    Waiting,
    /// Only observable inside a join; a join commits `Completed` directly.
    Playing,
    Completed,
    Expired,
}

impl LobbyState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LobbyState::Completed | LobbyState::Expired)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyOutcome {
    pub round_id: String,
    pub flip_result: CoinSide,
    pub winner_id: String,
    pub loser_id: String,
    /// Pot less the house cut, paid to the winner
    pub payout: u64,
    pub house_cut: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lobby {
    pub id: String,
    pub creator_id: String,
    pub joiner_id: Option<String>,
    pub wager: u64,
    pub currency: String,
    pub creator_choice: CoinSide,
    pub state: LobbyState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub outcome: Option<LobbyOutcome>,
}

impl Lobby {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.state == LobbyState::Waiting && now > self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyCreated {
    pub lobby_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySummary {
    pub lobby_id: String,
    pub creator_id: String,
    pub wager: u64,
    pub side: CoinSide,
    pub time_left_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResult {
    pub lobby_id: String,
    pub round_id: String,
    pub winner_id: String,
    pub loser_id: String,
    pub payout: u64,
    pub flip_result: CoinSide,
    pub verification: VerificationMaterial,
}

pub struct LobbyMatchmaker {
    store: Arc<dyn RowStore>,
    seeds: Arc<SeedRegistry>,
    ledger: Arc<WagerLedger>,
    config: LobbyConfig,
    coin_flip: CoinFlipConfig,
    events: EventBus,
    metrics: Arc<EngineMetrics>,
}

impl LobbyMatchmaker {
    pub fn new(
        store: Arc<dyn RowStore>,
        seeds: Arc<SeedRegistry>,
        ledger: Arc<WagerLedger>,
        config: LobbyConfig,
        coin_flip: CoinFlipConfig,
        events: EventBus,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            seeds,
            ledger,
            config,
            coin_flip,
            events,
            metrics,
        }
    }

    /// Debit the creator and open a `waiting` lobby.
    pub async fn create(
        &self,
        creator: &str,
        wager: u64,
        side: CoinSide,
        now: DateTime<Utc>,
    ) -> EngineResult<LobbyCreated> {
        validate_owner_id(creator)?;
        self.ledger.check_wager(wager)?;

        let count_key = records::lobby_open_count_key(creator);
        let mut swept = false;

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let (open, open_raw) = records::load_counter(self.store.as_ref(), &count_key).await?;
            if open >= self.config.max_waiting_per_creator as u64 {
                // Overdue lobbies still hold a slot until something expires them.
                if !swept && self.expire_overdue(Some(creator), now).await? > 0 {
                    swept = true;
                    continue;
                }
                return Err(EngineError::LobbyCapReached {
                    owner: creator.to_string(),
                    cap: self.config.max_waiting_per_creator,
                });
            }

            let lobby = Lobby {
                id: new_id(),
                creator_id: creator.to_string(),
                joiner_id: None,
                wager,
                currency: self.ledger.currency().to_string(),
                creator_choice: side,
                state: LobbyState::Waiting,
                created_at: now,
                expires_at: now + self.config.ttl(),
                outcome: None,
            };

            let mut account = AccountTxn::load(self.store.as_ref(), creator).await?;
            account.debit(
                wager,
                EntryReason::LobbyStake,
                &lobby.currency,
                &EntryRef {
                    round_id: None,
                    lobby_id: Some(lobby.id.clone()),
                },
                now,
            )?;

            let mut ws = WriteSet::new();
            ws.expect(count_key.as_str(), open_raw)
                .put(count_key.as_str(), records::counter_bytes(open + 1))
                .expect_absent(records::lobby_key(&lobby.id))
                .put(records::lobby_key(&lobby.id), records::encode("lobby", &lobby)?)
                .put(
                    records::lobby_waiting_key(&lobby.id),
                    lobby.creator_id.clone().into_bytes(),
                );
            account.stage(&mut ws)?;

            if self.store.commit(ws).await? {
                tracing::info!(lobby_id = %lobby.id, creator, wager, side = %side, "Lobby created");
                self.metrics.record_lobby_created();
                self.events.publish(EngineEvent::LobbyCreated {
                    lobby_id: lobby.id.clone(),
                    creator_id: lobby.creator_id.clone(),
                    wager,
                    expires_at: lobby.expires_at,
                });
                return Ok(LobbyCreated {
                    lobby_id: lobby.id,
                    expires_at: lobby.expires_at,
                });
            }
            self.metrics.record_commit_retry();
            tokio::task::yield_now().await;
        }
        Err(records::contention(&count_key).into())
    }

    /// Joinable lobbies, newest first. Overdue ones are expired on the way.
    pub async fn list(&self, now: DateTime<Utc>) -> EngineResult<Vec<LobbySummary>> {
        let mut waiting = Vec::new();
        for lobby in self.waiting_lobbies(None).await? {
            if lobby.is_overdue(now) {
                self.expire(&lobby.id, now).await?;
            } else if lobby.state == LobbyState::Waiting {
                waiting.push(lobby);
            }
        }
        waiting.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        Ok(waiting
            .into_iter()
            .map(|l| LobbySummary {
                time_left_secs: (l.expires_at - now).num_seconds().max(0),
                lobby_id: l.id,
                creator_id: l.creator_id,
                wager: l.wager,
                side: l.creator_choice,
            })
            .collect())
    }

    /// Read one lobby, expiring it first if it is overdue.
    pub async fn lobby(&self, lobby_id: &str, now: DateTime<Utc>) -> EngineResult<Lobby> {
        let lobby = self.load(lobby_id).await?.0;
        if lobby.is_overdue(now) {
            self.expire(lobby_id, now).await?;
            return Ok(self.load(lobby_id).await?.0);
        }
        Ok(lobby)
    }

    /// Take the other side of a waiting lobby and resolve it immediately.
    pub async fn join(
        &self,
        lobby_id: &str,
        joiner: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<JoinResult> {
        validate_owner_id(joiner)?;
        let key = records::lobby_key(lobby_id);

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let (lobby, lobby_raw) = self.load(lobby_id).await?;
            if lobby.state != LobbyState::Waiting {
                self.metrics.record_join_conflict();
                return Err(EngineError::LobbyUnavailable(lobby_id.to_string()));
            }
            if lobby.is_overdue(now) {
                self.expire(lobby_id, now).await?;
                return Err(EngineError::LobbyUnavailable(lobby_id.to_string()));
            }
            if lobby.creator_id == joiner {
                return Err(EngineError::CannotJoinOwnLobby);
            }

            let server = self.seeds.get_active_server_seed().await?;
            let client = self.seeds.get_or_create_client_seed(joiner, now).await?;
            let claim = NonceClaim::read(self.store.as_ref(), &server.id, joiner).await?;
            let nonce = claim.nonce;

            // The joiner takes the side the creator did not call.
            let joiner_side = lobby.creator_choice.opposite();
            let request = GameRequest::CoinFlip { side: joiner_side };
            let rules = GameRules::CoinFlip {
                house_edge_bps: self.coin_flip.house_edge_bps,
            };
            let digest = rng::derive(&server.secret, &client.value, nonce)?;
            let outcome = rng::resolve(&rules, &request, &digest)?;
            let Outcome::CoinFlip { result: flip_result, .. } = outcome else {
                return Err(EngineError::InvalidRequest(format!(
                    "coin flip rules resolved to a {} outcome",
                    outcome.game_type()
                )));
            };

            let (winner_id, loser_id) = if flip_result == joiner_side {
                (joiner.to_string(), lobby.creator_id.clone())
            } else {
                (lobby.creator_id.clone(), joiner.to_string())
            };
            let pot = lobby.wager.saturating_mul(2);
            let (payout, house_cut) = apply_house_edge(pot, self.coin_flip.house_edge_bps);

            let round_id = new_id();
            let related = EntryRef {
                round_id: Some(round_id.clone()),
                lobby_id: Some(lobby.id.clone()),
            };

            let mut joiner_account = AccountTxn::load(self.store.as_ref(), joiner).await?;
            joiner_account.debit(lobby.wager, EntryReason::LobbyStake, &lobby.currency, &related, now)?;
            let mut creator_account = AccountTxn::load(self.store.as_ref(), &lobby.creator_id).await?;
            if winner_id == joiner {
                joiner_account.credit(payout, EntryReason::LobbyPayout, &lobby.currency, &related, now)?;
            } else {
                creator_account.credit(payout, EntryReason::LobbyPayout, &lobby.currency, &related, now)?;
            }

            let round = GameRound {
                id: round_id.clone(),
                owner_id: joiner.to_string(),
                counterparty_id: Some(lobby.creator_id.clone()),
                game_type: GameType::CoinFlip,
                server_seed_id: server.id.clone(),
                client_seed_id: client.id.clone(),
                nonce,
                wager: lobby.wager,
                request,
                rules,
                outcome,
                payout,
                resolved_at: now,
            };

            let mut completed = lobby.clone();
            completed.state = LobbyState::Completed;
            completed.joiner_id = Some(joiner.to_string());
            completed.outcome = Some(LobbyOutcome {
                round_id: round_id.clone(),
                flip_result,
                winner_id: winner_id.clone(),
                loser_id: loser_id.clone(),
                payout,
                house_cut,
            });

            let count_key = records::lobby_open_count_key(&lobby.creator_id);
            let (open, open_raw) = records::load_counter(self.store.as_ref(), &count_key).await?;
            let round_key = records::round_key(&round_id);

            let mut ws = WriteSet::new();
            ws.expect(key.as_str(), Some(lobby_raw))
                .put(key.as_str(), records::encode("lobby", &completed)?)
                .delete(records::lobby_waiting_key(lobby_id))
                .expect(count_key.as_str(), open_raw)
                .put(count_key.as_str(), records::counter_bytes(open.saturating_sub(1)))
                .expect_absent(round_key.as_str())
                .put(round_key.as_str(), records::encode("round", &round)?);
            claim.stage(&mut ws, round_id.clone().into_bytes());
            joiner_account.stage(&mut ws)?;
            creator_account.stage(&mut ws)?;

            if self.store.commit(ws).await? {
                tracing::info!(
                    lobby_id,
                    round_id = %round_id,
                    winner = %winner_id,
                    flip = %flip_result,
                    payout,
                    house_cut,
                    "Lobby resolved"
                );
                self.metrics.record_lobby_completed();
                self.metrics.record_round(GameType::CoinFlip, pot, payout);
                self.events.publish(EngineEvent::LobbyCompleted {
                    lobby_id: lobby_id.to_string(),
                    round_id: round_id.clone(),
                    winner_id: winner_id.clone(),
                    loser_id: loser_id.clone(),
                    flip_result,
                    payout,
                });
                return Ok(JoinResult {
                    lobby_id: lobby_id.to_string(),
                    round_id,
                    winner_id,
                    loser_id,
                    payout,
                    flip_result,
                    verification: VerificationMaterial {
                        commitment_hash: server.commitment_hash.clone(),
                        client_seed: client.value.clone(),
                        nonce,
                        digest: hex::encode(digest),
                    },
                });
            }

            // Lost to another join or an expiry: the next pass sees the new
            // state. Balance, nonce or seed changes just retry.
            claim.check_conflict(self.store.as_ref()).await?;
            tracing::debug!(lobby_id, joiner, "Lobby join conflicted, re-reading");
            self.metrics.record_commit_retry();
            tokio::task::yield_now().await;
        }
        Err(records::contention(&key).into())
    }

    /// Refund and close a lobby that is still waiting past its deadline.
    ///
    /// Returns whether this call performed the expiry. Calling it again, or
    /// on a lobby that was joined, does nothing.
    pub async fn expire(&self, lobby_id: &str, now: DateTime<Utc>) -> EngineResult<bool> {
        let key = records::lobby_key(lobby_id);

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let (lobby, raw) = self.load(lobby_id).await?;
            if !lobby.is_overdue(now) {
                return Ok(false);
            }

            let mut account = AccountTxn::load(self.store.as_ref(), &lobby.creator_id).await?;
            account.credit(
                lobby.wager,
                EntryReason::LobbyRefund,
                &lobby.currency,
                &EntryRef {
                    round_id: None,
                    lobby_id: Some(lobby.id.clone()),
                },
                now,
            )?;

            let mut expired = lobby.clone();
            expired.state = LobbyState::Expired;

            let count_key = records::lobby_open_count_key(&lobby.creator_id);
            let (open, open_raw) = records::load_counter(self.store.as_ref(), &count_key).await?;

            let mut ws = WriteSet::new();
            ws.expect(key.as_str(), Some(raw))
                .put(key.as_str(), records::encode("lobby", &expired)?)
                .delete(records::lobby_waiting_key(lobby_id))
                .expect(count_key.as_str(), open_raw)
                .put(count_key.as_str(), records::counter_bytes(open.saturating_sub(1)));
            account.stage(&mut ws)?;

            if self.store.commit(ws).await? {
                tracing::info!(lobby_id, creator = %lobby.creator_id, refund = lobby.wager, "Lobby expired");
                self.metrics.record_lobby_expired();
                self.events.publish(EngineEvent::LobbyExpired {
                    lobby_id: lobby_id.to_string(),
                    creator_id: lobby.creator_id.clone(),
                    refund: lobby.wager,
                });
                return Ok(true);
            }
            self.metrics.record_commit_retry();
            tokio::task::yield_now().await;
        }
        Err(records::contention(&key).into())
    }

    /// Expire every overdue lobby. Returns how many this pass expired.
    pub async fn sweep(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        self.expire_overdue(None, now).await
    }

    async fn expire_overdue(&self, creator: Option<&str>, now: DateTime<Utc>) -> EngineResult<usize> {
        let mut expired = 0;
        for lobby in self.waiting_lobbies(creator).await? {
            if lobby.is_overdue(now) && self.expire(&lobby.id, now).await? {
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::debug!(expired, "Expired overdue lobbies");
        }
        Ok(expired)
    }

    async fn load(&self, lobby_id: &str) -> EngineResult<(Lobby, Vec<u8>)> {
        records::load(self.store.as_ref(), &records::lobby_key(lobby_id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("lobby {}", lobby_id)))
    }

    /// Lobbies named by the waiting index, optionally for one creator.
    ///
    /// The scan and the row reads are separate, so a returned lobby may
    /// already have been joined or expired; callers check `state`.
    async fn waiting_lobbies(&self, creator: Option<&str>) -> EngineResult<Vec<Lobby>> {
        let rows = self.store.scan_prefix(LOBBY_WAITING_PREFIX.as_bytes()).await?;
        let mut lobbies = Vec::with_capacity(rows.len());
        for (key, creator_id) in rows {
            if creator.is_some_and(|c| c.as_bytes() != creator_id.as_slice()) {
                continue;
            }
            let id = String::from_utf8_lossy(&key[LOBBY_WAITING_PREFIX.len()..]).into_owned();
            lobbies.push(self.load(&id).await?.0);
        }
        Ok(lobbies)
    }
}
