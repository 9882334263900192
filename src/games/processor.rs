use crate::config::GamesConfig;
use crate::errors::{EngineError, EngineResult};
use crate::games::rng;
use crate::games::types::{GameRequest, Outcome, VerificationMaterial};
use crate::ledger::{Settlement, WagerLedger};
use crate::seeds::SeedRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Rotations that may race one play before it gives up
const MAX_STALE_SEED_RETRIES: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayRequest {
    pub owner_id: String,
    pub wager: u64,
    pub game: GameRequest,
    /// Replaces the owner's client seed before this round
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_seed_override: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayResponse {
    pub round_id: String,
    pub outcome: Outcome,
    pub payout: u64,
    pub new_balance: u64,
    pub verification: VerificationMaterial,
}

/// Runs single-player rounds: bet, outcome, payout, ledger write.
pub struct GameProcessor {
    seeds: Arc<SeedRegistry>,
    ledger: Arc<WagerLedger>,
    games: GamesConfig,
}

impl GameProcessor {
    pub fn new(seeds: Arc<SeedRegistry>, ledger: Arc<WagerLedger>, games: GamesConfig) -> Self {
        Self {
            seeds,
            ledger,
            games,
        }
    }

    pub async fn play(&self, request: PlayRequest, now: DateTime<Utc>) -> EngineResult<PlayResponse> {
        let game_type = request.game.game_type();
        if matches!(request.game, GameRequest::CoinFlip { .. }) {
            return Err(EngineError::InvalidRequest(
                "coin flip is played through lobbies".to_string(),
            ));
        }

        let rules = self.games.rules_for(game_type);
        rng::validate_request(&rules, &request.game)?;
        self.ledger.check_wager(request.wager)?;

        if let Some(ref value) = request.client_seed_override {
            let current = self
                .seeds
                .get_or_create_client_seed(&request.owner_id, now)
                .await?;
            if &current.value != value {
                self.seeds
                    .rotate_client_seed(&request.owner_id, value, now)
                    .await?;
            }
        }

        let mut attempt = 0;
        let reservation = loop {
            let server = self.seeds.get_active_server_seed().await?;
            let client = self
                .seeds
                .get_or_create_client_seed(&request.owner_id, now)
                .await?;

            match self
                .ledger
                .place_wager(
                    &request.owner_id,
                    request.wager,
                    &request.game,
                    &rules,
                    &server,
                    &client,
                    now,
                )
                .await
            {
                Ok(reservation) => break reservation,
                Err(EngineError::StaleSeed(seed)) if attempt < MAX_STALE_SEED_RETRIES => {
                    tracing::debug!(stale_seed = %seed, attempt, "Seed rotated under play, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let outcome = reservation.resolve()?;
        let (round, new_balance) = match self.ledger.settle(&reservation.token, &outcome, now).await {
            Ok(Settlement { round, new_balance }) => (round, new_balance),
            // Maintenance got to it first; the round is written either way.
            Err(EngineError::AlreadySettled(_)) => (
                self.ledger.round(&reservation.token).await?,
                self.ledger.balance(&request.owner_id).await?,
            ),
            Err(e) => return Err(e),
        };

        Ok(PlayResponse {
            round_id: round.id,
            payout: round.payout,
            outcome,
            new_balance,
            verification: VerificationMaterial {
                commitment_hash: reservation.commitment_hash,
                client_seed: reservation.client_seed,
                nonce: reservation.nonce,
                digest: reservation.digest,
            },
        })
    }

    /// Settle wagers left open by callers that went away.
    pub async fn recover_open_wagers(&self, now: DateTime<Utc>) -> EngineResult<Vec<Settlement>> {
        self.ledger.recover_open_reservations(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::events::EventBus;
    use crate::metrics::EngineMetrics;
    use crate::storage::MemoryStore;

    async fn processor() -> (GameProcessor, Arc<SeedRegistry>, Arc<WagerLedger>) {
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::default();
        let metrics = Arc::new(EngineMetrics::new());
        let seeds = Arc::new(SeedRegistry::new(store.clone(), events.clone(), metrics.clone()));
        let ledger = Arc::new(WagerLedger::new(store, LedgerConfig::default(), events, metrics));
        seeds.rotate_server_seed(Utc::now()).await.unwrap();
        (
            GameProcessor::new(seeds.clone(), ledger.clone(), GamesConfig::default()),
            seeds,
            ledger,
        )
    }

    #[tokio::test]
    async fn test_play_each_solo_game() {
        let (processor, _, ledger) = processor().await;
        ledger.fund("alice", 10_000, Utc::now()).await.unwrap();

        let games = vec![
            GameRequest::Crash { cashout_at: 150 },
            GameRequest::Plinko,
            GameRequest::Sweeper {
                mines: 3,
                picks: vec![0, 7, 12],
            },
            GameRequest::Crate,
        ];

        let mut expected_balance = 10_000;
        for (i, game) in games.into_iter().enumerate() {
            let game_type = game.game_type();
            let response = processor
                .play(
                    PlayRequest {
                        owner_id: "alice".to_string(),
                        wager: 100,
                        game,
                        client_seed_override: None,
                    },
                    Utc::now(),
                )
                .await
                .unwrap();

            assert_eq!(response.outcome.game_type(), game_type);
            assert_eq!(response.verification.nonce, i as u64);
            expected_balance = expected_balance - 100 + response.payout;
            assert_eq!(response.new_balance, expected_balance);
        }
    }

    #[tokio::test]
    async fn test_coin_flip_requires_lobby() {
        let (processor, _, ledger) = processor().await;
        ledger.fund("alice", 100, Utc::now()).await.unwrap();

        let err = processor
            .play(
                PlayRequest {
                    owner_id: "alice".to_string(),
                    wager: 10,
                    game: GameRequest::CoinFlip {
                        side: crate::games::types::CoinSide::Heads,
                    },
                    client_seed_override: None,
                },
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
        assert_eq!(ledger.balance("alice").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_client_seed_override_is_used() {
        let (processor, seeds, ledger) = processor().await;
        ledger.fund("alice", 1_000, Utc::now()).await.unwrap();

        let response = processor
            .play(
                PlayRequest {
                    owner_id: "alice".to_string(),
                    wager: 10,
                    game: GameRequest::Plinko,
                    client_seed_override: Some("my own seed".to_string()),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(response.verification.client_seed, "my own seed");
        let current = seeds.get_or_create_client_seed("alice", Utc::now()).await.unwrap();
        assert_eq!(current.value, "my own seed");
    }
}
