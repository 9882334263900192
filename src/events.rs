//! Engine notifications
//!
//! Progression and notification systems subscribe here; the engine only
//! publishes. A send with no subscribers is not an error.

use crate::games::types::{CoinSide, GameType};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    RoundSettled {
        round_id: String,
        owner_id: String,
        game_type: GameType,
        wager: u64,
        payout: u64,
    },
    LobbyCreated {
        lobby_id: String,
        creator_id: String,
        wager: u64,
        expires_at: DateTime<Utc>,
    },
    LobbyCompleted {
        lobby_id: String,
        round_id: String,
        winner_id: String,
        loser_id: String,
        flip_result: CoinSide,
        payout: u64,
    },
    LobbyExpired {
        lobby_id: String,
        creator_id: String,
        refund: u64,
    },
    SeedRotated {
        revealed_seed_id: Option<String>,
        active_seed_id: String,
        commitment_hash: String,
    },
}

#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1_024)
    }
}
