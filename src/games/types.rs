use crate::common::types::apply_multiplier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported game types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    Crash,
    Plinko,
    CoinFlip,
    Sweeper,
    Crate,
}

impl GameType {
    pub fn all() -> [GameType; 5] {
        [
            GameType::Crash,
            GameType::Plinko,
            GameType::CoinFlip,
            GameType::Sweeper,
            GameType::Crate,
        ]
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameType::Crash => write!(f, "crash"),
            GameType::Plinko => write!(f, "plinko"),
            GameType::CoinFlip => write!(f, "coinflip"),
            GameType::Sweeper => write!(f, "sweeper"),
            GameType::Crate => write!(f, "crate"),
        }
    }
}

impl std::str::FromStr for GameType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crash" => Ok(GameType::Crash),
            "plinko" => Ok(GameType::Plinko),
            "coinflip" | "coin_flip" => Ok(GameType::CoinFlip),
            "sweeper" => Ok(GameType::Sweeper),
            "crate" => Ok(GameType::Crate),
            other => Err(format!("unknown game type '{}'", other)),
        }
    }
}

/// Coin side, both the call and the result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoinSide {
    Heads,
    Tails,
}

impl CoinSide {
    pub fn opposite(self) -> Self {
        match self {
            CoinSide::Heads => CoinSide::Tails,
            CoinSide::Tails => CoinSide::Heads,
        }
    }
}

impl fmt::Display for CoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinSide::Heads => write!(f, "heads"),
            CoinSide::Tails => write!(f, "tails"),
        }
    }
}

/// One peg decision on a plinko board
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Bounce {
    Left,
    Right,
}

/// A rarity tier in the crate table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrateTier {
    pub name: String,
    pub weight: u32,
    /// Payout multiplier in hundredths
    pub multiplier: u64,
}

impl CrateTier {
    pub fn new(name: &str, weight: u32, multiplier: u64) -> Self {
        Self {
            name: name.to_string(),
            weight,
            multiplier,
        }
    }
}

/// What the player asked for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "game", rename_all = "lowercase")]
pub enum GameRequest {
    /// Cash out automatically at `cashout_at` hundredths
    Crash { cashout_at: u64 },
    Plinko,
    CoinFlip { side: CoinSide },
    /// Reveal `picks` in order on a board hiding `mines` mines
    Sweeper { mines: u8, picks: Vec<u8> },
    Crate,
}

impl GameRequest {
    pub fn game_type(&self) -> GameType {
        match self {
            GameRequest::Crash { .. } => GameType::Crash,
            GameRequest::Plinko => GameType::Plinko,
            GameRequest::CoinFlip { .. } => GameType::CoinFlip,
            GameRequest::Sweeper { .. } => GameType::Sweeper,
            GameRequest::Crate => GameType::Crate,
        }
    }
}

/// Rules a round was resolved under. Snapshotted per round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "game", rename_all = "lowercase")]
pub enum GameRules {
    Crash { house_edge_bps: u32 },
    Plinko { payouts: Vec<u64> },
    CoinFlip { house_edge_bps: u32 },
    Sweeper { tiles: u8, house_edge_bps: u32 },
    Crate { tiers: Vec<CrateTier> },
}

impl GameRules {
    pub fn game_type(&self) -> GameType {
        match self {
            GameRules::Crash { .. } => GameType::Crash,
            GameRules::Plinko { .. } => GameType::Plinko,
            GameRules::CoinFlip { .. } => GameType::CoinFlip,
            GameRules::Sweeper { .. } => GameType::Sweeper,
            GameRules::Crate { .. } => GameType::Crate,
        }
    }
}

/// Resolved outcome, one shape per game
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "game", rename_all = "lowercase")]
pub enum Outcome {
    Crash {
        crash_point: u64,
        cashout_at: u64,
        cashed_out: bool,
    },
    Plinko {
        path: Vec<Bounce>,
        bucket: usize,
        multiplier: u64,
    },
    CoinFlip {
        result: CoinSide,
        called: CoinSide,
    },
    Sweeper {
        mine_positions: Vec<u8>,
        revealed: Vec<u8>,
        hit_mine: bool,
        multiplier: u64,
    },
    Crate {
        tier: String,
        tier_index: usize,
        multiplier: u64,
    },
}

impl Outcome {
    pub fn game_type(&self) -> GameType {
        match self {
            Outcome::Crash { .. } => GameType::Crash,
            Outcome::Plinko { .. } => GameType::Plinko,
            Outcome::CoinFlip { .. } => GameType::CoinFlip,
            Outcome::Sweeper { .. } => GameType::Sweeper,
            Outcome::Crate { .. } => GameType::Crate,
        }
    }

    /// Effective multiplier in hundredths. A coin flip pays double the stake
    /// before any pot edge is taken.
    pub fn multiplier(&self) -> u64 {
        match self {
            Outcome::Crash {
                cashout_at,
                cashed_out,
                ..
            } => {
                if *cashed_out {
                    *cashout_at
                } else {
                    0
                }
            }
            Outcome::Plinko { multiplier, .. }
            | Outcome::Sweeper { multiplier, .. }
            | Outcome::Crate { multiplier, .. } => *multiplier,
            Outcome::CoinFlip { result, called } => {
                if result == called {
                    200
                } else {
                    0
                }
            }
        }
    }

    pub fn payout(&self, wager: u64) -> u64 {
        apply_multiplier(wager, self.multiplier())
    }
}

/// An immutable resolved round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameRound {
    pub id: String,
    pub owner_id: String,
    /// Second player on a lobby round
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_id: Option<String>,
    pub game_type: GameType,
    pub server_seed_id: String,
    pub client_seed_id: String,
    pub nonce: u64,
    pub wager: u64,
    pub request: GameRequest,
    pub rules: GameRules,
    pub outcome: Outcome,
    pub payout: u64,
    pub resolved_at: DateTime<Utc>,
}

/// What a player gets back to check a round later
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationMaterial {
    pub commitment_hash: String,
    pub client_seed: String,
    pub nonce: u64,
    /// Hex-encoded HMAC digest
    pub digest: String,
}
