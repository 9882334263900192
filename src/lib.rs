//! Fairwager - provably-fair wagering core
//!
//! Commit-reveal seeds, HMAC-derived outcomes for crash, plinko, coin flip,
//! sweeper and crate games, a double-entry style wager ledger and a
//! peer-vs-peer coin flip lobby. Every state change is a conditional write
//! against a [`common::traits::RowStore`], so concurrent callers never
//! double-spend, double-settle or double-join.

pub mod common;
pub mod config;
pub mod errors;
pub mod events;
pub mod factory;
pub mod fairness;
pub mod games;
pub mod ledger;
pub mod lobby;
pub mod maintenance;
pub mod metrics;
mod records;
pub mod seeds;
pub mod services;
pub mod storage;

pub use common::traits::{RowStore, WriteSet};
pub use config::EngineConfig;
pub use errors::{EngineError, EngineResult};
pub use events::EngineEvent;
pub use factory::EngineFactory;
pub use fairness::{verify, RevealedRound, VerificationReport};
pub use games::{CoinSide, GameRequest, GameType, Outcome, PlayRequest, PlayResponse};
pub use lobby::{JoinResult, LobbyState};
pub use services::{Engine, EngineBuilder};
pub use storage::{MemoryStore, RocksStore};
