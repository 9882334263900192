//! Engine counters

use crate::games::types::GameType;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct GameCounters {
    rounds: AtomicU64,
    wagered: AtomicU64,
    paid_out: AtomicU64,
}

#[derive(Debug)]
pub struct EngineMetrics {
    start_time: Instant,
    rounds: AtomicU64,
    wagered: AtomicU64,
    paid_out: AtomicU64,
    lobbies_created: AtomicU64,
    lobbies_completed: AtomicU64,
    lobbies_expired: AtomicU64,
    lobby_join_conflicts: AtomicU64,
    seed_rotations: AtomicU64,
    commit_retries: AtomicU64,
    per_game: DashMap<GameType, GameCounters>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GameStats {
    pub rounds: u64,
    pub wagered: u64,
    pub paid_out: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub rounds: u64,
    pub wagered: u64,
    pub paid_out: u64,
    pub lobbies_created: u64,
    pub lobbies_completed: u64,
    pub lobbies_expired: u64,
    pub lobby_join_conflicts: u64,
    pub seed_rotations: u64,
    pub commit_retries: u64,
    pub per_game: BTreeMap<String, GameStats>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            rounds: AtomicU64::new(0),
            wagered: AtomicU64::new(0),
            paid_out: AtomicU64::new(0),
            lobbies_created: AtomicU64::new(0),
            lobbies_completed: AtomicU64::new(0),
            lobbies_expired: AtomicU64::new(0),
            lobby_join_conflicts: AtomicU64::new(0),
            seed_rotations: AtomicU64::new(0),
            commit_retries: AtomicU64::new(0),
            per_game: DashMap::new(),
        }
    }

    pub fn record_round(&self, game_type: GameType, wager: u64, payout: u64) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
        self.wagered.fetch_add(wager, Ordering::Relaxed);
        self.paid_out.fetch_add(payout, Ordering::Relaxed);

        let entry = self.per_game.entry(game_type).or_default();
        entry.rounds.fetch_add(1, Ordering::Relaxed);
        entry.wagered.fetch_add(wager, Ordering::Relaxed);
        entry.paid_out.fetch_add(payout, Ordering::Relaxed);
    }

    pub fn record_lobby_created(&self) {
        self.lobbies_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lobby_completed(&self) {
        self.lobbies_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lobby_expired(&self) {
        self.lobbies_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_join_conflict(&self) {
        self.lobby_join_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rotation(&self) {
        self.seed_rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit_retry(&self) {
        self.commit_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let per_game = self
            .per_game
            .iter()
            .map(|entry| {
                (
                    entry.key().to_string(),
                    GameStats {
                        rounds: entry.rounds.load(Ordering::Relaxed),
                        wagered: entry.wagered.load(Ordering::Relaxed),
                        paid_out: entry.paid_out.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            uptime_secs: self.uptime().as_secs(),
            rounds: self.rounds.load(Ordering::Relaxed),
            wagered: self.wagered.load(Ordering::Relaxed),
            paid_out: self.paid_out.load(Ordering::Relaxed),
            lobbies_created: self.lobbies_created.load(Ordering::Relaxed),
            lobbies_completed: self.lobbies_completed.load(Ordering::Relaxed),
            lobbies_expired: self.lobbies_expired.load(Ordering::Relaxed),
            lobby_join_conflicts: self.lobby_join_conflicts.load(Ordering::Relaxed),
            seed_rotations: self.seed_rotations.load(Ordering::Relaxed),
            commit_retries: self.commit_retries.load(Ordering::Relaxed),
            per_game,
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
