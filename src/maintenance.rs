//! Background maintenance: lobby expiry and recovery of abandoned wagers.
//!
//! Both passes are safe to race the foreground paths. Expiry and settlement
//! are conditional writes, so whichever side commits first wins and the other
//! backs off.

use crate::errors::EngineResult;
use crate::ledger::WagerLedger;
use crate::lobby::LobbyMatchmaker;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenancePass {
    pub lobbies_expired: usize,
    pub wagers_recovered: usize,
}

pub struct MaintenanceWorker {
    lobbies: Arc<LobbyMatchmaker>,
    ledger: Arc<WagerLedger>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl MaintenanceWorker {
    pub fn spawn(
        lobbies: Arc<LobbyMatchmaker>,
        ledger: Arc<WagerLedger>,
        interval: Duration,
    ) -> Arc<Self> {
        let worker = Arc::new(Self {
            lobbies,
            ledger,
            interval,
            running: Arc::new(AtomicBool::new(true)),
        });

        worker.clone().spawn_task();
        worker
    }

    fn spawn_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.interval);
            while self.running.load(Ordering::SeqCst) {
                tick.tick().await;
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = self.run_once(Utc::now()).await {
                    tracing::warn!("Maintenance pass failed: {}", e);
                }
            }
            tracing::debug!("Maintenance worker stopped");
        });
    }

    /// Expire overdue lobbies, then settle wagers older than the grace period.
    pub async fn run_once(&self, now: DateTime<Utc>) -> EngineResult<MaintenancePass> {
        let lobbies_expired = self.lobbies.sweep(now).await?;
        let cutoff = now - self.ledger.reservation_grace();
        let wagers_recovered = self.ledger.recover_stale_reservations(cutoff, now).await?.len();

        let pass = MaintenancePass {
            lobbies_expired,
            wagers_recovered,
        };
        if pass != MaintenancePass::default() {
            tracing::debug!(lobbies_expired, wagers_recovered, "Maintenance pass");
        }
        Ok(pass)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoinFlipConfig, LedgerConfig, LobbyConfig};
    use crate::common::traits::RowStore;
    use crate::events::EventBus;
    use crate::games::types::{CoinSide, GameRequest, GameRules};
    use crate::metrics::EngineMetrics;
    use crate::seeds::SeedRegistry;
    use crate::storage::MemoryStore;
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        seeds: Arc<SeedRegistry>,
        ledger: Arc<WagerLedger>,
        lobbies: Arc<LobbyMatchmaker>,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn RowStore> = Arc::new(MemoryStore::new());
        let events = EventBus::default();
        let metrics = Arc::new(EngineMetrics::new());
        let seeds = Arc::new(SeedRegistry::new(store.clone(), events.clone(), metrics.clone()));
        seeds.rotate_server_seed(Utc::now()).await.unwrap();
        let ledger = Arc::new(WagerLedger::new(
            store.clone(),
            LedgerConfig::default(),
            events.clone(),
            metrics.clone(),
        ));
        let lobbies = Arc::new(LobbyMatchmaker::new(
            store,
            seeds.clone(),
            ledger.clone(),
            LobbyConfig::default(),
            CoinFlipConfig::default(),
            events,
            metrics,
        ));
        Fixture {
            seeds,
            ledger,
            lobbies,
        }
    }

    #[tokio::test]
    async fn test_pass_respects_grace_period() {
        let f = fixture().await;
        let now = Utc::now();
        f.ledger.fund("alice", 1_000, now).await.unwrap();
        f.lobbies.create("alice", 100, CoinSide::Heads, now).await.unwrap();

        let server = f.seeds.get_active_server_seed().await.unwrap();
        let client = f.seeds.get_or_create_client_seed("alice", now).await.unwrap();
        let reservation = f
            .ledger
            .place_wager(
                "alice",
                100,
                &GameRequest::Crate,
                &GameRules::Crate {
                    tiers: crate::config::CrateConfig::default().tiers,
                },
                &server,
                &client,
                now,
            )
            .await
            .unwrap();
        assert_eq!(f.ledger.balance("alice").await.unwrap(), 800);

        let worker = MaintenanceWorker {
            lobbies: f.lobbies.clone(),
            ledger: f.ledger.clone(),
            interval: Duration::from_secs(60),
            running: Arc::new(AtomicBool::new(false)),
        };

        // Too young to touch either.
        let pass = worker.run_once(now + ChronoDuration::seconds(1)).await.unwrap();
        assert_eq!(pass, MaintenancePass::default());
        assert_eq!(f.ledger.open_reservations().await.unwrap().len(), 1);

        let later = now + ChronoDuration::minutes(6);
        let pass = worker.run_once(later).await.unwrap();
        assert_eq!(
            pass,
            MaintenancePass {
                lobbies_expired: 1,
                wagers_recovered: 1
            }
        );
        assert!(f.ledger.open_reservations().await.unwrap().is_empty());

        let payout = reservation.resolve().unwrap().payout(100);
        assert_eq!(f.ledger.balance("alice").await.unwrap(), 900 + payout);
        assert_eq!(f.ledger.round(&reservation.token).await.unwrap().payout, payout);
    }

    #[tokio::test]
    async fn test_worker_stops() {
        let f = fixture().await;
        let worker = MaintenanceWorker::spawn(f.lobbies.clone(), f.ledger.clone(), Duration::from_millis(10));
        assert!(worker.is_running());
        tokio::time::sleep(Duration::from_millis(30)).await;
        worker.stop();
        assert!(!worker.is_running());
    }
}
