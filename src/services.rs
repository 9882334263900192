//! Service container wiring the engine components together
//!
//! Every component shares one store, one event bus and one metrics registry.
//! Callers either bootstrap an [`Engine`] directly with a store of their
//! choosing or go through [`EngineBuilder`].

use crate::{
    common::{config::ConfigLoader, traits::RowStore},
    config::EngineConfig,
    errors::{ConfigurationError, EngineResult},
    events::{EngineEvent, EventBus},
    factory::EngineFactory,
    fairness::{RevealedRound, VerificationReport, VerificationService},
    games::{types::CoinSide, GameProcessor, PlayRequest, PlayResponse},
    ledger::WagerLedger,
    lobby::{JoinResult, Lobby, LobbyCreated, LobbyMatchmaker, LobbySummary},
    maintenance::MaintenanceWorker,
    metrics::{EngineMetrics, MetricsSnapshot},
    seeds::{PublicSeedInfo, SeedRegistry, ServerSeed},
};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// A running engine
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn RowStore>,
    events: EventBus,
    metrics: Arc<EngineMetrics>,
    seeds: Arc<SeedRegistry>,
    ledger: Arc<WagerLedger>,
    processor: GameProcessor,
    lobbies: Arc<LobbyMatchmaker>,
    verifier: VerificationService,
    maintenance: Mutex<Option<Arc<MaintenanceWorker>>>,
}

impl Engine {
    /// Validate `config`, wire every component over `store`, make sure a
    /// server seed is active and settle wagers a previous run left open.
    pub async fn bootstrap(config: EngineConfig, store: Arc<dyn RowStore>) -> EngineResult<Self> {
        config.validate()?;

        let events = EventBus::new(config.monitoring.event_buffer);
        let metrics = Arc::new(EngineMetrics::new());
        let seeds = Arc::new(SeedRegistry::new(store.clone(), events.clone(), metrics.clone()));
        let ledger = Arc::new(WagerLedger::new(
            store.clone(),
            config.ledger.clone(),
            events.clone(),
            metrics.clone(),
        ));
        let processor = GameProcessor::new(seeds.clone(), ledger.clone(), config.games.clone());
        let lobbies = Arc::new(LobbyMatchmaker::new(
            store.clone(),
            seeds.clone(),
            ledger.clone(),
            config.lobby.clone(),
            config.games.coin_flip.clone(),
            events.clone(),
            metrics.clone(),
        ));
        let verifier = VerificationService::new(seeds.clone(), ledger.clone());

        let now = Utc::now();
        let active = seeds.ensure_active_seed(now).await?;
        let recovered = processor.recover_open_wagers(now).await?;
        tracing::info!(
            active_seed = %active.id,
            commitment = %active.commitment_hash,
            recovered = recovered.len(),
            "Engine ready"
        );

        Ok(Self {
            config,
            store,
            events,
            metrics,
            seeds,
            ledger,
            processor,
            lobbies,
            verifier,
            maintenance: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn RowStore> {
        Arc::clone(&self.store)
    }

    pub fn seeds(&self) -> Arc<SeedRegistry> {
        Arc::clone(&self.seeds)
    }

    pub fn ledger(&self) -> Arc<WagerLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn lobbies(&self) -> Arc<LobbyMatchmaker> {
        Arc::clone(&self.lobbies)
    }

    pub fn processor(&self) -> &GameProcessor {
        &self.processor
    }

    pub fn verifier(&self) -> &VerificationService {
        &self.verifier
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn deposit(&self, owner: &str, amount: u64) -> EngineResult<u64> {
        self.ledger.fund(owner, amount, Utc::now()).await
    }

    pub async fn balance(&self, owner: &str) -> EngineResult<u64> {
        self.ledger.balance(owner).await
    }

    pub async fn seed_info(&self, owner: &str) -> EngineResult<PublicSeedInfo> {
        self.seeds.public_seed_info(owner, Utc::now()).await
    }

    pub async fn play(&self, request: PlayRequest) -> EngineResult<PlayResponse> {
        self.processor.play(request, Utc::now()).await
    }

    pub async fn rotate(&self) -> EngineResult<ServerSeed> {
        self.seeds.rotate_server_seed(Utc::now()).await
    }

    pub async fn create_lobby(&self, creator: &str, wager: u64, side: CoinSide) -> EngineResult<LobbyCreated> {
        self.lobbies.create(creator, wager, side, Utc::now()).await
    }

    pub async fn list_lobbies(&self) -> EngineResult<Vec<LobbySummary>> {
        self.lobbies.list(Utc::now()).await
    }

    pub async fn lobby(&self, lobby_id: &str) -> EngineResult<Lobby> {
        self.lobbies.lobby(lobby_id, Utc::now()).await
    }

    pub async fn join_lobby(&self, lobby_id: &str, joiner: &str) -> EngineResult<JoinResult> {
        self.lobbies.join(lobby_id, joiner, Utc::now()).await
    }

    pub async fn reveal(&self, round_id: &str) -> EngineResult<RevealedRound> {
        self.verifier.reveal(round_id).await
    }

    pub async fn verify_round(&self, round_id: &str) -> EngineResult<VerificationReport> {
        self.verifier.verify_round(round_id).await
    }

    /// Start the background maintenance task; a second call is a no-op.
    pub fn start_maintenance(&self) -> Arc<MaintenanceWorker> {
        let mut slot = self.maintenance.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(worker) = slot.as_ref() {
            return worker.clone();
        }
        let worker = MaintenanceWorker::spawn(
            self.lobbies.clone(),
            self.ledger.clone(),
            self.config.sweep_interval(),
        );
        *slot = Some(worker.clone());
        worker
    }

    pub fn shutdown(&self) {
        let slot = self.maintenance.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(worker) = slot {
            worker.stop();
        }
        tracing::info!("Engine shut down");
    }
}

/// Builds an [`Engine`] from a config file or defaults
pub struct EngineBuilder {
    config_path: Option<String>,
    config: Option<EngineConfig>,
    store_override: Option<Arc<dyn RowStore>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config_path: None,
            config: None,
            store_override: None,
        }
    }

    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the store (useful for testing)
    pub fn with_store(mut self, store: Arc<dyn RowStore>) -> Self {
        self.store_override = Some(store);
        self
    }

    pub async fn build(self) -> EngineResult<Engine> {
        let config = match (self.config, self.config_path) {
            (Some(_), Some(_)) => {
                return Err(ConfigurationError::ValidationFailed(
                    "give either a config or a config path, not both".to_string(),
                )
                .into())
            }
            (Some(config), None) => config,
            (None, Some(path)) => ConfigLoader::new().with_path(path).load()?,
            (None, None) => EngineConfig::default(),
        };

        let store = match self.store_override {
            Some(store) => store,
            None => EngineFactory::open_store(&config.storage)?,
        };
        Engine::bootstrap(config, store).await
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
