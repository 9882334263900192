//! Factory for engine initialization
//!
//! Centralizes the store selection and engine wiring the binary and tests share.

use crate::{
    common::traits::RowStore,
    config::{EngineConfig, StorageBackend, StorageConfig},
    errors::EngineResult,
    services::Engine,
    storage::{MemoryStore, RocksStore},
};
use std::sync::Arc;

pub struct EngineFactory;

impl EngineFactory {
    /// Open the store named by `config.backend`
    pub fn open_store(config: &StorageConfig) -> EngineResult<Arc<dyn RowStore>> {
        match config.backend {
            StorageBackend::Memory => {
                tracing::info!("Using in-memory store");
                Ok(Arc::new(MemoryStore::new()))
            }
            StorageBackend::RocksDb => {
                tracing::info!(path = %config.data_directory, "Opening RocksDB store");
                Ok(Arc::new(RocksStore::open(config)?))
            }
        }
    }

    /// Open the configured store and bootstrap an engine over it.
    pub async fn create_engine(config: EngineConfig) -> EngineResult<Engine> {
        config.validate()?;
        let store = Self::open_store(&config.storage)?;
        Engine::bootstrap(config, store).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_engine_with_rocks_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.storage.backend = StorageBackend::RocksDb;
        config.storage.data_directory = dir.path().join("db").to_string_lossy().into_owned();

        let engine = EngineFactory::create_engine(config.clone()).await.unwrap();
        engine.deposit("alice", 42).await.unwrap();
        let seed = engine.seed_info("alice").await.unwrap().server_seed_id;
        drop(engine);

        let reopened = EngineFactory::create_engine(config).await.unwrap();
        assert_eq!(reopened.balance("alice").await.unwrap(), 42);
        assert_eq!(reopened.seed_info("alice").await.unwrap().server_seed_id, seed);
    }

    #[test]
    fn test_memory_backend_starts_empty() {
        let store = EngineFactory::open_store(&StorageConfig::default()).unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let rows = rt.block_on(store.scan_prefix(b"")).unwrap();
        assert!(rows.is_empty());
    }
}
