//! Row stores: an in-memory map for tests and demos, RocksDB for persistence.
//!
//! Both serialize commits behind a single lock, so expectation checks and the
//! write batch that follows them are observed atomically by other commits.

use crate::common::traits::{RowStore, StoreResult, WriteSet};
use crate::config::StorageConfig;
use crate::errors::StorageError;
use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

/// In-memory row store
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StorageError {
    StorageError::ReadFailed("store lock poisoned".to_string())
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows.get(key).cloned())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn commit(&self, writes: WriteSet) -> StoreResult<bool> {
        let mut rows = self.rows.write().map_err(poisoned)?;

        for (key, expected) in writes.expectations() {
            if rows.get(key) != expected.as_ref() {
                return Ok(false);
            }
        }

        for (key, value) in writes.writes() {
            match value {
                Some(v) => rows.insert(key.clone(), v.clone()),
                None => rows.remove(key),
            };
        }
        Ok(true)
    }
}

/// RocksDB-backed row store
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
    commit_lock: Arc<Mutex<()>>,
}

impl RocksStore {
    pub fn new<P: AsRef<Path>>(path: P, write_buffer_size_mb: usize) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(write_buffer_size_mb * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)
            .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        Ok(Self {
            db: Arc::new(db),
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Open the store described by `config`, wiping it first if asked to.
    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        if config.clear_on_start && Path::new(&config.data_directory).exists() {
            tracing::warn!(path = %config.data_directory, "Clearing database on start");
            std::fs::remove_dir_all(&config.data_directory)
                .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        }
        std::fs::create_dir_all(&config.data_directory)
            .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;

        Self::new(&config.data_directory, config.write_buffer_size_mb)
    }
}

#[async_trait]
impl RowStore for RocksStore {
    async fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }

    async fn commit(&self, writes: WriteSet) -> StoreResult<bool> {
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| StorageError::WriteFailed("commit lock poisoned".to_string()))?;

        for (key, expected) in writes.expectations() {
            let current = self
                .db
                .get(key)
                .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if current.as_ref() != expected.as_ref() {
                return Ok(false);
            }
        }

        let mut batch = WriteBatch::default();
        for (key, value) in writes.writes() {
            match value {
                Some(v) => batch.put(key, v),
                None => batch.delete(key),
            }
        }
        self.db.write(batch)?;
        Ok(true)
    }
}
