//! Row stores that stretch the gaps between an engine's reads and writes
#![allow(dead_code)]

use async_trait::async_trait;
use fairwager::common::traits::StoreResult;
use fairwager::{MemoryStore, RowStore, WriteSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Suspends on every read, so concurrent callers interleave between reads.
pub struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl RowStore for SlowStore {
    async fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan_prefix(prefix).await
    }

    async fn commit(&self, writes: WriteSet) -> StoreResult<bool> {
        self.inner.commit(writes).await
    }
}

/// Never completes the first commit that settles a reservation.
pub struct StallingStore {
    inner: MemoryStore,
    stall: AtomicBool,
}

impl StallingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            stall: AtomicBool::new(true),
        }
    }

    /// Whether a settle commit is now stuck
    pub fn has_stalled(&self) -> bool {
        !self.stall.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RowStore for StallingStore {
    async fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan_prefix(prefix).await
    }

    async fn commit(&self, writes: WriteSet) -> StoreResult<bool> {
        let settles = writes
            .writes()
            .iter()
            .any(|(key, value)| value.is_none() && key.starts_with(b"reservation:"));
        if settles && self.stall.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.commit(writes).await
    }
}
