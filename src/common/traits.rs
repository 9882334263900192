//! Storage collaborator contract
//!
//! The engine never performs an unguarded read-modify-write. Every mutation is
//! a [`WriteSet`]: a list of expected current values plus the writes to apply
//! if, and only if, all of them still hold.

use crate::errors::StorageError;
use async_trait::async_trait;

pub type StoreResult<T> = Result<T, StorageError>;

/// Conditional, all-or-nothing batch of writes.
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    expectations: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    writes: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to currently hold `current` (`None` = absent).
    pub fn expect(&mut self, key: impl Into<Vec<u8>>, current: Option<Vec<u8>>) -> &mut Self {
        self.expectations.push((key.into(), current));
        self
    }

    pub fn expect_absent(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.expect(key, None)
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: Vec<u8>) -> &mut Self {
        self.writes.push((key.into(), Some(value)));
        self
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.writes.push((key.into(), None));
        self
    }

    pub fn expectations(&self) -> &[(Vec<u8>, Option<Vec<u8>>)] {
        &self.expectations
    }

    pub fn writes(&self) -> &[(Vec<u8>, Option<Vec<u8>>)] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Row store the engine reads and writes through
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Read a single row
    async fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// All rows whose key starts with `prefix`, in key order
    async fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply `writes` atomically if every expectation holds.
    ///
    /// Returns `Ok(false)` on a conflict, leaving the store untouched.
    async fn commit(&self, writes: WriteSet) -> StoreResult<bool>;
}
