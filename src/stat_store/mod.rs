/// Time-series stat store
///
/// Key/timestamp addressed byte values with put-overwrite semantics. Usage
/// stats and published raw records are written here; range queries return
/// newest first.

pub mod batch;
pub mod memory;
pub mod redis_store;

pub use batch::{BatchWriter, MAX_BATCH_ITEMS};
pub use memory::MemoryStatStore;
pub use redis_store::RedisStatStore;

use crate::error::AppResult;
use async_trait::async_trait;

/// Default page size for range queries
pub const DEFAULT_QUERY_LIMIT: usize = 1000;

/// One value in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatItem {
    pub key: String,
    pub timestamp: i64,
    pub value: Vec<u8>,
}

impl StatItem {
    pub fn new(key: impl Into<String>, timestamp: i64, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            timestamp,
            value,
        }
    }
}

/// Storage backend for time-series values
#[async_trait]
pub trait StatStore: Send + Sync {
    /// Store a value, overwriting any existing value at (key, timestamp)
    async fn put(&self, key: &str, timestamp: i64, value: Vec<u8>) -> AppResult<()>;

    /// Store up to [`MAX_BATCH_ITEMS`] values in one round trip
    async fn batch_put(&self, items: Vec<StatItem>) -> AppResult<()>;

    /// Values with `from <= timestamp <= to`, newest first
    async fn query_range(
        &self,
        key: &str,
        from: i64,
        to: i64,
        limit: Option<usize>,
    ) -> AppResult<Vec<StatItem>>;

    /// Value stored at exactly (key, timestamp)
    async fn query_exact(&self, key: &str, timestamp: i64) -> AppResult<Option<Vec<u8>>>;

    /// Remove every value under `key`; returns how many were removed
    async fn delete_all_for_key(&self, key: &str) -> AppResult<u64>;
}

pub(crate) fn check_batch_size(items: &[StatItem]) -> AppResult<()> {
    if items.len() > MAX_BATCH_ITEMS {
        return Err(crate::error::AppError::StatStore(format!(
            "Batch of {} items exceeds the limit of {}",
            items.len(),
            MAX_BATCH_ITEMS
        )));
    }
    Ok(())
}
