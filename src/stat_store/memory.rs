/// In-process stat store backed by ordered maps
use super::{check_batch_size, StatItem, StatStore};
use crate::error::AppResult;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStatStore {
    data: RwLock<HashMap<String, BTreeMap<i64, Vec<u8>>>>,
}

impl MemoryStatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values stored under `key`
    pub async fn len(&self, key: &str) -> usize {
        self.data.read().await.get(key).map_or(0, |series| series.len())
    }

    /// Keys that currently hold at least one value
    pub async fn keys(&self) -> Vec<String> {
        let data = self.data.read().await;
        let mut keys: Vec<String> = data
            .iter()
            .filter(|(_, series)| !series.is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StatStore for MemoryStatStore {
    async fn put(&self, key: &str, timestamp: i64, value: Vec<u8>) -> AppResult<()> {
        self.data
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(timestamp, value);
        Ok(())
    }

    async fn batch_put(&self, items: Vec<StatItem>) -> AppResult<()> {
        check_batch_size(&items)?;

        let mut data = self.data.write().await;
        for item in items {
            data.entry(item.key).or_default().insert(item.timestamp, item.value);
        }
        Ok(())
    }

    async fn query_range(
        &self,
        key: &str,
        from: i64,
        to: i64,
        limit: Option<usize>,
    ) -> AppResult<Vec<StatItem>> {
        if from > to {
            return Ok(Vec::new());
        }

        let data = self.data.read().await;
        let Some(series) = data.get(key) else {
            return Ok(Vec::new());
        };

        Ok(series
            .range(from..=to)
            .rev()
            .take(limit.unwrap_or(super::DEFAULT_QUERY_LIMIT))
            .map(|(ts, value)| StatItem::new(key, *ts, value.clone()))
            .collect())
    }

    async fn query_exact(&self, key: &str, timestamp: i64) -> AppResult<Option<Vec<u8>>> {
        Ok(self
            .data
            .read()
            .await
            .get(key)
            .and_then(|series| series.get(&timestamp).cloned()))
    }

    async fn delete_all_for_key(&self, key: &str) -> AppResult<u64> {
        Ok(self
            .data
            .write()
            .await
            .remove(key)
            .map_or(0, |series| series.len() as u64))
    }
}
