/// Redis-backed stat store
///
/// Each series is a sorted set of timestamps (score = member = timestamp)
/// plus a hash from timestamp to the encoded value.
use super::{check_batch_size, StatItem, StatStore, DEFAULT_QUERY_LIMIT};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct RedisStatStore {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisStatStore {
    /// Connect to Redis
    pub async fn new(redis_url: &str, key_prefix: &str) -> AppResult<Self> {
        info!("Connecting stat store to Redis at {}", redis_url);

        let client = Client::open(redis_url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            AppError::StatStore(format!("Redis client creation failed: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            AppError::StatStore(format!("Redis connection failed: {}", e))
        })?;

        info!("✓ Stat store connection established");

        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn index_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn values_key(&self, key: &str) -> String {
        format!("{}{}:values", self.key_prefix, key)
    }

    fn add_to_pipeline(&self, pipe: &mut redis::Pipeline, key: &str, timestamp: i64, value: &[u8]) {
        pipe.zadd(self.index_key(key), timestamp, timestamp)
            .ignore()
            .hset(self.values_key(key), timestamp, value)
            .ignore();
    }
}

#[async_trait]
impl StatStore for RedisStatStore {
    async fn put(&self, key: &str, timestamp: i64, value: Vec<u8>) -> AppResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.add_to_pipeline(&mut pipe, key, timestamp, &value);

        let mut conn = self.connection.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn batch_put(&self, items: Vec<StatItem>) -> AppResult<()> {
        check_batch_size(&items)?;
        if items.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for item in &items {
            self.add_to_pipeline(&mut pipe, &item.key, item.timestamp, &item.value);
        }

        let mut conn = self.connection.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        debug!("Wrote batch of {} stat items", items.len());
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

        let mut conn = self.connection.clone();
        let limit = limit.unwrap_or(DEFAULT_QUERY_LIMIT) as isize;
        let timestamps: Vec<i64> = conn
            .zrevrangebyscore_limit(self.index_key(key), to, from, 0, limit)
            .await?;
        if timestamps.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<Vec<u8>>> = redis::cmd("HMGET")
            .arg(self.values_key(key))
            .arg(&timestamps)
            .query_async(&mut conn)
            .await?;

        Ok(timestamps
            .into_iter()
            .zip(values)
            .filter_map(|(ts, value)| value.map(|v| StatItem::new(key, ts, v)))
            .collect())
    }

    async fn query_exact(&self, key: &str, timestamp: i64) -> AppResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = conn.hget(self.values_key(key), timestamp).await?;
        Ok(value)
    }

    async fn delete_all_for_key(&self, key: &str) -> AppResult<u64> {
        let mut conn = self.connection.clone();
        let count: u64 = conn.zcard(self.index_key(key)).await?;
        let _: () = conn
            .del(&[self.index_key(key), self.values_key(key)])
            .await?;
        Ok(count)
    }
}
