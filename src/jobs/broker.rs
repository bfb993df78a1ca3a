/// Job queue backends
///
/// A broker holds ready jobs in FIFO order plus delayed jobs keyed by their
/// execution time. `pop` first promotes every delayed job that is due.
use super::Job;
use crate::config::QueueConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Delayed jobs promoted per `pop`
const PROMOTE_BATCH: isize = 100;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue `job`; with an `eta` it becomes visible at that time
    async fn push(&self, job: Job, eta: Option<DateTime<Utc>>) -> AppResult<()>;

    /// Next job that is due, if any
    async fn pop(&self) -> AppResult<Option<Job>>;

    /// Ready plus delayed jobs
    async fn pending(&self) -> AppResult<usize>;
}

/// Build the configured broker
pub async fn create_broker(config: &QueueConfig) -> AppResult<Arc<dyn Broker>> {
    match config {
        QueueConfig::Memory => Ok(Arc::new(MemoryBroker::new())),
        QueueConfig::Redis { url, key_prefix } => {
            Ok(Arc::new(RedisBroker::new(url, key_prefix).await?))
        }
    }
}

#[derive(Default)]
struct MemoryQueue {
    ready: VecDeque<Job>,
    /// Keyed by (eta millis, insertion sequence)
    delayed: BTreeMap<(i64, u64), Job>,
    sequence: u64,
}

/// In-process broker for single node deployments and tests
#[derive(Default)]
pub struct MemoryBroker {
    queue: Mutex<MemoryQueue>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs waiting for their execution time
    pub async fn delayed(&self) -> Vec<(DateTime<Utc>, Job)> {
        let queue = self.queue.lock().await;
        queue
            .delayed
            .iter()
            .filter_map(|((eta, _), job)| {
                DateTime::from_timestamp_millis(*eta).map(|eta| (eta, job.clone()))
            })
            .collect()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn push(&self, job: Job, eta: Option<DateTime<Utc>>) -> AppResult<()> {
        let mut queue = self.queue.lock().await;
        match eta {
            Some(eta) if eta > Utc::now() => {
                queue.sequence += 1;
                let key = (eta.timestamp_millis(), queue.sequence);
                queue.delayed.insert(key, job);
            }
            _ => queue.ready.push_back(job),
        }
        Ok(())
    }

    async fn pop(&self) -> AppResult<Option<Job>> {
        let mut queue = self.queue.lock().await;
        let now = Utc::now().timestamp_millis();

        while let Some(entry) = queue.delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let job = entry.remove();
            queue.ready.push_back(job);
        }

        Ok(queue.ready.pop_front())
    }

    async fn pending(&self) -> AppResult<usize> {
        let queue = self.queue.lock().await;
        Ok(queue.ready.len() + queue.delayed.len())
    }
}

/// Redis broker shared by every worker node
///
/// Ready jobs live in a list, delayed jobs in a sorted set scored by their
/// execution time in milliseconds.
#[derive(Clone)]
pub struct RedisBroker {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisBroker {
    pub async fn new(redis_url: &str, key_prefix: &str) -> AppResult<Self> {
        info!("Connecting job queue to Redis at {}", redis_url);

        let client = Client::open(redis_url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            AppError::Queue(format!("Redis client creation failed: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            AppError::Queue(format!("Redis connection failed: {}", e))
        })?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn ready_key(&self) -> String {
        format!("{}ready", self.key_prefix)
    }

    fn delayed_key(&self) -> String {
        format!("{}delayed", self.key_prefix)
    }

    async fn promote_due(&self) -> AppResult<()> {
        let mut conn = self.connection.clone();
        let now = Utc::now().timestamp_millis();

        let due: Vec<String> = conn
            .zrangebyscore_limit(self.delayed_key(), "-inf", now, 0, PROMOTE_BATCH)
            .await
            .map_err(queue_error)?;

        for payload in due {
            // Only the node that removes the entry moves it
            let removed: i64 = conn
                .zrem(self.delayed_key(), &payload)
                .await
                .map_err(queue_error)?;
            if removed == 1 {
                let _: i64 = conn
                    .rpush(self.ready_key(), &payload)
                    .await
                    .map_err(queue_error)?;
            }
        }
        Ok(())
    }
}

fn queue_error(e: redis::RedisError) -> AppError {
    AppError::Queue(format!("Redis error: {}", e))
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push(&self, job: Job, eta: Option<DateTime<Utc>>) -> AppResult<()> {
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.connection.clone();

        match eta {
            Some(eta) if eta > Utc::now() => {
                let _: i64 = conn
                    .zadd(self.delayed_key(), &payload, eta.timestamp_millis())
                    .await
                    .map_err(queue_error)?;
            }
            _ => {
                let _: i64 = conn
                    .rpush(self.ready_key(), &payload)
                    .await
                    .map_err(queue_error)?;
            }
        }

        debug!(job_id = %job.id, "Job pushed to Redis");
        Ok(())
    }

    async fn pop(&self) -> AppResult<Option<Job>> {
        self.promote_due().await?;

        let mut conn = self.connection.clone();
        let payload: Option<String> = conn
            .lpop(self.ready_key(), None)
            .await
            .map_err(queue_error)?;

        payload
            .map(|p| serde_json::from_str(&p).map_err(AppError::from))
            .transpose()
    }

    async fn pending(&self) -> AppResult<usize> {
        let mut conn = self.connection.clone();
        let ready: usize = conn.llen(self.ready_key()).await.map_err(queue_error)?;
        let delayed: usize = conn.zcard(self.delayed_key()).await.map_err(queue_error)?;
        Ok(ready + delayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{ArchiveRef, Task};
    use uuid::Uuid;

    fn job(account: &str) -> Job {
        Job::new(Task::ParseArchive(ArchiveRef::new(Uuid::new_v4(), account)))
    }

    #[tokio::test]
    async fn test_memory_broker_fifo() {
        let broker = MemoryBroker::new();
        broker.push(job("a"), None).await.unwrap();
        broker.push(job("b"), None).await.unwrap();

        assert_eq!(broker.pending().await.unwrap(), 2);
        assert_eq!(broker.pop().await.unwrap().unwrap().task.account(), "a");
        assert_eq!(broker.pop().await.unwrap().unwrap().task.account(), "b");
        assert!(broker.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_broker_delays_until_eta() {
        let broker = MemoryBroker::new();
        let later = Utc::now() + chrono::Duration::hours(1);
        broker.push(job("later"), Some(later)).await.unwrap();
        broker.push(job("now"), None).await.unwrap();

        assert_eq!(broker.pop().await.unwrap().unwrap().task.account(), "now");
        assert!(broker.pop().await.unwrap().is_none());
        assert_eq!(broker.pending().await.unwrap(), 1);

        let delayed = broker.delayed().await;
        assert_eq!(delayed.len(), 1);
        assert_eq!(delayed[0].1.task.account(), "later");
    }

    #[tokio::test]
    async fn test_memory_broker_past_eta_is_ready() {
        let broker = MemoryBroker::new();
        let past = Utc::now() - chrono::Duration::seconds(5);
        broker.push(job("due"), Some(past)).await.unwrap();

        assert_eq!(broker.pop().await.unwrap().unwrap().task.account(), "due");
    }
}
