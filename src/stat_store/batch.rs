/// Buffered writes to the stat store
use super::{StatItem, StatStore};
use crate::error::AppResult;
use crate::metrics;
use std::sync::Arc;
use tracing::debug;

/// Largest batch the store accepts in one write
pub const MAX_BATCH_ITEMS: usize = 25;

/// Buffers stat writes and flushes them FIFO in batches of at most
/// [`MAX_BATCH_ITEMS`]. Call [`BatchWriter::flush`] at end of stream.
pub struct BatchWriter {
    store: Arc<dyn StatStore>,
    buffer: Vec<StatItem>,
    written: u64,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn StatStore>) -> Self {
        Self {
            store,
            buffer: Vec::with_capacity(MAX_BATCH_ITEMS),
            written: 0,
        }
    }

    /// Queue a value; flushes once the buffer is full
    pub async fn save(&mut self, key: &str, timestamp: i64, value: Vec<u8>) -> AppResult<()> {
        self.buffer.push(StatItem::new(key, timestamp, value));
        if self.buffer.len() >= MAX_BATCH_ITEMS {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write everything buffered
    pub async fn flush(&mut self) -> AppResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(MAX_BATCH_ITEMS));
        let count = batch.len() as u64;
        self.store.batch_put(batch).await?;

        self.written += count;
        metrics::record_stat_batch(count);
        debug!("Flushed {} stat items", count);
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Items successfully written so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::stat_store::MemoryStatStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records batch sizes and fails every write after `fail_after` batches
    struct RecordingStore {
        batches: Mutex<Vec<Vec<i64>>>,
        fail_after: usize,
    }

    #[async_trait]
    impl StatStore for RecordingStore {
        async fn put(&self, _key: &str, _timestamp: i64, _value: Vec<u8>) -> AppResult<()> {
            Ok(())
        }

        async fn batch_put(&self, items: Vec<StatItem>) -> AppResult<()> {
            let mut batches = self.batches.lock().unwrap();
            if batches.len() >= self.fail_after {
                return Err(AppError::StatStore("throttled".to_string()));
            }
            batches.push(items.iter().map(|i| i.timestamp).collect());
            Ok(())
        }

        async fn query_range(
            &self,
            _key: &str,
            _from: i64,
            _to: i64,
            _limit: Option<usize>,
        ) -> AppResult<Vec<StatItem>> {
            Ok(Vec::new())
        }

        async fn query_exact(&self, _key: &str, _timestamp: i64) -> AppResult<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn delete_all_for_key(&self, _key: &str) -> AppResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_flushes_in_batches_of_25_fifo() {
        let store = Arc::new(RecordingStore {
            batches: Mutex::new(Vec::new()),
            fail_after: usize::MAX,
        });
        let mut writer = BatchWriter::new(store.clone());

        for ts in 0..60 {
            writer.save("k", ts, vec![]).await.unwrap();
        }
        assert_eq!(writer.pending(), 10);
        writer.flush().await.unwrap();

        let batches = store.batches.lock().unwrap();
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![25, 25, 10]);
        assert_eq!(batches[0][0], 0);
        assert_eq!(batches[2][9], 59);
        assert_eq!(writer.written(), 60);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_earlier_batches() {
        let store = Arc::new(RecordingStore {
            batches: Mutex::new(Vec::new()),
            fail_after: 1,
        });
        let mut writer = BatchWriter::new(store.clone());

        let mut failed = false;
        for ts in 0..50 {
            if writer.save("k", ts, vec![]).await.is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);
        assert_eq!(store.batches.lock().unwrap().len(), 1);
        assert_eq!(writer.written(), 25);
    }

    #[tokio::test]
    async fn test_writes_land_in_store() {
        let store = Arc::new(MemoryStatStore::new());
        let mut writer = BatchWriter::new(store.clone());
        writer.save("a/post", 1, b"x".to_vec()).await.unwrap();
        assert_eq!(store.len("a/post").await, 0);
        writer.flush().await.unwrap();
        assert_eq!(store.len("a/post").await, 1);
    }
}
