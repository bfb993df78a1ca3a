/// Read side of usage statistics
use super::{stat_key, Granularity, Section, UsageStat};
use crate::error::AppResult;
use crate::stat_store::StatStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct StatsReader {
    store: Arc<dyn StatStore>,
}

impl StatsReader {
    pub fn new(store: Arc<dyn StatStore>) -> Self {
        Self { store }
    }

    /// Stats whose period starts within `[from, to]`, newest first
    pub async fn range(
        &self,
        account: &str,
        section: Section,
        granularity: Granularity,
        from: i64,
        to: i64,
        limit: Option<usize>,
    ) -> AppResult<Vec<UsageStat>> {
        let key = stat_key(account, section, granularity);
        let items = self.store.query_range(&key, from, to, limit).await?;
        items
            .iter()
            .map(|item| UsageStat::decode(&item.value).map_err(Into::into))
            .collect()
    }

    /// Stat of the period containing `timestamp`, if any
    pub async fn period(
        &self,
        account: &str,
        section: Section,
        granularity: Granularity,
        timestamp: i64,
    ) -> AppResult<Option<UsageStat>> {
        let key = stat_key(account, section, granularity);
        let start = granularity.period_start(timestamp);
        match self.store.query_exact(&key, start).await? {
            Some(bytes) => Ok(Some(UsageStat::decode(&bytes)?)),
            None => Ok(None),
        }
    }
}
