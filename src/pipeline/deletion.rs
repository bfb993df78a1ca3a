/// Account data teardown
///
/// Removes everything an account owns across the stat store, blob store,
/// analysis service and relational store. Steps are best effort: a failing
/// step is logged and counted and the remaining steps still run. Relational
/// rows go last so a partial teardown can be found and repeated.
use crate::account::validate_account_number;
use crate::context::WorkerContext;
use crate::error::AppResult;
use crate::metrics;
use crate::stats::{all_stat_keys, record_key};
use tracing::{info, warn};

/// What an account teardown removed, and which steps failed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub stat_items: u64,
    pub blobs: u64,
    pub records: u64,
    pub archives: u64,
    pub failed_steps: Vec<&'static str>,
}

impl DeletionReport {
    pub fn is_complete(&self) -> bool {
        self.failed_steps.is_empty()
    }

    fn check<T>(&mut self, account: &str, step: &'static str, result: AppResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(account = %account, step, error = %e, "Account deletion step failed");
                metrics::record_deletion_step_failure(step);
                self.failed_steps.push(step);
                None
            }
        }
    }
}

impl WorkerContext {
    /// Remove all data owned by `account`
    pub async fn delete_account_data(&self, account: &str) -> AppResult<DeletionReport> {
        validate_account_number(account)?;
        let mut report = DeletionReport::default();

        let marked = self.accounts.mark_deleting(account).await;
        report.check(account, "mark_deleting", marked);

        let mut keys = all_stat_keys(account);
        keys.push(record_key(account, "post"));
        keys.push(record_key(account, "reaction"));
        for key in &keys {
            let removed = self.stats.delete_all_for_key(key).await;
            if let Some(count) = report.check(account, "stat_keys", removed) {
                report.stat_items += count;
            }
        }

        let removed = self.blobs.delete_prefix(&format!("{}/", account)).await;
        report.blobs = report.check(account, "blobs", removed).unwrap_or_default();

        let removed = self.analysis.delete_owner(account).await;
        report.check(account, "analysis", removed);

        let removed = self.records.delete_owner(account).await;
        report.records = report.check(account, "records", removed).unwrap_or_default();

        let removed = self.archives.delete_for_account(account).await;
        report.archives = report.check(account, "archives", removed).unwrap_or_default();

        let removed = self.accounts.delete(account).await;
        report.check(account, "account", removed);

        info!(
            account = %account,
            stat_items = report.stat_items,
            blobs = report.blobs,
            records = report.records,
            archives = report.archives,
            failed_steps = ?report.failed_steps,
            "Account data deleted"
        );
        Ok(report)
    }
}
