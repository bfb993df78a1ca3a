/// Archive processing pipeline
///
/// Stage handlers are methods on [`WorkerContext`]. Each returns a
/// [`StageOutcome`]; the dispatcher turns that into follow-up jobs using the
/// chain declared by [`crate::jobs::TaskKind::next`]. Failures go through one error hook:
/// archive failures move the archive to `invalid`, everything else is logged.

mod analysis;
mod deletion;
mod download;
mod ingest;
mod metadata;
mod notify;
mod parse;
mod posts;
mod reactions;
mod sentiments;

#[cfg(test)]
pub(crate) mod testing;

pub use deletion::DeletionReport;
pub use download::resolve_share_link;
pub use ingest::UploadTicket;

use crate::context::WorkerContext;
use crate::error::{AppResult, PipelineError, PipelineResult};
use crate::jobs::{JobHandler, Task};
use crate::metrics;
use crate::stat_store::BatchWriter;
use crate::stats::{stat_key, UsageStat};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a stage asks the dispatcher to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Enqueue the next stages now
    Continue,
    /// Enqueue the next stages after a delay
    ContinueAfter(Duration),
    /// Re-enqueue the same task after a delay
    Retry(Duration),
    /// Stop this archive's chain without failing it
    Stop,
}

impl WorkerContext {
    async fn run_stage(&self, task: &Task) -> PipelineResult<StageOutcome> {
        match task {
            Task::DownloadArchive {
                archive,
                url,
                cookie,
            } => self.download_archive(archive, url, cookie.as_deref()).await,
            Task::ProcessUpload(archive) => self.process_upload(archive).await,
            Task::ParseArchive(archive) => self.parse_archive(archive).await,
            Task::SubmitAnalysis(archive) => self.submit_analysis(archive).await,
            Task::CheckAnalysis(archive) => self.check_analysis(archive).await,
            Task::ExtractPosts(archive) => self.extract_posts(archive).await,
            Task::ExtractReactions(archive) => self.extract_reactions(archive).await,
            Task::ExtractSentiments(archive) => self.extract_sentiments(archive).await,
            Task::ExtractTimeMetadata { account } => self.extract_time_metadata(account).await,
            Task::NotifyFinished { account } => self.notify_finished(account).await,
            Task::DeleteAccountData { account } => {
                self.delete_account_data(account).await?;
                Ok(StageOutcome::Stop)
            }
        }
    }

    async fn enqueue_successors(&self, task: &Task, delay: Duration) -> AppResult<()> {
        for next in task.successors() {
            debug!(from = task.kind().name(), to = next.kind().name(), "Chaining stage");
            self.jobs.send_after(next, delay).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for WorkerContext {
    async fn handle(&self, task: &Task) -> PipelineResult<()> {
        match self.run_stage(task).await? {
            StageOutcome::Continue => self.enqueue_successors(task, Duration::ZERO).await?,
            StageOutcome::ContinueAfter(delay) => self.enqueue_successors(task, delay).await?,
            StageOutcome::Retry(delay) => {
                debug!(task = task.kind().name(), delay_secs = delay.as_secs(), "Re-enqueueing stage");
                self.jobs.send_after(task.clone(), delay).await?;
            }
            StageOutcome::Stop => {
                if !task.kind().next().is_empty() {
                    info!(task = task.kind().name(), account = task.account(), "Pipeline stopped");
                }
            }
        }
        Ok(())
    }

    async fn on_failure(&self, task: &Task, failure: &PipelineError) {
        let name = task.kind().name();
        match failure {
            PipelineError::Validation {
                archive_id,
                code,
                source,
            } => {
                warn!(task = name, archive_id = %archive_id, code = %code, error = %source, "Archive failed");
                match self.archives.invalidate(*archive_id, (*code).into()).await {
                    Ok(true) => metrics::record_archive_invalidated(code.as_str()),
                    Ok(false) => debug!(archive_id = %archive_id, "Archive already invalid or gone"),
                    Err(e) => error!(archive_id = %archive_id, error = %e, "Failed to invalidate archive"),
                }
            }
            PipelineError::Transient(e) => {
                error!(task = name, account = task.account(), error = %e, "Job failed");
            }
            PipelineError::Fatal(e) => {
                error!(task = name, account = task.account(), error = %e, "Job failed permanently");
            }
        }
    }
}

/// Queue finalized stats for writing under their stat keys
async fn save_stats(writer: &mut BatchWriter, account: &str, stats: Vec<UsageStat>) -> AppResult<()> {
    for stat in stats {
        let key = stat_key(account, stat.section, stat.granularity);
        writer.save(&key, stat.period_started_at, stat.encode()?).await?;
    }
    Ok(())
}
