/// Analysis service stages
///
/// The archive is handed to the external analysis service once, then its
/// task is polled with a fixed delay until it finishes, fails or is
/// interrupted. There is no retry limit.
use super::StageOutcome;
use crate::context::WorkerContext;
use crate::error::{AppError, ArchiveErrorCode, ArchiveFailure, PipelineResult};
use crate::external::AnalysisStatus;
use crate::jobs::ArchiveRef;
use tracing::{debug, info, warn};

impl WorkerContext {
    pub(crate) async fn submit_analysis(&self, archive: &ArchiveRef) -> PipelineResult<StageOutcome> {
        let id = archive.archive_id;
        let record = self.archives.require(id).await?;

        let path = self
            .local_archive(&record, ArchiveErrorCode::FailToSubmitArchive)
            .await?;

        let task_id = self
            .analysis
            .submit(&archive.account, &path)
            .await
            .archive_failure(id, ArchiveErrorCode::FailToSubmitArchive)?;
        self.archives.set_analysis_task(id, &task_id).await?;

        if let Err(e) = tokio::fs::remove_dir_all(self.work_dir(id)).await {
            debug!(archive_id = %id, error = %e, "Could not remove work directory");
        }

        info!(archive_id = %id, task_id = %task_id, "Archive submitted for analysis");
        Ok(StageOutcome::ContinueAfter(self.config.worker.first_poll_delay()))
    }

    pub(crate) async fn check_analysis(&self, archive: &ArchiveRef) -> PipelineResult<StageOutcome> {
        let id = archive.archive_id;
        let record = self.archives.require(id).await?;
        let task_id = record
            .analysis_task_id
            .ok_or_else(|| AppError::Validation(format!("Archive {} was never submitted", id)))
            .archive_failure(id, ArchiveErrorCode::FailToAnalyzeArchive)?;

        match self.analysis.status(&task_id).await? {
            AnalysisStatus::Finished => {
                info!(archive_id = %id, task_id = %task_id, "Analysis finished");
                Ok(StageOutcome::Continue)
            }
            AnalysisStatus::Failed => Err(AppError::External(format!(
                "Analysis task {} failed",
                task_id
            )))
            .archive_failure(id, ArchiveErrorCode::FailToAnalyzeArchive),
            AnalysisStatus::Interrupted => {
                warn!(archive_id = %id, task_id = %task_id, "Analysis interrupted, polling stopped");
                Ok(StageOutcome::Stop)
            }
            AnalysisStatus::Pending(status) => {
                debug!(archive_id = %id, task_id = %task_id, status = %status, "Analysis still running");
                Ok(StageOutcome::Retry(self.config.worker.poll_interval()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveChanges, ArchiveStatus, NewArchive};
    use crate::error::PipelineError;
    use crate::jobs::{JobHandler, Task};
    use crate::pipeline::testing::TestHarness;
    use std::time::Duration;

    async fn submitted(harness: &TestHarness) -> ArchiveRef {
        let ctx = &harness.ctx;
        let archive = ctx
            .archives
            .create(NewArchive {
                account_number: "acct1".to_string(),
                archive_type: "facebook".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        ctx.archives.set_analysis_task(archive.id, "task-1").await.unwrap();
        ArchiveRef::new(archive.id, "acct1")
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let harness = TestHarness::new().await;
        let archive = submitted(&harness).await;
        let ctx = &harness.ctx;

        harness.analysis.set_status(AnalysisStatus::Finished).await;
        assert_eq!(ctx.check_analysis(&archive).await.unwrap(), StageOutcome::Continue);

        harness.analysis.set_status(AnalysisStatus::Interrupted).await;
        assert_eq!(ctx.check_analysis(&archive).await.unwrap(), StageOutcome::Stop);

        harness
            .analysis
            .set_status(AnalysisStatus::Pending("RUNNING".to_string()))
            .await;
        assert_eq!(
            ctx.check_analysis(&archive).await.unwrap(),
            StageOutcome::Retry(Duration::from_secs(600))
        );

        harness.analysis.set_status(AnalysisStatus::Failed).await;
        assert!(matches!(
            ctx.check_analysis(&archive).await,
            Err(PipelineError::Validation {
                code: ArchiveErrorCode::FailToAnalyzeArchive,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_pending_check_is_rescheduled() {
        let harness = TestHarness::new().await;
        let archive = submitted(&harness).await;
        harness
            .analysis
            .set_status(AnalysisStatus::Pending("PENDING".to_string()))
            .await;

        let task = Task::CheckAnalysis(archive.clone());
        harness.ctx.handle(&task).await.unwrap();

        let delayed = harness.broker.delayed().await;
        assert_eq!(delayed.len(), 1);
        assert_eq!(delayed[0].1.task, task);
    }

    #[tokio::test]
    async fn test_failed_analysis_invalidates_archive() {
        let harness = TestHarness::new().await;
        let archive = submitted(&harness).await;
        harness
            .ctx
            .archives
            .transition(archive.archive_id, ArchiveStatus::Submitted, ArchiveChanges::default())
            .await
            .unwrap();
        harness.analysis.set_status(AnalysisStatus::Failed).await;

        let task = Task::CheckAnalysis(archive.clone());
        let error = harness.ctx.handle(&task).await.unwrap_err();
        harness.ctx.on_failure(&task, &error).await;

        let stored = harness.ctx.archives.require(archive.archive_id).await.unwrap();
        assert_eq!(stored.status, ArchiveStatus::Invalid);
        assert_eq!(
            stored.error.unwrap().code,
            ArchiveErrorCode::FailToAnalyzeArchive
        );
    }

    #[tokio::test]
    async fn test_submit_without_blob_fails() {
        let harness = TestHarness::new().await;
        let archive = submitted(&harness).await;

        assert!(matches!(
            harness.ctx.submit_analysis(&archive).await,
            Err(PipelineError::Validation {
                code: ArchiveErrorCode::FailToSubmitArchive,
                ..
            })
        ));
    }
}
