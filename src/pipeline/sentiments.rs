/// Sentiment extraction
///
/// Asks the analysis service for one score per week between the account's
/// first and last post and feeds the scores through the sentiment
/// aggregator. This is the last extraction stage, so it also marks the
/// archive `processed`.
use super::{save_stats, StageOutcome};
use crate::archive::{ArchiveChanges, ArchiveStatus};
use crate::context::WorkerContext;
use crate::error::{AppResult, ArchiveErrorCode, ArchiveFailure, PipelineResult};
use crate::external::RecordKind;
use crate::jobs::ArchiveRef;
use crate::metrics;
use crate::stat_store::BatchWriter;
use crate::stats::{Aggregator, Section};
use crate::timeutil::{abs_week, SECONDS_PER_WEEK};
use tracing::{debug, info};

impl WorkerContext {
    pub(crate) async fn extract_sentiments(&self, archive: &ArchiveRef) -> PipelineResult<StageOutcome> {
        let id = archive.archive_id;
        let weeks = self
            .aggregate_sentiments(&archive.account)
            .await
            .archive_failure(id, ArchiveErrorCode::FailToExtractSentiment)?;

        self.archives
            .transition(id, ArchiveStatus::Processed, ArchiveChanges::default())
            .await?;
        metrics::record_archive_processed();

        info!(archive_id = %id, account = %archive.account, weeks, "Sentiment extracted, archive processed");
        Ok(StageOutcome::Continue)
    }

    /// Returns how many weeks were scored
    async fn aggregate_sentiments(&self, account: &str) -> AppResult<u64> {
        let first = self.analysis.first_record(account, RecordKind::Post).await?;
        let last = self.analysis.last_record(account, RecordKind::Post).await?;

        let (first, last) = match (first, last) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => {
                debug!(account = %account, "No analysed posts, skipping sentiment");
                return Ok(0);
            }
        };

        let mut writer = BatchWriter::new(self.stats.clone());
        let mut aggregator = Aggregator::new(Section::Sentiment);
        let mut weeks = 0u64;

        let mut week_start = abs_week(first);
        while week_start <= abs_week(last) {
            let score = self
                .analysis
                .sentiment_for_week(account, week_start + SECONDS_PER_WEEK - 1)
                .await?;
            save_stats(&mut writer, account, aggregator.push_score(week_start, score)).await?;
            weeks += 1;
            week_start += SECONDS_PER_WEEK;
        }

        save_stats(&mut writer, account, aggregator.finish()).await?;
        writer.flush().await?;
        Ok(weeks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::jobs::{Broker, JobHandler, Task};
    use crate::pipeline::testing::{FakeAnalysis, TestHarness};
    use crate::stats::{Granularity, StatsReader};

    // Sunday 2020-03-15 00:00 UTC
    const WEEK0: i64 = 1_584_230_400;

    #[tokio::test]
    async fn test_weekly_scores_are_averaged() {
        let analysis = FakeAnalysis::default();
        analysis
            .set_range("acct1", RecordKind::Post, WEEK0 + 3600, WEEK0 + 2 * SECONDS_PER_WEEK + 60)
            .await;
        {
            let mut scores = analysis.scores.lock().await;
            scores.insert(WEEK0 + SECONDS_PER_WEEK - 1, 2.0);
            scores.insert(WEEK0 + 2 * SECONDS_PER_WEEK - 1, 4.0);
            scores.insert(WEEK0 + 3 * SECONDS_PER_WEEK - 1, 5.0);
        }
        let harness = TestHarness::with_analysis(analysis).await;
        let archive = harness.processing_archive("acct1", Some("abc123")).await;

        harness.ctx.extract_sentiments(&archive).await.unwrap();

        let reader = StatsReader::new(harness.stats.clone());
        let weeks = reader
            .range("acct1", Section::Sentiment, Granularity::Week, 0, i64::MAX, None)
            .await
            .unwrap();
        assert_eq!(weeks.len(), 3);
        assert_eq!(weeks[0].period_started_at, WEEK0 + 2 * SECONDS_PER_WEEK);
        assert_eq!(weeks[0].quantity, 5);

        let years = reader
            .range("acct1", Section::Sentiment, Granularity::Year, 0, i64::MAX, None)
            .await
            .unwrap();
        assert_eq!(years.len(), 1);
        // (2 + 4 + 5) / 3 rounds to 4
        assert_eq!(years[0].quantity, 4);

        let stored = harness.ctx.archives.require(archive.archive_id).await.unwrap();
        assert_eq!(stored.status, ArchiveStatus::Processed);
    }

    #[tokio::test]
    async fn test_no_posts_still_processes_archive() {
        let harness = TestHarness::new().await;
        let archive = harness.processing_archive("acct1", Some("abc123")).await;

        let outcome = harness.ctx.extract_sentiments(&archive).await.unwrap();
        assert_eq!(outcome, StageOutcome::Continue);
        assert!(harness.stats.keys().await.is_empty());

        let stored = harness.ctx.archives.require(archive.archive_id).await.unwrap();
        assert_eq!(stored.status, ArchiveStatus::Processed);
    }

    #[tokio::test]
    async fn test_processed_only_after_sentiment() {
        let harness = TestHarness::new().await;
        let archive = harness.processing_archive("acct1", Some("abc123")).await;

        harness
            .ctx
            .handle(&Task::ExtractReactions(archive.clone()))
            .await
            .unwrap();
        let stored = harness.ctx.archives.require(archive.archive_id).await.unwrap();
        assert_eq!(stored.status, ArchiveStatus::Processing);

        let next = harness.broker.pop().await.unwrap().unwrap();
        assert_eq!(next.task, Task::ExtractSentiments(archive.clone()));

        harness.ctx.handle(&next.task).await.unwrap();
        let stored = harness.ctx.archives.require(archive.archive_id).await.unwrap();
        assert_eq!(stored.status, ArchiveStatus::Processed);
    }

    #[tokio::test]
    async fn test_sentiment_failure_invalidates_archive() {
        let analysis = FakeAnalysis {
            fail_sentiment: true,
            ..Default::default()
        };
        analysis.set_range("acct1", RecordKind::Post, WEEK0, WEEK0 + 60).await;
        let harness = TestHarness::with_analysis(analysis).await;
        let archive = harness.processing_archive("acct1", Some("abc123")).await;

        let task = Task::ExtractSentiments(archive.clone());
        let error = harness.ctx.handle(&task).await.unwrap_err();
        assert!(matches!(
            error,
            PipelineError::Validation {
                code: ArchiveErrorCode::FailToExtractSentiment,
                ..
            }
        ));
        harness.ctx.on_failure(&task, &error).await;

        let stored = harness.ctx.archives.require(archive.archive_id).await.unwrap();
        assert_eq!(stored.status, ArchiveStatus::Invalid);
        assert_eq!(
            stored.error.unwrap().code,
            ArchiveErrorCode::FailToExtractSentiment
        );
        assert_eq!(harness.broker.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_processed_requires_fingerprint() {
        let harness = TestHarness::new().await;
        let archive = harness.processing_archive("acct1", None).await;

        let result = harness.ctx.extract_sentiments(&archive).await;
        assert!(matches!(result, Err(PipelineError::Fatal(_))));

        let stored = harness.ctx.archives.require(archive.archive_id).await.unwrap();
        assert_eq!(stored.status, ArchiveStatus::Processing);
    }
}
