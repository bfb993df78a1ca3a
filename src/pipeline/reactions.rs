/// Reaction extraction
///
/// Aggregates the account's reactions, publishes the raw records and records
/// the last reaction time.
use super::{save_stats, StageOutcome};
use crate::account::metadata_keys;
use crate::context::WorkerContext;
use crate::error::{AppResult, ArchiveErrorCode, ArchiveFailure, PipelineResult};
use crate::jobs::ArchiveRef;
use crate::stat_store::BatchWriter;
use crate::stats::{record_key, Aggregator, CountRecord, Section};
use serde_json::{Map, Value};
use tracing::info;

impl WorkerContext {
    pub(crate) async fn extract_reactions(&self, archive: &ArchiveRef) -> PipelineResult<StageOutcome> {
        let id = archive.archive_id;
        let (published, last_timestamp) = self
            .aggregate_reactions(&archive.account)
            .await
            .archive_failure(id, ArchiveErrorCode::FailToExtractReaction)?;

        if let Some(timestamp) = last_timestamp {
            let mut metadata = Map::new();
            metadata.insert(
                metadata_keys::LAST_REACTION_TIMESTAMP.to_string(),
                Value::from(timestamp),
            );
            self.accounts
                .merge_metadata(&archive.account, metadata)
                .await
                .archive_failure(id, ArchiveErrorCode::FailToExtractReaction)?;
        }

        info!(archive_id = %id, account = %archive.account, published, "Reactions extracted");
        Ok(StageOutcome::Continue)
    }

    /// Returns how many reactions were published and the latest timestamp
    async fn aggregate_reactions(&self, account: &str) -> AppResult<(u64, Option<i64>)> {
        let reactions = self.records.reactions(account).await?;
        let raw_key = record_key(account, "reaction");

        let mut writer = BatchWriter::new(self.stats.clone());
        let mut aggregator = Aggregator::new(Section::Reaction);
        let mut published = 0;
        let mut last_timestamp = None;

        for reaction in &reactions {
            if last_timestamp == Some(reaction.timestamp) {
                continue;
            }
            last_timestamp = Some(reaction.timestamp);

            writer
                .save(&raw_key, reaction.timestamp, serde_json::to_vec(reaction)?)
                .await?;
            published += 1;

            if reaction.reaction.is_empty() {
                continue;
            }
            let record = CountRecord::new(reaction.timestamp, reaction.reaction.as_str());
            save_stats(&mut writer, account, aggregator.push(&record)).await?;
        }

        save_stats(&mut writer, account, aggregator.finish()).await?;
        writer.flush().await?;
        Ok((published, last_timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveStatus;
    use crate::pipeline::testing::TestHarness;
    use crate::records::NewReaction;
    use crate::stats::{Granularity, StatsReader};

    fn reaction(timestamp: i64, name: &str) -> NewReaction {
        NewReaction {
            timestamp,
            title: "Alice liked a post".to_string(),
            actor: "Alice".to_string(),
            reaction: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_extract_reactions() {
        let harness = TestHarness::new().await;
        let archive = harness.processing_archive("acct1", Some("abc123")).await;
        harness
            .ctx
            .records
            .insert_reactions(
                "acct1",
                &[
                    reaction(1_584_230_500, "LIKE"),
                    reaction(1_584_230_600, "LOVE"),
                    reaction(1_584_230_700, "LIKE"),
                ],
            )
            .await
            .unwrap();

        let outcome = harness.ctx.extract_reactions(&archive).await.unwrap();
        assert_eq!(outcome, StageOutcome::Continue);

        // Sentiment still has to run
        let stored = harness.ctx.archives.require(archive.archive_id).await.unwrap();
        assert_eq!(stored.status, ArchiveStatus::Processing);

        let reader = StatsReader::new(harness.stats.clone());
        let weeks = reader
            .range("acct1", Section::Reaction, Granularity::Week, 0, i64::MAX, None)
            .await
            .unwrap();
        assert_eq!(weeks.len(), 1);
        assert_eq!(weeks[0].quantity, 3);
        assert_eq!(weeks[0].groups.by_type.get("LIKE"), Some(&2));
        assert_eq!(harness.stats.len(&record_key("acct1", "reaction")).await, 3);

        let account = harness.ctx.accounts.get("acct1").await.unwrap().unwrap();
        assert_eq!(
            account.metadata_i64(metadata_keys::LAST_REACTION_TIMESTAMP),
            Some(1_584_230_700)
        );
    }
}
