/// Activity time metadata
use super::StageOutcome;
use crate::account::metadata_keys;
use crate::context::WorkerContext;
use crate::error::{AppResult, PipelineResult};
use crate::external::RecordKind;
use serde_json::{Map, Value};
use tracing::info;

impl WorkerContext {
    /// First and last analysed record of one kind
    async fn record_span(&self, account: &str, kind: RecordKind) -> AppResult<(Option<i64>, Option<i64>)> {
        let first = self.analysis.first_record(account, kind).await?;
        let last = self.analysis.last_record(account, kind).await?;
        Ok((first.map(|r| r.timestamp), last.map(|r| r.timestamp)))
    }

    pub(crate) async fn extract_time_metadata(&self, account: &str) -> PipelineResult<StageOutcome> {
        let (first_post, last_post) = self.record_span(account, RecordKind::Post).await?;
        let (first_reaction, last_reaction) = self.record_span(account, RecordKind::Reaction).await?;

        let first_activity = first_post.into_iter().chain(first_reaction).min();
        let last_activity = last_post.into_iter().chain(last_reaction).max();

        let mut metadata = Map::new();
        for (key, value) in [
            (metadata_keys::FIRST_ACTIVITY_TIMESTAMP, first_activity),
            (metadata_keys::LAST_ACTIVITY_TIMESTAMP, last_activity),
            (metadata_keys::LAST_POST_TIMESTAMP, last_post),
            (metadata_keys::LAST_REACTION_TIMESTAMP, last_reaction),
        ] {
            if let Some(timestamp) = value {
                metadata.insert(key.to_string(), Value::from(timestamp));
            }
        }

        let updated = self.accounts.merge_metadata(account, metadata).await?;
        info!(account = %account, ?first_activity, ?last_activity, updated, "Activity metadata updated");
        Ok(StageOutcome::Continue)
    }
}
