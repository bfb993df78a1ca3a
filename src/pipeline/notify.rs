use super::StageOutcome;
use crate::context::WorkerContext;
use crate::error::PipelineResult;
use crate::external::NotificationKind;
use tracing::warn;

impl WorkerContext {
    /// Tell the account its insights are ready; a failed send is only logged
    pub(crate) async fn notify_finished(&self, account: &str) -> PipelineResult<StageOutcome> {
        if let Err(e) = self
            .notifier
            .notify(account, NotificationKind::ArchiveProcessed)
            .await
        {
            warn!(account = %account, error = %e, "Failed to send notification");
        }
        Ok(StageOutcome::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::TestHarness;

    #[tokio::test]
    async fn test_notify_finished() {
        let harness = TestHarness::new().await;
        harness.ctx.notify_finished("acct1").await.unwrap();

        let sent = harness.notifier.sent.lock().await;
        assert_eq!(
            *sent,
            vec![("acct1".to_string(), NotificationKind::ArchiveProcessed)]
        );
    }
}
