/// Account notifications
///
/// Notifications are fire and forget: callers log a failure and move on.
use crate::config::NotificationConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Insights for a new archive are ready
    ArchiveProcessed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ArchiveProcessed => "archive_processed",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            NotificationKind::ArchiveProcessed => "Your archive has been processed.",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, account: &str, kind: NotificationKind) -> AppResult<()>;
}

/// Sends a push notification through an HTTP push provider
pub struct PushNotifier {
    http: Client,
    config: NotificationConfig,
}

impl PushNotifier {
    pub fn new(config: NotificationConfig) -> AppResult<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl Notifier for PushNotifier {
    async fn notify(&self, account: &str, kind: NotificationKind) -> AppResult<()> {
        let response = self
            .http
            .post(&self.config.endpoint)
            .header(reqwest::header::AUTHORIZATION, format!("Basic {}", self.config.api_key))
            .json(&json!({
                "app_id": self.config.app_id,
                "include_external_user_ids": [account],
                "data": { "event": kind.as_str() },
                "contents": { "en": kind.message() },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::External(format!(
                "Push provider rejected {} for {}: {}",
                kind,
                account,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Logs notifications when no push provider is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, account: &str, kind: NotificationKind) -> AppResult<()> {
        info!(account, event = %kind, "Notification");
        Ok(())
    }
}
