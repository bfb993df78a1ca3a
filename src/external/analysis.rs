/// Client for the external archive analysis service
///
/// The service takes a raw archive, runs its own extraction, and answers
/// record and sentiment queries per data owner. Requests authenticate with a
/// static client token.
use crate::config::AnalysisConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Status of an analysis task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisStatus {
    Finished,
    Failed,
    Interrupted,
    /// Anything else (`PENDING`, `RUNNING`, ...)
    Pending(String),
}

impl AnalysisStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "FINISHED" => AnalysisStatus::Finished,
            "FAILED" => AnalysisStatus::Failed,
            "INTERRUPTED" => AnalysisStatus::Interrupted,
            other => AnalysisStatus::Pending(other.to_string()),
        }
    }
}

/// Record collections the service can be queried for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Post,
    Reaction,
}

impl RecordKind {
    fn path(&self) -> &'static str {
        match self {
            RecordKind::Post => "posts",
            RecordKind::Reaction => "reactions",
        }
    }
}

/// The part of a record the pipeline needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RecordRef {
    pub timestamp: i64,
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Upload an archive for `account` and start extraction; returns the task id
    async fn submit(&self, account: &str, archive: &Path) -> AppResult<String>;

    async fn status(&self, task_id: &str) -> AppResult<AnalysisStatus>;

    async fn first_record(&self, account: &str, kind: RecordKind) -> AppResult<Option<RecordRef>>;

    async fn last_record(&self, account: &str, kind: RecordKind) -> AppResult<Option<RecordRef>>;

    /// Sentiment score of the seven days ending at `week_end`
    async fn sentiment_for_week(&self, account: &str, week_end: i64) -> AppResult<f64>;

    /// Remove everything the service holds for `account`
    async fn delete_owner(&self, account: &str) -> AppResult<()>;
}

/// HTTP implementation of [`AnalysisService`]
pub struct HttpAnalysisClient {
    http: Client,
    endpoint: String,
    token: String,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct TaskResponse {
    status: String,
}

#[derive(Deserialize)]
struct RecordsResponse {
    results: Vec<RecordRef>,
}

#[derive(Deserialize)]
struct SentimentResponse {
    score: f64,
}

impl HttpAnalysisClient {
    pub fn new(config: &AnalysisConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.client_token.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.endpoint, path))
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.token))
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> AppResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!(action, status = %status, "Analysis service responded");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(AppError::External(format!(
            "Analysis service {} failed with {}: {}",
            action, status, body
        )))
    }

    /// Register the data owner unless the service already knows it
    async fn ensure_owner(&self, account: &str) -> AppResult<()> {
        let response = self
            .request(reqwest::Method::GET, &format!("/data_owners/{}", account))
            .send()
            .await?;

        if response.status() != StatusCode::NOT_FOUND {
            self.send_checked(response, "owner lookup").await?;
            return Ok(());
        }

        self.send(
            self.request(reqwest::Method::POST, "/data_owners/")
                .json(&serde_json::json!({ "public_key": account })),
            "owner registration",
        )
        .await?;
        Ok(())
    }

    async fn send_checked(&self, response: Response, action: &str) -> AppResult<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(AppError::External(format!(
                "Analysis service {} failed with {}",
                action,
                response.status()
            )))
        }
    }

    async fn edge_record(
        &self,
        account: &str,
        kind: RecordKind,
        order: &str,
    ) -> AppResult<Option<RecordRef>> {
        let response = self
            .send(
                self.request(reqwest::Method::GET, &format!("/{}", kind.path()))
                    .query(&[
                        ("data_owner", account),
                        ("order_by", order),
                        ("offset", "0"),
                        ("limit", "1"),
                    ]),
                "record query",
            )
            .await?;

        let body: RecordsResponse = response.json().await?;
        Ok(body.results.into_iter().next())
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisClient {
    async fn submit(&self, account: &str, archive: &Path) -> AppResult<String> {
        self.ensure_owner(account).await?;

        let file = tokio::fs::File::open(archive).await?;
        let length = file.metadata().await?.len();
        let part = Part::stream_with_length(reqwest::Body::from(file), length)
            .file_name("data.zip")
            .mime_str("application/zip")?;
        let form = Form::new()
            .part("file", part)
            .text("data_owner", account.to_string());

        let uploaded: IdResponse = self
            .send(
                self.request(reqwest::Method::POST, "/archives/").multipart(form),
                "archive upload",
            )
            .await?
            .json()
            .await?;

        let task: IdResponse = self
            .send(
                self.request(reqwest::Method::POST, "/tasks/extraction/")
                    .json(&serde_json::json!({ "archive": uploaded.id, "data_owner": account })),
                "extraction trigger",
            )
            .await?
            .json()
            .await?;

        Ok(task.id)
    }

    async fn status(&self, task_id: &str) -> AppResult<AnalysisStatus> {
        let task: TaskResponse = self
            .send(
                self.request(reqwest::Method::GET, &format!("/tasks/{}", task_id)),
                "task status",
            )
            .await?
            .json()
            .await?;

        Ok(AnalysisStatus::parse(&task.status))
    }

    async fn first_record(&self, account: &str, kind: RecordKind) -> AppResult<Option<RecordRef>> {
        self.edge_record(account, kind, "asc").await
    }

    async fn last_record(&self, account: &str, kind: RecordKind) -> AppResult<Option<RecordRef>> {
        self.edge_record(account, kind, "des").await
    }

    async fn sentiment_for_week(&self, account: &str, week_end: i64) -> AppResult<f64> {
        let body: SentimentResponse = self
            .send(
                self.request(reqwest::Method::GET, "/sentiments")
                    .query(&[("data_owner", account.to_string()), ("timestamp", week_end.to_string())]),
                "sentiment query",
            )
            .await?
            .json()
            .await?;

        Ok(body.score)
    }

    async fn delete_owner(&self, account: &str) -> AppResult<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/data_owners/{}", account))
            .send()
            .await?;

        // Unknown owners are already gone
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.send_checked(response, "owner deletion").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!(AnalysisStatus::parse("FINISHED"), AnalysisStatus::Finished);
        assert_eq!(AnalysisStatus::parse("FAILED"), AnalysisStatus::Failed);
        assert_eq!(AnalysisStatus::parse("INTERRUPTED"), AnalysisStatus::Interrupted);
        assert_eq!(
            AnalysisStatus::parse("RUNNING"),
            AnalysisStatus::Pending("RUNNING".to_string())
        );
    }

    #[test]
    fn test_client_trims_endpoint() {
        let client = HttpAnalysisClient::new(&AnalysisConfig {
            endpoint: "http://localhost:8000/".to_string(),
            client_token: "token".to_string(),
            request_timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(client.endpoint, "http://localhost:8000");
    }
}
