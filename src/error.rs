/// Unified error types for the archive insights worker
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for storage, service and decoding operations
#[derive(Error, Debug)]
pub enum AppError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Blob storage errors
    #[error("Blob storage error: {0}")]
    BlobStorage(String),

    /// Time-series stat store errors
    #[error("Stat store error: {0}")]
    StatStore(String),

    /// Job queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// Archive decoding errors
    #[error("Decode error: {0}")]
    Decode(String),

    /// Outbound HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Errors reported by an external collaborator (analysis, notification, geocoding)
    #[error("External service error: {0}")]
    External(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., an archive already in flight)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Whether a retry of the same operation could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::BlobStorage(_)
                | AppError::StatStore(_)
                | AppError::Queue(_)
                | AppError::Http(_)
                | AppError::External(_)
                | AppError::Io(_)
        )
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::StatStore(format!("Redis error: {}", e))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Decode(format!("JSON error: {}", e))
    }
}

impl From<serde_cbor::Error> for AppError {
    fn from(e: serde_cbor::Error) -> Self {
        AppError::Decode(format!("CBOR error: {}", e))
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(e: zip::result::ZipError) -> Self {
        AppError::Decode(format!("Zip error: {}", e))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Blocking task failed: {}", e))
    }
}

/// Error body returned by the HTTP endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "InvalidRequest", self.to_string()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "Conflict", self.to_string()),
            AppError::Database(_) | AppError::Internal(_) | AppError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                self.to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for worker operations
pub type AppResult<T> = Result<T, AppError>;

/// Error codes stored on an archive when it is invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveErrorCode {
    FailToCreateArchive,
    FailToDownloadArchive,
    InvalidArchive,
    FailToParseArchive,
    FailToSubmitArchive,
    FailToAnalyzeArchive,
    FailToExtractPost,
    FailToExtractReaction,
    FailToExtractSentiment,
}

impl ArchiveErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveErrorCode::FailToCreateArchive => "FAIL_TO_CREATE_ARCHIVE",
            ArchiveErrorCode::FailToDownloadArchive => "FAIL_TO_DOWNLOAD_ARCHIVE",
            ArchiveErrorCode::InvalidArchive => "INVALID_ARCHIVE",
            ArchiveErrorCode::FailToParseArchive => "FAIL_TO_PARSE_ARCHIVE",
            ArchiveErrorCode::FailToSubmitArchive => "FAIL_TO_SUBMIT_ARCHIVE",
            ArchiveErrorCode::FailToAnalyzeArchive => "FAIL_TO_ANALYZE_ARCHIVE",
            ArchiveErrorCode::FailToExtractPost => "FAIL_TO_EXTRACT_POST",
            ArchiveErrorCode::FailToExtractReaction => "FAIL_TO_EXTRACT_REACTION",
            ArchiveErrorCode::FailToExtractSentiment => "FAIL_TO_EXTRACT_SENTIMENT",
        }
    }

    /// Human readable message shown to the account owner
    pub fn message(&self) -> &'static str {
        match self {
            ArchiveErrorCode::FailToCreateArchive => "failed to create archive",
            ArchiveErrorCode::FailToDownloadArchive => "failed to download archive",
            ArchiveErrorCode::InvalidArchive => "archive is not a valid data export",
            ArchiveErrorCode::FailToParseArchive => "failed to parse archive",
            ArchiveErrorCode::FailToSubmitArchive => "failed to submit archive for analysis",
            ArchiveErrorCode::FailToAnalyzeArchive => "archive analysis failed",
            ArchiveErrorCode::FailToExtractPost => "failed to extract posts",
            ArchiveErrorCode::FailToExtractReaction => "failed to extract reactions",
            ArchiveErrorCode::FailToExtractSentiment => "failed to extract sentiment",
        }
    }
}

impl fmt::Display for ArchiveErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error persisted on an invalid archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveError {
    pub code: ArchiveErrorCode,
    pub message: String,
}

impl From<ArchiveErrorCode> for ArchiveError {
    fn from(code: ArchiveErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
        }
    }
}

/// Outcome of a failed job, matched exhaustively by the worker's error handler
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The archive cannot make progress; it is moved to `invalid` with `code`
    #[error("archive {archive_id} failed with {code}: {source}")]
    Validation {
        archive_id: Uuid,
        code: ArchiveErrorCode,
        #[source]
        source: AppError,
    },

    /// I/O style failure; the job is failed and not re-enqueued
    #[error("transient failure: {0}")]
    Transient(AppError),

    /// Programming or configuration failure
    #[error("fatal failure: {0}")]
    Fatal(AppError),
}

impl PipelineError {
    /// Label used for failure metrics
    pub fn class(&self) -> &'static str {
        match self {
            PipelineError::Validation { .. } => "validation",
            PipelineError::Transient(_) => "transient",
            PipelineError::Fatal(_) => "fatal",
        }
    }
}

impl From<AppError> for PipelineError {
    fn from(e: AppError) -> Self {
        if e.is_transient() {
            PipelineError::Transient(e)
        } else {
            PipelineError::Fatal(e)
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        AppError::from(e).into()
    }
}

/// Attach an archive failure code to a fallible step
pub trait ArchiveFailure<T> {
    fn archive_failure(self, archive_id: Uuid, code: ArchiveErrorCode) -> Result<T, PipelineError>;
}

impl<T> ArchiveFailure<T> for AppResult<T> {
    fn archive_failure(self, archive_id: Uuid, code: ArchiveErrorCode) -> Result<T, PipelineError> {
        self.map_err(|source| PipelineError::Validation {
            archive_id,
            code,
            source,
        })
    }
}

/// Result type alias for job handlers
pub type PipelineResult<T> = Result<T, PipelineError>;
