/// Blob Storage System
///
/// Holds uploaded archives and the media files extracted from them.
/// Keys are `/`-separated paths whose first segment is the account number,
/// so an account's blobs can be removed by prefix.

pub mod disk;
pub mod s3;

pub use disk::DiskBlobBackend;
pub use s3::{S3BlobBackend, S3Config};

use crate::config::BlobstoreConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Payload of an upload
#[derive(Debug, Clone)]
pub enum BlobBody {
    Bytes(Vec<u8>),
    /// Streamed from a local file
    File(PathBuf),
}

/// Blob storage backend trait
///
/// Implementations handle the actual storage and retrieval of blob data.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Store a blob under `key`, replacing any previous content
    async fn put(&self, key: &str, body: BlobBody, content_type: &str) -> AppResult<()>;

    /// Copy a blob into a local file; returns the number of bytes written
    async fn download_to(&self, key: &str, destination: &Path) -> AppResult<u64>;

    /// Check if a blob exists
    async fn exists(&self, key: &str) -> AppResult<bool>;

    /// Time-limited URL from which the blob can be fetched
    async fn presigned_get_url(&self, key: &str, expires_in: Duration) -> AppResult<String>;

    /// Time-limited URL to which a client can upload the blob directly
    async fn presigned_put_url(&self, key: &str, expires_in: Duration) -> AppResult<String>;

    /// Delete every blob whose key starts with `prefix`; returns how many were removed
    async fn delete_prefix(&self, prefix: &str) -> AppResult<u64>;
}

/// Build the configured backend
pub async fn create_backend(config: &BlobstoreConfig) -> AppResult<Arc<dyn BlobBackend>> {
    match config {
        BlobstoreConfig::Disk {
            location,
            public_url,
            signing_secret,
        } => Ok(Arc::new(DiskBlobBackend::new(
            location.clone(),
            public_url.clone(),
            signing_secret.clone(),
        ))),
        BlobstoreConfig::S3 {
            bucket,
            region,
            access_key_id,
            secret_access_key,
            endpoint,
        } => {
            let backend = S3BlobBackend::new(S3Config {
                bucket: bucket.clone(),
                region: region.clone(),
                endpoint: endpoint.clone(),
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
            })
            .await?;
            Ok(Arc::new(backend))
        }
    }
}

/// Reject keys that could escape the store root
pub fn validate_key(key: &str) -> AppResult<()> {
    if key.is_empty() || key.starts_with('/') {
        return Err(AppError::Validation(format!("Invalid blob key: {:?}", key)));
    }
    if key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return Err(AppError::Validation(format!("Invalid blob key: {:?}", key)));
    }
    Ok(())
}

/// Content type from a file name's extension
pub fn content_type_for(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "zip" => "application/zip",
        "json" => "application/json",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("acct/facebook/archives/1/archive.zip").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("acct/../other").is_err());
        assert!(validate_key("acct//double").is_err());
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("archive.zip"), "application/zip");
        assert_eq!(content_type_for("photos/IMG.JPG"), "image/jpeg");
        assert_eq!(content_type_for("videos/clip.mp4"), "video/mp4");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
