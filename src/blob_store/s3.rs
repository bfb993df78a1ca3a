/// S3-compatible blob storage backend
use crate::blob_store::{validate_key, BlobBackend, BlobBody};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, error, info};

/// Maximum keys accepted by a single DeleteObjects call
const DELETE_BATCH_SIZE: usize = 1000;

/// S3 blob storage backend
///
/// Supports AWS S3 and S3-compatible storage providers (MinIO, DigitalOcean Spaces, etc.)
#[derive(Clone)]
pub struct S3BlobBackend {
    client: Arc<Client>,
    bucket: String,
}

/// Configuration for S3 storage
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,

    /// AWS region (e.g., "us-east-1")
    pub region: String,

    /// Custom endpoint for S3-compatible services
    /// Example: "https://nyc3.digitaloceanspaces.com" or "http://localhost:9000"
    pub endpoint: Option<String>,

    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3BlobBackend {
    /// Create a new S3 blob backend
    pub async fn new(config: S3Config) -> AppResult<Self> {
        info!(
            "Initializing S3 blob storage (bucket: {}, region: {})",
            config.bucket, config.region
        );

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "archive-insights",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        if let Some(endpoint) = &config.endpoint {
            debug!("Using custom S3 endpoint: {}", endpoint);
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true); // Required for MinIO and some S3-compatible services
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("S3 blob storage initialized");

        Ok(Self {
            client: Arc::new(client),
            bucket: config.bucket,
        })
    }

    fn presigning(expires_in: Duration) -> AppResult<PresigningConfig> {
        PresigningConfig::expires_in(expires_in)
            .map_err(|e| AppError::BlobStorage(format!("Invalid presign expiry: {}", e)))
    }

    async fn list_keys(&self, prefix: &str) -> AppResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    error!("Failed to list S3 objects under {}: {}", prefix, e);
                    AppError::BlobStorage(format!("S3 list failed: {}", e))
                })?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl BlobBackend for S3BlobBackend {
    async fn put(&self, key: &str, body: BlobBody, content_type: &str) -> AppResult<()> {
        validate_key(key)?;

        let body = match body {
            BlobBody::Bytes(data) => ByteStream::from(data),
            BlobBody::File(path) => ByteStream::from_path(&path).await.map_err(|e| {
                AppError::BlobStorage(format!("Failed to open {}: {}", path.display(), e))
            })?,
        };

        debug!("Uploading blob to S3: {} (type: {})", key, content_type);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to upload blob to S3: {}", e);
                AppError::BlobStorage(format!("S3 upload failed: {}", e))
            })?;

        debug!("Blob uploaded to S3: {}", key);
        Ok(())
    }

    async fn download_to(&self, key: &str, destination: &Path) -> AppResult<u64> {
        validate_key(key)?;

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|s| s.is_no_such_key()).unwrap_or(false) {
                    AppError::NotFound(format!("Blob {} not found", key))
                } else {
                    error!("Failed to download blob from S3: {}", e);
                    AppError::BlobStorage(format!("S3 download failed: {}", e))
                }
            })?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(destination).await?;
        let mut body = response.body.into_async_read();
        let bytes = tokio::io::copy(&mut body, &mut file).await?;

        debug!("Blob downloaded from S3: {} ({} bytes)", key, bytes);
        Ok(bytes)
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        validate_key(key)?;

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|s| s.is_not_found()).unwrap_or(false) => Ok(false),
            Err(e) => {
                error!("Failed to check blob existence in S3: {}", e);
                Err(AppError::BlobStorage(format!("S3 head object failed: {}", e)))
            }
        }
    }

    async fn presigned_get_url(&self, key: &str, expires_in: Duration) -> AppResult<String> {
        validate_key(key)?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(Self::presigning(expires_in)?)
            .await
            .map_err(|e| AppError::BlobStorage(format!("S3 presign failed: {}", e)))?;

        Ok(request.uri().to_string())
    }

    async fn presigned_put_url(&self, key: &str, expires_in: Duration) -> AppResult<String> {
        validate_key(key)?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(Self::presigning(expires_in)?)
            .await
            .map_err(|e| AppError::BlobStorage(format!("S3 presign failed: {}", e)))?;

        Ok(request.uri().to_string())
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<u64> {
        validate_key(prefix.trim_end_matches('/'))?;

        let keys = self.list_keys(prefix).await?;
        let mut removed = 0u64;

        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AppError::BlobStorage(format!("Invalid S3 key: {}", e)))?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| AppError::BlobStorage(format!("Invalid S3 delete request: {}", e)))?;

            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| {
                    error!("Failed to delete blobs from S3: {}", e);
                    AppError::BlobStorage(format!("S3 delete failed: {}", e))
                })?;

            removed += chunk.len() as u64;
        }

        debug!("Deleted {} blobs under {}", removed, prefix);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presigning_rejects_long_expiry() {
        // S3 caps presigned URLs at one week
        assert!(S3BlobBackend::presigning(Duration::from_secs(3600)).is_ok());
        assert!(S3BlobBackend::presigning(Duration::from_secs(8 * 24 * 3600)).is_err());
    }
}
