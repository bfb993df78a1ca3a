/// Disk-based blob storage backend
use crate::{
    blob_store::{validate_key, BlobBackend, BlobBody},
    error::{AppError, AppResult},
};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Disk storage backend
///
/// Stores blobs at `{base}/{key}`. Presigned URLs point at `public_url` and
/// carry an expiry and an HMAC-SHA256 signature over method, key and expiry
/// that the metrics server checks before serving or accepting the file.
#[derive(Clone)]
pub struct DiskBlobBackend {
    base_path: PathBuf,
    public_url: String,
    signing_secret: String,
}

impl DiskBlobBackend {
    /// Create a new disk storage backend
    pub fn new(base_path: PathBuf, public_url: String, signing_secret: String) -> Self {
        Self {
            base_path,
            public_url: public_url.trim_end_matches('/').to_string(),
            signing_secret,
        }
    }

    /// Get the file path for a key
    pub fn blob_path(&self, key: &str) -> AppResult<PathBuf> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }

    /// Ensure the directory for a blob exists
    async fn ensure_blob_dir(&self, key: &str) -> AppResult<PathBuf> {
        let blob_path = self.blob_path(key)?;
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                AppError::BlobStorage(format!("Failed to create blob directory: {}", e))
            })?;
        }
        Ok(blob_path)
    }

    fn mac(&self, method: &str, key: &str, expires: i64) -> AppResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.signing_secret.as_bytes())
            .map_err(|e| AppError::Config(format!("Invalid blob signing secret: {}", e)))?;
        mac.update(method.as_bytes());
        mac.update(b"\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    fn signature(&self, method: &str, key: &str, expires: i64) -> AppResult<String> {
        let mac = self.mac(method, key, expires)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_url(&self, method: &str, key: &str, expires_in: Duration) -> AppResult<String> {
        validate_key(key)?;
        let expires = Utc::now().timestamp() + expires_in.as_secs() as i64;
        Ok(format!(
            "{}/{}?expires={}&signature={}",
            self.public_url,
            key,
            expires,
            self.signature(method, key, expires)?
        ))
    }

    /// Check a presigned URL's query parameters for `method` on `key`
    pub fn verify_signature(&self, method: &str, key: &str, expires: i64, signature: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };
        // Constant-time comparison
        match self.mac(method, key, expires) {
            Ok(mac) => mac.verify_slice(&signature).is_ok(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl BlobBackend for DiskBlobBackend {
    async fn put(&self, key: &str, body: BlobBody, _content_type: &str) -> AppResult<()> {
        let blob_path = self.ensure_blob_dir(key).await?;

        match body {
            BlobBody::Bytes(data) => fs::write(&blob_path, data).await,
            BlobBody::File(source) => fs::copy(&source, &blob_path).await.map(|_| ()),
        }
        .map_err(|e| AppError::BlobStorage(format!("Failed to write blob {}: {}", key, e)))?;

        debug!(key, "Blob written to disk");
        Ok(())
    }

    async fn download_to(&self, key: &str, destination: &Path) -> AppResult<u64> {
        let blob_path = self.blob_path(key)?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        match fs::copy(&blob_path, destination).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("Blob {} not found", key)))
            }
            Err(e) => Err(AppError::BlobStorage(format!(
                "Failed to read blob {}: {}",
                key, e
            ))),
        }
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let blob_path = self.blob_path(key)?;
        Ok(fs::try_exists(&blob_path).await.unwrap_or(false))
    }

    async fn presigned_get_url(&self, key: &str, expires_in: Duration) -> AppResult<String> {
        self.signed_url("GET", key, expires_in)
    }

    async fn presigned_put_url(&self, key: &str, expires_in: Duration) -> AppResult<String> {
        self.signed_url("PUT", key, expires_in)
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<u64> {
        let directory = prefix.trim_end_matches('/');
        validate_key(directory)?;
        if !prefix.ends_with('/') {
            return Err(AppError::Validation(format!(
                "Disk blob prefixes must name a directory: {}",
                prefix
            )));
        }

        let root = self.base_path.join(directory);
        let removed = tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
            if !root.is_dir() {
                return Ok(0);
            }
            let count = count_files(&root)?;
            std::fs::remove_dir_all(&root)?;
            Ok(count)
        })
        .await?
        .map_err(|e| AppError::BlobStorage(format!("Failed to delete prefix {}: {}", prefix, e)))?;

        debug!(prefix, removed, "Blob prefix deleted from disk");
        Ok(removed)
    }
}

fn count_files(dir: &Path) -> std::io::Result<u64> {
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            count += count_files(&entry.path())?;
        } else {
            count += 1;
        }
    }
    Ok(count)
}
