/// Download and validation stages
///
/// Archives arrive either as a link the worker downloads or as a direct
/// upload to the blob store. Both end with the archive validated, its SHA-512
/// fingerprint recorded and the archive `stored`.
use super::StageOutcome;
use crate::archive::{archive_blob_key, Archive, ArchiveChanges, ArchiveStatus};
use crate::blob_store::BlobBody;
use crate::context::WorkerContext;
use crate::decoder::validate_archive;
use crate::error::{AppError, AppResult, ArchiveErrorCode, ArchiveFailure, PipelineResult};
use crate::jobs::ArchiveRef;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::{Response, Url};
use sha2::{Digest, Sha512};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

const ARCHIVE_FILENAME: &str = "archive.zip";

/// Rewrite share links of known providers to direct download links
///
/// Drive `open?id=<id>` and `/file/d/<id>/...` links become
/// `uc?id=<id>&export=download`; Dropbox links are served from the
/// user-content host. Other links are returned unchanged.
pub fn resolve_share_link(raw: &str) -> AppResult<String> {
    let mut url = Url::parse(raw)
        .map_err(|e| AppError::Validation(format!("Invalid archive URL {}: {}", raw, e)))?;

    let host = url.host_str().map(str::to_owned);
    match host.as_deref() {
        Some("drive.google.com") => {
            let id = url
                .query_pairs()
                .find(|(name, _)| name == "id")
                .map(|(_, value)| value.into_owned())
                .or_else(|| {
                    let segments: Vec<&str> = url.path_segments()?.collect();
                    segments
                        .windows(2)
                        .find(|pair| pair[0] == "d")
                        .map(|pair| pair[1].to_string())
                })
                .filter(|id| !id.is_empty())
                .ok_or_else(|| {
                    AppError::Validation(format!("Unrecognized drive link: {}", raw))
                })?;

            Ok(format!(
                "https://drive.google.com/u/0/uc?id={}&export=download",
                id
            ))
        }
        Some("www.dropbox.com") | Some("dropbox.com") => {
            url.set_host(Some("dl.dropboxusercontent.com"))
                .map_err(|e| AppError::Validation(format!("Invalid dropbox link: {}", e)))?;
            Ok(url.to_string())
        }
        _ => Ok(url.to_string()),
    }
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map_or(false, |value| value.starts_with("text/html"))
}

/// Confirmation token set by the virus-scan interstitial
fn confirmation_token(response: &Response) -> Option<String> {
    response
        .cookies()
        .find(|cookie| cookie.name().starts_with("download_warning"))
        .map(|cookie| cookie.value().to_string())
}

/// Stream a response body to `destination`; returns the hex SHA-512 of the bytes
async fn stream_to_file(response: Response, destination: &Path) -> AppResult<String> {
    let mut file = tokio::fs::File::create(destination).await?;
    let mut hasher = Sha512::new();
    let mut size: u64 = 0;

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    file.flush().await?;

    debug!(path = %destination.display(), size, "Archive written");
    Ok(hex::encode(hasher.finalize()))
}

/// Hex SHA-512 of a local file
async fn fingerprint_file(path: &Path) -> AppResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha512::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

impl WorkerContext {
    async fn fetch(&self, url: &str, cookie: Option<&str>) -> AppResult<Response> {
        let mut request = self.http.get(url);
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AppError::External(format!(
                "Archive source responded with {}",
                response.status()
            )));
        }
        Ok(response)
    }

    /// Download an archive link to `destination`; returns its fingerprint
    async fn fetch_archive(
        &self,
        url: &str,
        cookie: Option<&str>,
        destination: &Path,
    ) -> AppResult<String> {
        let url = resolve_share_link(url)?;
        let mut response = self.fetch(&url, cookie).await?;

        if is_html(&response) {
            let token = confirmation_token(&response).ok_or_else(|| {
                AppError::External("Archive source returned a web page instead of a file".to_string())
            })?;
            debug!("Confirming large file download");

            let mut confirmed = Url::parse(&url)
                .map_err(|e| AppError::Internal(format!("Resolved URL is invalid: {}", e)))?;
            confirmed.query_pairs_mut().append_pair("confirm", &token);

            response = self.fetch(confirmed.as_str(), cookie).await?;
            if is_html(&response) {
                return Err(AppError::External(
                    "Archive source kept returning a web page".to_string(),
                ));
            }
        }

        stream_to_file(response, destination).await
    }

    async fn prepare_work_dir(&self, archive_id: uuid::Uuid) -> AppResult<PathBuf> {
        let dir = self.work_dir(archive_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(self.archive_path(archive_id))
    }

    /// Check the archive structure off the async runtime
    async fn check_structure(&self, archive: &ArchiveRef, path: &Path) -> PipelineResult<()> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || validate_archive(&path))
            .await
            .map_err(AppError::from)
            .and_then(|result| result)
            .archive_failure(archive.archive_id, ArchiveErrorCode::InvalidArchive)
    }

    /// The archive in the work directory, fetched back from the blob store
    /// when the earlier stages ran on another worker
    pub(super) async fn local_archive(
        &self,
        record: &Archive,
        code: ArchiveErrorCode,
    ) -> PipelineResult<PathBuf> {
        let path = self.archive_path(record.id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(path);
        }

        let key = record
            .blob_key
            .as_deref()
            .ok_or_else(|| AppError::Validation(format!("Archive {} has no blob", record.id)))
            .archive_failure(record.id, code)?;
        self.prepare_work_dir(record.id).await?;
        self.blobs
            .download_to(key, &path)
            .await
            .archive_failure(record.id, code)?;
        Ok(path)
    }

    pub(crate) async fn download_archive(
        &self,
        archive: &ArchiveRef,
        url: &str,
        cookie: Option<&str>,
    ) -> PipelineResult<StageOutcome> {
        let id = archive.archive_id;
        let record = self.archives.require(id).await?;
        let path = self.prepare_work_dir(id).await?;

        info!(archive_id = %id, account = %archive.account, "Downloading archive");
        let fingerprint = self
            .fetch_archive(url, cookie, &path)
            .await
            .archive_failure(id, ArchiveErrorCode::FailToDownloadArchive)?;

        self.check_structure(archive, &path).await?;

        let key = archive_blob_key(&archive.account, &record.archive_type, id, ARCHIVE_FILENAME);
        self.blobs
            .put(&key, BlobBody::File(path), "application/zip")
            .await
            .archive_failure(id, ArchiveErrorCode::FailToCreateArchive)?;

        self.archives
            .transition(
                id,
                ArchiveStatus::Stored,
                ArchiveChanges {
                    blob_key: Some(key),
                    fingerprint: Some(fingerprint),
                    error: None,
                },
            )
            .await?;

        info!(archive_id = %id, "Archive stored");
        Ok(StageOutcome::Continue)
    }

    pub(crate) async fn process_upload(&self, archive: &ArchiveRef) -> PipelineResult<StageOutcome> {
        let id = archive.archive_id;
        let record = self.archives.require(id).await?;
        let key = record
            .blob_key
            .ok_or_else(|| AppError::Validation(format!("Archive {} has no upload key", id)))
            .archive_failure(id, ArchiveErrorCode::FailToCreateArchive)?;

        let path = self.prepare_work_dir(id).await?;
        let size = self
            .blobs
            .download_to(&key, &path)
            .await
            .archive_failure(id, ArchiveErrorCode::FailToDownloadArchive)?;
        debug!(archive_id = %id, size, "Uploaded archive fetched");

        self.check_structure(archive, &path).await?;
        let fingerprint = fingerprint_file(&path).await?;

        self.archives
            .transition(
                id,
                ArchiveStatus::Stored,
                ArchiveChanges {
                    fingerprint: Some(fingerprint),
                    ..Default::default()
                },
            )
            .await?;

        info!(archive_id = %id, "Uploaded archive stored");
        Ok(StageOutcome::Continue)
    }
}
