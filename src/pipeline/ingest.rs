/// Archive submission
///
/// Entry points used by the API layer: submit a link, hand out a direct
/// upload URL and confirm the upload, or request account deletion. Each
/// creates or updates state and enqueues the first stage.
use super::download::resolve_share_link;
use crate::account::validate_account_number;
use crate::archive::{archive_blob_key, Archive, ArchiveChanges, ArchiveStatus, NewArchive};
use crate::context::WorkerContext;
use crate::error::{AppError, AppResult, ArchiveErrorCode};
use crate::jobs::{ArchiveRef, Task};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// How long a direct upload URL stays valid
const UPLOAD_URL_TTL: Duration = Duration::from_secs(3600);

/// A presigned upload slot for a new archive
#[derive(Debug, Clone)]
pub struct UploadTicket {
    pub archive: Archive,
    pub upload_url: String,
    pub expires_in: Duration,
}

impl WorkerContext {
    /// Create an archive for a link and queue its download
    pub async fn submit_archive_url(
        &self,
        account: &str,
        url: &str,
        cookie: Option<String>,
    ) -> AppResult<Archive> {
        validate_account_number(account)?;
        resolve_share_link(url)?;
        self.accounts.ensure(account).await?;

        let archive = self
            .archives
            .create(NewArchive {
                account_number: account.to_string(),
                archive_type: self.config.storage.archive_type.clone(),
                source_url: Some(url.to_string()),
                ..Default::default()
            })
            .await?;
        let archive = self
            .archives
            .transition(archive.id, ArchiveStatus::Submitted, ArchiveChanges::default())
            .await?;

        let task = Task::DownloadArchive {
            archive: ArchiveRef::new(archive.id, account),
            url: url.to_string(),
            cookie,
        };
        self.enqueue_first_stage(&archive, task).await?;

        info!(archive_id = %archive.id, account = %account, "Archive link submitted");
        Ok(archive)
    }

    /// Create an archive and a presigned URL the client uploads it to
    pub async fn request_upload(&self, account: &str) -> AppResult<UploadTicket> {
        validate_account_number(account)?;
        self.accounts.ensure(account).await?;

        let id = Uuid::new_v4();
        let archive_type = self.config.storage.archive_type.clone();
        let key = archive_blob_key(account, &archive_type, id, "archive.zip");

        let archive = self
            .archives
            .create(NewArchive {
                id: Some(id),
                account_number: account.to_string(),
                archive_type,
                blob_key: Some(key.clone()),
                ..Default::default()
            })
            .await?;

        let upload_url = match self.blobs.presigned_put_url(&key, UPLOAD_URL_TTL).await {
            Ok(url) => url,
            Err(e) => {
                self.archives
                    .invalidate(id, ArchiveErrorCode::FailToCreateArchive.into())
                    .await?;
                return Err(e);
            }
        };

        let archive = self
            .archives
            .transition(archive.id, ArchiveStatus::Submitted, ArchiveChanges::default())
            .await?;

        info!(archive_id = %id, account = %account, "Direct upload requested");
        Ok(UploadTicket {
            archive,
            upload_url,
            expires_in: UPLOAD_URL_TTL,
        })
    }

    /// Acknowledge a finished direct upload and queue its processing
    pub async fn confirm_upload(&self, archive_id: Uuid) -> AppResult<Archive> {
        let archive = self.archives.require(archive_id).await?;

        if archive.status != ArchiveStatus::Submitted {
            return Err(AppError::Conflict(format!(
                "Archive {} is {}, not awaiting an upload",
                archive_id, archive.status
            )));
        }

        let key = archive.blob_key.as_deref().ok_or_else(|| {
            AppError::Validation(format!("Archive {} was not created for upload", archive_id))
        })?;
        if !self.blobs.exists(key).await? {
            return Err(AppError::Validation(format!(
                "Archive {} has not been uploaded yet",
                archive_id
            )));
        }

        let task = Task::ProcessUpload(ArchiveRef::new(archive.id, archive.account_number.clone()));
        self.enqueue_first_stage(&archive, task).await?;

        info!(archive_id = %archive_id, "Direct upload confirmed");
        Ok(archive)
    }

    /// Flag an account as deleting and queue the teardown
    pub async fn request_account_deletion(&self, account: &str) -> AppResult<Uuid> {
        validate_account_number(account)?;

        if !self.accounts.mark_deleting(account).await? {
            info!(account = %account, "Deletion requested for unknown account, cleaning up anyway");
        }

        self.jobs
            .send(Task::DeleteAccountData {
                account: account.to_string(),
            })
            .await
    }

    /// An archive whose first job cannot be queued would block the account
    async fn enqueue_first_stage(&self, archive: &Archive, task: Task) -> AppResult<()> {
        if let Err(e) = self.jobs.send(task).await {
            warn!(archive_id = %archive.id, error = %e, "Failed to enqueue archive");
            self.archives
                .invalidate(archive.id, ArchiveErrorCode::FailToCreateArchive.into())
                .await?;
            return Err(e);
        }
        Ok(())
    }
}
