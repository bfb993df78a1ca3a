/// Archive persistence and state machine enforcement
use super::{Archive, ArchiveStatus};
use crate::db::is_unique_violation;
use crate::error::{AppError, AppResult, ArchiveError};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

const ARCHIVE_COLUMNS: &str = "id, account_number, archive_type, source_url, blob_key, status,
    fingerprint, analysis_task_id, error, started_at, ended_at, created_at, updated_at";

/// Fields for a new archive
#[derive(Debug, Clone, Default)]
pub struct NewArchive {
    pub id: Option<Uuid>,
    pub account_number: String,
    pub archive_type: String,
    pub source_url: Option<String>,
    pub blob_key: Option<String>,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
}

/// Optional column changes applied together with a status transition
#[derive(Debug, Clone, Default)]
pub struct ArchiveChanges {
    pub blob_key: Option<String>,
    pub fingerprint: Option<String>,
    pub error: Option<ArchiveError>,
}

#[derive(Clone)]
pub struct ArchiveStore {
    db: SqlitePool,
}

impl ArchiveStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert an archive in `created`
    ///
    /// Fails with `Conflict` when the account already has a non-terminal archive.
    pub async fn create(&self, new: NewArchive) -> AppResult<Archive> {
        let id = new.id.unwrap_or_else(Uuid::new_v4);
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO archive (id, account_number, archive_type, source_url, blob_key, status,
                                  started_at, ended_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        )
        .bind(id.to_string())
        .bind(&new.account_number)
        .bind(&new.archive_type)
        .bind(&new.source_url)
        .bind(&new.blob_key)
        .bind(ArchiveStatus::Created.as_str())
        .bind(new.started_at)
        .bind(new.ended_at)
        .bind(now)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(AppError::Conflict(format!(
                    "Account {} already has an archive in progress",
                    new.account_number
                )));
            }
            Err(e) => return Err(e.into()),
        }

        info!(archive_id = %id, account = %new.account_number, "Archive created");
        self.require(id).await
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Option<Archive>> {
        let row = sqlx::query(&format!("SELECT {} FROM archive WHERE id = ?1", ARCHIVE_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.db)
            .await?;

        row.map(|r| archive_from_row(&r)).transpose()
    }

    /// Get an archive or fail with `NotFound`
    pub async fn require(&self, id: Uuid) -> AppResult<Archive> {
        self.get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Archive {} not found", id)))
    }

    /// Archives of an account, newest first
    pub async fn list_for_account(&self, account_number: &str) -> AppResult<Vec<Archive>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM archive WHERE account_number = ?1 ORDER BY created_at DESC",
            ARCHIVE_COLUMNS
        ))
        .bind(account_number)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(archive_from_row).collect()
    }

    /// Move an archive to `to`, applying `changes` in the same write
    ///
    /// Rejects transitions the state machine does not allow, and a move to
    /// `processed` without a fingerprint. The write is conditional on the
    /// status it was validated against.
    pub async fn transition(
        &self,
        id: Uuid,
        to: ArchiveStatus,
        changes: ArchiveChanges,
    ) -> AppResult<Archive> {
        let current = self.require(id).await?;

        if !current.status.can_transition_to(to) {
            return Err(AppError::Conflict(format!(
                "Archive {} cannot move from {} to {}",
                id, current.status, to
            )));
        }

        if to == ArchiveStatus::Processed
            && current.fingerprint.is_none()
            && changes.fingerprint.is_none()
        {
            return Err(AppError::Validation(format!(
                "Archive {} has no fingerprint and cannot be processed",
                id
            )));
        }

        let error = changes
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            "UPDATE archive
             SET status = ?1,
                 blob_key = COALESCE(?2, blob_key),
                 fingerprint = COALESCE(?3, fingerprint),
                 error = COALESCE(?4, error),
                 updated_at = ?5
             WHERE id = ?6 AND status = ?7",
        )
        .bind(to.as_str())
        .bind(&changes.blob_key)
        .bind(&changes.fingerprint)
        .bind(error)
        .bind(Utc::now())
        .bind(id.to_string())
        .bind(current.status.as_str())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Archive {} changed status concurrently",
                id
            )));
        }

        debug!(archive_id = %id, from = %current.status, to = %to, "Archive transitioned");
        self.require(id).await
    }

    /// Move an archive to `invalid` with `error`
    ///
    /// Returns `false` when the archive is missing or already invalid.
    pub async fn invalidate(&self, id: Uuid, error: ArchiveError) -> AppResult<bool> {
        match self.get(id).await? {
            None => {
                warn!(archive_id = %id, "Cannot invalidate missing archive");
                Ok(false)
            }
            Some(archive) if archive.status == ArchiveStatus::Invalid => Ok(false),
            Some(_) => {
                let code = error.code;
                self.transition(
                    id,
                    ArchiveStatus::Invalid,
                    ArchiveChanges {
                        error: Some(error),
                        ..Default::default()
                    },
                )
                .await?;
                info!(archive_id = %id, code = %code, "Archive invalidated");
                Ok(true)
            }
        }
    }

    /// Record the external analysis task tracking this archive
    pub async fn set_analysis_task(&self, id: Uuid, task_id: &str) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE archive SET analysis_task_id = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(task_id)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Archive {} not found", id)));
        }
        Ok(())
    }

    /// Remove every archive row of an account
    pub async fn delete_for_account(&self, account_number: &str) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM archive WHERE account_number = ?1")
            .bind(account_number)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

fn archive_from_row(row: &SqliteRow) -> AppResult<Archive> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let error: Option<String> = row.get("error");

    Ok(Archive {
        id: Uuid::parse_str(&id)
            .map_err(|e| AppError::Internal(format!("Corrupt archive id {}: {}", id, e)))?,
        account_number: row.get("account_number"),
        archive_type: row.get("archive_type"),
        source_url: row.get("source_url"),
        blob_key: row.get("blob_key"),
        status: status.parse()?,
        fingerprint: row.get("fingerprint"),
        analysis_task_id: row.get("analysis_task_id"),
        error: error.as_deref().map(serde_json::from_str).transpose()?,
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
