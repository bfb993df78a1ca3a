/// Account persistence using runtime queries
use super::Account;
use crate::error::{AppError, AppResult};
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};

/// Account store service
#[derive(Clone)]
pub struct AccountStore {
    db: SqlitePool,
}

impl AccountStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Get an account, creating it on first sight
    pub async fn ensure(&self, account_number: &str) -> AppResult<Account> {
        validate_account_number(account_number)?;

        let now = Utc::now();
        sqlx::query(
            "INSERT OR IGNORE INTO account (account_number, metadata, deleting, created_at, updated_at)
             VALUES (?1, '{}', 0, ?2, ?2)",
        )
        .bind(account_number)
        .bind(now)
        .execute(&self.db)
        .await?;

        self.get(account_number)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Account {} not found", account_number)))
    }

    /// Get an account by number
    pub async fn get(&self, account_number: &str) -> AppResult<Option<Account>> {
        let row = sqlx::query(
            "SELECT account_number, metadata, deleting, created_at, updated_at
             FROM account WHERE account_number = ?1",
        )
        .bind(account_number)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let metadata: String = row.get("metadata");
        let metadata: Map<String, Value> = serde_json::from_str(&metadata)?;

        Ok(Some(Account {
            account_number: row.get("account_number"),
            metadata,
            deleting: row.get("deleting"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    /// Merge `patch` into the account's metadata; returns affected rows
    ///
    /// Keys in `patch` overwrite existing keys; other keys are preserved.
    pub async fn merge_metadata(
        &self,
        account_number: &str,
        patch: Map<String, Value>,
    ) -> AppResult<u64> {
        if patch.is_empty() {
            return Ok(0);
        }

        let patch = Value::Object(patch).to_string();
        let result = sqlx::query(
            "UPDATE account SET metadata = json_patch(metadata, ?1), updated_at = ?2
             WHERE account_number = ?3",
        )
        .bind(patch)
        .bind(Utc::now())
        .bind(account_number)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Flag an account as being deleted; returns whether it existed
    pub async fn mark_deleting(&self, account_number: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE account SET deleting = 1, updated_at = ?1 WHERE account_number = ?2",
        )
        .bind(Utc::now())
        .bind(account_number)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove the account row
    pub async fn delete(&self, account_number: &str) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM account WHERE account_number = ?1")
            .bind(account_number)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Account numbers are used as key and blob prefixes
pub fn validate_account_number(account_number: &str) -> AppResult<()> {
    if account_number.is_empty() {
        return Err(AppError::Validation("Account number cannot be empty".to_string()));
    }
    if account_number.len() > 128 {
        return Err(AppError::Validation("Account number too long".to_string()));
    }
    if !account_number
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::Validation(format!(
            "Account number contains invalid characters: {}",
            account_number
        )));
    }
    Ok(())
}
