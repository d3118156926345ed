//! File registry.
//!
//! Database-side state for registered files: creation, token lookup and
//! rotation, soft deletion with an audit trail, and the queries the expiry
//! sweeper drives.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use super::token;
use crate::datetime;
use crate::{FilegateError, Result};

/// A registered file row.
#[derive(Debug, Clone, FromRow)]
pub struct FileRecord {
    pub id: String,
    pub owner_id: i64,
    pub original_name: String,
    pub size_bytes: i64,
    pub stored_name: String,
    pub content_hash: Option<String>,
    pub source_url: Option<String>,
    pub download_token: String,
    pub download_count: i64,
    pub created_at: String,
    pub updated_at: String,
    pub expires_at: String,
    pub deleted_at: Option<String>,
    pub purged_at: Option<String>,
}

impl FileRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        datetime::from_sqlite(&self.expires_at)
    }

    /// Whether the file is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|exp| now >= exp)
    }
}

/// Data for registering a new file.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub owner_id: i64,
    pub original_name: String,
    pub size_bytes: i64,
    pub stored_name: String,
    pub content_hash: Option<String>,
    pub source_url: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Live-file usage of one owner, for quota checks.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct OwnerUsage {
    pub file_count: i64,
    pub total_bytes: i64,
}

/// One audit trail entry.
#[derive(Debug, Clone, FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub file_id: Option<String>,
    pub user_id: Option<i64>,
    pub action: String,
    pub detail: Option<String>,
    pub created_at: String,
}

const FILE_COLUMNS: &str = "id, owner_id, original_name, size_bytes, stored_name, content_hash,
     source_url, download_token, download_count, created_at, updated_at,
     expires_at, deleted_at, purged_at";

/// Repository for file registry operations.
pub struct FileRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> FileRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a file.
    ///
    /// Assigns a fresh UUID and download token. The token column is UNIQUE,
    /// so the astronomically unlikely collision surfaces as a database error
    /// instead of silently aliasing two files.
    pub async fn create(&self, new_file: &NewFileRecord) -> Result<FileRecord> {
        let id = Uuid::new_v4().to_string();
        let download_token = token::download_token();

        sqlx::query(
            "INSERT INTO files (id, owner_id, original_name, size_bytes, stored_name,
                                content_hash, source_url, download_token, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(new_file.owner_id)
        .bind(&new_file.original_name)
        .bind(new_file.size_bytes)
        .bind(&new_file.stored_name)
        .bind(&new_file.content_hash)
        .bind(&new_file.source_url)
        .bind(&download_token)
        .bind(datetime::to_sqlite(new_file.expires_at))
        .execute(self.pool)
        .await?;

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| FilegateError::NotFound("file".to_string()))
    }

    /// Get a file by ID, deleted or not.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<FileRecord>> {
        let result = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(result)
    }

    /// Get a file by its current download token, regardless of state.
    ///
    /// State classification (deleted, expired) is the caller's job; the raw
    /// row is needed to tell the denial reasons apart.
    pub async fn get_by_token(&self, download_token: &str) -> Result<Option<FileRecord>> {
        let result = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE download_token = ?"
        ))
        .bind(download_token)
        .fetch_optional(self.pool)
        .await?;

        Ok(result)
    }

    /// List an owner's live files, newest first.
    ///
    /// An optional pattern filters on the original filename.
    pub async fn list_by_owner(
        &self,
        owner_id: i64,
        pattern: Option<&str>,
        limit: i64,
    ) -> Result<Vec<FileRecord>> {
        let like = pattern.map(|p| format!("%{}%", p)).unwrap_or_else(|| "%".to_string());

        let files = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE owner_id = ? AND deleted_at IS NULL AND original_name LIKE ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?"
        ))
        .bind(owner_id)
        .bind(like)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(files)
    }

    /// Search live files across all owners by name fragment.
    pub async fn search(&self, pattern: &str, limit: i64) -> Result<Vec<FileRecord>> {
        let like = format!("%{}%", pattern);

        let files = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE deleted_at IS NULL AND original_name LIKE ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?"
        ))
        .bind(like)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(files)
    }

    /// Live file count and byte total for one owner.
    pub async fn owner_usage(&self, owner_id: i64) -> Result<OwnerUsage> {
        let usage = sqlx::query_as::<_, OwnerUsage>(
            "SELECT COUNT(*) AS file_count,
                    COALESCE(SUM(size_bytes), 0) AS total_bytes
             FROM files
             WHERE owner_id = ? AND deleted_at IS NULL",
        )
        .bind(owner_id)
        .fetch_one(self.pool)
        .await?;

        Ok(usage)
    }

    /// Find a live file of this owner with the given content hash.
    pub async fn find_by_hash(
        &self,
        owner_id: i64,
        content_hash: &str,
    ) -> Result<Option<FileRecord>> {
        let result = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE owner_id = ? AND content_hash = ? AND deleted_at IS NULL
             LIMIT 1"
        ))
        .bind(owner_id)
        .bind(content_hash)
        .fetch_optional(self.pool)
        .await?;

        Ok(result)
    }

    /// Rotate the download token of a live file.
    ///
    /// A single UPDATE guarded on `deleted_at IS NULL`, so under concurrent
    /// rotations the last writer wins and exactly one token is ever valid.
    /// Returns the new token, or None if the file is gone or deleted.
    pub async fn replace_token(&self, id: &str) -> Result<Option<String>> {
        let new_token = token::download_token();

        let result = sqlx::query(
            "UPDATE files
             SET download_token = ?, updated_at = datetime('now')
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(&new_token)
        .bind(id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(Some(new_token))
        } else {
            Ok(None)
        }
    }

    /// Soft-delete a file, writing one audit entry on the transition.
    ///
    /// The UPDATE is guarded on `deleted_at IS NULL` and the audit insert
    /// shares its transaction, so concurrent deleters produce exactly one
    /// audit row. Returns true if this call won the transition.
    pub async fn soft_delete(
        &self,
        id: &str,
        now: DateTime<Utc>,
        action: &str,
        actor: Option<i64>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE files
             SET deleted_at = ?, updated_at = datetime('now')
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(datetime::to_sqlite(now))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let transitioned = result.rows_affected() > 0;
        if transitioned {
            sqlx::query(
                "INSERT INTO audit_log (file_id, user_id, action, created_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(actor)
            .bind(action)
            .bind(datetime::to_sqlite(now))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(transitioned)
    }

    /// Record that the stored bytes of a deleted file were removed.
    pub async fn mark_purged(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE files SET purged_at = ?, updated_at = datetime('now')
             WHERE id = ? AND deleted_at IS NOT NULL",
        )
        .bind(datetime::to_sqlite(now))
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Count a served download.
    pub async fn increment_downloads(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE files SET download_count = download_count + 1, updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Live files whose expiry has passed, oldest expiry first.
    pub async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<FileRecord>> {
        let files = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE deleted_at IS NULL AND expires_at <= ?
             ORDER BY expires_at
             LIMIT ?"
        ))
        .bind(datetime::to_sqlite(now))
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(files)
    }

    /// Deleted files whose bytes have not been confirmed removed.
    ///
    /// These are retried each sweep until the removal sticks.
    pub async fn list_unpurged(&self, limit: i64) -> Result<Vec<FileRecord>> {
        let files = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE deleted_at IS NOT NULL AND purged_at IS NULL
             ORDER BY deleted_at
             LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(files)
    }

    /// Append an audit entry outside a deletion transition.
    pub async fn record_audit(
        &self,
        file_id: Option<&str>,
        user_id: Option<i64>,
        action: &str,
        detail: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (file_id, user_id, action, detail) VALUES (?, ?, ?, ?)",
        )
        .bind(file_id)
        .bind(user_id)
        .bind(action)
        .bind(detail)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Audit trail for one file, oldest first.
    pub async fn audit_for_file(&self, file_id: &str) -> Result<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            "SELECT id, file_id, user_id, action, detail, created_at
             FROM audit_log WHERE file_id = ? ORDER BY id",
        )
        .bind(file_id)
        .fetch_all(self.pool)
        .await?;

        Ok(entries)
    }
}
