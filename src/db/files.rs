//! File record storage
//!
//! One row per logical upload. A record is "live" iff `deleted_at IS NULL
//! AND expires_at > now`. Placeholder records (chunked uploads in flight)
//! carry empty blob fields until the physical upload completes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;

/// File record row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileRecord {
    pub id: String,
    pub filename: String,
    pub blob_url: String,
    pub blob_pathname: String,
    pub size: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub download_count: i32,
    pub downloaded_at: Option<DateTime<Utc>>,
}

/// New file record. Blob fields are empty strings for placeholder records.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub id: String,
    pub filename: String,
    pub blob_url: String,
    pub blob_pathname: String,
    pub size: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// An expired record selected by the sweep, with the blob to delete.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExpiredFile {
    pub id: String,
    pub blob_pathname: String,
}

/// Aggregate numbers for the admin dashboard.
#[derive(Debug, Clone, Default)]
pub struct FileStats {
    pub total_files: i64,
    pub total_size: i64,
    pub today_uploads: i64,
    pub expiring_soon: i64,
}

/// Storage contract for file records.
///
/// `consume` must be a conditional single-statement transition so two
/// concurrent downloads of the same id race safely: exactly one caller
/// gets the record back, the other sees `None`.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Insert a new record.
    async fn create(&self, new: NewFileRecord) -> Result<FileRecord>;

    /// Attach blob location and final size to a placeholder record.
    ///
    /// Applies at most once: the update is conditioned on the record still
    /// having empty blob fields. Returns whether this call applied it.
    async fn attach_blob(&self, id: &str, url: &str, pathname: &str, size: i64) -> Result<bool>;

    /// Fetch a record regardless of lifecycle state.
    async fn get(&self, id: &str) -> Result<Option<FileRecord>>;

    /// Fetch a record only if it is live (not deleted, not expired).
    async fn get_live(&self, id: &str) -> Result<Option<FileRecord>>;

    /// Atomically transition a live, uploaded record to consumed.
    ///
    /// Sets `downloaded_at`/`deleted_at`, increments the counter, and
    /// returns the record — or `None` when the record was already
    /// consumed, deleted, expired, missing, or never finished uploading.
    async fn consume(&self, id: &str) -> Result<Option<FileRecord>>;

    /// Soft-delete a record.
    async fn mark_deleted(&self, id: &str) -> Result<()>;

    /// All live records, newest first.
    async fn list_live(&self) -> Result<Vec<FileRecord>>;

    /// Mark all expired, not-yet-deleted records as deleted and return
    /// their blob pathnames for physical cleanup.
    async fn sweep_expired(&self) -> Result<Vec<ExpiredFile>>;

    /// Aggregate stats over live records.
    async fn stats(&self) -> Result<FileStats>;
}

/// PostgreSQL-backed file store
#[derive(Clone)]
pub struct PgFileStore {
    pool: PgPool,
}

impl PgFileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RECORD_COLUMNS: &str = "id, filename, blob_url, blob_pathname, size, ip_address, \
     user_agent, uploaded_at, expires_at, deleted_at, download_count, downloaded_at";

#[async_trait]
impl FileStore for PgFileStore {
    async fn create(&self, new: NewFileRecord) -> Result<FileRecord> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            INSERT INTO files (id, filename, blob_url, blob_pathname, size,
                               ip_address, user_agent, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {RECORD_COLUMNS}
            "#,
        ))
        .bind(&new.id)
        .bind(&new.filename)
        .bind(&new.blob_url)
        .bind(&new.blob_pathname)
        .bind(new.size)
        .bind(&new.ip_address)
        .bind(&new.user_agent)
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn attach_blob(&self, id: &str, url: &str, pathname: &str, size: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET blob_url = $2, blob_pathname = $3, size = $4
            WHERE id = $1 AND blob_url = ''
            "#,
        )
        .bind(id)
        .bind(url)
        .bind(pathname)
        .bind(size)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM files WHERE id = $1",
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_live(&self, id: &str) -> Result<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM files
            WHERE id = $1 AND deleted_at IS NULL AND expires_at > NOW()
            "#,
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn consume(&self, id: &str) -> Result<Option<FileRecord>> {
        // Compare-and-swap on downloaded_at; the losing racer sees zero rows.
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            UPDATE files
            SET downloaded_at = NOW(),
                download_count = download_count + 1,
                deleted_at = NOW()
            WHERE id = $1
              AND downloaded_at IS NULL
              AND deleted_at IS NULL
              AND expires_at > NOW()
              AND blob_url <> ''
            RETURNING {RECORD_COLUMNS}
            "#,
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn mark_deleted(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE files SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_live(&self) -> Result<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM files
            WHERE deleted_at IS NULL AND expires_at > NOW()
            ORDER BY uploaded_at DESC
            "#,
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn sweep_expired(&self) -> Result<Vec<ExpiredFile>> {
        let expired = sqlx::query_as::<_, ExpiredFile>(
            r#"
            UPDATE files
            SET deleted_at = NOW()
            WHERE expires_at < NOW() AND deleted_at IS NULL
            RETURNING id, blob_pathname
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(expired)
    }

    async fn stats(&self) -> Result<FileStats> {
        let (total_files, total_size): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(size), 0)::BIGINT
            FROM files
            WHERE deleted_at IS NULL AND expires_at > NOW()
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let (today_uploads,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM files
            WHERE uploaded_at::date = CURRENT_DATE AND deleted_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let (expiring_soon,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM files
            WHERE expires_at BETWEEN NOW() AND NOW() + INTERVAL '24 hours'
              AND deleted_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(FileStats {
            total_files,
            total_size,
            today_uploads,
            expiring_soon,
        })
    }
}

impl FileRecord {
    /// Whether the physical upload has completed.
    pub fn is_uploaded(&self) -> bool {
        !self.blob_url.is_empty()
    }
}
