//! Database schema initialization

use sqlx::PgPool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA_SQL {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

const SCHEMA_SQL: &[&str] = &[
    // Files table, one row per logical upload
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id VARCHAR(12) PRIMARY KEY,
        filename VARCHAR(255) NOT NULL,
        blob_url TEXT NOT NULL,
        blob_pathname TEXT NOT NULL,
        size BIGINT NOT NULL,
        ip_address TEXT,
        user_agent TEXT,
        uploaded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        expires_at TIMESTAMPTZ NOT NULL,
        deleted_at TIMESTAMPTZ,
        download_count INTEGER NOT NULL DEFAULT 0,
        downloaded_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_files_expires_at ON files(expires_at)
    WHERE deleted_at IS NULL
    "#,
    // IP bans
    r#"
    CREATE TABLE IF NOT EXISTS ip_bans (
        ip_address TEXT PRIMARY KEY,
        reason TEXT,
        banned_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        expires_at TIMESTAMPTZ,
        created_by VARCHAR(100)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_ip_bans_lookup ON ip_bans(ip_address, expires_at)
    "#,
    // Admin login attempts, append-only, windowed for rate-limit decisions
    r#"
    CREATE TABLE IF NOT EXISTS admin_login_attempts (
        id BIGSERIAL PRIMARY KEY,
        ip_address TEXT NOT NULL,
        attempted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        success BOOLEAN NOT NULL DEFAULT FALSE,
        user_agent TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_admin_attempts_ip_time
    ON admin_login_attempts(ip_address, attempted_at)
    "#,
];
