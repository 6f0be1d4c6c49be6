//! IP ban and login-attempt storage

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;

use crate::error::Result;

/// Storage contract for IP reputation data.
#[async_trait]
pub trait ReputationStore: Send + Sync {
    /// Whether an unexpired ban exists for this address.
    async fn is_banned(&self, ip: &str) -> Result<bool>;

    /// Append a login attempt to the log.
    async fn record_attempt(&self, ip: &str, success: bool, user_agent: Option<&str>)
        -> Result<()>;

    /// Failed attempts from this address within the trailing window.
    async fn recent_failures(&self, ip: &str, window_minutes: i64) -> Result<i64>;

    /// Insert or refresh a ban. `duration_hours` of `None` bans permanently.
    async fn ban(&self, ip: &str, reason: &str, duration_hours: Option<i64>) -> Result<()>;
}

/// PostgreSQL-backed reputation store
#[derive(Clone)]
pub struct PgReputationStore {
    pool: PgPool,
}

impl PgReputationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReputationStore for PgReputationStore {
    async fn is_banned(&self, ip: &str) -> Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT 1 FROM ip_bans
            WHERE ip_address = $1
              AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(ip)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn record_attempt(
        &self,
        ip: &str,
        success: bool,
        user_agent: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO admin_login_attempts (ip_address, success, user_agent)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(ip)
        .bind(success)
        .bind(user_agent)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_failures(&self, ip: &str, window_minutes: i64) -> Result<i64> {
        let cutoff = Utc::now() - Duration::minutes(window_minutes);

        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM admin_login_attempts
            WHERE ip_address = $1 AND success = FALSE AND attempted_at > $2
            "#,
        )
        .bind(ip)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn ban(&self, ip: &str, reason: &str, duration_hours: Option<i64>) -> Result<()> {
        let expires_at = duration_hours.map(|h| Utc::now() + Duration::hours(h));

        sqlx::query(
            r#"
            INSERT INTO ip_bans (ip_address, reason, expires_at, created_by)
            VALUES ($1, $2, $3, 'admin-protection')
            ON CONFLICT (ip_address) DO UPDATE
            SET reason = $2, expires_at = $3, banned_at = NOW()
            "#,
        )
        .bind(ip)
        .bind(reason)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        tracing::warn!(ip = %ip, reason = %reason, "IP banned");

        Ok(())
    }
}
