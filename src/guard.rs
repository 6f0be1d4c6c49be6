//! IP Reputation Guard
//!
//! Rate-limits and bans abusive clients based on failed admin logins.
//! Upload and admin-auth paths consult `ensure_not_banned` before any
//! state-mutating work.

use std::sync::Arc;

use crate::db::ReputationStore;
use crate::error::{AppError, Result};

/// Ban after this many failures inside the window.
pub const MAX_FAILED_ATTEMPTS: i64 = 5;

/// Trailing window for counting failures, in minutes.
pub const FAILURE_WINDOW_MINUTES: i64 = 15;

/// Ban duration in hours.
pub const BAN_DURATION_HOURS: i64 = 24;

/// Policy layer over the reputation store.
#[derive(Clone)]
pub struct ReputationGuard {
    store: Arc<dyn ReputationStore>,
}

impl ReputationGuard {
    pub fn new(store: Arc<dyn ReputationStore>) -> Self {
        Self { store }
    }

    /// Reject banned clients before any state-mutating work.
    pub async fn ensure_not_banned(&self, ip: &str) -> Result<()> {
        if self.is_banned(ip).await? {
            return Err(AppError::Forbidden("access denied".to_string()));
        }
        Ok(())
    }

    pub async fn is_banned(&self, ip: &str) -> Result<bool> {
        self.store.is_banned(ip).await
    }

    pub async fn record_attempt(
        &self,
        ip: &str,
        success: bool,
        user_agent: Option<&str>,
    ) -> Result<()> {
        self.store.record_attempt(ip, success, user_agent).await
    }

    pub async fn recent_failures(&self, ip: &str) -> Result<i64> {
        self.store
            .recent_failures(ip, FAILURE_WINDOW_MINUTES)
            .await
    }

    /// Apply the ban policy: too many recent failures bans the address for
    /// a fixed duration. Returns whether a ban was placed.
    pub async fn check_and_ban(&self, ip: &str) -> Result<bool> {
        let failures = self.recent_failures(ip).await?;
        if failures >= MAX_FAILED_ATTEMPTS {
            self.store
                .ban(
                    ip,
                    "Too many failed admin login attempts",
                    Some(BAN_DURATION_HOURS),
                )
                .await?;
            return Ok(true);
        }
        Ok(false)
    }
}
