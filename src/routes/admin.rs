//! Admin routes
//!
//! Endpoints:
//! - POST /api/v1/admin/auth - password check with brute-force accounting
//! - GET /api/v1/admin/files - list live files
//! - DELETE /api/v1/admin/files - bulk delete by id
//! - GET /api/v1/admin/stats - aggregate numbers
//! - POST /api/v1/admin/cleanup - trigger the expiry sweep
//!
//! Everything except /auth requires the `X-Admin-Token` header to match
//! the configured admin password.

use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::guard::MAX_FAILED_ATTEMPTS;
use crate::state::AppState;
use crate::sweep::run_sweep;

use super::{client_ip, user_agent};

/// Create the admin router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth", post(auth))
        .route("/files", get(list_files).delete(delete_files))
        .route("/stats", get(stats))
        .route("/cleanup", post(cleanup))
}

// ============================================================================
// Authentication
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    password: String,
}

/// POST /api/v1/admin/auth
pub async fn auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AuthRequest>,
) -> Result<Json<Value>> {
    let ip = client_ip(&headers);
    let ua = user_agent(&headers);

    state.guard().ensure_not_banned(&ip).await?;

    if request.password.is_empty() {
        return Err(AppError::InvalidInput("password is required".to_string()));
    }

    // Already over the limit before this attempt: ban and bail.
    let recent_failed = state.guard().recent_failures(&ip).await?;
    if recent_failed >= MAX_FAILED_ATTEMPTS {
        state.guard().check_and_ban(&ip).await?;
        state
            .guard()
            .record_attempt(&ip, false, ua.as_deref())
            .await?;
        return Err(AppError::TooManyAttempts(
            "too many failed attempts - IP banned".to_string(),
        ));
    }

    let Some(admin_password) = state.config().server.admin_password.clone() else {
        tracing::error!("ADMIN_PASSWORD is not set");
        return Err(AppError::Internal("admin access not configured".to_string()));
    };

    let valid = request.password == admin_password;
    state
        .guard()
        .record_attempt(&ip, valid, ua.as_deref())
        .await?;

    if !valid {
        if state.guard().check_and_ban(&ip).await? {
            return Err(AppError::TooManyAttempts(
                "invalid password - IP banned for repeated failures".to_string(),
            ));
        }

        let remaining = (MAX_FAILED_ATTEMPTS - recent_failed - 1).max(0);
        return Err(AppError::Unauthorized(format!(
            "invalid password ({} attempts remaining)",
            remaining
        )));
    }

    Ok(Json(json!({ "success": true })))
}

/// Gate an admin request on the `X-Admin-Token` header.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let Some(admin_password) = state.config().server.admin_password.as_deref() else {
        return Err(AppError::Internal("admin access not configured".to_string()));
    };

    let token = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if token != admin_password {
        return Err(AppError::Unauthorized("admin token required".to_string()));
    }

    Ok(())
}

// ============================================================================
// File management
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminFileData {
    id: String,
    filename: String,
    url: String,
    size: i64,
    uploaded_at: DateTime<Utc>,
    download_count: i32,
    ip_address: String,
    user_agent: String,
    downloaded_at: Option<DateTime<Utc>>,
}

/// GET /api/v1/admin/files
pub async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    require_admin(&state, &headers)?;

    let files: Vec<AdminFileData> = state
        .files()
        .list_live()
        .await?
        .into_iter()
        .map(|record| AdminFileData {
            url: state.public_file_url(&record.id),
            id: record.id,
            filename: record.filename,
            size: record.size,
            uploaded_at: record.uploaded_at,
            download_count: record.download_count,
            ip_address: record.ip_address.unwrap_or_else(|| "Unknown".to_string()),
            user_agent: record.user_agent.unwrap_or_else(|| "Unknown".to_string()),
            downloaded_at: record.downloaded_at,
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "count": files.len(),
        "files": files,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteFilesRequest {
    ids: Vec<String>,
}

/// DELETE /api/v1/admin/files
pub async fn delete_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DeleteFilesRequest>,
) -> Result<Json<Value>> {
    require_admin(&state, &headers)?;

    if request.ids.is_empty() {
        return Err(AppError::InvalidInput(
            "file ids array is required".to_string(),
        ));
    }

    let mut deleted_count = 0usize;
    let mut errors: Vec<String> = Vec::new();

    for id in &request.ids {
        let record = match state.files().get(id).await? {
            Some(record) => record,
            None => {
                errors.push(format!("file {} not found", id));
                continue;
            }
        };

        if !record.blob_pathname.is_empty() {
            if let Err(e) = state.blob().delete(&record.blob_pathname).await {
                // Metadata deletion still proceeds; the record is what
                // makes the file reachable.
                tracing::warn!(id = %id, error = %e, "Failed to delete blob");
            }
        }

        state.files().mark_deleted(id).await?;
        deleted_count += 1;
    }

    Ok(Json(json!({
        "success": true,
        "deletedCount": deleted_count,
        "errors": errors,
    })))
}

// ============================================================================
// Stats and cleanup
// ============================================================================

/// GET /api/v1/admin/stats
pub async fn stats(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>> {
    require_admin(&state, &headers)?;

    let stats = state.files().stats().await?;

    Ok(Json(json!({
        "success": true,
        "stats": {
            "totalFiles": stats.total_files,
            "totalSize": stats.total_size,
            "todayUploads": stats.today_uploads,
            "expiringSoon": stats.expiring_soon,
        },
    })))
}

/// POST /api/v1/admin/cleanup
pub async fn cleanup(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>> {
    require_admin(&state, &headers)?;

    let deleted_count = run_sweep(state.files(), state.blob()).await?;

    Ok(Json(json!({
        "success": true,
        "deletedCount": deleted_count,
        "message": format!("Cleaned up {} expired files", deleted_count),
    })))
}
