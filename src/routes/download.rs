//! Download routes
//!
//! `GET /:id` is the single-use link: it consumes the record and
//! redirects to the blob URL. A second request for the same id gets a
//! terminal "gone" response, never the file.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Redirect,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::routes::client_ip;
use crate::state::AppState;

/// GET /:id
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Redirect> {
    if id.is_empty() {
        return Err(AppError::InvalidInput("file id is required".to_string()));
    }

    let target = state.gate().resolve(&id).await?;

    tracing::info!(
        id = %id,
        ip = %client_ip(&headers),
        "Redirecting download"
    );
    state.notifier().spawn_download_notice(&target.record);

    Ok(Redirect::temporary(&target.url))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDetails {
    pub id: String,
    pub filename: String,
    pub size: i64,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// GET /api/v1/files/:id
///
/// Metadata for a live file. Read-only: does not consume the download.
pub async fn file_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileDetails>> {
    let record = state
        .files()
        .get_live(&id)
        .await?
        .filter(|r| r.is_uploaded())
        .ok_or_else(|| AppError::NotFound("file not found or expired".to_string()))?;

    Ok(Json(FileDetails {
        url: state.public_file_url(&record.id),
        id: record.id,
        filename: record.filename,
        size: record.size,
        uploaded_at: record.uploaded_at,
        expires_at: record.expires_at,
    }))
}
