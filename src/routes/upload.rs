//! Upload Routes
//!
//! Endpoints:
//! - POST /api/v1/upload - direct upload (multipart or raw body)
//! - POST /api/v1/upload/sessions - begin a chunked upload
//! - PUT /api/v1/upload/sessions/:upload_id/chunks/:index - send a chunk
//! - GET /api/v1/upload/sessions/:upload_id - session progress
//! - DELETE /api/v1/upload/sessions/:upload_id - abandon a session
//!
//! The request body for the direct route is resolved into a tagged
//! payload exactly once, at this boundary; nothing downstream re-sniffs
//! content types.

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, Request, State},
    http::header::CONTENT_TYPE,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json, RequestExt,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::db::FileRecord;
use crate::error::AppError;
use crate::state::AppState;
use crate::upload::{
    BeginUploadRequest, BeginUploadResponse, ChunkAck, ReceiveOutcome, SessionStatusResponse,
    UploadCompleteResponse, UploadError,
};

use super::{client_ip, user_agent};

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Direct upload
// ============================================================================

/// Request body resolved into one explicit shape at the boundary.
struct UploadPayload {
    filename: String,
    data: Vec<u8>,
}

#[derive(Deserialize)]
pub struct DirectUploadQuery {
    filename: Option<String>,
}

/// POST /api/v1/upload
///
/// Accepts either a multipart form with a file field or a raw body with a
/// `?filename=` query parameter.
pub async fn direct_upload(
    State(state): State<AppState>,
    Query(query): Query<DirectUploadQuery>,
    request: Request,
) -> Response {
    let ip = client_ip(request.headers());
    let ua = user_agent(request.headers());

    if let Err(e) = state.guard().ensure_not_banned(&ip).await {
        return e.into_response();
    }

    let max = state.config().limits.max_upload_bytes;
    let payload = match resolve_payload(request, query.filename, max).await {
        Ok(payload) => payload,
        Err(e) => return e.into_response(),
    };

    let id = generate_file_id();
    match state
        .engine()
        .direct_upload(&id, &payload.filename, payload.data, Some(ip), ua)
        .await
    {
        Ok(record) => complete_response(&state, record),
        Err(e) => e.into_response(),
    }
}

/// Resolve the request body into an [`UploadPayload`].
async fn resolve_payload(
    request: Request,
    query_filename: Option<String>,
    max_upload_bytes: u64,
) -> Result<UploadPayload, AppError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = request
            .extract::<Multipart, _>()
            .await
            .map_err(|_| AppError::InvalidInput("malformed multipart body".to_string()))?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::InvalidInput(e.to_string()))?
        {
            let Some(filename) = field.file_name().map(str::to_string) else {
                continue;
            };
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::InvalidInput(e.to_string()))?;

            return Ok(UploadPayload {
                filename,
                data: data.to_vec(),
            });
        }

        return Err(AppError::InvalidInput(
            "no file field in form data".to_string(),
        ));
    }

    let filename = query_filename
        .filter(|f| !f.is_empty())
        .ok_or_else(|| AppError::InvalidInput("filename query parameter is required".to_string()))?;

    let data = axum::body::to_bytes(request.into_body(), max_upload_bytes as usize + 1)
        .await
        .map_err(|_| {
            AppError::PayloadTooLarge("request body exceeds the upload limit".to_string())
        })?;

    if data.is_empty() {
        return Err(AppError::InvalidInput("file body is required".to_string()));
    }

    Ok(UploadPayload {
        filename,
        data: data.to_vec(),
    })
}

// ============================================================================
// Chunked upload
// ============================================================================

/// POST /api/v1/upload/sessions
pub async fn begin_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BeginUploadRequest>,
) -> Response {
    let ip = client_ip(&headers);
    if let Err(e) = state.guard().ensure_not_banned(&ip).await {
        return e.into_response();
    }

    if request.filename.is_empty() {
        return AppError::InvalidInput("filename is required".to_string()).into_response();
    }

    let upload_id = generate_file_id();
    match state
        .engine()
        .begin_upload(
            &upload_id,
            &request.filename,
            request.total_size,
            Some(ip),
            user_agent(&headers),
        )
        .await
    {
        Ok(record) => Json(BeginUploadResponse {
            upload_id: record.id,
            expires_at: record.expires_at,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
pub struct ChunkQuery {
    /// Marks the terminal chunk and triggers reassembly.
    #[serde(default)]
    last: bool,
}

/// PUT /api/v1/upload/sessions/:upload_id/chunks/:index
///
/// The chunk data is the raw request body. An optional `X-Chunk-Hash`
/// header (SHA-256 hex) is verified before the chunk is accepted.
pub async fn put_chunk(
    State(state): State<AppState>,
    Path((upload_id, chunk_index)): Path<(String, u32)>,
    Query(query): Query<ChunkQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ip = client_ip(&headers);
    if let Err(e) = state.guard().ensure_not_banned(&ip).await {
        return e.into_response();
    }

    let expected_hash = headers
        .get("x-chunk-hash")
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .map(str::to_string);

    match state
        .engine()
        .receive_chunk(
            &upload_id,
            chunk_index,
            body,
            query.last,
            expected_hash.as_deref(),
        )
        .await
    {
        Ok(ReceiveOutcome::Accepted {
            chunk_index,
            chunks_received,
        }) => Json(ChunkAck {
            received: true,
            chunk_index,
            chunks_received,
        })
        .into_response(),
        Ok(ReceiveOutcome::Finalized(record)) => complete_response(&state, record),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/upload/sessions/:upload_id
pub async fn session_status(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Response {
    match state.engine().session_status(&upload_id).await {
        Some(session) => Json(SessionStatusResponse {
            upload_id: session.upload_id.clone(),
            filename: session.filename.clone(),
            total_size: session.declared_size,
            chunks_received: session.chunks_received(),
            bytes_received: session.bytes_received,
            progress: session.progress(),
            created_at: session.created_at,
        })
        .into_response(),
        None => UploadError::SessionNotFound(upload_id).into_response(),
    }
}

/// DELETE /api/v1/upload/sessions/:upload_id
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Response {
    match state.engine().abandon(&upload_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Build the completed-upload response and fire the notification.
fn complete_response(state: &AppState, record: FileRecord) -> Response {
    let url = state.public_file_url(&record.id);
    state.notifier().spawn_upload_notice(&record, &url);

    Json(UploadCompleteResponse {
        id: record.id,
        url,
        filename: record.filename,
        size: record.size,
        expires_at: record.expires_at,
    })
    .into_response()
}

/// 8-character alphanumeric file id, client-visible in URLs.
pub fn generate_file_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}
