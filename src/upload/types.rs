//! Upload wire types and errors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to begin a chunked upload session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginUploadRequest {
    /// Original file name, untrusted, stored as-is
    pub filename: String,

    /// Declared total size in bytes
    pub total_size: i64,
}

/// Response after beginning a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginUploadResponse {
    /// Opaque upload id; also the future download id
    pub upload_id: String,

    /// When the file will expire once uploaded
    pub expires_at: DateTime<Utc>,
}

/// Acknowledgement for an intermediate chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub received: bool,

    /// Index this acknowledgement refers to
    pub chunk_index: u32,

    /// Distinct indices received so far
    pub chunks_received: usize,
}

/// Response after the final chunk commits the upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCompleteResponse {
    pub id: String,

    /// Client-facing single-use download URL
    pub url: String,

    pub filename: String,

    pub size: i64,

    pub expires_at: DateTime<Utc>,
}

/// Session progress for status queries
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub upload_id: String,
    pub filename: String,
    pub total_size: i64,
    pub chunks_received: usize,
    pub bytes_received: u64,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
}

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Upload session not found: {0}")]
    SessionNotFound(String),

    #[error("Upload session already active: {0}")]
    DuplicateSession(String),

    #[error("Invalid total size: {0}")]
    InvalidSize(i64),

    #[error("Upload too large: {received} bytes (max: {max})")]
    PayloadTooLarge { received: u64, max: u64 },

    #[error("Incomplete upload, missing chunks: {missing:?}")]
    IncompleteUpload { missing: Vec<u32> },

    #[error("Finalize already in progress: {0}")]
    FinalizeInProgress(String),

    #[error("Chunk hash mismatch: expected {expected}, got {actual}")]
    ChunkHashMismatch { expected: String, actual: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::DuplicateSession(_) => StatusCode::CONFLICT,
            Self::InvalidSize(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::IncompleteUpload { .. } => StatusCode::BAD_REQUEST,
            Self::FinalizeInProgress(_) => StatusCode::CONFLICT,
            Self::ChunkHashMismatch { .. } => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code for response bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::DuplicateSession(_) => "DUPLICATE_SESSION",
            Self::InvalidSize(_) => "INVALID_SIZE",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::IncompleteUpload { .. } => "INCOMPLETE_UPLOAD",
            Self::FinalizeInProgress(_) => "FINALIZE_IN_PROGRESS",
            Self::ChunkHashMismatch { .. } => "CHUNK_HASH_MISMATCH",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }
}
