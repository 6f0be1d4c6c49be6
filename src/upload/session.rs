//! Upload Session Manager
//!
//! Tracks in-flight chunk sessions with:
//! - In-memory session table behind an RwLock
//! - Per-index byte accounting (a resend adjusts the running total)
//! - Stale-session reaping so the table stays bounded
//!
//! Sessions are process-local and lost on restart; chunks arriving for a
//! lost session fail with `SessionNotFound` and the client starts over.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::types::UploadError;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Accepting chunks
    Receiving,
    /// Final chunk seen, reassembly and commit under way
    Finalizing,
}

/// Ephemeral state for one in-progress chunked upload
#[derive(Debug, Clone)]
pub struct ChunkSession {
    /// Correlates with the file record id
    pub upload_id: String,

    /// Original file name
    pub filename: String,

    /// Size the client declared at begin time
    pub declared_size: i64,

    /// Byte length stored at each received index
    pub chunk_sizes: BTreeMap<u32, usize>,

    /// Running sum of stored bytes across all indices
    pub bytes_received: u64,

    /// Index the client flagged as last, once seen
    pub last_index: Option<u32>,

    pub status: SessionStatus,

    pub created_at: DateTime<Utc>,
}

impl ChunkSession {
    fn new(upload_id: String, filename: String, declared_size: i64) -> Self {
        Self {
            upload_id,
            filename,
            declared_size,
            chunk_sizes: BTreeMap::new(),
            bytes_received: 0,
            last_index: None,
            status: SessionStatus::Receiving,
            created_at: Utc::now(),
        }
    }

    /// Distinct chunk indices received so far
    pub fn chunks_received(&self) -> usize {
        self.chunk_sizes.len()
    }

    /// Progress against the declared size, as a percentage
    pub fn progress(&self) -> f64 {
        if self.declared_size <= 0 {
            return 0.0;
        }
        (self.bytes_received as f64 / self.declared_size as f64 * 100.0).min(100.0)
    }

    /// Indices in `0..=last` with no stored chunk
    fn missing_up_to(&self, last: u32) -> Vec<u32> {
        (0..=last)
            .filter(|i| !self.chunk_sizes.contains_key(i))
            .collect()
    }
}

/// Progress after accounting for a chunk
#[derive(Debug, Clone, Copy)]
pub struct ChunkProgress {
    pub chunks_received: usize,
    pub bytes_received: u64,
}

/// Snapshot handed to the finalize path once all chunks are present
#[derive(Debug, Clone)]
pub struct FinalizeTicket {
    pub filename: String,
    pub last_index: u32,
    pub bytes_received: u64,
}

/// Manages in-flight upload sessions
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionManagerInner>,
}

struct SessionManagerInner {
    /// Active sessions indexed by upload id
    sessions: RwLock<HashMap<String, ChunkSession>>,

    /// Sessions idle longer than this are reaped
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            inner: Arc::new(SessionManagerInner {
                sessions: RwLock::new(HashMap::new()),
                ttl: Duration::seconds(ttl_secs as i64),
            }),
        }
    }

    /// Register a new session.
    pub async fn create(
        &self,
        upload_id: &str,
        filename: &str,
        declared_size: i64,
    ) -> Result<(), UploadError> {
        let mut sessions = self.inner.sessions.write().await;
        if sessions.contains_key(upload_id) {
            return Err(UploadError::DuplicateSession(upload_id.to_string()));
        }

        sessions.insert(
            upload_id.to_string(),
            ChunkSession::new(upload_id.to_string(), filename.to_string(), declared_size),
        );

        tracing::info!(
            upload_id = %upload_id,
            filename = %filename,
            declared_size = declared_size,
            "Created upload session"
        );

        Ok(())
    }

    /// Whether a session is active for this id.
    pub async fn exists(&self, upload_id: &str) -> bool {
        let sessions = self.inner.sessions.read().await;
        sessions.contains_key(upload_id)
    }

    /// Get a session snapshot by id.
    pub async fn get(&self, upload_id: &str) -> Option<ChunkSession> {
        let sessions = self.inner.sessions.read().await;
        sessions.get(upload_id).cloned()
    }

    /// Account for a stored chunk.
    ///
    /// Chunk indices are absolute positions: a resend of the same index
    /// replaces the prior value, so the running total adjusts by the size
    /// delta rather than the full length. Crossing `max_total` destroys
    /// the session and the caller must purge the spool.
    pub async fn record_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        len: usize,
        is_last: bool,
        max_total: u64,
    ) -> Result<ChunkProgress, UploadError> {
        let mut sessions = self.inner.sessions.write().await;

        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| UploadError::SessionNotFound(upload_id.to_string()))?;

        if session.status == SessionStatus::Finalizing {
            return Err(UploadError::FinalizeInProgress(upload_id.to_string()));
        }

        let previous = session.chunk_sizes.insert(chunk_index, len).unwrap_or(0);
        session.bytes_received = session.bytes_received - previous as u64 + len as u64;

        if session.bytes_received > max_total {
            let received = session.bytes_received;
            sessions.remove(upload_id);
            tracing::warn!(
                upload_id = %upload_id,
                received = received,
                max = max_total,
                "Upload exceeded size limit, session torn down"
            );
            return Err(UploadError::PayloadTooLarge {
                received,
                max: max_total,
            });
        }

        if is_last {
            session.last_index = Some(chunk_index);
        }

        Ok(ChunkProgress {
            chunks_received: session.chunks_received(),
            bytes_received: session.bytes_received,
        })
    }

    /// Transition a complete session into the finalizing state.
    ///
    /// A gap in `0..=last` fails with `IncompleteUpload` and leaves the
    /// session receiving, so the client can supply the missing index and
    /// resend the last chunk.
    pub async fn begin_finalize(&self, upload_id: &str) -> Result<FinalizeTicket, UploadError> {
        let mut sessions = self.inner.sessions.write().await;

        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| UploadError::SessionNotFound(upload_id.to_string()))?;

        if session.status == SessionStatus::Finalizing {
            return Err(UploadError::FinalizeInProgress(upload_id.to_string()));
        }

        let Some(last_index) = session.last_index else {
            // No chunk was ever flagged last; the terminal range is unknown.
            return Err(UploadError::IncompleteUpload { missing: Vec::new() });
        };

        let missing = session.missing_up_to(last_index);
        if !missing.is_empty() {
            return Err(UploadError::IncompleteUpload { missing });
        }

        session.status = SessionStatus::Finalizing;

        Ok(FinalizeTicket {
            filename: session.filename.clone(),
            last_index,
            bytes_received: session.bytes_received,
        })
    }

    /// Return a finalizing session to the receiving state after a failure.
    pub async fn abort_finalize(&self, upload_id: &str) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(session) = sessions.get_mut(upload_id) {
            session.status = SessionStatus::Receiving;
        }
    }

    /// Remove a session.
    pub async fn remove(&self, upload_id: &str) -> Option<ChunkSession> {
        let mut sessions = self.inner.sessions.write().await;
        sessions.remove(upload_id)
    }

    /// Active session count.
    pub async fn count(&self) -> usize {
        let sessions = self.inner.sessions.read().await;
        sessions.len()
    }

    /// Remove sessions older than the TTL, returning the reaped ids so the
    /// caller can purge their spooled chunks.
    pub async fn reap_stale(&self) -> Vec<String> {
        let cutoff = Utc::now() - self.inner.ttl;
        let mut sessions = self.inner.sessions.write().await;

        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.created_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            sessions.remove(id);
        }

        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "Reaped stale upload sessions");
        }

        stale
    }
}
