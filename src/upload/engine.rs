//! Upload Engine
//!
//! The single canonical reassembly path: sessions track accounting, the
//! spool holds chunk bytes, and finalize commits in two explicit steps
//! (blob put, then record update) so a partial failure stays retryable
//! and distinguishable.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{Duration, Utc};

use crate::db::{FileRecord, FileStore, NewFileRecord};
use crate::storage::{content_type_for_name, BlobStore};

use super::chunk_store::{verify_hash, ChunkSpool};
use super::session::{ChunkSession, SessionManager};
use super::types::UploadError;

/// Outcome of receiving a chunk
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// Intermediate chunk stored; nothing durable happened.
    Accepted {
        chunk_index: u32,
        chunks_received: usize,
    },
    /// Last chunk arrived and the upload committed.
    Finalized(FileRecord),
}

/// Coordinates sessions, the chunk spool, blob storage, and file records.
#[derive(Clone)]
pub struct UploadEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    sessions: SessionManager,
    spool: Arc<dyn ChunkSpool>,
    blob: Arc<dyn BlobStore>,
    files: Arc<dyn FileStore>,
    max_upload_bytes: u64,
    retention_hours: i64,
}

impl UploadEngine {
    pub fn new(
        sessions: SessionManager,
        spool: Arc<dyn ChunkSpool>,
        blob: Arc<dyn BlobStore>,
        files: Arc<dyn FileStore>,
        max_upload_bytes: u64,
        retention_hours: i64,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                sessions,
                spool,
                blob,
                files,
                max_upload_bytes,
                retention_hours,
            }),
        }
    }

    /// Register a chunked upload session and its placeholder record.
    pub async fn begin_upload(
        &self,
        upload_id: &str,
        filename: &str,
        total_size: i64,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<FileRecord, UploadError> {
        if total_size <= 0 {
            return Err(UploadError::InvalidSize(total_size));
        }
        if total_size as u64 > self.inner.max_upload_bytes {
            return Err(UploadError::PayloadTooLarge {
                received: total_size as u64,
                max: self.inner.max_upload_bytes,
            });
        }

        self.inner
            .sessions
            .create(upload_id, filename, total_size)
            .await?;

        let record = self
            .inner
            .files
            .create(NewFileRecord {
                id: upload_id.to_string(),
                filename: filename.to_string(),
                blob_url: String::new(),
                blob_pathname: String::new(),
                size: 0,
                ip_address,
                user_agent,
                expires_at: self.expires_at(),
            })
            .await;

        match record {
            Ok(record) => Ok(record),
            Err(e) => {
                // Roll the session back so the id is reusable.
                self.inner.sessions.remove(upload_id).await;
                Err(UploadError::Database(e.to_string()))
            }
        }
    }

    /// Accept a chunk at an absolute index; the chunk flagged last
    /// triggers reassembly and commit.
    pub async fn receive_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        data: Bytes,
        is_last: bool,
        expected_hash: Option<&str>,
    ) -> Result<ReceiveOutcome, UploadError> {
        if !self.inner.sessions.exists(upload_id).await {
            return Err(UploadError::SessionNotFound(upload_id.to_string()));
        }

        if let Some(expected) = expected_hash {
            if !verify_hash(&data, expected) {
                return Err(UploadError::ChunkHashMismatch {
                    expected: expected.to_string(),
                    actual: super::chunk_store::compute_hash(&data),
                });
            }
        }

        let len = data.len();
        self.inner.spool.store(upload_id, chunk_index, data).await?;

        let progress = match self
            .inner
            .sessions
            .record_chunk(
                upload_id,
                chunk_index,
                len,
                is_last,
                self.inner.max_upload_bytes,
            )
            .await
        {
            Ok(progress) => progress,
            Err(e @ UploadError::PayloadTooLarge { .. }) => {
                // The session is already gone; free the spool and the
                // placeholder so retries start clean.
                self.inner.spool.purge(upload_id).await;
                if let Err(db_err) = self.inner.files.mark_deleted(upload_id).await {
                    tracing::warn!(
                        upload_id = %upload_id,
                        error = %db_err,
                        "Failed to delete placeholder after oversize teardown"
                    );
                }
                return Err(e);
            }
            Err(e @ UploadError::SessionNotFound(_)) => {
                // The reaper won the race after we spooled; drop the
                // orphaned bytes.
                self.inner.spool.purge(upload_id).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            upload_id = %upload_id,
            chunk_index = chunk_index,
            chunk_size = len,
            chunks_received = progress.chunks_received,
            bytes_received = progress.bytes_received,
            "Chunk received"
        );

        if !is_last {
            return Ok(ReceiveOutcome::Accepted {
                chunk_index,
                chunks_received: progress.chunks_received,
            });
        }

        self.finalize(upload_id).await
    }

    /// Reassemble and commit. Two sequential effects: store the blob,
    /// then attach it to the record. Failure at either step returns the
    /// session to the receiving state so the client can retry the last
    /// chunk.
    async fn finalize(&self, upload_id: &str) -> Result<ReceiveOutcome, UploadError> {
        let ticket = self.inner.sessions.begin_finalize(upload_id).await?;

        tracing::info!(
            upload_id = %upload_id,
            filename = %ticket.filename,
            chunks = ticket.last_index + 1,
            bytes = ticket.bytes_received,
            "Assembling upload"
        );

        let data = match self
            .inner
            .spool
            .assemble(upload_id, ticket.last_index)
            .await
        {
            Ok(data) => data,
            Err(e) => {
                self.inner.sessions.abort_finalize(upload_id).await;
                return Err(e);
            }
        };
        let size = data.len() as i64;

        // Effect one: durable blob.
        let put = match self
            .inner
            .blob
            .put(&ticket.filename, data, content_type_for_name(&ticket.filename))
            .await
        {
            Ok(put) => put,
            Err(e) => {
                self.inner.sessions.abort_finalize(upload_id).await;
                return Err(UploadError::Storage(e.to_string()));
            }
        };

        // Effect two: record update. Conditioned on the record still being
        // a placeholder, so a retry after a post-put failure converges.
        let applied = match self
            .inner
            .files
            .attach_blob(upload_id, &put.url, &put.pathname, size)
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                self.inner.sessions.abort_finalize(upload_id).await;
                return Err(UploadError::Database(e.to_string()));
            }
        };
        if !applied {
            tracing::warn!(
                upload_id = %upload_id,
                "Record already finalized, keeping existing blob reference"
            );
        }

        let record = match self.inner.files.get(upload_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.inner.sessions.abort_finalize(upload_id).await;
                return Err(UploadError::Database(format!(
                    "record missing after finalize: {}",
                    upload_id
                )));
            }
            Err(e) => {
                self.inner.sessions.abort_finalize(upload_id).await;
                return Err(UploadError::Database(e.to_string()));
            }
        };

        self.inner.sessions.remove(upload_id).await;
        self.inner.spool.purge(upload_id).await;

        tracing::info!(
            upload_id = %upload_id,
            filename = %record.filename,
            size = record.size,
            "Upload finalized"
        );

        Ok(ReceiveOutcome::Finalized(record))
    }

    /// Whole-file path used by the direct upload route.
    pub async fn direct_upload(
        &self,
        id: &str,
        filename: &str,
        data: Vec<u8>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<FileRecord, UploadError> {
        let size = data.len() as u64;
        if size > self.inner.max_upload_bytes {
            return Err(UploadError::PayloadTooLarge {
                received: size,
                max: self.inner.max_upload_bytes,
            });
        }

        let put = self
            .inner
            .blob
            .put(filename, data, content_type_for_name(filename))
            .await
            .map_err(|e| UploadError::Storage(e.to_string()))?;

        let record = self
            .inner
            .files
            .create(NewFileRecord {
                id: id.to_string(),
                filename: filename.to_string(),
                blob_url: put.url,
                blob_pathname: put.pathname,
                size: size as i64,
                ip_address,
                user_agent,
                expires_at: self.expires_at(),
            })
            .await
            .map_err(|e| UploadError::Database(e.to_string()))?;

        tracing::info!(
            id = %record.id,
            filename = %record.filename,
            size = record.size,
            "Direct upload stored"
        );

        Ok(record)
    }

    /// Abandon a session: drop accounting, spooled chunks, and the
    /// placeholder record.
    pub async fn abandon(&self, upload_id: &str) -> Result<(), UploadError> {
        if self.inner.sessions.remove(upload_id).await.is_none() {
            return Err(UploadError::SessionNotFound(upload_id.to_string()));
        }

        self.inner.spool.purge(upload_id).await;

        if let Err(e) = self.inner.files.mark_deleted(upload_id).await {
            tracing::warn!(
                upload_id = %upload_id,
                error = %e,
                "Failed to delete placeholder for abandoned session"
            );
        }

        tracing::info!(upload_id = %upload_id, "Upload session abandoned");

        Ok(())
    }

    /// Snapshot a session for status queries.
    pub async fn session_status(&self, upload_id: &str) -> Option<ChunkSession> {
        self.inner.sessions.get(upload_id).await
    }

    /// Start the background reaper that frees abandoned sessions.
    pub fn start_reaper(&self, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));

            loop {
                interval.tick().await;
                let reaped = engine.inner.sessions.reap_stale().await;
                for upload_id in &reaped {
                    engine.inner.spool.purge(upload_id).await;
                    if let Err(e) = engine.inner.files.mark_deleted(upload_id).await {
                        tracing::warn!(
                            upload_id = %upload_id,
                            error = %e,
                            "Failed to delete placeholder for reaped session"
                        );
                    }
                }
                if !reaped.is_empty() {
                    let active = engine.inner.sessions.count().await;
                    tracing::debug!(active, "Session reaper pass complete");
                }
            }
        })
    }

    fn expires_at(&self) -> chrono::DateTime<Utc> {
        Utc::now() + Duration::hours(self.inner.retention_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryBlobStore, MemoryFileStore};
    use crate::upload::chunk_store::{compute_hash, MemorySpool};

    const MIB: usize = 1024 * 1024;

    fn test_engine(max_upload_bytes: u64) -> (UploadEngine, Arc<MemoryFileStore>, Arc<MemoryBlobStore>) {
        let files = Arc::new(MemoryFileStore::new());
        let blob = Arc::new(MemoryBlobStore::new());
        let engine = UploadEngine::new(
            SessionManager::new(3600),
            Arc::new(MemorySpool::new()),
            blob.clone(),
            files.clone(),
            max_upload_bytes,
            72,
        );
        (engine, files, blob)
    }

    async fn begin(engine: &UploadEngine, id: &str, filename: &str, total: i64) {
        engine
            .begin_upload(id, filename, total, Some("127.0.0.1".into()), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn begin_upload_rejects_non_positive_size() {
        let (engine, _, _) = test_engine(1024);

        let zero = engine.begin_upload("abc12345", "a.txt", 0, None, None).await;
        assert!(matches!(zero, Err(UploadError::InvalidSize(0))));

        let negative = engine.begin_upload("abc12345", "a.txt", -5, None, None).await;
        assert!(matches!(negative, Err(UploadError::InvalidSize(-5))));
    }

    #[tokio::test]
    async fn begin_upload_rejects_duplicate_id() {
        let (engine, _, _) = test_engine(1024);
        begin(&engine, "abc12345", "a.txt", 100).await;

        let result = engine
            .begin_upload("abc12345", "b.txt", 100, None, None)
            .await;
        assert!(matches!(result, Err(UploadError::DuplicateSession(_))));
    }

    #[tokio::test]
    async fn begin_upload_creates_placeholder_record() {
        let (engine, files, _) = test_engine(1024);
        begin(&engine, "abc12345", "a.txt", 100).await;

        let record = files.get("abc12345").await.unwrap().unwrap();
        assert!(record.blob_url.is_empty());
        assert_eq!(record.size, 0);
        assert!(record.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn chunk_without_session_is_rejected() {
        let (engine, _, _) = test_engine(1024);

        let result = engine
            .receive_chunk("nosuchid", 0, Bytes::from_static(b"data"), false, None)
            .await;
        assert!(matches!(result, Err(UploadError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn three_chunk_upload_reassembles_in_index_order() {
        let total = (12 * MIB) as i64;
        let (engine, _, blob) = test_engine(100 * MIB as u64);
        begin(&engine, "abc12345", "video.mp4", total).await;

        let chunks: Vec<Vec<u8>> = vec![
            vec![b'a'; 4 * MIB],
            vec![b'b'; 4 * MIB],
            vec![b'c'; 4 * MIB],
        ];

        for (i, chunk) in chunks.iter().enumerate() {
            let is_last = i == 2;
            let outcome = engine
                .receive_chunk(
                    "abc12345",
                    i as u32,
                    Bytes::from(chunk.clone()),
                    is_last,
                    None,
                )
                .await
                .unwrap();

            match outcome {
                ReceiveOutcome::Accepted {
                    chunk_index,
                    chunks_received,
                } => {
                    assert!(!is_last);
                    assert_eq!(chunk_index, i as u32);
                    assert_eq!(chunks_received, i + 1);
                }
                ReceiveOutcome::Finalized(record) => {
                    assert!(is_last);
                    assert_eq!(record.size, total);
                    assert!(!record.blob_url.is_empty());
                }
            }
        }

        assert_eq!(blob.put_count(), 1);
        let object = blob.object("video.mp4").await.unwrap();
        assert_eq!(object.len(), 12 * MIB);
        assert_eq!(object[0], b'a');
        assert_eq!(object[4 * MIB], b'b');
        assert_eq!(object[8 * MIB], b'c');
        assert_eq!(object[12 * MIB - 1], b'c');
    }

    #[tokio::test]
    async fn gap_fails_finalize_without_blob_put_and_stays_retryable() {
        let (engine, _, blob) = test_engine(1024);
        begin(&engine, "abc12345", "a.bin", 30).await;

        engine
            .receive_chunk("abc12345", 0, Bytes::from_static(b"0000000000"), false, None)
            .await
            .unwrap();

        // Index 1 never sent; last chunk lands at index 2.
        let result = engine
            .receive_chunk("abc12345", 2, Bytes::from_static(b"2222222222"), true, None)
            .await;
        match result {
            Err(UploadError::IncompleteUpload { missing }) => assert_eq!(missing, vec![1]),
            other => panic!("expected IncompleteUpload, got {:?}", other),
        }
        assert_eq!(blob.put_count(), 0);

        // Fill the gap and retry the last chunk.
        engine
            .receive_chunk("abc12345", 1, Bytes::from_static(b"1111111111"), false, None)
            .await
            .unwrap();
        let outcome = engine
            .receive_chunk("abc12345", 2, Bytes::from_static(b"2222222222"), true, None)
            .await
            .unwrap();

        match outcome {
            ReceiveOutcome::Finalized(record) => assert_eq!(record.size, 30),
            other => panic!("expected Finalized, got {:?}", other),
        }
        assert_eq!(blob.object("a.bin").await.unwrap(), b"000000000011111111112222222222");
    }

    #[tokio::test]
    async fn resent_chunk_overwrites_prior_bytes() {
        let (engine, _, blob) = test_engine(1024);
        begin(&engine, "abc12345", "a.bin", 8).await;

        engine
            .receive_chunk("abc12345", 0, Bytes::from_static(b"AAAA"), false, None)
            .await
            .unwrap();
        engine
            .receive_chunk("abc12345", 0, Bytes::from_static(b"BBBB"), false, None)
            .await
            .unwrap();
        engine
            .receive_chunk("abc12345", 1, Bytes::from_static(b"CCCC"), true, None)
            .await
            .unwrap();

        assert_eq!(blob.object("a.bin").await.unwrap(), b"BBBBCCCC");
    }

    #[tokio::test]
    async fn oversize_upload_tears_down_at_crossing_chunk() {
        let (engine, files, blob) = test_engine(25);
        begin(&engine, "abc12345", "a.bin", 20).await;

        engine
            .receive_chunk("abc12345", 0, Bytes::from(vec![0u8; 20]), false, None)
            .await
            .unwrap();

        let result = engine
            .receive_chunk("abc12345", 1, Bytes::from(vec![0u8; 10]), false, None)
            .await;
        assert!(matches!(
            result,
            Err(UploadError::PayloadTooLarge { received: 30, max: 25 })
        ));

        // Nothing durable was committed and the session is gone.
        assert_eq!(blob.put_count(), 0);
        let next = engine
            .receive_chunk("abc12345", 2, Bytes::from_static(b"x"), false, None)
            .await;
        assert!(matches!(next, Err(UploadError::SessionNotFound(_))));

        // The placeholder was released.
        let record = files.get("abc12345").await.unwrap().unwrap();
        assert!(record.deleted_at.is_some());
    }

    #[tokio::test]
    async fn blob_failure_leaves_session_retryable() {
        let (engine, _, blob) = test_engine(1024);
        begin(&engine, "abc12345", "a.bin", 8).await;

        engine
            .receive_chunk("abc12345", 0, Bytes::from_static(b"AAAA"), false, None)
            .await
            .unwrap();

        blob.fail_puts(true);
        let result = engine
            .receive_chunk("abc12345", 1, Bytes::from_static(b"BBBB"), true, None)
            .await;
        assert!(matches!(result, Err(UploadError::Storage(_))));

        // Retry the last chunk once the store recovers.
        blob.fail_puts(false);
        let outcome = engine
            .receive_chunk("abc12345", 1, Bytes::from_static(b"BBBB"), true, None)
            .await
            .unwrap();
        match outcome {
            ReceiveOutcome::Finalized(record) => {
                assert_eq!(record.size, 8);
                assert!(!record.blob_url.is_empty());
            }
            other => panic!("expected Finalized, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn chunk_hash_is_verified_when_present() {
        let (engine, _, _) = test_engine(1024);
        begin(&engine, "abc12345", "a.bin", 8).await;

        let bad = engine
            .receive_chunk(
                "abc12345",
                0,
                Bytes::from_static(b"AAAA"),
                false,
                Some("deadbeef"),
            )
            .await;
        assert!(matches!(bad, Err(UploadError::ChunkHashMismatch { .. })));

        let good_hash = compute_hash(b"AAAA");
        engine
            .receive_chunk(
                "abc12345",
                0,
                Bytes::from_static(b"AAAA"),
                false,
                Some(&good_hash),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn direct_upload_enforces_size_limit_before_storing() {
        let (engine, _, blob) = test_engine(10);

        let result = engine
            .direct_upload("abc12345", "big.bin", vec![0u8; 11], None, None)
            .await;
        assert!(matches!(result, Err(UploadError::PayloadTooLarge { .. })));
        assert_eq!(blob.put_count(), 0);

        let record = engine
            .direct_upload("abc12345", "ok.bin", vec![0u8; 10], None, None)
            .await
            .unwrap();
        assert_eq!(record.size, 10);
        assert_eq!(blob.put_count(), 1);
    }

    #[tokio::test]
    async fn abandon_frees_session_and_placeholder() {
        let (engine, files, _) = test_engine(1024);
        begin(&engine, "abc12345", "a.bin", 100).await;

        engine.abandon("abc12345").await.unwrap();

        let record = files.get("abc12345").await.unwrap().unwrap();
        assert!(record.deleted_at.is_some());
        assert!(matches!(
            engine.abandon("abc12345").await,
            Err(UploadError::SessionNotFound(_))
        ));
    }
}
