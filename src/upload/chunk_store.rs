//! Chunk Spool
//!
//! Temporary storage for uploaded chunks between arrival and reassembly.
//! Backends: in-memory for single-instance deployments, local filesystem
//! for uploads that should not live in RAM.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::types::UploadError;

/// Trait for chunk spool backends
#[async_trait]
pub trait ChunkSpool: Send + Sync {
    /// Store a chunk at an absolute index. Storing the same index again
    /// replaces the prior bytes.
    async fn store(&self, upload_id: &str, chunk_index: u32, data: Bytes)
        -> Result<(), UploadError>;

    /// Concatenate chunks `0..=last_index` in index order.
    ///
    /// Any index with no stored chunk fails with `IncompleteUpload`
    /// listing every missing index; nothing is skipped silently.
    async fn assemble(&self, upload_id: &str, last_index: u32) -> Result<Vec<u8>, UploadError>;

    /// Drop all chunks for an upload.
    async fn purge(&self, upload_id: &str);
}

// ============================================================================
// In-Memory Spool
// ============================================================================

/// Chunk spool held entirely in process memory
#[derive(Default)]
pub struct MemorySpool {
    chunks: RwLock<HashMap<String, BTreeMap<u32, Bytes>>>,
}

impl MemorySpool {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkSpool for MemorySpool {
    async fn store(
        &self,
        upload_id: &str,
        chunk_index: u32,
        data: Bytes,
    ) -> Result<(), UploadError> {
        let mut chunks = self.chunks.write().await;
        chunks
            .entry(upload_id.to_string())
            .or_default()
            .insert(chunk_index, data);
        Ok(())
    }

    async fn assemble(&self, upload_id: &str, last_index: u32) -> Result<Vec<u8>, UploadError> {
        let chunks = self.chunks.read().await;
        let Some(stored) = chunks.get(upload_id) else {
            return Err(UploadError::IncompleteUpload {
                missing: (0..=last_index).collect(),
            });
        };

        let missing: Vec<u32> = (0..=last_index)
            .filter(|i| !stored.contains_key(i))
            .collect();
        if !missing.is_empty() {
            return Err(UploadError::IncompleteUpload { missing });
        }

        let total: usize = stored.range(0..=last_index).map(|(_, d)| d.len()).sum();
        let mut assembled = Vec::with_capacity(total);
        for (_, data) in stored.range(0..=last_index) {
            assembled.extend_from_slice(data);
        }

        Ok(assembled)
    }

    async fn purge(&self, upload_id: &str) {
        let mut chunks = self.chunks.write().await;
        chunks.remove(upload_id);
    }
}

// ============================================================================
// On-Disk Spool
// ============================================================================

/// Chunk spool backed by the local filesystem
pub struct DiskSpool {
    base_path: PathBuf,
}

impl DiskSpool {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.base_path.join(upload_id)
    }

    fn chunk_path(&self, upload_id: &str, chunk_index: u32) -> PathBuf {
        self.upload_dir(upload_id)
            .join(format!("{:08}.chunk", chunk_index))
    }
}

#[async_trait]
impl ChunkSpool for DiskSpool {
    async fn store(
        &self,
        upload_id: &str,
        chunk_index: u32,
        data: Bytes,
    ) -> Result<(), UploadError> {
        let path = self.chunk_path(upload_id, chunk_index);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UploadError::Storage(e.to_string()))?;
        }

        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| UploadError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn assemble(&self, upload_id: &str, last_index: u32) -> Result<Vec<u8>, UploadError> {
        let mut missing = Vec::new();
        let mut assembled = Vec::new();

        for i in 0..=last_index {
            let path = self.chunk_path(upload_id, i);
            match tokio::fs::read(&path).await {
                Ok(chunk) => {
                    if missing.is_empty() {
                        assembled.extend_from_slice(&chunk);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => missing.push(i),
                Err(e) => return Err(UploadError::Storage(format!("Failed to read chunk: {}", e))),
            }
        }

        if !missing.is_empty() {
            return Err(UploadError::IncompleteUpload { missing });
        }

        Ok(assembled)
    }

    async fn purge(&self, upload_id: &str) {
        let dir = self.upload_dir(upload_id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(upload_id = %upload_id, error = %e, "Failed to purge chunk spool");
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Compute SHA-256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify hash matches data
pub fn verify_hash(data: &[u8], expected_hash: &str) -> bool {
    compute_hash(data) == expected_hash
}

// ============================================================================
// Tests
// ============================================================================
