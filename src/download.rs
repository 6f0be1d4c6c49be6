//! Single-Use Download Gate
//!
//! Per-record state machine: PENDING_UPLOAD -> AVAILABLE -> CONSUMED, with
//! EXPIRED reachable from AVAILABLE by time. The consumed transition is a
//! conditional update at the store layer, so two concurrent downloads of
//! the same id race safely: exactly one gets the redirect, the other gets
//! a terminal "gone".

use std::sync::Arc;

use crate::config::DeletePolicy;
use crate::db::{FileRecord, FileStore};
use crate::error::{AppError, Result};
use crate::storage::BlobStore;

/// A successful resolution: where to send the client.
#[derive(Debug, Clone)]
pub struct RedirectTarget {
    pub url: String,
    pub record: FileRecord,
}

/// Resolves download requests against the metadata store.
#[derive(Clone)]
pub struct DownloadGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    files: Arc<dyn FileStore>,
    blob: Arc<dyn BlobStore>,
    delete_policy: DeletePolicy,
    delete_grace_secs: u64,
}

impl DownloadGate {
    pub fn new(
        files: Arc<dyn FileStore>,
        blob: Arc<dyn BlobStore>,
        delete_policy: DeletePolicy,
        delete_grace_secs: u64,
    ) -> Self {
        Self {
            inner: Arc::new(GateInner {
                files,
                blob,
                delete_policy,
                delete_grace_secs,
            }),
        }
    }

    /// Resolve a download id to its blob URL, consuming the record.
    ///
    /// The metadata transition is synchronous; blob deletion follows the
    /// configured policy and never affects the response.
    pub async fn resolve(&self, id: &str) -> Result<RedirectTarget> {
        if let Some(record) = self.inner.files.consume(id).await? {
            tracing::info!(
                id = %id,
                filename = %record.filename,
                download_count = record.download_count,
                "File consumed by download"
            );

            self.dispose_blob(&record).await;

            return Ok(RedirectTarget {
                url: record.blob_url.clone(),
                record,
            });
        }

        // Lost the race or the record was never available. Re-fetch to pick
        // the terminal status, leaking nothing beyond consumed-vs-absent.
        match self.inner.files.get(id).await? {
            Some(record) if record.downloaded_at.is_some() => {
                Err(AppError::Gone("file no longer available".to_string()))
            }
            _ => Err(AppError::NotFound("file not found or expired".to_string())),
        }
    }

    async fn dispose_blob(&self, record: &FileRecord) {
        let pathname = record.blob_pathname.clone();
        match self.inner.delete_policy {
            DeletePolicy::Disabled => {}
            DeletePolicy::Immediate => {
                if let Err(e) = self.inner.blob.delete(&pathname).await {
                    tracing::warn!(pathname = %pathname, error = %e, "Blob delete failed");
                }
            }
            DeletePolicy::Deferred => {
                let blob = self.inner.blob.clone();
                let grace = self.inner.delete_grace_secs;
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_secs(grace)).await;
                    if let Err(e) = blob.delete(&pathname).await {
                        tracing::warn!(pathname = %pathname, error = %e, "Deferred blob delete failed");
                    }
                });
            }
        }
    }
}
