//! Expired-file sweep
//!
//! Marks expired records deleted and removes their blobs. Runs on an
//! interval in the background and can be triggered from the admin
//! cleanup endpoint.

use std::sync::Arc;

use futures::future::join_all;

use crate::db::FileStore;
use crate::error::Result;
use crate::storage::BlobStore;

/// Sweep once. Returns the number of records marked deleted.
///
/// Blob deletions are best-effort: a failed delete is logged and the
/// sweep continues, since the metadata transition already made the file
/// unreachable.
pub async fn run_sweep(files: &Arc<dyn FileStore>, blob: &Arc<dyn BlobStore>) -> Result<usize> {
    let expired = files.sweep_expired().await?;
    if expired.is_empty() {
        return Ok(0);
    }

    let deletions = expired.iter().map(|file| {
        let blob = blob.clone();
        async move {
            if file.blob_pathname.is_empty() {
                return;
            }
            if let Err(e) = blob.delete(&file.blob_pathname).await {
                tracing::warn!(
                    id = %file.id,
                    pathname = %file.blob_pathname,
                    error = %e,
                    "Failed to delete expired blob"
                );
            }
        }
    });
    join_all(deletions).await;

    tracing::info!(count = expired.len(), "Swept expired files");

    Ok(expired.len())
}

/// Start the background sweeper task.
pub fn start_sweeper(
    files: Arc<dyn FileStore>,
    blob: Arc<dyn BlobStore>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));

        loop {
            interval.tick().await;
            if let Err(e) = run_sweep(&files, &blob).await {
                tracing::error!(error = %e, "Expiry sweep failed");
            }
        }
    })
}
