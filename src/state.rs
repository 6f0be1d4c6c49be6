//! Application state management

use std::sync::Arc;

use crate::config::{ChunkSpoolConfig, Config};
use crate::db::{FileStore, ReputationStore};
use crate::download::DownloadGate;
use crate::guard::ReputationGuard;
use crate::notify::Notifier;
use crate::storage::BlobStore;
use crate::upload::{ChunkSpool, DiskSpool, MemorySpool, SessionManager, UploadEngine};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    files: Arc<dyn FileStore>,
    blob: Arc<dyn BlobStore>,
    engine: UploadEngine,
    gate: DownloadGate,
    guard: ReputationGuard,
    notifier: Notifier,
}

impl AppState {
    /// Wire the services over their storage collaborators.
    pub fn new(
        config: Config,
        files: Arc<dyn FileStore>,
        reputation: Arc<dyn ReputationStore>,
        blob: Arc<dyn BlobStore>,
    ) -> Self {
        let spool: Arc<dyn ChunkSpool> = match &config.limits.chunk_spool {
            ChunkSpoolConfig::Memory => Arc::new(MemorySpool::new()),
            ChunkSpoolConfig::Disk(path) => Arc::new(DiskSpool::new(path.clone())),
        };

        let engine = UploadEngine::new(
            SessionManager::new(config.limits.session_ttl_secs),
            spool,
            blob.clone(),
            files.clone(),
            config.limits.max_upload_bytes,
            config.limits.retention_hours,
        );

        let gate = DownloadGate::new(
            files.clone(),
            blob.clone(),
            config.limits.delete_policy,
            config.limits.delete_grace_secs,
        );

        let guard = ReputationGuard::new(reputation);
        let notifier = Notifier::new(config.notify.discord_webhook_url.clone());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                files,
                blob,
                engine,
                gate,
                guard,
                notifier,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn files(&self) -> &Arc<dyn FileStore> {
        &self.inner.files
    }

    pub fn blob(&self) -> &Arc<dyn BlobStore> {
        &self.inner.blob
    }

    pub fn engine(&self) -> &UploadEngine {
        &self.inner.engine
    }

    pub fn gate(&self) -> &DownloadGate {
        &self.inner.gate
    }

    pub fn guard(&self) -> &ReputationGuard {
        &self.inner.guard
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    /// Client-facing single-use download URL for a file id.
    pub fn public_file_url(&self, id: &str) -> String {
        format!(
            "{}/{}",
            self.inner.config.server.public_url.trim_end_matches('/'),
            id
        )
    }
}
