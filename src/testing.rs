//! In-memory collaborator implementations shared across unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::db::{
    ExpiredFile, FileRecord, FileStats, FileStore, NewFileRecord, ReputationStore,
};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::storage::{BlobStore, ObjectMetadata, PutResult};

// ============================================================================
// File store
// ============================================================================

#[derive(Default)]
pub struct MemoryFileStore {
    records: Mutex<HashMap<String, FileRecord>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing the store contract.
    pub async fn insert(&self, record: FileRecord) {
        let mut records = self.records.lock().await;
        records.insert(record.id.clone(), record);
    }
}

/// A live, fully uploaded record expiring far in the future.
pub fn live_record(id: &str, filename: &str) -> FileRecord {
    FileRecord {
        id: id.to_string(),
        filename: filename.to_string(),
        blob_url: format!("https://blob.test/{}", filename),
        blob_pathname: filename.to_string(),
        size: 1024,
        ip_address: Some("127.0.0.1".to_string()),
        user_agent: Some("test".to_string()),
        uploaded_at: Utc::now(),
        expires_at: Utc::now() + Duration::hours(72),
        deleted_at: None,
        download_count: 0,
        downloaded_at: None,
    }
}

fn is_live(record: &FileRecord, now: DateTime<Utc>) -> bool {
    record.deleted_at.is_none() && record.expires_at > now
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn create(&self, new: NewFileRecord) -> Result<FileRecord> {
        let mut records = self.records.lock().await;
        if records.contains_key(&new.id) {
            return Err(AppError::Internal(format!("duplicate id: {}", new.id)));
        }

        let record = FileRecord {
            id: new.id.clone(),
            filename: new.filename,
            blob_url: new.blob_url,
            blob_pathname: new.blob_pathname,
            size: new.size,
            ip_address: new.ip_address,
            user_agent: new.user_agent,
            uploaded_at: Utc::now(),
            expires_at: new.expires_at,
            deleted_at: None,
            download_count: 0,
            downloaded_at: None,
        };
        records.insert(new.id, record.clone());

        Ok(record)
    }

    async fn attach_blob(&self, id: &str, url: &str, pathname: &str, size: i64) -> Result<bool> {
        let mut records = self.records.lock().await;
        match records.get_mut(id) {
            Some(record) if record.blob_url.is_empty() => {
                record.blob_url = url.to_string();
                record.blob_pathname = pathname.to_string();
                record.size = size;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(id).cloned())
    }

    async fn get_live(&self, id: &str) -> Result<Option<FileRecord>> {
        let records = self.records.lock().await;
        let now = Utc::now();
        Ok(records.get(id).filter(|r| is_live(r, now)).cloned())
    }

    async fn consume(&self, id: &str) -> Result<Option<FileRecord>> {
        let mut records = self.records.lock().await;
        let now = Utc::now();
        match records.get_mut(id) {
            Some(record)
                if record.downloaded_at.is_none()
                    && is_live(record, now)
                    && !record.blob_url.is_empty() =>
            {
                record.downloaded_at = Some(now);
                record.deleted_at = Some(now);
                record.download_count += 1;
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_deleted(&self, id: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(id) {
            record.deleted_at.get_or_insert_with(Utc::now);
        }
        Ok(())
    }

    async fn list_live(&self) -> Result<Vec<FileRecord>> {
        let records = self.records.lock().await;
        let now = Utc::now();
        let mut live: Vec<FileRecord> = records
            .values()
            .filter(|r| is_live(r, now))
            .cloned()
            .collect();
        live.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(live)
    }

    async fn sweep_expired(&self) -> Result<Vec<ExpiredFile>> {
        let mut records = self.records.lock().await;
        let now = Utc::now();
        let mut swept = Vec::new();
        for record in records.values_mut() {
            if record.deleted_at.is_none() && record.expires_at < now {
                record.deleted_at = Some(now);
                swept.push(ExpiredFile {
                    id: record.id.clone(),
                    blob_pathname: record.blob_pathname.clone(),
                });
            }
        }
        Ok(swept)
    }

    async fn stats(&self) -> Result<FileStats> {
        let records = self.records.lock().await;
        let now = Utc::now();
        let live: Vec<&FileRecord> = records.values().filter(|r| is_live(r, now)).collect();
        Ok(FileStats {
            total_files: live.len() as i64,
            total_size: live.iter().map(|r| r.size).sum(),
            today_uploads: records
                .values()
                .filter(|r| r.deleted_at.is_none() && r.uploaded_at.date_naive() == now.date_naive())
                .count() as i64,
            expiring_soon: live
                .iter()
                .filter(|r| r.expires_at < now + Duration::hours(24))
                .count() as i64,
        })
    }
}

// ============================================================================
// Blob store
// ============================================================================

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    deletes: Mutex<Vec<String>>,
    put_count: AtomicUsize,
    fail_puts: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn put_count(&self) -> usize {
        self.put_count.load(Ordering::SeqCst)
    }

    pub async fn object(&self, pathname: &str) -> Option<Vec<u8>> {
        let objects = self.objects.lock().await;
        objects.get(pathname).cloned()
    }

    pub async fn deletes(&self) -> Vec<String> {
        let deletes = self.deletes.lock().await;
        deletes.clone()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, name: &str, data: Vec<u8>, _content_type: &str) -> Result<PutResult> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(AppError::Storage("simulated put failure".to_string()));
        }

        self.put_count.fetch_add(1, Ordering::SeqCst);
        let pathname = name.to_string();
        let mut objects = self.objects.lock().await;
        objects.insert(pathname.clone(), data);

        Ok(PutResult {
            url: format!("https://blob.test/{}", pathname),
            pathname,
        })
    }

    async fn head(&self, pathname: &str) -> Result<ObjectMetadata> {
        let objects = self.objects.lock().await;
        let data = objects
            .get(pathname)
            .ok_or_else(|| AppError::NotFound(format!("object not found: {}", pathname)))?;
        Ok(ObjectMetadata {
            pathname: pathname.to_string(),
            size: data.len() as i64,
            last_modified: Some(Utc::now()),
            content_type: None,
        })
    }

    async fn delete(&self, pathname: &str) -> Result<()> {
        let mut objects = self.objects.lock().await;
        objects.remove(pathname);
        let mut deletes = self.deletes.lock().await;
        deletes.push(pathname.to_string());
        Ok(())
    }
}

// ============================================================================
// Reputation store
// ============================================================================

#[derive(Default)]
pub struct MemoryReputationStore {
    bans: Mutex<HashMap<String, Option<DateTime<Utc>>>>,
    attempts: Mutex<Vec<(String, DateTime<Utc>, bool)>>,
}

impl MemoryReputationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReputationStore for MemoryReputationStore {
    async fn is_banned(&self, ip: &str) -> Result<bool> {
        let bans = self.bans.lock().await;
        Ok(match bans.get(ip) {
            Some(None) => true,
            Some(Some(expires_at)) => *expires_at > Utc::now(),
            None => false,
        })
    }

    async fn record_attempt(
        &self,
        ip: &str,
        success: bool,
        _user_agent: Option<&str>,
    ) -> Result<()> {
        let mut attempts = self.attempts.lock().await;
        attempts.push((ip.to_string(), Utc::now(), success));
        Ok(())
    }

    async fn recent_failures(&self, ip: &str, window_minutes: i64) -> Result<i64> {
        let cutoff = Utc::now() - Duration::minutes(window_minutes);
        let attempts = self.attempts.lock().await;
        Ok(attempts
            .iter()
            .filter(|(a_ip, at, success)| a_ip == ip && *at > cutoff && !success)
            .count() as i64)
    }

    async fn ban(&self, ip: &str, _reason: &str, duration_hours: Option<i64>) -> Result<()> {
        let mut bans = self.bans.lock().await;
        bans.insert(
            ip.to_string(),
            duration_hours.map(|h| Utc::now() + Duration::hours(h)),
        );
        Ok(())
    }
}

// ============================================================================
// State builder
// ============================================================================

pub struct TestContext {
    pub state: AppState,
    pub files: Arc<MemoryFileStore>,
    pub blob: Arc<MemoryBlobStore>,
    pub reputation: Arc<MemoryReputationStore>,
}

/// Build an [`AppState`] over in-memory collaborators.
pub fn test_context() -> TestContext {
    test_context_with(Config::default())
}

pub fn test_context_with(config: Config) -> TestContext {
    let files = Arc::new(MemoryFileStore::new());
    let blob = Arc::new(MemoryBlobStore::new());
    let reputation = Arc::new(MemoryReputationStore::new());

    let state = AppState::new(
        config,
        files.clone(),
        reputation.clone(),
        blob.clone(),
    );

    TestContext {
        state,
        files,
        blob,
        reputation,
    }
}
