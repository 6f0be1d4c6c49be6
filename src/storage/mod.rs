//! Storage module for S3-compatible backends
//!
//! Supports MinIO, Cloudflare R2, Backblaze B2, and AWS S3.

mod s3_store;
mod types;

pub use s3_store::S3Store;
pub use types::*;

use async_trait::async_trait;

use crate::error::Result;

/// Durable object storage consumed by the upload engine and download gate.
///
/// `put` returns a public-read URL and the pathname needed for later
/// deletion; both are stored on the file record.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, name: &str, data: Vec<u8>, content_type: &str) -> Result<PutResult>;

    async fn head(&self, pathname: &str) -> Result<ObjectMetadata>;

    async fn delete(&self, pathname: &str) -> Result<()>;
}

/// Guess content type from file extension
pub fn content_type_for_name(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("");
    match ext.to_lowercase().as_str() {
        "txt" | "log" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "csv" => "text/csv",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        _ => "application/octet-stream",
    }
}
