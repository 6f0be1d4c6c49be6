//! Storage types

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of storing an object.
#[derive(Debug, Clone, Serialize)]
pub struct PutResult {
    /// Public-read URL for the stored object.
    pub url: String,
    /// Storage pathname, used for head/delete.
    pub pathname: String,
}

/// Metadata about a storage object
#[derive(Debug, Clone, Serialize)]
pub struct ObjectMetadata {
    pub pathname: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
}
