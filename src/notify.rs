//! Notification Sink
//!
//! Posts upload/download events to a Discord webhook. Every send runs as a
//! detached task: failures are logged and can never touch the primary
//! request's latency or outcome. Disabled when no webhook is configured.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::db::FileRecord;

#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    webhook_url: Option<String>,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                webhook_url,
                http: reqwest::Client::new(),
            }),
        }
    }

    /// Fire-and-forget upload notification.
    pub fn spawn_upload_notice(&self, record: &FileRecord, public_url: &str) {
        self.spawn_send(build_upload_message(record, public_url));
    }

    /// Fire-and-forget download notification.
    pub fn spawn_download_notice(&self, record: &FileRecord) {
        self.spawn_send(build_download_message(record));
    }

    fn spawn_send(&self, message: Value) {
        let Some(url) = self.inner.webhook_url.clone() else {
            return;
        };
        let http = self.inner.http.clone();

        tokio::spawn(async move {
            match http.post(&url).json(&message).send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(status = %response.status(), "Webhook rejected notification");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to send notification");
                }
                _ => {}
            }
        });
    }
}

fn size_mib(size: i64) -> String {
    format!("{:.2} MB", size as f64 / (1024.0 * 1024.0))
}

fn build_upload_message(record: &FileRecord, public_url: &str) -> Value {
    json!({
        "content": "📤 New file uploaded!",
        "embeds": [{
            "title": "📤 File Uploaded",
            "color": 0x00ff00,
            "fields": [
                { "name": "Filename", "value": record.filename, "inline": true },
                { "name": "File ID", "value": record.id, "inline": true },
                { "name": "Size", "value": size_mib(record.size), "inline": true },
                { "name": "URL", "value": public_url, "inline": false },
                { "name": "Expires At", "value": record.expires_at.to_rfc3339(), "inline": true },
                {
                    "name": "IP Address",
                    "value": record.ip_address.as_deref().unwrap_or("Unknown"),
                    "inline": true
                },
            ],
            "footer": { "text": "blobdrop upload" },
        }],
    })
}

fn build_download_message(record: &FileRecord) -> Value {
    json!({
        "content": "📥 File downloaded!",
        "embeds": [{
            "title": "📥 File Downloaded",
            "color": 0x0099ff,
            "fields": [
                { "name": "Filename", "value": record.filename, "inline": true },
                { "name": "File ID", "value": record.id, "inline": true },
                { "name": "Size", "value": size_mib(record.size), "inline": true },
                { "name": "Download Count", "value": record.download_count.to_string(), "inline": true },
                {
                    "name": "IP Address",
                    "value": record.ip_address.as_deref().unwrap_or("Unknown"),
                    "inline": true
                },
            ],
            "footer": { "text": "blobdrop download" },
        }],
    })
}
