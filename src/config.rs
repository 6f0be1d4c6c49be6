//! Application configuration loaded from the environment.

use std::env;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Base URL used when building client-facing download links.
    pub public_url: String,
    /// Admin surface is disabled entirely when unset.
    pub admin_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// Public-read URL prefix for stored objects.
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Hard cap on upload size, direct or reassembled. Policy value.
    pub max_upload_bytes: u64,
    /// File retention window; `expires_at = uploaded_at + retention`.
    pub retention_hours: i64,
    /// In-flight chunk sessions older than this are reaped.
    pub session_ttl_secs: u64,
    /// Expired-file sweep cadence.
    pub sweep_interval_secs: u64,
    pub chunk_spool: ChunkSpoolConfig,
    pub delete_policy: DeletePolicy,
    pub delete_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub discord_webhook_url: Option<String>,
}

/// Where chunk bytes are buffered between arrival and reassembly.
#[derive(Debug, Clone)]
pub enum ChunkSpoolConfig {
    Memory,
    Disk(PathBuf),
}

/// What happens to the blob after the first successful download.
/// The metadata transition is synchronous regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    Immediate,
    Deferred,
    Disabled,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let port = env_parse("BLOBDROP_PORT", 3000u16)?;

        let server = ServerConfig {
            port,
            public_url: env::var("BLOBDROP_PUBLIC_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            admin_password: env::var("ADMIN_PASSWORD").ok().filter(|p| !p.is_empty()),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/blobdrop".to_string()),
        };

        let bucket = env::var("S3_BUCKET").unwrap_or_else(|_| "blobdrop".to_string());
        let storage = StorageConfig {
            endpoint: env::var("S3_ENDPOINT").ok().filter(|e| !e.is_empty()),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            public_base_url: env::var("S3_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:9000/{}", bucket)),
            bucket,
            access_key: env::var("S3_ACCESS_KEY").unwrap_or_default(),
            secret_key: env::var("S3_SECRET_KEY").unwrap_or_default(),
        };

        let chunk_spool = match env::var("CHUNK_SPOOL").ok().as_deref() {
            None | Some("") | Some("memory") => ChunkSpoolConfig::Memory,
            Some(path) => ChunkSpoolConfig::Disk(PathBuf::from(path)),
        };

        let delete_policy = match env::var("DOWNLOAD_DELETE_POLICY").ok().as_deref() {
            None | Some("") | Some("deferred") => DeletePolicy::Deferred,
            Some("immediate") => DeletePolicy::Immediate,
            Some("disabled") => DeletePolicy::Disabled,
            Some(other) => anyhow::bail!("unknown DOWNLOAD_DELETE_POLICY: {}", other),
        };

        let limits = LimitsConfig {
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", 100 * 1024 * 1024u64)?,
            retention_hours: env_parse("RETENTION_HOURS", 72i64)?,
            session_ttl_secs: env_parse("SESSION_TTL_SECS", 3600u64)?,
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 600u64)?,
            chunk_spool,
            delete_policy,
            delete_grace_secs: env_parse("DOWNLOAD_DELETE_GRACE_SECS", 60u64)?,
        };

        let notify = NotifyConfig {
            discord_webhook_url: env::var("DISCORD_WEBHOOK_URL").ok().filter(|u| !u.is_empty()),
        };

        Ok(Self {
            server,
            database,
            storage,
            limits,
            notify,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 3000,
                public_url: "http://localhost:3000".to_string(),
                admin_password: None,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/blobdrop".to_string(),
            },
            storage: StorageConfig {
                endpoint: None,
                region: "us-east-1".to_string(),
                bucket: "blobdrop".to_string(),
                access_key: String::new(),
                secret_key: String::new(),
                public_base_url: "http://localhost:9000/blobdrop".to_string(),
            },
            limits: LimitsConfig {
                max_upload_bytes: 100 * 1024 * 1024,
                retention_hours: 72,
                session_ttl_secs: 3600,
                sweep_interval_secs: 600,
                chunk_spool: ChunkSpoolConfig::Memory,
                delete_policy: DeletePolicy::Deferred,
                delete_grace_secs: 60,
            },
            notify: NotifyConfig {
                discord_webhook_url: None,
            },
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", key, e)),
        _ => Ok(default),
    }
}
