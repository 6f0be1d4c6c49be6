//! S3-backed blob store

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::StorageConfig;
use crate::error::{AppError, Result};
use crate::storage::{BlobStore, ObjectMetadata, PutResult};

/// S3 client wrapper implementing [`BlobStore`].
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3Store {
    /// Create a new store from configuration.
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "blobdrop",
        );

        let region = Region::new(config.region.clone());

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(region)
            .credentials_provider(credentials)
            .force_path_style(true); // Required for MinIO

        if let Some(ref endpoint) = config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        let store = Self {
            client,
            bucket: config.bucket.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        };

        store.ensure_bucket_exists().await?;

        tracing::info!(bucket = %config.bucket, "S3 storage initialized");

        Ok(store)
    }

    /// Ensure the bucket exists, creating it if necessary.
    async fn ensure_bucket_exists(&self) -> Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    tracing::info!(bucket = %self.bucket, "Creating S3 bucket");
                    self.client
                        .create_bucket()
                        .bucket(&self.bucket)
                        .send()
                        .await
                        .map_err(|e| {
                            AppError::Storage(format!("Failed to create bucket: {}", e))
                        })?;
                    Ok(())
                } else {
                    Err(AppError::Storage(format!(
                        "Failed to access bucket '{}': {}",
                        self.bucket, service_error
                    )))
                }
            }
        }
    }

    fn public_url(&self, pathname: &str) -> String {
        format!(
            "{}/{}",
            self.public_base_url,
            urlencoding::encode(pathname)
        )
    }
}

#[async_trait]
impl BlobStore for S3Store {
    async fn put(&self, name: &str, data: Vec<u8>, content_type: &str) -> Result<PutResult> {
        let pathname = keyed_name(name, &random_suffix());
        let size = data.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&pathname)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to store object: {}", e)))?;

        tracing::debug!(pathname = %pathname, size = size, "Object stored");

        Ok(PutResult {
            url: self.public_url(&pathname),
            pathname,
        })
    }

    async fn head(&self, pathname: &str) -> Result<ObjectMetadata> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(pathname)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    AppError::NotFound(format!("object not found: {}", pathname))
                } else {
                    AppError::Storage(format!("Failed to head object: {}", service_error))
                }
            })?;

        Ok(ObjectMetadata {
            pathname: pathname.to_string(),
            size: response.content_length().unwrap_or(0),
            last_modified: response
                .last_modified()
                .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
            content_type: response.content_type().map(String::from),
        })
    }

    async fn delete(&self, pathname: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(pathname)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to delete object: {}", e)))?;

        Ok(())
    }
}

/// Strip any path components from a client-supplied name.
fn sanitize_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Build the object key: the sanitized name with a random suffix inserted
/// before the extension, so repeated uploads of the same filename never
/// collide.
fn keyed_name(name: &str, suffix: &str) -> String {
    let name = sanitize_name(name);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, suffix, ext),
        _ => format!("{}-{}", name, suffix),
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}
