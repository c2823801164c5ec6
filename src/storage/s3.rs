use super::{file_name, BackupObject, StorageBackend};
use crate::config::S3StorageConfig;
use anyhow::{Context, Result};
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::StorageClass;
use aws_sdk_s3::Client as S3Client;
use chrono::{TimeZone, Utc};
use std::fs;
use std::path::Path;
use tokio::runtime::Runtime;
use tracing::debug;

/// S3 compatible object storage
pub struct S3Storage {
    client: S3Client,
    runtime: Runtime,
    bucket: String,
    /// Key prefix, empty or ending in `/`
    path: String,
    storage_class: Option<String>,
}

impl S3Storage {
    pub fn new(config: &S3StorageConfig) -> Result<Self> {
        let mut builder = aws_sdk_s3::config::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let Some(ref endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if config.path_style {
            builder = builder.force_path_style(true);
        }

        let access_key_id = read_secret(&config.access_key_id, &config.access_key_id_file)
            .context("Failed to read S3 access key id")?;
        let secret_access_key = read_secret(&config.secret_access_key, &config.secret_access_key_file)
            .context("Failed to read S3 secret access key")?;
        match (access_key_id, secret_access_key) {
            (Some(key), Some(secret)) => {
                builder = builder.credentials_provider(Credentials::new(key, secret, None, None, "config"));
            }
            (None, None) => anyhow::bail!("S3 storage requires an access key id and a secret access key"),
            _ => anyhow::bail!("S3 access key id and secret access key must be given together"),
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create runtime for S3 client")?;

        Ok(Self {
            client: S3Client::from_conf(builder.build()),
            runtime,
            bucket: config.bucket.clone(),
            path: normalize_prefix(&config.path),
            storage_class: config.storage_class.clone(),
        })
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.path, name)
    }
}

/// Inline value or the trimmed content of a file
fn read_secret(value: &Option<String>, file: &Option<std::path::PathBuf>) -> Result<Option<String>> {
    match (value, file) {
        (Some(value), _) => Ok(Some(value.clone())),
        (None, Some(path)) => {
            let content = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
            Ok(Some(content.trim().to_string()))
        }
        (None, None) => Ok(None),
    }
}

fn normalize_prefix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

impl StorageBackend for S3Storage {
    fn name(&self) -> &str {
        "S3"
    }

    fn copy(&self, file: &Path) -> Result<()> {
        let key = self.key(&file_name(file)?);

        self.runtime.block_on(async {
            let body = ByteStream::from_path(file)
                .await
                .with_context(|| format!("Failed to open {:?}", file))?;

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(body)
                .set_storage_class(self.storage_class.as_deref().map(StorageClass::from))
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to upload {} to bucket {}: {}", key, self.bucket, DisplayErrorContext(e)))?;

            debug!("S3: Uploaded {} to bucket {}", key, self.bucket);
            Ok::<_, anyhow::Error>(())
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<BackupObject>> {
        let full_prefix = self.key(prefix);

        self.runtime.block_on(async {
            let mut objects = Vec::new();
            let mut continuation_token: Option<String> = None;

            loop {
                let response = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&full_prefix)
                    .set_continuation_token(continuation_token.take())
                    .send()
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to list objects in bucket {}: {}", self.bucket, DisplayErrorContext(e)))?;

                for object in response.contents() {
                    let (Some(key), Some(modified)) = (object.key(), object.last_modified()) else {
                        continue;
                    };
                    let modified = Utc
                        .timestamp_opt(modified.secs(), modified.subsec_nanos())
                        .single()
                        .with_context(|| format!("Invalid modification time for {}", key))?;
                    objects.push(BackupObject {
                        key: key.to_string(),
                        modified,
                    });
                }

                match response.next_continuation_token() {
                    Some(token) if response.is_truncated().unwrap_or(false) => {
                        continuation_token = Some(token.to_string());
                    }
                    _ => break,
                }
            }

            Ok::<_, anyhow::Error>(objects)
        })
    }

    fn remove(&self, object: &BackupObject) -> Result<()> {
        self.runtime.block_on(async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&object.key)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to delete {}: {}", object.key, DisplayErrorContext(e)))?;
            Ok::<_, anyhow::Error>(())
        })
    }
}
