use super::xml::collect_records;
use super::{file_name, BackupObject, StorageBackend};
use crate::config::AzureStorageConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const API_VERSION: &str = "2021-08-06";

/// Azure Blob Storage container, authorized by a shared access signature
pub struct AzureStorage {
    client: Client,
    container_url: String,
    sas: String,
    /// Blob name prefix, empty or ending in `/`
    path: String,
    access_tier: Option<String>,
}

impl AzureStorage {
    pub fn new(config: &AzureStorageConfig) -> Result<Self> {
        if config.sas_token.trim().is_empty() {
            anyhow::bail!("Azure storage requires a SAS token");
        }

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.blob.core.windows.net", config.account_name));
        let client = Client::builder()
            .timeout(Duration::from_secs(3600))
            .build()
            .context("Failed to create HTTP client")?;

        let path = config.path.trim_matches('/');
        Ok(Self {
            client,
            container_url: format!("{}/{}", endpoint.trim_end_matches('/'), config.container),
            sas: config.sas_token.trim_start_matches('?').to_string(),
            path: if path.is_empty() { String::new() } else { format!("{}/", path) },
            access_tier: config.access_tier.clone(),
        })
    }

    fn blob_url(&self, blob: &str) -> String {
        format!("{}/{}?{}", self.container_url, blob, self.sas)
    }

    fn list_page(&self, prefix: &str, marker: Option<&str>) -> Result<(Vec<BackupObject>, Option<String>)> {
        let mut query = vec![
            ("restype", "container"),
            ("comp", "list"),
            ("prefix", prefix),
        ];
        if let Some(marker) = marker {
            query.push(("marker", marker));
        }

        let url = format!("{}?{}", self.container_url, self.sas);
        let response = self
            .client
            .get(&url)
            .query(&query)
            .header("x-ms-version", API_VERSION)
            .send()
            .with_context(|| format!("Failed to list blobs in {}", self.container_url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Listing blobs in {} failed with status {}", self.container_url, status);
        }
        let body = response.text().context("Failed to read List Blobs response")?;
        parse_listing(&body)
    }
}

/// Parse one List Blobs page into its blobs and the next marker
fn parse_listing(body: &str) -> Result<(Vec<BackupObject>, Option<String>)> {
    let mut objects = Vec::new();
    for record in collect_records(body, "Blob", &["Name", "Last-Modified"])? {
        let name = record.get("Name").context("Blob without name in listing")?;
        let modified = record
            .get("Last-Modified")
            .with_context(|| format!("Missing modification time for {}", name))?;
        let modified = DateTime::parse_from_rfc2822(modified)
            .with_context(|| format!("Invalid modification time {:?} for {}", modified, name))?
            .with_timezone(&Utc);
        objects.push(BackupObject {
            key: name.clone(),
            modified,
        });
    }

    let marker = collect_records(body, "EnumerationResults", &["NextMarker"])?
        .into_iter()
        .next()
        .and_then(|record| record.get("NextMarker").cloned())
        .filter(|marker| !marker.is_empty());

    Ok((objects, marker))
}

impl StorageBackend for AzureStorage {
    fn name(&self) -> &str {
        "Azure"
    }

    fn copy(&self, file: &Path) -> Result<()> {
        let blob = format!("{}{}", self.path, file_name(file)?);
        let body = File::open(file).with_context(|| format!("Failed to open {:?}", file))?;

        let mut request = self
            .client
            .put(self.blob_url(&blob))
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", API_VERSION)
            .body(body);
        if let Some(ref tier) = self.access_tier {
            request = request.header("x-ms-access-tier", tier);
        }

        let response = request
            .send()
            .with_context(|| format!("Failed to upload blob {}", blob))?;
        if !response.status().is_success() {
            anyhow::bail!("Uploading blob {} failed with status {}", blob, response.status());
        }

        debug!("Azure: Uploaded blob {}", blob);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<BackupObject>> {
        let full_prefix = format!("{}{}", self.path, prefix);
        let mut objects = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let (page, next) = self.list_page(&full_prefix, marker.as_deref())?;
            objects.extend(page);
            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(objects)
    }

    fn remove(&self, object: &BackupObject) -> Result<()> {
        let response = self
            .client
            .delete(self.blob_url(&object.key))
            .header("x-ms-version", API_VERSION)
            .send()
            .with_context(|| format!("Failed to delete blob {}", object.key))?;

        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            status => anyhow::bail!("Deleting blob {} failed with status {}", object.key, status),
        }
    }
}
