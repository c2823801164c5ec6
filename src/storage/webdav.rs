use super::xml::collect_records;
use super::{file_name, BackupObject, StorageBackend};
use crate::config::WebDavStorageConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{Method, StatusCode};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:getlastmodified/><d:resourcetype/></d:prop></d:propfind>"#;

/// WebDAV server such as Nextcloud
pub struct WebDavStorage {
    client: Client,
    /// Collection URL, always ending in `/`
    base: String,
    username: Option<String>,
    password: Option<String>,
}

impl WebDavStorage {
    pub fn new(config: &WebDavStorageConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(3600))
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base: collection_url(&config.url, &config.path),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.client.request(method, url);
        match self.username {
            Some(ref username) => request.basic_auth(username, self.password.as_ref()),
            None => request,
        }
    }

    fn ensure_collection(&self) -> Result<()> {
        let mkcol = Method::from_bytes(b"MKCOL").context("Invalid method")?;
        let response = self
            .request(mkcol, &self.base)
            .send()
            .with_context(|| format!("Failed to create collection {}", self.base))?;

        // 405 means the collection already exists
        match response.status() {
            status if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            status => anyhow::bail!("Creating collection {} failed with status {}", self.base, status),
        }
    }
}

fn collection_url(url: &str, path: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        format!("{}/", url.trim_end_matches('/'))
    } else {
        format!("{}/{}/", url.trim_end_matches('/'), path)
    }
}

/// Parse a PROPFIND multistatus body into the files it lists
fn parse_listing(body: &str, prefix: &str) -> Result<Vec<BackupObject>> {
    let records = collect_records(body, "response", &["href", "getlastmodified", "collection"])?;

    let mut objects = Vec::new();
    for record in records {
        if record.contains_key("collection") {
            continue;
        }
        let Some(href) = record.get("href") else {
            continue;
        };
        let name = href.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
        if name.is_empty() || !name.starts_with(prefix) {
            continue;
        }

        let modified = record
            .get("getlastmodified")
            .with_context(|| format!("Missing modification time for {}", name))?;
        let modified = DateTime::parse_from_rfc2822(modified)
            .with_context(|| format!("Invalid modification time {:?} for {}", modified, name))?
            .with_timezone(&Utc);

        objects.push(BackupObject {
            key: name.to_string(),
            modified,
        });
    }
    Ok(objects)
}

impl StorageBackend for WebDavStorage {
    fn name(&self) -> &str {
        "WebDAV"
    }

    fn copy(&self, file: &Path) -> Result<()> {
        self.ensure_collection()?;

        let name = file_name(file)?;
        let url = format!("{}{}", self.base, name);
        let body = File::open(file).with_context(|| format!("Failed to open {:?}", file))?;

        let response = self
            .request(Method::PUT, &url)
            .body(body)
            .send()
            .with_context(|| format!("Failed to upload {}", url))?;
        if !response.status().is_success() {
            anyhow::bail!("Uploading {} failed with status {}", url, response.status());
        }

        debug!("WebDAV: Uploaded {}", url);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<BackupObject>> {
        let propfind = Method::from_bytes(b"PROPFIND").context("Invalid method")?;
        let response = self
            .request(propfind, &self.base)
            .header("Depth", "1")
            .header("Content-Type", "application/xml")
            .body(PROPFIND_BODY)
            .send()
            .with_context(|| format!("Failed to list {}", self.base))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Listing {} failed with status {}", self.base, status);
        }

        let body = response.text().context("Failed to read PROPFIND response")?;
        parse_listing(&body, prefix)
    }

    fn remove(&self, object: &BackupObject) -> Result<()> {
        let url = format!("{}{}", self.base, object.key);
        let response = self
            .request(Method::DELETE, &url)
            .send()
            .with_context(|| format!("Failed to delete {}", url))?;

        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            status => anyhow::bail!("Deleting {} failed with status {}", url, status),
        }
    }
}
