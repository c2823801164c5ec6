use super::{file_name, BackupObject, StorageBackend};
use crate::config::DropboxStorageConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const API_URL: &str = "https://api.dropboxapi.com";
const CONTENT_URL: &str = "https://content.dropboxapi.com";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ListFolderResponse {
    entries: Vec<Entry>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(rename = ".tag")]
    tag: String,
    name: String,
    path_display: Option<String>,
    server_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SessionStart {
    session_id: String,
}

/// Dropbox folder accessed through the HTTP API
///
/// A short lived access token is exchanged from the refresh token on first
/// use. Files larger than one chunk are uploaded through an upload session.
pub struct DropboxStorage {
    client: Client,
    refresh_token: String,
    app_key: String,
    app_secret: String,
    /// Folder path, empty for the app root or starting with `/`
    remote_path: String,
    chunk_size: u64,
    access_token: Mutex<Option<String>>,
}

impl DropboxStorage {
    pub fn new(config: &DropboxStorageConfig) -> Result<Self> {
        if config.chunk_size_mb == 0 || config.chunk_size_mb > 150 {
            anyhow::bail!(
                "Dropbox chunk size must be between 1 and 150 MB, got {}",
                config.chunk_size_mb
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(3600))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            refresh_token: config.refresh_token.clone(),
            app_key: config.app_key.clone(),
            app_secret: config.app_secret.clone(),
            remote_path: folder_path(&config.remote_path),
            chunk_size: config.chunk_size_mb * 1024 * 1024,
            access_token: Mutex::new(None),
        })
    }

    fn token(&self) -> Result<String> {
        let mut cached = self.access_token.lock();
        if let Some(ref token) = *cached {
            return Ok(token.clone());
        }

        let response = self
            .client
            .post(format!("{}/oauth2/token", API_URL))
            .basic_auth(&self.app_key, Some(&self.app_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .context("Failed to request Dropbox access token")?;
        let token: TokenResponse = check(response, "token refresh")?
            .json()
            .context("Invalid Dropbox token response")?;

        *cached = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    fn rpc(&self, endpoint: &str, body: Value) -> Result<Response> {
        let response = self
            .client
            .post(format!("{}/2/{}", API_URL, endpoint))
            .bearer_auth(self.token()?)
            .json(&body)
            .send()
            .with_context(|| format!("Dropbox request {} failed", endpoint))?;
        check(response, endpoint)
    }

    fn content(&self, endpoint: &str, arg: Value, data: Vec<u8>) -> Result<Response> {
        let response = self
            .client
            .post(format!("{}/2/{}", CONTENT_URL, endpoint))
            .bearer_auth(self.token()?)
            .header("Dropbox-API-Arg", arg.to_string())
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .with_context(|| format!("Dropbox request {} failed", endpoint))?;
        check(response, endpoint)
    }

    fn upload_session(&self, mut file: File, size: u64, target: &str) -> Result<()> {
        let mut chunk = vec![0u8; self.chunk_size as usize];

        let read = read_chunk(&mut file, &mut chunk)?;
        let session: SessionStart = self
            .content("files/upload_session/start", json!({ "close": false }), chunk[..read].to_vec())?
            .json()
            .context("Invalid upload session response")?;
        let mut offset = read as u64;

        while size - offset > self.chunk_size {
            let read = read_chunk(&mut file, &mut chunk)?;
            self.content(
                "files/upload_session/append_v2",
                json!({ "cursor": { "session_id": session.session_id, "offset": offset }, "close": false }),
                chunk[..read].to_vec(),
            )?;
            offset += read as u64;
            debug!("Dropbox: Uploaded {} of {} bytes", offset, size);
        }

        let read = read_chunk(&mut file, &mut chunk)?;
        self.content(
            "files/upload_session/finish",
            json!({
                "cursor": { "session_id": session.session_id, "offset": offset },
                "commit": { "path": target, "mode": "overwrite", "mute": true },
            }),
            chunk[..read].to_vec(),
        )?;
        Ok(())
    }
}

fn folder_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// Fill as much of `buffer` as the file allows
fn read_chunk(file: &mut File, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = file.read(&mut buffer[filled..]).context("Failed to read backup file")?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

fn check(response: Response, operation: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    anyhow::bail!("Dropbox {} failed with status {}: {}", operation, status, body.trim())
}

fn files_with_prefix(entries: Vec<Entry>, prefix: &str) -> Vec<BackupObject> {
    entries
        .into_iter()
        .filter(|entry| entry.tag == "file" && entry.name.starts_with(prefix))
        .filter_map(|entry| {
            let modified = entry.server_modified?;
            Some(BackupObject {
                key: entry.path_display.unwrap_or(entry.name),
                modified,
            })
        })
        .collect()
}

impl StorageBackend for DropboxStorage {
    fn name(&self) -> &str {
        "Dropbox"
    }

    fn copy(&self, file: &Path) -> Result<()> {
        let target = format!("{}/{}", self.remote_path, file_name(file)?);
        let handle = File::open(file).with_context(|| format!("Failed to open {:?}", file))?;
        let size = handle
            .metadata()
            .with_context(|| format!("Failed to stat {:?}", file))?
            .len();

        if size <= self.chunk_size {
            let mut data = Vec::with_capacity(size as usize);
            let mut handle = handle;
            handle
                .read_to_end(&mut data)
                .with_context(|| format!("Failed to read {:?}", file))?;
            self.content(
                "files/upload",
                json!({ "path": target, "mode": "overwrite", "mute": true }),
                data,
            )?;
        } else {
            self.upload_session(handle, size, &target)?;
        }

        debug!("Dropbox: Uploaded {}", target);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<BackupObject>> {
        let mut page: ListFolderResponse = self
            .rpc("files/list_folder", json!({ "path": self.remote_path }))?
            .json()
            .context("Invalid list_folder response")?;

        let mut objects = Vec::new();
        loop {
            objects.extend(files_with_prefix(page.entries, prefix));
            if !page.has_more {
                break;
            }
            page = self
                .rpc("files/list_folder/continue", json!({ "cursor": page.cursor }))?
                .json()
                .context("Invalid list_folder/continue response")?;
        }
        Ok(objects)
    }

    fn remove(&self, object: &BackupObject) -> Result<()> {
        self.rpc("files/delete_v2", json!({ "path": object.key }))?;
        Ok(())
    }
}
