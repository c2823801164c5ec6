use super::{file_name, BackupObject, StorageBackend};
use crate::config::GoogleDriveStorageConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, Response};
use reqwest::header::LOCATION;
use serde::Deserialize;
use serde_json::json;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    modified_time: DateTime<Utc>,
}

/// Google Drive folder
///
/// Objects are keyed by Drive file id since names are not unique there.
pub struct GoogleDriveStorage {
    client: Client,
    endpoint: String,
    folder_id: String,
    token_file: PathBuf,
}

impl GoogleDriveStorage {
    pub fn new(config: &GoogleDriveStorageConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(3600))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: config
                .endpoint
                .as_deref()
                .unwrap_or(DEFAULT_ENDPOINT)
                .trim_end_matches('/')
                .to_string(),
            folder_id: config.folder_id.clone(),
            token_file: config.access_token_file.clone(),
        })
    }

    /// Re-read on every call so an external refresher can rotate the token
    fn token(&self) -> Result<String> {
        let token = fs::read_to_string(&self.token_file)
            .with_context(|| format!("Failed to read access token from {:?}", self.token_file))?;
        let token = token.trim();
        if token.is_empty() {
            anyhow::bail!("Access token file {:?} is empty", self.token_file);
        }
        Ok(token.to_string())
    }
}

fn check(response: Response, operation: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    anyhow::bail!("Google Drive {} failed with status {}: {}", operation, status, body.trim())
}

fn list_query(folder_id: &str, prefix: &str) -> String {
    let escape = |value: &str| value.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "'{}' in parents and name contains '{}' and trashed = false",
        escape(folder_id),
        escape(prefix)
    )
}

impl StorageBackend for GoogleDriveStorage {
    fn name(&self) -> &str {
        "GoogleDrive"
    }

    fn copy(&self, file: &Path) -> Result<()> {
        let name = file_name(file)?;
        let token = self.token()?;

        let response = self
            .client
            .post(format!("{}/upload/drive/v3/files", self.endpoint))
            .query(&[("uploadType", "resumable"), ("supportsAllDrives", "true")])
            .bearer_auth(&token)
            .json(&json!({ "name": name, "parents": [self.folder_id] }))
            .send()
            .context("Failed to start Google Drive upload")?;
        let response = check(response, "upload start")?;
        let session = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .context("Google Drive did not return an upload session")?
            .to_string();

        let body = File::open(file).with_context(|| format!("Failed to open {:?}", file))?;
        let response = self
            .client
            .put(&session)
            .bearer_auth(&token)
            .body(body)
            .send()
            .with_context(|| format!("Failed to upload {}", name))?;
        check(response, "upload")?;

        debug!("GoogleDrive: Uploaded {} to folder {}", name, self.folder_id);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<BackupObject>> {
        let token = self.token()?;
        let query = list_query(&self.folder_id, prefix);
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", query.as_str()),
                ("fields", "nextPageToken, files(id, name, modifiedTime)"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ];
            if let Some(ref page) = page_token {
                params.push(("pageToken", page.as_str()));
            }

            let response = self
                .client
                .get(format!("{}/drive/v3/files", self.endpoint))
                .query(&params)
                .bearer_auth(&token)
                .send()
                .context("Failed to list Google Drive files")?;
            let list: FileList = check(response, "list")?
                .json()
                .context("Invalid Google Drive file list")?;

            // `contains` matches on word prefixes, so filter exactly here
            objects.extend(
                list.files
                    .into_iter()
                    .filter(|file| file.name.starts_with(prefix))
                    .map(|file| BackupObject {
                        key: file.id,
                        modified: file.modified_time,
                    }),
            );

            match list.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(objects)
    }

    fn remove(&self, object: &BackupObject) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/drive/v3/files/{}", self.endpoint, object.key))
            .query(&[("supportsAllDrives", "true")])
            .bearer_auth(self.token()?)
            .send()
            .with_context(|| format!("Failed to delete file {}", object.key))?;
        check(response, "delete")?;
        Ok(())
    }
}
