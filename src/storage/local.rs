use super::{file_name, BackupObject, StorageBackend};
use crate::config::LocalStorageConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Copies backups into a directory on the host
pub struct LocalStorage {
    archive: PathBuf,
    latest_symlink: Option<String>,
}

impl LocalStorage {
    pub fn new(config: &LocalStorageConfig) -> Self {
        Self {
            archive: config.archive.clone(),
            latest_symlink: config.latest_symlink.clone(),
        }
    }

    fn update_latest_symlink(&self, link_name: &str, target: &str) -> Result<()> {
        let link = self.archive.join(link_name);
        if link.symlink_metadata().is_ok() {
            fs::remove_file(&link)
                .with_context(|| format!("Failed to remove existing symlink {:?}", link))?;
        }
        symlink(target, &link)
            .with_context(|| format!("Failed to create symlink {:?} to {}", link, target))?;
        info!("Local: Created/Updated symlink {} for latest backup", link_name);
        Ok(())
    }
}

#[cfg(unix)]
fn symlink(target: &str, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &str, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks are only supported on unix",
    ))
}

impl StorageBackend for LocalStorage {
    fn name(&self) -> &str {
        "Local"
    }

    fn copy(&self, file: &Path) -> Result<()> {
        let name = file_name(file)?;
        let target = self.archive.join(&name);

        fs::create_dir_all(&self.archive)
            .with_context(|| format!("Failed to create archive directory {:?}", self.archive))?;
        fs::copy(file, &target)
            .with_context(|| format!("Failed to copy {:?} to {:?}", file, target))?;
        debug!("Local: Copied {:?} to {:?}", file, target);

        if let Some(ref link_name) = self.latest_symlink {
            self.update_latest_symlink(link_name, &name)?;
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<BackupObject>> {
        let entries = fs::read_dir(&self.archive)
            .with_context(|| format!("Failed to read archive directory {:?}", self.archive))?;

        let mut objects = Vec::new();
        for entry in entries {
            let entry = entry.context("Failed to read directory entry")?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(prefix) {
                continue;
            }

            // symlink_metadata so the latest-backup link is never a candidate
            let metadata = entry
                .path()
                .symlink_metadata()
                .with_context(|| format!("Failed to stat {:?}", entry.path()))?;
            if !metadata.is_file() {
                continue;
            }

            let modified: DateTime<Utc> = metadata
                .modified()
                .with_context(|| format!("Failed to read modification time of {:?}", entry.path()))?
                .into();
            objects.push(BackupObject { key: name, modified });
        }
        Ok(objects)
    }

    fn remove(&self, object: &BackupObject) -> Result<()> {
        let path = self.archive.join(&object.key);
        fs::remove_file(&path).with_context(|| format!("Failed to remove {:?}", path))
    }
}
