//! Storage backends the backup archive is copied to
//!
//! Every configured destination becomes one [`StorageBackend`] built by
//! [`build_backends`]. The driver only ever sees the trait objects and fans
//! copy and prune work out to all of them with [`copy_to_all`] and
//! [`prune_all`].

mod azure;
mod dropbox;
mod google_drive;
mod local;
mod s3;
mod ssh;
mod webdav;
mod xml;

pub use azure::AzureStorage;
pub use dropbox::DropboxStorage;
pub use google_drive::GoogleDriveStorage;
pub use local::LocalStorage;
pub use s3::S3Storage;
pub use ssh::SshStorage;
pub use webdav::WebDavStorage;

use crate::config::StorageConfig;
use crate::error::{BackupError, ErrorList};
use crate::managers::stats::{PruneStats, SharedStats};
use crate::utils::executor::CommandExecutor;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

/// A stored backup as seen by a backend listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupObject {
    /// Backend specific identifier used for removal
    pub key: String,
    pub modified: DateTime<Utc>,
}

/// Pruning failed, possibly after some objects were already removed
#[derive(Debug)]
pub struct PruneFailure {
    pub stats: PruneStats,
    pub error: anyhow::Error,
}

impl fmt::Display for PruneFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

impl From<anyhow::Error> for PruneFailure {
    fn from(error: anyhow::Error) -> Self {
        Self {
            stats: PruneStats::default(),
            error,
        }
    }
}

/// A destination for backup archives
pub trait StorageBackend: Send + Sync {
    /// Display name, also the key in `Stats.storages`
    fn name(&self) -> &str;

    /// Copy the archive at `file` to the backend, keeping its file name
    fn copy(&self, file: &Path) -> Result<()>;

    /// Backups whose name starts with `prefix`
    fn list(&self, prefix: &str) -> Result<Vec<BackupObject>>;

    fn remove(&self, object: &BackupObject) -> Result<()>;

    /// Remove backups matching `prefix` that were last modified before `deadline`
    fn prune(&self, deadline: DateTime<Utc>, prefix: &str) -> Result<PruneStats, PruneFailure> {
        let candidates = self
            .list(prefix)
            .with_context(|| format!("Failed to list existing backups on {}", self.name()))?;
        prune_objects(self.name(), candidates, deadline, |object| self.remove(object))
    }
}

/// Delete the candidates older than `deadline`, unless that would delete all of them
pub fn prune_objects<F>(
    backend: &str,
    candidates: Vec<BackupObject>,
    deadline: DateTime<Utc>,
    mut remove: F,
) -> Result<PruneStats, PruneFailure>
where
    F: FnMut(&BackupObject) -> Result<()>,
{
    let total = candidates.len();
    let matches: Vec<BackupObject> = candidates
        .into_iter()
        .filter(|object| object.modified < deadline)
        .collect();

    let mut stats = PruneStats {
        total,
        pruned: 0,
        prune_errors: 0,
    };

    if matches.is_empty() {
        info!(
            "{}: None of {} existing backups were pruned",
            backend, total
        );
        return Ok(stats);
    }

    if matches.len() == total {
        warn!(
            "{}: Refusing to prune all {} existing backups, as they were all older than the deadline of {}",
            backend,
            total,
            deadline.to_rfc3339()
        );
        warn!(
            "{}: This is probably caused by a pruning prefix matching unrelated files or a misconfigured retention period",
            backend
        );
        return Ok(stats);
    }

    let mut errors = ErrorList::new();
    for object in &matches {
        if let Err(e) = remove(object) {
            errors.push(e.context(format!("Failed to remove {}", object.key)));
        }
    }

    stats.prune_errors = errors.len();
    stats.pruned = matches.len() - errors.len();

    info!(
        "{}: Pruned {} out of {} backups as they were older than the given deadline of {}",
        backend,
        stats.pruned,
        total,
        deadline.to_rfc3339()
    );

    if errors.is_empty() {
        Ok(stats)
    } else {
        Err(PruneFailure {
            stats,
            error: anyhow::anyhow!("{} removal(s) failed: {}", errors.len(), errors),
        })
    }
}

/// Copy `file` to every backend concurrently
///
/// All copies run to completion; failures are joined afterwards.
pub fn copy_to_all(backends: &[Box<dyn StorageBackend>], file: &Path) -> Result<(), BackupError> {
    let outcomes: Vec<Result<()>> = thread::scope(|scope| {
        let handles: Vec<_> = backends
            .iter()
            .map(|backend| {
                scope.spawn(move || {
                    backend
                        .copy(file)
                        .with_context(|| format!("{}: Failed to copy backup", backend.name()))
                })
            })
            .collect();
        handles
            .into_iter()
            .zip(backends)
            .map(|(handle, backend)| {
                handle.join().unwrap_or_else(|_| {
                    Err(anyhow::anyhow!("{}: copy thread panicked", backend.name()))
                })
            })
            .collect()
    });

    let mut errors = ErrorList::new();
    for (outcome, backend) in outcomes.into_iter().zip(backends) {
        match outcome {
            Ok(()) => info!("{}: Uploaded a copy of the backup", backend.name()),
            Err(e) => errors.push(e),
        }
    }
    errors.into_result(BackupError::BackendCopyFailed)
}

/// Prune every backend not named in `skip` concurrently
///
/// Each backend's result lands in `Stats.storages`, also when it failed.
pub fn prune_all(
    backends: &[Box<dyn StorageBackend>],
    deadline: DateTime<Utc>,
    prefix: &str,
    skip: &[String],
    stats: &SharedStats,
) -> Result<(), BackupError> {
    let selected: Vec<&dyn StorageBackend> = backends
        .iter()
        .map(|backend| backend.as_ref())
        .filter(|backend| {
            let skipped = skip.iter().any(|name| name.eq_ignore_ascii_case(backend.name()));
            if skipped {
                info!("{}: Skipping pruning as configured", backend.name());
            }
            !skipped
        })
        .collect();

    let outcomes: Vec<Result<PruneStats, PruneFailure>> = thread::scope(|scope| {
        let handles: Vec<_> = selected
            .iter()
            .map(|backend| scope.spawn(move || backend.prune(deadline, prefix)))
            .collect();
        handles
            .into_iter()
            .zip(&selected)
            .map(|(handle, backend)| {
                handle.join().unwrap_or_else(|_| {
                    Err(anyhow::anyhow!("{}: prune thread panicked", backend.name()).into())
                })
            })
            .collect()
    });

    let mut errors = ErrorList::new();
    for (outcome, backend) in outcomes.into_iter().zip(&selected) {
        let prune_stats = match outcome {
            Ok(prune_stats) => prune_stats,
            Err(failure) => {
                errors.push(
                    failure
                        .error
                        .context(format!("{}: Failed to prune backups", backend.name())),
                );
                failure.stats
            }
        };
        stats.lock().storages.insert(backend.name().to_string(), prune_stats);
    }
    errors.into_result(BackupError::BackendPruneFailed)
}

/// Build one backend per configured storage section
pub fn build_backends(
    config: &StorageConfig,
    executor: Arc<dyn CommandExecutor>,
) -> Result<Vec<Box<dyn StorageBackend>>> {
    let mut backends: Vec<Box<dyn StorageBackend>> = Vec::new();

    if let Some(ref local) = config.local {
        backends.push(Box::new(LocalStorage::new(local)));
    }
    if let Some(ref s3) = config.s3 {
        backends.push(Box::new(S3Storage::new(s3).context("Failed to set up S3 storage")?));
    }
    if let Some(ref webdav) = config.webdav {
        backends.push(Box::new(
            WebDavStorage::new(webdav).context("Failed to set up WebDAV storage")?,
        ));
    }
    if let Some(ref ssh) = config.ssh {
        backends.push(Box::new(SshStorage::new(ssh, Arc::clone(&executor))));
    }
    if let Some(ref azure) = config.azure {
        backends.push(Box::new(
            AzureStorage::new(azure).context("Failed to set up Azure storage")?,
        ));
    }
    if let Some(ref dropbox) = config.dropbox {
        backends.push(Box::new(
            DropboxStorage::new(dropbox).context("Failed to set up Dropbox storage")?,
        ));
    }
    if let Some(ref drive) = config.google_drive {
        backends.push(Box::new(
            GoogleDriveStorage::new(drive).context("Failed to set up Google Drive storage")?,
        ));
    }

    Ok(backends)
}

/// Path of `file` as a UTF-8 file name
pub(crate) fn file_name(file: &Path) -> Result<String> {
    file.file_name()
        .and_then(|name| name.to_str())
        .map(String::from)
        .with_context(|| format!("Invalid backup file name {:?}", file))
}

/// Recording backend for tests
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory backend with failure injection
    #[derive(Clone)]
    pub struct MockStorage {
        name: String,
        objects: Arc<Mutex<BTreeMap<String, DateTime<Utc>>>>,
        copied: Arc<Mutex<Vec<String>>>,
        fail_copy: bool,
        fail_list: bool,
        fail_remove: Vec<String>,
    }

    impl MockStorage {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                objects: Arc::new(Mutex::new(BTreeMap::new())),
                copied: Arc::new(Mutex::new(Vec::new())),
                fail_copy: false,
                fail_list: false,
                fail_remove: Vec::new(),
            }
        }

        pub fn with_object(self, key: &str, modified: DateTime<Utc>) -> Self {
            self.objects.lock().unwrap().insert(key.to_string(), modified);
            self
        }

        pub fn with_failing_copy(mut self) -> Self {
            self.fail_copy = true;
            self
        }

        pub fn with_failing_list(mut self) -> Self {
            self.fail_list = true;
            self
        }

        pub fn with_failing_remove(mut self, key: &str) -> Self {
            self.fail_remove.push(key.to_string());
            self
        }

        pub fn keys(&self) -> Vec<String> {
            self.objects.lock().unwrap().keys().cloned().collect()
        }

        /// File names passed to `copy`, including failed attempts
        pub fn copied(&self) -> Vec<String> {
            self.copied.lock().unwrap().clone()
        }
    }

    impl StorageBackend for MockStorage {
        fn name(&self) -> &str {
            &self.name
        }

        fn copy(&self, file: &Path) -> Result<()> {
            let name = file_name(file)?;
            self.copied.lock().unwrap().push(name.clone());
            if self.fail_copy {
                anyhow::bail!("Mock copy failure");
            }
            self.objects.lock().unwrap().insert(name, Utc::now());
            Ok(())
        }

        fn list(&self, prefix: &str) -> Result<Vec<BackupObject>> {
            if self.fail_list {
                anyhow::bail!("Mock list failure");
            }
            Ok(self
                .objects
                .lock()
                .unwrap()
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(key, modified)| BackupObject {
                    key: key.clone(),
                    modified: *modified,
                })
                .collect())
        }

        fn remove(&self, object: &BackupObject) -> Result<()> {
            if self.fail_remove.contains(&object.key) {
                anyhow::bail!("Mock remove failure");
            }
            self.objects.lock().unwrap().remove(&object.key);
            Ok(())
        }
    }
}
