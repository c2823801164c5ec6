//! Error taxonomy for a backup run
//!
//! Aggregating operations (stopping workloads, restoring them, copying,
//! pruning, running hooks) never short-circuit. They collect every failure
//! into an [`ErrorList`] and report it through one [`BackupError`] variant.

use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A list of errors that are reported together
#[derive(Debug, Default)]
pub struct ErrorList(pub Vec<anyhow::Error>);

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: impl Into<anyhow::Error>) {
        self.0.push(error.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &anyhow::Error> {
        self.0.iter()
    }

    /// Turn the list into `Err(wrap(list))` unless it is empty
    pub fn into_result(self, wrap: impl FnOnce(ErrorList) -> BackupError) -> Result<(), BackupError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(wrap(self))
        }
    }
}

impl From<Vec<anyhow::Error>> for ErrorList {
    fn from(errors: Vec<anyhow::Error>) -> Self {
        Self(errors)
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{:#}", error)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("timed out after {0:?} waiting for the lock file to become available")]
    LockTimeout(Duration),

    #[error("error trying to lock {path:?}: {source}")]
    LockIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error querying the container runtime: {0:#}")]
    RuntimeQuery(anyhow::Error),

    #[error("{} error(s) stopping containers and services: {}", .0.len(), .0)]
    StopFailed(ErrorList),

    #[error("container {container} is labeled to stop but has parent service {service} which is also labeled, cannot continue")]
    ConflictingLabels { container: String, service: String },

    #[error("timed out after waiting {timeout:?} for service {service} to reach desired container count of {count}")]
    ConvergenceTimeout {
        service: String,
        count: usize,
        timeout: Duration,
    },

    #[error("{} error(s) restoring containers and services: {}", .0.len(), .0)]
    RestoreFailed(ErrorList),

    #[error("{} storage backend(s) failed to copy the backup: {}", .0.len(), .0)]
    BackendCopyFailed(ErrorList),

    #[error("{} storage backend(s) failed to prune backups: {}", .0.len(), .0)]
    BackendPruneFailed(ErrorList),

    #[error("{} hook(s) failed: {}", .0.len(), .0)]
    HookFailed(ErrorList),

    #[error("unexpected panic running the backup: {0}")]
    Panicked(String),
}

/// Text of a panic payload caught with `catch_unwind`
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
