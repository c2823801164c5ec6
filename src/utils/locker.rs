//! File-based locking to prevent concurrent backup runs

use crate::error::BackupError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default interval between two lock attempts
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Exclusive run lock on a local file
pub struct RunLock {
    path: PathBuf,
    retry_interval: Duration,
    encountered_lock: bool,
    waited: Duration,
}

impl RunLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retry_interval: LOCK_RETRY_INTERVAL,
            encountered_lock: false,
            waited: Duration::ZERO,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Acquire the lock, retrying until `timeout` has elapsed
    ///
    /// One last attempt is made once the deadline is reached, so a held lock
    /// fails this call after at least `timeout` and at most `timeout` plus one
    /// retry interval.
    pub fn acquire(&mut self, timeout: Duration) -> Result<RunLockGuard, BackupError> {
        let start = Instant::now();
        let result = self.acquire_until(start + timeout, timeout);
        self.waited = start.elapsed();
        result
    }

    fn acquire_until(
        &mut self,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<RunLockGuard, BackupError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        let mut lock = RwLock::new(file);

        loop {
            debug!("Attempting to acquire lock: {:?}", self.path);

            let acquired = match lock.try_write() {
                Ok(guard) => {
                    // The lock lives as long as the descriptor; closing the
                    // file in RunLockGuard releases it.
                    std::mem::forget(guard);
                    true
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => false,
                Err(source) => return Err(self.io_error(source)),
            };

            if acquired {
                if self.encountered_lock {
                    info!("Acquired exclusive lock on subsequent attempt, ready to start");
                }
                return Ok(RunLockGuard {
                    lock: Some(lock),
                    path: self.path.clone(),
                });
            }

            if !self.encountered_lock {
                info!(
                    "Exclusive lock was not available on first attempt, will retry every {:?} for up to {:?}",
                    self.retry_interval, timeout
                );
                self.encountered_lock = true;
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(BackupError::LockTimeout(timeout));
            }
            thread::sleep(self.retry_interval.min(deadline - now));
        }
    }

    fn io_error(&self, source: std::io::Error) -> BackupError {
        BackupError::LockIo {
            path: self.path.clone(),
            source,
        }
    }

    /// Whether any attempt found the lock held by someone else
    pub fn encountered_lock(&self) -> bool {
        self.encountered_lock
    }

    /// Time spent in the last call to [`RunLock::acquire`]
    pub fn waited(&self) -> Duration {
        self.waited
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Held run lock; released by [`RunLockGuard::release`] or on drop
pub struct RunLockGuard {
    lock: Option<RwLock<File>>,
    path: PathBuf,
}

impl RunLockGuard {
    /// Release the lock
    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if let Some(lock) = self.lock.take() {
            drop(lock);
            info!("Released backup lock: {:?}", self.path);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.unlock();
    }
}
