//! Backup manager - orchestrates one backup run
//!
//! A run takes the lock, stops the labeled workloads, archives the sources,
//! brings the workloads back, then encrypts, copies and prunes. Hooks run
//! once at the very end with whatever error the run ended in.

use crate::config::{self, Config};
use crate::error::{panic_message, BackupError};
use crate::managers::commands::{LabeledCommands, Phase};
use crate::managers::hooks::{HookLevel, Hooks};
use crate::managers::logging::LogBuffer;
use crate::managers::notification::{NotificationManager, Notifier};
use crate::managers::stats::{BackupFileStats, SharedStats, Stats};
use crate::managers::workloads::{WorkloadController, CONVERGENCE_POLL_INTERVAL};
use crate::storage::{self, StorageBackend};
use crate::utils::archive::{encrypt_with_gpg, Archiver, TarArchiver};
use crate::utils::docker_ops::{ContainerRuntime, RealDockerOps};
use crate::utils::executor::{CommandExecutor, RealExecutor};
use crate::utils::locker::{RunLock, LOCK_RETRY_INTERVAL};
use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Collaborators of a run, injectable for tests
pub struct BackupDependencies {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub backends: Vec<Box<dyn StorageBackend>>,
    pub archiver: Arc<dyn Archiver>,
    pub notifier: Option<Arc<dyn Notifier>>,
    /// Runs `gpg` when encryption is configured
    pub executor: Arc<dyn CommandExecutor>,
}

impl BackupDependencies {
    /// Real docker CLI, configured storage backends and Discord notifications
    pub fn from_config(config: &Config) -> Result<Self> {
        let executor: Arc<dyn CommandExecutor> = Arc::new(RealExecutor::new());
        let backends = storage::build_backends(&config.storage, Arc::clone(&executor))?;

        let notifications = NotificationManager::new(config.notifications.clone());
        let notifier: Option<Arc<dyn Notifier>> = if notifications.is_enabled() {
            Some(Arc::new(notifications))
        } else {
            None
        };

        Ok(Self {
            runtime: Arc::new(RealDockerOps::with_executor(Arc::clone(&executor))),
            backends,
            archiver: Arc::new(TarArchiver::new()),
            notifier,
            executor,
        })
    }
}

pub struct BackupManager {
    config: Config,
    deps: BackupDependencies,
    log_capture: Option<LogBuffer>,
    lock_retry_interval: Duration,
    poll_interval: Duration,
}

impl BackupManager {
    pub fn new(config: Config, deps: BackupDependencies) -> Self {
        Self {
            config,
            deps,
            log_capture: None,
            lock_retry_interval: LOCK_RETRY_INTERVAL,
            poll_interval: CONVERGENCE_POLL_INTERVAL,
        }
    }

    /// Attach log output captured during the run to the stats
    pub fn with_log_capture(mut self, capture: LogBuffer) -> Self {
        self.log_capture = Some(capture);
        self
    }

    pub fn with_lock_retry_interval(mut self, interval: Duration) -> Self {
        self.lock_retry_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run one backup
    pub fn run(&self) -> Result<()> {
        self.run_with_stats().1
    }

    /// Run one backup and hand back the stats it collected
    pub fn run_with_stats(&self) -> (Stats, Result<()>) {
        let stats = Stats::shared();
        let result = self.execute(&stats);
        let snapshot = stats.lock().clone();
        (snapshot, result)
    }

    fn execute(&self, stats: &SharedStats) -> Result<()> {
        let threshold: HookLevel = self
            .config
            .notifications
            .level
            .parse()
            .map_err(anyhow::Error::msg)?;

        let start = Local::now();
        stats.lock().start(start.with_timezone(&Utc));
        if let Some(ref capture) = self.log_capture {
            capture.clear();
        }

        let backup = &self.config.backup;
        let mut lock = RunLock::new(&backup.lock_file).with_retry_interval(self.lock_retry_interval);
        let acquired = lock.acquire(Duration::from_secs(backup.lock_timeout_seconds));
        stats.lock().locked_time = lock.waited();
        let guard = acquired?;

        let mut hooks = Hooks::new(threshold);
        self.register_hooks(&mut hooks, stats);

        let script_result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_phases(start, stats, &mut hooks)
        }))
        .unwrap_or_else(|payload| {
            error!("Recovered from a panic while running the backup");
            Err(BackupError::Panicked(panic_message(payload.as_ref())).into())
        });

        let hook_result = hooks.run_all(script_result.as_ref().err());
        let outcome = match (script_result, hook_result) {
            (Ok(()), Ok(())) => {
                info!("Finished running backup tasks");
                Ok(())
            }
            (Ok(()), Err(hook_err)) => {
                Err(anyhow::Error::new(hook_err).context("An error occurred calling the registered hooks"))
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(hook_err)) => Err(e.context(format!(
                "calling the registered hooks failed as well: {}",
                hook_err
            ))),
        };

        guard.release();
        outcome
    }

    fn register_hooks(&self, hooks: &mut Hooks, stats: &SharedStats) {
        let finish_stats = Arc::clone(stats);
        let capture = self.log_capture.clone();
        hooks.register(HookLevel::Plumbing, move |_| {
            let mut stats = finish_stats.lock();
            stats.finish(Utc::now());
            if let Some(capture) = capture {
                stats.log_output = capture.contents();
            }
            Ok(())
        });

        let Some(ref notifier) = self.deps.notifier else {
            return;
        };

        let failure_notifier = Arc::clone(notifier);
        let failure_stats = Arc::clone(stats);
        hooks.register(HookLevel::Error, move |err| {
            let Some(err) = err else {
                return Ok(());
            };
            let snapshot = failure_stats.lock().clone();
            failure_notifier
                .notify_failure(&snapshot, err)
                .context("Failed to send failure notification")
        });

        let success_notifier = Arc::clone(notifier);
        let success_stats = Arc::clone(stats);
        hooks.register(HookLevel::Info, move |err| {
            if err.is_some() {
                return Ok(());
            }
            let snapshot = success_stats.lock().clone();
            success_notifier
                .notify_success(&snapshot)
                .context("Failed to send success notification")
        });
    }

    fn run_phases(&self, start: DateTime<Local>, stats: &SharedStats, hooks: &mut Hooks) -> Result<()> {
        let commands = LabeledCommands::new(Arc::clone(&self.deps.runtime))
            .with_exec_label(self.config.backup.exec_label.clone())
            .with_forward_output(self.config.backup.exec_forward_output);

        let archive = commands.with_labeled_commands(Phase::Archive, || {
            self.archive_with_paused_workloads(start, stats, hooks)
        })?;
        let archive =
            commands.with_labeled_commands(Phase::Process, || self.process(&archive, hooks))?;
        commands.with_labeled_commands(Phase::Copy, || self.copy(&archive, stats))?;
        commands.with_labeled_commands(Phase::Prune, || self.prune(start.with_timezone(&Utc), stats))?;
        Ok(())
    }

    /// Stop workloads, archive, and restore the workloads right away
    fn archive_with_paused_workloads(
        &self,
        start: DateTime<Local>,
        stats: &SharedStats,
        hooks: &mut Hooks,
    ) -> Result<PathBuf> {
        let backup = &self.config.backup;
        let controller = WorkloadController::new(
            Arc::clone(&self.deps.runtime),
            backup.stop_during_backup_label.clone(),
            Duration::from_secs(backup.stop_service_timeout_seconds),
        )
        .with_poll_interval(self.poll_interval);

        let (paused, stop_error) = controller.stop_containers_and_services(stats);
        let result = match stop_error {
            Some(e) => Err(anyhow::Error::new(e)),
            None => self.create_archive(start, hooks),
        };

        match (result, paused.restore()) {
            (result, Ok(())) => result,
            (Ok(_), Err(restore_err)) => {
                Err(anyhow::Error::new(restore_err).context("Error restarting containers and services"))
            }
            (Err(e), Err(restore_err)) => Err(e.context(format!(
                "restarting containers and services failed as well: {}",
                restore_err
            ))),
        }
    }

    fn create_archive(&self, start: DateTime<Local>, hooks: &mut Hooks) -> Result<PathBuf> {
        let backup = &self.config.backup;
        let filename = config::archive_filename(backup, start);
        let target = backup.temp_dir.join(&filename);

        register_removal(hooks, target.clone());
        self.deps
            .archiver
            .create(&backup.sources, &target)
            .with_context(|| format!("Error creating archive {}", filename))?;

        info!("Created backup of {:?} at {:?}", backup.sources, target);
        Ok(target)
    }

    fn process(&self, archive: &Path, hooks: &mut Hooks) -> Result<PathBuf> {
        let Some(ref passphrase_file) = self.config.backup.gpg_passphrase_file else {
            return Ok(archive.to_path_buf());
        };

        let encrypted = encrypt_with_gpg(self.deps.executor.as_ref(), archive, passphrase_file)
            .context("Error encrypting backup file")?;
        register_removal(hooks, encrypted.clone());
        Ok(encrypted)
    }

    fn copy(&self, archive: &Path, stats: &SharedStats) -> Result<()> {
        let metadata = fs::metadata(archive)
            .with_context(|| format!("Unable to stat backup file {:?}", archive))?;
        stats.lock().backup_file = BackupFileStats {
            name: storage::file_name(archive)?,
            full_path: archive.to_path_buf(),
            size: metadata.len(),
        };

        if self.deps.backends.is_empty() {
            warn!("No storage backends configured, the backup is not copied anywhere");
            return Ok(());
        }
        storage::copy_to_all(&self.deps.backends, archive)?;
        Ok(())
    }

    fn prune(&self, start: DateTime<Utc>, stats: &SharedStats) -> Result<()> {
        let backup = &self.config.backup;
        let Some(deadline) = config::pruning_deadline(backup, start) else {
            debug!("No retention configured, skipping pruning");
            return Ok(());
        };

        storage::prune_all(
            &self.deps.backends,
            deadline,
            &config::pruning_prefix(backup),
            &backup.skip_backends_from_prune,
            stats,
        )?;
        Ok(())
    }
}

/// Remove `path` once the run is over, whatever its outcome
fn register_removal(hooks: &mut Hooks, path: PathBuf) {
    hooks.register(HookLevel::Plumbing, move |_| {
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed temporary file {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context(format!("Error removing {:?}", path))),
        }
    });
}
