//! Fluent API for building test configurations
//!
//! Every path the configuration points at lives inside one temporary
//! directory, so runs never touch the host.

use docker_volume_backup::config::{
    BackupConfig, Config, LocalStorageConfig, LoggingSettings, NotificationConfig, StorageConfig,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builder for creating test configurations
pub struct ConfigBuilder {
    temp_dir: TempDir,
    backup: BackupConfig,
    notifications: NotificationConfig,
    logging: LoggingSettings,
    storage: StorageConfig,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder with one source directory and no storage
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let source = temp_dir.path().join("source");
        fs::create_dir_all(&source).expect("Failed to create source dir");
        fs::write(source.join("data.txt"), "volume contents").expect("Failed to write source file");

        let scratch = temp_dir.path().join("tmp");
        fs::create_dir_all(&scratch).expect("Failed to create scratch dir");

        let log_directory = temp_dir.path().join("logs");
        fs::create_dir_all(&log_directory).expect("Failed to create log_directory");

        let backup = BackupConfig {
            sources: vec![source],
            temp_dir: scratch,
            lock_file: temp_dir.path().join("backup.lock"),
            lock_timeout_seconds: 1,
            stop_service_timeout_seconds: 5,
            ..BackupConfig::default()
        };

        Self {
            temp_dir,
            backup,
            notifications: NotificationConfig::default(),
            logging: LoggingSettings {
                directory: log_directory,
                level: "info".to_string(),
                max_files: 5,
            },
            storage: StorageConfig::default(),
        }
    }

    /// Create a config with a local archive directory as its only backend
    pub fn minimal() -> Self {
        let builder = Self::new();
        let archive = builder.temp_dir.path().join("archive");
        fs::create_dir_all(&archive).expect("Failed to create archive dir");
        builder.with_local_storage(&archive)
    }

    pub fn with_local_storage(mut self, archive: &Path) -> Self {
        self.storage.local = Some(LocalStorageConfig {
            archive: archive.to_path_buf(),
            latest_symlink: None,
        });
        self
    }

    pub fn with_latest_symlink(mut self, name: &str) -> Self {
        if let Some(ref mut local) = self.storage.local {
            local.latest_symlink = Some(name.to_string());
        }
        self
    }

    pub fn with_sources(mut self, sources: Vec<PathBuf>) -> Self {
        self.backup.sources = sources;
        self
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.backup.filename = filename.to_string();
        self
    }

    pub fn with_retention(mut self, days: u32) -> Self {
        self.backup.retention_days = Some(days);
        self
    }

    pub fn with_pruning_prefix(mut self, prefix: &str) -> Self {
        self.backup.pruning_prefix = Some(prefix.to_string());
        self
    }

    pub fn with_skipped_backends(mut self, names: &[&str]) -> Self {
        self.backup.skip_backends_from_prune = names.iter().map(|name| name.to_string()).collect();
        self
    }

    pub fn with_stop_label(mut self, value: &str) -> Self {
        self.backup.stop_during_backup_label = value.to_string();
        self
    }

    pub fn with_service_timeout(mut self, seconds: u64) -> Self {
        self.backup.stop_service_timeout_seconds = seconds;
        self
    }

    pub fn with_lock_timeout(mut self, seconds: u64) -> Self {
        self.backup.lock_timeout_seconds = seconds;
        self
    }

    pub fn with_exec_label(mut self, value: &str) -> Self {
        self.backup.exec_label = Some(value.to_string());
        self
    }

    pub fn with_gpg_passphrase_file(mut self, path: &Path) -> Self {
        self.backup.gpg_passphrase_file = Some(path.to_path_buf());
        self
    }

    /// Set notification configuration
    pub fn with_notifications(mut self, config: NotificationConfig) -> Self {
        self.notifications = config;
        self
    }

    pub fn with_notification_level(mut self, level: &str) -> Self {
        self.notifications.level = level.to_string();
        self
    }

    /// Get the temp directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Directory of the local backend, if configured
    pub fn archive_path(&self) -> Option<PathBuf> {
        self.storage.local.as_ref().map(|local| local.archive.clone())
    }

    /// Build the Config; the temporary directory is removed with the builder
    pub fn build(self) -> Config {
        self.persist().0
    }

    /// Build the Config and hand over the temporary directory holding its paths
    pub fn persist(self) -> (Config, TempDir) {
        let config = Config {
            backup: self.backup,
            notifications: self.notifications,
            logging: self.logging,
            storage: self.storage,
        };
        (config, self.temp_dir)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
