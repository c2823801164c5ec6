use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Settings for the backup run itself
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackupConfig {
    /// Directories that are archived
    #[serde(default = "default_sources")]
    pub sources: Vec<PathBuf>,

    /// Archive filename, expanded with strftime placeholders at run start
    #[serde(default = "default_filename")]
    pub filename: String,

    /// Directory the archive is written to before it is copied
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Prefix identifying backups for pruning (derived from filename if unset)
    #[serde(default)]
    pub pruning_prefix: Option<String>,

    /// Backups older than this many days are pruned; unset disables pruning
    #[serde(default)]
    pub retention_days: Option<u32>,

    #[serde(default = "default_pruning_leeway")]
    pub pruning_leeway_seconds: u64,

    /// Backend names excluded from pruning (case-insensitive)
    #[serde(default)]
    pub skip_backends_from_prune: Vec<String>,

    /// Value of the `docker-volume-backup.stop-during-backup` label
    #[serde(default = "default_stop_label")]
    pub stop_during_backup_label: String,

    #[serde(default = "default_stop_service_timeout")]
    pub stop_service_timeout_seconds: u64,

    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_seconds: u64,

    /// Only run labeled commands in containers carrying this exec label
    #[serde(default)]
    pub exec_label: Option<String>,

    /// Log stdout/stderr of labeled commands
    #[serde(default)]
    pub exec_forward_output: bool,

    /// Enables GPG symmetric encryption of the archive
    #[serde(default)]
    pub gpg_passphrase_file: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            filename: default_filename(),
            temp_dir: default_temp_dir(),
            pruning_prefix: None,
            retention_days: None,
            pruning_leeway_seconds: default_pruning_leeway(),
            skip_backends_from_prune: Vec::new(),
            stop_during_backup_label: default_stop_label(),
            stop_service_timeout_seconds: default_stop_service_timeout(),
            lock_file: default_lock_file(),
            lock_timeout_seconds: default_lock_timeout(),
            exec_label: None,
            exec_forward_output: false,
            gpg_passphrase_file: None,
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub discord_webhook_url: String,

    /// `error` only notifies on failure, `info` also on success
    #[serde(default = "default_notification_level")]
    pub level: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            discord_webhook_url: String::new(),
            level: default_notification_level(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_max_files")]
    pub max_files: u32,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            level: default_log_level(),
            max_files: default_log_max_files(),
        }
    }
}

/// Storage destinations; every configured section becomes one backend
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub local: Option<LocalStorageConfig>,
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
    #[serde(default)]
    pub webdav: Option<WebDavStorageConfig>,
    #[serde(default)]
    pub ssh: Option<SshStorageConfig>,
    #[serde(default)]
    pub azure: Option<AzureStorageConfig>,
    #[serde(default)]
    pub dropbox: Option<DropboxStorageConfig>,
    #[serde(default)]
    pub google_drive: Option<GoogleDriveStorageConfig>,
}

impl StorageConfig {
    pub fn is_empty(&self) -> bool {
        self.local.is_none()
            && self.s3.is_none()
            && self.webdav.is_none()
            && self.ssh.is_none()
            && self.azure.is_none()
            && self.dropbox.is_none()
            && self.google_drive.is_none()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalStorageConfig {
    /// Directory backups are copied into
    pub archive: PathBuf,
    /// Name of a symlink pointing at the most recent backup
    #[serde(default)]
    pub latest_symlink: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub access_key_id_file: Option<PathBuf>,
    #[serde(default)]
    pub secret_access_key_file: Option<PathBuf>,
    #[serde(default)]
    pub path_style: bool,
    #[serde(default)]
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebDavStorageConfig {
    pub url: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshStorageConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    pub remote_path: String,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AzureStorageConfig {
    pub account_name: String,
    pub container: String,
    /// Shared access signature, with or without the leading `?`
    pub sas_token: String,
    #[serde(default)]
    pub path: String,
    /// Overrides `https://<account>.blob.core.windows.net/`
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_tier: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DropboxStorageConfig {
    pub refresh_token: String,
    pub app_key: String,
    pub app_secret: String,
    #[serde(default)]
    pub remote_path: String,
    #[serde(default = "default_dropbox_chunk_size_mb")]
    pub chunk_size_mb: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GoogleDriveStorageConfig {
    /// File holding an OAuth access token for the Drive API
    pub access_token_file: PathBuf,
    pub folder_id: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

// Default value functions

fn default_sources() -> Vec<PathBuf> { vec![PathBuf::from("/backup")] }
fn default_filename() -> String { "backup-%Y-%m-%dT%H-%M-%S.tar.gz".to_string() }
fn default_temp_dir() -> PathBuf { std::env::temp_dir() }
fn default_pruning_leeway() -> u64 { 60 }
fn default_stop_label() -> String { "true".to_string() }
fn default_stop_service_timeout() -> u64 { 300 }
fn default_lock_file() -> PathBuf { PathBuf::from("/var/lock/dockervolumebackup.lock") }
fn default_lock_timeout() -> u64 { 3600 }
fn default_notification_level() -> String { "error".to_string() }
fn default_log_directory() -> PathBuf { PathBuf::from("~/logs") }
fn default_log_level() -> String { "info".to_string() }
fn default_log_max_files() -> u32 { 10 }
fn default_s3_region() -> String { "us-east-1".to_string() }
fn default_ssh_port() -> u16 { 22 }
fn default_dropbox_chunk_size_mb() -> u64 { 148 }
