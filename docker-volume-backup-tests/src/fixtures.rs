//! Test fixtures and sample data
//!
//! Provides label sets, aged backup files and archivers for testing.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use docker_volume_backup::managers::notification::Notifier;
use docker_volume_backup::managers::stats::Stats;
use docker_volume_backup::utils::archive::Archiver;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub const STOP_LABEL: &str = "docker-volume-backup.stop-during-backup";

/// Labels selecting a workload for stopping with the default label value
pub fn stop_labels() -> &'static [(&'static str, &'static str)] {
    &[(STOP_LABEL, "true")]
}

/// Instant `days` days in the past
pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::days(days)
}

/// Write a file whose modification time lies `age_days` in the past
pub fn write_aged_file(dir: &Path, name: &str, age_days: u64) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, name).expect("Failed to write aged file");
    let modified = SystemTime::now() - Duration::from_secs(age_days * 24 * 3600);
    File::options()
        .write(true)
        .open(&path)
        .and_then(|file| file.set_modified(modified))
        .expect("Failed to set modification time");
    path
}

/// Names of the regular files in `dir`, sorted
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("Failed to read directory")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().symlink_metadata().map(|m| m.is_file()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

/// Archiver writing fixed content and remembering its targets
#[derive(Clone, Default)]
pub struct RecordingArchiver {
    pub targets: Arc<Mutex<Vec<PathBuf>>>,
}

impl RecordingArchiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn targets(&self) -> Vec<PathBuf> {
        self.targets.lock().clone()
    }
}

impl Archiver for RecordingArchiver {
    fn create(&self, _sources: &[PathBuf], target: &Path) -> Result<()> {
        fs::write(target, b"fake archive")?;
        self.targets.lock().push(target.to_path_buf());
        Ok(())
    }
}

/// Archiver that always fails
pub struct FailingArchiver;

impl Archiver for FailingArchiver {
    fn create(&self, _sources: &[PathBuf], _target: &Path) -> Result<()> {
        anyhow::bail!("disk full")
    }
}

/// Archiver that panics mid-run
pub struct PanickingArchiver;

impl Archiver for PanickingArchiver {
    fn create(&self, _sources: &[PathBuf], _target: &Path) -> Result<()> {
        panic!("archiver panicked")
    }
}

/// Notifier that panics on every notification
pub struct PanickingNotifier;

impl Notifier for PanickingNotifier {
    fn notify_failure(&self, _stats: &Stats, _error: &anyhow::Error) -> Result<()> {
        panic!("notifier panicked")
    }

    fn notify_success(&self, _stats: &Stats) -> Result<()> {
        panic!("notifier panicked")
    }
}

/// Minimal valid config TOML template
pub fn minimal_config_toml() -> &'static str {
    r#"
[backup]
sources = ["{source}"]
temp_dir = "{temp_dir}"
lock_file = "{lock_file}"

[storage.local]
archive = "{archive}"
"#
}

/// Config using every section
pub fn full_config_toml() -> &'static str {
    r#"
[backup]
sources = ["{source}"]
filename = "nightly-%Y-%m-%d.tar.gz"
temp_dir = "{temp_dir}"
lock_file = "{lock_file}"
retention_days = 7
pruning_leeway_seconds = 120
skip_backends_from_prune = ["s3"]
stop_during_backup_label = "nightly"
stop_service_timeout_seconds = 60
lock_timeout_seconds = 30
exec_label = "db"
exec_forward_output = true

[notifications]
discord_webhook_url = "https://discord.com/api/webhooks/123/abc"
level = "info"

[logging]
directory = "{temp_dir}/logs"
level = "debug"
max_files = 3

[storage.local]
archive = "{archive}"
latest_symlink = "nightly-latest.tar.gz"

[storage.s3]
bucket = "backups"
path = "nightly"
endpoint = "http://localhost:9000"
access_key_id = "minio"
secret_access_key = "minio123"
path_style = true

[storage.ssh]
host = "backup.example.com"
user = "backup"
remote_path = "/srv/backups"
"#
}

/// Substitute the `{placeholders}` of a template with paths below `root`
pub fn render_config(template: &str, root: &Path) -> String {
    let source = root.join("source");
    let temp_dir = root.join("tmp");
    let archive = root.join("archive");
    for dir in [&source, &temp_dir, &archive] {
        fs::create_dir_all(dir).expect("Failed to create config directory");
    }

    template
        .replace("{source}", &source.display().to_string())
        .replace("{temp_dir}", &temp_dir.display().to_string())
        .replace("{lock_file}", &root.join("backup.lock").display().to_string())
        .replace("{archive}", &archive.display().to_string())
}
