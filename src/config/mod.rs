//! Configuration module for docker-volume-backup
//!
//! This module handles loading and validating configuration from TOML files
//! and derives the values a run needs (archive name, pruning prefix, pruning
//! deadline).
//!
//! ## Example Usage
//!
//! ```no_run
//! use docker_volume_backup::config;
//!
//! let config = config::load_config("backup.toml")?;
//! println!("Stopping containers labeled {}", config.backup.stop_during_backup_label);
//! # Ok::<(), config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{load_config, validate_config, ConfigError, Result};
pub use types::*;

use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};

/// Prefix identifying files created by this tool
///
/// Falls back to the part of the filename template before its first
/// strftime placeholder.
pub fn pruning_prefix(backup: &BackupConfig) -> String {
    if let Some(ref prefix) = backup.pruning_prefix {
        return prefix.clone();
    }

    match backup.filename.find('%') {
        Some(index) => backup.filename[..index].to_string(),
        None => backup.filename.clone(),
    }
}

/// Expand the filename template for a run started at `now`
pub fn archive_filename(backup: &BackupConfig, now: DateTime<Local>) -> String {
    now.format(&backup.filename).to_string()
}

/// Largest accepted `retention_days`
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Largest accepted `pruning_leeway_seconds`
pub const MAX_PRUNING_LEEWAY_SECONDS: u64 = 365 * 24 * 3600;

/// Backups last modified before this instant are eligible for pruning
///
/// An out of range result saturates to the earliest representable instant,
/// so nothing becomes eligible.
pub fn pruning_deadline(backup: &BackupConfig, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
    backup.retention_days.map(|days| {
        let leeway = backup.pruning_leeway_seconds.min(MAX_PRUNING_LEEWAY_SECONDS) as i64;
        start
            .checked_sub_signed(ChronoDuration::days(i64::from(days)))
            .and_then(|deadline| deadline.checked_sub_signed(ChronoDuration::seconds(leeway)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    })
}

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
