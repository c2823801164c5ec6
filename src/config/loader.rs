use super::types::*;
use crate::managers::hooks::HookLevel;
use chrono::format::{Item, StrftimeItems};
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let backup = &config.backup;

    if backup.sources.is_empty() {
        return Err(ConfigError::ValidationError(
            "No backup sources defined".to_string(),
        ));
    }

    if backup.filename.trim().is_empty() || backup.filename.contains('/') {
        return Err(ConfigError::ValidationError(format!(
            "Invalid backup filename: {:?}",
            backup.filename
        )));
    }

    if StrftimeItems::new(&backup.filename).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigError::ValidationError(format!(
            "Backup filename contains an invalid placeholder: {}",
            backup.filename
        )));
    }

    if backup.stop_during_backup_label.is_empty() {
        return Err(ConfigError::ValidationError(
            "stop_during_backup_label must not be empty".to_string(),
        ));
    }

    if let Some(days) = backup.retention_days {
        if days > super::MAX_RETENTION_DAYS {
            return Err(ConfigError::ValidationError(format!(
                "retention_days must be at most {}, got {}",
                super::MAX_RETENTION_DAYS,
                days
            )));
        }
    }

    if backup.pruning_leeway_seconds > super::MAX_PRUNING_LEEWAY_SECONDS {
        return Err(ConfigError::ValidationError(format!(
            "pruning_leeway_seconds must be at most {}, got {}",
            super::MAX_PRUNING_LEEWAY_SECONDS,
            backup.pruning_leeway_seconds
        )));
    }

    if backup.retention_days.is_some() && super::pruning_prefix(backup).is_empty() {
        return Err(ConfigError::ValidationError(
            "Pruning is enabled but the pruning prefix is empty, this would match every file"
                .to_string(),
        ));
    }

    if config.notifications.level.parse::<HookLevel>().is_err() {
        return Err(ConfigError::ValidationError(format!(
            "Unknown notification level: {}",
            config.notifications.level
        )));
    }

    if config.storage.is_empty() {
        return Err(ConfigError::ValidationError(
            "No storage backends defined".to_string(),
        ));
    }

    validate_storage(&config.storage)
}

fn validate_storage(storage: &StorageConfig) -> Result<()> {
    if let Some(ref s3) = storage.s3 {
        if s3.bucket.is_empty() {
            return Err(ConfigError::ValidationError(
                "S3 bucket must not be empty".to_string(),
            ));
        }
        let has_inline = s3.access_key_id.is_some() || s3.secret_access_key.is_some();
        let has_files = s3.access_key_id_file.is_some() || s3.secret_access_key_file.is_some();
        if has_inline && has_files {
            return Err(ConfigError::ValidationError(
                "S3 credentials must be given either inline or as files, not both".to_string(),
            ));
        }
    }

    if let Some(ref webdav) = storage.webdav {
        if !webdav.url.starts_with("http://") && !webdav.url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "WebDAV url must be http(s): {}",
                webdav.url
            )));
        }
    }

    if let Some(ref ssh) = storage.ssh {
        if ssh.host.is_empty() || ssh.remote_path.is_empty() {
            return Err(ConfigError::ValidationError(
                "SSH host and remote_path must not be empty".to_string(),
            ));
        }
    }

    if let Some(ref dropbox) = storage.dropbox {
        if dropbox.chunk_size_mb == 0 || dropbox.chunk_size_mb > 150 {
            return Err(ConfigError::ValidationError(format!(
                "Dropbox chunk_size_mb must be between 1 and 150, got {}",
                dropbox.chunk_size_mb
            )));
        }
    }

    Ok(())
}
