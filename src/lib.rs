//! Docker Volume Backup Library
//!
//! This library backs up Docker volumes: it stops labeled containers and
//! swarm services, archives the volumes, and ships the archive to one or
//! more storage backends with retention based pruning.

pub mod config;
pub mod error;
pub mod managers;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, Config};
pub use error::{BackupError, ErrorList};
pub use managers::backup::{BackupDependencies, BackupManager};
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
pub use managers::notification::NotificationManager;
pub use managers::stats::Stats;
