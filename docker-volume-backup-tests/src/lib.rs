//! Test utilities for docker-volume-backup
//!
//! This crate provides shared test utilities, fixtures and helper functions
//! for testing the docker-volume-backup application.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{ConfigBuilder, MockDockerOps, MockStorage, TestContext};
//!
//! #[test]
//! fn my_test() {
//!     let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_retention(7));
//!     let manager = ctx.manager(MockDockerOps::new(), vec![Box::new(MockStorage::new("Mock"))]);
//!     manager.run().unwrap();
//! }
//! ```

pub mod config_builder;
pub mod fixtures;
pub mod test_context;

// Re-export commonly used items
pub use config_builder::ConfigBuilder;
pub use fixtures::*;
pub use test_context::TestContext;

// Re-export types from the main crate for convenience
pub use docker_volume_backup::config::{
    BackupConfig, Config, LocalStorageConfig, NotificationConfig, StorageConfig,
};
pub use docker_volume_backup::error::BackupError;
pub use docker_volume_backup::managers::stats::{PruneStats, Stats};
pub use docker_volume_backup::storage::{BackupObject, StorageBackend};

// Re-export mock implementations from the main crate
pub use docker_volume_backup::managers::notification::mock::{MockNotifier, SentNotification};
pub use docker_volume_backup::storage::mock::MockStorage;
pub use docker_volume_backup::utils::docker_ops::mock::{DockerCall, MockDockerOps};
pub use docker_volume_backup::utils::docker_ops::ContainerRuntime;
pub use docker_volume_backup::utils::executor::mock::{MockExecutor, MockResponse};
pub use docker_volume_backup::utils::executor::CommandExecutor;

/// Common test result type
pub type TestResult<T = ()> = anyhow::Result<T>;
