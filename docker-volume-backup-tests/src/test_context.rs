//! Test context and harness for lifecycle testing
//!
//! Provides a unified context for setting up a configuration and running the
//! backup manager against mocked collaborators.

use crate::config_builder::ConfigBuilder;
use crate::fixtures::RecordingArchiver;
use anyhow::Result;
use docker_volume_backup::config::Config;
use docker_volume_backup::managers::backup::{BackupDependencies, BackupManager};
use docker_volume_backup::managers::notification::mock::MockNotifier;
use docker_volume_backup::managers::notification::Notifier;
use docker_volume_backup::storage::StorageBackend;
use docker_volume_backup::utils::archive::Archiver;
use docker_volume_backup::utils::docker_ops::mock::MockDockerOps;
use docker_volume_backup::utils::executor::mock::MockExecutor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Test context that manages test resources and provides common utilities
pub struct TestContext {
    /// Temporary directory for test files
    temp_dir: TempDir,
    /// The test configuration
    config: Config,
    notifier: MockNotifier,
    executor: MockExecutor,
    archiver: Arc<dyn Archiver>,
}

impl TestContext {
    /// Create a test context with a minimal configuration
    pub fn new() -> Self {
        Self::from_builder(ConfigBuilder::minimal())
    }

    /// Create a test context from a ConfigBuilder
    pub fn from_builder(builder: ConfigBuilder) -> Self {
        let (config, temp_dir) = builder.persist();

        Self {
            temp_dir,
            config,
            notifier: MockNotifier::new(),
            executor: MockExecutor::new(),
            archiver: Arc::new(RecordingArchiver::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: MockNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_executor(mut self, executor: MockExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_archiver(mut self, archiver: impl Archiver + 'static) -> Self {
        self.archiver = Arc::new(archiver);
        self
    }

    /// Get the temporary directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn notifier(&self) -> &MockNotifier {
        &self.notifier
    }

    pub fn executor(&self) -> &MockExecutor {
        &self.executor
    }

    /// Directory archives are written to before copying
    pub fn scratch_dir(&self) -> &Path {
        &self.config.backup.temp_dir
    }

    /// Backup manager wired to the given runtime and backends
    ///
    /// Lock retries and convergence polling are shortened so runs stay fast.
    pub fn manager(&self, runtime: MockDockerOps, backends: Vec<Box<dyn StorageBackend>>) -> BackupManager {
        self.manager_with_notifier(runtime, backends, Arc::new(self.notifier.clone()))
    }

    /// Like [`TestContext::manager`] with a custom notifier
    pub fn manager_with_notifier(
        &self,
        runtime: MockDockerOps,
        backends: Vec<Box<dyn StorageBackend>>,
        notifier: Arc<dyn Notifier>,
    ) -> BackupManager {
        let deps = BackupDependencies {
            runtime: Arc::new(runtime),
            backends,
            archiver: Arc::clone(&self.archiver),
            notifier: Some(notifier),
            executor: Arc::new(self.executor.clone()),
        };
        BackupManager::new(self.config.clone(), deps)
            .with_lock_retry_interval(Duration::from_millis(100))
            .with_poll_interval(Duration::from_millis(10))
    }

    /// Create a subdirectory in the temp dir
    pub fn create_subdir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create subdirectory");
        path
    }

    /// Create a file in the temp dir
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Write the configuration as TOML and return its path
    pub fn write_config(&self) -> Result<PathBuf> {
        let path = self.temp_dir.path().join("config.toml");
        std::fs::write(&path, toml::to_string_pretty(&self.config)?)?;
        Ok(path)
    }

    /// Check if a file exists in the temp directory
    pub fn file_exists(&self, name: &str) -> bool {
        self.temp_dir.path().join(name).exists()
    }

    /// Read a file from the temp directory
    pub fn read_file(&self, name: &str) -> Result<String> {
        let path = self.temp_dir.path().join(name);
        Ok(std::fs::read_to_string(path)?)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension trait for assertion helpers
pub trait ResultAssertions<T> {
    /// Assert that the result is Ok and return the value
    fn assert_ok(self) -> T;

    /// Assert that the result is Err
    fn assert_err(self);

    /// Assert that the result is Err and the error message contains the given string
    fn assert_err_contains(self, needle: &str);
}

impl<T: std::fmt::Debug> ResultAssertions<T> for Result<T> {
    fn assert_ok(self) -> T {
        match self {
            Ok(v) => v,
            Err(e) => panic!("Expected Ok, got Err: {:#}", e),
        }
    }

    fn assert_err(self) {
        if let Ok(v) = self {
            panic!("Expected Err, got Ok: {:?}", v);
        }
    }

    fn assert_err_contains(self, needle: &str) {
        match self {
            Ok(v) => panic!("Expected Err containing '{}', got Ok: {:?}", needle, v),
            Err(e) => {
                let err_msg = format!("{:#}", e);
                assert!(
                    err_msg.contains(needle),
                    "Error '{}' does not contain '{}'",
                    err_msg,
                    needle
                );
            }
        }
    }
}
