//! Phase ordering, hooks and failure handling of a run

use docker_volume_backup::error::BackupError;
use docker_volume_backup::utils::locker::RunLock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use test_utils::test_context::ResultAssertions;
use test_utils::{
    file_names, stop_labels, ConfigBuilder, FailingArchiver, MockDockerOps, MockExecutor,
    MockNotifier, MockResponse, MockStorage, PanickingArchiver, PanickingNotifier, SentNotification,
    TestContext,
};

#[test]
fn test_successful_run_populates_stats() {
    let ctx = TestContext::new();
    let runtime = MockDockerOps::new()
        .with_container("db", stop_labels())
        .with_container("proxy", &[]);
    let backend = MockStorage::new("Mock");

    let (stats, result) = ctx
        .manager(runtime.clone(), vec![Box::new(backend.clone())])
        .run_with_stats();

    result.assert_ok();
    assert_eq!(stats.containers.all, 2);
    assert_eq!(stats.containers.stopped, 1);
    assert!(stats.backup_file.name.starts_with("backup-"));
    assert_eq!(stats.backup_file.size, "fake archive".len() as u64);
    assert!(stats.start_time.is_some() && stats.end_time.is_some());
    assert_eq!(backend.copied(), vec![stats.backup_file.name.clone()]);
    assert!(runtime.is_running("db"));
}

#[test]
fn test_temporary_archive_removed_after_run() {
    let ctx = TestContext::new();

    ctx.manager(MockDockerOps::new(), vec![Box::new(MockStorage::new("Mock"))])
        .run()
        .assert_ok();

    assert!(file_names(ctx.scratch_dir()).is_empty());
}

#[test]
fn test_temporary_archive_removed_after_failed_copy() {
    let ctx = TestContext::new();

    ctx.manager(
        MockDockerOps::new(),
        vec![Box::new(MockStorage::new("Mock").with_failing_copy())],
    )
    .run()
    .assert_err();

    assert!(file_names(ctx.scratch_dir()).is_empty());
}

#[test]
fn test_failure_notification_only_at_error_level() {
    let ctx = TestContext::new();

    ctx.manager(MockDockerOps::new(), vec![Box::new(MockStorage::new("Mock"))])
        .run()
        .assert_ok();

    assert!(ctx.notifier().sent().is_empty());
}

#[test]
fn test_success_notification_at_info_level() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_notification_level("info"));

    ctx.manager(MockDockerOps::new(), vec![Box::new(MockStorage::new("Mock"))])
        .run()
        .assert_ok();

    assert_eq!(ctx.notifier().sent(), vec![SentNotification::Success]);
}

#[test]
fn test_archive_failure_notifies_and_skips_copy() {
    let ctx = TestContext::new().with_archiver(FailingArchiver);
    let backend = MockStorage::new("Mock");

    ctx.manager(MockDockerOps::new(), vec![Box::new(backend.clone())])
        .run()
        .assert_err_contains("disk full");

    assert!(backend.copied().is_empty());
    match &ctx.notifier().sent()[..] {
        [SentNotification::Failure { error }] => assert!(error.contains("disk full")),
        other => panic!("unexpected notifications {:?}", other),
    }
}

#[test]
fn test_panic_is_recovered_and_reported() {
    let ctx = TestContext::new().with_archiver(PanickingArchiver);
    let runtime = MockDockerOps::new().with_container("db", stop_labels());

    let err = ctx
        .manager(runtime.clone(), vec![Box::new(MockStorage::new("Mock"))])
        .run()
        .unwrap_err();

    assert!(matches!(err.downcast_ref::<BackupError>(), Some(BackupError::Panicked(_))));
    assert!(runtime.is_running("db"));
    assert_eq!(ctx.notifier().sent().len(), 1);
}

#[test]
fn test_hook_and_script_errors_reported_together() {
    let ctx = TestContext::new().with_notifier(MockNotifier::failing());

    let message = format!(
        "{:#}",
        ctx.manager(
            MockDockerOps::new(),
            vec![Box::new(MockStorage::new("Mock").with_failing_copy())],
        )
        .run()
        .unwrap_err()
    );

    assert!(message.contains("Mock: Failed to copy backup"));
    assert!(message.contains("hook"));
}

#[test]
fn test_hook_error_alone_fails_the_run() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_notification_level("info"))
        .with_notifier(MockNotifier::failing());

    ctx.manager(MockDockerOps::new(), vec![Box::new(MockStorage::new("Mock"))])
        .run()
        .assert_err_contains("registered hooks");
}

#[test]
fn test_encryption_failure_aborts_before_copy() {
    let ctx = TestContext::from_builder(
        ConfigBuilder::minimal().with_gpg_passphrase_file(Path::new("/run/secrets/gpg")),
    )
    .with_executor(MockExecutor::new().expect("gpg", MockResponse::failure("bad passphrase")));
    let runtime = MockDockerOps::new().with_container("db", stop_labels());
    let backend = MockStorage::new("Mock");

    ctx.manager(runtime.clone(), vec![Box::new(backend.clone())])
        .run()
        .assert_err_contains("encrypting");

    assert!(backend.copied().is_empty());
    assert!(runtime.is_running("db"));
    assert_eq!(ctx.executor().call_count("gpg"), 1);
}

#[test]
fn test_concurrent_run_times_out_on_lock() {
    let ctx = TestContext::new();
    let _held = RunLock::new(&ctx.config().backup.lock_file)
        .acquire(Duration::ZERO)
        .unwrap();
    let backend = MockStorage::new("Mock");

    let (stats, result) = ctx
        .manager(MockDockerOps::new(), vec![Box::new(backend.clone())])
        .run_with_stats();
    let err = result.unwrap_err();

    assert!(matches!(err.downcast_ref::<BackupError>(), Some(BackupError::LockTimeout(_))));
    assert!(
        stats.locked_time >= Duration::from_secs(ctx.config().backup.lock_timeout_seconds),
        "wait time not recorded: {:?}",
        stats.locked_time
    );
    assert!(backend.copied().is_empty());
    // nothing ran, so no hooks either
    assert!(ctx.notifier().sent().is_empty());
}

#[test]
fn test_panicking_notifier_is_recovered() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_notification_level("info"));
    let runtime = MockDockerOps::new().with_container("db", stop_labels());
    let backend = MockStorage::new("Mock");

    let (stats, result) = ctx
        .manager_with_notifier(runtime.clone(), vec![Box::new(backend.clone())], Arc::new(PanickingNotifier))
        .run_with_stats();

    result.assert_err_contains("notifier panicked");
    // sibling hooks still ran
    assert!(stats.end_time.is_some());
    assert!(file_names(ctx.scratch_dir()).is_empty());
    assert_eq!(backend.copied().len(), 1);
    assert!(runtime.is_running("db"));
}
