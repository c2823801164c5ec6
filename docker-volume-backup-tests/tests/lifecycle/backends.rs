//! Copy and prune across several storage backends

use docker_volume_backup::storage::{LocalStorage, StorageBackend};
use test_utils::test_context::ResultAssertions;
use test_utils::{
    days_ago, file_names, write_aged_file, ConfigBuilder, MockDockerOps, MockStorage, PruneStats,
    TestContext,
};

fn local_backend(ctx: &TestContext) -> Box<dyn StorageBackend> {
    let local = ctx.config().storage.local.as_ref().expect("local storage configured");
    Box::new(LocalStorage::new(local))
}

#[test]
fn test_failing_backend_does_not_stop_the_others() {
    let ctx = TestContext::new();
    let s3 = MockStorage::new("S3").with_failing_copy();

    let (stats, result) = ctx
        .manager(MockDockerOps::new(), vec![Box::new(s3.clone()), local_backend(&ctx)])
        .run_with_stats();

    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("S3: Failed to copy backup"));
    assert!(!message.contains("Local"));
    assert_eq!(s3.copied(), vec![stats.backup_file.name.clone()]);

    let archive = ctx.config().storage.local.as_ref().unwrap().archive.clone();
    assert_eq!(file_names(&archive), vec![stats.backup_file.name]);
}

#[test]
fn test_every_backend_receives_the_archive() {
    let ctx = TestContext::new();
    let first = MockStorage::new("First");
    let second = MockStorage::new("Second");
    let third = MockStorage::new("Third").with_failing_copy();

    ctx.manager(
        MockDockerOps::new(),
        vec![
            Box::new(first.clone()),
            Box::new(third.clone()),
            Box::new(second.clone()),
        ],
    )
    .run()
    .assert_err_contains("1 storage backend(s) failed");

    for backend in [&first, &second, &third] {
        assert_eq!(backend.copied().len(), 1);
    }
}

#[test]
fn test_no_pruning_without_retention() {
    let ctx = TestContext::new();
    let backend = MockStorage::new("Mock").with_object("backup-old.tar.gz", days_ago(400));

    let (stats, result) = ctx
        .manager(MockDockerOps::new(), vec![Box::new(backend.clone())])
        .run_with_stats();

    result.assert_ok();
    assert!(backend.keys().contains(&"backup-old.tar.gz".to_string()));
    assert!(stats.storages.is_empty());
}

#[test]
fn test_local_backups_past_retention_are_pruned() {
    let builder = ConfigBuilder::minimal().with_retention(7);
    let archive = builder.archive_path().unwrap();
    let ctx = TestContext::from_builder(builder);
    write_aged_file(&archive, "backup-old.tar.gz", 10);
    write_aged_file(&archive, "backup-recent.tar.gz", 2);
    write_aged_file(&archive, "unrelated.txt", 30);

    let (stats, result) = ctx
        .manager(MockDockerOps::new(), vec![local_backend(&ctx)])
        .run_with_stats();

    result.assert_ok();
    let names = file_names(&archive);
    assert!(!names.contains(&"backup-old.tar.gz".to_string()));
    assert!(names.contains(&"backup-recent.tar.gz".to_string()));
    assert!(names.contains(&"unrelated.txt".to_string()));
    assert!(names.contains(&stats.backup_file.name));
    assert_eq!(
        stats.storages.get("Local"),
        Some(&PruneStats {
            total: 3,
            pruned: 1,
            prune_errors: 0
        })
    );
}

#[test]
fn test_skipped_backend_is_not_pruned() {
    let ctx = TestContext::from_builder(
        ConfigBuilder::minimal()
            .with_retention(1)
            .with_skipped_backends(&["s3"]),
    );
    let s3 = MockStorage::new("S3")
        .with_object("backup-a.tar.gz", days_ago(30))
        .with_object("backup-b.tar.gz", days_ago(1));
    let other = MockStorage::new("Other")
        .with_object("backup-a.tar.gz", days_ago(30))
        .with_object("backup-b.tar.gz", days_ago(1));

    let (stats, result) = ctx
        .manager(MockDockerOps::new(), vec![Box::new(s3.clone()), Box::new(other.clone())])
        .run_with_stats();

    result.assert_ok();
    assert!(s3.keys().contains(&"backup-a.tar.gz".to_string()));
    assert!(!other.keys().contains(&"backup-a.tar.gz".to_string()));
    assert!(!stats.storages.contains_key("S3"));
    assert_eq!(stats.storages["Other"].pruned, 1);
}

#[test]
fn test_prune_failure_is_reported_with_stats() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_retention(1));
    let backend = MockStorage::new("Mock")
        .with_object("backup-a.tar.gz", days_ago(30))
        .with_object("backup-b.tar.gz", days_ago(20))
        .with_failing_remove("backup-a.tar.gz");

    let (stats, result) = ctx
        .manager(MockDockerOps::new(), vec![Box::new(backend.clone())])
        .run_with_stats();

    result.assert_err_contains("Mock: Failed to prune backups");
    let prune = stats.storages["Mock"];
    assert_eq!(prune.pruned, 1);
    assert_eq!(prune.prune_errors, 1);
}

#[test]
fn test_custom_pruning_prefix_limits_candidates() {
    let ctx = TestContext::from_builder(
        ConfigBuilder::minimal()
            .with_retention(1)
            .with_pruning_prefix("backup-daily-"),
    );
    let backend = MockStorage::new("Mock")
        .with_object("backup-daily-1.tar.gz", days_ago(30))
        .with_object("backup-daily-2.tar.gz", days_ago(0))
        .with_object("backup-weekly-1.tar.gz", days_ago(30));

    ctx.manager(MockDockerOps::new(), vec![Box::new(backend.clone())])
        .run()
        .assert_ok();

    let keys = backend.keys();
    assert!(!keys.contains(&"backup-daily-1.tar.gz".to_string()));
    assert!(keys.contains(&"backup-weekly-1.tar.gz".to_string()));
}
