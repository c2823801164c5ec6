//! Prune safety across backends

use chrono::{Duration as ChronoDuration, Utc};
use docker_volume_backup::config::LocalStorageConfig;
use docker_volume_backup::storage::{prune_objects, BackupObject, LocalStorage, StorageBackend};
use rstest::rstest;
use test_utils::{days_ago, file_names, write_aged_file, MockStorage};
use tempfile::TempDir;

fn objects(old: usize, fresh: usize) -> Vec<BackupObject> {
    (0..old)
        .map(|i| BackupObject {
            key: format!("backup-old-{}", i),
            modified: days_ago(30),
        })
        .chain((0..fresh).map(|i| BackupObject {
            key: format!("backup-new-{}", i),
            modified: days_ago(1),
        }))
        .collect()
}

#[rstest]
#[case(0, 0)]
#[case(0, 4)]
#[case(1, 1)]
#[case(3, 7)]
#[case(9, 1)]
#[case(5, 0)]
#[case(1, 0)]
fn test_prune_safety(#[case] old: usize, #[case] fresh: usize) {
    let deadline = Utc::now() - ChronoDuration::days(7);
    let mut removed = Vec::new();

    let stats = prune_objects("Mock", objects(old, fresh), deadline, |object| {
        removed.push(object.key.clone());
        Ok(())
    })
    .unwrap();

    assert_eq!(stats.total, old + fresh);
    if fresh == 0 {
        // every candidate matched, nothing may be removed
        assert_eq!(stats.pruned, 0);
        assert!(removed.is_empty());
    } else {
        assert_eq!(stats.pruned, old);
        assert!(removed.iter().all(|key| key.starts_with("backup-old-")));
    }
}

#[test]
fn test_local_prunes_three_of_ten() {
    let archive = TempDir::new().unwrap();
    for i in 0..10 {
        write_aged_file(archive.path(), &format!("backup-{:02}.tar.gz", i), if i < 3 { 30 } else { 1 });
    }
    let backend = LocalStorage::new(&LocalStorageConfig {
        archive: archive.path().to_path_buf(),
        latest_symlink: None,
    });

    let stats = backend.prune(Utc::now() - ChronoDuration::days(7), "backup-").unwrap();

    assert_eq!((stats.total, stats.pruned), (10, 3));
    assert_eq!(file_names(archive.path()).len(), 7);
    assert!(!file_names(archive.path()).contains(&"backup-00.tar.gz".to_string()));
}

#[test]
fn test_local_keeps_all_five_when_every_file_is_old() {
    let archive = TempDir::new().unwrap();
    for i in 0..5 {
        write_aged_file(archive.path(), &format!("backup-{}.tar.gz", i), 30);
    }
    let backend = LocalStorage::new(&LocalStorageConfig {
        archive: archive.path().to_path_buf(),
        latest_symlink: None,
    });

    let stats = backend.prune(Utc::now() - ChronoDuration::days(7), "backup-").unwrap();

    assert_eq!((stats.total, stats.pruned), (5, 0));
    assert_eq!(file_names(archive.path()).len(), 5);
}

#[test]
fn test_prefix_limits_candidates() {
    let backend = MockStorage::new("Mock")
        .with_object("backup-1", days_ago(30))
        .with_object("backup-2", days_ago(1))
        .with_object("unrelated", days_ago(30));

    let stats = backend.prune(Utc::now() - ChronoDuration::days(7), "backup-").unwrap();

    assert_eq!((stats.total, stats.pruned), (2, 1));
    assert_eq!(backend.keys(), vec!["backup-2".to_string(), "unrelated".to_string()]);
}
