//! Lock fairness: a held lock makes a contender fail with `LockTimeout`
//! no earlier than the timeout and no later than one retry interval after it

use docker_volume_backup::error::BackupError;
use docker_volume_backup::utils::locker::RunLock;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[test]
fn test_held_lock_times_out_between_timeout_and_one_interval_later() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("backup.lock");
    let _holder = RunLock::new(&path).acquire(Duration::ZERO).unwrap();

    // scaled down from a 10s timeout polled every 5s
    let interval = Duration::from_millis(250);
    let timeout = Duration::from_millis(500);
    let mut contender = RunLock::new(&path).with_retry_interval(interval);

    let start = Instant::now();
    let result = contender.acquire(timeout);
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(BackupError::LockTimeout(t)) if t == timeout));
    assert!(elapsed >= timeout, "gave up after {:?}", elapsed);
    assert!(elapsed <= timeout + interval + Duration::from_millis(200), "gave up after {:?}", elapsed);
    assert!(contender.encountered_lock());
}

#[test]
fn test_lock_released_on_drop() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("backup.lock");

    {
        let _guard = RunLock::new(&path).acquire(Duration::ZERO).unwrap();
    }

    let mut next = RunLock::new(&path);
    assert!(next.acquire(Duration::ZERO).is_ok());
    assert!(!next.encountered_lock());
}
