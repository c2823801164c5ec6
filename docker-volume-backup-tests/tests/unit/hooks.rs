//! Hook completeness: exactly the hooks up to the threshold run, in level
//! order, once each, whatever the earlier hooks return

use docker_volume_backup::error::BackupError;
use docker_volume_backup::managers::hooks::{HookLevel, Hooks};
use parking_lot::Mutex;
use rstest::rstest;
use std::sync::Arc;

type Log = Arc<Mutex<Vec<(HookLevel, usize)>>>;

fn register(hooks: &mut Hooks, log: &Log, level: HookLevel, id: usize, fail: bool) {
    let log = Arc::clone(log);
    hooks.register(level, move |_| {
        log.lock().push((level, id));
        if fail {
            anyhow::bail!("hook {} failed", id);
        }
        Ok(())
    });
}

#[rstest]
#[case(HookLevel::Plumbing, 2)]
#[case(HookLevel::Error, 4)]
#[case(HookLevel::Info, 6)]
fn test_hooks_up_to_threshold_run_once_in_order(#[case] threshold: HookLevel, #[case] expected: usize) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let mut hooks = Hooks::new(threshold);
    // registration order deliberately differs from level order
    let levels = [
        HookLevel::Info,
        HookLevel::Error,
        HookLevel::Plumbing,
        HookLevel::Info,
        HookLevel::Plumbing,
        HookLevel::Error,
    ];
    for (id, level) in levels.iter().enumerate() {
        register(&mut hooks, &log, *level, id, id % 2 == 0);
    }

    let result = hooks.run_all(None);

    let ran = log.lock().clone();
    assert_eq!(ran.len(), expected);
    assert!(ran.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    assert!(ran.iter().all(|(level, _)| *level <= threshold));
    // stable within a level
    let plumbing: Vec<usize> = ran
        .iter()
        .filter(|(level, _)| *level == HookLevel::Plumbing)
        .map(|(_, id)| *id)
        .collect();
    assert_eq!(plumbing, vec![2, 4]);

    let failures = ran.iter().filter(|(_, id)| id % 2 == 0).count();
    match result {
        Err(BackupError::HookFailed(list)) => assert_eq!(list.len(), failures),
        Ok(()) => assert_eq!(failures, 0),
        Err(other) => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_hooks_see_the_terminal_error() {
    let seen = Arc::new(Mutex::new(None));
    let mut hooks = Hooks::new(HookLevel::Error);
    let sink = Arc::clone(&seen);
    hooks.register(HookLevel::Error, move |err| {
        *sink.lock() = err.map(|e| e.to_string());
        Ok(())
    });

    let error = anyhow::anyhow!("copy failed");
    hooks.run_all(Some(&error)).unwrap();

    assert_eq!(seen.lock().as_deref(), Some("copy failed"));
}
