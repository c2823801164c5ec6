//! Commands declared in container labels during a run

use test_utils::test_context::ResultAssertions;
use test_utils::{
    ConfigBuilder, DockerCall, MockDockerOps, MockStorage, TestContext, STOP_LABEL,
};

fn executed(runtime: &MockDockerOps) -> Vec<String> {
    runtime
        .get_calls()
        .into_iter()
        .filter_map(|call| match call {
            DockerCall::Exec { command, .. } => Some(command),
            _ => None,
        })
        .collect()
}

fn position(calls: &[DockerCall], wanted: impl Fn(&DockerCall) -> bool) -> usize {
    calls.iter().position(wanted).expect("call not recorded")
}

#[test]
fn test_archive_commands_wrap_stop_and_restart() {
    let ctx = TestContext::new();
    let runtime = MockDockerOps::new().with_container(
        "db",
        &[
            (STOP_LABEL, "true"),
            ("docker-volume-backup.archive-pre", "pg_dumpall -f /dump/all.sql"),
            ("docker-volume-backup.archive-post", "rm /dump/all.sql"),
        ],
    );

    ctx.manager(runtime.clone(), vec![Box::new(MockStorage::new("Mock"))])
        .run()
        .assert_ok();

    let calls = runtime.get_calls();
    let pre = position(&calls, |c| matches!(c, DockerCall::Exec { command, .. } if command.starts_with("pg_dumpall")));
    let stop = position(&calls, |c| matches!(c, DockerCall::StopContainer { .. }));
    let start = position(&calls, |c| matches!(c, DockerCall::StartContainer { .. }));
    let post = position(&calls, |c| matches!(c, DockerCall::Exec { command, .. } if command.starts_with("rm ")));
    assert!(pre < stop && stop < start && start < post);
}

#[test]
fn test_every_phase_runs_its_commands_in_order() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_retention(7));
    let runtime = MockDockerOps::new().with_container(
        "worker",
        &[
            ("docker-volume-backup.archive-pre", "archive-pre"),
            ("docker-volume-backup.archive-post", "archive-post"),
            ("docker-volume-backup.process-pre", "process-pre"),
            ("docker-volume-backup.process-post", "process-post"),
            ("docker-volume-backup.copy-pre", "copy-pre"),
            ("docker-volume-backup.copy-post", "copy-post"),
            ("docker-volume-backup.prune-pre", "prune-pre"),
            ("docker-volume-backup.prune-post", "prune-post"),
        ],
    );

    ctx.manager(runtime.clone(), vec![Box::new(MockStorage::new("Mock"))])
        .run()
        .assert_ok();

    assert_eq!(
        executed(&runtime),
        vec![
            "archive-pre",
            "archive-post",
            "process-pre",
            "process-post",
            "copy-pre",
            "copy-post",
            "prune-pre",
            "prune-post",
        ]
    );
}

#[test]
fn test_failing_pre_command_skips_the_phase() {
    let ctx = TestContext::new();
    let runtime = MockDockerOps::new()
        .with_container(
            "db",
            &[
                (STOP_LABEL, "true"),
                ("docker-volume-backup.archive-pre", "pg_dumpall"),
            ],
        )
        .with_failing_exec("db");
    let backend = MockStorage::new("Mock");

    ctx.manager(runtime.clone(), vec![Box::new(backend.clone())])
        .run()
        .assert_err_contains("archive-pre");

    assert_eq!(runtime.count_calls(|c| matches!(c, DockerCall::StopContainer { .. })), 0);
    assert!(backend.copied().is_empty());
}

#[test]
fn test_failing_post_command_fails_run_after_copy() {
    let ctx = TestContext::new();
    let runtime = MockDockerOps::new()
        .with_container("db", &[("docker-volume-backup.copy-post", "notify-done")])
        .with_failing_exec("db");
    let backend = MockStorage::new("Mock");

    ctx.manager(runtime.clone(), vec![Box::new(backend.clone())])
        .run()
        .assert_err_contains("Failed running copy-post commands");

    assert_eq!(backend.copied().len(), 1);
}

#[test]
fn test_exec_label_restricts_containers() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_exec_label("primary"));
    let runtime = MockDockerOps::new()
        .with_container(
            "db-primary",
            &[
                ("docker-volume-backup.exec-label", "primary"),
                ("docker-volume-backup.archive-pre", "dump primary"),
            ],
        )
        .with_container(
            "db-replica",
            &[
                ("docker-volume-backup.exec-label", "replica"),
                ("docker-volume-backup.archive-pre", "dump replica"),
            ],
        );

    ctx.manager(runtime.clone(), vec![Box::new(MockStorage::new("Mock"))])
        .run()
        .assert_ok();

    assert_eq!(executed(&runtime), vec!["dump primary"]);
}

#[test]
fn test_legacy_exec_labels_still_run() {
    let ctx = TestContext::new();
    let runtime = MockDockerOps::new().with_container(
        "db",
        &[
            ("docker-volume-backup.exec-pre", "legacy-pre"),
            ("docker-volume-backup.exec-post", "legacy-post"),
        ],
    );

    ctx.manager(runtime.clone(), vec![Box::new(MockStorage::new("Mock"))])
        .run()
        .assert_ok();

    assert_eq!(executed(&runtime), vec!["legacy-pre", "legacy-post"]);
}
