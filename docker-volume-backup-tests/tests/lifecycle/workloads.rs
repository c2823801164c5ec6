//! Stopping and restoring labeled containers and services around a run

use docker_volume_backup::error::BackupError;
use test_utils::test_context::ResultAssertions;
use test_utils::{
    stop_labels, ConfigBuilder, DockerCall, FailingArchiver, MockDockerOps, MockStorage,
    TestContext, STOP_LABEL,
};

const SERVICE_ID_LABEL: &str = "com.docker.swarm.service.id";

fn starts(runtime: &MockDockerOps) -> usize {
    runtime.count_calls(|call| matches!(call, DockerCall::StartContainer { .. }))
}

fn stops(runtime: &MockDockerOps) -> usize {
    runtime.count_calls(|call| matches!(call, DockerCall::StopContainer { .. }))
}

#[test]
fn test_only_labeled_containers_are_stopped() {
    let ctx = TestContext::new();
    let runtime = MockDockerOps::new()
        .with_container("db", stop_labels())
        .with_container("cache", stop_labels())
        .with_container("proxy", &[]);

    ctx.manager(runtime.clone(), vec![Box::new(MockStorage::new("Mock"))])
        .run()
        .assert_ok();

    assert_eq!(stops(&runtime), 2);
    assert_eq!(starts(&runtime), 2);
    assert!(!runtime
        .get_calls()
        .contains(&DockerCall::StopContainer { id: "proxy".to_string() }));
    for id in ["db", "cache", "proxy"] {
        assert!(runtime.is_running(id), "{} should be running", id);
    }
}

#[test]
fn test_custom_label_value_selects_containers() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_stop_label("nightly"));
    let runtime = MockDockerOps::new()
        .with_container("db", &[(STOP_LABEL, "nightly")])
        .with_container("web", stop_labels());

    let (stats, result) = ctx
        .manager(runtime.clone(), vec![Box::new(MockStorage::new("Mock"))])
        .run_with_stats();

    result.assert_ok();
    assert_eq!(stats.containers.to_stop, 1);
    assert_eq!(
        runtime.get_calls().iter().filter_map(|call| match call {
            DockerCall::StopContainer { id } => Some(id.as_str()),
            _ => None,
        }).collect::<Vec<_>>(),
        vec!["db"]
    );
}

#[test]
fn test_containers_stopped_before_archive_and_started_before_copy() {
    let ctx = TestContext::new();
    let runtime = MockDockerOps::new().with_container("db", stop_labels());
    let backend = MockStorage::new("Mock");

    ctx.manager(runtime.clone(), vec![Box::new(backend.clone())])
        .run()
        .assert_ok();

    let calls = runtime.get_calls();
    let stop = calls
        .iter()
        .position(|c| matches!(c, DockerCall::StopContainer { .. }))
        .unwrap();
    let start = calls
        .iter()
        .position(|c| matches!(c, DockerCall::StartContainer { .. }))
        .unwrap();
    assert!(stop < start);
    assert_eq!(backend.copied().len(), 1);
}

#[test]
fn test_swarm_service_scaled_down_and_restored() {
    let ctx = TestContext::new();
    let runtime = MockDockerOps::new()
        .with_swarm()
        .with_service("svc1", "web", 3, stop_labels());

    let (stats, result) = ctx
        .manager(runtime.clone(), vec![Box::new(MockStorage::new("Mock"))])
        .run_with_stats();

    result.assert_ok();
    let scales: Vec<u64> = runtime
        .get_calls()
        .into_iter()
        .filter_map(|call| match call {
            DockerCall::ScaleService { id, replicas } if id == "svc1" => Some(replicas),
            _ => None,
        })
        .collect();
    assert_eq!(scales, vec![0, 3]);
    assert_eq!(runtime.replicas("svc1"), Some(3));
    assert_eq!(runtime.running_tasks("svc1"), 3);
    assert_eq!(stats.services.to_scale_down, 1);
    assert_eq!(stats.services.scaled_down, 1);
}

#[test]
fn test_services_ignored_outside_swarm() {
    let ctx = TestContext::new();
    let runtime = MockDockerOps::new().with_service("svc1", "web", 2, stop_labels());

    ctx.manager(runtime.clone(), vec![Box::new(MockStorage::new("Mock"))])
        .run()
        .assert_ok();

    assert_eq!(
        runtime.count_calls(|c| matches!(c, DockerCall::ScaleService { .. } | DockerCall::ListServices { .. })),
        0
    );
}

#[test]
fn test_conflicting_labels_abort_before_anything_stops() {
    let ctx = TestContext::new();
    let runtime = MockDockerOps::new()
        .with_swarm()
        .with_service("svc1", "web", 1, stop_labels())
        .with_container("web.task", &[(STOP_LABEL, "true"), (SERVICE_ID_LABEL, "svc1")]);
    let backend = MockStorage::new("Mock");

    let err = ctx
        .manager(runtime.clone(), vec![Box::new(backend.clone())])
        .run()
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<BackupError>(),
        Some(BackupError::ConflictingLabels { .. })
    ));
    assert_eq!(stops(&runtime), 0);
    assert_eq!(runtime.count_calls(|c| matches!(c, DockerCall::ScaleService { .. })), 0);
    assert!(backend.copied().is_empty());
}

#[test]
fn test_every_stopped_container_restarted_when_archive_fails() {
    let ctx = TestContext::new().with_archiver(FailingArchiver);
    let runtime = MockDockerOps::new()
        .with_container("a", stop_labels())
        .with_container("b", stop_labels())
        .with_container("c", stop_labels());

    ctx.manager(runtime.clone(), vec![Box::new(MockStorage::new("Mock"))])
        .run()
        .assert_err_contains("disk full");

    assert_eq!(stops(&runtime), 3);
    assert_eq!(starts(&runtime), 3);
}

#[test]
fn test_partial_stop_failure_restarts_the_rest_and_fails() {
    let ctx = TestContext::new();
    let runtime = MockDockerOps::new()
        .with_container("a", stop_labels())
        .with_container("b", stop_labels())
        .with_failing_stop("b");
    let backend = MockStorage::new("Mock");

    let (stats, result) = ctx
        .manager(runtime.clone(), vec![Box::new(backend.clone())])
        .run_with_stats();

    result.assert_err_contains("Failed to stop container b");
    assert_eq!(stats.containers.stop_errors, 1);
    assert_eq!(stats.containers.stopped, 1);
    assert_eq!(
        runtime.get_calls().iter().filter(|c| matches!(c, DockerCall::StartContainer { .. })).collect::<Vec<_>>(),
        vec![&DockerCall::StartContainer { id: "a".to_string() }]
    );
    assert!(backend.copied().is_empty());
}

#[test]
fn test_restore_failure_fails_the_run() {
    let ctx = TestContext::new();
    let runtime = MockDockerOps::new()
        .with_container("db", stop_labels())
        .with_failing_start("db");
    let backend = MockStorage::new("Mock");

    ctx.manager(runtime.clone(), vec![Box::new(backend.clone())])
        .run()
        .assert_err_contains("restarting containers and services");

    assert!(backend.copied().is_empty());
}

#[test]
fn test_stuck_service_times_out_and_is_scaled_back() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_service_timeout(1));
    let runtime = MockDockerOps::new()
        .with_swarm()
        .with_service("svc1", "web", 2, stop_labels())
        .with_stuck_service("svc1");

    let err = ctx
        .manager(runtime.clone(), vec![Box::new(MockStorage::new("Mock"))])
        .run()
        .unwrap_err();

    assert!(format!("{:#}", err).contains("desired container count of 0"));
    assert_eq!(runtime.replicas("svc1"), Some(2));
}
