//! Complete backups against a real Docker daemon
//!
//! Run with: `cargo test -p docker-volume-backup-tests --test integration -- --ignored`

use super::common::{is_docker_available, is_running, run_labeled_container};
use docker_volume_backup::managers::backup::{BackupDependencies, BackupManager};
use docker_volume_backup::utils::docker_ops::{ContainerRuntime, LabelFilter, RealDockerOps};
use serial_test::serial;
use std::process::Command;
use test_utils::{file_names, ConfigBuilder, STOP_LABEL};

#[test]
#[ignore] // Requires Docker
#[serial]
fn test_list_containers_by_label() {
    if !is_docker_available() {
        println!("Docker not available, skipping test");
        return;
    }

    let name = "dvb-test-list-labeled";
    let _guard = run_labeled_container(name, &[(STOP_LABEL, "dvb-list")]);

    let runtime = RealDockerOps::new();
    let labeled = runtime
        .list_containers(Some(&LabelFilter::new(STOP_LABEL, "dvb-list")))
        .expect("Failed to list containers");

    assert_eq!(labeled.len(), 1);
    assert_eq!(labeled[0].name, name);
    assert_eq!(labeled[0].labels.get(STOP_LABEL).map(String::as_str), Some("dvb-list"));
}

#[test]
#[ignore] // Requires Docker
#[serial]
fn test_exec_returns_output() {
    if !is_docker_available() {
        println!("Docker not available, skipping test");
        return;
    }

    let name = "dvb-test-exec";
    let _guard = run_labeled_container(name, &[]);

    let output = RealDockerOps::new()
        .exec(name, "echo hello from $(whoami)", Some("nobody"))
        .expect("Failed to exec");

    assert_eq!(output.stdout.trim(), "hello from nobody");
}

#[test]
#[ignore] // Requires Docker
#[serial]
fn test_backup_stops_runs_commands_and_restarts() {
    if !is_docker_available() {
        println!("Docker not available, skipping test");
        return;
    }

    let name = "dvb-test-full-run";
    let _guard = run_labeled_container(
        name,
        &[
            (STOP_LABEL, "dvb-full"),
            ("docker-volume-backup.archive-pre", "touch /tmp/dumped"),
        ],
    );

    let builder = ConfigBuilder::minimal().with_stop_label("dvb-full");
    let archive = builder.archive_path().expect("local storage configured");
    let (config, _temp) = builder.persist();

    let deps = BackupDependencies::from_config(&config).expect("Failed to build dependencies");
    let (stats, result) = BackupManager::new(config, deps).run_with_stats();

    result.expect("Backup failed");
    assert_eq!(stats.containers.stopped, 1);
    assert!(is_running(name), "container was not restarted");
    assert_eq!(file_names(&archive), vec![stats.backup_file.name.clone()]);

    let dumped = Command::new("docker")
        .args(["exec", name, "test", "-f", "/tmp/dumped"])
        .status()
        .expect("Failed to run docker exec");
    assert!(dumped.success(), "archive-pre command did not run");

    let listing = Command::new("tar")
        .args(["-tzf"])
        .arg(archive.join(&stats.backup_file.name))
        .output()
        .expect("Failed to list archive");
    assert!(String::from_utf8_lossy(&listing.stdout).contains("data.txt"));
}
