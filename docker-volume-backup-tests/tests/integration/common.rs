//! Common utilities for integration tests
//!
//! This module provides cleanup guards and helper functions for integration tests.

use std::process::Command;

/// Helper to check if Docker is available
pub fn is_docker_available() -> bool {
    Command::new("docker")
        .args(["ps"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Guard that ensures Docker container cleanup on drop (even on panic)
pub struct ContainerGuard {
    name: String,
}

impl ContainerGuard {
    pub fn new(name: String) -> Self {
        Self { name }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let _ = Command::new("docker").args(["rm", "-f", "-v", &self.name]).output();
    }
}

/// Start a detached alpine container that sleeps, carrying `labels`
pub fn run_labeled_container(name: &str, labels: &[(&str, &str)]) -> ContainerGuard {
    let mut args = vec!["run".to_string(), "-d".to_string(), "--name".to_string(), name.to_string()];
    for (key, value) in labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.extend(["alpine".to_string(), "sleep".to_string(), "300".to_string()]);

    let output = Command::new("docker")
        .args(&args)
        .output()
        .expect("Failed to run docker");
    assert!(
        output.status.success(),
        "docker run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    ContainerGuard::new(name.to_string())
}

/// Whether the named container is running
pub fn is_running(name: &str) -> bool {
    Command::new("docker")
        .args(["inspect", "-f", "{{.State.Running}}", name])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "true")
        .unwrap_or(false)
}

