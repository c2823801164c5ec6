//! Docker CLI wrappers for containers, swarm services and exec
//!
//! Everything goes through `docker ... --format`/`inspect` JSON so the
//! output can be parsed with serde.

use super::docker_ops::{ContainerSummary, ExecOutput, LabelFilter, ServiceMode, ServiceSummary};
use super::executor::CommandExecutor;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Timeout for short-lived docker calls (listing, inspecting, updating)
pub const DOCKER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct SwarmInfo {
    #[serde(rename = "LocalNodeState", default)]
    local_node_state: String,
    #[serde(rename = "ControlAvailable", default)]
    control_available: bool,
}

#[derive(Debug, Deserialize)]
struct ContainerInspect {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Config", default)]
    config: Option<ContainerConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerConfig {
    #[serde(rename = "Labels", default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct ServiceInspect {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Spec")]
    spec: ServiceSpec,
}

#[derive(Debug, Deserialize)]
struct ServiceSpec {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Labels", default)]
    labels: Option<HashMap<String, String>>,
    #[serde(rename = "Mode", default)]
    mode: Option<ServiceModeSpec>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceModeSpec {
    #[serde(rename = "Replicated", default)]
    replicated: Option<ReplicatedSpec>,
    #[serde(rename = "Global", default)]
    global: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ReplicatedSpec {
    #[serde(rename = "Replicas", default)]
    replicas: Option<u64>,
}

/// Whether the daemon is part of a swarm and this node is a manager
pub fn is_swarm_manager(executor: &dyn CommandExecutor) -> Result<bool> {
    let output = executor.run_command_stdout(
        "docker",
        &["info", "--format", "{{json .Swarm}}"],
        Some(DOCKER_TIMEOUT),
    )?;

    let swarm: SwarmInfo =
        serde_json::from_str(output.trim()).context("Failed to parse docker swarm info")?;

    Ok(swarm.local_node_state == "active" && swarm.control_available)
}

fn ps_ids(executor: &dyn CommandExecutor, filter: Option<&LabelFilter>) -> Result<Vec<String>> {
    let filter_arg = filter.map(LabelFilter::to_filter_arg);
    let mut args = vec!["ps", "-q", "--no-trunc"];
    if let Some(ref arg) = filter_arg {
        args.push("--filter");
        args.push(arg);
    }

    Ok(ids_from_output(&executor.run_command_stdout("docker", &args, Some(DOCKER_TIMEOUT))?))
}

/// Number of running containers matching `filter`, without inspecting them
pub fn count_containers(executor: &dyn CommandExecutor, filter: &LabelFilter) -> Result<usize> {
    Ok(ps_ids(executor, Some(filter))?.len())
}

/// List running containers, optionally filtered by label
pub fn list_containers(
    executor: &dyn CommandExecutor,
    filter: Option<&LabelFilter>,
) -> Result<Vec<ContainerSummary>> {
    let ids = ps_ids(executor, filter)?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut inspect_args = vec!["inspect", "--type", "container"];
    inspect_args.extend(ids.iter().map(String::as_str));
    let output = executor.run_command_stdout("docker", &inspect_args, Some(DOCKER_TIMEOUT))?;

    parse_containers(&output)
}

fn parse_containers(output: &str) -> Result<Vec<ContainerSummary>> {
    let containers: Vec<ContainerInspect> =
        serde_json::from_str(output).context("Failed to parse docker inspect output")?;

    Ok(containers
        .into_iter()
        .map(|c| ContainerSummary {
            id: c.id,
            name: c.name.trim_start_matches('/').to_string(),
            labels: c.config.and_then(|config| config.labels).unwrap_or_default(),
        })
        .collect())
}

pub fn stop_container(executor: &dyn CommandExecutor, id: &str) -> Result<()> {
    executor
        .run_command("docker", &["stop", id], Some(DOCKER_TIMEOUT))
        .context(format!("Failed to stop container {}", id))?;
    Ok(())
}

pub fn start_container(executor: &dyn CommandExecutor, id: &str) -> Result<()> {
    executor
        .run_command("docker", &["start", id], Some(DOCKER_TIMEOUT))
        .context(format!("Failed to start container {}", id))?;
    Ok(())
}

/// List swarm services, optionally filtered by label
pub fn list_services(
    executor: &dyn CommandExecutor,
    filter: Option<&LabelFilter>,
) -> Result<Vec<ServiceSummary>> {
    let filter_arg = filter.map(LabelFilter::to_filter_arg);
    let mut args = vec!["service", "ls", "-q"];
    if let Some(ref arg) = filter_arg {
        args.push("--filter");
        args.push(arg);
    }

    let ids = ids_from_output(&executor.run_command_stdout("docker", &args, Some(DOCKER_TIMEOUT))?);
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut inspect_args = vec!["service", "inspect"];
    inspect_args.extend(ids.iter().map(String::as_str));
    let output = executor.run_command_stdout("docker", &inspect_args, Some(DOCKER_TIMEOUT))?;

    parse_services(&output)
}

pub fn inspect_service(executor: &dyn CommandExecutor, id: &str) -> Result<ServiceSummary> {
    let output = executor
        .run_command_stdout("docker", &["service", "inspect", id], Some(DOCKER_TIMEOUT))
        .context(format!("Failed to inspect service {}", id))?;

    parse_services(&output)?
        .into_iter()
        .next()
        .context(format!("Service {} not found", id))
}

fn parse_services(output: &str) -> Result<Vec<ServiceSummary>> {
    let services: Vec<ServiceInspect> =
        serde_json::from_str(output).context("Failed to parse docker service inspect output")?;

    Ok(services
        .into_iter()
        .map(|s| {
            let mode = match s.spec.mode {
                Some(ServiceModeSpec {
                    replicated: Some(replicated),
                    ..
                }) => ServiceMode::Replicated {
                    replicas: replicated.replicas.unwrap_or(1),
                },
                Some(ServiceModeSpec {
                    global: Some(_), ..
                }) => ServiceMode::Global,
                _ => ServiceMode::Other,
            };
            ServiceSummary {
                id: s.id,
                name: s.spec.name,
                labels: s.spec.labels.unwrap_or_default(),
                mode,
            }
        })
        .collect())
}

pub fn scale_service(executor: &dyn CommandExecutor, id: &str, replicas: u64) -> Result<()> {
    let replicas = replicas.to_string();
    executor
        .run_command(
            "docker",
            &["service", "update", "--detach", "--replicas", &replicas, id],
            Some(DOCKER_TIMEOUT),
        )
        .context(format!("Failed to scale service {} to {} replicas", id, replicas))?;
    Ok(())
}

pub fn force_update_service(executor: &dyn CommandExecutor, id: &str) -> Result<()> {
    executor
        .run_command(
            "docker",
            &["service", "update", "--detach", "--force", id],
            Some(DOCKER_TIMEOUT),
        )
        .context(format!("Failed to force update service {}", id))?;
    Ok(())
}

/// Run a shell command inside a container
pub fn exec(
    executor: &dyn CommandExecutor,
    container_id: &str,
    command: &str,
    user: Option<&str>,
) -> Result<ExecOutput> {
    let mut args = vec!["exec"];
    if let Some(user) = user {
        args.push("--user");
        args.push(user);
    }
    args.extend([container_id, "/bin/sh", "-c", command]);

    let output = executor.run_command("docker", &args, None)?;

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

fn ids_from_output(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}
