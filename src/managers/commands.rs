//! Commands declared through container labels, run around each backup phase
//!
//! A container labeled `docker-volume-backup.archive-pre=pg_dump ...` gets
//! that command executed inside it right before the archive is created.
//! Every phase has a `-pre` and a `-post` label.

use crate::error::ErrorList;
use crate::utils::docker_ops::{ContainerRuntime, ContainerSummary, LabelFilter};
use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

const LABEL_PREFIX: &str = "docker-volume-backup";
pub const EXEC_LABEL: &str = "docker-volume-backup.exec-label";

/// Phase of a backup run that can be wrapped by labeled commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Archive,
    Process,
    Copy,
    Prune,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Archive => "archive",
            Phase::Process => "process",
            Phase::Copy => "copy",
            Phase::Prune => "prune",
        }
    }

    pub fn pre_label(&self) -> String {
        format!("{}-pre", self.as_str())
    }

    pub fn post_label(&self) -> String {
        format!("{}-post", self.as_str())
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs the commands found in container labels
#[derive(Clone)]
pub struct LabeledCommands {
    runtime: Arc<dyn ContainerRuntime>,
    exec_label: Option<String>,
    forward_output: bool,
}

impl LabeledCommands {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            exec_label: None,
            forward_output: false,
        }
    }

    /// Only consider containers whose `docker-volume-backup.exec-label` matches
    pub fn with_exec_label(mut self, exec_label: Option<String>) -> Self {
        self.exec_label = exec_label;
        self
    }

    pub fn with_forward_output(mut self, forward_output: bool) -> Self {
        self.forward_output = forward_output;
        self
    }

    /// Run `f` between the phase's pre and post commands
    ///
    /// A failing pre command skips `f`. A failing post command is reported
    /// together with the error of `f` instead of replacing it.
    pub fn with_labeled_commands<T>(&self, phase: Phase, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.run(&phase.pre_label())
            .with_context(|| format!("Failed running {} commands", phase.pre_label()))?;

        let result = f();
        let post = self.run(&phase.post_label());

        match (result, post) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(post_err)) => {
                Err(post_err.context(format!("Failed running {} commands", phase.post_label())))
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(post_err)) => Err(e.context(format!(
                "{} commands failed as well: {:#}",
                phase.post_label(),
                post_err
            ))),
        }
    }

    /// Run the commands of every container carrying `docker-volume-backup.<label>`
    ///
    /// Commands run concurrently; all of them are awaited and their failures
    /// joined.
    pub fn run(&self, label: &str) -> Result<()> {
        let command_label = format!("{}.{}", LABEL_PREFIX, label);
        let mut containers = self.containers_with(&command_label)?;

        if containers.is_empty() && label.starts_with("archive-") {
            // exec-pre/exec-post predate the per-phase labels
            let legacy = format!("{}.exec-{}", LABEL_PREFIX, label.trim_start_matches("archive-"));
            containers = self.containers_with(&legacy)?;
            if !containers.is_empty() {
                warn!(
                    "Using {} is deprecated and will be removed in a future version, use {} instead",
                    legacy, command_label
                );
                return self.exec_all(&containers, &legacy);
            }
        }

        if containers.is_empty() {
            return Ok(());
        }

        self.exec_all(&containers, &command_label)
    }

    fn containers_with(&self, label: &str) -> Result<Vec<ContainerSummary>> {
        let containers = self
            .runtime
            .list_containers(Some(&LabelFilter::key(label)))
            .with_context(|| format!("Failed to query for containers labeled {}", label))?;

        Ok(containers
            .into_iter()
            .filter(|container| match self.exec_label {
                Some(ref exec_label) => container.labels.get(EXEC_LABEL) == Some(exec_label),
                None => true,
            })
            .collect())
    }

    fn exec_all(&self, containers: &[ContainerSummary], label: &str) -> Result<()> {
        info!("Running {} command(s) in {} container(s)", label, containers.len());
        let user_label = format!("{}.user", label);

        let outcomes: Vec<Result<()>> = thread::scope(|scope| {
            let handles: Vec<_> = containers
                .iter()
                .map(|container| {
                    let user_label = &user_label;
                    scope.spawn(move || self.exec_one(container, label, user_label))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("command thread panicked")))
                })
                .collect()
        });

        let errors: ErrorList = outcomes.into_iter().filter_map(Result::err).collect::<Vec<_>>().into();
        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("{} command(s) failed: {}", errors.len(), errors)
        }
    }

    fn exec_one(&self, container: &ContainerSummary, label: &str, user_label: &str) -> Result<()> {
        let Some(command) = container.labels.get(label) else {
            return Ok(());
        };
        let user = container.labels.get(user_label).map(String::as_str);

        let output = self
            .runtime
            .exec(&container.id, command, user)
            .with_context(|| format!("Failed to run {} command in container {}", label, container.name))?;

        if self.forward_output {
            for line in output.stdout.lines().chain(output.stderr.lines()) {
                info!("[{}] {}", container.name, line);
            }
        }
        Ok(())
    }
}
