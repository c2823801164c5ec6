//! Pausing labeled containers and swarm services for the duration of a backup
//!
//! [`WorkloadController::stop_containers_and_services`] stops every container
//! and scales down every swarm service carrying the stop label. It hands back
//! a [`PausedWorkloads`] handle that brings all of them back, either through
//! [`PausedWorkloads::restore`] or when the handle is dropped.

use crate::error::{BackupError, ErrorList};
use crate::managers::stats::{ContainersStats, ServicesStats, SharedStats};
use crate::utils::docker_ops::{ContainerRuntime, ContainerSummary, LabelFilter, ServiceMode};
use anyhow::Context;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const STOP_DURING_BACKUP_LABEL: &str = "docker-volume-backup.stop-during-backup";
pub const SWARM_SERVICE_ID_LABEL: &str = "com.docker.swarm.service.id";
pub const SWARM_SERVICE_NAME_LABEL: &str = "com.docker.swarm.service.name";

/// Interval between two checks of a service's running container count
pub const CONVERGENCE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A container that was stopped
#[derive(Debug, Clone)]
pub struct HandledContainer {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// A service that was scaled down, with the replica count to restore
#[derive(Debug, Clone)]
pub struct HandledSwarmService {
    pub id: String,
    pub name: String,
    pub initial_replicas: u64,
}

#[derive(Clone)]
struct Convergence {
    runtime: Arc<dyn ContainerRuntime>,
    timeout: Duration,
    poll_interval: Duration,
}

impl Convergence {
    /// Block until the service runs exactly `count` containers
    fn wait(&self, service_id: &str, service_name: &str, count: usize) -> Result<(), BackupError> {
        let filter = LabelFilter::new(SWARM_SERVICE_ID_LABEL, service_id);
        let start = Instant::now();

        loop {
            let running = self
                .runtime
                .count_containers(&filter)
                .with_context(|| format!("Failed to count containers of service {}", service_name))
                .map_err(BackupError::RuntimeQuery)?;
            if running == count {
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(BackupError::ConvergenceTimeout {
                    service: service_name.to_string(),
                    count,
                    timeout: self.timeout,
                });
            }
            thread::sleep(self.poll_interval.min(self.timeout - elapsed));
        }
    }
}

/// Stops and restores the workloads labeled for the backup
pub struct WorkloadController {
    convergence: Convergence,
    label_value: String,
}

impl WorkloadController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        label_value: impl Into<String>,
        service_timeout: Duration,
    ) -> Self {
        Self {
            convergence: Convergence {
                runtime,
                timeout: service_timeout,
                poll_interval: CONVERGENCE_POLL_INTERVAL,
            },
            label_value: label_value.into(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.convergence.poll_interval = interval;
        self
    }

    fn runtime(&self) -> &dyn ContainerRuntime {
        self.convergence.runtime.as_ref()
    }

    /// Stop labeled containers and scale labeled services to zero
    ///
    /// The returned handle restores whatever was stopped, also when an error
    /// is returned next to it. Query failures and conflicting labels abort
    /// before anything is touched and come back with an empty handle.
    pub fn stop_containers_and_services(
        &self,
        stats: &SharedStats,
    ) -> (PausedWorkloads, Option<BackupError>) {
        let mut paused = PausedWorkloads::empty(self.convergence.clone());
        match self.stop_all(stats, &mut paused) {
            Ok(()) => (paused, None),
            Err(e) => (paused, Some(e)),
        }
    }

    fn stop_all(&self, stats: &SharedStats, paused: &mut PausedWorkloads) -> Result<(), BackupError> {
        let runtime = self.runtime();
        let query = |e: anyhow::Error| BackupError::RuntimeQuery(e);

        let is_swarm = runtime
            .is_swarm_manager()
            .context("Failed to determine swarm state")
            .map_err(query)?;

        let filter = LabelFilter::new(STOP_DURING_BACKUP_LABEL, self.label_value.clone());
        let all_containers = runtime
            .list_containers(None)
            .context("Failed to query for containers")
            .map_err(query)?;
        let containers_to_stop = runtime
            .list_containers(Some(&filter))
            .context("Failed to query for containers to stop")
            .map_err(query)?;

        let (all_services, services_to_scale) = if is_swarm {
            let all = runtime
                .list_services(None)
                .context("Failed to query for services")
                .map_err(query)?;
            let labeled = runtime
                .list_services(Some(&filter))
                .context("Failed to query for services to scale down")
                .map_err(query)?;
            (all, labeled)
        } else {
            (Vec::new(), Vec::new())
        };

        // Counts are known now, record them before any precondition can bail out
        self.record_stats(
            stats,
            all_containers.len(),
            containers_to_stop.len(),
            0,
            all_services.len(),
            services_to_scale.len(),
            0,
        );

        if containers_to_stop.is_empty() && services_to_scale.is_empty() {
            info!("No containers or services labeled for stopping during backup");
            return Ok(());
        }

        if is_swarm {
            self.check_conflicting_labels(&containers_to_stop)?;
        }

        if !containers_to_stop.is_empty() {
            info!(
                "Stopping {} out of {} running container(s) as they were labeled {}={}",
                containers_to_stop.len(),
                all_containers.len(),
                STOP_DURING_BACKUP_LABEL,
                self.label_value
            );
        }

        let mut errors = ErrorList::new();
        let mut stop_errors = 0;
        for container in &containers_to_stop {
            match runtime.stop_container(&container.id) {
                Ok(()) => paused.containers.push(HandledContainer {
                    id: container.id.clone(),
                    name: container.name.clone(),
                    labels: container.labels.clone(),
                }),
                Err(e) => {
                    stop_errors += 1;
                    errors.push(e.context(format!("Failed to stop container {}", container.name)));
                }
            }
        }

        if !services_to_scale.is_empty() {
            info!(
                "Scaling down {} out of {} active service(s) as they were labeled {}={}",
                services_to_scale.len(),
                all_services.len(),
                STOP_DURING_BACKUP_LABEL,
                self.label_value
            );
        }

        let mut scale_errors = 0;
        let outcomes: Vec<(Option<HandledSwarmService>, Option<anyhow::Error>)> = thread::scope(|scope| {
            let handles: Vec<_> = services_to_scale
                .iter()
                .map(|service| scope.spawn(move || self.scale_down(&service.id)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        (None, Some(anyhow::anyhow!("service scale down thread panicked")))
                    })
                })
                .collect()
        });
        for (handled, error) in outcomes {
            if let Some(handled) = handled {
                paused.services.push(handled);
            }
            if let Some(error) = error {
                scale_errors += 1;
                errors.push(error);
            }
        }

        let stopped = paused.containers.len();
        let scaled_down = paused.services.len();
        self.record_stats(
            stats,
            all_containers.len(),
            containers_to_stop.len(),
            stop_errors,
            all_services.len(),
            services_to_scale.len(),
            scale_errors,
        );
        {
            let mut stats = stats.lock();
            stats.containers.stopped = stopped;
            stats.services.scaled_down = scaled_down;
        }

        if stopped > 0 {
            info!("Stopped {} container(s)", stopped);
        }
        if scaled_down > 0 {
            info!("Scaled down {} service(s)", scaled_down);
        }

        errors.into_result(BackupError::StopFailed)
    }

    /// Fail when a labeled container belongs to a service that is labeled itself
    fn check_conflicting_labels(&self, containers: &[ContainerSummary]) -> Result<(), BackupError> {
        for container in containers {
            let Some(service_id) = container.labels.get(SWARM_SERVICE_ID_LABEL) else {
                continue;
            };

            let parent = self
                .runtime()
                .inspect_service(service_id)
                .with_context(|| format!("Failed to inspect parent service of container {}", container.name))
                .map_err(BackupError::RuntimeQuery)?;

            if parent.labels.contains_key(STOP_DURING_BACKUP_LABEL) {
                return Err(BackupError::ConflictingLabels {
                    container: container.name.clone(),
                    service: parent.name,
                });
            }
        }
        Ok(())
    }

    /// Scale one service to zero and wait for its containers to go away
    ///
    /// The service counts as handled as soon as the scale call succeeded.
    fn scale_down(&self, service_id: &str) -> (Option<HandledSwarmService>, Option<anyhow::Error>) {
        let runtime = self.runtime();

        let service = match runtime.inspect_service(service_id) {
            Ok(service) => service,
            Err(e) => return (None, Some(e.context(format!("Failed to inspect service {}", service_id)))),
        };

        let initial_replicas = match service.mode {
            ServiceMode::Replicated { replicas } => replicas,
            _ => {
                let e = anyhow::anyhow!(
                    "Service {} is not replicated and cannot be scaled down",
                    service.name
                );
                return (None, Some(e));
            }
        };

        if let Err(e) = runtime.scale_service(&service.id, 0) {
            return (None, Some(e.context(format!("Failed to scale down service {}", service.name))));
        }

        let handled = HandledSwarmService {
            id: service.id.clone(),
            name: service.name.clone(),
            initial_replicas,
        };

        match self.convergence.wait(&service.id, &service.name, 0) {
            Ok(()) => (Some(handled), None),
            Err(e) => (Some(handled), Some(e.into())),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_stats(
        &self,
        stats: &SharedStats,
        all_containers: usize,
        to_stop: usize,
        stop_errors: usize,
        all_services: usize,
        to_scale_down: usize,
        scale_down_errors: usize,
    ) {
        let mut stats = stats.lock();
        stats.containers = ContainersStats {
            all: all_containers,
            to_stop,
            stopped: 0,
            stop_errors,
        };
        stats.services = ServicesStats {
            all: all_services,
            to_scale_down,
            scaled_down: 0,
            scale_down_errors,
        };
    }
}

/// Containers and services stopped for a backup, pending restore
///
/// Dropping the handle without calling [`PausedWorkloads::restore`] still
/// restores everything and logs any failure.
pub struct PausedWorkloads {
    convergence: Convergence,
    containers: Vec<HandledContainer>,
    services: Vec<HandledSwarmService>,
}

impl PausedWorkloads {
    fn empty(convergence: Convergence) -> Self {
        Self {
            convergence,
            containers: Vec::new(),
            services: Vec::new(),
        }
    }

    pub fn containers(&self) -> &[HandledContainer] {
        &self.containers
    }

    pub fn services(&self) -> &[HandledSwarmService] {
        &self.services
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty() && self.services.is_empty()
    }

    /// Restart stopped containers and scale services back up
    pub fn restore(mut self) -> Result<(), BackupError> {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> Result<(), BackupError> {
        let containers = std::mem::take(&mut self.containers);
        let services = std::mem::take(&mut self.services);
        if containers.is_empty() && services.is_empty() {
            return Ok(());
        }

        let runtime = self.convergence.runtime.as_ref();
        let mut errors = ErrorList::new();

        // Swarm tasks cannot be restarted directly, their service gets redeployed instead
        let mut swarm_services: Vec<&str> = Vec::new();
        let mut restarted = 0;
        for container in &containers {
            if let Some(service_name) = container.labels.get(SWARM_SERVICE_NAME_LABEL) {
                if !swarm_services.contains(&service_name.as_str()) {
                    swarm_services.push(service_name);
                }
                continue;
            }
            match runtime.start_container(&container.id) {
                Ok(()) => restarted += 1,
                Err(e) => errors.push(e.context(format!("Failed to restart container {}", container.name))),
            }
        }

        for service_name in swarm_services {
            if let Err(e) = self.force_update(service_name) {
                errors.push(e);
            }
        }

        if restarted > 0 {
            info!("Restarted {} container(s)", restarted);
        }

        let convergence = &self.convergence;
        let outcomes: Vec<Option<anyhow::Error>> = thread::scope(|scope| {
            let handles: Vec<_> = services
                .iter()
                .map(|service| scope.spawn(move || scale_up(convergence, service).err()))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Some(anyhow::anyhow!("service scale up thread panicked"))
                    })
                })
                .collect()
        });
        let scaled_up = outcomes.iter().filter(|outcome| outcome.is_none()).count();
        for error in outcomes.into_iter().flatten() {
            errors.push(error);
        }

        if scaled_up > 0 {
            info!("Scaled {} service(s) back up", scaled_up);
        }

        errors.into_result(BackupError::RestoreFailed)
    }

    fn force_update(&self, service_name: &str) -> anyhow::Result<()> {
        let runtime = self.convergence.runtime.as_ref();
        let service = runtime
            .list_services(None)
            .with_context(|| format!("Failed to look up service {}", service_name))?
            .into_iter()
            .find(|service| service.name == service_name)
            .with_context(|| format!("Service {} no longer exists", service_name))?;

        runtime
            .force_update_service(&service.id)
            .with_context(|| format!("Failed to force update service {}", service_name))
    }
}

fn scale_up(convergence: &Convergence, service: &HandledSwarmService) -> anyhow::Result<()> {
    convergence
        .runtime
        .scale_service(&service.id, service.initial_replicas)
        .with_context(|| {
            format!(
                "Failed to scale service {} back to {} replica(s)",
                service.name, service.initial_replicas
            )
        })?;

    convergence.wait(&service.id, &service.name, service.initial_replicas as usize)?;
    Ok(())
}

impl Drop for PausedWorkloads {
    fn drop(&mut self) {
        if self.is_empty() {
            return;
        }
        warn!("Restoring paused containers and services during cleanup");
        if let Err(e) = self.restore_inner() {
            error!("Failed to restore containers and services: {}", e);
        }
    }
}
