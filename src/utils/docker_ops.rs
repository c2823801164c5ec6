//! Container runtime abstraction
//!
//! The pause/resume controller and the labeled command runner only talk to
//! the runtime through [`ContainerRuntime`], which keeps them independent of
//! how Docker is reached and lets tests substitute [`mock::MockDockerOps`].

use super::executor::{CommandExecutor, RealExecutor};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Label selector passed to `--filter label=...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    pub key: String,
    pub value: Option<String>,
}

impl LabelFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Match any value of `key`
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn to_filter_arg(&self) -> String {
        match self.value {
            Some(ref value) => format!("label={}={}", self.key, value),
            None => format!("label={}", self.key),
        }
    }

    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match (labels.get(&self.key), &self.value) {
            (Some(actual), Some(expected)) => actual == expected,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    Replicated { replicas: u64 },
    Global,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSummary {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub mode: ServiceMode,
}

impl ServiceSummary {
    pub fn replicas(&self) -> Option<u64> {
        match self.mode {
            ServiceMode::Replicated { replicas } => Some(replicas),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Abstraction over the container runtime, enabling mocking in tests
pub trait ContainerRuntime: Send + Sync {
    /// Whether the daemon runs in swarm mode with this node as a manager
    fn is_swarm_manager(&self) -> Result<bool>;

    /// List running containers, optionally filtered by label
    fn list_containers(&self, filter: Option<&LabelFilter>) -> Result<Vec<ContainerSummary>>;

    /// Count running containers matching `filter`
    fn count_containers(&self, filter: &LabelFilter) -> Result<usize>;

    fn stop_container(&self, id: &str) -> Result<()>;

    fn start_container(&self, id: &str) -> Result<()>;

    /// List swarm services, optionally filtered by label
    fn list_services(&self, filter: Option<&LabelFilter>) -> Result<Vec<ServiceSummary>>;

    fn inspect_service(&self, id: &str) -> Result<ServiceSummary>;

    /// Set the replica count of a replicated service without waiting
    fn scale_service(&self, id: &str, replicas: u64) -> Result<()>;

    /// Force the service to redeploy its tasks
    fn force_update_service(&self, id: &str) -> Result<()>;

    /// Run a shell command inside a running container
    fn exec(&self, container_id: &str, command: &str, user: Option<&str>) -> Result<ExecOutput>;
}

/// Default implementation using the docker CLI
#[derive(Clone)]
pub struct RealDockerOps {
    executor: Arc<dyn CommandExecutor>,
}

impl RealDockerOps {
    pub fn new() -> Self {
        Self::with_executor(Arc::new(RealExecutor::new()))
    }

    pub fn with_executor(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

impl Default for RealDockerOps {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime for RealDockerOps {
    fn is_swarm_manager(&self) -> Result<bool> {
        super::docker::is_swarm_manager(self.executor.as_ref())
    }

    fn list_containers(&self, filter: Option<&LabelFilter>) -> Result<Vec<ContainerSummary>> {
        super::docker::list_containers(self.executor.as_ref(), filter)
    }

    fn count_containers(&self, filter: &LabelFilter) -> Result<usize> {
        super::docker::count_containers(self.executor.as_ref(), filter)
    }

    fn stop_container(&self, id: &str) -> Result<()> {
        super::docker::stop_container(self.executor.as_ref(), id)
    }

    fn start_container(&self, id: &str) -> Result<()> {
        super::docker::start_container(self.executor.as_ref(), id)
    }

    fn list_services(&self, filter: Option<&LabelFilter>) -> Result<Vec<ServiceSummary>> {
        super::docker::list_services(self.executor.as_ref(), filter)
    }

    fn inspect_service(&self, id: &str) -> Result<ServiceSummary> {
        super::docker::inspect_service(self.executor.as_ref(), id)
    }

    fn scale_service(&self, id: &str, replicas: u64) -> Result<()> {
        super::docker::scale_service(self.executor.as_ref(), id, replicas)
    }

    fn force_update_service(&self, id: &str) -> Result<()> {
        super::docker::force_update_service(self.executor.as_ref(), id)
    }

    fn exec(&self, container_id: &str, command: &str, user: Option<&str>) -> Result<ExecOutput> {
        super::docker::exec(self.executor.as_ref(), container_id, command, user)
    }
}

/// Mock implementation for testing
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// Label docker sets on swarm task containers
    pub const SERVICE_ID_LABEL: &str = "com.docker.swarm.service.id";
    pub const SERVICE_NAME_LABEL: &str = "com.docker.swarm.service.name";

    /// Recorded runtime call
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum DockerCall {
        IsSwarmManager,
        ListContainers { filter: Option<String> },
        CountContainers { filter: String },
        StopContainer { id: String },
        StartContainer { id: String },
        ListServices { filter: Option<String> },
        InspectService { id: String },
        ScaleService { id: String, replicas: u64 },
        ForceUpdateService { id: String },
        Exec { container: String, command: String, user: Option<String> },
    }

    #[derive(Clone, Debug)]
    struct MockContainer {
        summary: ContainerSummary,
        running: bool,
    }

    #[derive(Default)]
    struct State {
        swarm: bool,
        containers: Vec<MockContainer>,
        services: Vec<ServiceSummary>,
        failing_stops: HashSet<String>,
        failing_starts: HashSet<String>,
        failing_scales: HashSet<String>,
        stuck_services: HashSet<String>,
        failing_execs: HashSet<String>,
        failing_list: bool,
    }

    /// Mock runtime keeping containers and services in memory
    ///
    /// Scaling a service starts or stops its task containers immediately
    /// unless the service was marked as stuck.
    #[derive(Clone, Default)]
    pub struct MockDockerOps {
        /// Recorded operation calls
        pub calls: Arc<Mutex<Vec<DockerCall>>>,
        state: Arc<Mutex<State>>,
    }

    impl MockDockerOps {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_swarm(self) -> Self {
            self.state.lock().unwrap().swarm = true;
            self
        }

        /// Add a running container
        pub fn with_container(self, id: &str, labels: &[(&str, &str)]) -> Self {
            self.state.lock().unwrap().containers.push(MockContainer {
                summary: ContainerSummary {
                    id: id.to_string(),
                    name: id.to_string(),
                    labels: labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                },
                running: true,
            });
            self
        }

        /// Add a replicated service with one running task container per replica
        pub fn with_service(self, id: &str, name: &str, replicas: u64, labels: &[(&str, &str)]) -> Self {
            self.add_service(id, name, ServiceMode::Replicated { replicas }, labels);
            for index in 0..replicas {
                let task = format!("{}.{}", name, index + 1);
                self.state.lock().unwrap().containers.push(MockContainer {
                    summary: ContainerSummary {
                        id: task.clone(),
                        name: task,
                        labels: [
                            (SERVICE_ID_LABEL.to_string(), id.to_string()),
                            (SERVICE_NAME_LABEL.to_string(), name.to_string()),
                        ]
                        .into_iter()
                        .collect(),
                    },
                    running: true,
                });
            }
            self
        }

        /// Add a global-mode service without task containers
        pub fn with_global_service(self, id: &str, name: &str, labels: &[(&str, &str)]) -> Self {
            self.add_service(id, name, ServiceMode::Global, labels);
            self
        }

        fn add_service(&self, id: &str, name: &str, mode: ServiceMode, labels: &[(&str, &str)]) {
            self.state.lock().unwrap().services.push(ServiceSummary {
                id: id.to_string(),
                name: name.to_string(),
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                mode,
            });
        }

        pub fn with_failing_stop(self, id: &str) -> Self {
            self.state.lock().unwrap().failing_stops.insert(id.to_string());
            self
        }

        pub fn with_failing_start(self, id: &str) -> Self {
            self.state.lock().unwrap().failing_starts.insert(id.to_string());
            self
        }

        pub fn with_failing_scale(self, service_id: &str) -> Self {
            self.state.lock().unwrap().failing_scales.insert(service_id.to_string());
            self
        }

        /// Scaling succeeds but the task containers never change
        pub fn with_stuck_service(self, service_id: &str) -> Self {
            self.state.lock().unwrap().stuck_services.insert(service_id.to_string());
            self
        }

        pub fn with_failing_exec(self, container_id: &str) -> Self {
            self.state.lock().unwrap().failing_execs.insert(container_id.to_string());
            self
        }

        pub fn with_failing_list(self) -> Self {
            self.state.lock().unwrap().failing_list = true;
            self
        }

        /// Get all recorded calls
        pub fn get_calls(&self) -> Vec<DockerCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count_calls(&self, predicate: impl Fn(&DockerCall) -> bool) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
        }

        pub fn is_running(&self, container_id: &str) -> bool {
            self.state
                .lock()
                .unwrap()
                .containers
                .iter()
                .any(|c| c.summary.id == container_id && c.running)
        }

        pub fn replicas(&self, service_id: &str) -> Option<u64> {
            self.state
                .lock()
                .unwrap()
                .services
                .iter()
                .find(|s| s.id == service_id)
                .and_then(ServiceSummary::replicas)
        }

        /// Number of running task containers of a service
        pub fn running_tasks(&self, service_id: &str) -> usize {
            self.state
                .lock()
                .unwrap()
                .containers
                .iter()
                .filter(|c| c.running && c.summary.labels.get(SERVICE_ID_LABEL).map(String::as_str) == Some(service_id))
                .count()
        }

        fn record_call(&self, call: DockerCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl ContainerRuntime for MockDockerOps {
        fn is_swarm_manager(&self) -> Result<bool> {
            self.record_call(DockerCall::IsSwarmManager);
            Ok(self.state.lock().unwrap().swarm)
        }

        fn list_containers(&self, filter: Option<&LabelFilter>) -> Result<Vec<ContainerSummary>> {
            self.record_call(DockerCall::ListContainers {
                filter: filter.map(LabelFilter::to_filter_arg),
            });
            let state = self.state.lock().unwrap();
            if state.failing_list {
                anyhow::bail!("Mock list_containers failure");
            }
            Ok(state
                .containers
                .iter()
                .filter(|c| c.running && filter.map_or(true, |f| f.matches(&c.summary.labels)))
                .map(|c| c.summary.clone())
                .collect())
        }

        fn count_containers(&self, filter: &LabelFilter) -> Result<usize> {
            self.record_call(DockerCall::CountContainers {
                filter: filter.to_filter_arg(),
            });
            let state = self.state.lock().unwrap();
            if state.failing_list {
                anyhow::bail!("Mock count_containers failure");
            }
            Ok(state
                .containers
                .iter()
                .filter(|c| c.running && filter.matches(&c.summary.labels))
                .count())
        }

        fn stop_container(&self, id: &str) -> Result<()> {
            self.record_call(DockerCall::StopContainer { id: id.to_string() });
            let mut state = self.state.lock().unwrap();
            if state.failing_stops.contains(id) {
                anyhow::bail!("Mock stop failure for container {}", id);
            }
            for container in state.containers.iter_mut().filter(|c| c.summary.id == id) {
                container.running = false;
            }
            Ok(())
        }

        fn start_container(&self, id: &str) -> Result<()> {
            self.record_call(DockerCall::StartContainer { id: id.to_string() });
            let mut state = self.state.lock().unwrap();
            if state.failing_starts.contains(id) {
                anyhow::bail!("Mock start failure for container {}", id);
            }
            for container in state.containers.iter_mut().filter(|c| c.summary.id == id) {
                container.running = true;
            }
            Ok(())
        }

        fn list_services(&self, filter: Option<&LabelFilter>) -> Result<Vec<ServiceSummary>> {
            self.record_call(DockerCall::ListServices {
                filter: filter.map(LabelFilter::to_filter_arg),
            });
            let state = self.state.lock().unwrap();
            if state.failing_list {
                anyhow::bail!("Mock list_services failure");
            }
            Ok(state
                .services
                .iter()
                .filter(|s| filter.map_or(true, |f| f.matches(&s.labels)))
                .cloned()
                .collect())
        }

        fn inspect_service(&self, id: &str) -> Result<ServiceSummary> {
            self.record_call(DockerCall::InspectService { id: id.to_string() });
            self.state
                .lock()
                .unwrap()
                .services
                .iter()
                .find(|s| s.id == id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Mock service {} not found", id))
        }

        fn scale_service(&self, id: &str, replicas: u64) -> Result<()> {
            self.record_call(DockerCall::ScaleService {
                id: id.to_string(),
                replicas,
            });
            let mut state = self.state.lock().unwrap();
            if state.failing_scales.contains(id) {
                anyhow::bail!("Mock scale failure for service {}", id);
            }
            if let Some(service) = state.services.iter_mut().find(|s| s.id == id) {
                service.mode = ServiceMode::Replicated { replicas };
            }
            if !state.stuck_services.contains(id) {
                let tasks = state
                    .containers
                    .iter_mut()
                    .filter(|c| c.summary.labels.get(SERVICE_ID_LABEL).map(String::as_str) == Some(id));
                for (index, task) in tasks.enumerate() {
                    task.running = (index as u64) < replicas;
                }
            }
            Ok(())
        }

        fn force_update_service(&self, id: &str) -> Result<()> {
            self.record_call(DockerCall::ForceUpdateService { id: id.to_string() });
            let mut state = self.state.lock().unwrap();
            if !state.services.iter().any(|s| s.id == id) {
                anyhow::bail!("Mock service {} not found", id);
            }
            // Redeploying brings every task of the service back
            for task in state
                .containers
                .iter_mut()
                .filter(|c| c.summary.labels.get(SERVICE_ID_LABEL).map(String::as_str) == Some(id))
            {
                task.running = true;
            }
            Ok(())
        }

        fn exec(&self, container_id: &str, command: &str, user: Option<&str>) -> Result<ExecOutput> {
            self.record_call(DockerCall::Exec {
                container: container_id.to_string(),
                command: command.to_string(),
                user: user.map(String::from),
            });
            if self.state.lock().unwrap().failing_execs.contains(container_id) {
                anyhow::bail!("Mock exec failure in container {}", container_id);
            }
            Ok(ExecOutput::default())
        }
    }
}
