//! Service lifecycle manager
//!
//! State machine of a managed service:
//!
//! ```text
//! create ──> creating ──deployed──> running <──start/stop──> stopped
//!               │
//!               └──failed──> error
//! ```
//!
//! Running, stopped and error services can be deleted. Every transition is
//! applied under the index write lock and followed by a snapshot write.
//! Remote commands run without holding the lock.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::task::TaskTracker;

use rdock_core::config::ServicesConfig;
use rdock_core::error::ServiceError;
use rdock_core::service::{ManagedService, ServiceSpec, ServiceStatus, TransportMode};
use rdock_core::time::current_time_millis;
use rdock_core::traits::RemoteExecution;

use crate::allocate::{next_port, service_id};
use crate::command::{launch_command, logs_command, remove_command, start_command, stop_command};
use crate::info::{ConnectionInfo, LogEntry};
use crate::store::SnapshotStore;

/// Tunables of the lifecycle manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Port of the first service
    pub base_port: u16,
    /// Deployments allowed to run at the same time
    pub max_concurrent_deployments: usize,
    /// Log lines fetched when the caller does not say
    pub default_log_lines: usize,
}

impl From<&ServicesConfig> for ManagerSettings {
    fn from(config: &ServicesConfig) -> Self {
        Self {
            base_port: config.base_port,
            max_concurrent_deployments: config.max_concurrent_deployments.max(1),
            default_log_lines: config.default_log_lines,
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from(&ServicesConfig::default())
    }
}

/// The service index and where it is persisted
struct Index {
    services: RwLock<HashMap<String, ManagedService>>,
    store: SnapshotStore,
}

impl Index {
    /// Write the snapshot; failures are logged and otherwise ignored
    async fn persist(&self, services: &HashMap<String, ManagedService>) {
        let all: Vec<ManagedService> = services.values().cloned().collect();
        if let Err(e) = self.store.save(&all).await {
            tracing::warn!("Failed to save service snapshot: {}", e);
        }
    }

    /// Mutate one record and persist. Returns the updated copy, or `None`
    /// if the record no longer exists.
    async fn update(
        &self,
        id: &str,
        apply: impl FnOnce(&mut ManagedService),
    ) -> Option<ManagedService> {
        let mut services = self.services.write().await;
        let service = services.get_mut(id)?;
        apply(service);
        let updated = service.clone();
        self.persist(&services).await;
        Some(updated)
    }

    async fn set_status(&self, id: &str, status: ServiceStatus) -> Option<ManagedService> {
        self.update(id, |s| s.status = status).await
    }
}

/// Owns the managed services and drives their lifecycle
pub struct ServiceLifecycleManager {
    index: Arc<Index>,
    settings: ManagerSettings,
    deployments: TaskTracker,
    deploy_slots: Arc<Semaphore>,
}

impl ServiceLifecycleManager {
    /// Manager with an empty index that persists to `store`
    pub fn new(store: SnapshotStore, settings: ManagerSettings) -> Self {
        Self::with_services(store, settings, HashMap::new())
    }

    /// Manager initialised from the snapshot in `store`.
    ///
    /// An unreadable snapshot is logged and treated as empty. Services whose
    /// deployment was cut short by a restart come back as errored.
    pub async fn load(store: SnapshotStore, settings: ManagerSettings) -> Self {
        let loaded = match store.load().await {
            Ok(services) => services,
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable service snapshot {:?}: {}",
                    store.path(),
                    e
                );
                Vec::new()
            }
        };

        let mut services = HashMap::with_capacity(loaded.len());
        for mut service in loaded {
            if service.status == ServiceStatus::Creating {
                tracing::warn!(
                    "Service {} was still deploying at shutdown, marking it as failed",
                    service.id
                );
                service.status = ServiceStatus::Error;
            }
            services.insert(service.id.clone(), service);
        }

        tracing::info!("Loaded {} managed services from {:?}", services.len(), store.path());
        Self::with_services(store, settings, services)
    }

    fn with_services(
        store: SnapshotStore,
        settings: ManagerSettings,
        services: HashMap<String, ManagedService>,
    ) -> Self {
        let permits = settings.max_concurrent_deployments.max(1);
        Self {
            index: Arc::new(Index {
                services: RwLock::new(services),
                store,
            }),
            settings,
            deployments: TaskTracker::new(),
            deploy_slots: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Register a new service and start deploying it in the background.
    ///
    /// Returns immediately with the record in `creating` state; the outcome
    /// of the deployment shows up in [`get`](Self::get) and
    /// [`list`](Self::list).
    pub async fn create(
        &self,
        remote: Arc<dyn RemoteExecution>,
        spec: ServiceSpec,
    ) -> Result<ManagedService, ServiceError> {
        let service = {
            let mut services = self.index.services.write().await;
            let port = next_port(services.values().map(|s| s.port), self.settings.base_port)?;
            let id = service_id(spec.config.kind(), |id| services.contains_key(id));

            let service = ManagedService {
                id,
                name: spec.name,
                status: ServiceStatus::Creating,
                remote_handle: None,
                port,
                created_at: current_time_millis(),
                config: spec.config,
            };
            services.insert(service.id.clone(), service.clone());
            self.index.persist(&services).await;
            service
        };

        tracing::info!(
            "Created {} service {} ({}) on port {}",
            service.kind(),
            service.id,
            service.name,
            service.port
        );
        self.spawn_deployment(remote, service.clone());
        Ok(service)
    }

    pub async fn get(&self, id: &str) -> Result<ManagedService, ServiceError> {
        self.index
            .services
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    /// All services, ordered by port
    pub async fn list(&self) -> Vec<ManagedService> {
        let mut all: Vec<ManagedService> =
            self.index.services.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.port.cmp(&b.port).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Start a stopped service. Starting a running service does nothing.
    pub async fn start(
        &self,
        remote: &dyn RemoteExecution,
        id: &str,
    ) -> Result<ManagedService, ServiceError> {
        let current = self.get(id).await?;
        match current.status {
            ServiceStatus::Running => return Ok(current),
            ServiceStatus::Stopped => {}
            status => return Err(invalid_state(id, status, "start")),
        }

        let handle = require_handle(&current)?;
        remote.execute_command(&start_command(handle)).await?;

        let updated = self
            .index
            .set_status(id, ServiceStatus::Running)
            .await
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;
        tracing::info!("Started service {}", id);

        open_tunnel(remote, &updated).await;
        Ok(updated)
    }

    /// Stop a running service. Stopping a stopped service does nothing.
    pub async fn stop(
        &self,
        remote: &dyn RemoteExecution,
        id: &str,
    ) -> Result<ManagedService, ServiceError> {
        let current = self.get(id).await?;
        match current.status {
            ServiceStatus::Stopped => return Ok(current),
            ServiceStatus::Running => {}
            status => return Err(invalid_state(id, status, "stop")),
        }

        let handle = require_handle(&current)?;
        remote.execute_command(&stop_command(handle)).await?;

        let updated = self
            .index
            .set_status(id, ServiceStatus::Stopped)
            .await
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;
        tracing::info!("Stopped service {}", id);

        close_tunnel(remote, &current).await;
        Ok(updated)
    }

    /// Remove a service and its container.
    ///
    /// Remote failures while stopping or removing the container are logged;
    /// the record is dropped regardless.
    pub async fn delete(&self, remote: &dyn RemoteExecution, id: &str) -> Result<(), ServiceError> {
        let current = self.get(id).await?;
        match current.status {
            ServiceStatus::Creating => return Err(invalid_state(id, current.status, "delete")),
            ServiceStatus::Running => {
                if let Err(e) = self.stop(remote, id).await {
                    tracing::warn!("Failed to stop service {} before deleting it: {}", id, e);
                }
            }
            ServiceStatus::Stopped | ServiceStatus::Error => {}
        }

        if let Some(handle) = &current.remote_handle {
            if let Err(e) = remote.execute_command(&remove_command(handle)).await {
                tracing::warn!("Failed to remove container {} of service {}: {}", handle, id, e);
            }
        }
        if let Err(e) = remote.close_tunnel(id).await {
            tracing::warn!("Failed to close tunnel for service {}: {}", id, e);
        }

        let mut services = self.index.services.write().await;
        services.remove(id);
        self.index.persist(&services).await;
        drop(services);

        tracing::info!("Deleted service {}", id);
        Ok(())
    }

    /// Recent container output as a single log entry
    pub async fn logs(
        &self,
        remote: &dyn RemoteExecution,
        id: &str,
        lines: Option<usize>,
    ) -> Result<Vec<LogEntry>, ServiceError> {
        let service = self.get(id).await?;
        let handle = require_handle(&service)?;
        let lines = lines.unwrap_or(self.settings.default_log_lines);

        let output = remote.execute_command(&logs_command(handle, lines)).await?;
        Ok(vec![LogEntry {
            timestamp: current_time_millis(),
            level: "info".to_string(),
            message: output,
            service_id: service.id,
        }])
    }

    /// How clients reach a running service
    pub async fn connection_info(
        &self,
        remote: &dyn RemoteExecution,
        id: &str,
    ) -> Result<ConnectionInfo, ServiceError> {
        let service = self.get(id).await?;
        if service.status != ServiceStatus::Running {
            return Err(invalid_state(id, service.status, "connect to"));
        }
        Ok(describe(remote, &service).await)
    }

    /// Connection info of every running service
    pub async fn all_connection_info(&self, remote: &dyn RemoteExecution) -> Vec<ConnectionInfo> {
        let mut infos = Vec::new();
        for service in self.list().await {
            if service.status == ServiceStatus::Running {
                infos.push(describe(remote, &service).await);
            }
        }
        infos
    }

    /// Number of deployments still in flight
    pub fn pending_deployments(&self) -> usize {
        self.deployments.len()
    }

    /// Wait until every deployment started so far has finished
    pub async fn wait_for_deployments(&self) {
        self.deployments.close();
        self.deployments.wait().await;
        self.deployments.reopen();
    }

    fn spawn_deployment(&self, remote: Arc<dyn RemoteExecution>, service: ManagedService) {
        let index = Arc::clone(&self.index);
        let slots = Arc::clone(&self.deploy_slots);

        self.deployments.spawn(async move {
            let id = service.id.clone();
            let _permit = slots.acquire_owned().await.ok();

            let outcome = AssertUnwindSafe(deploy(&index, remote.as_ref(), service))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                tracing::error!("Deployment task for service {} panicked", id);
                index.set_status(&id, ServiceStatus::Error).await;
            }
        });
    }
}

/// Run the container for `service` and record the outcome
async fn deploy(index: &Index, remote: &dyn RemoteExecution, service: ManagedService) {
    let command = launch_command(&service);
    tracing::debug!("Deploying service {}: {}", service.id, command);

    let output = match remote.execute_command(&command).await {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("Failed to deploy service {}: {}", service.id, e);
            index.set_status(&service.id, ServiceStatus::Error).await;
            return;
        }
    };

    // `docker run -d` prints the container id first; pull progress may follow
    let Some(handle) = output.trim().lines().next().map(|l| l.trim().to_string()) else {
        tracing::error!("Deployment of service {} returned no container id", service.id);
        index.set_status(&service.id, ServiceStatus::Error).await;
        return;
    };

    let deployed = index
        .update(&service.id, |s| {
            s.remote_handle = Some(handle.clone());
            s.status = ServiceStatus::Running;
        })
        .await;

    let Some(deployed) = deployed else {
        tracing::warn!(
            "Service {} was deleted while deploying, removing container {}",
            service.id,
            handle
        );
        if let Err(e) = remote.execute_command(&remove_command(&handle)).await {
            tracing::warn!("Failed to remove orphaned container {}: {}", handle, e);
        }
        return;
    };

    tracing::info!("Service {} is running in container {}", deployed.id, handle);
    open_tunnel(remote, &deployed).await;
}

/// Forward the service port locally; stdio services have nothing to forward
async fn open_tunnel(remote: &dyn RemoteExecution, service: &ManagedService) {
    if service.config.transport_mode() == TransportMode::Stdio {
        return;
    }
    if let Err(e) = remote
        .create_tunnel(&service.id, service.port, service.port)
        .await
    {
        tracing::warn!("Failed to create tunnel for service {}: {}", service.id, e);
    }
}

/// Cancel the service's forward, including one registered by an earlier process
async fn close_tunnel(remote: &dyn RemoteExecution, service: &ManagedService) {
    if remote.tunnel_endpoint(&service.id).is_err() {
        open_tunnel(remote, service).await;
    }
    if let Err(e) = remote.close_tunnel(&service.id).await {
        tracing::warn!("Failed to close tunnel for service {}: {}", service.id, e);
    }
}

/// Connection info, reopening the tunnel when this process holds none
async fn describe(remote: &dyn RemoteExecution, service: &ManagedService) -> ConnectionInfo {
    if remote.tunnel_endpoint(&service.id).is_err() {
        open_tunnel(remote, service).await;
    }
    ConnectionInfo::for_service(service, remote.tunnel_endpoint(&service.id).ok())
}

fn require_handle(service: &ManagedService) -> Result<&str, ServiceError> {
    service
        .remote_handle
        .as_deref()
        .ok_or_else(|| ServiceError::MissingHandle(service.id.clone()))
}

fn invalid_state(id: &str, status: ServiceStatus, operation: &'static str) -> ServiceError {
    ServiceError::InvalidState {
        id: id.to_string(),
        status,
        operation,
    }
}
