//! Scripted remote host for lifecycle tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use rdock_core::error::RemoteError;
use rdock_core::service::{ManagedService, ServiceConfig, ServiceKind, ServiceSpec, ServiceStatus};
use rdock_core::traits::RemoteExecution;
use rdock_services::{ManagerSettings, ServiceLifecycleManager, SnapshotStore};

#[derive(Default)]
pub struct FakeRemote {
    commands: Mutex<Vec<String>>,
    /// Command prefix -> (exit status, output)
    failures: Mutex<Vec<(String, i32, String)>>,
    panic_prefix: Mutex<Option<String>>,
    tunnels: Mutex<HashMap<String, (u16, u16)>>,
    tunnel_calls: Mutex<Vec<String>>,
    /// When set, `docker run` waits for a permit
    deploy_gate: Mutex<Option<Arc<Semaphore>>>,
    deploy_delay: Mutex<Duration>,
    containers: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, prefix: &str, status: i32, output: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((prefix.to_string(), status, output.to_string()));
    }

    pub fn panic_on(&self, prefix: &str) {
        *self.panic_prefix.lock().unwrap() = Some(prefix.to_string());
    }

    /// Hold every deployment until permits are added to the returned gate
    pub fn gate_deployments(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.deploy_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn slow_deployments(&self, delay: Duration) {
        *self.deploy_delay.lock().unwrap() = delay;
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn tunnel(&self, id: &str) -> Option<(u16, u16)> {
        self.tunnels.lock().unwrap().get(id).copied()
    }

    pub fn tunnel_calls(&self) -> Vec<String> {
        self.tunnel_calls.lock().unwrap().clone()
    }

    fn scripted_failure(&self, command: &str) -> Option<RemoteError> {
        self.failures
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _, _)| command.starts_with(prefix.as_str()))
            .map(|(_, status, output)| RemoteError::Exit {
                status: Some(*status),
                output: output.clone(),
            })
    }
}

#[async_trait]
impl RemoteExecution for FakeRemote {
    async fn execute_command(&self, command: &str) -> Result<String, RemoteError> {
        self.commands.lock().unwrap().push(command.to_string());

        let panic_prefix = self.panic_prefix.lock().unwrap().clone();
        if let Some(prefix) = panic_prefix {
            if command.starts_with(&prefix) {
                panic!("scripted panic for {command}");
            }
        }

        if command.starts_with("docker run") {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            let gate = self.deploy_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.acquire().await.unwrap().forget();
            }
            let delay = *self.deploy_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        if let Some(err) = self.scripted_failure(command) {
            return Err(err);
        }

        if command.starts_with("docker run") {
            let n = self.containers.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(format!("container-{n}\n"));
        }
        if command.starts_with("docker logs") {
            return Ok("2024-01-01T00:00:00Z listening\n".to_string());
        }
        Ok(String::new())
    }

    async fn create_tunnel(
        &self,
        service_id: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<(), RemoteError> {
        self.tunnel_calls
            .lock()
            .unwrap()
            .push(format!("open {service_id}"));
        self.tunnels
            .lock()
            .unwrap()
            .insert(service_id.to_string(), (local_port, remote_port));
        Ok(())
    }

    async fn close_tunnel(&self, service_id: &str) -> Result<(), RemoteError> {
        self.tunnel_calls
            .lock()
            .unwrap()
            .push(format!("close {service_id}"));
        self.tunnels.lock().unwrap().remove(service_id);
        Ok(())
    }

    fn tunnel_endpoint(&self, service_id: &str) -> Result<String, RemoteError> {
        self.tunnel(service_id)
            .map(|(local, _)| format!("localhost:{local}"))
            .ok_or_else(|| RemoteError::TunnelNotFound(service_id.to_string()))
    }
}

pub fn settings() -> ManagerSettings {
    ManagerSettings {
        base_port: 9000,
        max_concurrent_deployments: 4,
        default_log_lines: 50,
    }
}

pub fn manager(state_file: &Path) -> ServiceLifecycleManager {
    ServiceLifecycleManager::new(SnapshotStore::new(state_file), settings())
}

pub fn spec(name: &str, kind: ServiceKind, image: &str) -> ServiceSpec {
    ServiceSpec::new(name, ServiceConfig::new(image, kind))
}

pub fn fs_spec(name: &str) -> ServiceSpec {
    spec(name, ServiceKind::Filesystem, "mcp/filesystem:latest")
}

/// Create a service and wait for its deployment
pub async fn deployed(
    manager: &ServiceLifecycleManager,
    remote: &Arc<FakeRemote>,
    spec: ServiceSpec,
) -> ManagedService {
    let created = manager.create(remote.clone(), spec).await.unwrap();
    manager.wait_for_deployments().await;
    let service = manager.get(&created.id).await.unwrap();
    assert_eq!(service.status, ServiceStatus::Running);
    service
}
