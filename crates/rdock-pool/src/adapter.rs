//! Per-host remote execution capability with port tunnels

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use rdock_core::error::RemoteError;
use rdock_core::traits::RemoteExecution;
use rdock_core::ConnectionKey;

use crate::executor::CommandExecutor;
use crate::transport::ForwardOp;

/// A port forward registered for a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelInfo {
    pub key: ConnectionKey,
    pub local_port: u16,
    pub remote_port: u16,
}

impl TunnelInfo {
    pub fn endpoint(&self) -> String {
        format!("localhost:{}", self.local_port)
    }
}

/// Hands out [`RemoteExecution`] capabilities bound to one host each.
///
/// All bound capabilities share one tunnel table keyed by service id.
#[derive(Clone)]
pub struct RemoteExecutionAdapter {
    executor: CommandExecutor,
    tunnels: Arc<DashMap<String, TunnelInfo>>,
}

impl RemoteExecutionAdapter {
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            executor,
            tunnels: Arc::new(DashMap::new()),
        }
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Capability for the host of `key`
    pub fn bind(&self, key: ConnectionKey) -> BoundRemote {
        BoundRemote {
            key,
            executor: self.executor.clone(),
            tunnels: Arc::clone(&self.tunnels),
        }
    }

    /// Registered tunnels, sorted by service id
    pub fn tunnels(&self) -> Vec<(String, TunnelInfo)> {
        let mut all: Vec<_> = self
            .tunnels
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

/// [`RemoteExecution`] for exactly one (user, host)
#[derive(Clone)]
pub struct BoundRemote {
    key: ConnectionKey,
    executor: CommandExecutor,
    tunnels: Arc<DashMap<String, TunnelInfo>>,
}

impl BoundRemote {
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Cancel a forward without opening a session just for that
    async fn cancel_forward(&self, service_id: &str, tunnel: &TunnelInfo) {
        if !self.executor.pool().is_established(&tunnel.key).await {
            tracing::debug!(
                "Session for {} is gone, dropping tunnel of {} without cancelling",
                tunnel.key,
                service_id
            );
            return;
        }
        if let Err(e) = self
            .executor
            .forward(&tunnel.key, tunnel.local_port, tunnel.remote_port, ForwardOp::Cancel)
            .await
        {
            tracing::warn!("Failed to cancel tunnel for service {}: {}", service_id, e);
        }
    }
}

#[async_trait]
impl RemoteExecution for BoundRemote {
    async fn execute_command(&self, command: &str) -> Result<String, RemoteError> {
        let output = self.executor.execute(&self.key, command).await?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    async fn create_tunnel(
        &self,
        service_id: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<(), RemoteError> {
        if let Some((_, previous)) = self.tunnels.remove(service_id) {
            self.cancel_forward(service_id, &previous).await;
        }

        self.executor
            .forward(&self.key, local_port, remote_port, ForwardOp::Add)
            .await?;

        tracing::info!(
            "Tunnel for service {} on {}: localhost:{} -> {}",
            service_id,
            self.key,
            local_port,
            remote_port
        );
        self.tunnels.insert(
            service_id.to_string(),
            TunnelInfo {
                key: self.key.clone(),
                local_port,
                remote_port,
            },
        );
        Ok(())
    }

    async fn close_tunnel(&self, service_id: &str) -> Result<(), RemoteError> {
        if let Some((_, tunnel)) = self.tunnels.remove(service_id) {
            self.cancel_forward(service_id, &tunnel).await;
            tracing::info!("Closed tunnel for service {}", service_id);
        }
        Ok(())
    }

    fn tunnel_endpoint(&self, service_id: &str) -> Result<String, RemoteError> {
        self.tunnels
            .get(service_id)
            .map(|t| t.endpoint())
            .ok_or_else(|| RemoteError::TunnelNotFound(service_id.to_string()))
    }
}
