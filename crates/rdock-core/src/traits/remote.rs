//! Remote execution capability

use async_trait::async_trait;

use crate::error::RemoteError;

/// Narrow capability the service lifecycle manager uses to reach one remote
/// Docker host.
///
/// An implementation is bound to a single (user, host) pair; the manager
/// never learns which one.
#[async_trait]
pub trait RemoteExecution: Send + Sync {
    /// Run a shell command on the host and return its combined output
    async fn execute_command(&self, command: &str) -> Result<String, RemoteError>;

    /// Forward `local_port` to `remote_port` on the host for a service
    async fn create_tunnel(
        &self,
        service_id: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<(), RemoteError>;

    /// Tear down the tunnel of a service; a missing tunnel is not an error
    async fn close_tunnel(&self, service_id: &str) -> Result<(), RemoteError>;

    /// Local endpoint (`host:port`) of a service's tunnel
    fn tunnel_endpoint(&self, service_id: &str) -> Result<String, RemoteError>;
}
