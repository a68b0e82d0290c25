//! Command execution over pooled sessions

use bytes::Bytes;
use std::sync::Arc;

use rdock_core::error::{ConnectionError, RemoteError};
use rdock_core::ConnectionKey;

use crate::connection::ConnectionPool;
use crate::transport::{CommandOutput, ForwardOp, SSH_FAILURE_STATUS};

/// Runs commands on remote hosts through the connection pool
#[derive(Clone)]
pub struct CommandExecutor {
    pool: Arc<ConnectionPool>,
}

impl CommandExecutor {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Run `command` on the host of `key` and return its combined output.
    ///
    /// The session is confirmed through its control socket first, so the
    /// command never runs over a connection of its own. A missing, dead or
    /// inactive session is established once; if that fails the connection
    /// error is returned without another attempt. `command` is
    /// passed to the remote shell verbatim, so quoting is the caller's job.
    /// There is no overall deadline: a long remote command blocks until it
    /// finishes.
    pub async fn execute(&self, key: &ConnectionKey, command: &str) -> Result<Bytes, RemoteError> {
        let session = self.pool.acquire(key).await?;
        tracing::debug!("Executing on {}: {}", key, command);

        let result = self
            .pool
            .transport()
            .exec(
                key,
                session.control_path(),
                command,
                self.pool.settings().connect_timeout,
            )
            .await;

        self.interpret(key, result).await
    }

    /// Add or cancel a local port forward through the session of `key`
    pub async fn forward(
        &self,
        key: &ConnectionKey,
        local_port: u16,
        remote_port: u16,
        op: ForwardOp,
    ) -> Result<(), RemoteError> {
        let session = self.pool.acquire(key).await?;
        tracing::debug!(
            "Port forward {:?} on {}: {} -> {}",
            op,
            key,
            local_port,
            remote_port
        );

        let result = self
            .pool
            .transport()
            .forward(key, session.control_path(), local_port, remote_port, op)
            .await;

        self.interpret(key, result).await.map(|_| ())
    }

    async fn interpret(
        &self,
        key: &ConnectionKey,
        result: Result<CommandOutput, ConnectionError>,
    ) -> Result<Bytes, RemoteError> {
        let out = match result {
            Ok(out) => out,
            Err(e) => {
                self.pool.mark_inactive(key).await;
                return Err(e.into());
            }
        };

        match out.status {
            Some(0) => Ok(out.output),
            Some(SSH_FAILURE_STATUS) => {
                self.pool.mark_inactive(key).await;
                Err(RemoteError::Transport { output: out.text() })
            }
            status => Err(RemoteError::Exit {
                status,
                output: out.text(),
            }),
        }
    }
}
