//! Transport seam between the pool and the SSH client

mod openssh;

pub use openssh::OpenSshTransport;

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::time::Duration;

use rdock_core::error::ConnectionError;
use rdock_core::ConnectionKey;

/// Exit code the OpenSSH client uses for its own failures
pub const SSH_FAILURE_STATUS: i32 = 255;

/// Result of a process run through a control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub status: Option<i32>,
    /// stdout followed by stderr
    pub output: Bytes,
}

impl CommandOutput {
    pub fn new(status: Option<i32>, output: impl Into<Bytes>) -> Self {
        Self {
            status,
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Port forward operation on an existing master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOp {
    Add,
    Cancel,
}

/// The local process backing a master session
#[async_trait]
pub trait MasterSession: Send {
    /// OS process id, if the process is still known
    fn pid(&self) -> Option<u32>;

    /// Diagnostic text if the process already exited unsuccessfully
    fn early_failure(&mut self) -> Option<String>;

    /// Wait up to `grace` for the process to exit, then kill it
    async fn terminate(&mut self, grace: Duration);
}

/// Everything the pool needs from an SSH implementation
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start a background master session for `key` listening on `control_path`
    async fn start_master(
        &self,
        key: &ConnectionKey,
        control_path: &Path,
    ) -> Result<Box<dyn MasterSession>, ConnectionError>;

    /// Run `command` on the remote host through the master
    async fn exec(
        &self,
        key: &ConnectionKey,
        control_path: &Path,
        command: &str,
        connect_timeout: Duration,
    ) -> Result<CommandOutput, ConnectionError>;

    /// Ask the master whether it is alive (`-O check`). Only talks to the
    /// local control socket; a missing master is a non-zero status.
    async fn check(
        &self,
        key: &ConnectionKey,
        control_path: &Path,
    ) -> Result<CommandOutput, ConnectionError>;

    /// Ask the master to exit through its control socket
    async fn request_exit(
        &self,
        key: &ConnectionKey,
        control_path: &Path,
    ) -> Result<CommandOutput, ConnectionError>;

    /// Add or cancel a local port forward on the master
    async fn forward(
        &self,
        key: &ConnectionKey,
        control_path: &Path,
        local_port: u16,
        remote_port: u16,
        op: ForwardOp,
    ) -> Result<CommandOutput, ConnectionError>;
}
