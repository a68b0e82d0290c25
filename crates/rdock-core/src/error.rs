//! Core error types for rdock

use std::path::PathBuf;
use thiserror::Error;

use crate::service::ServiceStatus;

/// Top-level error type for the rdock ecosystem
#[derive(Error, Debug)]
pub enum RdockError {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Remote command error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Service lifecycle error
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Snapshot persistence error
    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors establishing or probing a pooled session
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The (user, host) pair is not a safe SSH target
    #[error("Invalid SSH target: {0}")]
    InvalidTarget(String),

    /// The SSH client could not be started
    #[error("Failed to start SSH session for {key}: {source}")]
    Spawn {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// The master process died before it could be probed
    #[error("SSH session for {key} exited during setup: {detail}")]
    MasterExited { key: String, detail: String },

    /// The liveness probe through a fresh session failed
    #[error("Failed to establish SSH connection for {key}: {detail}")]
    ProbeFailed { key: String, detail: String },

    /// I/O error talking to the SSH client
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors running a command on a remote host
#[derive(Error, Debug)]
pub enum RemoteError {
    /// No usable session could be obtained
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The remote process exited unsuccessfully
    #[error("Remote command failed (exit {}): {}", exit_label(.status), .output.trim())]
    Exit { status: Option<i32>, output: String },

    /// The SSH client itself failed while running the command
    #[error("SSH transport failure: {}", .output.trim())]
    Transport { output: String },

    /// No tunnel is registered for the service
    #[error("No tunnel found for service {0}")]
    TunnelNotFound(String),
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// Service lifecycle errors
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Service not found
    #[error("Service not found: {0}")]
    NotFound(String),

    /// The operation is not allowed from the service's current status
    #[error("Cannot {operation} service {id} while it is {status}")]
    InvalidState {
        id: String,
        status: ServiceStatus,
        operation: &'static str,
    },

    /// The service has no container handle recorded
    #[error("Service {0} has no container handle")]
    MissingHandle(String),

    /// No port left above the base port
    #[error("No free service port left")]
    PortsExhausted,

    /// Remote command failed
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Snapshot persistence errors
#[derive(Error, Debug)]
pub enum PersistError {
    /// Reading or writing the snapshot failed
    #[error("Snapshot I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot could not be encoded or decoded
    #[error("Snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl RemoteError {
    /// Whether the failure came from the SSH layer rather than the remote command
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Connection(_) | RemoteError::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_error_trims_output() {
        let err = RemoteError::Exit {
            status: Some(125),
            output: "docker: Error response from daemon\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Remote command failed (exit 125): docker: Error response from daemon"
        );
    }

    #[test]
    fn test_exit_error_without_status() {
        let err = RemoteError::Exit {
            status: None,
            output: String::new(),
        };
        assert!(err.to_string().contains("exit signal"));
    }

    #[test]
    fn test_transport_classification() {
        let probe = RemoteError::Connection(ConnectionError::ProbeFailed {
            key: "root@box".into(),
            detail: "timeout".into(),
        });
        assert!(probe.is_transport());
        assert!(RemoteError::Transport { output: String::new() }.is_transport());
        assert!(!RemoteError::Exit {
            status: Some(1),
            output: String::new()
        }
        .is_transport());
    }

    #[test]
    fn test_invalid_state_message() {
        let err = ServiceError::InvalidState {
            id: "mcp-shell-1".into(),
            status: ServiceStatus::Error,
            operation: "start",
        };
        assert_eq!(err.to_string(), "Cannot start service mcp-shell-1 while it is error");
    }
}
