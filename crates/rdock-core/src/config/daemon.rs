//! rdock configuration: SSH transport, idle reaping and service management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RdockConfig {
    pub ssh: SshConfig,
    pub reaper: ReaperConfig,
    pub services: ServicesConfig,
}

/// Settings for the system SSH client and the pooled master sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// SSH client binary
    pub program: String,

    /// Directory holding the control sockets
    pub control_dir: PathBuf,

    /// How long a master lingers after its last client (`ControlPersist`).
    /// Zero keeps it until it is told to exit. Masters outlive a single
    /// `rdock` invocation, so this is what reclaims sessions nobody closes.
    #[serde(with = "duration_secs")]
    pub control_persist: Duration,

    #[serde(with = "duration_secs")]
    pub server_alive_interval: Duration,

    pub server_alive_count_max: u32,

    /// Connect timeout for commands issued through a master
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Connect timeout for liveness probes
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// Pause between readiness checks of a starting master
    #[serde(with = "duration_millis")]
    pub settle_delay: Duration,

    /// How long to wait for a master to exit before killing it
    #[serde(with = "duration_secs")]
    pub exit_timeout: Duration,

    pub strict_host_key_checking: String,

    pub known_hosts_file: Option<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            control_dir: std::env::temp_dir().join("rdock-ssh"),
            control_persist: Duration::from_secs(120 * 60),
            server_alive_interval: Duration::from_secs(30),
            server_alive_count_max: 10,
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_millis(250),
            exit_timeout: Duration::from_secs(5),
            strict_host_key_checking: "accept-new".to_string(),
            known_hosts_file: None,
        }
    }
}

/// Idle connection reclamation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,

    /// Sessions unused for longer than this are closed
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10 * 60),
            idle_timeout: Duration::from_secs(120 * 60),
        }
    }
}

/// Managed service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Snapshot of the service index
    pub state_file: PathBuf,

    /// First port handed out to a service
    pub base_port: u16,

    pub max_concurrent_deployments: usize,

    pub default_log_lines: usize,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            state_file: super::default_data_dir().join("services.json"),
            base_port: 9000,
            max_concurrent_deployments: 4,
            default_log_lines: 50,
        }
    }
}
