//! Managed service data model
//!
//! A managed service is a containerized helper process deployed onto a remote
//! Docker host. The type-specific configuration is a tagged variant so every
//! consumer has to handle each service kind explicitly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Environment variable selecting how clients talk to the service
pub const MODE_ENV: &str = "MCP_MODE";

/// Kind of managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Filesystem,
    Docker,
    Shell,
    Custom,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Filesystem => "filesystem",
            ServiceKind::Docker => "docker",
            ServiceKind::Shell => "shell",
            ServiceKind::Custom => "custom",
        }
    }

    /// Tools a service of this kind exposes to its clients
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            ServiceKind::Filesystem => {
                &["read_file", "write_file", "list_directory", "search_files"]
            }
            ServiceKind::Docker => &[
                "list_containers",
                "start_container",
                "stop_container",
                "exec_command",
                "container_logs",
                "list_images",
            ],
            ServiceKind::Shell => &[
                "execute_command",
                "execute_script",
                "get_environment",
                "get_working_directory",
            ],
            ServiceKind::Custom => &["unknown"],
        }
    }

    /// Guess the kind from an image reference such as `mcp/filesystem:latest`
    pub fn infer_from_image(image: &str) -> Self {
        if image.contains("/filesystem") {
            ServiceKind::Filesystem
        } else if image.contains("/docker") {
            ServiceKind::Docker
        } else if image.contains("/shell") {
            ServiceKind::Shell
        } else {
            ServiceKind::Custom
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "filesystem" => Ok(ServiceKind::Filesystem),
            "docker" => Ok(ServiceKind::Docker),
            "shell" => Ok(ServiceKind::Shell),
            "custom" => Ok(ServiceKind::Custom),
            other => Err(format!("unknown service type: {other}")),
        }
    }
}

/// Lifecycle status of a managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Deployment task is still running
    Creating,
    Running,
    Stopped,
    /// Deployment failed; only deletion is allowed
    Error,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Creating => write!(f, "creating"),
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Stopped => write!(f, "stopped"),
            ServiceStatus::Error => write!(f, "error"),
        }
    }
}

/// How clients attach to a running service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Attached through `docker exec -i`; no port is published
    Stdio,
    Http,
    Websocket,
}

impl TransportMode {
    /// Read the mode from a service environment, defaulting to HTTP
    pub fn from_env(env: &BTreeMap<String, String>) -> Self {
        match env.get(MODE_ENV).map(|m| m.trim().to_ascii_lowercase()) {
            Some(mode) if mode == "stdio" => TransportMode::Stdio,
            Some(mode) if mode == "websocket" || mode == "ws" => TransportMode::Websocket,
            _ => TransportMode::Http,
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Stdio => write!(f, "stdio"),
            TransportMode::Http => write!(f, "http"),
            TransportMode::Websocket => write!(f, "websocket"),
        }
    }
}

/// Filesystem service settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    /// Host directory mounted at `/workspace`
    pub root_path: Option<String>,
    pub read_only: bool,
    pub allowed_dirs: Vec<String>,
}

/// Permission level granted to a Docker service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockerPermission {
    #[default]
    Read,
    Write,
    Admin,
}

/// Docker service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Host Docker socket bind-mounted into the container
    pub socket_path: String,
    pub api_version: Option<String>,
    pub permissions: DockerPermission,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket_path: "/var/run/docker.sock".to_string(),
            api_version: None,
            permissions: DockerPermission::default(),
        }
    }
}

/// Shell service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Interpreter name (bash, sh, zsh)
    pub shell: String,
    pub working_dir: Option<String>,
    pub allowed_commands: Vec<String>,
    pub blocked_commands: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            working_dir: None,
            allowed_commands: Vec::new(),
            blocked_commands: Vec::new(),
        }
    }
}

/// Custom service settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomConfig {
    pub extra_volumes: BTreeMap<String, String>,
    pub git_repo: Option<String>,
    pub build_command: Option<String>,
    pub run_command: Option<String>,
}

/// Type-specific service settings, discriminated by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServiceVariant {
    Filesystem(FilesystemConfig),
    Docker(DockerConfig),
    Shell(ShellConfig),
    Custom(CustomConfig),
}

impl ServiceVariant {
    /// Default settings for a kind
    pub fn for_kind(kind: ServiceKind) -> Self {
        match kind {
            ServiceKind::Filesystem => ServiceVariant::Filesystem(FilesystemConfig::default()),
            ServiceKind::Docker => ServiceVariant::Docker(DockerConfig::default()),
            ServiceKind::Shell => ServiceVariant::Shell(ShellConfig::default()),
            ServiceKind::Custom => ServiceVariant::Custom(CustomConfig::default()),
        }
    }

    pub fn kind(&self) -> ServiceKind {
        match self {
            ServiceVariant::Filesystem(_) => ServiceKind::Filesystem,
            ServiceVariant::Docker(_) => ServiceKind::Docker,
            ServiceVariant::Shell(_) => ServiceKind::Shell,
            ServiceVariant::Custom(_) => ServiceKind::Custom,
        }
    }
}

/// Full configuration of a managed service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Host path -> container path
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,
    pub variant: ServiceVariant,
}

impl ServiceConfig {
    /// Create a config for `image` with the default settings of `kind`
    pub fn new(image: impl Into<String>, kind: ServiceKind) -> Self {
        Self {
            image: image.into(),
            command: Vec::new(),
            env: BTreeMap::new(),
            volumes: BTreeMap::new(),
            variant: ServiceVariant::for_kind(kind),
        }
    }

    pub fn kind(&self) -> ServiceKind {
        self.variant.kind()
    }

    pub fn transport_mode(&self) -> TransportMode {
        TransportMode::from_env(&self.env)
    }
}

/// Request to create a managed service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub config: ServiceConfig,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, config: ServiceConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

/// A managed service as tracked by the lifecycle manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedService {
    pub id: String,
    pub name: String,
    pub status: ServiceStatus,
    /// Container id returned by the remote `docker run`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_handle: Option<String>,
    pub port: u16,
    /// Creation time, milliseconds since the Unix epoch
    pub created_at: u64,
    pub config: ServiceConfig,
}

impl ManagedService {
    pub fn kind(&self) -> ServiceKind {
        self.config.kind()
    }
}
