//! Client-facing views of managed services

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use rdock_core::service::{ManagedService, ServiceKind, ServiceStatus, TransportMode, MODE_ENV};

/// Environment variables safe to show to clients
const SHARED_ENV: [&str; 3] = [MODE_ENV, "FILESYSTEM_ROOT", "MEMORY_STORE"];

/// How a client attaches to a running service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub service_id: String,
    pub name: String,
    pub kind: ServiceKind,
    pub status: ServiceStatus,
    pub mode: TransportMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    pub capabilities: Vec<String>,
    pub instructions: String,
}

impl ConnectionInfo {
    /// Build the view of `service`.
    ///
    /// `tunnel` is the local `host:port` of the service's tunnel. Network
    /// services only get an endpoint when one is open.
    pub fn for_service(service: &ManagedService, tunnel: Option<String>) -> Self {
        let mode = service.config.transport_mode();
        let endpoint = tunnel.and_then(|address| match mode {
            TransportMode::Stdio => None,
            TransportMode::Http => Some(format!("http://{address}")),
            TransportMode::Websocket => Some(format!("ws://{address}")),
        });

        let environment = service
            .config
            .env
            .iter()
            .filter(|(k, _)| SHARED_ENV.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let container = service.remote_handle.as_deref().unwrap_or(&service.id);
        let instructions = match (mode, endpoint.as_deref()) {
            (TransportMode::Http | TransportMode::Websocket, None) => format!(
                "No local tunnel is open for {}; remote port {} is not reachable from here.",
                service.name, service.port
            ),
            (mode, endpoint) => instructions(mode, &service.name, container, endpoint),
        };

        Self {
            service_id: service.id.clone(),
            name: service.name.clone(),
            kind: service.kind(),
            status: service.status,
            mode,
            endpoint,
            container_id: service.remote_handle.clone(),
            environment,
            capabilities: service
                .kind()
                .capabilities()
                .iter()
                .map(|c| c.to_string())
                .collect(),
            instructions,
        }
    }
}

fn instructions(
    mode: TransportMode,
    name: &str,
    container: &str,
    endpoint: Option<&str>,
) -> String {
    let entry = match (mode, endpoint) {
        (TransportMode::Stdio, _) | (_, None) => serde_json::json!({
            "command": "docker",
            "args": ["exec", "-i", container, "node", "index.js"],
        }),
        (TransportMode::Http, Some(url)) => serde_json::json!({ "url": url }),
        (TransportMode::Websocket, Some(url)) => serde_json::json!({
            "url": url,
            "transport": "websocket",
        }),
    };
    let config = serde_json::json!({ "mcpServers": { name: entry } });
    let config = serde_json::to_string_pretty(&config).unwrap_or_default();

    match (mode, endpoint) {
        (TransportMode::Stdio, _) | (_, None) => format!(
            "To connect via stdio:\ndocker exec -i {container} node index.js\n\n\
             Client configuration:\n{config}"
        ),
        (TransportMode::Http, Some(url)) => {
            format!("HTTP endpoint: {url}\n\nClient configuration:\n{config}")
        }
        (TransportMode::Websocket, Some(url)) => {
            format!("WebSocket endpoint: {url}\n\nClient configuration:\n{config}")
        }
    }
}

/// Captured container output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Capture time, milliseconds since the Unix epoch
    pub timestamp: u64,
    pub level: String,
    pub message: String,
    pub service_id: String,
}
