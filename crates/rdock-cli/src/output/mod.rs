//! Terminal output for the rdock CLI
//!
//! Tables for service listings, multi-line views of single services and
//! coloured one-line status messages.

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use std::io::Write;
use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use rdock_core::service::{ManagedService, ServiceVariant};
use rdock_core::time::age;
use rdock_services::{ConnectionInfo, LogEntry};

/// Format managed services as a table
///
/// The detailed view adds the container handle and the image.
pub fn format_services(services: &[ManagedService], detailed: bool) -> String {
    if services.is_empty() {
        return "No managed services".to_string();
    }

    #[derive(Tabled)]
    struct ServiceRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "TYPE")]
        kind: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "PORT")]
        port: u16,
        #[tabled(rename = "AGE")]
        age: String,
    }

    #[derive(Tabled)]
    struct ServiceRowDetailed {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "TYPE")]
        kind: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "PORT")]
        port: u16,
        #[tabled(rename = "CONTAINER")]
        container: String,
        #[tabled(rename = "IMAGE")]
        image: String,
    }

    if detailed {
        let rows: Vec<ServiceRowDetailed> = services
            .iter()
            .map(|s| ServiceRowDetailed {
                id: s.id.clone(),
                name: s.name.clone(),
                kind: s.kind().to_string(),
                status: s.status.to_string(),
                port: s.port,
                container: s
                    .remote_handle
                    .as_deref()
                    .map(short_handle)
                    .unwrap_or_else(|| "-".to_string()),
                image: s.config.image.clone(),
            })
            .collect();

        Table::new(rows)
            .with(Style::rounded())
            .with(Width::wrap(120))
            .to_string()
    } else {
        let rows: Vec<ServiceRow> = services
            .iter()
            .map(|s| ServiceRow {
                id: s.id.clone(),
                name: s.name.clone(),
                kind: s.kind().to_string(),
                status: s.status.to_string(),
                port: s.port,
                age: format_duration(age(s.created_at).as_secs()),
            })
            .collect();

        Table::new(rows).with(Style::rounded()).to_string()
    }
}

/// Multi-line view of one service
pub fn format_service(service: &ManagedService) -> String {
    let config = &service.config;
    let mut out = String::new();

    out.push_str(&format!("ID:        {}\n", service.id));
    out.push_str(&format!("Name:      {}\n", service.name));
    out.push_str(&format!("Type:      {}\n", service.kind()));
    out.push_str(&format!("Status:    {}\n", service.status));
    out.push_str(&format!("Port:      {}\n", service.port));
    out.push_str(&format!("Mode:      {}\n", config.transport_mode()));
    out.push_str(&format!("Image:     {}\n", config.image));
    out.push_str(&format!(
        "Container: {}\n",
        service.remote_handle.as_deref().unwrap_or("-")
    ));
    if !config.command.is_empty() {
        out.push_str(&format!("Command:   {}\n", config.command.join(" ")));
    }
    for (key, value) in &config.env {
        out.push_str(&format!("Env:       {}={}\n", key, value));
    }
    for (source, target) in &config.volumes {
        out.push_str(&format!("Volume:    {}:{}\n", source, target));
    }

    match &config.variant {
        ServiceVariant::Filesystem(fs) => {
            if let Some(root) = &fs.root_path {
                out.push_str(&format!(
                    "Root:      {}{}\n",
                    root,
                    if fs.read_only { " (read-only)" } else { "" }
                ));
            }
        }
        ServiceVariant::Docker(docker) => {
            out.push_str(&format!("Socket:    {}\n", docker.socket_path));
        }
        ServiceVariant::Shell(shell) => {
            out.push_str(&format!("Shell:     {}\n", shell.shell));
            if let Some(dir) = &shell.working_dir {
                out.push_str(&format!("Workdir:   {}\n", dir));
            }
        }
        ServiceVariant::Custom(custom) => {
            for (source, target) in &custom.extra_volumes {
                out.push_str(&format!("Volume:    {}:{}\n", source, target));
            }
        }
    }

    out
}

pub fn format_connection_info(info: &ConnectionInfo) -> String {
    let mut out = String::new();
    out.push_str(&format!("Service:      {} ({})\n", info.name, info.service_id));
    out.push_str(&format!("Type:         {}\n", info.kind));
    out.push_str(&format!("Mode:         {}\n", info.mode));
    if let Some(endpoint) = &info.endpoint {
        out.push_str(&format!("Endpoint:     {}\n", endpoint));
    }
    out.push_str(&format!("Capabilities: {}\n", info.capabilities.join(", ")));
    out.push('\n');
    out.push_str(&info.instructions);
    out.push('\n');
    out
}

pub fn format_logs(entries: &[LogEntry]) -> String {
    entries
        .iter()
        .map(|e| e.message.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Truncate a string with ellipsis if too long
/// First 12 characters of a container id, as `docker ps` shows it
fn short_handle(handle: &str) -> String {
    handle.chars().take(12).collect()
}

/// Green status line on stdout
pub fn print_success(msg: &str) {
    status_line(std::io::stdout(), Color::Green, '✓', msg);
}

/// Red status line on stderr
pub fn print_error(msg: &str) {
    status_line(std::io::stderr(), Color::Red, '✗', msg);
}

pub fn print_warning(msg: &str) {
    status_line(std::io::stderr(), Color::Yellow, '⚠', msg);
}

pub fn print_info(msg: &str) {
    status_line(std::io::stdout(), Color::Cyan, 'ℹ', msg);
}

fn status_line(mut out: impl Write, color: Color, marker: char, msg: &str) {
    // Terminal errors are not worth failing a command over
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(format!("{marker} ")),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
