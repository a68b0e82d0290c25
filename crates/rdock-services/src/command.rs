//! Remote Docker command lines
//!
//! Every value that ends up on a command line is passed through
//! [`shell_quote`], because the commands run through the remote user's shell.

use std::borrow::Cow;

use rdock_core::service::{ManagedService, ServiceVariant, TransportMode};

/// Keeps a stdio container alive when the image has nothing else to run
const KEEPALIVE_COMMAND: [&str; 3] = ["tail", "-f", "/dev/null"];

/// Quote `value` for a POSIX shell; safe tokens are returned unchanged
pub fn shell_quote(value: &str) -> Cow<'_, str> {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!("'{}'", value.replace('\'', r#"'\''"#)))
    }
}

/// Accumulates shell-quoted arguments
#[derive(Debug, Default)]
struct CommandLine {
    args: Vec<String>,
}

impl CommandLine {
    fn new(program: &str) -> Self {
        let mut line = Self::default();
        line.raw(program);
        line
    }

    /// Append a literal token that needs no quoting
    fn raw(&mut self, token: &str) -> &mut Self {
        self.args.push(token.to_string());
        self
    }

    fn arg(&mut self, value: &str) -> &mut Self {
        self.args.push(shell_quote(value).into_owned());
        self
    }

    fn flag(&mut self, flag: &str, value: &str) -> &mut Self {
        self.raw(flag).arg(value)
    }

    fn finish(self) -> String {
        self.args.join(" ")
    }
}

/// `docker run` invocation that deploys `service`
pub fn launch_command(service: &ManagedService) -> String {
    let config = &service.config;
    let mode = config.transport_mode();
    let kind = service.kind();

    let mut cmd = CommandLine::new("docker");
    cmd.raw("run")
        .raw("-d")
        .flag("--name", &service.id)
        .flag("--restart", "unless-stopped")
        .flag("-l", &format!("mcp.server.id={}", service.id))
        .flag("-l", &format!("mcp.server.name={}", service.name))
        .flag("-l", &format!("mcp.server.type={}", kind));

    if mode != TransportMode::Stdio {
        cmd.flag("-p", &format!("{0}:{0}", service.port));
    }

    for (key, value) in &config.env {
        cmd.flag("-e", &format!("{key}={value}"));
    }
    for (source, target) in &config.volumes {
        cmd.flag("-v", &format!("{source}:{target}"));
    }

    match &config.variant {
        ServiceVariant::Filesystem(fs) => {
            if let Some(root) = fs.root_path.as_deref().filter(|r| !r.is_empty()) {
                let suffix = if fs.read_only { ":ro" } else { "" };
                cmd.flag("-v", &format!("{root}:/workspace{suffix}"));
            }
        }
        ServiceVariant::Docker(docker) => {
            cmd.flag("-v", &format!("{}:/var/run/docker.sock", docker.socket_path));
            if let Some(version) = &docker.api_version {
                cmd.flag("-e", &format!("DOCKER_API_VERSION={version}"));
            }
        }
        ServiceVariant::Shell(shell) => {
            if let Some(dir) = shell.working_dir.as_deref().filter(|d| !d.is_empty()) {
                cmd.flag("-w", dir);
            }
        }
        ServiceVariant::Custom(custom) => {
            for (source, target) in &custom.extra_volumes {
                cmd.flag("-v", &format!("{source}:{target}"));
            }
        }
    }

    cmd.arg(&config.image);

    if !config.command.is_empty() {
        for part in &config.command {
            cmd.arg(part);
        }
    } else if mode == TransportMode::Stdio {
        for part in KEEPALIVE_COMMAND {
            cmd.raw(part);
        }
    }

    cmd.finish()
}

pub fn start_command(handle: &str) -> String {
    format!("docker start {}", shell_quote(handle))
}

pub fn stop_command(handle: &str) -> String {
    format!("docker stop {}", shell_quote(handle))
}

pub fn remove_command(handle: &str) -> String {
    format!("docker rm -f {}", shell_quote(handle))
}

pub fn logs_command(handle: &str, lines: usize) -> String {
    format!("docker logs --tail {} --timestamps {}", lines, shell_quote(handle))
}
