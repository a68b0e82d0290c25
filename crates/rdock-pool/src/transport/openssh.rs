//! Transport backed by the system OpenSSH client
//!
//! Sessions use OpenSSH connection multiplexing: one `ssh -M` master per
//! host owns the authenticated connection and every later command is a
//! short-lived `ssh -S <socket>` client riding on it.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use rdock_core::config::SshConfig;
use rdock_core::error::ConnectionError;
use rdock_core::ConnectionKey;

use super::{CommandOutput, ForwardOp, MasterSession, Transport};

/// Spawns the `ssh` binary for every transport operation
#[derive(Debug, Clone)]
pub struct OpenSshTransport {
    config: SshConfig,
}

impl OpenSshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Arguments that start a master session
    pub fn master_args(&self, key: &ConnectionKey, control_path: &Path) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-M"),
            OsString::from("-S"),
            control_path.as_os_str().to_owned(),
        ];
        let persist = match self.config.control_persist.as_secs() {
            0 => "yes".to_string(),
            secs => secs.to_string(),
        };
        push_option(&mut args, format!("ControlPersist={persist}"));
        self.push_keepalive(&mut args);
        push_option(&mut args, "TCPKeepAlive=yes".to_string());
        push_option(
            &mut args,
            format!("StrictHostKeyChecking={}", self.config.strict_host_key_checking),
        );
        if let Some(known_hosts) = &self.config.known_hosts_file {
            push_option(&mut args, format!("UserKnownHostsFile={}", known_hosts.display()));
        }
        push_option(&mut args, "BatchMode=yes".to_string());
        push_option(&mut args, "ExitOnForwardFailure=no".to_string());
        args.push(OsString::from("-N"));
        args.push(OsString::from(key.target()));
        args
    }

    /// Arguments that run `command` through an existing master
    pub fn exec_args(
        &self,
        key: &ConnectionKey,
        control_path: &Path,
        command: &str,
        connect_timeout: Duration,
    ) -> Vec<OsString> {
        let mut args = vec![OsString::from("-S"), control_path.as_os_str().to_owned()];
        push_option(&mut args, format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)));
        self.push_keepalive(&mut args);
        push_option(&mut args, "BatchMode=yes".to_string());
        args.push(OsString::from(key.target()));
        args.push(OsString::from(command));
        args
    }

    /// Arguments for a `-O <op>` control request
    pub fn control_args(
        &self,
        key: &ConnectionKey,
        control_path: &Path,
        op: &str,
        extra: &[String],
    ) -> Vec<OsString> {
        let mut args = vec![OsString::from("-S"), control_path.as_os_str().to_owned()];
        push_option(
            &mut args,
            format!("ConnectTimeout={}", self.config.exit_timeout.as_secs().max(1)),
        );
        push_option(&mut args, "BatchMode=yes".to_string());
        args.push(OsString::from("-O"));
        args.push(OsString::from(op));
        args.extend(extra.iter().map(OsString::from));
        args.push(OsString::from(key.target()));
        args
    }

    fn push_keepalive(&self, args: &mut Vec<OsString>) {
        push_option(
            args,
            format!("ServerAliveInterval={}", self.config.server_alive_interval.as_secs()),
        );
        push_option(
            args,
            format!("ServerAliveCountMax={}", self.config.server_alive_count_max),
        );
    }

    async fn run(&self, args: Vec<OsString>) -> Result<CommandOutput, ConnectionError> {
        let output = Command::new(&self.config.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(CommandOutput::new(output.status.code(), combined))
    }
}

fn push_option(args: &mut Vec<OsString>, option: String) {
    args.push(OsString::from("-o"));
    args.push(OsString::from(option));
}

#[async_trait]
impl Transport for OpenSshTransport {
    async fn start_master(
        &self,
        key: &ConnectionKey,
        control_path: &Path,
    ) -> Result<Box<dyn MasterSession>, ConnectionError> {
        // ControlPersist makes the master fork into the background once it is
        // authenticated, so the spawned child exiting 0 is the success path.
        // Its output is discarded: the forked master keeps the pipes open.
        // Not killed on drop: a detached session is meant to outlive us.
        let child = Command::new(&self.config.program)
            .args(self.master_args(key, control_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ConnectionError::Spawn {
                key: key.to_string(),
                source,
            })?;

        tracing::debug!("Spawned SSH master for {} (pid {:?})", key, child.id());
        Ok(Box::new(ProcessMaster { child }))
    }

    async fn exec(
        &self,
        key: &ConnectionKey,
        control_path: &Path,
        command: &str,
        connect_timeout: Duration,
    ) -> Result<CommandOutput, ConnectionError> {
        self.run(self.exec_args(key, control_path, command, connect_timeout))
            .await
    }

    async fn check(
        &self,
        key: &ConnectionKey,
        control_path: &Path,
    ) -> Result<CommandOutput, ConnectionError> {
        self.run(self.control_args(key, control_path, "check", &[])).await
    }

    async fn request_exit(
        &self,
        key: &ConnectionKey,
        control_path: &Path,
    ) -> Result<CommandOutput, ConnectionError> {
        self.run(self.control_args(key, control_path, "exit", &[])).await
    }

    async fn forward(
        &self,
        key: &ConnectionKey,
        control_path: &Path,
        local_port: u16,
        remote_port: u16,
        op: ForwardOp,
    ) -> Result<CommandOutput, ConnectionError> {
        let op = match op {
            ForwardOp::Add => "forward",
            ForwardOp::Cancel => "cancel",
        };
        let spec = vec![
            "-L".to_string(),
            format!("{local_port}:127.0.0.1:{remote_port}"),
        ];
        self.run(self.control_args(key, control_path, op, &spec)).await
    }
}

/// The spawned `ssh -M` process
struct ProcessMaster {
    child: Child,
}

#[async_trait]
impl MasterSession for ProcessMaster {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn early_failure(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) if !status.success() => {
                Some(format!("ssh master exited with {status}"))
            }
            Ok(_) => None,
            Err(e) => Some(format!("failed to poll ssh master: {e}")),
        }
    }

    async fn terminate(&mut self, grace: Duration) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }
        if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
            if let Err(e) = self.child.kill().await {
                tracing::warn!("Failed to kill ssh master {:?}: {}", self.child.id(), e);
            }
        }
    }
}
