//! Scripted transport shared by the pool integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rdock_core::error::ConnectionError;
use rdock_core::ConnectionKey;
use rdock_pool::connection::PROBE_COMMAND;
use rdock_pool::{
    CommandExecutor, CommandOutput, ConnectionPool, ForwardOp, MasterSession, PoolSettings,
    Transport,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardCall {
    pub key: ConnectionKey,
    pub local_port: u16,
    pub remote_port: u16,
    pub op: ForwardOp,
}

#[derive(Default)]
pub struct FakeTransport {
    pub starts: AtomicUsize,
    pub exit_requests: AtomicUsize,
    pub terminations: Arc<AtomicUsize>,
    pub checks: AtomicUsize,
    pub liveness_fails: AtomicBool,
    pub master_dies: AtomicBool,
    pub never_ready: AtomicBool,
    pub start_delay: Mutex<Duration>,
    pub responses: Mutex<HashMap<String, CommandOutput>>,
    pub commands: Mutex<Vec<(ConnectionKey, String)>>,
    pub forwards: Mutex<Vec<ForwardCall>>,
    pub control_paths: Mutex<Vec<PathBuf>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, command: &str, status: i32, output: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), CommandOutput::new(Some(status), output.to_string()));
    }

    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock().unwrap() = delay;
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Commands run so far, liveness commands excluded
    pub fn user_commands(&self) -> Vec<(ConnectionKey, String)> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| c != PROBE_COMMAND)
            .cloned()
            .collect()
    }

    pub fn forwards(&self) -> Vec<ForwardCall> {
        self.forwards.lock().unwrap().clone()
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    /// The master behind `control_path` goes away on its own, the way an
    /// expired `ControlPersist` or a dropped network link ends it
    pub fn master_exits(&self, control_path: &Path) {
        let _ = std::fs::remove_file(control_path);
    }
}

/// A live master is modelled by its control socket file existing

struct FakeMaster {
    dead: bool,
    control_path: PathBuf,
    terminations: Arc<AtomicUsize>,
}

#[async_trait]
impl MasterSession for FakeMaster {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn early_failure(&mut self) -> Option<String> {
        self.dead
            .then(|| "Permission denied (publickey)".to_string())
    }

    async fn terminate(&mut self, _grace: Duration) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        let _ = std::fs::remove_file(&self.control_path);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn start_master(
        &self,
        _key: &ConnectionKey,
        control_path: &Path,
    ) -> Result<Box<dyn MasterSession>, ConnectionError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.control_paths
            .lock()
            .unwrap()
            .push(control_path.to_path_buf());
        let delay = *self.start_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let dead = self.master_dies.load(Ordering::SeqCst);
        if !dead && !self.never_ready.load(Ordering::SeqCst) {
            std::fs::write(control_path, b"").unwrap();
        }
        Ok(Box::new(FakeMaster {
            dead,
            control_path: control_path.to_path_buf(),
            terminations: Arc::clone(&self.terminations),
        }))
    }

    async fn exec(
        &self,
        key: &ConnectionKey,
        _control_path: &Path,
        command: &str,
        _connect_timeout: Duration,
    ) -> Result<CommandOutput, ConnectionError> {
        self.commands
            .lock()
            .unwrap()
            .push((key.clone(), command.to_string()));
        if command == PROBE_COMMAND {
            return Ok(if self.liveness_fails.load(Ordering::SeqCst) {
                CommandOutput::new(Some(255), "ssh: connect to host: Connection refused")
            } else {
                CommandOutput::new(Some(0), "rdock-probe\n")
            });
        }
        let scripted = self.responses.lock().unwrap().get(command).cloned();
        Ok(scripted.unwrap_or_else(|| CommandOutput::new(Some(0), "ok\n")))
    }

    async fn check(
        &self,
        _key: &ConnectionKey,
        control_path: &Path,
    ) -> Result<CommandOutput, ConnectionError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(if control_path.exists() {
            CommandOutput::new(Some(0), "Master running (pid=4242)\n")
        } else {
            let detail = format!(
                "Control socket connect({}): No such file or directory\n",
                control_path.display()
            );
            CommandOutput::new(Some(255), detail)
        })
    }

    async fn request_exit(
        &self,
        _key: &ConnectionKey,
        control_path: &Path,
    ) -> Result<CommandOutput, ConnectionError> {
        self.exit_requests.fetch_add(1, Ordering::SeqCst);
        if std::fs::remove_file(control_path).is_err() {
            return Ok(CommandOutput::new(Some(255), "Control socket connect: No such file\n"));
        }
        Ok(CommandOutput::new(Some(0), "Exit request sent.\n"))
    }

    async fn forward(
        &self,
        key: &ConnectionKey,
        _control_path: &Path,
        local_port: u16,
        remote_port: u16,
        op: ForwardOp,
    ) -> Result<CommandOutput, ConnectionError> {
        self.forwards.lock().unwrap().push(ForwardCall {
            key: key.clone(),
            local_port,
            remote_port,
            op,
        });
        Ok(CommandOutput::new(Some(0), ""))
    }
}

pub fn settings(control_dir: &Path) -> PoolSettings {
    PoolSettings {
        control_dir: control_dir.to_path_buf(),
        settle_delay: Duration::ZERO,
        probe_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(10),
        exit_timeout: Duration::from_secs(5),
    }
}

pub fn pool_with(transport: &Arc<FakeTransport>, control_dir: &Path) -> Arc<ConnectionPool> {
    let transport: Arc<dyn Transport> = transport.clone();
    Arc::new(ConnectionPool::new(transport, settings(control_dir)))
}

pub fn executor_with(transport: &Arc<FakeTransport>, control_dir: &Path) -> CommandExecutor {
    CommandExecutor::new(pool_with(transport, control_dir))
}

pub fn key(host: &str) -> ConnectionKey {
    ConnectionKey::new("deploy", host)
}
