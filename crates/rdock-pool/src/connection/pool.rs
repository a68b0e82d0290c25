//! Connection pool implementation
//!
//! The pool keeps zero or one master session per [`ConnectionKey`]. Each key
//! has its own slot behind an async mutex, so concurrent acquirers of the
//! same key queue up behind a single establishment attempt while other keys
//! proceed independently. A connection only ever leaves its slot through
//! [`ConnectionPool::teardown`], which releases the control socket first, or
//! through [`ConnectionPool::detach_all`], which leaves the master running.
//!
//! Control sockets have a stable path per key. A master left running by an
//! earlier process is adopted once `ssh -O check` confirms it is alive.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use rdock_core::config::SshConfig;
use rdock_core::error::ConnectionError;
use rdock_core::ConnectionKey;

use crate::transport::{MasterSession, Transport};

/// Trivial command used to check that a session still works
pub const PROBE_COMMAND: &str = "echo rdock-probe";

/// Shortest pause between readiness checks of a starting master
const READY_POLL_FLOOR: Duration = Duration::from_millis(10);

/// Timing and placement knobs for pooled sessions
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Directory holding the control sockets
    pub control_dir: PathBuf,
    /// Pause between readiness checks of a starting master
    pub settle_delay: Duration,
    /// Connect timeout of liveness probes
    pub probe_timeout: Duration,
    /// Connect timeout of regular commands, and how long a new master
    /// gets to become ready
    pub connect_timeout: Duration,
    /// Grace period for a master to exit before it is killed
    pub exit_timeout: Duration,
}

impl From<&SshConfig> for PoolSettings {
    fn from(config: &SshConfig) -> Self {
        Self {
            control_dir: config.control_dir.clone(),
            settle_delay: config.settle_delay,
            probe_timeout: config.probe_timeout,
            connect_timeout: config.connect_timeout,
            exit_timeout: config.exit_timeout,
        }
    }
}

/// What callers get back from [`ConnectionPool::acquire`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    key: ConnectionKey,
    control_path: PathBuf,
}

impl SessionHandle {
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }
}

/// A pooled master session
struct Connection {
    key: ConnectionKey,
    control_path: PathBuf,
    /// `None` for a master adopted from an earlier process
    master: Option<Box<dyn MasterSession>>,
    last_used: Instant,
    active: bool,
}

impl Connection {
    fn new(
        key: &ConnectionKey,
        control_path: PathBuf,
        master: Option<Box<dyn MasterSession>>,
    ) -> Self {
        Self {
            key: key.clone(),
            control_path,
            master,
            last_used: Instant::now(),
            active: true,
        }
    }

    fn handle(&self) -> SessionHandle {
        SessionHandle {
            key: self.key.clone(),
            control_path: self.control_path.clone(),
        }
    }
}

type Slot = Arc<Mutex<Option<Connection>>>;

/// Pool of multiplexed SSH sessions, one per (user, host)
pub struct ConnectionPool {
    transport: Arc<dyn Transport>,
    settings: PoolSettings,
    /// Slots indexed by key; empty slots are pruned once nobody holds them
    slots: DashMap<ConnectionKey, Slot>,
}

impl ConnectionPool {
    /// Create a new empty connection pool
    pub fn new(transport: Arc<dyn Transport>, settings: PoolSettings) -> Self {
        Self {
            transport,
            settings,
            slots: DashMap::new(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Return the active session for `key`, establishing one if needed.
    ///
    /// A pooled session is checked through its control socket before it is
    /// handed out; a master that went away is replaced. Reusing a session
    /// refreshes its last-used time. Establishment is attempted at most once
    /// per call and its failure is returned as is.
    pub async fn acquire(&self, key: &ConnectionKey) -> Result<SessionHandle, ConnectionError> {
        key.validate()?;

        let result = {
            let slot = self.slot_or_insert(key);
            let mut guard = slot.lock().await;
            self.acquire_locked(key, &mut guard).await
        };

        if result.is_err() {
            self.prune(key);
        }
        result
    }

    async fn acquire_locked(
        &self,
        key: &ConnectionKey,
        entry: &mut Option<Connection>,
    ) -> Result<SessionHandle, ConnectionError> {
        if let Some(conn) = entry.as_mut() {
            if conn.active {
                match self.check(key, &conn.control_path).await {
                    Ok(()) => {
                        conn.last_used = Instant::now();
                        tracing::debug!("Reusing existing SSH connection for {}", key);
                        return Ok(conn.handle());
                    }
                    Err(detail) => {
                        tracing::warn!("SSH master for {} is gone: {}", key, detail);
                        conn.active = false;
                    }
                }
            }
        }

        if let Some(stale) = entry.take() {
            tracing::info!("Replacing inactive SSH connection for {}", key);
            self.teardown(stale).await;
        }

        let conn = self.establish(key).await?;
        let handle = conn.handle();
        *entry = Some(conn);
        Ok(handle)
    }

    /// Close the session for `key`, including one left running by an
    /// earlier process. Does nothing if there is none.
    pub async fn close(&self, key: &ConnectionKey) {
        let taken = match self.slot(key) {
            Some(slot) => slot.lock().await.take(),
            None => None,
        };
        match taken {
            Some(conn) => {
                tracing::info!("Closing SSH connection for {}", key);
                self.teardown(conn).await;
            }
            None => self.close_detached(key).await,
        }
        self.prune(key);
    }

    /// Close every session; returns how many were torn down
    pub async fn close_all(&self) -> usize {
        let mut closed = 0;
        for slot in self.all_slots() {
            let taken = slot.lock().await.take();
            if let Some(conn) = taken {
                tracing::info!("Closing SSH connection for {}", conn.key);
                self.teardown(conn).await;
                closed += 1;
            }
        }
        self.prune_all();
        closed
    }

    /// Forget every session without closing it; returns how many masters
    /// were left running. Their tunnels stay up and a later pool with the
    /// same control directory adopts them. Inactive entries are torn down.
    pub async fn detach_all(&self) -> usize {
        let mut detached = 0;
        for slot in self.all_slots() {
            let taken = slot.lock().await.take();
            match taken {
                Some(conn) if conn.active => {
                    tracing::debug!("Leaving SSH connection for {} open", conn.key);
                    detached += 1;
                }
                Some(conn) => self.teardown(conn).await,
                None => {}
            }
        }
        self.prune_all();
        detached
    }

    /// Whether `key` has a working session.
    ///
    /// Checks the master through its control socket, then runs the probe
    /// command through it. Marks the session inactive if either fails.
    /// Never creates an entry for an unknown key.
    pub async fn is_active(&self, key: &ConnectionKey) -> bool {
        let Some(slot) = self.slot(key) else {
            return false;
        };
        let mut guard = slot.lock().await;
        let Some(conn) = guard.as_mut() else {
            return false;
        };
        if !conn.active {
            return false;
        }

        let verdict = match self.check(key, &conn.control_path).await {
            Ok(()) => self.probe(key, &conn.control_path).await,
            Err(detail) => Err(detail),
        };
        match verdict {
            Ok(()) => true,
            Err(detail) => {
                tracing::warn!("SSH connection for {} appears to be broken: {}", key, detail);
                conn.active = false;
                false
            }
        }
    }

    /// Whether `key` currently has a session marked active, without probing it
    pub async fn is_established(&self, key: &ConnectionKey) -> bool {
        match self.slot(key) {
            Some(slot) => slot.lock().await.as_ref().is_some_and(|c| c.active),
            None => false,
        }
    }

    /// Keys with an active session
    pub async fn list_active_keys(&self) -> BTreeSet<ConnectionKey> {
        let mut keys = BTreeSet::new();
        for slot in self.all_slots() {
            if let Some(conn) = slot.lock().await.as_ref() {
                if conn.active {
                    keys.insert(conn.key.clone());
                }
            }
        }
        keys
    }

    /// Number of keys that currently hold a connection, active or not
    pub async fn len(&self) -> usize {
        let mut count = 0;
        for slot in self.all_slots() {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Last time the session for `key` was handed out
    pub async fn last_used(&self, key: &ConnectionKey) -> Option<Instant> {
        let slot = self.slot(key)?;
        let guard = slot.lock().await;
        guard.as_ref().map(|c| c.last_used)
    }

    /// Flag the session as unusable so the next acquire re-establishes it
    pub async fn mark_inactive(&self, key: &ConnectionKey) {
        if let Some(slot) = self.slot(key) {
            if let Some(conn) = slot.lock().await.as_mut() {
                if conn.active {
                    tracing::warn!("Marking SSH connection for {} inactive", key);
                }
                conn.active = false;
            }
        }
    }

    /// Close active sessions idle for longer than `idle_timeout`, along with
    /// every session already marked inactive.
    ///
    /// Slots busy with another operation are skipped until the next call.
    /// Returns the keys that were closed.
    pub async fn cleanup_idle(&self, idle_timeout: Duration) -> Vec<ConnectionKey> {
        let now = Instant::now();
        let mut closed = Vec::new();

        for slot in self.all_slots() {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let reap = guard
                .as_ref()
                .is_some_and(|c| !c.active || now.duration_since(c.last_used) > idle_timeout);
            if !reap {
                continue;
            }
            if let Some(conn) = guard.take() {
                if conn.active {
                    tracing::info!(
                        "Closing idle SSH connection for {} (idle for {:?})",
                        conn.key,
                        now.duration_since(conn.last_used)
                    );
                } else {
                    tracing::info!("Closing inactive SSH connection for {}", conn.key);
                }
                closed.push(conn.key.clone());
                self.teardown(conn).await;
            }
        }

        self.prune_all();
        closed
    }

    fn slot(&self, key: &ConnectionKey) -> Option<Slot> {
        self.slots.get(key).map(|r| Arc::clone(r.value()))
    }

    fn slot_or_insert(&self, key: &ConnectionKey) -> Slot {
        Arc::clone(self.slots.entry(key.clone()).or_default().value())
    }

    fn all_slots(&self) -> Vec<Slot> {
        self.slots.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Drop the slot of `key` if it is empty and nobody else holds it
    fn prune(&self, key: &ConnectionKey) {
        self.slots.remove_if(key, |_, slot| is_unused(slot));
    }

    fn prune_all(&self) {
        self.slots.retain(|_, slot| !is_unused(slot));
    }

    /// Control socket path for `key`.
    ///
    /// Unix socket paths are short, so the key is hashed. The path is the
    /// same for every process sharing the control directory.
    fn control_path_for(&self, key: &ConnectionKey) -> PathBuf {
        let digest = Sha256::digest(key.to_string().as_bytes());
        self.settings
            .control_dir
            .join(format!("{}.sock", &hex::encode(digest)[..16]))
    }

    async fn establish(&self, key: &ConnectionKey) -> Result<Connection, ConnectionError> {
        ensure_control_dir(&self.settings.control_dir).await?;
        let control_path = self.control_path_for(key);

        if socket_exists(&control_path).await {
            match self.check(key, &control_path).await {
                Ok(()) => {
                    tracing::info!("Adopting running SSH master for {}", key);
                    return Ok(Connection::new(key, control_path, None));
                }
                Err(detail) => {
                    tracing::debug!("Discarding stale control socket for {}: {}", key, detail);
                    remove_socket(&control_path).await;
                }
            }
        }

        tracing::info!("Starting new SSH master connection for {}", key);
        let master = self.transport.start_master(key, &control_path).await?;
        let mut conn = Connection::new(key, control_path, Some(master));

        if let Err(e) = self.wait_until_ready(&mut conn).await {
            self.force_teardown(conn).await;
            return Err(e);
        }

        if let Err(detail) = self.probe(key, &conn.control_path).await {
            self.force_teardown(conn).await;
            return Err(ConnectionError::ProbeFailed {
                key: key.to_string(),
                detail,
            });
        }

        conn.last_used = Instant::now();
        tracing::info!("Successfully established SSH connection for {}", key);
        Ok(conn)
    }

    /// Poll the control socket until the master answers. Fails if the
    /// master process dies or `connect_timeout` passes first.
    async fn wait_until_ready(&self, conn: &mut Connection) -> Result<(), ConnectionError> {
        let deadline = Instant::now() + self.settings.connect_timeout;
        let pause = self.settings.settle_delay.max(READY_POLL_FLOOR);

        loop {
            let last_check = match self.check(&conn.key, &conn.control_path).await {
                Ok(()) => return Ok(()),
                Err(detail) => detail,
            };
            if let Some(detail) = conn.master.as_mut().and_then(|m| m.early_failure()) {
                return Err(ConnectionError::MasterExited {
                    key: conn.key.to_string(),
                    detail,
                });
            }
            if Instant::now() >= deadline {
                return Err(ConnectionError::ProbeFailed {
                    key: conn.key.to_string(),
                    detail: format!(
                        "master not ready after {:?}: {}",
                        self.settings.connect_timeout, last_check
                    ),
                });
            }
            tokio::time::sleep(pause).await;
        }
    }

    /// Ask the master itself whether it is alive
    async fn check(&self, key: &ConnectionKey, control_path: &Path) -> Result<(), String> {
        match self.transport.check(key, control_path).await {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(out.text().trim().to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn probe(&self, key: &ConnectionKey, control_path: &Path) -> Result<(), String> {
        match self
            .transport
            .exec(key, control_path, PROBE_COMMAND, self.settings.probe_timeout)
            .await
        {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(format!("probe exited with {:?}: {}", out.status, out.text().trim())),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Close a master left running by an earlier process, if there is one
    async fn close_detached(&self, key: &ConnectionKey) {
        if key.validate().is_err() {
            return;
        }
        let control_path = self.control_path_for(key);
        if !socket_exists(&control_path).await {
            return;
        }
        if self.check(key, &control_path).await.is_ok() {
            tracing::info!("Closing detached SSH connection for {}", key);
            if let Err(detail) = self.request_exit(key, &control_path).await {
                tracing::warn!("Error closing SSH connection for {} cleanly: {}", key, detail);
            }
        }
        remove_socket(&control_path).await;
    }

    async fn request_exit(&self, key: &ConnectionKey, control_path: &Path) -> Result<(), String> {
        match self.transport.request_exit(key, control_path).await {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(out.text().trim().to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Ask the master to exit, kill it if it lingers, then drop the socket
    async fn teardown(&self, mut conn: Connection) {
        if let Err(detail) = self.request_exit(&conn.key, &conn.control_path).await {
            tracing::warn!("Error closing SSH connection for {} cleanly: {}", conn.key, detail);
        }
        if let Some(master) = conn.master.as_mut() {
            master.terminate(self.settings.exit_timeout).await;
        }
        remove_socket(&conn.control_path).await;
        tracing::debug!("Released control socket {:?}", conn.control_path);
    }

    /// Teardown of a half-established session: no grace period
    async fn force_teardown(&self, mut conn: Connection) {
        tracing::warn!(
            "Terminating half-established SSH session for {} (pid {:?})",
            conn.key,
            conn.master.as_ref().and_then(|m| m.pid())
        );
        if let Err(detail) = self.request_exit(&conn.key, &conn.control_path).await {
            tracing::debug!("Exit request for {} failed: {}", conn.key, detail);
        }
        if let Some(master) = conn.master.as_mut() {
            master.terminate(Duration::ZERO).await;
        }
        remove_socket(&conn.control_path).await;
    }
}

fn is_unused(slot: &Slot) -> bool {
    Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|guard| guard.is_none())
}

async fn ensure_control_dir(dir: &Path) -> Result<(), ConnectionError> {
    tokio::fs::create_dir_all(dir).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
    }
    Ok(())
}

async fn socket_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn remove_socket(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove control socket {:?}: {}", path, e),
    }
}
