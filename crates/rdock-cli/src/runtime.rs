//! Process-wide composition of pool, reaper and service manager

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rdock_core::config::RdockConfig;
use rdock_core::traits::RemoteExecution;
use rdock_core::ConnectionKey;
use rdock_pool::{
    CommandExecutor, ConnectionPool, IdleReaper, OpenSshTransport, PoolSettings,
    RemoteExecutionAdapter, Transport,
};
use rdock_services::{ManagerSettings, ServiceLifecycleManager, SnapshotStore};

/// Everything one rdock process owns
pub struct Runtime {
    config: RdockConfig,
    pool: Arc<ConnectionPool>,
    adapter: RemoteExecutionAdapter,
    manager: Arc<ServiceLifecycleManager>,
    cancel: CancellationToken,
    reaper: JoinHandle<()>,
}

impl Runtime {
    /// Build the runtime on the system `ssh` client
    pub async fn start(config: RdockConfig) -> Self {
        let transport = Arc::new(OpenSshTransport::new(config.ssh.clone()));
        Self::with_transport(config, transport).await
    }

    /// Build the runtime on any transport
    pub async fn with_transport(config: RdockConfig, transport: Arc<dyn Transport>) -> Self {
        let pool = Arc::new(ConnectionPool::new(
            transport,
            PoolSettings::from(&config.ssh),
        ));
        let adapter = RemoteExecutionAdapter::new(CommandExecutor::new(Arc::clone(&pool)));

        let manager = ServiceLifecycleManager::load(
            SnapshotStore::new(&config.services.state_file),
            ManagerSettings::from(&config.services),
        )
        .await;

        let persist = config.ssh.control_persist;
        if !persist.is_zero() && persist < config.reaper.idle_timeout {
            tracing::warn!(
                "ssh.control_persist ({:?}) is shorter than reaper.idle_timeout ({:?}); \
                 idle masters will exit before the reaper closes them",
                persist,
                config.reaper.idle_timeout
            );
        }

        let cancel = CancellationToken::new();
        let reaper =
            IdleReaper::from_config(&config.reaper).spawn(Arc::clone(&pool), cancel.clone());

        tracing::debug!("Runtime started (state file {:?})", config.services.state_file);
        Self {
            config,
            pool,
            adapter,
            manager: Arc::new(manager),
            cancel,
            reaper,
        }
    }

    pub fn config(&self) -> &RdockConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn adapter(&self) -> &RemoteExecutionAdapter {
        &self.adapter
    }

    pub fn executor(&self) -> &CommandExecutor {
        self.adapter.executor()
    }

    pub fn manager(&self) -> &Arc<ServiceLifecycleManager> {
        &self.manager
    }

    /// Remote capability bound to `key` for one request
    pub fn remote(&self, key: ConnectionKey) -> Arc<dyn RemoteExecution> {
        Arc::new(self.adapter.bind(key))
    }

    /// Stop the reaper, let deployments finish, then close every session
    pub async fn shutdown(self) {
        let pool = self.wind_down().await;
        let closed = pool.close_all().await;
        tracing::info!("Shutdown complete, closed {} SSH connections", closed);
    }

    /// Like [`shutdown`](Self::shutdown), but leave healthy sessions and
    /// their tunnels running for the next process to adopt. Masters expire
    /// on their own after `ssh.control_persist` without clients.
    pub async fn detach(self) {
        let pool = self.wind_down().await;
        let detached = pool.detach_all().await;
        tracing::info!("Shutdown complete, left {} SSH connections open", detached);
    }

    async fn wind_down(self) -> Arc<ConnectionPool> {
        self.cancel.cancel();
        if let Err(e) = self.reaper.await {
            tracing::warn!("Idle reaper ended abnormally: {}", e);
        }
        self.manager.wait_for_deployments().await;
        self.pool
    }
}
