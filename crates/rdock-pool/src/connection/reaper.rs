//! Idle connection reaper
//!
//! Background task that periodically closes pooled sessions nobody has used
//! for longer than the idle timeout. Sessions in use when a sweep runs are
//! left alone until the next sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rdock_core::config::ReaperConfig;

use super::ConnectionPool;

/// Schedule of the idle sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleReaper {
    /// Time between sweeps
    pub check_interval: Duration,
    /// Sessions idle for longer than this are closed
    pub idle_timeout: Duration,
}

impl IdleReaper {
    pub fn new(check_interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            check_interval,
            idle_timeout,
        }
    }

    pub fn from_config(config: &ReaperConfig) -> Self {
        Self::new(config.check_interval, config.idle_timeout)
    }

    /// Run the reaper on the current runtime until `cancel` fires
    pub fn spawn(self, pool: Arc<ConnectionPool>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(run_idle_reaper(pool, self, cancel))
    }
}

impl Default for IdleReaper {
    fn default() -> Self {
        Self::from_config(&ReaperConfig::default())
    }
}

/// Run the idle sweep loop.
///
/// The first sweep happens one full interval after start.
pub async fn run_idle_reaper(
    pool: Arc<ConnectionPool>,
    reaper: IdleReaper,
    cancel: CancellationToken,
) {
    let start = tokio::time::Instant::now() + reaper.check_interval;
    let mut interval = tokio::time::interval_at(start, reaper.check_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(
        "Starting idle connection reaper (idle timeout: {:?}, check interval: {:?})",
        reaper.idle_timeout,
        reaper.check_interval
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let closed = pool.cleanup_idle(reaper.idle_timeout).await;
                if !closed.is_empty() {
                    tracing::info!("Closed {} idle SSH connections", closed.len());
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Idle connection reaper shutting down");
                break;
            }
        }
    }
}
