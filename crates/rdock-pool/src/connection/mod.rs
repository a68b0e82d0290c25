//! Connection management

mod pool;
mod reaper;

pub use pool::{ConnectionPool, PoolSettings, SessionHandle, PROBE_COMMAND};
pub use reaper::{run_idle_reaper, IdleReaper};
