//! rdock-pool: pooled SSH sessions to remote Docker hosts
//!
//! One long-lived, multiplexed SSH master session is kept per (user, host)
//! pair so remote commands skip the handshake. The pool owns those sessions,
//! the executor runs commands through them, the idle reaper closes the ones
//! nobody uses, and the adapter exposes a per-host `RemoteExecution`
//! capability (commands plus port tunnels) to the service manager.

pub mod adapter;
pub mod connection;
pub mod executor;
pub mod transport;

pub use adapter::{BoundRemote, RemoteExecutionAdapter, TunnelInfo};
pub use connection::{run_idle_reaper, ConnectionPool, IdleReaper, PoolSettings, SessionHandle};
pub use executor::CommandExecutor;
pub use transport::{CommandOutput, ForwardOp, MasterSession, OpenSshTransport, Transport};
