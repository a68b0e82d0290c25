//! rdock-services: managed containers on remote Docker hosts
//!
//! [`ServiceLifecycleManager`] owns the index of managed services, drives each
//! one through its create/start/stop/delete state machine and snapshots the
//! index to disk after every change. It reaches the remote host only through
//! [`rdock_core::traits::RemoteExecution`].

mod allocate;
pub mod command;
pub mod info;
pub mod manager;
pub mod store;

pub use info::{ConnectionInfo, LogEntry};
pub use manager::{ManagerSettings, ServiceLifecycleManager};
pub use store::SnapshotStore;
