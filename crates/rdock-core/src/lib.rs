//! rdock-core: Core abstractions and configuration for rdock
//!
//! This crate provides the shared types, the error taxonomy, configuration
//! structures and the remote-execution capability trait used by the
//! connection pool, the service lifecycle manager and the CLI.

pub mod config;
pub mod error;
pub mod service;
pub mod time;
pub mod traits;
pub mod types;

pub use error::RdockError;
pub use types::ConnectionKey;
