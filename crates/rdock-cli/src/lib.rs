//! rdock: command-line front end
//!
//! Wires the SSH connection pool into the service lifecycle manager and
//! exposes both through the `rdock` binary.

pub mod commands;
pub mod output;
pub mod runtime;

pub use runtime::Runtime;
