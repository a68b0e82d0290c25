//! CLI command implementations

mod config;
mod exec;
mod service;
mod session;

pub use config::{config_init, config_path, config_show, load_or_default, resolve_config_path};
pub use exec::exec_command;
pub use service::{
    service_create, service_delete, service_get, service_info, service_list, service_logs,
    service_start, service_stop, CreateOptions,
};
pub use session::disconnect;
