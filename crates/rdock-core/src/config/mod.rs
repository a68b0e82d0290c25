//! Configuration management for rdock

mod daemon;
pub mod serde_utils;

pub use daemon::{RdockConfig, ReaperConfig, ServicesConfig, SshConfig};

use crate::error::ConfigError;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "rdock";

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}

/// `<config dir>/rdock`, falling back to `./rdock`
pub fn default_config_dir() -> PathBuf {
    app_dir(dirs::config_dir())
}

/// `<data dir>/rdock`; the service snapshot lives here
pub fn default_data_dir() -> PathBuf {
    app_dir(dirs::data_dir())
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Read a TOML config file. A missing file is [`ConfigError::NotFound`] so
/// callers can decide whether defaults apply.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()))
        }
        Err(e) => {
            return Err(ConfigError::Invalid(format!(
                "cannot read {}: {}",
                path.display(),
                e
            )))
        }
    };

    let config = toml::from_str(&text)?;
    tracing::debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write `config` as pretty TOML, creating parent directories
pub fn save_config<T: Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let text = toml::to_string_pretty(config)?;
    let io_err = |what: &str, e: std::io::Error| {
        ConfigError::Invalid(format!("cannot {} {}: {}", what, path.display(), e))
    };

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| io_err("create parent of", e))?;
    }
    std::fs::write(path, text).map_err(|e| io_err("write", e))?;

    tracing::debug!("Wrote configuration to {}", path.display());
    Ok(())
}
