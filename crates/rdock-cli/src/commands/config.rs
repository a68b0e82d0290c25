//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use rdock_core::config::{self, RdockConfig};
use rdock_core::error::ConfigError;

/// Explicit config path, or the default location
pub fn resolve_config_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Load the configuration.
///
/// A missing file at the default location means defaults; a missing file
/// the user named explicitly is an error.
pub fn load_or_default(config_path: Option<&Path>) -> Result<RdockConfig> {
    let path = resolve_config_path(config_path);
    match config::load_config::<RdockConfig>(&path) {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(_)) if config_path.is_none() => {
            tracing::debug!("No config file at {:?}, using defaults", path);
            Ok(RdockConfig::default())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to load config from {:?}", path)),
    }
}

/// Show the effective configuration
pub fn config_show(config_path: Option<&Path>) -> Result<()> {
    let path = resolve_config_path(config_path);
    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_warning(&format!("No configuration file found at {:?}, showing defaults", path));
    }
    println!();

    let config = load_or_default(config_path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}

/// Show the config file path
pub fn config_path(config_path: Option<&Path>) -> Result<()> {
    println!("{}", resolve_config_path(config_path).display());
    Ok(())
}

/// Write a default configuration file
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = resolve_config_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &RdockConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}
