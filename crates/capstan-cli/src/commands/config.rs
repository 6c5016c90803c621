//! Configuration inspection

use std::path::PathBuf;

use anyhow::{Context, Result};

use capstan_core::config::{self, DeployConfig};
use capstan_core::error::ConfigError;

use crate::output::print_warning;

/// Load the deployment config from the given path, or the default
/// location when none is given.
pub fn load_deploy_config(path: Option<&PathBuf>) -> Result<DeployConfig> {
    let path = path
        .cloned()
        .unwrap_or_else(config::default_config_path);
    let config: DeployConfig = config::load_config(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    Ok(config)
}

/// Print the effective configuration as TOML.
///
/// Falls back to defaults when no config file exists, so inspection
/// works before any setup.
pub fn config_show(path: Option<&PathBuf>) -> Result<()> {
    let resolved = path
        .cloned()
        .unwrap_or_else(config::default_config_path);

    let config: DeployConfig = match config::load_config(&resolved) {
        Ok(config) => config,
        Err(ConfigError::NotFound(_)) => {
            print_warning(&format!(
                "No config file at {}; showing defaults",
                resolved.display()
            ));
            DeployConfig::default()
        }
        Err(e) => return Err(e).context("Failed to load config"),
    };

    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
