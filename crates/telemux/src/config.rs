//! CLI-specific configuration: `telemux-config` plus `GlobalOpts` overrides.

use std::path::PathBuf;

use telemux_config::TelemuxConfig;
use telemux_core::HubConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The file `--config` points at, or the platform default.
pub fn resolved_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(telemux_config::config_path)
}

/// Load the config file and apply command-line overrides.
pub fn load(global: &GlobalOpts) -> Result<TelemuxConfig, CliError> {
    let path = resolved_path(global);
    let mut config = telemux_config::load_config_from(&path)
        .map_err(|e| CliError::from_config(path.display().to_string(), e))?;

    if let Some(ref url) = global.url {
        config.url.clone_from(url);
        config
            .validate()
            .map_err(|e| CliError::from_config(path.display().to_string(), e))?;
    }
    Ok(config)
}

/// Runtime hub configuration for streaming commands.
pub fn hub_config(config: &TelemuxConfig) -> Result<HubConfig, CliError> {
    config
        .to_hub_config()
        .map_err(|e| CliError::from_config("<resolved>", e))
}
