// src/commands/config.rs

//! Configuration commands

use anyhow::{Context, Result};
use anchore_worker::config::{BuildConfig, default_config_path};
use std::path::Path;

/// Load the config named on the command line, or the default one
pub fn load_config(path: Option<&Path>) -> Result<BuildConfig> {
    match path {
        Some(path) => BuildConfig::load_or_default(Some(path))
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => BuildConfig::load_or_default(None).with_context(|| {
            let default = default_config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<none>".to_string());
            format!("Failed to load default config: {}", default)
        }),
    }
}

/// Print the effective configuration with credentials masked
pub fn cmd_show_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    let rendered = config.to_toml().context("Failed to render config")?;
    print!("{}", rendered);
    Ok(())
}
