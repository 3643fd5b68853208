//! Command implementations.

pub mod build;
pub mod pack;
pub mod serve;

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use pagewright_core::Config;

/// Load the configuration (defaults when the file is absent) with
/// environment overrides, resolving relative paths against the directory
/// holding the configuration file.
pub fn load_config(config_path: &Path) -> Result<Config> {
    let mut config = Config::load_with_env(config_path)
        .wrap_err_with(|| format!("Failed to load configuration from {}", config_path.display()))?;

    let base = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let base = std::path::absolute(base).wrap_err("Failed to resolve project directory")?;
    config.rebase(&base);

    tracing::debug!(?config, "Loaded configuration");
    Ok(config)
}
