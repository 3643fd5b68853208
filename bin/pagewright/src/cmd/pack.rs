//! Pack command - zips the compiled asset tree

use std::path::{Path, PathBuf};

use color_eyre::eyre::{Result, WrapErr};
use pagewright_generator::pack;

use super::load_config;

/// Run the pack command.
///
/// Arguments left out fall back to the `[bundle]` configuration section.
pub fn run(
    config_path: &Path,
    source: Option<&Path>,
    output: Option<&Path>,
    name: Option<&str>,
) -> Result<PathBuf> {
    let config = load_config(config_path)?;

    let source = source.unwrap_or(&config.bundle.source_dir);
    let output = output.unwrap_or(&config.bundle.output_dir);
    let name = name.unwrap_or(&config.bundle.name);
    tracing::info!(?source, ?output, name, "Packing bundle");

    let archive = pack(source, output, name)
        .wrap_err_with(|| format!("Failed to pack {}", source.display()))?;

    println!();
    println!("  Bundle:     {}", archive.display());
    if std::env::var_os("CI").is_none() {
        println!("  Use with:   --ui-bundle-url={}", archive.display());
    }
    println!();

    Ok(archive)
}
