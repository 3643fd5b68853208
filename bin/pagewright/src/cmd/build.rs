//! Build command - renders every content file

use std::{path::Path, time::Instant};

use color_eyre::eyre::{Result, WrapErr};
use pagewright_generator::{Builder, pack};

use super::load_config;

/// Run the build command.
///
/// Renders all content files into the output directory and optionally packs
/// the compiled asset tree afterwards.
pub fn run(config_path: &Path, output: Option<&Path>, bundle: bool) -> Result<()> {
    let start = Instant::now();
    tracing::info!(?config_path, ?output, bundle, "Starting build");

    let mut config = load_config(config_path)?;

    // Override output directory if specified
    if let Some(output) = output {
        config.paths.output = std::path::absolute(output).wrap_err("Invalid output directory")?;
    }

    let stats = Builder::new(config.clone())
        .build()
        .wrap_err("Build failed")?;

    let duration = start.elapsed();

    println!();
    println!("  Build completed!");
    println!();
    println!("  Pages:      {}", stats.pages);
    println!("  Failed:     {}", stats.failed.len());
    for failed in &stats.failed {
        println!("    ✗ {}", failed.display());
    }
    println!();
    println!("  Duration:   {:.2}s", duration.as_secs_f64());
    println!("  Output:     {}", config.output_dir().display());
    println!();

    if bundle {
        let archive = pack(
            &config.bundle.source_dir,
            &config.bundle.output_dir,
            &config.bundle.name,
        )
        .wrap_err("Packaging failed")?;
        println!("  Bundle:     {}", archive.display());
        println!();
    }

    tracing::info!(?stats, ?duration, "Build completed");

    Ok(())
}
