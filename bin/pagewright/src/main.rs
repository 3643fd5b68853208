//! pagewright CLI
//!
//! Renders UI preview pages, serves them with live reload and packs the
//! compiled asset bundle.
//!
//! This is the binary entry point. The library functionality is in `lib.rs`.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;

/// Command-line interface for pagewright.
#[derive(Parser)]
#[command(
    name = "pagewright",
    version,
    about = "Template-driven preview renderer and UI bundle packager"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "pagewright.toml")]
    config: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(clap::Subcommand)]
enum Commands {
    /// Render every content file into the output directory
    Build {
        /// Output directory (overrides paths.output)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Pack the asset bundle after building
        #[arg(long)]
        bundle: bool,
    },
    /// Start the preview server with live reload
    Serve {
        /// Port to listen on (overrides serve.port)
        #[arg(short, long)]
        port: Option<u16>,
        /// Open browser automatically
        #[arg(long)]
        open: bool,
    },
    /// Zip the compiled asset tree into <OUTPUT>/<NAME>-bundle.zip
    Pack {
        /// Directory to archive (defaults to bundle.source_dir)
        source: Option<PathBuf>,
        /// Directory receiving the archive (defaults to bundle.output_dir)
        output: Option<PathBuf>,
        /// Bundle name (defaults to bundle.name)
        name: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    pagewright::init_tracing(cli.verbose);

    match cli.command {
        Commands::Build { output, bundle } => {
            pagewright::cmd::build::run(&cli.config, output.as_deref(), bundle)?;
        }
        Commands::Serve { port, open } => {
            pagewright::cmd::serve::run(&cli.config, port, open).await?;
        }
        Commands::Pack {
            source,
            output,
            name,
        } => {
            pagewright::cmd::pack::run(
                &cli.config,
                source.as_deref(),
                output.as_deref(),
                name.as_deref(),
            )?;
        }
    }

    Ok(())
}
