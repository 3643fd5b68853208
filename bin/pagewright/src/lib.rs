//! pagewright CLI Library
//!
//! Command implementations and the preview server behind the `pagewright`
//! binary.
//!
//! # Modules
//!
//! - [`cmd`] - Command implementations (build, serve, pack)
//! - [`server`] - Preview server rendering pages on request, with live reload
//! - [`watch`] - Change detection feeding the preview server
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use pagewright::cmd;
//!
//! // Render every content file into the output directory
//! cmd::build::run(Path::new("pagewright.toml"), None, false).unwrap();
//! ```

pub mod cmd;
pub mod server;
pub mod watch;

// Re-export core types for convenience
pub use pagewright_core::Config;
pub use pagewright_generator::{BuildStats, Builder, CacheController};

/// Initialize tracing with the specified verbosity level.
///
/// # Arguments
///
/// * `verbose` - Verbosity level (0 = WARN, 1 = INFO, 2 = DEBUG, 3+ = TRACE)
///
/// # Example
///
/// ```no_run
/// pagewright::init_tracing(2); // Enable DEBUG level logging
/// ```
pub fn init_tracing(verbose: u8) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}
