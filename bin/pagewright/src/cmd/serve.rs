//! Serve command - preview server with live reload

use std::{path::Path, sync::Arc};

use color_eyre::eyre::{Result, WrapErr};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use pagewright_core::ModelPolicy;
use pagewright_generator::{CacheController, FsGenerationSource};
use tokio::{net::TcpListener, sync::mpsc};

use super::load_config;
use crate::{
    server::{ServerState, create_router, forward_invalidations},
    watch::{self, Rebuilder, WatchPaths},
};

/// Run the serve command.
///
/// Pages are rendered on request from the live templates; template, model,
/// stylesheet and content changes are pushed to connected browsers.
pub async fn run(config_path: &Path, port: Option<u16>, open_browser: bool) -> Result<()> {
    tracing::info!(?config_path, ?port, "Starting preview server");

    let mut config = load_config(config_path)?;
    if let Some(port) = port {
        config.serve.port = port;
    }

    // A broken model must not take the preview down.
    let source = FsGenerationSource::from_config(&config, ModelPolicy::FallbackToDefault);
    let cache = Arc::new(CacheController::new(Arc::new(source)));
    let state = Arc::new(ServerState::new(&config, Arc::clone(&cache)));
    forward_invalidations(Arc::clone(&state));

    if let Err(e) = cache.ensure().await {
        tracing::warn!(error = %e, "initial template load failed; will retry on request");
    }

    // Setup file watcher
    let (tx, rx) = mpsc::channel::<notify::Event>(64);
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.blocking_send(event);
            }
        },
        notify::Config::default(),
    )
    .wrap_err("Failed to create file watcher")?;

    let paths = WatchPaths::from_config(&config);
    for root in paths.roots() {
        if root.exists() {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .wrap_err_with(|| format!("Failed to watch {}", root.display()))?;
            tracing::debug!(root = %root.display(), "Watching directory");
        }
    }

    let rebuilder = config
        .serve
        .rebuild_on_change
        .then(|| Rebuilder::new(config.clone()));
    tokio::spawn(watch::run(rx, paths, Arc::clone(&state), rebuilder));

    // Start server
    let app = create_router(&config, state);
    let addr = format!("{}:{}", config.serve.host, config.serve.port);

    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind to {addr}"))?;

    let url = format!("http://localhost:{}", config.serve.port);
    println!();
    println!("  Preview server running at {url}");
    println!("  Press Ctrl+C to stop");
    println!();

    if open_browser {
        let _ = open::that(&url);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("Server error")?;

    // Closing the watcher ends the watch task.
    drop(watcher);
    tracing::info!("Preview server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!();
    println!("  Shutting down...");
}
