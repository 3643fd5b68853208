//! Embedded preview server with live reload support.
//!
//! Pages are rendered on request from the live template cache; everything
//! else is served from disk:
//!
//! | request                | response                                     |
//! |------------------------|----------------------------------------------|
//! | `*.css`                | static layers (`/css/*` from the live source)|
//! | `/_/…`                 | compiled asset from `<output>/_`             |
//! | `/`                    | `302` to `/index.html`                       |
//! | `/<name>.html`         | rendered page, or a `404` diagnostic page    |
//! | `/__livereload`        | server-sent reload events                    |
//! | anything else          | output tree, then content tree, then `/js/*` |

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode, header},
    middleware::{self, Next},
    response::{
        Html, IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use pagewright_core::{Config, config::UI_DIR};
use pagewright_generator::{
    CacheController, CacheEvent, DocumentRenderer, RootPaths, render::NOT_FOUND_PAGE,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tower_http::services::ServeDir;
use tracing::{debug, error, warn};

/// Live reload message type.
#[derive(Debug, Clone)]
pub enum ReloadMessage {
    /// Full page reload.
    Reload,
    /// CSS-only reload (hot reload).
    CssReload,
}

/// Server state shared by the middleware, the SSE handler and the watcher.
pub struct ServerState {
    /// Broadcast channel for live reload events.
    pub reload_tx: broadcast::Sender<ReloadMessage>,
    /// Live template/model cache.
    pub cache: Arc<CacheController>,
    renderer: DocumentRenderer,
    content_dir: PathBuf,
    output_dir: PathBuf,
    content_extension: String,
}

impl ServerState {
    /// Create the state for `config`.
    pub fn new(config: &Config, cache: Arc<CacheController>) -> Self {
        let (reload_tx, _) = broadcast::channel(16);
        Self {
            reload_tx,
            cache,
            renderer: DocumentRenderer::from_config(config),
            content_dir: config.content_dir().to_path_buf(),
            output_dir: config.output_dir().to_path_buf(),
            content_extension: config.paths.content_extension.clone(),
        }
    }

    /// Send a reload notification to all connected clients.
    pub fn notify_reload(&self) {
        let _ = self.reload_tx.send(ReloadMessage::Reload);
    }

    /// Send a CSS reload notification (for hot reload).
    pub fn notify_css_reload(&self) {
        let _ = self.reload_tx.send(ReloadMessage::CssReload);
    }

    fn content_source(&self, name: &str) -> PathBuf {
        self.content_dir
            .join(format!("{name}.{}", self.content_extension))
    }
}

/// Turn cache invalidations into full page reloads.
pub fn forward_invalidations(state: Arc<ServerState>) -> JoinHandle<()> {
    let mut events = state.cache.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CacheEvent::Invalidated { .. }) => state.notify_reload(),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "cache event receiver lagged");
                    state.notify_reload();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Create the preview server router.
pub fn create_router(config: &Config, state: Arc<ServerState>) -> Router {
    let files = ServeDir::new(config.output_dir()).fallback(ServeDir::new(config.content_dir()));

    Router::new()
        .route("/__livereload", get(livereload_handler))
        .nest_service("/css", ServeDir::new(config.css_dir()))
        .nest_service("/js", ServeDir::new(config.js_dir()))
        .fallback_service(files)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            preview_middleware,
        ))
        .with_state(state)
}

/// What the middleware does with a request path.
#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    PassThrough,
    Invalid,
    Asset(&'a str),
    Index,
    Page(&'a str),
}

fn classify(path: &str) -> Route<'_> {
    if path.split('/').any(|segment| segment == "..") {
        return Route::Invalid;
    }
    if path.ends_with(".css") {
        return Route::PassThrough;
    }
    if let Some(asset) = path.strip_prefix("/_/") {
        return if is_contained(asset) {
            Route::Asset(asset)
        } else {
            Route::Invalid
        };
    }
    if path == "/" {
        return Route::Index;
    }
    match path.strip_prefix('/').and_then(|p| p.strip_suffix(".html")) {
        Some(name) if is_contained(name) => Route::Page(name),
        Some(_) => Route::Invalid,
        None => Route::PassThrough,
    }
}

/// Whether `relative` names a path strictly below the directory it is joined to.
///
/// Only plain segments are allowed: no empty, `.` or `..` segments and no
/// root or prefix components.
fn is_contained(relative: &str) -> bool {
    !relative.is_empty()
        && relative
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
        && Path::new(relative)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

/// Intercepts page and asset requests before the static layers.
pub async fn preview_middleware(
    State(state): State<Arc<ServerState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    match classify(&path) {
        Route::PassThrough => next.run(request).await,
        Route::Invalid => not_found_page(&path),
        Route::Asset(asset) => serve_asset(&state.output_dir, asset, &path).await,
        Route::Index => (StatusCode::FOUND, [(header::LOCATION, "/index.html")]).into_response(),
        Route::Page(name) => render_page(&state, name, &path).await,
    }
}

async fn serve_asset(output_dir: &Path, asset: &str, request_path: &str) -> Response {
    let file = output_dir.join(UI_DIR).join(asset);
    match tokio::fs::read(&file).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, asset_content_type(&file))], bytes).into_response(),
        Err(e) => {
            debug!(path = %file.display(), error = %e, "asset not found");
            (
                StatusCode::NOT_FOUND,
                format!("Asset not found: {request_path}"),
            )
                .into_response()
        }
    }
}

/// Content type of a compiled asset.
fn asset_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("js") => "application/javascript",
        Some("woff2") => "font/woff2",
        Some("woff") => "font/woff",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

async fn render_page(state: &ServerState, name: &str, request_path: &str) -> Response {
    let source = state.content_source(name);
    if name != NOT_FOUND_PAGE && !tokio::fs::try_exists(&source).await.unwrap_or(false) {
        return not_found_page(request_path);
    }

    let generation = match state.cache.ensure().await {
        Ok(generation) => generation,
        Err(e) => {
            error!(path = request_path, error = %e, "template cache unavailable");
            return error_page(&e.to_string());
        }
    };

    let renderer = state.renderer.clone();
    let rendered = tokio::task::spawn_blocking(move || {
        renderer.render(&source, &generation, &RootPaths::dev())
    })
    .await;

    match rendered {
        Ok(Ok(page)) => Html(inject_livereload(&rewrite_asset_links(&page.html))).into_response(),
        Ok(Err(e)) => {
            warn!(path = request_path, error = %e, "preview render failed");
            error_page(&e.to_string())
        }
        Err(e) => {
            error!(path = request_path, error = %e, "preview render task failed");
            error_page(&e.to_string())
        }
    }
}

/// Relative bundle links and the live sources they are served from in dev mode.
const ASSET_LINK_REWRITES: &[(&str, &str)] = &[
    ("href=\"./_/css/main.css\"", "href=\"/css/site.css\""),
    ("href=\"_/css/main.css\"", "href=\"/css/site.css\""),
    ("src=\"./_/js/main.js\"", "src=\"/js/main.js\""),
    ("src=\"_/js/main.js\"", "src=\"/js/main.js\""),
];

/// Point bundled stylesheet and script links at the live sources.
///
/// Only attribute values that are exactly the relative bundle path are
/// rewritten; absolute or parent-relative links are left alone.
fn rewrite_asset_links(html: &str) -> String {
    ASSET_LINK_REWRITES
        .iter()
        .fold(html.to_string(), |html, (from, to)| html.replace(from, to))
}

/// Insert the live reload script before the first `</head>`.
fn inject_livereload(html: &str) -> String {
    match html.to_ascii_lowercase().find("</head>") {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + LIVERELOAD_SCRIPT.len());
            out.push_str(&html[..pos]);
            out.push_str(LIVERELOAD_SCRIPT);
            out.push_str(&html[pos..]);
            out
        }
        None => format!("{html}{LIVERELOAD_SCRIPT}"),
    }
}

fn not_found_page(request_path: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Html(format!(
            "<!DOCTYPE html><html><head><title>Not Found</title></head><body><h1>Preview page not found</h1><p><code>{}</code></p></body></html>",
            escape_html(request_path)
        )),
    )
        .into_response()
}

fn error_page(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!(
            "<!DOCTYPE html><html><head><title>Preview Error</title></head><body><h1>Preview Error</h1><pre>{}</pre></body></html>",
            escape_html(message)
        )),
    )
        .into_response()
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Server-Sent Events handler for live reload.
async fn livereload_handler(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.reload_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| {
        match msg {
            Ok(ReloadMessage::Reload) => Some(Ok(Event::default().data("reload"))),
            Ok(ReloadMessage::CssReload) => Some(Ok(Event::default().data("css-reload"))),
            Err(_) => None, // Ignore lagged messages
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}

/// JavaScript snippet to inject for live reload.
pub const LIVERELOAD_SCRIPT: &str = r#"
<script>
(function() {
    const source = new EventSource('/__livereload');
    source.onmessage = function(event) {
        if (event.data === 'reload') {
            window.location.reload();
        } else if (event.data === 'css-reload') {
            document.querySelectorAll('link[rel="stylesheet"]').forEach(function(link) {
                const href = link.href.split('?')[0];
                link.href = href + '?v=' + Date.now();
            });
        }
    };
    source.onerror = function() {
        console.log('[livereload] Connection lost, retrying...');
    };
})();
</script>
"#;
