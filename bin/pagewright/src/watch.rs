//! File watching for the preview server.
//!
//! Changes are debounced, sorted into categories and dispatched:
//!
//! - templates (`layouts`, `partials`, `helpers`) and the model file drop
//!   the template cache, which in turn reloads every browser
//! - stylesheets trigger a CSS-only reload
//! - content files trigger a full reload and, when enabled, a background
//!   batch build

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use notify::{Event, EventKind};
use pagewright_core::Config;
use pagewright_generator::{
    Builder,
    template::{HELPERS_DIR, LAYOUTS_DIR, PARTIALS_DIR},
};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::server::ServerState;

/// Quiet period before a batch of changes is dispatched.
pub const DEBOUNCE_MS: u64 = 200;

/// Category of a changed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    Template,
    Model,
    Stylesheet,
    Content,
}

/// Check if path is a temp/backup file (editor artifacts).
pub fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

/// Watched locations derived from the configuration.
#[derive(Debug, Clone)]
pub struct WatchPaths {
    templates: Vec<PathBuf>,
    css: PathBuf,
    model: PathBuf,
    content: PathBuf,
    config: Config,
}

impl WatchPaths {
    /// Locations for `config`; paths should be absolute to match watcher events.
    pub fn from_config(config: &Config) -> Self {
        let src = config.templates_dir();
        Self {
            templates: [LAYOUTS_DIR, PARTIALS_DIR, HELPERS_DIR]
                .iter()
                .map(|dir| src.join(dir))
                .collect(),
            css: config.css_dir(),
            model: config.model_path(),
            content: config.content_dir().to_path_buf(),
            config: config.clone(),
        }
    }

    /// Directories handed to the file watcher.
    pub fn roots(&self) -> Vec<&Path> {
        let mut roots = vec![self.config.templates_dir(), self.content.as_path()];
        if let Some(model_dir) = self.model.parent() {
            if !roots.iter().any(|root| model_dir.starts_with(root)) {
                roots.push(model_dir);
            }
        }
        roots
    }

    /// Categorize a changed path; `None` means the change is ignored.
    pub fn categorize(&self, path: &Path) -> Option<ChangeKind> {
        if is_temp_file(path) {
            return None;
        }
        if path == self.model {
            return Some(ChangeKind::Model);
        }
        if self.templates.iter().any(|dir| path.starts_with(dir)) {
            return Some(ChangeKind::Template);
        }
        if path.starts_with(&self.css) {
            return Some(ChangeKind::Stylesheet);
        }
        if path.starts_with(&self.content) && self.config.is_content_file(path) {
            return Some(ChangeKind::Content);
        }
        None
    }
}

type RebuildJob = Box<dyn Fn() + Send + Sync>;

/// Runs batch builds in the background, one at a time.
///
/// Requests made while a build runs are folded into one follow-up build.
pub struct Rebuilder {
    job: RebuildJob,
    running: AtomicBool,
    pending: AtomicBool,
}

impl std::fmt::Debug for Rebuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rebuilder")
            .field("running", &self.running)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl Rebuilder {
    /// Rebuild the site described by `config`.
    pub fn new(config: Config) -> Arc<Self> {
        Self::with_job(move || rebuild(&config))
    }

    /// Run `job` for every coalesced rebuild.
    pub fn with_job(job: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            job: Box::new(job),
            running: AtomicBool::new(false),
            pending: AtomicBool::new(false),
        })
    }

    /// Request a rebuild; returns immediately.
    pub fn request(self: &Arc<Self>) {
        self.pending.store(true, Ordering::SeqCst);
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("rebuild already running, queued");
            return;
        }

        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.drain());
    }

    fn drain(&self) {
        loop {
            while self.pending.swap(false, Ordering::SeqCst) {
                (self.job)();
            }

            self.running.store(false, Ordering::SeqCst);
            // A request may have slipped in after the last swap.
            if !self.pending.load(Ordering::SeqCst) || self.running.swap(true, Ordering::SeqCst) {
                break;
            }
        }
    }
}

fn rebuild(config: &Config) {
    match Builder::new(config.clone()).build() {
        Ok(stats) => info!(
            pages = stats.pages,
            failed = stats.failed.len(),
            duration_ms = stats.duration_ms,
            "background rebuild finished"
        ),
        Err(e) => error!(error = %e, "background rebuild failed"),
    }
}

/// Whether a watcher event can change file contents.
pub fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Debounce watcher events and dispatch them until the channel closes.
pub async fn run(
    mut rx: mpsc::Receiver<Event>,
    paths: WatchPaths,
    state: Arc<ServerState>,
    rebuilder: Option<Arc<Rebuilder>>,
) {
    let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
    let quiet = Duration::from_millis(DEBOUNCE_MS);

    loop {
        let next = if pending.is_empty() {
            rx.recv().await
        } else {
            match tokio::time::timeout(quiet, rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    dispatch(
                        std::mem::take(&mut pending),
                        &paths,
                        &state,
                        rebuilder.as_ref(),
                    );
                    continue;
                }
            }
        };

        let Some(event) = next else {
            break;
        };
        if is_relevant(&event) {
            pending.extend(event.paths);
        }
    }

    debug!("watch channel closed");
}

fn dispatch(
    changed: BTreeSet<PathBuf>,
    paths: &WatchPaths,
    state: &ServerState,
    rebuilder: Option<&Arc<Rebuilder>>,
) {
    let mut kinds = BTreeSet::new();
    let mut trigger = None;
    for path in &changed {
        let Some(kind) = paths.categorize(path) else {
            continue;
        };
        debug!(path = %path.display(), ?kind, "change detected");
        if matches!(kind, ChangeKind::Template | ChangeKind::Model) && trigger.is_none() {
            trigger = Some(path.as_path());
        }
        kinds.insert(kind);
    }

    if kinds.is_empty() {
        return;
    }

    let full_reload = if let Some(trigger) = trigger {
        // Invalidation is forwarded to browsers as a reload.
        state.cache.invalidate(Some(trigger));
        true
    } else if kinds.contains(&ChangeKind::Content) {
        info!(files = changed.len(), "content changed");
        state.notify_reload();
        true
    } else {
        false
    };

    if kinds.contains(&ChangeKind::Stylesheet) && !full_reload {
        info!("stylesheet changed");
        state.notify_css_reload();
    }

    if let Some(rebuilder) = rebuilder.filter(|_| kinds.contains(&ChangeKind::Content)) {
        rebuilder.request();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, PoisonError, atomic::AtomicUsize, mpsc as std_mpsc};

    use pagewright_core::ModelPolicy;
    use pagewright_generator::{CacheController, CacheEvent, CacheState, FsGenerationSource};
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::server::ReloadMessage;

    fn paths() -> WatchPaths {
        WatchPaths::from_config(&Config::for_root(Path::new("/proj")))
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Config,
        paths: WatchPaths,
        state: Arc<ServerState>,
    }

    /// A populated cache over an empty project.
    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::for_root(dir.path());
        let source = FsGenerationSource::from_config(&config, ModelPolicy::FallbackToDefault);
        let cache = Arc::new(CacheController::new(Arc::new(source)));
        cache.ensure().await.expect("populate");
        let state = Arc::new(ServerState::new(&config, cache));
        let paths = WatchPaths::from_config(&config);
        Fixture {
            _dir: dir,
            config,
            paths,
            state,
        }
    }

    fn changed(paths: &[PathBuf]) -> BTreeSet<PathBuf> {
        paths.iter().cloned().collect()
    }

    fn counting_rebuilder() -> (Arc<Rebuilder>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let rebuilder = Rebuilder::with_job(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (rebuilder, runs)
    }

    async fn wait_for_runs(runs: &AtomicUsize, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while runs.load(Ordering::SeqCst) < expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("rebuild in time");
    }

    #[tokio::test]
    async fn test_template_change_invalidates() {
        let fx = fixture().await;
        let mut events = fx.state.cache.subscribe();
        let mut reloads = fx.state.reload_tx.subscribe();
        let (rebuilder, runs) = counting_rebuilder();
        let layout = fx.config.templates_dir().join("layouts/default.html");

        dispatch(changed(&[layout.clone()]), &fx.paths, &fx.state, Some(&rebuilder));

        assert_eq!(fx.state.cache.state(), CacheState::Absent);
        assert_eq!(
            events.try_recv().expect("event"),
            CacheEvent::Invalidated {
                trigger: Some(layout)
            }
        );
        // The reload reaches browsers through the invalidation event.
        assert!(matches!(reloads.try_recv(), Err(TryRecvError::Empty)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_model_change_invalidates() {
        let fx = fixture().await;
        let mut events = fx.state.cache.subscribe();

        dispatch(changed(&[fx.config.model_path()]), &fx.paths, &fx.state, None);

        assert_eq!(fx.state.cache.state(), CacheState::Absent);
        assert!(matches!(
            events.try_recv().expect("event"),
            CacheEvent::Invalidated { trigger: Some(_) }
        ));
    }

    #[tokio::test]
    async fn test_content_change_reloads_and_rebuilds() {
        let fx = fixture().await;
        let mut events = fx.state.cache.subscribe();
        let mut reloads = fx.state.reload_tx.subscribe();
        let (rebuilder, runs) = counting_rebuilder();
        let page = fx.config.content_dir().join("guide/setup.md");

        dispatch(changed(&[page]), &fx.paths, &fx.state, Some(&rebuilder));

        assert!(matches!(reloads.try_recv(), Ok(ReloadMessage::Reload)));
        assert!(matches!(reloads.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(fx.state.cache.state(), CacheState::Populated);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        wait_for_runs(&runs, 1).await;
    }

    #[tokio::test]
    async fn test_stylesheet_change_is_css_reload_only() {
        let fx = fixture().await;
        let mut reloads = fx.state.reload_tx.subscribe();
        let (rebuilder, runs) = counting_rebuilder();
        let css = fx.config.css_dir().join("site.css");

        dispatch(changed(&[css]), &fx.paths, &fx.state, Some(&rebuilder));

        assert!(matches!(reloads.try_recv(), Ok(ReloadMessage::CssReload)));
        assert!(matches!(reloads.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(fx.state.cache.state(), CacheState::Populated);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ignored_changes_do_nothing() {
        let fx = fixture().await;
        let mut reloads = fx.state.reload_tx.subscribe();
        let swap = fx.config.templates_dir().join("layouts/.default.html.swp");
        let js = fx.config.js_dir().join("site.js");

        dispatch(changed(&[swap, js]), &fx.paths, &fx.state, None);

        assert!(matches!(reloads.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(fx.state.cache.state(), CacheState::Populated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rebuild_requests_are_coalesced() {
        let (started_tx, started_rx) = std_mpsc::channel::<()>();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        let release_rx = Mutex::new(release_rx);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        // The first build blocks until released.
        let rebuilder = Rebuilder::with_job(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                let _ = started_tx
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .send(());
                let _ = release_rx
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .recv();
            }
        });

        rebuilder.request();
        tokio::task::spawn_blocking(move || started_rx.recv())
            .await
            .expect("join")
            .expect("first build started");

        rebuilder.request();
        rebuilder.request();
        rebuilder.request();
        release_tx.send(()).expect("release");

        wait_for_runs(&runs, 2).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_is_temp_file() {
        assert!(is_temp_file(Path::new("/proj/src/layouts/default.html~")));
        assert!(is_temp_file(Path::new("/proj/src/layouts/.default.html.swp")));
        assert!(is_temp_file(Path::new("/proj/preview-src/index.md.tmp")));
        assert!(!is_temp_file(Path::new("/proj/preview-src/index.md")));
    }

    #[test]
    fn test_categorize() {
        let paths = paths();
        assert_eq!(
            paths.categorize(Path::new("/proj/src/layouts/default.html")),
            Some(ChangeKind::Template)
        );
        assert_eq!(
            paths.categorize(Path::new("/proj/src/partials/header.html")),
            Some(ChangeKind::Template)
        );
        assert_eq!(
            paths.categorize(Path::new("/proj/src/helpers/eq.jinja")),
            Some(ChangeKind::Template)
        );
        assert_eq!(
            paths.categorize(Path::new("/proj/src/css/site.css")),
            Some(ChangeKind::Stylesheet)
        );
        assert_eq!(
            paths.categorize(Path::new("/proj/preview-src/ui-model.yml")),
            Some(ChangeKind::Model)
        );
        assert_eq!(
            paths.categorize(Path::new("/proj/preview-src/guide/setup.md")),
            Some(ChangeKind::Content)
        );
        assert_eq!(paths.categorize(Path::new("/proj/preview-src/img.png")), None);
        assert_eq!(paths.categorize(Path::new("/proj/src/js/site.js")), None);
        assert_eq!(paths.categorize(Path::new("/proj/src/layouts/.x.swp")), None);
    }

    #[test]
    fn test_roots() {
        let paths = paths();
        assert_eq!(
            paths.roots(),
            [Path::new("/proj/src"), Path::new("/proj/preview-src")]
        );
    }
}
