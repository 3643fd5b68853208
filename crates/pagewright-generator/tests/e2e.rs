//! End-to-end tests for pagewright.
//!
//! These tests build a small project on disk and drive it through the cache,
//! the renderer, the batch builder and the packager.

use std::{
    fs,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use pagewright_core::{Config, ModelPolicy};
use pagewright_generator::{
    Builder, CacheController, CacheError, CacheState, DocumentRenderer, FsGenerationSource,
    Generation, GenerationSource, RenderError, RootPaths, pack,
};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, content).expect("write");
}

fn project() -> (tempfile::TempDir, Config) {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    write(root, "src/partials/head.html", "<head><title>{{ page.title }}</title></head>");
    write(root, "src/helpers/eq.jinja", "args[0] == args[1]");
    write(
        root,
        "src/layouts/default.html",
        "<html>{% include \"head\" %}<body>{% if eq(page.layout, 'default') %}D{% endif %}{{ page.contents }}</body></html>",
    );
    write(root, "src/layouts/404.html", "<h1>{{ page.title }}</h1>");
    write(root, "preview-src/ui-model.yml", "site:\n  title: T\npage: {}\n");
    write(root, "preview-src/index.md", "# Hello\n\nFirst page.");
    let config = Config::for_root(root);
    (dir, config)
}

fn source(config: &Config) -> Arc<FsGenerationSource> {
    Arc::new(FsGenerationSource::from_config(config, ModelPolicy::FallbackToDefault))
}

#[tokio::test]
async fn test_render_through_cache() {
    let (_dir, config) = project();
    let cache = CacheController::new(source(&config));
    let renderer = DocumentRenderer::from_config(&config);

    let generation = cache.ensure().await.expect("ensure");
    let page = renderer
        .render(
            &config.content_dir().join("index.md"),
            &generation,
            &RootPaths::dev(),
        )
        .expect("render");

    assert!(page.html.contains("<title>Hello</title>"));
    assert!(page.html.contains("<body>D<p>First page.</p>"));
    assert_eq!(cache.state(), CacheState::Populated);
}

#[tokio::test]
async fn test_template_edit_visible_after_invalidate() {
    let (dir, config) = project();
    let cache = CacheController::new(source(&config));
    let renderer = DocumentRenderer::from_config(&config);
    let index = config.content_dir().join("index.md");

    let before = renderer
        .render(&index, &cache.ensure().await.expect("ensure"), &RootPaths::dev())
        .expect("render");
    assert!(!before.html.contains("EDITED"));

    write(dir.path(), "src/layouts/default.html", "EDITED {{ page.title }}");

    let cached = renderer
        .render(&index, &cache.ensure().await.expect("ensure"), &RootPaths::dev())
        .expect("render");
    assert_eq!(cached, before, "no reload without invalidation");

    cache.invalidate(Some(&dir.path().join("src/layouts/default.html")));
    let after = renderer
        .render(&index, &cache.ensure().await.expect("ensure"), &RootPaths::dev())
        .expect("render");
    assert_eq!(after.html, "EDITED Hello");
}

#[tokio::test]
async fn test_dev_mode_tolerates_broken_model() {
    let (dir, config) = project();
    write(dir.path(), "preview-src/ui-model.yml", "- not a model");

    let cache = CacheController::new(source(&config));
    let generation = cache.ensure().await.expect("fallback model");
    assert_eq!(
        generation
            .model()
            .site()
            .get("title")
            .and_then(|v| v.as_str()),
        Some("Preview")
    );
}

#[tokio::test]
async fn test_broken_template_leaves_cache_absent() {
    let (dir, config) = project();
    write(dir.path(), "src/layouts/broken.html", "{% for %}");

    let cache = CacheController::new(source(&config));
    let err = cache.ensure().await.unwrap_err();
    assert!(matches!(err, CacheError::Template(_)));
    assert_eq!(cache.state(), CacheState::Absent);

    fs::remove_file(dir.path().join("src/layouts/broken.html")).expect("remove");
    cache.ensure().await.expect("recovers after fix");
}

#[test]
fn test_missing_layout_error() {
    let (dir, config) = project();
    write(dir.path(), "preview-src/other.md", "# Other\n:page-layout: article\n\nBody");

    let generation = source(&config).load().expect("load");
    let err = DocumentRenderer::from_config(&config)
        .render(
            &config.content_dir().join("other.md"),
            &generation,
            &RootPaths::dev(),
        )
        .unwrap_err();
    assert!(matches!(err, RenderError::LayoutNotFound(ref name) if name == "article"));
}

#[test]
fn test_batch_build_skips_failures() {
    let (dir, config) = project();
    write(dir.path(), "preview-src/bad.md", "# Bad\n:page-layout: article\n\nBody");
    write(dir.path(), "preview-src/docs/page.md", "# Nested\n\nBody");

    let stats = Builder::new(config).build().expect("build");

    assert_eq!(stats.pages, 2);
    assert_eq!(stats.failed.len(), 1);
    assert!(dir.path().join("public/index.html").exists());
    assert!(dir.path().join("public/docs/page.html").exists());
    assert!(!dir.path().join("public/bad.html").exists());
}

#[test]
fn test_batch_build_skips_unconvertible_page() {
    let (dir, config) = project();
    write(dir.path(), "preview-src/a.md", "# A\n\nBody");
    write(dir.path(), "preview-src/b.md", "---\ntitle: [unclosed\n---\nBody");
    write(dir.path(), "preview-src/c.md", "# C\n\nBody");

    let stats = Builder::new(config).build().expect("build");

    assert_eq!(stats.pages, 3);
    assert_eq!(stats.failed, vec![Path::new("b.md").to_path_buf()]);
    assert!(dir.path().join("public/a.html").exists());
    assert!(!dir.path().join("public/b.html").exists());
    assert!(dir.path().join("public/c.html").exists());
}

/// Counts loads and wraps the filesystem source.
struct CountingSource {
    inner: FsGenerationSource,
    loads: AtomicUsize,
}

impl GenerationSource for CountingSource {
    fn load(&self) -> Result<Generation, CacheError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(50));
        self.inner.load()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_population() {
    let (_dir, config) = project();
    let counting = Arc::new(CountingSource {
        inner: FsGenerationSource::from_config(&config, ModelPolicy::Strict),
        loads: AtomicUsize::new(0),
    });
    let cache = Arc::new(CacheController::new(counting.clone()));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.ensure().await })
        })
        .collect();

    let mut generations = Vec::new();
    for handle in handles {
        generations.push(handle.await.expect("join").expect("ensure"));
    }

    assert_eq!(counting.loads.load(Ordering::SeqCst), 1);
    assert!(generations.iter().all(|g| Arc::ptr_eq(g, &generations[0])));
}

#[test]
fn test_pack_built_assets() {
    let (dir, config) = project();
    write(dir.path(), "public/_/css/site.css", "body {}");
    write(dir.path(), "public/_/js/site.js", "console.log(1)");

    let archive = pack(
        &config.bundle.source_dir,
        &config.bundle.output_dir,
        &config.bundle.name,
    )
    .expect("pack");

    assert_eq!(archive, dir.path().join("build/ui-bundle.zip"));
    assert!(fs::metadata(&archive).expect("metadata").len() > 0);
}
