//! Batch build.
//!
//! Renders every content file once against a single generation and writes
//! the pages below the output root. A page that fails is logged and skipped;
//! the remaining pages are still written.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use pagewright_core::{Config, ModelPolicy};
use thiserror::Error;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::{
    cache::{CacheError, FsGenerationSource, Generation, GenerationSource},
    render::{DocumentRenderer, RenderError, RootPaths},
};

/// Build errors.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Templates or model could not be loaded.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// IO error.
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Content directory could not be scanned.
    #[error("failed to scan content: {0}")]
    Walk(#[from] walkdir::Error),

    /// A single page failed to render.
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Result type for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Build statistics.
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    /// Number of pages written.
    pub pages: usize,

    /// Content files that failed, relative to the content root.
    pub failed: Vec<PathBuf>,

    /// Build duration in milliseconds.
    pub duration_ms: u64,
}

/// Batch site builder.
#[derive(Debug)]
pub struct Builder {
    config: Config,
    renderer: DocumentRenderer,
}

impl Builder {
    /// Create a builder using the Markdown renderer configured by `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let renderer = DocumentRenderer::from_config(&config);
        Self { config, renderer }
    }

    /// Replace the renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: DocumentRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Load a generation from disk and build every page.
    ///
    /// The model is loaded strictly; a broken model aborts the build.
    pub fn build(&self) -> Result<BuildStats> {
        let source = FsGenerationSource::from_config(&self.config, ModelPolicy::Strict);
        let generation = source.load()?;
        self.build_with(&generation)
    }

    /// Build every page against `generation`.
    pub fn build_with(&self, generation: &Generation) -> Result<BuildStats> {
        let start = Instant::now();
        let mut stats = BuildStats::default();
        let content_dir = self.config.content_dir();
        let output_dir = self.config.output_dir();

        info!(
            content = %content_dir.display(),
            output = %output_dir.display(),
            "starting build"
        );

        if !content_dir.is_dir() {
            info!(dir = %content_dir.display(), "no content directory, nothing to build");
            return Ok(stats);
        }

        create_dir(output_dir)?;
        create_dir(&self.config.images_dir())?;

        let files = self.collect_content(content_dir)?;
        info!(count = files.len(), "rendering pages");

        for relative in files {
            match self.build_page(generation, &relative) {
                Ok(target) => {
                    debug!(path = %target.display(), "wrote page");
                    stats.pages += 1;
                }
                Err(e) => {
                    error!(file = %relative.display(), error = %e, "failed to build page");
                    stats.failed.push(relative);
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            pages = stats.pages,
            failed = stats.failed.len(),
            duration_ms = stats.duration_ms,
            "build complete"
        );

        Ok(stats)
    }

    /// Content files below `content_dir`, relative and sorted.
    fn collect_content(&self, content_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(content_dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() || !self.config.is_content_file(entry.path()) {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(content_dir) {
                files.push(relative.to_path_buf());
            }
        }
        Ok(files)
    }

    fn build_page(&self, generation: &Generation, relative: &Path) -> Result<PathBuf> {
        let source = self.config.content_dir().join(relative);
        let output_rel = relative.with_extension("html");
        let target = self.config.output_dir().join(&output_rel);

        let page = self.renderer.render(
            &source,
            generation,
            &RootPaths::for_output(&output_rel),
        )?;

        if let Some(parent) = target.parent() {
            create_dir(parent)?;
        }
        fs::write(&target, page.html).map_err(|source| BuildError::Io {
            path: target.clone(),
            source,
        })?;

        Ok(target)
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    })
}
