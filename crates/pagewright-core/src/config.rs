//! Project configuration management.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Name of the sub-directory under the output root holding compiled assets.
pub const UI_DIR: &str = "_";

/// Main configuration structure for pagewright.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source and output locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Markup conversion settings.
    #[serde(default)]
    pub convert: ConvertConfig,

    /// Development server settings.
    #[serde(default)]
    pub serve: ServeConfig,

    /// Archive packaging settings.
    #[serde(default)]
    pub bundle: BundleConfig,
}

/// Source and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Template sources (`partials/`, `helpers/`, `layouts/`) plus `css/` and `js/`.
    #[serde(default = "default_src")]
    pub src: PathBuf,

    /// Content sources and the site model.
    #[serde(default = "default_content")]
    pub content: PathBuf,

    /// Site model file name, relative to `content`.
    #[serde(default = "default_model")]
    pub model: PathBuf,

    /// Output root for rendered pages.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Extension of content files.
    #[serde(default = "default_content_extension")]
    pub content_extension: String,
}

/// Attributes passed to the markup converter for every document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertConfig {
    /// Math notation mode (`stem` attribute).
    #[serde(default = "default_math")]
    pub math: String,

    /// Syntax highlighter identifier (`source-highlighter` attribute).
    #[serde(default = "default_source_highlighter")]
    pub source_highlighter: String,

    /// Whether external diagrams may be fetched during conversion.
    #[serde(default = "default_true")]
    pub fetch_diagrams: bool,

    /// Enable experimental converter features.
    #[serde(default = "default_true")]
    pub experimental: bool,
}

/// Development server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Run a batch build in the background when content files change.
    #[serde(default = "default_true")]
    pub rebuild_on_change: bool,
}

/// Archive packaging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleConfig {
    /// Directory whose files go into the archive.
    #[serde(default = "default_bundle_source")]
    pub source_dir: PathBuf,

    /// Directory receiving the archive.
    #[serde(default = "default_bundle_output")]
    pub output_dir: PathBuf,

    /// Archive base name; the file is `<name>-bundle.zip`.
    #[serde(default = "default_bundle_name")]
    pub name: String,
}

// Default value functions
fn default_src() -> PathBuf {
    PathBuf::from("src")
}

fn default_content() -> PathBuf {
    PathBuf::from("preview-src")
}

fn default_model() -> PathBuf {
    PathBuf::from("ui-model.yml")
}

fn default_output() -> PathBuf {
    PathBuf::from("public")
}

fn default_content_extension() -> String {
    "md".to_string()
}

fn default_math() -> String {
    "latexmath".to_string()
}

fn default_source_highlighter() -> String {
    "highlight.js".to_string()
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5252
}

fn default_bundle_source() -> PathBuf {
    PathBuf::from("public").join(UI_DIR)
}

fn default_bundle_output() -> PathBuf {
    PathBuf::from("build")
}

fn default_bundle_name() -> String {
    "ui".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            src: default_src(),
            content: default_content(),
            model: default_model(),
            output: default_output(),
            content_extension: default_content_extension(),
        }
    }
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            math: default_math(),
            source_highlighter: default_source_highlighter(),
            fetch_diagrams: true,
            experimental: true,
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rebuild_on_change: true,
        }
    }
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            source_dir: default_bundle_source(),
            output_dir: default_bundle_output(),
            name: default_bundle_name(),
        }
    }
}

impl Config {
    /// Load configuration layering `PAGEWRIGHT__SECTION__KEY` environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("PAGEWRIGHT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with every path resolved under `root`.
    #[must_use]
    pub fn for_root(root: &Path) -> Self {
        let mut config = Self::default();
        config.rebase(root);
        config
    }

    /// Resolve relative paths against `root`.
    pub fn rebase(&mut self, root: &Path) {
        let join = |p: &PathBuf| if p.is_absolute() { p.clone() } else { root.join(p) };
        self.paths.src = join(&self.paths.src);
        self.paths.content = join(&self.paths.content);
        self.paths.output = join(&self.paths.output);
        self.bundle.source_dir = join(&self.bundle.source_dir);
        self.bundle.output_dir = join(&self.bundle.output_dir);
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<()> {
        if self.paths.content_extension.is_empty() {
            return Err(CoreError::config("paths.content_extension cannot be empty"));
        }

        if self.paths.content_extension.starts_with('.') {
            return Err(CoreError::config(
                "paths.content_extension must not start with a dot",
            ));
        }

        if self.bundle.name.is_empty() {
            return Err(CoreError::config("bundle.name cannot be empty"));
        }

        if self.paths.model.is_absolute() {
            tracing::warn!("paths.model is absolute; it is normally relative to paths.content");
        }

        Ok(())
    }

    /// Directory holding partials, helpers and layouts.
    pub fn templates_dir(&self) -> &Path {
        &self.paths.src
    }

    /// Directory holding content files.
    pub fn content_dir(&self) -> &Path {
        &self.paths.content
    }

    /// Full path of the site model document.
    pub fn model_path(&self) -> PathBuf {
        self.paths.content.join(&self.paths.model)
    }

    /// Output root for rendered pages.
    pub fn output_dir(&self) -> &Path {
        &self.paths.output
    }

    /// Compiled asset area under the output root.
    pub fn ui_dir(&self) -> PathBuf {
        self.paths.output.join(UI_DIR)
    }

    /// Directory receiving generated images.
    pub fn images_dir(&self) -> PathBuf {
        self.ui_dir().join("img")
    }

    /// Live stylesheet sources.
    pub fn css_dir(&self) -> PathBuf {
        self.paths.src.join("css")
    }

    /// Script sources.
    pub fn js_dir(&self) -> PathBuf {
        self.paths.src.join("js")
    }

    /// Whether `path` carries the content extension.
    pub fn is_content_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.paths.content_extension))
    }
}
