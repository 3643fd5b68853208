//! Document rendering.
//!
//! Turns one content file into a complete HTML page: the document is
//! converted, its `page-` attributes are lifted into the page model and the
//! result is wrapped in the layout it selects.

use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use minijinja::Value;
use pagewright_core::{Config, SiteModel};
use pagewright_parser::{
    ATTR_EXPERIMENTAL, ATTR_FETCH_DIAGRAM, ATTR_SOURCE_HIGHLIGHTER, ATTR_STEM, ConvertError,
    ConvertOptions, Converter, MarkdownConverter,
};
use serde_yaml::Mapping;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{cache::Generation, template::TemplateError};

/// Layout used when a document does not pick one.
pub const DEFAULT_LAYOUT: &str = "default";
/// Logical name of the not-found page.
pub const NOT_FOUND_PAGE: &str = "404";
/// Attribute prefix lifted into `page.attributes`.
pub const PAGE_ATTRIBUTE_PREFIX: &str = "page-";

/// Rendering errors.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Content file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Image output directory could not be created.
    #[error("failed to create image directory {path}: {source}")]
    ImageDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Conversion failed, including the retry.
    #[error("failed to convert {path}: {source}")]
    Conversion {
        path: PathBuf,
        #[source]
        source: ConvertError,
    },

    /// The selected layout is not registered.
    #[error("layout not found: {0}")]
    LayoutNotFound(String),

    /// Layout rendering failed.
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Result type for rendering.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Relative prefixes templates use to reach the site root and asset area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPaths {
    /// `siteRootPath`
    pub site_root: String,
    /// `uiRootPath`
    pub ui_root: String,
}

impl RootPaths {
    /// Roots for pages served by the dev server.
    pub fn dev() -> Self {
        Self {
            site_root: ".".to_string(),
            ui_root: "./_".to_string(),
        }
    }

    /// Roots for a page written to `relative` below the output root.
    pub fn for_output(relative: &Path) -> Self {
        let depth = relative
            .parent()
            .map(|parent| {
                parent
                    .components()
                    .filter(|c| matches!(c, Component::Normal(_)))
                    .count()
            })
            .unwrap_or(0);

        if depth == 0 {
            Self {
                site_root: ".".to_string(),
                ui_root: "_".to_string(),
            }
        } else {
            let site_root = vec![".."; depth].join("/");
            Self {
                ui_root: format!("{site_root}/_"),
                site_root,
            }
        }
    }
}

/// Per-render copy of the site model plus page data.
///
/// Edits never reach the shared model.
#[derive(Debug, Clone)]
pub struct PageContext {
    root: Mapping,
    page: Mapping,
    roots: RootPaths,
    contents: Option<String>,
}

impl PageContext {
    /// Copy `model` for one render at `roots`.
    pub fn new(model: &SiteModel, roots: &RootPaths) -> Self {
        let mut root = model.root().clone();
        root.remove("page");

        Self {
            root,
            page: model.page().clone(),
            roots: roots.clone(),
            contents: None,
        }
    }

    /// Replace the page with the synthetic not-found page.
    pub fn not_found(&mut self) {
        self.page = Mapping::new();
        self.set("layout", NOT_FOUND_PAGE);
        self.set("title", "Page Not Found");
    }

    /// Set a page field.
    pub fn set(&mut self, key: &str, value: impl Into<serde_yaml::Value>) {
        self.page.insert(key.into(), value.into());
    }

    /// Set `page.attributes`.
    pub fn set_attributes(&mut self, attributes: &BTreeMap<String, String>) {
        let mapping = attributes
            .iter()
            .map(|(k, v)| (k.clone().into(), v.clone().into()))
            .collect::<Mapping>();
        self.page
            .insert("attributes".into(), serde_yaml::Value::Mapping(mapping));
    }

    /// Set the converted body, inserted into layouts unescaped.
    pub fn set_contents(&mut self, html: String) {
        self.contents = Some(html);
    }

    /// A page field as a string.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.page.get(key).and_then(serde_yaml::Value::as_str)
    }

    /// Layout selected for this page.
    pub fn layout(&self) -> &str {
        self.get("layout").unwrap_or(DEFAULT_LAYOUT)
    }

    /// Template context value.
    pub fn to_value(&self) -> Value {
        let mut page: BTreeMap<String, Value> = string_entries(&self.page).collect();
        if let Some(contents) = &self.contents {
            page.insert("contents".to_string(), Value::from_safe_string(contents.clone()));
        }

        // Root paths are generated, never user input; keep `/` unescaped.
        let mut root: BTreeMap<String, Value> = string_entries(&self.root).collect();
        root.insert(
            "siteRootPath".to_string(),
            Value::from_safe_string(self.roots.site_root.clone()),
        );
        root.insert(
            "uiRootPath".to_string(),
            Value::from_safe_string(self.roots.ui_root.clone()),
        );
        root.insert("page".to_string(), Value::from(page));
        Value::from(root)
    }
}

fn string_entries(mapping: &Mapping) -> impl Iterator<Item = (String, Value)> + '_ {
    mapping
        .iter()
        .filter_map(|(k, v)| Some((k.as_str()?.to_string(), Value::from_serialize(v))))
}

/// A finished page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub html: String,
    pub layout: String,
    pub attributes: BTreeMap<String, String>,
}

struct Converted {
    attributes: BTreeMap<String, String>,
    layout: String,
    title: Option<String>,
    html: String,
}

/// Renders content files against a cache generation.
#[derive(Clone)]
pub struct DocumentRenderer {
    converter: Arc<dyn Converter>,
    options: ConvertOptions,
}

impl std::fmt::Debug for DocumentRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRenderer")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DocumentRenderer {
    /// Create a renderer with an explicit converter.
    pub fn new(converter: Arc<dyn Converter>, options: ConvertOptions) -> Self {
        Self { converter, options }
    }

    /// Markdown renderer with options taken from the `[convert]` section.
    pub fn from_config(config: &Config) -> Self {
        let convert = &config.convert;
        let options = ConvertOptions::new(config.images_dir())
            .with_attribute(ATTR_STEM, convert.math.clone())
            .with_attribute(ATTR_SOURCE_HIGHLIGHTER, convert.source_highlighter.clone())
            .with_flag(ATTR_FETCH_DIAGRAM, convert.fetch_diagrams)
            .with_flag(ATTR_EXPERIMENTAL, convert.experimental);

        Self::new(Arc::new(MarkdownConverter::new()), options)
    }

    /// Render `path` into a full HTML page.
    ///
    /// A file named `404` yields the not-found page and is never read.
    pub fn render(
        &self,
        path: &Path,
        generation: &Generation,
        roots: &RootPaths,
    ) -> Result<RenderedPage> {
        let mut ctx = PageContext::new(generation.model(), roots);
        let mut attributes = BTreeMap::new();

        if path.file_stem().and_then(|s| s.to_str()) == Some(NOT_FOUND_PAGE) {
            ctx.not_found();
        } else {
            let source = std::fs::read_to_string(path).map_err(|source| RenderError::Read {
                path: path.to_path_buf(),
                source,
            })?;

            let images = self.options.base_dir();
            std::fs::create_dir_all(images).map_err(|source| RenderError::ImageDir {
                path: images.to_path_buf(),
                source,
            })?;

            let converted = self.convert(path, &source)?;
            ctx.set_attributes(&converted.attributes);
            ctx.set("layout", converted.layout);
            if let Some(title) = converted.title {
                ctx.set("title", title);
            }
            ctx.set_contents(converted.html);
            attributes = converted.attributes;
        }

        let layout = ctx.layout().to_string();
        if !generation.templates().has_layout(&layout) {
            return Err(RenderError::LayoutNotFound(layout));
        }

        let html = generation
            .templates()
            .render_layout(&layout, &ctx.to_value())?;
        debug!(file = %path.display(), layout = %layout, "rendered page");

        Ok(RenderedPage {
            html,
            layout,
            attributes,
        })
    }

    fn convert(&self, path: &Path, source: &str) -> Result<Converted> {
        match self.try_convert(source, &self.options) {
            Ok(converted) => Ok(converted),
            Err(first) if self.options.has(ATTR_FETCH_DIAGRAM) => {
                warn!(
                    file = %path.display(),
                    error = %first,
                    "conversion failed, retrying without diagram fetching"
                );
                self.try_convert(source, &self.options.without(ATTR_FETCH_DIAGRAM))
                    .map_err(|source| RenderError::Conversion {
                        path: path.to_path_buf(),
                        source,
                    })
            }
            Err(source) => Err(RenderError::Conversion {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn try_convert(
        &self,
        source: &str,
        options: &ConvertOptions,
    ) -> pagewright_parser::Result<Converted> {
        let doc = self.converter.load(source, options)?;

        let attributes = doc
            .attributes()
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(PAGE_ATTRIBUTE_PREFIX)
                    .map(|short| (short.to_string(), value.clone()))
            })
            .collect();

        Ok(Converted {
            attributes,
            layout: doc.attribute("page-layout", DEFAULT_LAYOUT),
            title: doc.document_title().map(str::to_string),
            html: doc.convert()?,
        })
    }
}
