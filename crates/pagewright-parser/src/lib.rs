//! pagewright parser library
//!
//! The markup-conversion contract used by the renderer, and a Markdown
//! implementation of it.
//!
//! The renderer depends on exactly four document operations:
//! [`Document::attributes`], [`Document::attribute`],
//! [`Document::document_title`] and [`Document::convert`]. Any converter that
//! produces such a document can be plugged in through [`Converter`].

pub mod frontmatter;
pub mod markdown;
pub mod syntax;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

pub use markdown::{MarkdownConverter, MarkdownDocument};
pub use syntax::{Highlighter, SyntaxHighlighter};
use thiserror::Error;

/// Math notation mode.
pub const ATTR_STEM: &str = "stem";
/// Syntax highlighter identifier.
pub const ATTR_SOURCE_HIGHLIGHTER: &str = "source-highlighter";
/// External diagram fetch flag.
pub const ATTR_FETCH_DIAGRAM: &str = "kroki-fetch-diagram";
/// Experimental converter features flag.
pub const ATTR_EXPERIMENTAL: &str = "experimental";

/// Conversion errors.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The document header could not be parsed.
    #[error("invalid document header: {0}")]
    Frontmatter(String),

    /// The document body could not be converted.
    #[error("conversion failed: {0}")]
    Conversion(String),
}

/// Result type for conversion operations.
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Options for loading one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Directory where generated images are written.
    pub base_dir: PathBuf,
    /// Attributes applied on top of the document's own attributes.
    pub attributes: BTreeMap<String, String>,
}

impl ConvertOptions {
    /// Create options rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Set an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set a flag attribute (empty value) when `enabled`.
    #[must_use]
    pub fn with_flag(self, name: impl Into<String>, enabled: bool) -> Self {
        if enabled {
            self.with_attribute(name, "")
        } else {
            self
        }
    }

    /// Copy of these options without `name`.
    #[must_use]
    pub fn without(&self, name: &str) -> Self {
        let mut options = self.clone();
        options.attributes.remove(name);
        options
    }

    /// Whether the attribute is set.
    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Image output directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

/// A loaded document.
pub trait Document: Send {
    /// All document attributes, including those supplied through options.
    fn attributes(&self) -> &BTreeMap<String, String>;

    /// One attribute, or `default` if unset.
    fn attribute(&self, name: &str, default: &str) -> String {
        self.attributes()
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// The computed document title.
    fn document_title(&self) -> Option<&str>;

    /// Convert the document body to HTML.
    fn convert(&self) -> Result<String>;
}

/// Turns markup text into a [`Document`].
pub trait Converter: Send + Sync {
    /// Load `source` with the given options.
    fn load(&self, source: &str, options: &ConvertOptions) -> Result<Box<dyn Document>>;
}
