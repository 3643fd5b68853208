//! Site model loading.
//!
//! The site model is a free-form YAML mapping supplying `site` and `page`
//! variables to templates. It is loaded once per cache generation and never
//! mutated afterwards; renderers work on their own copy.

use std::path::Path;

use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::error::{CoreError, Result};

/// How a failed model load is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelPolicy {
    /// Propagate the error.
    #[default]
    Strict,
    /// Log the error and substitute [`SiteModel::preview_default`].
    FallbackToDefault,
}

/// Structured site and page metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteModel {
    root: Mapping,
}

impl SiteModel {
    /// Load a model from a YAML document.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::model(path, format!("cannot read file: {e}")))?;
        Self::from_yaml(&content).map_err(|message| CoreError::model(path, message))
    }

    /// Load a model according to `policy`.
    pub fn load_with_policy(path: &Path, policy: ModelPolicy) -> Result<Self> {
        match (Self::load(path), policy) {
            (Ok(model), _) => Ok(model),
            (Err(err), ModelPolicy::FallbackToDefault) => {
                warn!(error = %err, "failed to load site model, using preview default");
                Ok(Self::preview_default())
            }
            (Err(err), ModelPolicy::Strict) => Err(err),
        }
    }

    /// Parse a model from YAML text.
    ///
    /// The document must be a mapping with `site` and `page` mappings.
    pub fn from_yaml(content: &str) -> std::result::Result<Self, String> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        let Value::Mapping(root) = value else {
            return Err("document is not a mapping".to_string());
        };

        for key in ["site", "page"] {
            match root.get(key) {
                Some(Value::Mapping(_)) => {}
                Some(_) => return Err(format!("`{key}` must be a mapping")),
                None => return Err(format!("missing `{key}` mapping")),
            }
        }

        Ok(Self { root })
    }

    /// Minimal model used when the real one cannot be loaded in dev mode.
    pub fn preview_default() -> Self {
        let mut site = Mapping::new();
        site.insert("title".into(), "Preview".into());
        let mut page = Mapping::new();
        page.insert("title".into(), "Preview Page".into());

        let mut root = Mapping::new();
        root.insert("site".into(), Value::Mapping(site));
        root.insert("page".into(), Value::Mapping(page));
        Self { root }
    }

    /// Top-level mapping.
    pub fn root(&self) -> &Mapping {
        &self.root
    }

    /// The `site` mapping.
    pub fn site(&self) -> &Mapping {
        self.mapping("site")
    }

    /// The `page` mapping.
    pub fn page(&self) -> &Mapping {
        self.mapping("page")
    }

    fn mapping(&self, key: &str) -> &Mapping {
        static EMPTY: std::sync::OnceLock<Mapping> = std::sync::OnceLock::new();
        match self.root.get(key) {
            Some(Value::Mapping(m)) => m,
            _ => EMPTY.get_or_init(Mapping::new),
        }
    }
}
