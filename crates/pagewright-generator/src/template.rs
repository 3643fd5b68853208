//! Template registry.
//!
//! Loads partials, helpers and layouts from a template source tree into one
//! minijinja environment:
//!
//! ```text
//! src/
//! ├── partials/*.html   → includable by file stem: {% include "header" %}
//! ├── helpers/*.jinja   → callable by file stem:   {{ eq(a, b) }}
//! └── layouts/*.html    → selected per page by the `page-layout` attribute
//! ```
//!
//! A helper file holds a single template expression. It is compiled once, as
//! a hidden `helpers/<name>` template assigning the expression to a variable,
//! and evaluated on every call with `args` (positional arguments) and `hash`
//! (keyword arguments) in scope.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::{Path, PathBuf},
};

use minijinja::{AutoEscape, Environment, State, Value, context, value::Rest};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Sub-directory holding partial templates.
pub const PARTIALS_DIR: &str = "partials";
/// Sub-directory holding helper expressions.
pub const HELPERS_DIR: &str = "helpers";
/// Sub-directory holding layout templates.
pub const LAYOUTS_DIR: &str = "layouts";

const TEMPLATE_EXT: &str = "html";
const HELPER_EXT: &str = "jinja";
/// Variable a compiled helper template assigns its value to.
const HELPER_RESULT: &str = "__helper_result";

/// Global functions of the template engine that helpers may not replace.
pub const RESERVED_NAMES: &[&str] = &["range", "dict", "debug", "namespace"];

/// Built-in helpers registered ahead of file helpers.
pub const BUILTIN_HELPERS: &[&str] = &["resolvePage", "resolvePageURL"];

/// Kind of registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Partial,
    Helper,
    Layout,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Partial => "partial",
            Self::Helper => "helper",
            Self::Layout => "layout",
        })
    }
}

/// Template registry errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A source file could not be read.
    #[error("failed to read {kind} `{name}` from {path}: {source}")]
    Io {
        kind: EntryKind,
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A template directory could not be scanned.
    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// A template or helper failed to compile.
    #[error("failed to compile {kind} `{name}`: {source}")]
    Compile {
        kind: EntryKind,
        name: String,
        #[source]
        source: minijinja::Error,
    },

    /// A helper tried to take the name of an engine function.
    #[error("helper `{0}` would override a reserved template function")]
    ReservedHelper(String),

    /// Layout not registered.
    #[error("layout not found: {0}")]
    NotFound(String),

    /// Rendering a layout failed.
    #[error("failed to render layout `{name}`: {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },
}

/// Result type for template operations.
pub type Result<T> = std::result::Result<T, TemplateError>;

/// Compiled partials, helpers and layouts.
pub struct TemplateRegistry {
    env: Environment<'static>,
    partials: BTreeSet<String>,
    helpers: BTreeSet<String>,
    layouts: BTreeSet<String>,
}

impl fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("partials", &self.partials)
            .field("helpers", &self.helpers)
            .field("layouts", &self.layouts)
            .finish_non_exhaustive()
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRegistry {
    /// Create a registry holding only the built-in helpers.
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        env.add_function("resolvePage", resolve_page);
        env.add_function("resolvePageURL", resolve_page_url);

        Self {
            env,
            partials: BTreeSet::new(),
            helpers: BUILTIN_HELPERS.iter().map(|s| (*s).to_string()).collect(),
            layouts: BTreeSet::new(),
        }
    }

    /// Load every partial, helper and layout below `source_root`.
    ///
    /// Any failure aborts the load; no partially filled registry is returned.
    pub fn load(source_root: &Path) -> Result<Self> {
        let mut registry = Self::new();

        for (name, path) in discover(&source_root.join(PARTIALS_DIR), TEMPLATE_EXT)? {
            let source = read_source(EntryKind::Partial, &name, &path)?;
            registry.add_partial(&name, source)?;
        }

        for (name, path) in discover(&source_root.join(HELPERS_DIR), HELPER_EXT)? {
            let source = read_source(EntryKind::Helper, &name, &path)?;
            registry.add_helper(&name, source)?;
        }

        for (name, path) in discover(&source_root.join(LAYOUTS_DIR), TEMPLATE_EXT)? {
            let source = read_source(EntryKind::Layout, &name, &path)?;
            registry.add_layout(&name, source)?;
        }

        debug!(
            root = %source_root.display(),
            partials = registry.partials.len(),
            helpers = registry.helpers.len(),
            layouts = registry.layouts.len(),
            "template registry loaded"
        );

        Ok(registry)
    }

    /// Register a partial under its bare name.
    pub fn add_partial(&mut self, name: &str, source: impl Into<String>) -> Result<()> {
        self.env
            .add_template_owned(name.to_string(), source.into())
            .map_err(|source| TemplateError::Compile {
                kind: EntryKind::Partial,
                name: name.to_string(),
                source,
            })?;
        self.partials.insert(name.to_string());
        Ok(())
    }

    /// Register a helper expression.
    pub fn add_helper(&mut self, name: &str, expression: impl Into<String>) -> Result<()> {
        if RESERVED_NAMES.contains(&name) {
            return Err(TemplateError::ReservedHelper(name.to_string()));
        }

        let key = helper_key(name);
        let source = format!(
            "{{% set {HELPER_RESULT} = ({}) %}}",
            expression.into().trim()
        );
        self.env
            .add_template_owned(key.clone(), source)
            .map_err(|source| TemplateError::Compile {
                kind: EntryKind::Helper,
                name: name.to_string(),
                source,
            })?;

        self.env
            .add_function(name.to_string(), move |state: &State, args: Rest<Value>| {
                eval_helper(state, &key, args)
            });
        self.helpers.insert(name.to_string());
        Ok(())
    }

    /// Register a layout.
    pub fn add_layout(&mut self, name: &str, source: impl Into<String>) -> Result<()> {
        self.env
            .add_template_owned(layout_key(name), source.into())
            .map_err(|source| TemplateError::Compile {
                kind: EntryKind::Layout,
                name: name.to_string(),
                source,
            })?;
        self.layouts.insert(name.to_string());
        Ok(())
    }

    /// Whether a layout is registered.
    pub fn has_layout(&self, name: &str) -> bool {
        self.layouts.contains(name)
    }

    /// Registered layout names, sorted.
    pub fn layout_names(&self) -> impl Iterator<Item = &str> {
        self.layouts.iter().map(String::as_str)
    }

    /// Registered partial names, sorted.
    pub fn partial_names(&self) -> impl Iterator<Item = &str> {
        self.partials.iter().map(String::as_str)
    }

    /// Registered helper names including built-ins, sorted.
    pub fn helper_names(&self) -> impl Iterator<Item = &str> {
        self.helpers.iter().map(String::as_str)
    }

    /// Render a layout with the given context.
    pub fn render_layout(&self, name: &str, ctx: &Value) -> Result<String> {
        if !self.has_layout(name) {
            return Err(TemplateError::NotFound(name.to_string()));
        }

        let render_err = |source| TemplateError::Render {
            name: name.to_string(),
            source,
        };
        self.env
            .get_template(&layout_key(name))
            .map_err(render_err)?
            .render(ctx)
            .map_err(render_err)
    }
}

fn layout_key(name: &str) -> String {
    format!("{LAYOUTS_DIR}/{name}")
}

fn helper_key(name: &str) -> String {
    format!("{HELPERS_DIR}/{name}")
}

/// Files with `ext` directly inside `dir`, sorted by file name.
fn discover(dir: &Path, ext: &str) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| TemplateError::Scan {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
            found.push((name.to_string(), path.to_path_buf()));
        }
    }

    Ok(found)
}

fn read_source(kind: EntryKind, name: &str, path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
        kind,
        name: name.to_string(),
        path: path.to_path_buf(),
        source,
    })
}

/// Split trailing keyword arguments from positional ones.
fn split_hash(mut args: Vec<Value>) -> (Vec<Value>, Option<Value>) {
    match args.last() {
        Some(last) if last.is_kwargs() => {
            let hash = args.pop();
            (args, hash)
        }
        _ => (args, None),
    }
}

fn eval_helper(
    state: &State,
    key: &str,
    args: Rest<Value>,
) -> std::result::Result<Value, minijinja::Error> {
    let (positional, hash) = split_hash(args.0);
    let hash = hash.unwrap_or_else(|| Value::from(BTreeMap::<String, Value>::new()));
    let captured = state
        .env()
        .get_template(key)?
        .render_captured(context! { args => positional, hash => hash })?;
    Ok(captured
        .state()
        .lookup(HELPER_RESULT)
        .unwrap_or(Value::UNDEFINED))
}

/// `resolvePage(target, **hash)`: the call-site hash when given, else `target`.
fn resolve_page(args: Rest<Value>) -> std::result::Result<Value, minijinja::Error> {
    let (positional, hash) = split_hash(args.0);
    Ok(hash
        .or_else(|| positional.into_iter().next())
        .unwrap_or(Value::UNDEFINED))
}

/// `resolvePageURL(target, **hash)`: `hash.url`, or `#`.
fn resolve_page_url(args: Rest<Value>) -> std::result::Result<Value, minijinja::Error> {
    let (_, hash) = split_hash(args.0);
    let url = match hash {
        Some(hash) => hash.get_attr("url")?,
        None => Value::UNDEFINED,
    };
    if url.is_undefined() || url.is_none() {
        Ok(Value::from("#"))
    } else {
        Ok(url)
    }
}
