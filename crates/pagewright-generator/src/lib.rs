//! pagewright generator library
//!
//! Page rendering for pagewright.
//!
//! # Modules
//!
//! - [`template`] - Partials, helpers and layouts compiled into one registry
//! - [`cache`] - Template/model generations with coalesced population
//! - [`render`] - Content file to HTML page
//! - [`build`] - Batch build of every content file
//! - [`bundle`] - Deterministic zip packaging of the asset tree

pub mod build;
pub mod bundle;
pub mod cache;
pub mod render;
pub mod template;

pub use build::{BuildError, BuildStats, Builder};
pub use bundle::{BundleError, pack};
pub use cache::{
    CacheController, CacheError, CacheEvent, CacheState, FsGenerationSource, Generation,
    GenerationSource,
};
pub use render::{DocumentRenderer, PageContext, RenderError, RenderedPage, RootPaths};
pub use template::{TemplateError, TemplateRegistry};
