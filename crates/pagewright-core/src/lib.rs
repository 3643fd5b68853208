//! pagewright core library
//!
//! Configuration, the site model and error handling shared by the parser,
//! the generator and the CLI.

pub mod config;
pub mod error;
pub mod model;

pub use config::Config;
pub use error::{CoreError, Result};
pub use model::{ModelPolicy, SiteModel};
