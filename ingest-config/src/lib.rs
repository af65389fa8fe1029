//! Configuration loading and shared configuration types for the ingestion
//! workspace.
//!
//! Configuration is loaded hierarchically: a `base` file, an
//! environment-specific file (`dev`/`prod`), and `APP_`-prefixed environment
//! variable overrides, in that order of precedence.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config};
