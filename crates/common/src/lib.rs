//! DocCheck Common Library
//!
//! Shared types, configuration, and utilities for the DocCheck pipeline.

pub mod config;
pub mod error;
pub mod expression;
pub mod model;
pub mod status;

// Re-export commonly used types
pub use config::{Concurrency, Config, FileTypeConfig, PathBase};
pub use error::{Error, Result};
pub use model::{
    Action, BrowserConfig, BrowserName, Context, ContextSpec, Platform, ResolvedSpec,
    ResolvedTest, ResolvedTests, Spec, Step, Test,
};
pub use status::Outcome;

/// DocCheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Generate a fresh identifier for tests and steps that did not declare one.
pub fn generate_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}
