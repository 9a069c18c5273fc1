//! DocCheck Schema Library
//!
//! Holds every versioned schema document, validates arbitrary objects
//! against a target schema key, and migrates objects conforming to older
//! schema versions to the canonical current model.

pub mod migrate;
pub mod registry;
pub mod validator;

pub use migrate::{compatible_sources, migrate};
pub use registry::{registry, SchemaRegistry};
pub use validator::{validate, ValidationOutcome};
