//! Error types for DocCheck

use thiserror::Error;

/// Result type alias using DocCheck Error
pub type Result<T> = std::result::Result<T, Error>;

/// DocCheck error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Input path not found: {0}")]
    InputNotFound(String),

    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    #[error("Validation failed against {schema}: {errors}")]
    Validation { schema: String, errors: String },

    #[error("Unsupported schema transform: {from} -> {to}")]
    UnsupportedTransform { from: String, to: String },

    #[error("Schema contract violation: {0}")]
    ContractViolation(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Rejected pattern: {0}")]
    RejectedPattern(String),

    #[error("No runnable tests after resolution")]
    NothingToRun,

    #[error("Automation session error: {0}")]
    Session(String),

    #[error("Automation driver not found for {0}")]
    DriverNotFound(String),

    #[error("Step timed out after {ms}ms")]
    StepTimeout { ms: u64 },

    #[error("Orchestration API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
