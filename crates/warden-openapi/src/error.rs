//! Errors for spec acquisition and permission lookup.

use thiserror::Error;

/// Permission spec error.
#[derive(Debug, Error)]
pub enum SpecError {
    /// No permission is registered for the method/path pair.
    #[error("not found oas definition: {method} {path}")]
    NotFoundOasDefinition { method: String, path: String },

    /// Fetching the spec from the target service failed.
    #[error("request failed: {0}")]
    Fetch(String),

    /// Reading the spec from disk failed.
    #[error("file loading failed: {0}")]
    FileLoad(String),

    /// The document is not a valid permission spec.
    #[error("invalid permission spec: {0}")]
    Invalid(String),

    /// Neither a spec file nor a fetch path is configured.
    #[error(
        "missing environment variables, one of TARGET_SERVICE_OAS_PATH or API_PERMISSIONS_FILE_PATH is required"
    )]
    MissingSource,
}
