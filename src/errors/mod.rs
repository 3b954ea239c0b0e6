//! Closed error taxonomy for template and custom-code execution.
//!
//! Every stage of the pipeline either succeeds or fails with exactly one
//! [`TemplateExecutionError`]. The `code` is what callers branch on; the
//! message is safe to show to end users; `details` carries the raw
//! underlying text for debugging.

pub mod rules;

use serde::{Deserialize, Serialize};

pub use rules::{ErrorRule, ErrorRules};

/// Stable, user-facing error codes. The snake_case variant name is the
/// wire code, e.g. `"asset_not_found"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidApiKey,
    ConnectionError,
    TemplateLoadError,
    InvalidTemplate,
    SyntaxError,
    CompilationError,
    ExecutionError,
    MissingRenderFunction,
    TimeoutError,
    AssetNotFound,
    DurationError,
    CaptionIndexMissing,
    PermissionDenied,
    InvalidResult,
    NoStreamUrl,
    /// The worker running `render` died without reporting a result.
    InternalError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.serialize(f)
    }
}

/// A user-facing execution failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[error("{code}: {message}")]
pub struct TemplateExecutionError {
    pub code: ErrorKind,
    pub message: String,
    pub details: Option<String>,
}

impl TemplateExecutionError {
    pub fn new(code: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn timeout() -> Self {
        Self::new(
            ErrorKind::TimeoutError,
            "Template execution timed out. Try with shorter clips or simpler parameters.",
        )
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, "Unexpected error").with_details(details)
    }
}
