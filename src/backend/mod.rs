//! Media backend access.
//!
//! [`MediaBackend`] turns a credential into a live [`Connection`]; the
//! connection is what `render` receives as its `conn` argument. The HTTP
//! implementation lives in [`http`]; tests use the in-memory fake.

pub mod http;

#[cfg(test)]
pub(crate) mod fake;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{ErrorKind, TemplateExecutionError};

pub use http::HttpBackend;

/// Kinds of media asset a script can fetch by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Video,
    Image,
    Audio,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Video => "video",
            AssetKind::Image => "image",
            AssetKind::Audio => "audio",
        }
    }
}

/// URLs of a generated stream. `player_url` may be absent; the result
/// validator fills it from `stream_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamUrls {
    pub stream_url: String,
    #[serde(default)]
    pub player_url: Option<String>,
}

/// Factory for authenticated connections.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Authenticates `credential` and returns a connection handle.
    ///
    /// Failures are plain `anyhow` errors; [`connect`] classifies them.
    async fn connect(&self, credential: &str) -> anyhow::Result<Arc<dyn Connection>>;

    /// Human-readable description, e.g. `"http (https://api.example.com)"`.
    fn description(&self) -> String;
}

/// An authenticated session on the media backend.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Fetches the metadata of one asset.
    async fn asset(&self, kind: AssetKind, id: &str) -> anyhow::Result<serde_json::Value>;

    /// Submits a timeline for composition and returns its stream URLs.
    async fn generate_stream(&self, timeline: &serde_json::Value) -> anyhow::Result<StreamUrls>;
}

/// Strips a leading `Bearer ` (any case) from a credential header and trims
/// surrounding whitespace from what is left.
pub fn strip_bearer(header: &str) -> &str {
    let header = header.trim_start();
    match header.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => header[7..].trim(),
        _ => header.trim_end(),
    }
}

/// Opens a connection, mapping failures onto the error taxonomy.
pub async fn connect(
    backend: &dyn MediaBackend,
    credential: &str,
) -> Result<Arc<dyn Connection>, TemplateExecutionError> {
    debug!("Connecting to {}", backend.description());
    backend.connect(credential).await.map_err(|e| {
        let text = format!("{e:#}");
        warn!("Backend connection failed: {text}");
        classify_connect_failure(&text)
    })
}

fn classify_connect_failure(text: &str) -> TemplateExecutionError {
    let lowered = text.to_lowercase();
    if ["api key", "unauthorized", "401"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        TemplateExecutionError::new(
            ErrorKind::InvalidApiKey,
            "Invalid or expired API key. Please check your key and try again.",
        )
    } else {
        TemplateExecutionError::new(
            ErrorKind::ConnectionError,
            "Failed to connect to the media backend. Please check your API key and network connection.",
        )
        .with_details(text)
    }
}
