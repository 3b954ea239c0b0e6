//! HTTP media backend.
//!
//! The credential travels in the `x-access-token` header. Any non-2xx
//! response becomes `media backend returned {status}: {body}`, so the status
//! code reaches the error rules unchanged.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use tracing::debug;
use url::Url;

use super::{AssetKind, Connection, MediaBackend, StreamUrls};
use crate::config::BackendConfig;

const USER_AGENT: &str = concat!("memekit/", env!("CARGO_PKG_VERSION"));

const TOKEN_HEADER: &str = "x-access-token";

pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid backend base_url '{}'", config.base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("backend base_url must be http or https, got '{}'", base.scheme());
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, base })
    }
}

#[async_trait]
impl MediaBackend for HttpBackend {
    async fn connect(&self, credential: &str) -> anyhow::Result<Arc<dyn Connection>> {
        let conn = HttpConnection {
            client: self.client.clone(),
            base: self.base.clone(),
            token: credential.to_string(),
        };
        // Hit an authenticated endpoint so a bad key fails here, not mid-render.
        conn.send(conn.get(conn.endpoint(&["collection", "default"])?)).await?;
        Ok(Arc::new(conn))
    }

    fn description(&self) -> String {
        format!("http ({})", self.base.as_str().trim_end_matches('/'))
    }
}

struct HttpConnection {
    client: Client,
    base: Url,
    token: String,
}

impl HttpConnection {
    /// Appends path segments to the base URL. Each segment is
    /// percent-encoded, so `/` inside one cannot change the route.
    fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("backend base_url '{}' cannot take a path", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn asset_url(&self, kind: AssetKind, id: &str) -> anyhow::Result<Url> {
        if matches!(id.trim(), "" | "." | "..") {
            anyhow::bail!("Invalid {} id '{id}'", kind.as_str());
        }
        self.endpoint(&[kind.as_str(), id])
    }

    fn get(&self, url: Url) -> RequestBuilder {
        self.client.get(url).header(TOKEN_HEADER, &self.token)
    }

    async fn send(&self, request: RequestBuilder) -> anyhow::Result<Response> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("media backend returned {status}: {body}");
        }
        Ok(response)
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn asset(&self, kind: AssetKind, id: &str) -> anyhow::Result<serde_json::Value> {
        debug!("Fetching {} {id}", kind.as_str());
        let response = self.send(self.get(self.asset_url(kind, id)?)).await?;
        Ok(response.json().await?)
    }

    async fn generate_stream(&self, timeline: &serde_json::Value) -> anyhow::Result<StreamUrls> {
        debug!("Submitting timeline");
        let request = self
            .client
            .post(self.endpoint(&["timeline"])?)
            .header(TOKEN_HEADER, &self.token)
            .json(timeline);
        let response = self.send(request).await?;
        let urls: StreamUrls = response
            .json()
            .await
            .context("media backend returned an unexpected timeline response")?;
        Ok(urls)
    }
}
