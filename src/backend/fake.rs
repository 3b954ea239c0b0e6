//! In-memory media backend for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{AssetKind, Connection, MediaBackend, StreamUrls};

#[derive(Default)]
struct Shared {
    assets: HashMap<(AssetKind, String), serde_json::Value>,
    timelines: Vec<serde_json::Value>,
    /// When set, `generate_stream` fails with this text.
    stream_failure: Option<String>,
    /// When set, `generate_stream` sleeps this long before answering.
    stream_delay: Option<Duration>,
    player_url: bool,
}

#[derive(Clone)]
pub(crate) struct FakeBackend {
    api_key: String,
    shared: Arc<Mutex<Shared>>,
}

impl FakeBackend {
    pub(crate) fn new(api_key: &str) -> Self {
        let shared = Shared {
            player_url: true,
            ..Shared::default()
        };
        Self {
            api_key: api_key.to_string(),
            shared: Arc::new(Mutex::new(shared)),
        }
    }

    pub(crate) fn with_asset(self, kind: AssetKind, id: &str, length: f64) -> Self {
        let asset = json!({"id": id, "type": kind.as_str(), "length": length});
        self.shared
            .lock()
            .unwrap()
            .assets
            .insert((kind, id.to_string()), asset);
        self
    }

    pub(crate) fn failing_streams(self, text: &str) -> Self {
        self.shared.lock().unwrap().stream_failure = Some(text.to_string());
        self
    }

    pub(crate) fn with_stream_delay(self, delay: Duration) -> Self {
        self.shared.lock().unwrap().stream_delay = Some(delay);
        self
    }

    pub(crate) fn without_player_url(self) -> Self {
        self.shared.lock().unwrap().player_url = false;
        self
    }

    /// Timelines submitted through any connection, in order.
    pub(crate) fn timelines(&self) -> Vec<serde_json::Value> {
        self.shared.lock().unwrap().timelines.clone()
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    async fn connect(&self, credential: &str) -> anyhow::Result<Arc<dyn Connection>> {
        if credential != self.api_key {
            anyhow::bail!("media backend returned 401 Unauthorized: invalid key");
        }
        Ok(Arc::new(FakeConnection {
            shared: self.shared.clone(),
        }))
    }

    fn description(&self) -> String {
        "fake".to_string()
    }
}

struct FakeConnection {
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn asset(&self, kind: AssetKind, id: &str) -> anyhow::Result<serde_json::Value> {
        let shared = self.shared.lock().unwrap();
        match shared.assets.get(&(kind, id.to_string())) {
            Some(asset) => Ok(asset.clone()),
            None => anyhow::bail!("media backend returned 404 Not Found: {} {id}", kind.as_str()),
        }
    }

    async fn generate_stream(&self, timeline: &serde_json::Value) -> anyhow::Result<StreamUrls> {
        let delay = self.shared.lock().unwrap().stream_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut shared = self.shared.lock().unwrap();
        if let Some(text) = &shared.stream_failure {
            anyhow::bail!("{text}");
        }
        shared.timelines.push(timeline.clone());
        let n = shared.timelines.len();
        Ok(StreamUrls {
            stream_url: format!("https://stream.example/{n}.m3u8"),
            player_url: shared
                .player_url
                .then(|| format!("https://player.example/{n}")),
        })
    }
}
