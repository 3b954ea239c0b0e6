use std::sync::Arc;

use anyhow::{anyhow, bail};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::backend::{AssetKind, Connection};
use crate::script::{HostObject, Interrupt, Value, map_of};

/// The `conn` argument of `render`.
///
/// Backend calls are async; the script runs on a worker thread outside the
/// runtime, so each call is driven to completion with [`Handle::block_on`].
pub(crate) struct ConnectionHandle {
    conn: Arc<dyn Connection>,
    runtime: Handle,
    interrupt: Interrupt,
}

impl ConnectionHandle {
    pub(crate) fn new(conn: Arc<dyn Connection>, runtime: Handle, interrupt: Interrupt) -> Self {
        Self {
            conn,
            runtime,
            interrupt,
        }
    }

    fn asset(&self, kind: AssetKind, args: &[Value]) -> anyhow::Result<Value> {
        let [Value::Str(id)] = args else {
            bail!("expects one asset id string");
        };
        debug!("Script requested {} {id}", kind.as_str());
        let asset = self.runtime.block_on(self.conn.asset(kind, id))?;
        Ok(Value::from_json(&asset))
    }

    fn generate_stream(&self, args: &[Value]) -> anyhow::Result<Value> {
        let [timeline @ Value::Map(_)] = args else {
            bail!("expects one timeline map");
        };
        let timeline = timeline.to_json().map_err(|e| anyhow!("invalid timeline: {e}"))?;
        let urls = self.runtime.block_on(self.conn.generate_stream(&timeline))?;
        Ok(map_of([
            ("stream_url", Value::Str(urls.stream_url)),
            (
                "player_url",
                urls.player_url.map(Value::Str).unwrap_or(Value::Null),
            ),
        ]))
    }
}

impl HostObject for ConnectionHandle {
    fn type_name(&self) -> &str {
        "connection"
    }

    fn call_method(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
        if self.interrupt.is_tripped() {
            bail!("execution interrupted");
        }
        let result = match method {
            "video" => self.asset(AssetKind::Video, &args),
            "image" => self.asset(AssetKind::Image, &args),
            "audio" => self.asset(AssetKind::Audio, &args),
            "generate_stream" => self.generate_stream(&args),
            other => Err(anyhow!("connection has no method '{other}'")),
        };
        if self.interrupt.is_tripped() {
            warn!("Backend call conn.{method}() finished after the execution deadline");
        }
        result
    }
}
