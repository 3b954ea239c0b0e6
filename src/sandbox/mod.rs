//! Execution sandbox.
//!
//! Loads a template file or user-submitted source, then runs its
//! `render(conn, params)` under the timeout guard:
//!
//! 1. load: read, compile and run the top level (guarded)
//! 2. connect to the media backend
//! 3. call `render` (guarded), normalizing failures through the error rules
//! 4. validate the returned value
//!
//! Nothing is cached between executions; each request compiles afresh.

pub mod guard;
mod host;
pub mod result;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value as Json};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::backend::{self, MediaBackend};
use crate::config::ExecutionConfig;
use crate::errors::{ErrorKind, ErrorRules, TemplateExecutionError};
use crate::script::{self, FnDecl, Interrupt, Limits, Namespace, ScriptError, Value};

use host::ConnectionHandle;
pub use result::{ExecutionResult, finalize};

/// Where the code to execute comes from.
#[derive(Debug, Clone)]
pub enum EntryPointSource {
    /// A template file shipped with the service. Trusted.
    FilePath(PathBuf),
    /// Source text submitted by a caller. Untrusted.
    SourceText(String),
}

impl EntryPointSource {
    fn is_trusted(&self) -> bool {
        matches!(self, EntryPointSource::FilePath(_))
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source: EntryPointSource,
    pub credential: String,
    pub params: Map<String, Json>,
}

/// A loaded program with its `render` function located.
pub struct EntryPoint {
    namespace: Namespace,
    render: Arc<FnDecl>,
}

impl EntryPoint {
    /// Reads (for files), compiles and runs the top level of `source`.
    pub fn load(
        source: &EntryPointSource,
        interrupt: &Interrupt,
        limits: Limits,
    ) -> Result<Self, TemplateExecutionError> {
        let namespace = match source {
            EntryPointSource::FilePath(path) => load_file(path, interrupt, limits)?,
            EntryPointSource::SourceText(code) => load_source(code, interrupt, limits)?,
        };

        match namespace.function("render") {
            Some(render) if render.arity() == 2 => Ok(Self { namespace, render }),
            _ if source.is_trusted() => Err(TemplateExecutionError::new(
                ErrorKind::InvalidTemplate,
                "Template is missing the required render() function.",
            )),
            _ => Err(TemplateExecutionError::new(
                ErrorKind::MissingRenderFunction,
                "Your code must define a render(conn, params) function.",
            )),
        }
    }

    /// Calls `render(conn, params)`.
    pub fn render(
        self,
        conn: Value,
        params: Value,
        interrupt: &Interrupt,
    ) -> Result<Value, ScriptError> {
        self.namespace.call(self.render, vec![conn, params], interrupt)
    }
}

fn load_file(
    path: &Path,
    interrupt: &Interrupt,
    limits: Limits,
) -> Result<Namespace, TemplateExecutionError> {
    let load_error = |details: String| {
        TemplateExecutionError::new(ErrorKind::TemplateLoadError, "Failed to load template code.")
            .with_details(details)
    };
    let code = std::fs::read_to_string(path)
        .map_err(|e| load_error(format!("{}: {e}", path.display())))?;
    let program = script::compile(&code).map_err(|e| load_error(e.to_string()))?;
    program
        .run(interrupt, limits)
        .map_err(|e| load_error(e.to_string()))
}

fn load_source(
    code: &str,
    interrupt: &Interrupt,
    limits: Limits,
) -> Result<Namespace, TemplateExecutionError> {
    let program = script::compile(code).map_err(|e| match e {
        ScriptError::Syntax { line, ref message } => TemplateExecutionError::new(
            ErrorKind::SyntaxError,
            format!("Syntax error in your code at line {line}: {message}"),
        )
        .with_details(e.to_string()),
        other => TemplateExecutionError::new(
            ErrorKind::CompilationError,
            "Failed to compile your code. Please check for syntax errors.",
        )
        .with_details(other.to_string()),
    })?;
    program.run(interrupt, limits).map_err(|e| {
        TemplateExecutionError::new(
            ErrorKind::ExecutionError,
            "Error executing your code. Please check for errors.",
        )
        .with_details(e.to_string())
    })
}

/// Runs execution requests against a media backend.
#[derive(Debug, Clone)]
pub struct Sandbox {
    rules: ErrorRules,
    budget: Duration,
    limits: Limits,
}

impl Sandbox {
    pub fn new(config: &ExecutionConfig, rules: ErrorRules) -> Self {
        Self {
            rules,
            budget: Duration::from_secs(config.timeout_secs),
            limits: Limits {
                max_call_depth: config.max_call_depth,
                max_value_size: config.max_value_size,
                max_value_depth: config.max_value_depth,
            },
        }
    }

    #[cfg(test)]
    fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub async fn execute(
        &self,
        backend: &dyn MediaBackend,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, TemplateExecutionError> {
        let ExecutionRequest {
            source,
            credential,
            params,
        } = request;

        let limits = self.limits;
        let entry = guard::invoke(self.budget, move |interrupt| {
            EntryPoint::load(&source, interrupt, limits)
        })
        .await?;
        debug!("Entry point loaded");

        let conn = backend::connect(backend, &credential).await?;

        let rules = self.rules.clone();
        let runtime = Handle::current();
        let value = guard::invoke(self.budget, move |interrupt| {
            let conn = Value::Host(Arc::new(ConnectionHandle::new(
                conn,
                runtime,
                interrupt.clone(),
            )));
            let params = Value::from_json(&Json::Object(params));
            entry
                .render(conn, params, interrupt)
                .map_err(|e| rules.normalize(e.into()))
        })
        .await?;

        let result = finalize(&value)?;
        info!("Generated stream {}", result.stream_url);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AssetKind;
    use crate::backend::fake::FakeBackend;
    use serde_json::json;
    use std::io::Write;

    const KEY: &str = "test-key";

    fn sandbox() -> Sandbox {
        Sandbox::new(&ExecutionConfig::default(), ErrorRules::builtin())
    }

    fn custom(code: &str, params: Json) -> ExecutionRequest {
        ExecutionRequest {
            source: EntryPointSource::SourceText(code.to_string()),
            credential: KEY.to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
        }
    }

    fn backend() -> FakeBackend {
        FakeBackend::new(KEY).with_asset(AssetKind::Video, "m-1", 30.0)
    }

    async fn run(code: &str, params: Json) -> Result<ExecutionResult, TemplateExecutionError> {
        sandbox().execute(&backend(), custom(code, params)).await
    }

    const STREAM: &str = r#"
fn render(conn, params) {
    let clip = conn.video(params.video_id);
    return conn.generate_stream({"clips": [{"id": clip.id, "end": min(params.end, clip.length)}]});
}
"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_custom_code_generates_stream() {
        let fake = backend();
        let out = sandbox()
            .execute(&fake, custom(STREAM, json!({"video_id": "m-1", "end": 45})))
            .await
            .unwrap();
        assert_eq!(out.stream_url, "https://stream.example/1.m3u8");
        assert_eq!(out.player_url, "https://player.example/1");
        assert_eq!(out.metadata, json!({}));
        assert_eq!(fake.timelines(), vec![json!({"clips": [{"id": "m-1", "end": 30}]})]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_asset_is_classified() {
        let err = run(STREAM, json!({"video_id": "m-404", "end": 5})).await.unwrap_err();
        assert_eq!(err.code, ErrorKind::AssetNotFound);
        assert!(err.details.unwrap().contains("m-404"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_backend_failure_text_is_classified() {
        let fake = backend().failing_streams("Requested duration exceeds video length");
        let err = sandbox()
            .execute(&fake, custom(STREAM, json!({"video_id": "m-1", "end": 5})))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorKind::DurationError);
    }

    #[tokio::test]
    async fn test_division_by_zero_is_execution_error() {
        let err = run("fn render(c, p) { return 1 / 0; }", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorKind::ExecutionError);
        assert_eq!(
            err.message,
            "Template execution failed. Please check your parameters and try again."
        );
        assert_eq!(err.details.as_deref(), Some("line 1: division by zero"));
    }

    #[tokio::test]
    async fn test_syntax_error() {
        let err = run("fn render(c, p) {\n  return 1 +;\n}", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorKind::SyntaxError);
        assert!(err.message.starts_with("Syntax error in your code at line 2: "));
    }

    #[tokio::test]
    async fn test_compile_error() {
        let err = run("fn render(c, p) { fn inner() {} }", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorKind::CompilationError);
        assert_eq!(
            err.message,
            "Failed to compile your code. Please check for syntax errors."
        );
    }

    #[tokio::test]
    async fn test_top_level_failure_is_execution_error() {
        let err = run("let x = fail(\"boom\");\nfn render(c, p) {}", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorKind::ExecutionError);
        assert_eq!(err.message, "Error executing your code. Please check for errors.");
    }

    #[tokio::test]
    async fn test_missing_render_function() {
        for code in ["fn draw(c, p) {}", "let render = 1;", "fn render(c) {}"] {
            let err = run(code, json!({})).await.unwrap_err();
            assert_eq!(err.code, ErrorKind::MissingRenderFunction, "{code}");
        }
    }

    #[tokio::test]
    async fn test_load_errors_come_before_connect() {
        let request = ExecutionRequest {
            credential: "wrong".to_string(),
            ..custom("fn draw(c, p) {}", json!({}))
        };
        let err = sandbox().execute(&backend(), request).await.unwrap_err();
        assert_eq!(err.code, ErrorKind::MissingRenderFunction);
    }

    #[tokio::test]
    async fn test_bad_key_is_invalid_api_key() {
        let request = ExecutionRequest {
            credential: "wrong".to_string(),
            ..custom(STREAM, json!({}))
        };
        let err = sandbox().execute(&backend(), request).await.unwrap_err();
        assert_eq!(err.code, ErrorKind::InvalidApiKey);
    }

    #[tokio::test]
    async fn test_invalid_result_shapes() {
        let err = run("fn render(c, p) { return [1]; }", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorKind::InvalidResult);
        let err = run("fn render(c, p) { return {\"player_url\": \"x\"}; }", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorKind::NoStreamUrl);
    }

    #[tokio::test]
    async fn test_params_reach_render_unchanged() {
        let out = run(
            "fn render(c, p) { return {\"stream_url\": p.url, \"metadata\": p}; }",
            json!({"url": "https://s/x.m3u8", "n": 3}),
        )
        .await
        .unwrap();
        assert_eq!(out.stream_url, "https://s/x.m3u8");
        assert_eq!(out.metadata, json!({"url": "https://s/x.m3u8", "n": 3}));
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out_and_next_call_succeeds() {
        let sandbox = sandbox().with_budget(Duration::from_millis(200));
        let fake = backend();
        let err = sandbox
            .execute(&fake, custom("fn render(c, p) { while true {} }", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, TemplateExecutionError::timeout());

        let out = sandbox
            .execute(
                &fake,
                custom("fn render(c, p) { return {\"stream_url\": \"u\"}; }", json!({})),
            )
            .await
            .unwrap();
        assert_eq!(out.player_url, "u");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blocking_backend_call_times_out() {
        let sandbox = sandbox().with_budget(Duration::from_millis(200));
        let fake = backend().with_stream_delay(Duration::from_millis(1_000));
        let started = std::time::Instant::now();
        let err = sandbox
            .execute(&fake, custom(STREAM, json!({"video_id": "m-1", "end": 5})))
            .await
            .unwrap_err();
        assert_eq!(err, TemplateExecutionError::timeout());
        assert!(started.elapsed() < Duration::from_millis(900));

        // The in-flight call still completes on the backend side.
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(fake.timelines().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_runaway_allocation_is_an_execution_error() {
        let code = "fn render(c, p) { let s = \"ab\"; while true { s = s + s; } }";
        let err = run(code, json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorKind::ExecutionError);
        assert!(err.details.unwrap().contains("size limit"));
    }

    #[tokio::test]
    async fn test_top_level_loop_times_out() {
        let sandbox = sandbox().with_budget(Duration::from_millis(200));
        let err = sandbox
            .execute(&backend(), custom("while true {}\nfn render(c, p) {}", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorKind::TimeoutError);
    }

    #[tokio::test]
    async fn test_template_file_modes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"fn render(conn, params) { return {\"stream_url\": \"t\"}; }")
            .unwrap();
        let request = ExecutionRequest {
            source: EntryPointSource::FilePath(file.path().to_path_buf()),
            credential: KEY.to_string(),
            params: Map::new(),
        };
        let out = sandbox().execute(&backend(), request).await.unwrap();
        assert_eq!(out.stream_url, "t");
    }

    #[tokio::test]
    async fn test_template_load_failures() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.reel");
        std::fs::write(&broken, "fn render(conn, params) {").unwrap();
        let no_render = dir.path().join("no_render.reel");
        std::fs::write(&no_render, "fn draw(conn, params) {}").unwrap();

        let cases = [
            (dir.path().join("missing.reel"), ErrorKind::TemplateLoadError),
            (broken, ErrorKind::TemplateLoadError),
            (no_render, ErrorKind::InvalidTemplate),
        ];
        for (path, code) in cases {
            let request = ExecutionRequest {
                source: EntryPointSource::FilePath(path.clone()),
                credential: KEY.to_string(),
                params: Map::new(),
            };
            let err = sandbox().execute(&backend(), request).await.unwrap_err();
            assert_eq!(err.code, code, "{}", path.display());
        }
    }
}
