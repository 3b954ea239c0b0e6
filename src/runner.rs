//! Caller boundary: credential handling, template lookup, parameter
//! validation and the uniform error envelope.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::backend::{MediaBackend, strip_bearer};
use crate::config::Config;
use crate::errors::TemplateExecutionError;
use crate::params;
use crate::registry::TemplateRegistry;
use crate::sandbox::{EntryPointSource, ExecutionRequest, ExecutionResult, Sandbox};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Template not found")]
    TemplateNotFound,
    #[error("Missing media backend API key")]
    MissingCredential,
    #[error("Invalid params")]
    InvalidParams(Vec<String>),
    #[error("Code cannot be empty")]
    EmptyCode,
    #[error(transparent)]
    Execution(#[from] TemplateExecutionError),
}

impl RunError {
    /// HTTP-equivalent status code.
    pub fn status(&self) -> u16 {
        match self {
            RunError::TemplateNotFound => 404,
            RunError::MissingCredential => 401,
            RunError::InvalidParams(_) | RunError::EmptyCode => 422,
            RunError::Execution(_) => 400,
        }
    }

    /// `{"error": {"code", "message", ...}}` body for callers.
    pub fn to_envelope(&self) -> Value {
        let error = match self {
            RunError::Execution(e) => json!({
                "code": e.code,
                "message": e.message,
                "details": e.details,
            }),
            RunError::InvalidParams(errors) => json!({
                "code": "http_error",
                "message": self.to_string(),
                "errors": errors,
            }),
            other => json!({
                "code": "http_error",
                "message": other.to_string(),
            }),
        };
        json!({ "error": error })
    }
}

pub struct Runner {
    registry: Arc<TemplateRegistry>,
    backend: Arc<dyn MediaBackend>,
    sandbox: Sandbox,
}

impl Runner {
    pub fn new(
        config: &Config,
        registry: Arc<TemplateRegistry>,
        backend: Arc<dyn MediaBackend>,
    ) -> Self {
        Self {
            registry,
            backend,
            sandbox: Sandbox::new(&config.execution, config.error_rules()),
        }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Validates `params` against the template's schema and runs it.
    pub async fn run_template(
        &self,
        template_id: &str,
        credential_header: Option<&str>,
        params: &Map<String, Value>,
    ) -> Result<ExecutionResult, RunError> {
        let template = self
            .registry
            .get(template_id)
            .ok_or(RunError::TemplateNotFound)?;
        let credential = credential(credential_header)?;

        let validated = params::validate(&template.params_schema, params);
        if !validated.is_ok() {
            warn!(
                "Rejected params for {template_id}: {}",
                validated.errors.join("; ")
            );
            return Err(RunError::InvalidParams(validated.errors));
        }

        info!("Running template {template_id}");
        let request = ExecutionRequest {
            source: EntryPointSource::FilePath(template.code_path.clone()),
            credential,
            params: validated.cleaned,
        };
        Ok(self.sandbox.execute(self.backend.as_ref(), request).await?)
    }

    /// Runs caller-supplied source. Params are passed through unvalidated.
    pub async fn run_custom(
        &self,
        code: &str,
        credential_header: Option<&str>,
        params: Map<String, Value>,
    ) -> Result<ExecutionResult, RunError> {
        let credential = credential(credential_header)?;
        if code.trim().is_empty() {
            return Err(RunError::EmptyCode);
        }

        info!("Running custom code ({} bytes)", code.len());
        let request = ExecutionRequest {
            source: EntryPointSource::SourceText(code.to_string()),
            credential,
            params,
        };
        Ok(self.sandbox.execute(self.backend.as_ref(), request).await?)
    }
}

fn credential(header: Option<&str>) -> Result<String, RunError> {
    header
        .map(strip_bearer)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .ok_or(RunError::MissingCredential)
}
