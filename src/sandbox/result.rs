use serde::Serialize;

use crate::errors::{ErrorKind, TemplateExecutionError};
use crate::script::Value;

/// What a successful execution returns to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub stream_url: String,
    pub player_url: String,
    pub metadata: serde_json::Value,
}

fn invalid_result() -> TemplateExecutionError {
    TemplateExecutionError::new(
        ErrorKind::InvalidResult,
        "Template returned invalid data format.",
    )
}

/// Checks the value returned by `render` and shapes the response.
pub fn finalize(value: &Value) -> Result<ExecutionResult, TemplateExecutionError> {
    let Value::Map(map) = value else {
        return Err(invalid_result().with_details(format!("render returned {}", value.type_name())));
    };

    let stream_url = match map.get("stream_url") {
        Some(Value::Str(s)) if !s.is_empty() => s.clone(),
        _ => {
            return Err(TemplateExecutionError::new(
                ErrorKind::NoStreamUrl,
                "Template did not generate a stream URL.",
            ));
        }
    };

    let player_url = match map.get("player_url") {
        Some(Value::Str(s)) if !s.is_empty() => s.clone(),
        _ => stream_url.clone(),
    };

    let metadata = match map.get("metadata") {
        Some(m) => m
            .to_json()
            .map_err(|e| invalid_result().with_details(format!("metadata: {e}")))?,
        None => serde_json::json!({}),
    };

    Ok(ExecutionResult {
        stream_url,
        player_url,
        metadata,
    })
}
