use serde::Deserialize;
use std::path::PathBuf;

use crate::errors::{ErrorRule, ErrorRules};

/// Environment variable consulted for the backend credential.
pub const API_KEY_ENV: &str = "MEMEKIT_API_KEY";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
    /// Extra error rules, evaluated after the built-in ones.
    #[serde(default)]
    pub error_rules: Vec<ErrorRule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Supports ${ENV_VAR} substitution
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    /// Wall-clock budget for one `render` call
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
    /// Largest string, list or map a script may build (bytes for strings,
    /// roughly one unit per element otherwise)
    #[serde(default = "default_max_value_size")]
    pub max_value_size: usize,
    #[serde(default = "default_max_value_depth")]
    pub max_value_depth: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TemplatesConfig {
    /// Path of the JSON template manifest
    #[serde(default = "default_registry")]
    pub registry: PathBuf,
}

fn default_base_url() -> String {
    "https://api.videodb.io".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    60
}

fn default_timeout() -> u64 {
    30
}

fn default_max_call_depth() -> usize {
    crate::script::DEFAULT_MAX_CALL_DEPTH
}

fn default_max_value_size() -> usize {
    crate::script::DEFAULT_MAX_VALUE_SIZE
}

fn default_max_value_depth() -> usize {
    crate::script::DEFAULT_MAX_VALUE_DEPTH
}

fn default_registry() -> PathBuf {
    PathBuf::from("./templates/registry.json")
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_call_depth: default_max_call_depth(),
            max_value_size: default_max_value_size(),
            max_value_depth: default_max_value_depth(),
        }
    }
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            registry: default_registry(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${MEMEKIT_API_KEY}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Built-in error rules followed by the configured ones.
    pub fn error_rules(&self) -> ErrorRules {
        ErrorRules::builtin().with_extra(self.error_rules.iter().cloned())
    }

    /// Picks the credential: explicit value, then `MEMEKIT_API_KEY`, then
    /// `backend.api_key`. Blank values are skipped.
    pub fn api_key(&self, explicit: Option<&str>) -> Option<String> {
        let from_env = std::env::var(API_KEY_ENV).ok();
        explicit
            .map(str::to_string)
            .into_iter()
            .chain(from_env)
            .chain(self.backend.api_key.clone())
            .find(|k| !k.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
[backend]
base_url = "https://media.example.com"
api_key = "sk-test"
request_timeout_secs = 5

[execution]
timeout_secs = 12

[templates]
registry = "/srv/templates/registry.json"

[[error_rules]]
when = [["quota"]]
code = "permission_denied"
message = "Your plan does not allow this."
"#,
        );
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.backend.base_url, "https://media.example.com");
        assert_eq!(config.backend.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.backend.request_timeout_secs, 5);
        assert_eq!(config.backend.connect_timeout_secs, 10);
        assert_eq!(config.execution.timeout_secs, 12);
        assert_eq!(config.execution.max_call_depth, 64);
        assert_eq!(
            config.templates.registry,
            PathBuf::from("/srv/templates/registry.json")
        );
        assert_eq!(config.error_rules.len(), 1);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let file = write_config("");
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.execution.timeout_secs, 30);
        assert_eq!(config.execution.max_value_size, 1_000_000);
        assert_eq!(config.execution.max_value_depth, 64);
        assert!(config.backend.api_key.is_none());
        assert!(config.error_rules.is_empty());
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/memekit.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.backend.base_url, "https://api.videodb.io");
        assert_eq!(config.execution.max_call_depth, 64);
        assert_eq!(config.execution.max_value_size, 1_000_000);
        assert!(config.error_rules.is_empty());
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("MEMEKIT_TEST_BASE_URL", "https://expanded.example");
        let file = write_config("[backend]\nbase_url = \"${MEMEKIT_TEST_BASE_URL}\"\n");
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.backend.base_url, "https://expanded.example");
    }

    #[test]
    fn test_missing_env_var_is_an_error() {
        let file = write_config("[backend]\napi_key = \"${MEMEKIT_TEST_UNSET_VARIABLE}\"\n");
        assert!(Config::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_unknown_error_code_rejected() {
        let file = write_config("[[error_rules]]\nwhen = [[\"x\"]]\ncode = \"bogus\"\nmessage = \"m\"\n");
        assert!(Config::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_configured_rules_run_after_builtin() {
        let file = write_config(
            "[[error_rules]]\nwhen = [[\"quota\"]]\ncode = \"permission_denied\"\nmessage = \"Over quota.\"\n",
        );
        let rules = Config::load(file.path().to_str().unwrap())
            .unwrap()
            .error_rules();
        let err = rules.classify("quota exceeded for account");
        assert_eq!(err.code, ErrorKind::PermissionDenied);
        assert_eq!(err.message, "Over quota.");
        // A built-in rule still wins when both match.
        let err = rules.classify("quota: clip not found");
        assert_eq!(err.code, ErrorKind::AssetNotFound);
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let config = Config {
            backend: BackendConfig {
                api_key: Some("from-config".to_string()),
                ..BackendConfig::default()
            },
            ..Config::default()
        };
        assert_eq!(config.api_key(Some("explicit")).as_deref(), Some("explicit"));
    }
}
