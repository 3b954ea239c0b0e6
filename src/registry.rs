//! Template catalog loaded from a JSON manifest.
//!
//! ```json
//! {"templates": [{"template_id": "walter_white_falling", "name": "...",
//!   "description": "...", "params_schema": [...],
//!   "code_path": "walter_white_falling.reel"}]}
//! ```
//!
//! `code_path` is relative to the manifest's directory. The registry is
//! immutable once loaded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::params::{FieldSpec, FieldType};

/// A bundled source clip or image a template was designed around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAsset {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TemplateDef {
    pub template_id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    pub params_schema: Vec<FieldSpec>,
    #[serde(default)]
    pub demo_inputs: Map<String, Value>,
    pub code_path: PathBuf,
    #[serde(default)]
    pub preview_stream_url: Option<String>,
    #[serde(default)]
    pub source_assets: Vec<SourceAsset>,
}

fn default_difficulty() -> String {
    "basic".to_string()
}

impl TemplateDef {
    /// Summary shown in listings.
    pub fn to_list_item(&self) -> Value {
        let mut item = json!({
            "template_id": self.template_id,
            "name": self.name,
            "description": self.description,
            "tags": self.tags,
            "difficulty": self.difficulty,
        });
        if let Some(url) = self.preview_stream_url.as_deref().filter(|u| !u.is_empty()) {
            item["preview_stream_url"] = json!(url);
        }
        item
    }

    /// Full description including the template's source code.
    pub fn to_detail(&self) -> anyhow::Result<Value> {
        let mut detail = self.to_list_item();
        detail["params_schema"] = serde_json::to_value(&self.params_schema)?;
        detail["demo_inputs"] = Value::Object(self.demo_inputs.clone());
        detail["code"] = Value::String(self.read_code()?);
        if !self.source_assets.is_empty() {
            detail["source_assets"] = serde_json::to_value(&self.source_assets)?;
        }
        Ok(detail)
    }

    pub fn read_code(&self) -> anyhow::Result<String> {
        std::fs::read_to_string(&self.code_path)
            .with_context(|| format!("Failed to read {}", self.code_path.display()))
    }

    fn check(&self) -> anyhow::Result<()> {
        for field in &self.params_schema {
            if field.field_type == FieldType::Enum && field.options.is_empty() {
                bail!(
                    "template '{}': enum field '{}' has no options",
                    self.template_id,
                    field.name
                );
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct Manifest {
    templates: Vec<TemplateDef>,
}

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: Vec<TemplateDef>,
    by_id: HashMap<String, usize>,
}

impl TemplateRegistry {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read template registry {}", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&content)
            .with_context(|| format!("Malformed template registry {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut registry = Self::default();
        for mut template in manifest.templates {
            template.check()?;
            template.code_path = base.join(&template.code_path);
            if registry.by_id.contains_key(&template.template_id) {
                bail!("duplicate template id '{}'", template.template_id);
            }
            registry
                .by_id
                .insert(template.template_id.clone(), registry.templates.len());
            registry.templates.push(template);
        }
        info!(
            "Loaded {} templates from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&TemplateDef> {
        self.by_id.get(id).map(|&i| &self.templates[i])
    }

    /// Templates in manifest order.
    pub fn iter(&self) -> impl Iterator<Item = &TemplateDef> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
