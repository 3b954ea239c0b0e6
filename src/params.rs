//! Parameter validation against a template's declarative field schema.
//!
//! Input comes from callers as untyped JSON. Validation never coerces
//! (the string `"5"` is not a number) and never stops at the first bad
//! field: every problem is reported in one pass so the caller can fix
//! them all at once.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declared type of a template parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Text,
    Number,
    Enum,
    Color,
    VideoAssetId,
    ImageAssetId,
    AudioAssetId,
    /// Anything else found in a manifest; rejected at validation time.
    Other(String),
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Enum => "enum",
            FieldType::Color => "color",
            FieldType::VideoAssetId => "video_asset_id",
            FieldType::ImageAssetId => "image_asset_id",
            FieldType::AudioAssetId => "audio_asset_id",
            FieldType::Other(s) => s,
        }
    }
}

impl From<String> for FieldType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "text" => FieldType::Text,
            "number" => FieldType::Number,
            "enum" => FieldType::Enum,
            "color" => FieldType::Color,
            "video_asset_id" => FieldType::VideoAssetId,
            "image_asset_id" => FieldType::ImageAssetId,
            "audio_asset_id" => FieldType::AudioAssetId,
            _ => FieldType::Other(s),
        }
    }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a template's `params_schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// `null` and absent are equivalent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Value>,
}

/// Outcome of [`validate`]. `errors` is empty iff every field passed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Validated {
    pub cleaned: Map<String, Value>,
    pub errors: Vec<String>,
}

impl Validated {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validates `input` against `schema`, filling defaults.
///
/// Keys of `input` that the schema does not mention are dropped.
pub fn validate(schema: &[FieldSpec], input: &Map<String, Value>) -> Validated {
    let mut out = Validated::default();

    for field in schema {
        let name = &field.name;

        let Some(value) = input.get(name) else {
            let default = field.default.clone().filter(|v| !v.is_null());
            if field.required && default.is_none() {
                out.errors.push(format!("Missing required param: {name}"));
            } else {
                out.cleaned
                    .insert(name.clone(), default.unwrap_or(Value::Null));
            }
            continue;
        };

        if let Err(e) = check_type(field, value) {
            out.errors.push(e);
            continue;
        }

        out.cleaned.insert(name.clone(), value.clone());
    }

    out
}

fn check_type(field: &FieldSpec, value: &Value) -> Result<(), String> {
    let name = &field.name;
    match &field.field_type {
        FieldType::Text
        | FieldType::Color
        | FieldType::VideoAssetId
        | FieldType::ImageAssetId
        | FieldType::AudioAssetId => {
            if !value.is_string() {
                return Err(format!("{name} must be a string"));
            }
        }
        // JSON booleans are their own type, so `true` never passes here.
        FieldType::Number => {
            if !value.is_number() {
                return Err(format!("{name} must be a number"));
            }
        }
        FieldType::Enum => {
            if !field.options.contains(value) {
                return Err(format!(
                    "{name} must be one of {}",
                    format_options(&field.options)
                ));
            }
        }
        FieldType::Other(t) => return Err(format!("Unsupported param type: {t}")),
    }
    Ok(())
}

fn format_options(options: &[Value]) -> String {
    let items: Vec<String> = options
        .iter()
        .map(|o| match o {
            Value::String(s) => format!("'{s}'"),
            other => other.to_string(),
        })
        .collect();
    format!("[{}]", items.join(", "))
}
