use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value as Json;

use super::Limits;
use super::ast::FnDecl;

/// A capability object handed to a script from the host.
///
/// Scripts reach host functionality only through method calls on values
/// of this kind (`conn.video(id)`), never through globals.
pub trait HostObject: Send + Sync {
    /// Name shown in error messages and by `type_of`.
    fn type_name(&self) -> &str;

    fn call_method(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value>;
}

/// Runtime value of a reel script. Lists and maps are copied on
/// assignment; functions and host objects are shared handles.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Func(Arc<FnDecl>),
    Host(Arc<dyn HostObject>),
}

impl Value {
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Func(_) => "function",
            Value::Host(h) => h.type_name(),
        }
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Num(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts to JSON. Integral numbers become JSON integers.
    pub fn to_json(&self) -> Result<Json, String> {
        Ok(match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Num(n) => number_to_json(*n)?,
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(
                items
                    .iter()
                    .map(Value::to_json)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json()?);
                }
                Json::Object(out)
            }
            Value::Func(_) | Value::Host(_) => {
                return Err(format!("cannot convert {} to data", self.type_name()));
            }
        })
    }
}

fn number_to_json(n: f64) -> Result<Json, String> {
    if !n.is_finite() {
        return Err(format!("cannot convert non-finite number {n} to data"));
    }
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Ok(Json::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(Json::Number)
        .ok_or_else(|| format!("cannot convert number {n} to data"))
}

impl Value {
    /// Fails when `self` is larger or more deeply nested than `limits`
    /// allow. Stops walking at the first bound crossed.
    pub(crate) fn check_size(&self, limits: &Limits) -> Result<(), String> {
        SizeMeter {
            left: limits.max_value_size,
            limits,
        }
        .visit(self, 0)
    }
}

struct SizeMeter<'a> {
    left: usize,
    limits: &'a Limits,
}

impl SizeMeter<'_> {
    fn charge(&mut self, units: usize) -> Result<(), String> {
        match self.left.checked_sub(units.max(1)) {
            Some(left) => {
                self.left = left;
                Ok(())
            }
            None => Err(format!(
                "value exceeds the size limit of {}",
                self.limits.max_value_size
            )),
        }
    }

    fn visit(&mut self, v: &Value, depth: usize) -> Result<(), String> {
        if depth > self.limits.max_value_depth {
            return Err(format!(
                "value is nested deeper than {} levels",
                self.limits.max_value_depth
            ));
        }
        match v {
            Value::Str(s) => self.charge(s.len()),
            Value::List(items) => {
                self.charge(1)?;
                items.iter().try_for_each(|item| self.visit(item, depth + 1))
            }
            Value::Map(map) => {
                self.charge(1)?;
                for (k, item) in map {
                    self.charge(k.len())?;
                    self.visit(item, depth + 1)?;
                }
                Ok(())
            }
            _ => self.charge(1),
        }
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => Arc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Display is what `str()` and string concatenation produce.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Num(n) => f.write_str(&format_number(*n)),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_nested(f, item)?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k:?}: ")?;
                    write_nested(f, v)?;
                }
                f.write_str("}")
            }
            Value::Func(decl) => write!(f, "<fn {}>", decl.name()),
            Value::Host(h) => write!(f, "<{}>", h.type_name()),
        }
    }
}

fn write_nested(f: &mut fmt::Formatter<'_>, v: &Value) -> fmt::Result {
    match v {
        Value::Str(s) => write!(f, "{s:?}"),
        other => write!(f, "{other}"),
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            other => write!(f, "{other}"),
        }
    }
}
