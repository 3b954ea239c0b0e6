//! Built-in functions available to every script.
//!
//! All built-ins are pure: no I/O, no clock, no environment access.

use std::collections::BTreeMap;

use super::Limits;
use super::value::Value;

/// Results are size-checked by the interpreter; built-ins that could
/// allocate far beyond their inputs check `Limits` up front.
type Builtin = fn(Vec<Value>, &Limits) -> Result<Value, String>;

pub(crate) fn lookup(name: &str) -> Option<Builtin> {
    let f: Builtin = match name {
        "len" => |a, _| len(a),
        "str" => |a, _| to_str(a),
        "num" => |a, _| to_num(a),
        "keys" => |a, _| keys(a),
        "has" => |a, _| has(a),
        "get" => |a, _| get(a),
        "push" => |a, _| push(a),
        "range" => range,
        "min" => |a, _| min(a),
        "max" => |a, _| max(a),
        "round" => |a, _| round(a),
        "floor" => |a, _| unary_math("floor", a, f64::floor),
        "ceil" => |a, _| unary_math("ceil", a, f64::ceil),
        "abs" => |a, _| unary_math("abs", a, f64::abs),
        "lower" => |a, _| unary_str("lower", a, |s| s.to_lowercase()),
        "upper" => |a, _| unary_str("upper", a, |s| s.to_uppercase()),
        "trim" => |a, _| unary_str("trim", a, |s| s.trim().to_string()),
        "join" => join,
        "type_of" => |a, _| type_of(a),
        "fail" => |a, _| fail(a),
        _ => return None,
    };
    Some(f)
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(format!(
            "{name}() takes {expected} argument(s), got {}",
            args.len()
        ));
    }
    Ok(())
}

fn num_arg(name: &str, v: &Value) -> Result<f64, String> {
    match v {
        Value::Num(n) => Ok(*n),
        other => Err(format!("{name}() expects a number, got {}", other.type_name())),
    }
}

fn str_arg<'a>(name: &str, v: &'a Value) -> Result<&'a str, String> {
    match v {
        Value::Str(s) => Ok(s),
        other => Err(format!("{name}() expects a string, got {}", other.type_name())),
    }
}

fn len(args: Vec<Value>) -> Result<Value, String> {
    arity("len", &args, 1, 1)?;
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(map) => map.len(),
        other => return Err(format!("len() is not defined for {}", other.type_name())),
    };
    Ok(Value::Num(n as f64))
}

fn to_str(args: Vec<Value>) -> Result<Value, String> {
    arity("str", &args, 1, 1)?;
    Ok(Value::Str(args[0].to_string()))
}

fn to_num(args: Vec<Value>) -> Result<Value, String> {
    arity("num", &args, 1, 1)?;
    match &args[0] {
        Value::Num(n) => Ok(Value::Num(*n)),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Num)
            .map_err(|_| format!("cannot convert \"{s}\" to a number")),
        other => Err(format!("cannot convert {} to a number", other.type_name())),
    }
}

fn keys(args: Vec<Value>) -> Result<Value, String> {
    arity("keys", &args, 1, 1)?;
    match &args[0] {
        Value::Map(map) => Ok(Value::List(
            map.keys().map(|k| Value::Str(k.clone())).collect(),
        )),
        other => Err(format!("keys() expects a map, got {}", other.type_name())),
    }
}

fn has(args: Vec<Value>) -> Result<Value, String> {
    arity("has", &args, 2, 2)?;
    let found = match (&args[0], &args[1]) {
        (Value::Map(map), Value::Str(k)) => map.contains_key(k),
        (Value::List(items), v) => items.contains(v),
        (Value::Str(s), Value::Str(sub)) => s.contains(sub.as_str()),
        (a, b) => {
            return Err(format!(
                "has() is not defined for {} and {}",
                a.type_name(),
                b.type_name()
            ));
        }
    };
    Ok(Value::Bool(found))
}

/// `get(map, key, default?)`: the default also replaces a stored `null`.
fn get(mut args: Vec<Value>) -> Result<Value, String> {
    arity("get", &args, 2, 3)?;
    let default = if args.len() == 3 {
        args.pop().unwrap_or(Value::Null)
    } else {
        Value::Null
    };
    let key = str_arg("get", &args[1])?.to_string();
    match &args[0] {
        Value::Map(map) => match map.get(&key) {
            Some(Value::Null) | None => Ok(default),
            Some(v) => Ok(v.clone()),
        },
        other => Err(format!("get() expects a map, got {}", other.type_name())),
    }
}

fn push(mut args: Vec<Value>) -> Result<Value, String> {
    arity("push", &args, 2, 2)?;
    let item = args.pop().unwrap_or(Value::Null);
    match args.pop() {
        Some(Value::List(mut items)) => {
            items.push(item);
            Ok(Value::List(items))
        }
        Some(other) => Err(format!("push() expects a list, got {}", other.type_name())),
        None => Err("push() expects a list".to_string()),
    }
}

/// Upper bound on `range()` output, keeps a typo from allocating gigabytes.
const MAX_RANGE: usize = 100_000;

/// Largest magnitude at which every whole number is an exact f64 (2^53).
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

fn range(args: Vec<Value>, limits: &Limits) -> Result<Value, String> {
    arity("range", &args, 1, 2)?;
    let (start, end) = if args.len() == 1 {
        (0.0, num_arg("range", &args[0])?)
    } else {
        (num_arg("range", &args[0])?, num_arg("range", &args[1])?)
    };
    if start.fract() != 0.0 || end.fract() != 0.0 {
        return Err("range() expects whole numbers".to_string());
    }
    if start.abs() > MAX_EXACT_INT || end.abs() > MAX_EXACT_INT {
        return Err("range() bounds must not exceed 2^53 in magnitude".to_string());
    }
    let n = (end - start).max(0.0) as usize;
    let cap = MAX_RANGE.min(limits.max_value_size);
    if n > cap {
        return Err(format!("range() is limited to {cap} items"));
    }
    Ok(Value::List(
        (0..n).map(|k| Value::Num(start + k as f64)).collect(),
    ))
}

fn fold_numbers(name: &str, args: Vec<Value>, pick: fn(f64, f64) -> f64) -> Result<Value, String> {
    let items = match args.as_slice() {
        [Value::List(items)] => items.clone(),
        _ => args,
    };
    let mut acc: Option<f64> = None;
    for v in &items {
        let n = num_arg(name, v)?;
        acc = Some(acc.map_or(n, |a| pick(a, n)));
    }
    acc.map(Value::Num)
        .ok_or_else(|| format!("{name}() needs at least one number"))
}

fn min(args: Vec<Value>) -> Result<Value, String> {
    fold_numbers("min", args, f64::min)
}

fn max(args: Vec<Value>) -> Result<Value, String> {
    fold_numbers("max", args, f64::max)
}

fn round(args: Vec<Value>) -> Result<Value, String> {
    arity("round", &args, 1, 2)?;
    let n = num_arg("round", &args[0])?;
    let digits = match args.get(1) {
        Some(d) => num_arg("round", d)?,
        None => 0.0,
    };
    if !(0.0..=12.0).contains(&digits) || digits.fract() != 0.0 {
        return Err("round() digits must be a whole number between 0 and 12".to_string());
    }
    let scale = 10f64.powi(digits as i32);
    Ok(Value::Num((n * scale).round() / scale))
}

fn unary_math(name: &str, args: Vec<Value>, f: fn(f64) -> f64) -> Result<Value, String> {
    arity(name, &args, 1, 1)?;
    Ok(Value::Num(f(num_arg(name, &args[0])?)))
}

fn unary_str(name: &str, args: Vec<Value>, f: fn(&str) -> String) -> Result<Value, String> {
    arity(name, &args, 1, 1)?;
    Ok(Value::Str(f(str_arg(name, &args[0])?)))
}

fn join(args: Vec<Value>, limits: &Limits) -> Result<Value, String> {
    arity("join", &args, 1, 2)?;
    let sep = match args.get(1) {
        Some(s) => str_arg("join", s)?,
        None => "",
    };
    let Value::List(items) = &args[0] else {
        return Err(format!("join() expects a list, got {}", args[0].type_name()));
    };
    let too_long = || format!("join() result exceeds the size limit of {}", limits.max_value_size);
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        out.push_str(&item.to_string());
        if out.len() > limits.max_value_size {
            return Err(too_long());
        }
    }
    Ok(Value::Str(out))
}

fn type_of(args: Vec<Value>) -> Result<Value, String> {
    arity("type_of", &args, 1, 1)?;
    Ok(Value::Str(args[0].type_name().to_string()))
}

fn fail(args: Vec<Value>) -> Result<Value, String> {
    arity("fail", &args, 1, 1)?;
    Err(args[0].to_string())
}

/// Helper for tests and host objects building map values.
pub(crate) fn map_of<const N: usize>(entries: [(&str, Value); N]) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>(),
    )
}
