//! Builtin Globals and Methods
//!
//! The only functions an expression can call. Everything here is pure: no
//! builtin can reach the host tree, the network, timers or storage.

use crate::error::EvalError;
use crate::value::{parse_number_literal, Value};

/// Longest string a builtin may produce, in bytes.
pub const MAX_STRING_LEN: usize = 1 << 20;

fn within_limit(len: usize) -> Result<(), EvalError> {
    if len > MAX_STRING_LEN {
        return Err(EvalError::runtime(format!("string longer than {MAX_STRING_LEN} bytes")));
    }
    Ok(())
}

/// Safe global names an expression may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Global {
    Math,
    Json,
    Object,
    Array,
    Number,
    String,
    Boolean,
    IsNaN,
    ParseInt,
    ParseFloat,
}

/// Resolve a free identifier that is not provided by the scope.
///
/// Returns a literal for value-like globals (`undefined`, `NaN`,
/// `Infinity`), a [`Global`] for callable namespaces, or `None`.
pub(crate) fn lookup(name: &str) -> Option<Result<Global, Value>> {
    let found = match name {
        "undefined" => Err(Value::Undefined),
        "NaN" => Err(Value::Number(f64::NAN)),
        "Infinity" => Err(Value::Number(f64::INFINITY)),
        "Math" => Ok(Global::Math),
        "JSON" => Ok(Global::Json),
        "Object" => Ok(Global::Object),
        "Array" => Ok(Global::Array),
        "Number" => Ok(Global::Number),
        "String" => Ok(Global::String),
        "Boolean" => Ok(Global::Boolean),
        "isNaN" => Ok(Global::IsNaN),
        "parseInt" => Ok(Global::ParseInt),
        "parseFloat" => Ok(Global::ParseFloat),
        _ => return None,
    };
    Some(found)
}

/// Non-call property of a namespace, e.g. `Math.PI`.
pub(crate) fn static_property(global: Global, property: &str) -> Value {
    match (global, property) {
        (Global::Math, "PI") => Value::Number(std::f64::consts::PI),
        (Global::Math, "E") => Value::Number(std::f64::consts::E),
        (Global::Number, "MAX_SAFE_INTEGER") => Value::Number(9_007_199_254_740_991.0),
        _ => Value::Undefined,
    }
}

/// Call a global function directly, e.g. `String(x)`.
pub(crate) fn call_function(global: Global, args: &[Value]) -> Result<Value, EvalError> {
    let first = args.first().cloned().unwrap_or_default();
    Ok(match global {
        Global::Number => Value::Number(if args.is_empty() { 0.0 } else { first.to_number() }),
        Global::String => Value::String(if args.is_empty() {
            String::new()
        } else {
            first.to_display_string()
        }),
        Global::Boolean => Value::Bool(first.is_truthy()),
        Global::IsNaN => Value::Bool(first.to_number().is_nan()),
        Global::ParseInt => Value::Number(parse_int(&first.to_display_string(), args.get(1))),
        Global::ParseFloat => Value::Number(parse_float(&first.to_display_string())),
        other => return Err(EvalError::runtime(format!("{other:?} is not a function"))),
    })
}

/// Call a namespace method, e.g. `Math.max(a, b)`.
pub(crate) fn call_static(global: Global, method: &str, args: &[Value]) -> Result<Value, EvalError> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
    let num = |i: usize| arg(i).to_number();

    let result = match (global, method) {
        (Global::Math, "abs") => Value::Number(num(0).abs()),
        (Global::Math, "floor") => Value::Number(num(0).floor()),
        (Global::Math, "ceil") => Value::Number(num(0).ceil()),
        (Global::Math, "round") => Value::Number((num(0) + 0.5).floor()),
        (Global::Math, "trunc") => Value::Number(num(0).trunc()),
        (Global::Math, "sign") => {
            let n = num(0);
            Value::Number(if n.is_nan() || n == 0.0 { n } else { n.signum() })
        }
        (Global::Math, "sqrt") => Value::Number(num(0).sqrt()),
        (Global::Math, "pow") => Value::Number(num(0).powf(num(1))),
        (Global::Math, "min") => Value::Number(
            args.iter().map(Value::to_number).fold(f64::INFINITY, nan_min),
        ),
        (Global::Math, "max") => Value::Number(
            args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, nan_max),
        ),
        (Global::Json, "stringify") => match arg(0) {
            Value::Undefined => Value::Undefined,
            value => Value::String(value.to_json().to_string()),
        },
        (Global::Json, "parse") => {
            let text = arg(0).to_display_string();
            let json: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| EvalError::runtime(format!("JSON.parse: {e}")))?;
            Value::from(json)
        }
        (Global::Object, "keys") => match arg(0) {
            Value::Object(map) => Value::Array(map.keys().cloned().map(Value::String).collect()),
            Value::Array(items) => Value::Array(
                (0..items.len()).map(|i| Value::String(i.to_string())).collect(),
            ),
            _ => Value::Array(Vec::new()),
        },
        (Global::Object, "values") => match arg(0) {
            Value::Object(map) => Value::Array(map.values().cloned().collect()),
            Value::Array(items) => Value::Array(items),
            _ => Value::Array(Vec::new()),
        },
        (Global::Object, "entries") => match arg(0) {
            Value::Object(map) => Value::Array(
                map.into_iter()
                    .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
                    .collect(),
            ),
            _ => Value::Array(Vec::new()),
        },
        (Global::Array, "isArray") => Value::Bool(matches!(arg(0), Value::Array(_))),
        (Global::Number, "isInteger") => {
            Value::Bool(matches!(arg(0), Value::Number(n) if n.is_finite() && n.fract() == 0.0))
        }
        (Global::Number, "isFinite") => Value::Bool(matches!(arg(0), Value::Number(n) if n.is_finite())),
        _ => {
            return Err(EvalError::runtime(format!("{global:?}.{method} is not a function")));
        }
    };
    Ok(result)
}

/// Call a method on a value, e.g. `name.toUpperCase()`.
pub(crate) fn call_method(receiver: &Value, method: &str, args: &[Value]) -> Result<Value, EvalError> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();

    if method == "toString" {
        return Ok(Value::String(receiver.to_display_string()));
    }

    let result = match receiver {
        Value::String(s) => string_method(s, method, args)?,
        Value::Array(items) => match method {
            "join" => {
                let separator = match arg(0) {
                    Value::Undefined => ",".to_string(),
                    sep => sep.to_display_string(),
                };
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_display_string() })
                    .collect();
                let separators = separator.len().saturating_mul(parts.len().saturating_sub(1));
                within_limit(parts.iter().map(String::len).fold(separators, usize::saturating_add))?;
                Value::String(parts.join(&separator))
            }
            "includes" => Value::Bool(items.iter().any(|v| v.strict_eq(&arg(0)))),
            "indexOf" => Value::Number(
                items
                    .iter()
                    .position(|v| v.strict_eq(&arg(0)))
                    .map_or(-1.0, |i| i as f64),
            ),
            "slice" => {
                let (start, end) = slice_bounds(items.len(), args);
                Value::Array(items[start..end].to_vec())
            }
            "concat" => {
                let mut out = items.clone();
                for extra in args {
                    match extra {
                        Value::Array(more) => out.extend(more.iter().cloned()),
                        other => out.push(other.clone()),
                    }
                }
                Value::Array(out)
            }
            "at" => {
                let len = items.len() as f64;
                let index = arg(0).to_number().trunc();
                let index = if index < 0.0 { len + index } else { index };
                if index >= 0.0 && index < len {
                    items[index as usize].clone()
                } else {
                    Value::Undefined
                }
            }
            _ => return Err(not_a_function(receiver, method)),
        },
        Value::Number(n) => match method {
            "toFixed" => {
                let digits = arg(0).to_number();
                let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 20.0) as usize };
                Value::String(format!("{:.*}", digits, n))
            }
            _ => return Err(not_a_function(receiver, method)),
        },
        _ => return Err(not_a_function(receiver, method)),
    };
    Ok(result)
}

fn string_method(s: &str, method: &str, args: &[Value]) -> Result<Value, EvalError> {
    let text = |i: usize| args.get(i).map(Value::to_display_string).unwrap_or_default();
    let chars: Vec<char> = s.chars().collect();

    Ok(match method {
        "toUpperCase" => Value::String(s.to_uppercase()),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "trim" => Value::String(s.trim().to_string()),
        "includes" => Value::Bool(s.contains(text(0).as_str())),
        "startsWith" => Value::Bool(s.starts_with(text(0).as_str())),
        "endsWith" => Value::Bool(s.ends_with(text(0).as_str())),
        "indexOf" => Value::Number(
            s.find(text(0).as_str())
                .map_or(-1.0, |byte| s[..byte].chars().count() as f64),
        ),
        "charAt" => {
            let index = args.first().map_or(0.0, Value::to_number) as usize;
            Value::String(chars.get(index).map(char::to_string).unwrap_or_default())
        }
        "slice" | "substring" => {
            let (start, end) = slice_bounds(chars.len(), args);
            Value::String(chars[start..end].iter().collect())
        }
        "split" => match args.first() {
            None | Some(Value::Undefined) => Value::Array(vec![Value::String(s.to_string())]),
            Some(sep) => {
                let sep = sep.to_display_string();
                if sep.is_empty() {
                    Value::Array(chars.iter().map(|c| Value::String(c.to_string())).collect())
                } else {
                    Value::Array(s.split(sep.as_str()).map(Value::from).collect())
                }
            }
        },
        "replace" => {
            let replacement = text(1);
            within_limit(s.len().saturating_add(replacement.len()))?;
            Value::String(s.replacen(text(0).as_str(), &replacement, 1))
        }
        "replaceAll" => {
            let (pattern, replacement) = (text(0), text(1));
            let hits = if pattern.is_empty() {
                chars.len() + 1
            } else {
                s.matches(pattern.as_str()).count()
            };
            within_limit(s.len().saturating_add(hits.saturating_mul(replacement.len())))?;
            Value::String(s.replace(pattern.as_str(), &replacement))
        }
        "repeat" => {
            let count = args.first().map_or(0.0, Value::to_number);
            if !(0.0..=10_000.0).contains(&count) {
                return Err(EvalError::runtime("invalid repeat count"));
            }
            within_limit(s.len().saturating_mul(count as usize))?;
            Value::String(s.repeat(count as usize))
        }
        "padStart" | "padEnd" => {
            let width = args.first().map_or(0.0, Value::to_number).clamp(0.0, 10_000.0) as usize;
            let fill = match args.get(1) {
                Some(v) if !v.is_nullish() => v.to_display_string(),
                _ => " ".to_string(),
            };
            let missing = width.saturating_sub(chars.len());
            let pad: String = fill.chars().cycle().take(if fill.is_empty() { 0 } else { missing }).collect();
            within_limit(s.len() + pad.len())?;
            if method == "padStart" {
                Value::String(format!("{pad}{s}"))
            } else {
                Value::String(format!("{s}{pad}"))
            }
        }
        _ => return Err(not_a_function(&Value::String(s.to_string()), method)),
    })
}

/// Clamp `slice(start, end)` style arguments, negative values counting from
/// the end.
fn slice_bounds(len: usize, args: &[Value]) -> (usize, usize) {
    let resolve = |value: Option<&Value>, default: usize| -> usize {
        match value {
            None | Some(Value::Undefined) => default,
            Some(v) => {
                let n = v.to_number();
                let n = if n.is_nan() { 0.0 } else { n.trunc() };
                if n < 0.0 {
                    (len as f64 + n).max(0.0) as usize
                } else {
                    (n as usize).min(len)
                }
            }
        }
    };
    let start = resolve(args.first(), 0);
    let end = resolve(args.get(1), len);
    (start, end.max(start))
}

fn not_a_function(receiver: &Value, method: &str) -> EvalError {
    EvalError::runtime(format!("{}.{method} is not a function", receiver.kind_name()))
}

fn nan_min(acc: f64, n: f64) -> f64 {
    if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.min(n) }
}

fn nan_max(acc: f64, n: f64) -> f64 {
    if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.max(n) }
}

fn parse_int(text: &str, radix: Option<&Value>) -> f64 {
    let radix = radix.map(Value::to_number).filter(|r| (2.0..=36.0).contains(r)).unwrap_or(10.0) as u32;
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let prefix: String = digits.chars().take_while(|c| c.is_digit(radix)).collect();
    if prefix.is_empty() {
        return f64::NAN;
    }
    let magnitude = prefix
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(d));
    if negative { -magnitude } else { magnitude }
}

fn parse_float(text: &str) -> f64 {
    let trimmed = text.trim();
    // Longest prefix that parses as a number.
    (1..=trimmed.len())
        .rev()
        .filter(|end| trimmed.is_char_boundary(*end))
        .find_map(|end| parse_number_literal(&trimmed[..end]).filter(|n| !n.is_nan()))
        .unwrap_or(f64::NAN)
}
