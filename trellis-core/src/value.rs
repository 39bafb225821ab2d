//! Dynamic Values
//!
//! Bind expressions operate on loosely typed data, the same shape as the
//! JSON models authors bind against, plus the two extra states the content
//! rules care about: `undefined` (a name or property that does not exist)
//! and `NaN` (a failed numeric conversion).
//!
//! # Falsy sets
//!
//! Two different notions of "false" exist and must not be confused:
//!
//! - [`Value::is_truthy`] is expression truthiness, used by `!`, `&&`, `||`
//!   and `?:`. `0` and `""` are falsy here.
//! - [`Value::is_blank`] is the content falsy set `{null, undefined, NaN,
//!   false}`. It decides whether a placeholder renders as nothing, whether a
//!   single-expression attribute is removed, and whether a visibility
//!   directive hides its element. `0` and `""` are *not* blank.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;

/// Variable mapping visible to an expression.
pub type Scope = IndexMap<String, Value>;

/// A dynamically typed binding value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    /// Expression truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Member of the content falsy set `{null, undefined, NaN, false}`.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Undefined | Value::Null | Value::Bool(false) => true,
            Value::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    /// `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Whether the value is neither an array nor an object.
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Object(_))
    }

    /// The `typeof` name of the value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) | Value::Object(_) => "object",
        }
    }

    /// A descriptive kind name for diagnostics (`null` and `array` are
    /// reported as themselves rather than as `object`).
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Array(_) => "array",
            other => other.type_name(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Numeric conversion (`ToNumber`).
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    parse_number_literal(trimmed).unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) => match items.as_slice() {
                [] => 0.0,
                [single] => single.to_number(),
                _ => f64::NAN,
            },
            Value::Object(_) => f64::NAN,
        }
    }

    /// String conversion used when a value is rendered into content.
    ///
    /// Arrays and objects render as compact JSON.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => self.to_json().to_string(),
        }
    }

    /// Canonical string identity used for reconciliation keys.
    ///
    /// Object keys are emitted sorted, so two structurally equal objects
    /// always produce the same key.
    pub fn canonical_key(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => sorted_json(self).to_string(),
            other => other.to_display_string(),
        }
    }

    /// Property lookup. Missing properties read as `undefined`.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(map) => map.get(key).cloned().unwrap_or_default(),
            Value::Array(items) => match key {
                "length" => Value::Number(items.len() as f64),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default(),
            },
            Value::String(s) => match key {
                "length" => Value::Number(s.chars().count() as f64),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or_default(),
            },
            _ => Value::Undefined,
        }
    }

    /// Strict equality (`===`).
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            // Composite values compare by content; there is no object
            // identity in a copied data model.
            (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
                self.to_json() == other.to_json()
            }
            _ => false,
        }
    }

    /// Loose equality (`==`).
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => {
                if self.is_primitive() && other.is_primitive() {
                    self.to_number() == other.to_number()
                } else {
                    self.to_display_string() == other.to_display_string()
                }
            }
            _ => self.strict_eq(other),
        }
    }

    /// Convert into a `serde_json::Value`. `undefined` and non-finite
    /// numbers become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            // NaN is equal to itself for change detection.
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => self.strict_eq(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Scope> for Value {
    fn from(map: Scope) -> Self {
        Value::Object(map)
    }
}

/// JSON rendering with object keys inserted in sorted order, independent of
/// how `serde_json` maps are configured.
fn sorted_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Array(items) => serde_json::Value::Array(items.iter().map(sorted_json).collect()),
        Value::Object(map) => {
            let sorted: BTreeMap<&String, serde_json::Value> =
                map.iter().map(|(k, v)| (k, sorted_json(v))).collect();
            serde_json::Value::Object(
                sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect(),
            )
        }
        other => other.to_json(),
    }
}

/// Build a [`Scope`] from a JSON object. Non-object input yields an empty
/// scope.
pub fn scope_from_json(json: serde_json::Value) -> Scope {
    match Value::from(json) {
        Value::Object(map) => map,
        _ => Scope::new(),
    }
}

/// Format a number the way expression output prints it: integral values
/// without a fractional part, `NaN`, `Infinity`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{}", n)
    }
}

/// Parse a decimal or `0x` hexadecimal number literal.
pub(crate) fn parse_number_literal(text: &str) -> Option<f64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let magnitude = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()? as f64
    } else if digits == "Infinity" {
        f64::INFINITY
    } else if digits.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) {
        digits.parse::<f64>().ok()?
    } else {
        return None;
    };
    Some(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_set_is_narrower_than_falsy() {
        for blank in [Value::Null, Value::Undefined, Value::Number(f64::NAN), Value::Bool(false)] {
            assert!(blank.is_blank(), "{blank:?} should be blank");
            assert!(!blank.is_truthy());
        }

        // Falsy but rendered.
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::Number(0.0).is_blank());
        assert!(!Value::from("").is_blank());
    }

    #[test]
    fn numbers_display_like_expressions() {
        assert_eq!(Value::Number(1.0).to_display_string(), "1");
        assert_eq!(Value::Number(-2.5).to_display_string(), "-2.5");
        assert_eq!(Value::Number(f64::NAN).to_display_string(), "NaN");
        assert_eq!(Value::Number(f64::INFINITY).to_display_string(), "Infinity");
        assert_eq!(Value::Number(-0.0).to_display_string(), "0");
    }

    #[test]
    fn composites_display_as_json() {
        let value = Value::from(json!({"a": [1, 2], "b": "x"}));
        assert_eq!(value.to_display_string(), r#"{"a":[1,2],"b":"x"}"#);
    }

    #[test]
    fn canonical_key_sorts_object_keys() {
        let a = Value::from(json!({"b": 1, "a": 2}));
        let b = Value::from(json!({"a": 2, "b": 1}));
        assert_eq!(a.canonical_key(), b.canonical_key());
        assert_eq!(Value::from("k").canonical_key(), "k");
        assert_eq!(Value::Number(3.0).canonical_key(), "3");
    }

    #[test]
    fn property_access() {
        let value = Value::from(json!({"list": [10, 20], "name": "abc"}));
        assert_eq!(value.get("list").get("1"), Value::Number(20.0));
        assert_eq!(value.get("list").get("length"), Value::Number(2.0));
        assert_eq!(value.get("name").get("length"), Value::Number(3.0));
        assert_eq!(value.get("missing"), Value::Undefined);
        assert_eq!(Value::Null.get("x"), Value::Undefined);
    }

    #[test]
    fn equality_semantics() {
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Null.strict_eq(&Value::Undefined));
        assert!(Value::from("1").loose_eq(&Value::Number(1.0)));
        assert!(!Value::from("1").strict_eq(&Value::Number(1.0)));
        assert!(Value::Bool(true).loose_eq(&Value::Number(1.0)));
        assert!(!Value::Number(f64::NAN).strict_eq(&Value::Number(f64::NAN)));
    }

    #[test]
    fn json_conversion() {
        let value = Value::from(json!({"z": 1, "a": null, "f": 1.5}));
        assert_eq!(value.get("z"), Value::Number(1.0));
        assert_eq!(value.get("a"), Value::Null);
        assert_eq!(value.to_json(), json!({"a": null, "z": 1, "f": 1.5}));
        assert_eq!(Value::Undefined.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn string_to_number() {
        assert_eq!(Value::from(" 42 ").to_number(), 42.0);
        assert_eq!(Value::from("").to_number(), 0.0);
        assert_eq!(Value::from("0x10").to_number(), 16.0);
        assert!(Value::from("abc").to_number().is_nan());
    }
}
