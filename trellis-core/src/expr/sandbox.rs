//! Sandbox Policy
//!
//! Two independent layers:
//!
//! - a regex pre-check that rejects call- or subscript-style use of `eval`
//!   and `arguments` before anything is parsed;
//! - a shadow list of dangerous global names that resolve to `undefined`
//!   unless the caller's scope explicitly provides the same name.
//!
//! Prototype-escape property names are additionally unreadable on every
//! value.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EvalError;

/// Names always shadowed to `undefined` unless the scope defines them.
pub const SHADOWED_IDENTIFIERS: &[&str] = &[
    // global object aliases
    "window",
    "self",
    "globalThis",
    "global",
    "document",
    "parent",
    "top",
    "frames",
    "opener",
    // dynamic code execution
    "eval",
    "Function",
    "setTimeout",
    "setInterval",
    "setImmediate",
    "queueMicrotask",
    "importScripts",
    "require",
    "process",
    "Reflect",
    "Proxy",
    // storage and navigation
    "localStorage",
    "sessionStorage",
    "indexedDB",
    "caches",
    "cookieStore",
    "location",
    "history",
    "navigator",
    "fetch",
    "XMLHttpRequest",
    "WebSocket",
    // prototype escapes
    "constructor",
    "__proto__",
    "prototype",
    "arguments",
];

const ESCAPE_PROPERTIES: &[&str] = &["constructor", "__proto__", "prototype"];

static FORBIDDEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(eval|arguments)\s*[(\[]").expect("valid sandbox regex"));

/// Reject sources that call or subscript `eval` / `arguments`.
pub fn check(source: &str) -> Result<(), EvalError> {
    match FORBIDDEN_PATTERN.find(source) {
        Some(found) => Err(EvalError::Forbidden(found.as_str().to_string())),
        None => Ok(()),
    }
}

pub fn is_shadowed(name: &str) -> bool {
    SHADOWED_IDENTIFIERS.contains(&name)
}

pub fn is_escape_property(name: &str) -> bool {
    ESCAPE_PROPERTIES.contains(&name)
}
