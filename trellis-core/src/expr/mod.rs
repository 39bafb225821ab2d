//! Expression Evaluator
//!
//! Turns bind expressions (`user.name`, `items.length > 0`, `a ?? 'none'`)
//! into values against a [`Scope`].
//!
//! # Pipeline
//!
//! 1. The sandbox pre-check rejects forbidden `eval` / `arguments` usage.
//! 2. The source is tokenized and parsed into an [`Expr`] tree.
//! 3. The tree is compiled against the sorted list of scope names, binding
//!    every free identifier to a parameter slot, a builtin, or `undefined`.
//! 4. The compiled expression runs with the scope's values as arguments.
//!
//! Steps 1-3 are cached per `(source, sorted scope names)`: evaluating the
//! same text against scopes that differ only in values reuses one compiled
//! expression. A new compilation happens whenever the *set* of names
//! changes, because free variables are bound positionally.
//!
//! # Failure
//!
//! [`Evaluator::evaluate`] never fails. Any error is reported through the
//! dev-mode logger and the result is `null`. No coercion happens here; the
//! content layer decides how a value is rendered.

mod builtins;
mod compile;
mod lexer;
mod parser;
pub mod sandbox;

pub use builtins::Global;
pub use compile::CompiledExpr;
pub use parser::{parse, BinaryOp, Expr, LogicalOp, Slot, UnaryOp, MAX_DEPTH};

use std::sync::Arc;

use dashmap::DashMap;

use crate::dev_warn;
use crate::error::EvalError;
use crate::value::{Scope, Value};

/// Compilation cache key: source text plus the sorted scope names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    source: String,
    names: Vec<String>,
}

/// Sandboxed, caching expression evaluator.
#[derive(Debug, Default)]
pub struct Evaluator {
    cache: DashMap<CacheKey, Arc<CompiledExpr>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `source` against `scope`, returning `null` on any failure.
    pub fn evaluate(&self, source: &str, scope: &Scope) -> Value {
        match self.try_evaluate(source, scope) {
            Ok(value) => value,
            Err(err) => {
                dev_warn!(expression = %source, "expression evaluation failed: {}", err);
                Value::Null
            }
        }
    }

    /// Evaluate `source`, exposing the failure reason.
    pub fn try_evaluate(&self, source: &str, scope: &Scope) -> Result<Value, EvalError> {
        self.compile(source, scope)?.run(scope)
    }

    /// Fetch or build the compiled form of `source` for this scope's names.
    pub fn compile(&self, source: &str, scope: &Scope) -> Result<Arc<CompiledExpr>, EvalError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(EvalError::Empty);
        }

        let mut names: Vec<String> = scope.keys().cloned().collect();
        names.sort_unstable();
        let key = CacheKey {
            source: trimmed.to_string(),
            names,
        };

        if let Some(hit) = self.cache.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }

        sandbox::check(trimmed)?;
        let body = parse(trimmed)?;
        let compiled = Arc::new(CompiledExpr::new(trimmed, key.names.clone(), body));
        self.cache.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Number of compiled expressions held in the cache.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached compilation.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::scope_from_json;
    use serde_json::json;

    #[test]
    fn invalid_expressions_yield_null() {
        let evaluator = Evaluator::new();
        let scope = Scope::new();
        for source in ["", "   ", "a +", "eval('1')", "arguments[0]", "missing.deep.path", "(", "`tpl`"] {
            assert_eq!(evaluator.evaluate(source, &scope), Value::Null, "source: {source:?}");
        }
    }

    #[test]
    fn same_names_share_one_compilation() {
        let evaluator = Evaluator::new();
        let first = scope_from_json(json!({"a": 1, "b": 2}));
        let second = scope_from_json(json!({"b": 20, "a": 10}));

        assert_eq!(evaluator.evaluate("a + b", &first), Value::Number(3.0));
        assert_eq!(evaluator.cache_len(), 1);
        assert_eq!(evaluator.evaluate("a + b", &second), Value::Number(30.0));
        assert_eq!(evaluator.cache_len(), 1);

        // A different name set compiles again.
        let third = scope_from_json(json!({"a": 1, "b": 2, "c": 3}));
        assert_eq!(evaluator.evaluate("a + b", &third), Value::Number(3.0));
        assert_eq!(evaluator.cache_len(), 2);
    }

    #[test]
    fn shadowed_globals_unless_scope_provides_them() {
        let evaluator = Evaluator::new();
        assert_eq!(evaluator.evaluate("window", &Scope::new()), Value::Undefined);
        assert_eq!(evaluator.evaluate("typeof localStorage", &Scope::new()), Value::from("undefined"));

        let scope = scope_from_json(json!({"window": "mine"}));
        assert_eq!(evaluator.evaluate("window", &scope), Value::from("mine"));
    }

    #[test]
    fn forbidden_patterns_ignore_scope() {
        let evaluator = Evaluator::new();
        let scope = scope_from_json(json!({"eval": 1}));
        assert_eq!(
            evaluator.try_evaluate("eval(1)", &scope),
            Err(EvalError::Forbidden("eval(".to_string()))
        );
        assert_eq!(evaluator.evaluate("eval", &scope), Value::Number(1.0));
    }

    #[test]
    fn oversized_expressions_fail_cleanly() {
        let evaluator = Evaluator::new();
        let scope = Scope::new();

        let mut nested = "1".to_string();
        for level in 0..60 {
            nested = format!("({nested}){}", "+1".repeat(120 - 2 * level));
        }
        assert_eq!(evaluator.evaluate(&nested, &scope), Value::Null);
        assert_eq!(evaluator.try_evaluate(&nested, &scope), Err(EvalError::TooDeep(MAX_DEPTH)));

        let bomb = "'x'.repeat(10000).repeat(10000).repeat(10000)";
        assert_eq!(evaluator.evaluate(bomb, &scope), Value::Null);
        assert!(matches!(evaluator.try_evaluate(bomb, &scope), Err(EvalError::Runtime(_))));
    }

    #[test]
    fn no_coercion_inside_evaluator() {
        let evaluator = Evaluator::new();
        let scope = scope_from_json(json!({"flag": false, "n": null}));
        assert_eq!(evaluator.evaluate("flag", &scope), Value::Bool(false));
        assert_eq!(evaluator.evaluate("n", &scope), Value::Null);
        assert!(matches!(evaluator.evaluate("0 / 0", &scope), Value::Number(n) if n.is_nan()));
    }
}
