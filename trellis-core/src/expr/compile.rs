//! Expression Compilation
//!
//! Compiling binds every free identifier of a parsed expression to a fixed
//! location, the same way a traced function binds its inputs to value ids:
//!
//! 1. names provided by the scope become parameter slots, indexed by their
//!    position in the *sorted* list of scope names;
//! 2. sandboxed names become [`Slot::Shadowed`] and always read `undefined`;
//! 3. safe builtins become [`Slot::Global`] (or are folded to literals);
//! 4. anything else reads `undefined`.
//!
//! Because the binding depends only on the *set* of scope names, one
//! compiled expression serves every scope with the same names, whatever
//! their values.

use crate::error::EvalError;
use crate::value::{format_number, Scope, Value};

use super::builtins;
use super::parser::{BinaryOp, Expr, LogicalOp, Slot, UnaryOp};
use super::sandbox;

/// An expression bound to a fixed parameter list.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    params: Vec<String>,
    body: Expr,
}

impl CompiledExpr {
    /// Bind `body` against the sorted scope names in `params`.
    pub(crate) fn new(source: &str, params: Vec<String>, body: Expr) -> Self {
        let body = resolve(body, &params);
        Self {
            source: source.to_string(),
            params,
            body,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names bound as parameters, in slot order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Run against a scope that has exactly this expression's names.
    pub fn run(&self, scope: &Scope) -> Result<Value, EvalError> {
        let args: Vec<&Value> = self
            .params
            .iter()
            .map(|name| scope.get(name).unwrap_or(&Value::Undefined))
            .collect();
        Interpreter { args: &args }.eval(&self.body)
    }
}

fn resolve(expr: Expr, params: &[String]) -> Expr {
    let go = |e: Box<Expr>| Box::new(resolve(*e, params));
    match expr {
        Expr::Ident(name) => {
            if let Ok(index) = params.binary_search(&name) {
                Expr::Var(Slot::Param(index))
            } else if sandbox::is_shadowed(&name) {
                Expr::Var(Slot::Shadowed)
            } else {
                match builtins::lookup(&name) {
                    Some(Ok(global)) => Expr::Var(Slot::Global(global)),
                    Some(Err(literal)) => Expr::Literal(literal),
                    None => Expr::Var(Slot::Shadowed),
                }
            }
        }
        Expr::Array(items) => Expr::Array(items.into_iter().map(|e| resolve(e, params)).collect()),
        Expr::Object(entries) => Expr::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k, resolve(v, params)))
                .collect(),
        ),
        Expr::Member { object, property, optional } => Expr::Member { object: go(object), property, optional },
        Expr::Index { object, index, optional } => Expr::Index { object: go(object), index: go(index), optional },
        Expr::Call { callee, args } => Expr::Call {
            callee: go(callee),
            args: args.into_iter().map(|e| resolve(e, params)).collect(),
        },
        Expr::Unary { op, operand } => Expr::Unary { op, operand: go(operand) },
        Expr::Binary { op, lhs, rhs } => Expr::Binary { op, lhs: go(lhs), rhs: go(rhs) },
        Expr::Logical { op, lhs, rhs } => Expr::Logical { op, lhs: go(lhs), rhs: go(rhs) },
        Expr::Conditional { test, consequent, alternate } => Expr::Conditional {
            test: go(test),
            consequent: go(consequent),
            alternate: go(alternate),
        },
        literal @ (Expr::Literal(_) | Expr::Var(_)) => literal,
    }
}

struct Interpreter<'a> {
    args: &'a [&'a Value],
}

impl Interpreter<'_> {
    fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        Ok(self.eval_chain(expr)?.unwrap_or_default())
    }

    /// Evaluate, returning `None` when an optional chain short-circuits so
    /// the rest of the chain is skipped as a whole.
    fn eval_chain(&self, expr: &Expr) -> Result<Option<Value>, EvalError> {
        match expr {
            Expr::Member { object, property, optional } => {
                if let Expr::Var(Slot::Global(global)) = object.as_ref() {
                    return Ok(Some(builtins::static_property(*global, property)));
                }
                let Some(target) = self.eval_chain(object)? else {
                    return Ok(None);
                };
                if target.is_nullish() {
                    if *optional {
                        return Ok(None);
                    }
                    return Err(cannot_read(&target, property));
                }
                Ok(Some(read_property(&target, property)))
            }
            Expr::Index { object, index, optional } => {
                let Some(target) = self.eval_chain(object)? else {
                    return Ok(None);
                };
                let key = property_key(&self.eval(index)?);
                if target.is_nullish() {
                    if *optional {
                        return Ok(None);
                    }
                    return Err(cannot_read(&target, &key));
                }
                Ok(Some(read_property(&target, &key)))
            }
            Expr::Call { callee, args } => self.call(callee, args),
            other => self.eval_plain(other).map(Some),
        }
    }

    fn call(&self, callee: &Expr, args: &[Expr]) -> Result<Option<Value>, EvalError> {
        match callee {
            Expr::Member { object, property, optional } => {
                if let Expr::Var(Slot::Global(global)) = object.as_ref() {
                    let argv = self.eval_args(args)?;
                    return builtins::call_static(*global, property, &argv).map(Some);
                }
                let Some(receiver) = self.eval_chain(object)? else {
                    return Ok(None);
                };
                if receiver.is_nullish() {
                    if *optional {
                        return Ok(None);
                    }
                    return Err(cannot_read(&receiver, property));
                }
                if sandbox::is_escape_property(property) {
                    return Err(EvalError::runtime(format!("{property} is not callable")));
                }
                let argv = self.eval_args(args)?;
                builtins::call_method(&receiver, property, &argv).map(Some)
            }
            Expr::Var(Slot::Global(global)) => {
                let argv = self.eval_args(args)?;
                builtins::call_function(*global, &argv).map(Some)
            }
            _ => Err(EvalError::runtime("expression is not callable")),
        }
    }

    fn eval_args(&self, args: &[Expr]) -> Result<Vec<Value>, EvalError> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    fn eval_plain(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(Slot::Param(index)) => Ok(self
                .args
                .get(*index)
                .map(|v| (*v).clone())
                .unwrap_or_default()),
            Expr::Var(Slot::Global(_) | Slot::Shadowed) => Ok(Value::Undefined),
            Expr::Ident(name) => Err(EvalError::runtime(format!("unresolved identifier `{name}`"))),
            Expr::Array(items) => Ok(Value::Array(self.eval_args(items)?)),
            Expr::Object(entries) => {
                let mut map = Scope::with_capacity(entries.len());
                for (key, value) in entries {
                    if sandbox::is_escape_property(key) {
                        continue;
                    }
                    map.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Object(map))
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::String(value.type_name().to_string()),
                })
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                Ok(binary(*op, &lhs, &rhs))
            }
            Expr::Logical { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let short_circuit = match op {
                    LogicalOp::And => !lhs.is_truthy(),
                    LogicalOp::Or => lhs.is_truthy(),
                    LogicalOp::Nullish => !lhs.is_nullish(),
                };
                if short_circuit {
                    Ok(lhs)
                } else {
                    self.eval(rhs)
                }
            }
            Expr::Conditional { test, consequent, alternate } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            chain @ (Expr::Member { .. } | Expr::Index { .. } | Expr::Call { .. }) => self.eval(chain),
        }
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            let textual = |v: &Value| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_));
            if textual(lhs) || textual(rhs) {
                Value::String(lhs.to_display_string() + &rhs.to_display_string())
            } else {
                Value::Number(lhs.to_number() + rhs.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(lhs.to_number() - rhs.to_number()),
        BinaryOp::Mul => Value::Number(lhs.to_number() * rhs.to_number()),
        BinaryOp::Div => Value::Number(lhs.to_number() / rhs.to_number()),
        BinaryOp::Rem => Value::Number(lhs.to_number() % rhs.to_number()),
        BinaryOp::Pow => Value::Number(lhs.to_number().powf(rhs.to_number())),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => Value::Bool(compare(op, lhs, rhs)),
        BinaryOp::Eq => Value::Bool(lhs.loose_eq(rhs)),
        BinaryOp::NotEq => Value::Bool(!lhs.loose_eq(rhs)),
        BinaryOp::StrictEq => Value::Bool(lhs.strict_eq(rhs)),
        BinaryOp::StrictNotEq => Value::Bool(!lhs.strict_eq(rhs)),
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> bool {
    if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
        return match op {
            BinaryOp::Lt => a < b,
            BinaryOp::Le => a <= b,
            BinaryOp::Gt => a > b,
            _ => a >= b,
        };
    }
    let (a, b) = (lhs.to_number(), rhs.to_number());
    // Any comparison involving NaN is false.
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        _ => a >= b,
    }
}

fn read_property(target: &Value, property: &str) -> Value {
    if sandbox::is_escape_property(property) {
        return Value::Undefined;
    }
    target.get(property)
}

fn property_key(key: &Value) -> String {
    match key {
        Value::Number(n) => format_number(*n),
        other => other.to_display_string(),
    }
}

fn cannot_read(target: &Value, property: &str) -> EvalError {
    EvalError::runtime(format!(
        "cannot read properties of {} (reading '{property}')",
        target.to_display_string()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse;
    use serde_json::json;

    fn run(source: &str, scope: serde_json::Value) -> Result<Value, EvalError> {
        let scope = crate::value::scope_from_json(scope);
        let mut names: Vec<String> = scope.keys().cloned().collect();
        names.sort();
        CompiledExpr::new(source, names, parse(source)?).run(&scope)
    }

    #[test]
    fn params_follow_sorted_names() {
        let compiled = CompiledExpr::new("b - a", vec!["a".into(), "b".into()], parse("b - a").unwrap());
        assert_eq!(compiled.params(), ["a", "b"]);
        let scope = crate::value::scope_from_json(json!({"b": 10, "a": 3}));
        assert_eq!(compiled.run(&scope).unwrap(), Value::Number(7.0));
    }

    #[test]
    fn arithmetic_and_concatenation() {
        assert_eq!(run("1 + 2 * 3", json!({})).unwrap(), Value::Number(7.0));
        assert_eq!(run("'n=' + n", json!({"n": 4})).unwrap(), Value::from("n=4"));
        assert_eq!(run("2 ** 10", json!({})).unwrap(), Value::Number(1024.0));
        assert!(run("'a' * 2", json!({})).unwrap().to_number().is_nan());
    }

    #[test]
    fn logical_operators_return_operands() {
        assert_eq!(run("a || 'fallback'", json!({"a": ""})).unwrap(), Value::from("fallback"));
        assert_eq!(run("a ?? 'fallback'", json!({"a": ""})).unwrap(), Value::from(""));
        assert_eq!(run("a && a.b", json!({"a": null})).unwrap(), Value::Null);
    }

    #[test]
    fn optional_chain_short_circuits_whole_chain() {
        assert_eq!(run("user?.profile.name", json!({"user": null})).unwrap(), Value::Undefined);
        assert!(run("user.profile.name", json!({"user": null})).is_err());
        assert_eq!(
            run("user?.name.toUpperCase()", json!({"user": {"name": "ada"}})).unwrap(),
            Value::from("ADA")
        );
    }

    #[test]
    fn unknown_names_read_undefined() {
        assert_eq!(run("missing", json!({})).unwrap(), Value::Undefined);
        assert_eq!(run("typeof missing", json!({})).unwrap(), Value::from("undefined"));
    }

    #[test]
    fn builtins_are_callable() {
        assert_eq!(run("Math.max(a, 3)", json!({"a": 9})).unwrap(), Value::Number(9.0));
        assert_eq!(run("JSON.stringify(o)", json!({"o": {"x": 1}})).unwrap(), Value::from(r#"{"x":1}"#));
        assert_eq!(run("items.length", json!({"items": [1, 2, 3]})).unwrap(), Value::Number(3.0));
        assert!(run("missing()", json!({})).is_err());
    }

    #[test]
    fn escape_properties_are_hidden() {
        assert_eq!(run("o.constructor", json!({"o": {}})).unwrap(), Value::Undefined);
        assert_eq!(run("o['__proto__']", json!({"o": {}})).unwrap(), Value::Undefined);
        assert!(run("s.constructor('x')", json!({"s": "a"})).is_err());
    }
}
