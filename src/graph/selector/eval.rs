//! Tree-walking evaluator.
//!
//! `&&` and `||` are commutative over errors: `false && <error>` is `false`
//! in either order, likewise `true || <error>`. `exists` and `all` follow
//! the same rule across their iterations.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::parser::{BinOp, Expr, Literal, Quantifier, UnaryOp};

/// Runtime value of a selector expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// `null`
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// UTF-8 string.
    String(String),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
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

/// Failure while evaluating a selector against one entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// Map has no such key, or a variable is unbound.
    #[error("no such key: {0}")]
    NoSuchKey(String),
    /// List index out of range.
    #[error("index {index} out of range for list of size {size}")]
    IndexOutOfRange {
        /// Requested index.
        index: i64,
        /// List size.
        size: usize,
    },
    /// Operator or function applied to values it is not defined for.
    #[error("no matching overload for {operation} on {operands}")]
    NoOverload {
        /// Operator or function name.
        operation: String,
        /// Operand type names.
        operands: String,
    },
    /// Pattern computed at runtime is not a valid regular expression.
    #[error("invalid regex {pattern:?}: {message}")]
    InvalidRegex {
        /// The pattern.
        pattern: String,
        /// Parser message.
        message: String,
    },
    /// Integer overflow.
    #[error("integer overflow")]
    Overflow,
}

fn no_overload(operation: &str, operands: &[&Value]) -> EvalError {
    EvalError::NoOverload {
        operation: operation.to_string(),
        operands: operands.iter().map(|v| v.type_name()).collect::<Vec<_>>().join(", "),
    }
}

/// Variable bindings, innermost last.
pub(crate) struct Env<'e> {
    vars: Vec<(&'e str, Value)>,
}

impl<'e> Env<'e> {
    pub(crate) fn new(name: &'e str, value: Value) -> Self {
        Self {
            vars: vec![(name, value)],
        }
    }

    fn lookup(&self, name: &str) -> Result<&Value, EvalError> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| EvalError::NoSuchKey(name.to_string()))
    }
}

fn as_bool(value: Result<Value, EvalError>, operation: &str) -> Result<bool, EvalError> {
    match value? {
        Value::Bool(b) => Ok(b),
        other => Err(no_overload(operation, &[&other])),
    }
}

/// Short-circuit with error absorption. `decisive` is the value that
/// settles the result (`false` for `&&`, `true` for `||`).
fn logical<'e>(
    decisive: bool,
    operation: &str,
    lhs: &'e Expr,
    rhs: &'e Expr,
    env: &mut Env<'e>,
) -> Result<Value, EvalError> {
    let left = as_bool(eval(lhs, env), operation);
    if left == Ok(decisive) {
        return Ok(Value::Bool(decisive));
    }
    let right = as_bool(eval(rhs, env), operation);
    if right == Ok(decisive) {
        return Ok(Value::Bool(decisive));
    }
    left?;
    right?;
    Ok(Value::Bool(!decisive))
}

fn compare(op: BinOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => return Err(no_overload(op.symbol(), &[left, right])),
    };
    Ok(match op {
        BinOp::Lt => ordering == Ordering::Less,
        BinOp::Le => ordering != Ordering::Greater,
        BinOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}

fn size(operation: &str, value: &Value) -> Result<Value, EvalError> {
    let n = match value {
        Value::String(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(map) => map.len(),
        other => return Err(no_overload(operation, &[other])),
    };
    i64::try_from(n).map(Value::Int).map_err(|_| EvalError::Overflow)
}

fn string_method(name: &str, target: &Value, arg: &Value) -> Result<Value, EvalError> {
    let (Value::String(s), Value::String(a)) = (target, arg) else {
        return Err(no_overload(name, &[target, arg]));
    };
    let result = match name {
        "startsWith" => s.starts_with(a.as_str()),
        "endsWith" => s.ends_with(a.as_str()),
        "contains" => s.contains(a.as_str()),
        "matches" => regex_lite::Regex::new(a)
            .map_err(|e| EvalError::InvalidRegex {
                pattern: a.clone(),
                message: e.to_string(),
            })?
            .is_match(s),
        _ => return Err(no_overload(name, &[target, arg])),
    };
    Ok(Value::Bool(result))
}

/// Evaluate `expr` in `env`.
pub(crate) fn eval<'e>(expr: &'e Expr, env: &mut Env<'e>) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(n) => Value::Int(*n),
            Literal::Str(s) => Value::String(s.clone()),
        }),
        Expr::Ident(name) => env.lookup(name).cloned(),
        Expr::List(items) => items.iter().map(|i| eval(i, env)).collect::<Result<Vec<_>, _>>().map(Value::List),
        Expr::Select(operand, field) => match eval(operand, env)? {
            Value::Map(mut map) => map.remove(field).ok_or_else(|| EvalError::NoSuchKey(field.clone())),
            other => Err(no_overload(&format!(".{field}"), &[&other])),
        },
        Expr::Has(operand, field) => match eval(operand, env)? {
            Value::Map(map) => Ok(Value::Bool(map.contains_key(field))),
            other => Err(no_overload("has", &[&other])),
        },
        Expr::Index(operand, index) => {
            let container = eval(operand, env)?;
            let key = eval(index, env)?;
            match (container, key) {
                (Value::Map(mut map), Value::String(k)) => map.remove(&k).ok_or(EvalError::NoSuchKey(k)),
                (Value::List(mut items), Value::Int(i)) => {
                    let size = items.len();
                    match usize::try_from(i) {
                        Ok(at) if at < size => Ok(items.swap_remove(at)),
                        _ => Err(EvalError::IndexOutOfRange { index: i, size }),
                    }
                }
                (container, key) => Err(no_overload("[]", &[&container, &key])),
            }
        }
        Expr::Unary(op, operand) => match (op, eval(operand, env)?) {
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Neg, Value::Int(n)) => n.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
            (UnaryOp::Not, other) => Err(no_overload("!", &[&other])),
            (UnaryOp::Neg, other) => Err(no_overload("-", &[&other])),
        },
        Expr::Binary(BinOp::And, lhs, rhs) => logical(false, "&&", lhs, rhs, env),
        Expr::Binary(BinOp::Or, lhs, rhs) => logical(true, "||", lhs, rhs, env),
        Expr::Binary(op, lhs, rhs) => {
            let left = eval(lhs, env)?;
            let right = eval(rhs, env)?;
            let result = match op {
                BinOp::Eq => left == right,
                BinOp::Ne => left != right,
                BinOp::In => match &right {
                    Value::List(items) => items.contains(&left),
                    Value::Map(map) => match &left {
                        Value::String(key) => map.contains_key(key),
                        _ => return Err(no_overload("in", &[&left, &right])),
                    },
                    _ => return Err(no_overload("in", &[&left, &right])),
                },
                _ => compare(*op, &left, &right)?,
            };
            Ok(Value::Bool(result))
        }
        Expr::Call { name, target, args } => {
            let args = args.iter().map(|a| eval(a, env)).collect::<Result<Vec<_>, _>>()?;
            match (target, args.as_slice()) {
                (None, [value]) => size(name, value),
                (Some(target), []) => size(name, &eval(target, env)?),
                (Some(target), [arg]) => string_method(name, &eval(target, env)?, arg),
                _ => Err(EvalError::NoOverload {
                    operation: name.clone(),
                    operands: format!("{} arguments", args.len()),
                }),
            }
        }
        Expr::Matches(target, regex) => match eval(target, env)? {
            Value::String(s) => Ok(Value::Bool(regex.is_match(&s))),
            other => Err(no_overload("matches", &[&other])),
        },
        Expr::Comprehension {
            quantifier,
            range,
            var,
            predicate,
        } => {
            let items = match eval(range, env)? {
                Value::List(items) => items,
                Value::Map(map) => map.into_keys().map(Value::String).collect(),
                other => return Err(no_overload(&format!("{quantifier:?}"), &[&other])),
            };
            let decisive = *quantifier == Quantifier::Exists;
            let mut first_error = None;
            for item in items {
                env.vars.push((var.as_str(), item));
                let outcome = as_bool(eval(predicate, env), "predicate");
                env.vars.pop();
                match outcome {
                    Ok(b) if b == decisive => return Ok(Value::Bool(decisive)),
                    Ok(_) => {}
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
            match first_error {
                Some(e) => Err(e),
                None => Ok(Value::Bool(!decisive)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::selector::check::{Checker, ENTRY};
    use crate::graph::selector::parser::Parser;

    fn run(text: &str, entry: Value) -> Result<Value, EvalError> {
        let expr = Checker::new().check_program(Parser::new(text).unwrap().parse().unwrap()).unwrap();
        let mut env = Env::new(ENTRY, entry);
        eval(&expr, &mut env)
    }

    fn entry() -> Value {
        let tags = BTreeMap::from([
            ("channel".to_string(), Value::List(vec!["alpha".into(), "stable".into()])),
            ("pattern".to_string(), Value::List(vec!["(".into()])),
        ]);
        let node = BTreeMap::from([
            ("name".to_string(), Value::from("etcd")),
            ("version".to_string(), Value::from("0.9.2")),
            ("release".to_string(), Value::Int(1)),
        ]);
        Value::Map(BTreeMap::from([
            ("kind".to_string(), Value::from("node")),
            ("tags".to_string(), Value::Map(tags)),
            ("node".to_string(), Value::Map(node)),
        ]))
    }

    #[test]
    fn test_basic_predicates() {
        for text in [
            "entry.kind == 'node'",
            "'stable' in entry.tags.channel",
            "entry.tags['channel'][0] == 'alpha'",
            "entry.node.release > 0 && entry.node.release <= 1",
            "entry.node.name.startsWith('et') && entry.node.name.endsWith('cd')",
            "entry.node.version.matches('^0\\\\.9')",
            "size(entry.tags.channel) == 2 && entry.tags.channel.size() == 2",
            "entry.tags.channel.exists(c, c == 'stable')",
            "entry.tags.channel.all(c, c.contains('a'))",
            "has(entry.node) && !has(entry.edge)",
            "-entry.node.release == -1",
        ] {
            assert_eq!(run(text, entry()), Ok(Value::Bool(true)), "{text}");
        }
    }

    #[test]
    fn test_errors_are_absorbed_by_logical_operators() {
        assert_eq!(run("entry.edge.from.name == 'x' && false", entry()), Ok(Value::Bool(false)));
        assert_eq!(run("false && entry.edge.from.name == 'x'", entry()), Ok(Value::Bool(false)));
        assert_eq!(run("entry.edge.from.name == 'x' || true", entry()), Ok(Value::Bool(true)));
        assert_eq!(
            run("entry.edge.from.name == 'x' || false", entry()),
            Err(EvalError::NoSuchKey("edge".to_string()))
        );
    }

    #[test]
    fn test_runtime_errors() {
        assert_eq!(
            run("entry.tags.channel[5] == 'x'", entry()),
            Err(EvalError::IndexOutOfRange { index: 5, size: 2 })
        );
        assert_eq!(run("entry.tags.bundle == []", entry()), Err(EvalError::NoSuchKey("bundle".to_string())));
        assert!(matches!(
            run("entry.node.name.matches(entry.tags.pattern[0])", entry()),
            Err(EvalError::InvalidRegex { pattern, .. }) if pattern == "("
        ));
    }

    #[test]
    fn test_quantifier_error_absorption() {
        assert_eq!(run("[0, 1].exists(x, entry.tags.missing == [] || x == 1)", entry()), Ok(Value::Bool(true)));
        assert_eq!(
            run("[0, 1].all(x, entry.tags.missing == [] || x == 1)", entry()),
            Err(EvalError::NoSuchKey("missing".to_string()))
        );
        assert_eq!(run("[0, 1].all(x, entry.tags.missing == [] && x == 1)", entry()), Ok(Value::Bool(false)));
    }
}
