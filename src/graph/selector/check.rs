//! Static checks run at compile time.
//!
//! Resolves identifiers, function names and arities, infers a type for
//! every subexpression and rejects programs whose result is not boolean.
//! Regular expressions given as string literals are compiled here.

use std::fmt;

use super::parser::{BinOp, Expr, Literal, UnaryOp};
use super::CompileError;

/// Name of the input variable.
pub(crate) const ENTRY: &str = "entry";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Type {
    Dyn,
    Null,
    Bool,
    Int,
    String,
    List(Box<Type>),
    Map(Box<Type>),
    Entry,
    NodeInfo,
    EdgeInfo,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Dyn => f.write_str("dyn"),
            Type::Null => f.write_str("null"),
            Type::Bool => f.write_str("bool"),
            Type::Int => f.write_str("int"),
            Type::String => f.write_str("string"),
            Type::List(elem) => write!(f, "list({elem})"),
            Type::Map(value) => write!(f, "map(string, {value})"),
            Type::Entry => f.write_str("entry"),
            Type::NodeInfo => f.write_str("node"),
            Type::EdgeInfo => f.write_str("edge"),
        }
    }
}

impl Type {
    fn is(&self, want: &Type) -> bool {
        self == want || *self == Type::Dyn
    }

    fn is_object(&self) -> bool {
        matches!(self, Type::Entry | Type::NodeInfo | Type::EdgeInfo | Type::Map(_))
    }
}

/// Whether values of `a` and `b` can be compared for equality.
fn compatible(a: &Type, b: &Type) -> bool {
    match (a, b) {
        (Type::Dyn, _) | (_, Type::Dyn) | (Type::Null, _) | (_, Type::Null) => true,
        (Type::List(x), Type::List(y)) | (Type::Map(x), Type::Map(y)) => compatible(x, y),
        (Type::Entry | Type::NodeInfo | Type::EdgeInfo, Type::Map(_))
        | (Type::Map(_), Type::Entry | Type::NodeInfo | Type::EdgeInfo) => true,
        (x, y) => x == y,
    }
}

fn field_type(parent: &Type, field: &str) -> Result<Type, CompileError> {
    let undeclared = |scope: &str| CompileError::UndeclaredReference(format!("{scope}.{field}"));
    match parent {
        Type::Entry => match field {
            "kind" => Ok(Type::String),
            "tags" => Ok(Type::Map(Box::new(Type::List(Box::new(Type::String))))),
            "node" => Ok(Type::NodeInfo),
            "edge" => Ok(Type::EdgeInfo),
            _ => Err(undeclared(ENTRY)),
        },
        Type::NodeInfo => match field {
            "name" | "version" | "reference" | "digest" => Ok(Type::String),
            "release" => Ok(Type::Int),
            _ => Err(undeclared("node")),
        },
        Type::EdgeInfo => match field {
            "from" | "to" => Ok(Type::NodeInfo),
            "digest" => Ok(Type::String),
            _ => Err(undeclared("edge")),
        },
        Type::Map(value) => Ok((**value).clone()),
        Type::Dyn => Ok(Type::Dyn),
        other => Err(CompileError::Type(format!("cannot select `{field}` from {other}"))),
    }
}

fn arity(function: &str, expected: usize, args: &[Expr]) -> Result<(), CompileError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(CompileError::WrongArity {
            function: function.to_string(),
            expected,
            found: args.len(),
        })
    }
}

fn sized(function: &str, ty: &Type) -> Result<Type, CompileError> {
    match ty {
        Type::String | Type::List(_) | Type::Map(_) | Type::Dyn => Ok(Type::Int),
        other => Err(CompileError::Type(format!("{function}() is not defined on {other}"))),
    }
}

pub(crate) struct Checker {
    scopes: Vec<(String, Type)>,
}

impl Checker {
    pub(crate) fn new() -> Self {
        Self {
            scopes: vec![(ENTRY.to_string(), Type::Entry)],
        }
    }

    /// Check a whole program; the result must be boolean.
    pub(crate) fn check_program(mut self, expr: Expr) -> Result<Expr, CompileError> {
        let (expr, ty) = self.check(expr)?;
        if !ty.is(&Type::Bool) {
            return Err(CompileError::NotBoolean { found: ty.to_string() });
        }
        Ok(expr)
    }

    fn lookup(&self, name: &str) -> Option<&Type> {
        self.scopes.iter().rev().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    fn check(&mut self, expr: Expr) -> Result<(Expr, Type), CompileError> {
        match expr {
            Expr::Literal(lit) => {
                let ty = match &lit {
                    Literal::Null => Type::Null,
                    Literal::Bool(_) => Type::Bool,
                    Literal::Int(_) => Type::Int,
                    Literal::Str(_) => Type::String,
                };
                Ok((Expr::Literal(lit), ty))
            }
            Expr::Ident(name) => {
                let ty = self
                    .lookup(&name)
                    .cloned()
                    .ok_or_else(|| CompileError::UndeclaredReference(name.clone()))?;
                Ok((Expr::Ident(name), ty))
            }
            Expr::List(items) => {
                let mut checked = Vec::with_capacity(items.len());
                let mut elem: Option<Type> = None;
                for item in items {
                    let (item, ty) = self.check(item)?;
                    elem = match elem {
                        None => Some(ty),
                        Some(prev) if prev == ty => Some(prev),
                        Some(_) => Some(Type::Dyn),
                    };
                    checked.push(item);
                }
                Ok((Expr::List(checked), Type::List(Box::new(elem.unwrap_or(Type::Dyn)))))
            }
            Expr::Select(operand, field) => {
                let (operand, parent) = self.check(*operand)?;
                let ty = field_type(&parent, &field)?;
                Ok((Expr::Select(Box::new(operand), field), ty))
            }
            Expr::Has(operand, field) => {
                let (operand, parent) = self.check(*operand)?;
                if !parent.is_object() && parent != Type::Dyn {
                    return Err(CompileError::Type(format!("has() cannot test fields of {parent}")));
                }
                field_type(&parent, &field)?;
                Ok((Expr::Has(Box::new(operand), field), Type::Bool))
            }
            Expr::Index(operand, index) => {
                let (operand, container) = self.check(*operand)?;
                let (index, key) = self.check(*index)?;
                let ty = match (&container, &key) {
                    (Type::Map(value), k) if k.is(&Type::String) => (**value).clone(),
                    (Type::List(elem), k) if k.is(&Type::Int) => (**elem).clone(),
                    (Type::Dyn, _) => Type::Dyn,
                    (c, k) => return Err(CompileError::Type(format!("cannot index {c} with {k}"))),
                };
                Ok((Expr::Index(Box::new(operand), Box::new(index)), ty))
            }
            Expr::Unary(op, operand) => {
                let (operand, ty) = self.check(*operand)?;
                let want = match op {
                    UnaryOp::Not => Type::Bool,
                    UnaryOp::Neg => Type::Int,
                };
                if !ty.is(&want) {
                    return Err(CompileError::Type(format!("operand of {op:?} must be {want}, found {ty}")));
                }
                Ok((Expr::Unary(op, Box::new(operand)), want))
            }
            Expr::Binary(op, lhs, rhs) => {
                let (lhs, l) = self.check(*lhs)?;
                let (rhs, r) = self.check(*rhs)?;
                self.check_binary(op, &l, &r)?;
                Ok((Expr::Binary(op, Box::new(lhs), Box::new(rhs)), Type::Bool))
            }
            Expr::Call { name, target, args } => self.check_call(name, target, args),
            Expr::Comprehension {
                quantifier,
                range,
                var,
                predicate,
            } => {
                let (range, range_ty) = self.check(*range)?;
                let var_ty = match &range_ty {
                    Type::List(elem) => (**elem).clone(),
                    Type::Map(_) => Type::String,
                    Type::Dyn => Type::Dyn,
                    other => return Err(CompileError::Type(format!("cannot iterate over {other}"))),
                };
                self.scopes.push((var.clone(), var_ty));
                let checked = self.check(*predicate);
                self.scopes.pop();
                let (predicate, pred_ty) = checked?;
                if !pred_ty.is(&Type::Bool) {
                    return Err(CompileError::NotBoolean {
                        found: pred_ty.to_string(),
                    });
                }
                Ok((
                    Expr::Comprehension {
                        quantifier,
                        range: Box::new(range),
                        var,
                        predicate: Box::new(predicate),
                    },
                    Type::Bool,
                ))
            }
            Expr::Matches(target, regex) => {
                let (target, _) = self.check(*target)?;
                Ok((Expr::Matches(Box::new(target), regex), Type::Bool))
            }
        }
    }

    fn check_binary(&self, op: BinOp, l: &Type, r: &Type) -> Result<(), CompileError> {
        let mismatch = || CompileError::Type(format!("no overload for {l} {} {r}", op.symbol()));
        match op {
            BinOp::And | BinOp::Or => {
                if l.is(&Type::Bool) && r.is(&Type::Bool) {
                    Ok(())
                } else {
                    Err(mismatch())
                }
            }
            BinOp::Eq | BinOp::Ne => {
                if compatible(l, r) {
                    Ok(())
                } else {
                    Err(mismatch())
                }
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => match (l, r) {
                (Type::Dyn, Type::Int | Type::String | Type::Bool | Type::Dyn)
                | (Type::Int | Type::String | Type::Bool, Type::Dyn) => Ok(()),
                (Type::Int, Type::Int) | (Type::String, Type::String) | (Type::Bool, Type::Bool) => Ok(()),
                _ => Err(mismatch()),
            },
            BinOp::In => match r {
                Type::List(elem) if compatible(l, elem) => Ok(()),
                Type::Map(_) if l.is(&Type::String) => Ok(()),
                Type::Dyn => Ok(()),
                _ => Err(mismatch()),
            },
        }
    }

    fn check_call(
        &mut self,
        name: String,
        target: Option<Box<Expr>>,
        args: Vec<Expr>,
    ) -> Result<(Expr, Type), CompileError> {
        let mut checked_args = Vec::with_capacity(args.len());
        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args {
            let (arg, ty) = self.check(arg)?;
            checked_args.push(arg);
            arg_types.push(ty);
        }

        let Some(target) = target else {
            return match name.as_str() {
                "size" => {
                    arity(&name, 1, &checked_args)?;
                    let ty = sized(&name, &arg_types[0])?;
                    Ok((
                        Expr::Call {
                            name,
                            target: None,
                            args: checked_args,
                        },
                        ty,
                    ))
                }
                _ => Err(CompileError::UnknownFunction(name)),
            };
        };

        let (target, target_ty) = self.check(*target)?;
        let ty = match name.as_str() {
            "size" => {
                arity(&name, 0, &checked_args)?;
                sized(&name, &target_ty)?
            }
            "startsWith" | "endsWith" | "contains" | "matches" => {
                arity(&name, 1, &checked_args)?;
                if !target_ty.is(&Type::String) || !arg_types[0].is(&Type::String) {
                    return Err(CompileError::Type(format!(
                        "{name}() takes a string receiver and argument, found {target_ty} and {}",
                        arg_types[0]
                    )));
                }
                Type::Bool
            }
            _ => return Err(CompileError::UnknownFunction(name)),
        };

        if name == "matches" {
            if let [Expr::Literal(Literal::Str(pattern))] = checked_args.as_slice() {
                let regex = regex_lite::Regex::new(pattern).map_err(|e| CompileError::InvalidRegex {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
                return Ok((Expr::Matches(Box::new(target), regex), ty));
            }
        }

        Ok((
            Expr::Call {
                name,
                target: Some(Box::new(target)),
                args: checked_args,
            },
            ty,
        ))
    }
}
