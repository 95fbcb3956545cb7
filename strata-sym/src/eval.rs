#![forbid(unsafe_code)]

//! Concrete evaluation of symbolic graphs.
//!
//! Used by the verifier to confirm counterexample witnesses against the
//! original constraint, and by tests to exercise the round-trip law on
//! derived inverses. Division is exact: integer division producing a
//! non-integer yields a rational, never a truncated integer.

use std::collections::BTreeMap;

use num_rational::BigRational;
use num_traits::Zero;
use thiserror::Error;

use crate::expr::{BinOp, ExprArena, ExprId, SymbolicExpr, UnaryOp, Value};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("unbound variable `{0}`")]
    UnboundVariable(String),
    #[error("cannot evaluate opaque node: {0}")]
    Opaque(String),
    #[error("call to `{0}` has no concrete implementation here")]
    UnevaluatedCall(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("record `{0}` has no field `{1}`")]
    MissingField(String, String),
}

pub fn eval(
    arena: &ExprArena,
    id: ExprId,
    bindings: &BTreeMap<String, Value>,
) -> Result<Value, EvalError> {
    match arena.get(id) {
        SymbolicExpr::Literal(v) => Ok(v.clone()),
        SymbolicExpr::Variable(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnboundVariable(name.clone())),
        SymbolicExpr::UnaryOp(op, a) => {
            let v = eval(arena, *a, bindings)?;
            apply_unary(*op, v)
        }
        SymbolicExpr::BinaryOp(op, a, b) => {
            let l = eval(arena, *a, bindings)?;
            let r = eval(arena, *b, bindings)?;
            apply_binary(*op, l, r)
        }
        SymbolicExpr::Conditional(c, t, e) => {
            let cond = eval(arena, *c, bindings)?;
            match cond {
                Value::Bool(true) => eval(arena, *t, bindings),
                Value::Bool(false) => eval(arena, *e, bindings),
                other => Err(EvalError::TypeMismatch(format!(
                    "conditional on non-boolean {}",
                    other.display()
                ))),
            }
        }
        SymbolicExpr::FieldAccess(base, field) => {
            let v = eval(arena, *base, bindings)?;
            match v {
                Value::Record(name, fields) => fields
                    .iter()
                    .find(|(f, _)| f == field)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| EvalError::MissingField(name, field.clone())),
                other => Err(EvalError::TypeMismatch(format!(
                    "field access on non-record {}",
                    other.display()
                ))),
            }
        }
        SymbolicExpr::Construct(ty, fields) => {
            let mut out = Vec::with_capacity(fields.len());
            for (f, v) in fields {
                out.push((f.clone(), eval(arena, *v, bindings)?));
            }
            Ok(Value::Record(ty.clone(), out))
        }
        SymbolicExpr::Call(callee, _) => Err(EvalError::UnevaluatedCall(callee.clone())),
        SymbolicExpr::Opaque(reason) => Err(EvalError::Opaque(reason.display())),
    }
}

fn apply_unary(op: UnaryOp, v: Value) -> Result<Value, EvalError> {
    match (op, v) {
        (UnaryOp::Neg, Value::Int(n)) => Ok(Value::Int(-n)),
        (UnaryOp::Neg, Value::Rat(r)) => Ok(Value::Rat(-r)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (op, v) => Err(EvalError::TypeMismatch(format!(
            "{op:?} applied to {}",
            v.display()
        ))),
    }
}

fn apply_binary(op: BinOp, l: Value, r: Value) -> Result<Value, EvalError> {
    match op {
        BinOp::And | BinOp::Or => {
            let (Value::Bool(a), Value::Bool(b)) = (&l, &r) else {
                return Err(EvalError::TypeMismatch(format!(
                    "{op:?} applied to {} and {}",
                    l.display(),
                    r.display()
                )));
            };
            Ok(Value::Bool(if op == BinOp::And { *a && *b } else { *a || *b }))
        }
        BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let (a, b) = (as_rational(&l)?, as_rational(&r)?);
            Ok(Value::Bool(match op {
                BinOp::Lt => a < b,
                BinOp::Gt => a > b,
                BinOp::Le => a <= b,
                _ => a >= b,
            }))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul => {
            if let (Value::Int(a), Value::Int(b)) = (&l, &r) {
                return Ok(Value::Int(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    _ => a * b,
                }));
            }
            let (a, b) = (as_rational(&l)?, as_rational(&r)?);
            Ok(Value::Rat(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                _ => a * b,
            })
            .normalized())
        }
        BinOp::Div => {
            let (a, b) = (as_rational(&l)?, as_rational(&r)?);
            if b.is_zero() {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Rat(a / b).normalized())
        }
        BinOp::Mod => {
            let (Value::Int(a), Value::Int(b)) = (&l, &r) else {
                return Err(EvalError::TypeMismatch(format!(
                    "% applied to {} and {}",
                    l.display(),
                    r.display()
                )));
            };
            if b.is_zero() {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Int(a % b))
        }
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (as_rational(l), as_rational(r)) {
        (Ok(a), Ok(b)) => a == b,
        _ => l == r,
    }
}

fn as_rational(v: &Value) -> Result<BigRational, EvalError> {
    match v {
        Value::Int(n) => Ok(BigRational::from_integer(n.clone())),
        Value::Rat(r) => Ok(r.clone()),
        other => Err(EvalError::TypeMismatch(format!(
            "expected a number, found {}",
            other.display()
        ))),
    }
}
