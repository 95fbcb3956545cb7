#![forbid(unsafe_code)]

//! Normalization of symbolic expressions into linear forms.
//!
//! A `LinExpr` is `sum(coeff_i * var_i) + constant` over exact rationals.
//! Anything outside the linear fragment (products of variables, division by
//! a variable, modulo, opaque leaves, non-numeric nodes) is rejected with a
//! reason; the caller degrades to `Unknown`.

use std::collections::BTreeMap;

use num_rational::BigRational;
use num_traits::Zero;
use strata_sym::{BinOp, ExprArena, ExprId, SymbolicExpr, UnaryOp, Value};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unsupported(pub String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinExpr {
    /// Variable coefficients; zero coefficients are never stored.
    pub coeffs: BTreeMap<String, BigRational>,
    pub constant: BigRational,
}

impl LinExpr {
    pub fn constant(c: BigRational) -> Self {
        Self {
            coeffs: BTreeMap::new(),
            constant: c,
        }
    }

    pub fn variable(name: &str) -> Self {
        let mut coeffs = BTreeMap::new();
        coeffs.insert(name.to_string(), BigRational::from_integer(1.into()));
        Self {
            coeffs,
            constant: BigRational::zero(),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn add(&self, other: &LinExpr) -> LinExpr {
        let mut coeffs = self.coeffs.clone();
        for (var, c) in &other.coeffs {
            let entry = coeffs
                .entry(var.clone())
                .or_insert_with(BigRational::zero);
            *entry += c;
        }
        coeffs.retain(|_, c| !c.is_zero());
        LinExpr {
            coeffs,
            constant: &self.constant + &other.constant,
        }
    }

    pub fn sub(&self, other: &LinExpr) -> LinExpr {
        self.add(&other.neg())
    }

    pub fn neg(&self) -> LinExpr {
        LinExpr {
            coeffs: self.coeffs.iter().map(|(v, c)| (v.clone(), -c)).collect(),
            constant: -&self.constant,
        }
    }

    pub fn scale(&self, factor: &BigRational) -> LinExpr {
        if factor.is_zero() {
            return LinExpr::constant(BigRational::zero());
        }
        LinExpr {
            coeffs: self
                .coeffs
                .iter()
                .map(|(v, c)| (v.clone(), c * factor))
                .collect(),
            constant: &self.constant * factor,
        }
    }

    /// Evaluate under a complete assignment for the mentioned variables.
    pub fn eval(&self, assignment: &BTreeMap<String, BigRational>) -> Option<BigRational> {
        let mut acc = self.constant.clone();
        for (var, c) in &self.coeffs {
            acc += c * assignment.get(var)?;
        }
        Some(acc)
    }
}

/// Convert a conditional-free numeric expression into linear form.
pub fn linearize(arena: &ExprArena, id: ExprId) -> Result<LinExpr, Unsupported> {
    match arena.get(id) {
        SymbolicExpr::Literal(Value::Int(n)) => {
            Ok(LinExpr::constant(BigRational::from_integer(n.clone())))
        }
        SymbolicExpr::Literal(Value::Rat(r)) => Ok(LinExpr::constant(r.clone())),
        SymbolicExpr::Literal(v) => Err(Unsupported(format!(
            "non-numeric literal {}",
            v.display()
        ))),
        SymbolicExpr::Variable(name) => Ok(LinExpr::variable(name)),
        SymbolicExpr::UnaryOp(UnaryOp::Neg, a) => Ok(linearize(arena, *a)?.neg()),
        SymbolicExpr::UnaryOp(UnaryOp::Not, _) => {
            Err(Unsupported("boolean operator in numeric position".to_string()))
        }
        SymbolicExpr::BinaryOp(op, a, b) => {
            let op = *op;
            match op {
                BinOp::Add => Ok(linearize(arena, *a)?.add(&linearize(arena, *b)?)),
                BinOp::Sub => Ok(linearize(arena, *a)?.sub(&linearize(arena, *b)?)),
                BinOp::Mul => {
                    let l = linearize(arena, *a)?;
                    let r = linearize(arena, *b)?;
                    if l.is_constant() {
                        Ok(r.scale(&l.constant))
                    } else if r.is_constant() {
                        Ok(l.scale(&r.constant))
                    } else {
                        Err(Unsupported("nonlinear product of variables".to_string()))
                    }
                }
                BinOp::Div => {
                    let l = linearize(arena, *a)?;
                    let r = linearize(arena, *b)?;
                    if !r.is_constant() {
                        Err(Unsupported("division by a variable".to_string()))
                    } else if r.constant.is_zero() {
                        Err(Unsupported("division by zero".to_string()))
                    } else {
                        Ok(l.scale(&r.constant.recip()))
                    }
                }
                BinOp::Mod => Err(Unsupported("modulo is outside the linear theory".to_string())),
                _ => Err(Unsupported(format!(
                    "boolean operator `{}` in numeric position",
                    op.display()
                ))),
            }
        }
        SymbolicExpr::Conditional(..) => Err(Unsupported(
            "conditional must be path-split before linearization".to_string(),
        )),
        SymbolicExpr::FieldAccess(..) | SymbolicExpr::Construct(..) => {
            Err(Unsupported("record value in numeric position".to_string()))
        }
        SymbolicExpr::Call(callee, _) => {
            Err(Unsupported(format!("unexpanded call to `{callee}`")))
        }
        SymbolicExpr::Opaque(reason) => Err(Unsupported(reason.display())),
    }
}
