#![forbid(unsafe_code)]

//! Structural inversion of symbolic function bodies.
//!
//! Inversion is syntactic mirroring, not search: starting at the root of the
//! body (the forward output), each node is replaced by its algebraic inverse
//! applied in reverse order, walking toward the target parameter. A node
//! whose forward operator has no registered inverse fails right there, with
//! the node and a human-readable reason. Identical graphs always produce
//! identical results.

use std::collections::BTreeMap;

use num_traits::Zero;
use strata_ast::{Program, ReversibilityTag, Type, RESULT_VAR};
use strata_sym::{
    BinOp, ExprArena, ExprId, FunctionSymbolicModel, OpaqueReason, SymbolicExpr, UnaryOp, Value,
};

use crate::oracle::DisjointnessOracle;

/// Field order per record type, in declaration order. The solver needs it to
/// recognize bijective record-to-record mappings.
#[derive(Clone, Debug, Default)]
pub struct RecordTable {
    fields: BTreeMap<String, Vec<String>>,
}

impl RecordTable {
    pub fn from_program(program: &Program) -> Self {
        let fields = program
            .records
            .iter()
            .map(|r| {
                (
                    r.name.node.clone(),
                    r.fields.iter().map(|f| f.name.node.clone()).collect(),
                )
            })
            .collect();
        Self { fields }
    }

    pub fn fields_of(&self, record: &str) -> Option<&[String]> {
        self.fields.get(record).map(|v| v.as_slice())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NonInvertibleReason {
    NotTaggedReversible,
    TaggedLossy,
    Opaque(OpaqueReason),
    /// The forward operator has no registered inverse.
    NoInverseRule(String),
    /// Both operands of a binary node depend on the target.
    NonInjective(String),
    /// The body never mentions the target parameter.
    TargetNotReferenced(String),
    BranchesNotDisjoint,
    /// A projection drops sibling fields of the target record.
    ProjectionDiscardsFields(String),
    /// A multi-field construction is not a bijective re-mapping of the
    /// target record's fields.
    FieldMappingNotBijective(String),
    UnknownRecordType(String),
}

impl NonInvertibleReason {
    pub fn display(&self) -> String {
        match self {
            NonInvertibleReason::NotTaggedReversible => {
                "function is not tagged reversible".to_string()
            }
            NonInvertibleReason::TaggedLossy => "function is tagged lossy".to_string(),
            NonInvertibleReason::Opaque(r) => {
                format!("value cannot be reasoned about: {}", r.display())
            }
            NonInvertibleReason::NoInverseRule(what) => what.clone(),
            NonInvertibleReason::NonInjective(what) => what.clone(),
            NonInvertibleReason::TargetNotReferenced(target) => {
                format!("body does not depend on parameter `{target}`")
            }
            NonInvertibleReason::BranchesNotDisjoint => {
                "branches not provably disjoint".to_string()
            }
            NonInvertibleReason::ProjectionDiscardsFields(record) => {
                format!("projection discards sibling fields of `{record}`")
            }
            NonInvertibleReason::FieldMappingNotBijective(record) => {
                format!("construction is not a bijective re-mapping of `{record}`")
            }
            NonInvertibleReason::UnknownRecordType(record) => {
                format!("record type `{record}` is not declared")
            }
        }
    }
}

/// The derived inverse: a fresh graph over the forward result (bound to the
/// `result` variable) and the non-target parameters, which stay free in the
/// closure.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct InverseModel {
    pub function: String,
    pub target_param: String,
    pub free_params: Vec<String>,
    pub arena: ExprArena,
    pub body: ExprId,
}

#[derive(Clone, Debug)]
pub enum InversionResult {
    Invertible(InverseModel),
    NotInvertible {
        node: ExprId,
        reason: NonInvertibleReason,
    },
}

impl InversionResult {
    pub fn is_invertible(&self) -> bool {
        matches!(self, InversionResult::Invertible(_))
    }
}

/// Invert with respect to the first parameter.
pub fn invert(
    model: &FunctionSymbolicModel,
    records: &RecordTable,
    oracle: &mut dyn DisjointnessOracle,
) -> InversionResult {
    match model.params.first() {
        Some(p) => {
            let target = p.name.clone();
            invert_for(model, &target, records, oracle)
        }
        None => InversionResult::NotInvertible {
            node: model.body,
            reason: NonInvertibleReason::TargetNotReferenced("<none>".to_string()),
        },
    }
}

/// Invert with respect to a designated target parameter; all other
/// parameters are held as free symbols in the inverse's closure.
pub fn invert_for(
    model: &FunctionSymbolicModel,
    target: &str,
    records: &RecordTable,
    oracle: &mut dyn DisjointnessOracle,
) -> InversionResult {
    match model.tag {
        ReversibilityTag::Reversible => {}
        ReversibilityTag::Lossy => {
            return InversionResult::NotInvertible {
                node: model.body,
                reason: NonInvertibleReason::TaggedLossy,
            };
        }
        ReversibilityTag::Unmarked => {
            return InversionResult::NotInvertible {
                node: model.body,
                reason: NonInvertibleReason::NotTaggedReversible,
            };
        }
    }

    if !model.arena.references(model.body, target) {
        return InversionResult::NotInvertible {
            node: model.body,
            reason: NonInvertibleReason::TargetNotReferenced(target.to_string()),
        };
    }

    let mut solver = Solver {
        model,
        target,
        records,
        oracle,
        inverse: ExprArena::new(),
    };
    let out = solver.inverse.variable(RESULT_VAR);
    match solver.solve(model.body, out) {
        Ok(body) => InversionResult::Invertible(InverseModel {
            function: model.name.clone(),
            target_param: target.to_string(),
            free_params: model
                .params
                .iter()
                .filter(|p| p.name != target)
                .map(|p| p.name.clone())
                .collect(),
            arena: solver.inverse,
            body,
        }),
        Err((node, reason)) => InversionResult::NotInvertible { node, reason },
    }
}

type Failure = (ExprId, NonInvertibleReason);

struct Solver<'a> {
    model: &'a FunctionSymbolicModel,
    target: &'a str,
    records: &'a RecordTable,
    oracle: &'a mut dyn DisjointnessOracle,
    inverse: ExprArena,
}

impl<'a> Solver<'a> {
    /// Solve `forward-expr(target, frees) == out` for the target, where
    /// `out` already lives in the inverse arena.
    fn solve(&mut self, id: ExprId, out: ExprId) -> Result<ExprId, Failure> {
        let arena = &self.model.arena;
        match arena.get(id).clone() {
            SymbolicExpr::Variable(name) if name == self.target => Ok(out),
            SymbolicExpr::Variable(_) | SymbolicExpr::Literal(_) => Err((
                id,
                NonInvertibleReason::TargetNotReferenced(self.target.to_string()),
            )),
            SymbolicExpr::Opaque(reason) => Err((id, NonInvertibleReason::Opaque(reason))),
            SymbolicExpr::UnaryOp(UnaryOp::Neg, a) => {
                let negated = self.inverse.unary(UnaryOp::Neg, out);
                self.solve(a, negated)
            }
            SymbolicExpr::UnaryOp(UnaryOp::Not, a) => {
                let flipped = self.inverse.unary(UnaryOp::Not, out);
                self.solve(a, flipped)
            }
            SymbolicExpr::BinaryOp(op, a, b) => self.solve_binary(id, op, a, b, out),
            SymbolicExpr::Conditional(c, t, e) => self.solve_conditional(id, c, t, e, out),
            SymbolicExpr::Construct(ty, fields) => self.solve_construct(id, &ty, &fields, out),
            SymbolicExpr::FieldAccess(base, field) => {
                self.solve_projection(id, base, &field, out)
            }
            SymbolicExpr::Call(callee, _) => Err((
                id,
                NonInvertibleReason::NoInverseRule(call_inverse_failure(&callee)),
            )),
        }
    }

    fn solve_binary(
        &mut self,
        id: ExprId,
        op: BinOp,
        a: ExprId,
        b: ExprId,
        out: ExprId,
    ) -> Result<ExprId, Failure> {
        let in_a = self.model.arena.references(a, self.target);
        let in_b = self.model.arena.references(b, self.target);
        if in_a && in_b {
            return Err((
                id,
                NonInvertibleReason::NonInjective(format!(
                    "both operands of `{}` depend on `{}`",
                    op.display(),
                    self.target
                )),
            ));
        }
        debug_assert!(in_a || in_b, "solve is only called on target-bearing nodes");

        match op {
            BinOp::Add => {
                let other = self.carry_free(id, if in_a { b } else { a })?;
                let rest = self.inverse.binary(BinOp::Sub, out, other);
                self.solve(if in_a { a } else { b }, rest)
            }
            BinOp::Sub => {
                if in_a {
                    // a - b = out  =>  a = out + b
                    let other = self.carry_free(id, b)?;
                    let rest = self.inverse.binary(BinOp::Add, out, other);
                    self.solve(a, rest)
                } else {
                    // a - b = out  =>  b = a - out
                    let other = self.carry_free(id, a)?;
                    let rest = self.inverse.binary(BinOp::Sub, other, out);
                    self.solve(b, rest)
                }
            }
            BinOp::Mul => {
                let other_id = if in_a { b } else { a };
                if is_literal_zero(&self.model.arena, other_id) {
                    return Err((
                        id,
                        NonInvertibleReason::NoInverseRule(
                            "multiplication by zero discards the input".to_string(),
                        ),
                    ));
                }
                let other = self.carry_free(id, other_id)?;
                let rest = self.inverse.binary(BinOp::Div, out, other);
                self.solve(if in_a { a } else { b }, rest)
            }
            BinOp::Div => {
                if in_a {
                    // a / b = out  =>  a = out * b
                    let other = self.carry_free(id, b)?;
                    let rest = self.inverse.binary(BinOp::Mul, out, other);
                    self.solve(a, rest)
                } else {
                    // a / b = out  =>  b = a / out
                    let other = self.carry_free(id, a)?;
                    let rest = self.inverse.binary(BinOp::Div, other, out);
                    self.solve(b, rest)
                }
            }
            BinOp::Mod => Err((
                id,
                NonInvertibleReason::NoInverseRule("modulo discards information".to_string()),
            )),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => Err((
                id,
                NonInvertibleReason::NoInverseRule(format!(
                    "comparison `{}` collapses a wider domain to a boolean",
                    op.display()
                )),
            )),
            BinOp::And | BinOp::Or => Err((
                id,
                NonInvertibleReason::NoInverseRule(format!(
                    "boolean `{}` is not injective in either operand",
                    op.display()
                )),
            )),
        }
    }

    fn solve_conditional(
        &mut self,
        id: ExprId,
        c: ExprId,
        t: ExprId,
        e: ExprId,
        out: ExprId,
    ) -> Result<ExprId, Failure> {
        if !self.oracle.provably_disjoint(&self.model.arena, c, t, e) {
            return Err((id, NonInvertibleReason::BranchesNotDisjoint));
        }
        let then_inv = self.solve(t, out)?;
        let else_inv = self.solve(e, out)?;

        // Re-derive which branch produced the output: apply the then-branch
        // inverse as a candidate preimage and test the original condition on
        // it. Disjointness makes the test decisive.
        let cond_copy = self.model.arena.transfer(c, &mut self.inverse);
        let mut candidate = std::collections::HashMap::new();
        candidate.insert(self.target.to_string(), then_inv);
        let cond_on_candidate = self.inverse.substitute(cond_copy, &candidate);
        Ok(self
            .inverse
            .conditional(cond_on_candidate, then_inv, else_inv))
    }

    fn solve_construct(
        &mut self,
        id: ExprId,
        ty: &str,
        fields: &[(String, ExprId)],
        out: ExprId,
    ) -> Result<ExprId, Failure> {
        let arena = &self.model.arena;
        let carrying: Vec<&(String, ExprId)> = fields
            .iter()
            .filter(|(_, v)| arena.references(*v, self.target))
            .collect();

        if carrying.len() == 1 {
            let (field_name, field_expr) = carrying[0];
            let projected = self.inverse.field_access(out, field_name);
            return self.solve(*field_expr, projected);
        }

        // Several fields carry the target: invertible only as a bijective
        // re-mapping of the target record's own fields, in declared order.
        let Some(Type::Record(target_ty)) = self
            .model
            .param(self.target)
            .map(|p| p.ty.clone())
        else {
            return Err((
                id,
                NonInvertibleReason::NonInjective(format!(
                    "`{}` feeds multiple fields of `{ty}`",
                    self.target
                )),
            ));
        };
        let Some(declared) = self.records.fields_of(&target_ty) else {
            return Err((id, NonInvertibleReason::UnknownRecordType(target_ty)));
        };

        // Every carrying field must be a direct projection of the target,
        // and together they must cover the target's fields exactly once.
        let mut mapping: BTreeMap<String, String> = BTreeMap::new();
        for (new_field, value) in fields {
            if !arena.references(*value, self.target) {
                continue;
            }
            match arena.get(*value) {
                SymbolicExpr::FieldAccess(base, orig_field)
                    if matches!(arena.get(*base), SymbolicExpr::Variable(n) if n == self.target) =>
                {
                    if mapping
                        .insert(orig_field.clone(), new_field.clone())
                        .is_some()
                    {
                        return Err((
                            id,
                            NonInvertibleReason::FieldMappingNotBijective(target_ty),
                        ));
                    }
                }
                _ => {
                    return Err((
                        id,
                        NonInvertibleReason::FieldMappingNotBijective(target_ty),
                    ));
                }
            }
        }
        if mapping.len() != declared.len()
            || declared.iter().any(|f| !mapping.contains_key(f))
        {
            return Err((
                id,
                NonInvertibleReason::FieldMappingNotBijective(target_ty),
            ));
        }

        // target = TargetTy { orig_field: out.new_field, ... } in declared
        // field order.
        let rebuilt: Vec<(String, ExprId)> = declared
            .iter()
            .map(|orig_field| {
                let new_field = &mapping[orig_field];
                let projected = self.inverse.field_access(out, new_field);
                (orig_field.clone(), projected)
            })
            .collect();
        Ok(self.inverse.construct(&target_ty, rebuilt))
    }

    fn solve_projection(
        &mut self,
        id: ExprId,
        base: ExprId,
        field: &str,
        out: ExprId,
    ) -> Result<ExprId, Failure> {
        // base.field = out can only recover base when `field` is the record's
        // sole field.
        let record_ty = match self.record_type_of(base) {
            Some(ty) => ty,
            None => {
                return Err((
                    id,
                    NonInvertibleReason::ProjectionDiscardsFields("<unknown>".to_string()),
                ));
            }
        };
        let Some(declared) = self.records.fields_of(&record_ty) else {
            return Err((id, NonInvertibleReason::UnknownRecordType(record_ty)));
        };
        if declared.len() != 1 || declared[0] != field {
            return Err((
                id,
                NonInvertibleReason::ProjectionDiscardsFields(record_ty),
            ));
        }
        let rebuilt = self
            .inverse
            .construct(&record_ty, vec![(field.to_string(), out)]);
        self.solve(base, rebuilt)
    }

    /// Record type of an expression, where the solver can see it.
    fn record_type_of(&self, id: ExprId) -> Option<String> {
        match self.model.arena.get(id) {
            SymbolicExpr::Variable(name) => match self.model.param(name).map(|p| &p.ty) {
                Some(Type::Record(ty)) => Some(ty.clone()),
                _ => None,
            },
            SymbolicExpr::Construct(ty, _) => Some(ty.clone()),
            _ => None,
        }
    }

    /// Copy a non-target operand into the inverse arena, where it stays an
    /// expression over the free parameters.
    fn carry_free(&mut self, node: ExprId, operand: ExprId) -> Result<ExprId, Failure> {
        if let Some((_, reason)) = self.model.arena.contains_opaque(operand) {
            return Err((node, NonInvertibleReason::Opaque(reason)));
        }
        Ok(self.model.arena.transfer(operand, &mut self.inverse))
    }
}

fn is_literal_zero(arena: &ExprArena, id: ExprId) -> bool {
    match arena.get(id) {
        SymbolicExpr::Literal(Value::Int(n)) => n.is_zero(),
        SymbolicExpr::Literal(Value::Rat(r)) => r.is_zero(),
        _ => false,
    }
}

fn call_inverse_failure(callee: &str) -> String {
    match callee {
        "round" | "floor" | "ceil" | "trunc" => "rounding loses information".to_string(),
        "abs" => "absolute value folds two preimages together".to_string(),
        "hash" => "hashing loses information".to_string(),
        other => format!("call to `{other}` has no registered inverse"),
    }
}
