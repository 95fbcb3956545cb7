#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use strata_ast::{Span, Type};

use crate::expr::{ExprArena, ExprId};

pub use strata_ast::ReversibilityTag;

/// Whether a constraint is a precondition on parameters or a postcondition
/// on the result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    Assumption,
    Guarantee,
}

/// A boolean-valued symbolic expression declared on a function. Guarantees
/// mention the distinguished `result` variable; the verifier binds it to the
/// body when discharging the obligation.
#[derive(Clone, Debug)]
pub struct Constraint {
    pub span: Span,
    pub kind: ConstraintKind,
    pub expr: ExprId,
    /// Source-level rendering, carried for diagnostics and reports.
    pub text: String,
}

/// A call recorded while lowering a body, with argument expressions already
/// in the caller's symbolic form. Assumption checks at call sites substitute
/// these into the callee's declared preconditions.
#[derive(Clone, Debug)]
pub struct CallSite {
    pub span: Span,
    pub callee: String,
    pub args: Vec<ExprId>,
    /// What the call lowered to in the caller's graph: the inlined body, or
    /// an opaque leaf when the callee was not expanded.
    pub result: ExprId,
}

#[derive(Clone, Debug)]
pub struct ParamSym {
    pub name: String,
    pub ty: Type,
}

/// The per-function analysis substrate: one immutable expression graph plus
/// the declared contracts. Built once after type checking; the verifier and
/// the reversibility solver are independent consumers.
#[derive(Clone, Debug)]
pub struct FunctionSymbolicModel {
    pub name: String,
    pub span: Span,
    pub params: Vec<ParamSym>,
    pub ret_ty: Type,
    pub arena: ExprArena,
    /// The return value of the function as a single expression.
    pub body: ExprId,
    pub assumes: Vec<Constraint>,
    pub guarantees: Vec<Constraint>,
    pub tag: ReversibilityTag,
    /// Call sites recorded in lowering order (also covers inlined calls).
    pub call_sites: Vec<CallSite>,
    /// Functions whose bodies were expanded into this graph. A change to
    /// any of them changes this model's content hash.
    pub inlined: BTreeSet<String>,
    /// Structural hash of the graph, contracts, and tag (hex sha256).
    pub content_hash: String,
}

impl FunctionSymbolicModel {
    pub fn param(&self, name: &str) -> Option<&ParamSym> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.assumes.iter().chain(self.guarantees.iter())
    }
}
