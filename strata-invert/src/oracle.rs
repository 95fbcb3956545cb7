#![forbid(unsafe_code)]

//! The one seam between the reversibility solver and the verifier: proving
//! that the value ranges of two conditional branches cannot overlap.

use strata_sym::{ExprArena, ExprId, FunctionSymbolicModel};
use strata_verify::{branches_disjoint, var_kinds, VarKinds, VerifyLimits};

pub trait DisjointnessOracle {
    /// May the solver assume that no input taking the then-branch produces
    /// the same value as any input taking the else-branch? Only a proof
    /// counts; `false` covers both "overlapping" and "could not decide".
    fn provably_disjoint(
        &mut self,
        arena: &ExprArena,
        cond: ExprId,
        then_e: ExprId,
        else_e: ExprId,
    ) -> bool;
}

/// Disjointness via the linear-arithmetic verifier, under the function's
/// own declared assumptions.
pub struct LinearDisjointness {
    assumes: Vec<ExprId>,
    kinds: VarKinds,
    limits: VerifyLimits,
}

impl LinearDisjointness {
    pub fn for_model(model: &FunctionSymbolicModel, limits: VerifyLimits) -> Self {
        Self {
            assumes: model.assumes.iter().map(|c| c.expr).collect(),
            kinds: var_kinds(model),
            limits,
        }
    }
}

impl DisjointnessOracle for LinearDisjointness {
    fn provably_disjoint(
        &mut self,
        arena: &ExprArena,
        cond: ExprId,
        then_e: ExprId,
        else_e: ExprId,
    ) -> bool {
        branches_disjoint(
            arena,
            cond,
            then_e,
            else_e,
            &self.assumes,
            &self.kinds,
            &self.limits,
        )
    }
}

/// An oracle that proves nothing; used where conditionals must fail closed.
pub struct NoDisjointness;

impl DisjointnessOracle for NoDisjointness {
    fn provably_disjoint(&mut self, _: &ExprArena, _: ExprId, _: ExprId, _: ExprId) -> bool {
        false
    }
}
