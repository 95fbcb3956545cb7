#![forbid(unsafe_code)]

//! Branch-range disjointness, the one query the reversibility solver makes
//! of the verifier.
//!
//! Two conditional branches have disjoint value ranges when no input taking
//! the then-branch can produce the same value as any input taking the
//! else-branch. The check renames the else-world's variables apart and asks
//! whether `cond(x) && !cond(x') && then(x) == else(x')` is satisfiable
//! under the function's assumptions in both worlds; only a definitive
//! `Unsat` counts as disjoint.

use std::collections::HashMap;

use strata_sym::{ExprArena, ExprId, UnaryOp};

use crate::fm::VarKinds;
use crate::prove::{satisfiable, SatOutcome, VerifyLimits};

const RENAME_SUFFIX: &str = "__else_world";

pub fn branches_disjoint(
    src: &ExprArena,
    cond: ExprId,
    then_e: ExprId,
    else_e: ExprId,
    assumes: &[ExprId],
    kinds: &VarKinds,
    limits: &VerifyLimits,
) -> bool {
    let mut scratch = ExprArena::new();
    let t_cond = src.transfer(cond, &mut scratch);
    let t_then = src.transfer(then_e, &mut scratch);
    let t_else = src.transfer(else_e, &mut scratch);
    let t_assumes: Vec<ExprId> = assumes
        .iter()
        .map(|&a| src.transfer(a, &mut scratch))
        .collect();

    let mut vars = scratch.free_vars(t_cond);
    vars.extend(scratch.free_vars(t_then));
    vars.extend(scratch.free_vars(t_else));
    for &a in &t_assumes {
        vars.extend(scratch.free_vars(a));
    }

    let mut rename = HashMap::new();
    let mut renamed_kinds = kinds.clone();
    for var in &vars {
        let alt = format!("{var}{RENAME_SUFFIX}");
        let alt_id = scratch.variable(&alt);
        if let Some(kind) = kinds.get(var) {
            renamed_kinds.insert(alt.clone(), *kind);
        }
        rename.insert(var.clone(), alt_id);
    }

    let cond_alt = scratch.substitute(t_cond, &rename);
    let else_alt = scratch.substitute(t_else, &rename);
    let not_cond_alt = scratch.unary(UnaryOp::Not, cond_alt);
    let overlap = scratch.binary(strata_sym::BinOp::Eq, t_then, else_alt);

    let mut conjuncts = vec![t_cond, not_cond_alt, overlap];
    conjuncts.extend(t_assumes.iter().copied());
    conjuncts.extend(
        t_assumes
            .iter()
            .map(|&a| scratch.substitute(a, &rename)),
    );

    matches!(
        satisfiable(&mut scratch, &conjuncts, &renamed_kinds, limits),
        SatOutcome::Unsat
    )
}
