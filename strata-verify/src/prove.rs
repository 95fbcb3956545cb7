#![forbid(unsafe_code)]

//! The three-way proof procedure.
//!
//! `Proven` means the goal holds on every assignment consistent with the
//! facts; `Refuted` means it fails on every such assignment and carries a
//! concrete, evaluation-confirmed witness; everything else is `Unknown`.
//! Absence of proof always degrades toward `Unknown`, never toward
//! acceptance.

use std::collections::BTreeMap;

use num_rational::BigRational;
use serde::{Deserialize, Serialize};
use strata_ast::Type;
use strata_sym::{eval, ExprArena, ExprId, FunctionSymbolicModel, Value};

use crate::fm::{feasible, Feasibility, NumKind, VarKinds};
use crate::formula::{dnf, formula_of, nnf, Formula, FormulaLimits};

#[derive(Clone, Copy, Debug)]
pub struct VerifyLimits {
    /// Ceiling on constraint-set growth inside the feasibility check.
    pub max_atoms: usize,
    /// Ceiling on propositional case splitting.
    pub max_cases: usize,
    /// Round cap for fixed-point iteration over cyclic call graphs.
    pub max_fixpoint_rounds: usize,
}

impl Default for VerifyLimits {
    fn default() -> Self {
        Self {
            max_atoms: 512,
            max_cases: 64,
            max_fixpoint_rounds: 4,
        }
    }
}

/// A falsifying assignment, sorted by variable name and rendered with the
/// variable's declared kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterexample {
    pub bindings: Vec<(String, Value)>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofResult {
    Proven,
    Refuted(Counterexample),
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SatOutcome {
    Sat,
    Unsat,
    Unknown,
}

/// Numeric kinds for a model's parameters and its result variable. The
/// verifier refuses to fabricate integer witnesses for variables it has no
/// kind for; unlisted variables are treated as rationals.
pub fn var_kinds(model: &FunctionSymbolicModel) -> VarKinds {
    let mut kinds = VarKinds::new();
    for p in &model.params {
        if let Some(kind) = kind_of(&p.ty) {
            kinds.insert(p.name.clone(), kind);
        }
    }
    if let Some(kind) = kind_of(&model.ret_ty) {
        kinds.insert(strata_ast::RESULT_VAR.to_string(), kind);
    }
    kinds
}

fn kind_of(ty: &Type) -> Option<NumKind> {
    match ty {
        Type::Int => Some(NumKind::Int),
        Type::Rational => Some(NumKind::Rat),
        _ => None,
    }
}

/// Decide `facts |- goal`.
pub fn prove(
    arena: &mut ExprArena,
    facts: &[ExprId],
    goal: ExprId,
    kinds: &VarKinds,
    limits: &VerifyLimits,
) -> ProofResult {
    let flimits = FormulaLimits {
        max_cases: limits.max_cases,
    };

    let Ok(goal_formula) = formula_of(arena, goal, &flimits) else {
        return ProofResult::Unknown;
    };

    let mut fact_formulas = Vec::new();
    let mut all_facts_supported = true;
    for &fact in facts {
        match formula_of(arena, fact, &flimits) {
            Ok(f) => fact_formulas.push(f),
            // An unanalyzable fact weakens what we know; entailment stays
            // sound, refutation is no longer attempted.
            Err(_) => all_facts_supported = false,
        }
    }

    // Entailment: facts AND NOT goal must be infeasible in every case.
    let negated = Formula::And(
        fact_formulas
            .iter()
            .cloned()
            .chain(std::iter::once(Formula::Not(Box::new(goal_formula.clone()))))
            .collect(),
    );
    let Some(cases) = dnf(&nnf(&negated), limits.max_cases) else {
        return ProofResult::Unknown;
    };

    let mut witness: Option<BTreeMap<String, BigRational>> = None;
    let mut any_inconclusive = false;
    for case in &cases {
        match feasible(case, kinds, limits.max_atoms) {
            Feasibility::Unsat => {}
            Feasibility::Inconclusive => any_inconclusive = true,
            Feasibility::Sat(w) => {
                if witness.is_none()
                    && confirm_witness(arena, facts, goal, &w, kinds)
                {
                    witness = Some(w);
                }
                if witness.is_none() {
                    any_inconclusive = true;
                }
            }
        }
    }
    if witness.is_none() && !any_inconclusive {
        return ProofResult::Proven;
    }

    // Refutation: the goal itself must be infeasible under the facts, and a
    // confirmed witness of its negation must exist.
    let Some(w) = witness else {
        return ProofResult::Unknown;
    };
    if !all_facts_supported {
        return ProofResult::Unknown;
    }
    let positive = Formula::And(
        fact_formulas
            .into_iter()
            .chain(std::iter::once(goal_formula))
            .collect(),
    );
    let Some(pos_cases) = dnf(&nnf(&positive), limits.max_cases) else {
        return ProofResult::Unknown;
    };
    for case in &pos_cases {
        match feasible(case, kinds, limits.max_atoms) {
            Feasibility::Unsat => {}
            _ => return ProofResult::Unknown,
        }
    }
    ProofResult::Refuted(counterexample_from(&w, kinds))
}

/// Feasibility of a plain conjunction; used by the branch-disjointness
/// oracle. No witness confirmation is needed because callers only act on
/// `Unsat`.
pub fn satisfiable(
    arena: &mut ExprArena,
    conjuncts: &[ExprId],
    kinds: &VarKinds,
    limits: &VerifyLimits,
) -> SatOutcome {
    let flimits = FormulaLimits {
        max_cases: limits.max_cases,
    };
    let mut parts = Vec::new();
    for &c in conjuncts {
        match formula_of(arena, c, &flimits) {
            Ok(f) => parts.push(f),
            Err(_) => return SatOutcome::Unknown,
        }
    }
    let Some(cases) = dnf(&nnf(&Formula::And(parts)), limits.max_cases) else {
        return SatOutcome::Unknown;
    };
    let mut any_unknown = false;
    for case in &cases {
        match feasible(case, kinds, limits.max_atoms) {
            Feasibility::Sat(_) => return SatOutcome::Sat,
            Feasibility::Inconclusive => any_unknown = true,
            Feasibility::Unsat => {}
        }
    }
    if any_unknown {
        SatOutcome::Unknown
    } else {
        SatOutcome::Unsat
    }
}

/// A witness is only reported after concrete evaluation agrees: every fact
/// must evaluate to true and the goal to false under it.
fn confirm_witness(
    arena: &ExprArena,
    facts: &[ExprId],
    goal: ExprId,
    witness: &BTreeMap<String, BigRational>,
    kinds: &VarKinds,
) -> bool {
    let mut bindings: BTreeMap<String, Value> = BTreeMap::new();
    let mut vars = arena.free_vars(goal);
    for &f in facts {
        vars.extend(arena.free_vars(f));
    }
    for var in vars {
        let value = witness
            .get(&var)
            .cloned()
            .unwrap_or_else(|| num_traits::Zero::zero());
        let kind = kinds.get(&var).copied().unwrap_or(NumKind::Rat);
        let v = match kind {
            NumKind::Int => {
                if !value.is_integer() {
                    return false;
                }
                Value::Int(value.to_integer())
            }
            NumKind::Rat => Value::Rat(value).normalized(),
        };
        bindings.insert(var, v);
    }

    for &f in facts {
        match eval(arena, f, &bindings) {
            Ok(Value::Bool(true)) => {}
            _ => return false,
        }
    }
    matches!(eval(arena, goal, &bindings), Ok(Value::Bool(false)))
}

fn counterexample_from(witness: &BTreeMap<String, BigRational>, kinds: &VarKinds) -> Counterexample {
    let bindings = witness
        .iter()
        .map(|(name, v)| {
            let value = match kinds.get(name) {
                Some(NumKind::Int) if v.is_integer() => Value::Int(v.to_integer()),
                _ => Value::Rat(v.clone()).normalized(),
            };
            (name.clone(), value)
        })
        .collect();
    Counterexample { bindings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_sym::BinOp;

    fn kinds(vars: &[(&str, NumKind)]) -> VarKinds {
        vars.iter().map(|(n, k)| (n.to_string(), *k)).collect()
    }

    #[test]
    fn literal_nonzero_assumption_is_proven() {
        // goal: 5 != 0, no facts
        let mut arena = ExprArena::new();
        let five = arena.lit_int(5);
        let zero = arena.lit_int(0);
        let goal = arena.binary(BinOp::Ne, five, zero);
        assert_eq!(
            prove(&mut arena, &[], goal, &VarKinds::new(), &VerifyLimits::default()),
            ProofResult::Proven
        );
    }

    #[test]
    fn literal_zero_assumption_is_refuted() {
        // goal: 0 != 0
        let mut arena = ExprArena::new();
        let zero = arena.lit_int(0);
        let goal = arena.binary(BinOp::Ne, zero, zero);
        assert!(matches!(
            prove(&mut arena, &[], goal, &VarKinds::new(), &VerifyLimits::default()),
            ProofResult::Refuted(_)
        ));
    }

    #[test]
    fn unconstrained_variable_is_unknown() {
        // goal: b != 0 with b free
        let mut arena = ExprArena::new();
        let b = arena.variable("b");
        let zero = arena.lit_int(0);
        let goal = arena.binary(BinOp::Ne, b, zero);
        assert_eq!(
            prove(
                &mut arena,
                &[],
                goal,
                &kinds(&[("b", NumKind::Int)]),
                &VerifyLimits::default()
            ),
            ProofResult::Unknown
        );
    }

    #[test]
    fn facts_discharge_goals() {
        // fact: x >= 3; goal: x > 0
        let mut arena = ExprArena::new();
        let x = arena.variable("x");
        let three = arena.lit_int(3);
        let zero = arena.lit_int(0);
        let fact = arena.binary(BinOp::Ge, x, three);
        let goal = arena.binary(BinOp::Gt, x, zero);
        assert_eq!(
            prove(
                &mut arena,
                &[fact],
                goal,
                &kinds(&[("x", NumKind::Int)]),
                &VerifyLimits::default()
            ),
            ProofResult::Proven
        );
    }

    #[test]
    fn refuted_goals_carry_confirmed_counterexamples() {
        // fact: x >= 1; goal: x <= 0
        let mut arena = ExprArena::new();
        let x = arena.variable("x");
        let one = arena.lit_int(1);
        let zero = arena.lit_int(0);
        let fact = arena.binary(BinOp::Ge, x, one);
        let goal = arena.binary(BinOp::Le, x, zero);
        match prove(
            &mut arena,
            &[fact],
            goal,
            &kinds(&[("x", NumKind::Int)]),
            &VerifyLimits::default(),
        ) {
            ProofResult::Refuted(cx) => {
                assert_eq!(cx.bindings.len(), 1);
                let (name, value) = &cx.bindings[0];
                assert_eq!(name, "x");
                match value {
                    Value::Int(n) => assert!(*n >= 1.into()),
                    other => panic!("expected integer witness, got {other:?}"),
                }
            }
            other => panic!("expected Refuted, got {other:?}"),
        }
    }

    #[test]
    fn sometimes_false_goal_is_unknown_not_refuted() {
        // fact: x >= 0; goal: x >= 10. Fails for x = 0, holds for x = 10.
        let mut arena = ExprArena::new();
        let x = arena.variable("x");
        let zero = arena.lit_int(0);
        let ten = arena.lit_int(10);
        let fact = arena.binary(BinOp::Ge, x, zero);
        let goal = arena.binary(BinOp::Ge, x, ten);
        assert_eq!(
            prove(
                &mut arena,
                &[fact],
                goal,
                &kinds(&[("x", NumKind::Int)]),
                &VerifyLimits::default()
            ),
            ProofResult::Unknown
        );
    }

    #[test]
    fn clamp_guarantee_proves_across_three_branches() {
        // body: if x < 0 then 0 else (if x > 100 then 100 else x)
        // goal: result >= 0 && result <= 100, with result == body as a fact.
        let mut arena = ExprArena::new();
        let x = arena.variable("x");
        let zero = arena.lit_int(0);
        let hundred = arena.lit_int(100);
        let below = arena.binary(BinOp::Lt, x, zero);
        let above = arena.binary(BinOp::Gt, x, hundred);
        let inner = arena.conditional(above, hundred, x);
        let body = arena.conditional(below, zero, inner);

        let result = arena.variable("result");
        let eq = arena.binary(BinOp::Eq, result, body);
        let ge = arena.binary(BinOp::Ge, result, zero);
        let le = arena.binary(BinOp::Le, result, hundred);
        let goal = arena.binary(BinOp::And, ge, le);

        assert_eq!(
            prove(
                &mut arena,
                &[eq],
                goal,
                &kinds(&[("x", NumKind::Int), ("result", NumKind::Int)]),
                &VerifyLimits::default()
            ),
            ProofResult::Proven
        );
    }

    #[test]
    fn opaque_goal_is_unknown() {
        let mut arena = ExprArena::new();
        let op = arena.opaque(strata_sym::OpaqueReason::Effectful);
        let zero = arena.lit_int(0);
        let goal = arena.binary(BinOp::Ge, op, zero);
        assert_eq!(
            prove(&mut arena, &[], goal, &VarKinds::new(), &VerifyLimits::default()),
            ProofResult::Unknown
        );
    }

    #[test]
    fn nonlinear_goal_is_unknown() {
        let mut arena = ExprArena::new();
        let x = arena.variable("x");
        let sq = arena.binary(BinOp::Mul, x, x);
        let zero = arena.lit_int(0);
        let goal = arena.binary(BinOp::Ge, sq, zero);
        assert_eq!(
            prove(
                &mut arena,
                &[],
                goal,
                &kinds(&[("x", NumKind::Int)]),
                &VerifyLimits::default()
            ),
            ProofResult::Unknown
        );
    }

    #[test]
    fn determinism_repeated_runs_agree() {
        let mut arena = ExprArena::new();
        let x = arena.variable("x");
        let one = arena.lit_int(1);
        let zero = arena.lit_int(0);
        let fact = arena.binary(BinOp::Ge, x, one);
        let goal = arena.binary(BinOp::Le, x, zero);
        let k = kinds(&[("x", NumKind::Int)]);
        let first = prove(&mut arena, &[fact], goal, &k, &VerifyLimits::default());
        let second = prove(&mut arena, &[fact], goal, &k, &VerifyLimits::default());
        assert_eq!(first, second);
    }
}
