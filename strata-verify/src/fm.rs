#![forbid(unsafe_code)]

//! Bounded Fourier–Motzkin feasibility over exact rationals.
//!
//! Decides satisfiability of a conjunction of linear atoms and, when
//! satisfiable, back-substitutes a concrete witness. Integer-kinded
//! variables must receive integral witnesses; when the rational relaxation
//! is satisfiable but no integer point can be produced the result is
//! `Inconclusive`, never an invalid witness. Constraint growth is capped;
//! past the cap the result is `Inconclusive` as well.

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};

use crate::formula::{Atom, AtomRel};
use crate::linear::LinExpr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumKind {
    Int,
    Rat,
}

pub type VarKinds = BTreeMap<String, NumKind>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Feasibility {
    /// Satisfiable, with a concrete assignment for every mentioned variable.
    Sat(BTreeMap<String, BigRational>),
    Unsat,
    /// Budget exceeded or no domain-valid witness; callers degrade to
    /// `Unknown`.
    Inconclusive,
}

/// One inequality `lin (<|<=) 0`.
#[derive(Clone, Debug)]
struct Ineq {
    lin: LinExpr,
    strict: bool,
}

/// Bounds on an eliminated variable, expressed over later variables.
#[derive(Clone, Debug)]
struct Step {
    var: String,
    /// `var >= value` bounds.
    lowers: Vec<(LinExpr, bool)>,
    /// `var <= value` bounds.
    uppers: Vec<(LinExpr, bool)>,
}

pub fn feasible(atoms: &[Atom], kinds: &VarKinds, max_atoms: usize) -> Feasibility {
    let mut constraints: Vec<Ineq> = Vec::new();
    for atom in atoms {
        match atom.rel {
            AtomRel::LeZero => constraints.push(Ineq {
                lin: atom.lin.clone(),
                strict: false,
            }),
            AtomRel::LtZero => constraints.push(Ineq {
                lin: atom.lin.clone(),
                strict: true,
            }),
            AtomRel::EqZero => {
                constraints.push(Ineq {
                    lin: atom.lin.clone(),
                    strict: false,
                });
                constraints.push(Ineq {
                    lin: atom.lin.neg(),
                    strict: false,
                });
            }
        }
    }

    let vars: BTreeSet<String> = constraints
        .iter()
        .flat_map(|c| c.lin.coeffs.keys().cloned())
        .collect();

    let mut steps: Vec<Step> = Vec::new();
    for var in &vars {
        if constraints.len() > max_atoms {
            return Feasibility::Inconclusive;
        }
        let (mentioning, rest): (Vec<Ineq>, Vec<Ineq>) = constraints
            .into_iter()
            .partition(|c| c.lin.coeffs.contains_key(var));
        constraints = rest;

        let mut lowers: Vec<(LinExpr, bool)> = Vec::new();
        let mut uppers: Vec<(LinExpr, bool)> = Vec::new();
        for c in &mentioning {
            let coeff = c.lin.coeffs.get(var).expect("partitioned on presence");
            // a*v + rest <= 0  =>  v <= -rest/a (a > 0), v >= -rest/a (a < 0)
            let mut without = c.lin.clone();
            without.coeffs.remove(var);
            let bound = without.neg().scale(&coeff.recip());
            if coeff.is_positive() {
                uppers.push((bound, c.strict));
            } else {
                lowers.push((bound, c.strict));
            }
        }

        for (lo, lo_strict) in &lowers {
            for (hi, hi_strict) in &uppers {
                constraints.push(Ineq {
                    lin: lo.sub(hi),
                    strict: *lo_strict || *hi_strict,
                });
                if constraints.len() > max_atoms {
                    return Feasibility::Inconclusive;
                }
            }
        }
        steps.push(Step {
            var: var.clone(),
            lowers,
            uppers,
        });
    }

    // Only constant constraints remain.
    for c in &constraints {
        debug_assert!(c.lin.is_constant());
        let v = &c.lin.constant;
        let violated = if c.strict {
            !v.is_negative()
        } else {
            v.is_positive()
        };
        if violated {
            return Feasibility::Unsat;
        }
    }

    // Back-substitute, most recently eliminated variable first.
    let mut assignment: BTreeMap<String, BigRational> = BTreeMap::new();
    for step in steps.iter().rev() {
        let mut lo: Option<(BigRational, bool)> = None;
        for (bound, strict) in &step.lowers {
            let v = bound
                .eval(&assignment)
                .expect("bounds only reference later variables");
            lo = merge_bound(lo, v, *strict, true);
        }
        let mut hi: Option<(BigRational, bool)> = None;
        for (bound, strict) in &step.uppers {
            let v = bound
                .eval(&assignment)
                .expect("bounds only reference later variables");
            hi = merge_bound(hi, v, *strict, false);
        }

        let kind = kinds.get(&step.var).copied().unwrap_or(NumKind::Rat);
        let Some(value) = choose_value(lo, hi, kind) else {
            return Feasibility::Inconclusive;
        };
        assignment.insert(step.var.clone(), value);
    }

    Feasibility::Sat(assignment)
}

/// Tighten a running lower (`want_max`) or upper bound, keeping the stricter
/// openness flag on ties.
fn merge_bound(
    current: Option<(BigRational, bool)>,
    v: BigRational,
    strict: bool,
    want_max: bool,
) -> Option<(BigRational, bool)> {
    match current {
        None => Some((v, strict)),
        Some((best, bs)) => {
            if v == best {
                Some((best, bs || strict))
            } else if (want_max && v > best) || (!want_max && v < best) {
                Some((v, strict))
            } else {
                Some((best, bs))
            }
        }
    }
}

fn choose_value(
    lo: Option<(BigRational, bool)>,
    hi: Option<(BigRational, bool)>,
    kind: NumKind,
) -> Option<BigRational> {
    match kind {
        NumKind::Int => {
            let int_lo = lo.map(|(v, strict)| if strict { floor(&v) + 1 } else { ceil(&v) });
            let int_hi = hi.map(|(v, strict)| if strict { ceil(&v) - 1 } else { floor(&v) });
            let picked = match (int_lo, int_hi) {
                (None, None) => BigInt::zero(),
                (Some(l), None) => l.max(BigInt::zero()),
                (None, Some(h)) => h.min(BigInt::zero()),
                (Some(l), Some(h)) => {
                    if l > h {
                        return None;
                    }
                    l.clone().max(h.min(BigInt::zero()))
                }
            };
            Some(BigRational::from_integer(picked))
        }
        NumKind::Rat => match (lo, hi) {
            (None, None) => Some(BigRational::zero()),
            (Some((l, strict)), None) => {
                if l.is_negative() || (l.is_zero() && !strict) {
                    Some(BigRational::zero())
                } else {
                    Some(l + BigRational::one())
                }
            }
            (None, Some((h, strict))) => {
                if h.is_positive() || (h.is_zero() && !strict) {
                    Some(BigRational::zero())
                } else {
                    Some(h - BigRational::one())
                }
            }
            (Some((l, ls)), Some((h, hs))) => {
                let zero_ok = (l.is_negative() || (l.is_zero() && !ls))
                    && (h.is_positive() || (h.is_zero() && !hs));
                if zero_ok {
                    Some(BigRational::zero())
                } else if l == h {
                    if ls || hs {
                        None
                    } else {
                        Some(l)
                    }
                } else if l < h {
                    Some((l + h) / BigRational::from_integer(2.into()))
                } else {
                    None
                }
            }
        },
    }
}

fn floor(r: &BigRational) -> BigInt {
    r.floor().to_integer()
}

fn ceil(r: &BigRational) -> BigInt {
    r.ceil().to_integer()
}
