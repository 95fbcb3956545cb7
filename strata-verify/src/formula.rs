#![forbid(unsafe_code)]

//! Propositional structure over linear atoms.
//!
//! Boolean-valued symbolic expressions become formulas whose leaves are
//! comparisons of linear expressions with zero. Conditionals nested inside
//! numeric operands are lifted into propositional case splits first, so a
//! comparison over `if c then a else b` becomes
//! `(c && cmp(a)) || (!c && cmp(b))`.

use strata_sym::{BinOp, ExprArena, ExprId, SymbolicExpr, UnaryOp, Value};

use crate::linear::{linearize, LinExpr, Unsupported};

/// `lin REL 0`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AtomRel {
    LeZero,
    LtZero,
    EqZero,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Atom {
    pub lin: LinExpr,
    pub rel: AtomRel,
}

impl Atom {
    fn le(lin: LinExpr) -> Self {
        Atom {
            lin,
            rel: AtomRel::LeZero,
        }
    }

    fn lt(lin: LinExpr) -> Self {
        Atom {
            lin,
            rel: AtomRel::LtZero,
        }
    }

    fn eq(lin: LinExpr) -> Self {
        Atom {
            lin,
            rel: AtomRel::EqZero,
        }
    }

    /// Negation of an atom as a formula; `!(e == 0)` splits into two strict
    /// inequalities.
    fn negated(&self) -> Formula {
        match self.rel {
            AtomRel::LeZero => Formula::Atom(Atom::lt(self.lin.neg())),
            AtomRel::LtZero => Formula::Atom(Atom::le(self.lin.neg())),
            AtomRel::EqZero => Formula::Or(vec![
                Formula::Atom(Atom::lt(self.lin.clone())),
                Formula::Atom(Atom::lt(self.lin.neg())),
            ]),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Formula {
    True,
    False,
    Atom(Atom),
    Not(Box<Formula>),
    And(Vec<Formula>),
    Or(Vec<Formula>),
}

/// Budget shared by conditional lifting and DNF expansion.
#[derive(Clone, Copy, Debug)]
pub struct FormulaLimits {
    pub max_cases: usize,
}

/// Convert a boolean-valued expression into a formula over linear atoms.
pub fn formula_of(
    arena: &mut ExprArena,
    id: ExprId,
    limits: &FormulaLimits,
) -> Result<Formula, Unsupported> {
    match arena.get(id).clone() {
        SymbolicExpr::Literal(Value::Bool(true)) => Ok(Formula::True),
        SymbolicExpr::Literal(Value::Bool(false)) => Ok(Formula::False),
        SymbolicExpr::UnaryOp(UnaryOp::Not, a) => {
            Ok(Formula::Not(Box::new(formula_of(arena, a, limits)?)))
        }
        SymbolicExpr::BinaryOp(BinOp::And, a, b) => Ok(Formula::And(vec![
            formula_of(arena, a, limits)?,
            formula_of(arena, b, limits)?,
        ])),
        SymbolicExpr::BinaryOp(BinOp::Or, a, b) => Ok(Formula::Or(vec![
            formula_of(arena, a, limits)?,
            formula_of(arena, b, limits)?,
        ])),
        SymbolicExpr::BinaryOp(op, a, b) if is_comparison(op) => {
            comparison_formula(arena, op, a, b, limits)
        }
        SymbolicExpr::Conditional(c, t, e) => {
            // Boolean-valued conditional: (c && t) || (!c && e).
            let fc = formula_of(arena, c, limits)?;
            let ft = formula_of(arena, t, limits)?;
            let fe = formula_of(arena, e, limits)?;
            Ok(Formula::Or(vec![
                Formula::And(vec![fc.clone(), ft]),
                Formula::And(vec![Formula::Not(Box::new(fc)), fe]),
            ]))
        }
        SymbolicExpr::Opaque(reason) => Err(Unsupported(reason.display())),
        other => Err(Unsupported(format!(
            "expression is outside the propositional-linear theory: {other:?}"
        ))),
    }
}

fn is_comparison(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
    )
}

fn comparison_formula(
    arena: &mut ExprArena,
    op: BinOp,
    left: ExprId,
    right: ExprId,
    limits: &FormulaLimits,
) -> Result<Formula, Unsupported> {
    let left_paths = conditional_paths(arena, left, limits)?;
    let right_paths = conditional_paths(arena, right, limits)?;
    if left_paths.len() * right_paths.len() > limits.max_cases {
        return Err(Unsupported("conditional case split exceeds ceiling".to_string()));
    }

    let mut cases = Vec::new();
    for (lconds, l) in &left_paths {
        for (rconds, r) in &right_paths {
            let ll = linearize(arena, *l)?;
            let rl = linearize(arena, *r)?;
            let atom = comparison_atom(op, &ll, &rl);
            let mut conjuncts = Vec::new();
            for (cond, polarity) in lconds.iter().chain(rconds.iter()) {
                let f = formula_of(arena, *cond, limits)?;
                conjuncts.push(if *polarity {
                    f
                } else {
                    Formula::Not(Box::new(f))
                });
            }
            conjuncts.push(atom);
            cases.push(Formula::And(conjuncts));
        }
    }
    Ok(Formula::Or(cases))
}

fn comparison_atom(op: BinOp, l: &LinExpr, r: &LinExpr) -> Formula {
    match op {
        BinOp::Lt => Formula::Atom(Atom::lt(l.sub(r))),
        BinOp::Le => Formula::Atom(Atom::le(l.sub(r))),
        BinOp::Gt => Formula::Atom(Atom::lt(r.sub(l))),
        BinOp::Ge => Formula::Atom(Atom::le(r.sub(l))),
        BinOp::Eq => Formula::Atom(Atom::eq(l.sub(r))),
        BinOp::Ne => Formula::Not(Box::new(Formula::Atom(Atom::eq(l.sub(r))))),
        _ => unreachable!("caller filters to comparison operators"),
    }
}

/// Enumerate conditional-free versions of a numeric expression, each guarded
/// by the polarity of the conditionals taken to reach it.
fn conditional_paths(
    arena: &mut ExprArena,
    id: ExprId,
    limits: &FormulaLimits,
) -> Result<Vec<(Vec<(ExprId, bool)>, ExprId)>, Unsupported> {
    // Each distinct conditional doubles the path count; refuse up front
    // rather than materializing an exponential split first.
    let conds = count_conditionals(arena, id);
    if conds >= usize::BITS as usize || (1usize << conds) > limits.max_cases {
        return Err(Unsupported("conditional case split exceeds ceiling".to_string()));
    }
    let Some(cond_node) = first_conditional(arena, id) else {
        return Ok(vec![(Vec::new(), id)]);
    };
    let (c, t, e) = match arena.get(cond_node) {
        SymbolicExpr::Conditional(c, t, e) => (*c, *t, *e),
        _ => unreachable!("first_conditional returns conditional nodes"),
    };
    let then_root = arena.replace_node(id, cond_node, t);
    let else_root = arena.replace_node(id, cond_node, e);

    let mut out = Vec::new();
    for (mut conds, leaf) in conditional_paths(arena, then_root, limits)? {
        conds.insert(0, (c, true));
        out.push((conds, leaf));
    }
    for (mut conds, leaf) in conditional_paths(arena, else_root, limits)? {
        conds.insert(0, (c, false));
        out.push((conds, leaf));
    }
    if out.len() > limits.max_cases {
        return Err(Unsupported("conditional case split exceeds ceiling".to_string()));
    }
    Ok(out)
}

/// Distinct conditional nodes reachable from `root`.
fn count_conditionals(arena: &ExprArena, root: ExprId) -> usize {
    let mut stack = vec![root];
    let mut seen = std::collections::HashSet::new();
    let mut count = 0;
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if matches!(arena.get(id), SymbolicExpr::Conditional(..)) {
            count += 1;
        }
        stack.extend(arena.children(id));
    }
    count
}

/// First conditional in deterministic depth-first order, if any.
fn first_conditional(arena: &ExprArena, root: ExprId) -> Option<ExprId> {
    let mut stack = vec![root];
    let mut seen = std::collections::HashSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if matches!(arena.get(id), SymbolicExpr::Conditional(..)) {
            return Some(id);
        }
        let mut children = arena.children(id);
        children.reverse();
        stack.extend(children);
    }
    None
}

/// Negation-normal form: negations pushed to the leaves.
pub fn nnf(f: &Formula) -> Formula {
    nnf_signed(f, false)
}

fn nnf_signed(f: &Formula, negate: bool) -> Formula {
    match f {
        Formula::True => {
            if negate {
                Formula::False
            } else {
                Formula::True
            }
        }
        Formula::False => {
            if negate {
                Formula::True
            } else {
                Formula::False
            }
        }
        Formula::Atom(a) => {
            if negate {
                a.negated()
            } else {
                Formula::Atom(a.clone())
            }
        }
        Formula::Not(inner) => nnf_signed(inner, !negate),
        Formula::And(parts) => {
            let mapped = parts.iter().map(|p| nnf_signed(p, negate)).collect();
            if negate {
                Formula::Or(mapped)
            } else {
                Formula::And(mapped)
            }
        }
        Formula::Or(parts) => {
            let mapped = parts.iter().map(|p| nnf_signed(p, negate)).collect();
            if negate {
                Formula::And(mapped)
            } else {
                Formula::Or(mapped)
            }
        }
    }
}

/// Disjunctive normal form as a list of conjunctions of atoms. `None` means
/// the case ceiling was exceeded. The input must already be in NNF.
pub fn dnf(f: &Formula, max_cases: usize) -> Option<Vec<Vec<Atom>>> {
    match f {
        Formula::True => Some(vec![Vec::new()]),
        Formula::False => Some(Vec::new()),
        Formula::Atom(a) => Some(vec![vec![a.clone()]]),
        Formula::Not(_) => {
            // NNF leaves negation only on atoms, which `negated` rewrites.
            None
        }
        Formula::And(parts) => {
            let mut acc: Vec<Vec<Atom>> = vec![Vec::new()];
            for part in parts {
                let cases = dnf(part, max_cases)?;
                let mut next = Vec::new();
                for prefix in &acc {
                    for case in &cases {
                        let mut merged = prefix.clone();
                        merged.extend(case.iter().cloned());
                        next.push(merged);
                        if next.len() > max_cases {
                            return None;
                        }
                    }
                }
                acc = next;
            }
            Some(acc)
        }
        Formula::Or(parts) => {
            let mut acc = Vec::new();
            for part in parts {
                acc.extend(dnf(part, max_cases)?);
                if acc.len() > max_cases {
                    return None;
                }
            }
            Some(acc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> FormulaLimits {
        FormulaLimits { max_cases: 64 }
    }

    #[test]
    fn comparison_becomes_single_atom() {
        let mut arena = ExprArena::new();
        let x = arena.variable("x");
        let five = arena.lit_int(5);
        let cmp = arena.binary(BinOp::Le, x, five);
        let f = formula_of(&mut arena, cmp, &limits()).unwrap();
        let cases = dnf(&nnf(&f), 64).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].len(), 1);
        assert_eq!(cases[0][0].rel, AtomRel::LeZero);
    }

    #[test]
    fn nested_conditional_lifts_into_cases() {
        // (if x < 0 then 0 else x) >= 0  ->  two guarded cases
        let mut arena = ExprArena::new();
        let x = arena.variable("x");
        let zero = arena.lit_int(0);
        let cond = arena.binary(BinOp::Lt, x, zero);
        let clamped = arena.conditional(cond, zero, x);
        let goal = arena.binary(BinOp::Ge, clamped, zero);

        let f = formula_of(&mut arena, goal, &limits()).unwrap();
        let cases = dnf(&nnf(&f), 64).unwrap();
        assert_eq!(cases.len(), 2);
    }

    #[test]
    fn negated_equality_splits_into_strict_sides() {
        let mut arena = ExprArena::new();
        let b = arena.variable("b");
        let zero = arena.lit_int(0);
        let ne = arena.binary(BinOp::Ne, b, zero);
        let f = formula_of(&mut arena, ne, &limits()).unwrap();
        let cases = dnf(&nnf(&f), 64).unwrap();
        // b != 0  ==>  b < 0  or  b > 0
        assert_eq!(cases.len(), 2);
        assert!(cases.iter().all(|c| c.len() == 1 && c[0].rel == AtomRel::LtZero));
    }

    #[test]
    fn opaque_condition_is_unsupported() {
        let mut arena = ExprArena::new();
        let op = arena.opaque(strata_sym::OpaqueReason::Effectful);
        let zero = arena.lit_int(0);
        let cmp = arena.binary(BinOp::Eq, op, zero);
        assert!(formula_of(&mut arena, cmp, &limits()).is_err());
    }
}
