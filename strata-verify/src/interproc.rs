#![forbid(unsafe_code)]

//! Interprocedural constraint propagation.
//!
//! The propagator verifies one call-graph component at a time. Within a
//! function, call sites are processed in body order and every non-refuted
//! instantiated assumption becomes a fact for the rest of the body (a
//! runtime guard enforces the `Unknown` ones before execution proceeds).
//! Proven callee guarantees are instantiated at the call site and join the
//! fact set as well. Cyclic components iterate to a fixed point under a
//! round cap; a component still changing at the cap falls back to the
//! verdicts derivable without any component-internal facts.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use strata_ast::Span;
use strata_sym::{
    render, BinOp, ConstraintKind, ExprArena, ExprId, FunctionSymbolicModel,
};

use crate::prove::{prove, var_kinds, ProofResult, VerifyLimits};

/// A self-contained guard graph handed to codegen for an `Unknown`
/// constraint: evaluate `root`, raise the matching violation when false.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GuardExpr {
    pub arena: ExprArena,
    pub root: ExprId,
}

#[derive(Clone, Debug)]
pub struct ConstraintVerdict {
    pub kind: ConstraintKind,
    pub span: Span,
    pub text: String,
    pub result: ProofResult,
    pub guard: Option<GuardExpr>,
}

#[derive(Clone, Debug)]
pub struct CallSiteReport {
    pub span: Span,
    pub callee: String,
    pub assumptions: Vec<ConstraintVerdict>,
}

#[derive(Clone, Debug)]
pub struct FunctionVerifyReport {
    pub function: String,
    pub span: Span,
    pub guarantees: Vec<ConstraintVerdict>,
    pub call_sites: Vec<CallSiteReport>,
    /// False when the component's fixed point hit the round cap.
    pub stabilized: bool,
}

impl FunctionVerifyReport {
    fn results_signature(&self) -> Vec<ProofResult> {
        self.guarantees
            .iter()
            .map(|v| v.result.clone())
            .chain(
                self.call_sites
                    .iter()
                    .flat_map(|s| s.assumptions.iter().map(|v| v.result.clone())),
            )
            .collect()
    }
}

pub struct Propagator<'a> {
    models: &'a BTreeMap<String, FunctionSymbolicModel>,
    limits: VerifyLimits,
    /// Compute-once memo for call-site obligations, keyed by callee,
    /// constraint, the substituted argument shape, and the fact set in
    /// force. Repeated syntactically identical checks serve the cached
    /// verdict.
    memo: RefCell<HashMap<String, ProofResult>>,
}

impl<'a> Propagator<'a> {
    pub fn new(models: &'a BTreeMap<String, FunctionSymbolicModel>, limits: VerifyLimits) -> Self {
        Self {
            models,
            limits,
            memo: RefCell::new(HashMap::new()),
        }
    }

    /// Verify one strongly connected component. `known` holds finished
    /// reports for callee components (already processed in topological
    /// order). Results for the component are computed by bounded fixed-point
    /// iteration and returned keyed by function name.
    pub fn verify_component(
        &self,
        component: &[String],
        known: &BTreeMap<String, FunctionVerifyReport>,
    ) -> BTreeMap<String, FunctionVerifyReport> {
        let mut names: Vec<&String> = component.iter().collect();
        names.sort();

        let cyclic = self.is_cyclic(component);
        let rounds = if cyclic {
            self.limits.max_fixpoint_rounds.max(1)
        } else {
            1
        };

        let mut prev: BTreeMap<String, FunctionVerifyReport> = BTreeMap::new();
        for round in 0..rounds {
            let mut next: BTreeMap<String, FunctionVerifyReport> = BTreeMap::new();
            for name in &names {
                let model = &self.models[name.as_str()];
                let report = self.verify_function(model, |callee| {
                    prev.get(callee).or_else(|| known.get(callee))
                });
                next.insert((*name).clone(), report);
            }
            let stable = !cyclic
                || (round > 0
                    && names.iter().all(|n| {
                        prev[n.as_str()].results_signature() == next[n.as_str()].results_signature()
                    }));
            prev = next;
            if stable {
                return prev;
            }
        }

        // Round cap hit without stabilizing: fall back to the conservative
        // result computed without any component-internal facts, so every
        // undecided verdict is Unknown with its guard in place.
        let mut fallback: BTreeMap<String, FunctionVerifyReport> = BTreeMap::new();
        for name in &names {
            let model = &self.models[name.as_str()];
            let mut report = self.verify_function(model, |callee| known.get(callee));
            report.stabilized = false;
            fallback.insert((*name).clone(), report);
        }
        fallback
    }

    fn is_cyclic(&self, component: &[String]) -> bool {
        if component.len() > 1 {
            return true;
        }
        let name = &component[0];
        self.models
            .get(name)
            .map(|m| m.call_sites.iter().any(|s| &s.callee == name))
            .unwrap_or(false)
    }

    fn verify_function<'k>(
        &self,
        model: &FunctionSymbolicModel,
        lookup: impl Fn(&str) -> Option<&'k FunctionVerifyReport>,
    ) -> FunctionVerifyReport {
        let mut scratch = model.arena.clone();
        let kinds = var_kinds(model);
        let mut facts: Vec<ExprId> = model.assumes.iter().map(|c| c.expr).collect();

        let mut call_sites = Vec::new();
        for site in &model.call_sites {
            let Some(callee_model) = self.models.get(&site.callee) else {
                // Unknown callee: nothing declared, nothing to check.
                call_sites.push(CallSiteReport {
                    span: site.span,
                    callee: site.callee.clone(),
                    assumptions: Vec::new(),
                });
                continue;
            };

            let mut param_map: HashMap<String, ExprId> = HashMap::new();
            for (param, arg) in callee_model.params.iter().zip(site.args.iter()) {
                param_map.insert(param.name.clone(), *arg);
            }

            let mut assumptions = Vec::new();
            for (index, decl) in callee_model.assumes.iter().enumerate() {
                let transferred = callee_model.arena.transfer(decl.expr, &mut scratch);
                let instantiated = scratch.substitute(transferred, &param_map);
                let key = memo_key(&scratch, &site.callee, index, instantiated, &facts);
                let cached = self.memo.borrow().get(&key).cloned();
                let result = match cached {
                    Some(result) => result,
                    None => {
                        let result =
                            prove(&mut scratch, &facts, instantiated, &kinds, &self.limits);
                        self.memo.borrow_mut().insert(key, result.clone());
                        result
                    }
                };
                let guard = match result {
                    ProofResult::Unknown => Some(extract_guard(&scratch, instantiated)),
                    _ => None,
                };
                // Past this site the precondition held, either proven or
                // guard-enforced; refuted ones poison nothing downstream.
                if !matches!(result, ProofResult::Refuted(_))
                    && scratch.contains_opaque(instantiated).is_none()
                {
                    facts.push(instantiated);
                }
                assumptions.push(ConstraintVerdict {
                    kind: ConstraintKind::Assumption,
                    span: site.span,
                    text: decl.text.clone(),
                    result,
                    guard,
                });
            }

            if let Some(callee_report) = lookup(&site.callee) {
                for (decl, verdict) in callee_model
                    .guarantees
                    .iter()
                    .zip(callee_report.guarantees.iter())
                {
                    if verdict.result != ProofResult::Proven {
                        continue;
                    }
                    let transferred = callee_model.arena.transfer(decl.expr, &mut scratch);
                    let mut map = param_map.clone();
                    map.insert(strata_ast::RESULT_VAR.to_string(), site.result);
                    let instantiated = scratch.substitute(transferred, &map);
                    if scratch.contains_opaque(instantiated).is_none() {
                        facts.push(instantiated);
                    }
                }
            }

            call_sites.push(CallSiteReport {
                span: site.span,
                callee: site.callee.clone(),
                assumptions,
            });
        }

        let mut guarantee_facts = facts.clone();
        if scratch.contains_opaque(model.body).is_none() {
            let result_var = scratch.variable(strata_ast::RESULT_VAR);
            let bound = scratch.binary(BinOp::Eq, result_var, model.body);
            guarantee_facts.push(bound);
        }

        let mut guarantees = Vec::new();
        for decl in &model.guarantees {
            let result = prove(
                &mut scratch,
                &guarantee_facts,
                decl.expr,
                &kinds,
                &self.limits,
            );
            let guard = match result {
                ProofResult::Unknown => Some(extract_guard(&scratch, decl.expr)),
                _ => None,
            };
            guarantees.push(ConstraintVerdict {
                kind: ConstraintKind::Guarantee,
                span: decl.span,
                text: decl.text.clone(),
                result,
                guard,
            });
        }

        FunctionVerifyReport {
            function: model.name.clone(),
            span: model.span,
            guarantees,
            call_sites,
            stabilized: true,
        }
    }
}

fn extract_guard(scratch: &ExprArena, root: ExprId) -> GuardExpr {
    let mut arena = ExprArena::new();
    let root = scratch.transfer(root, &mut arena);
    GuardExpr { arena, root }
}

fn memo_key(
    scratch: &ExprArena,
    callee: &str,
    constraint_index: usize,
    instantiated: ExprId,
    facts: &[ExprId],
) -> String {
    let mut key = format!("{callee}#{constraint_index}|{}", render(scratch, instantiated));
    for &fact in facts {
        key.push('&');
        key.push_str(&render(scratch, fact));
    }
    key
}
