#![forbid(unsafe_code)]

//! The pass driver: models, call graph, parallel verification, inversion,
//! and report assembly.
//!
//! Verification runs level by level over the call-graph condensation;
//! components on one level are independent and analyzed in parallel, and
//! every map is keyed by function name, so the final report is identical
//! regardless of thread scheduling.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rayon::prelude::*;
use strata_ast::{Program, ReversibilityTag};
use strata_invert::{
    invert, invert_composition, InversionResult, LinearDisjointness, NonInvertibleReason,
    RecordTable,
};
use strata_sym::{build, BuildLimits, FunctionSymbolicModel};
use strata_verify::{
    typed_bindings, Counterexample, FunctionVerifyReport, ProofResult, Propagator, VerifyLimits,
};

use crate::cache::{
    cache_key, entry_from_report, records_hash, report_from_entry, CachedInversion,
    IncrementalCache,
};
use crate::callgraph;
use crate::error::EngineError;
use crate::report::{
    AnalysisReport, ConstraintEntry, ConstraintOutcome, EngineWarning, GuardKind, GuardRequest,
    InversionEntry, InversionOutcome,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalysisProfile {
    /// Tight budgets for interactive builds.
    Fast,
    /// CI-friendly budgets.
    Ci,
    /// Generous budgets; longer compiles, fewer Unknowns.
    Thorough,
}

impl AnalysisProfile {
    pub fn build_limits(&self) -> BuildLimits {
        match self {
            AnalysisProfile::Fast => BuildLimits {
                max_inline_depth: 2,
                max_nodes: 2048,
            },
            AnalysisProfile::Ci => BuildLimits::default(),
            AnalysisProfile::Thorough => BuildLimits {
                max_inline_depth: 4,
                max_nodes: 16384,
            },
        }
    }

    pub fn verify_limits(&self) -> VerifyLimits {
        match self {
            AnalysisProfile::Fast => VerifyLimits {
                max_atoms: 256,
                max_cases: 32,
                max_fixpoint_rounds: 3,
            },
            AnalysisProfile::Ci => VerifyLimits::default(),
            AnalysisProfile::Thorough => VerifyLimits {
                max_atoms: 2048,
                max_cases: 256,
                max_fixpoint_rounds: 6,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub profile: AnalysisProfile,
    /// Enables the cross-build cache when set.
    pub cache_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: AnalysisProfile::Ci,
            cache_path: None,
        }
    }
}

/// Either way the engine learned an inversion outcome, the report needs the
/// same two shapes.
enum InversionSummary {
    Inverted(strata_invert::InverseModel),
    Failed {
        node: String,
        reason: NonInvertibleReason,
    },
}

pub fn analyze_program(program: &Program, config: &EngineConfig) -> AnalysisReport {
    let build_limits = config.profile.build_limits();
    let verify_limits = config.profile.verify_limits();

    let models: BTreeMap<String, FunctionSymbolicModel> = program
        .functions
        .par_iter()
        .map(|def| (def.name.node.clone(), build(def, program, &build_limits)))
        .collect::<Vec<_>>()
        .into_iter()
        .collect();

    let records = RecordTable::from_program(program);
    let rec_hash = records_hash(program);
    let mut cache = config
        .cache_path
        .as_deref()
        .map(IncrementalCache::load);
    let keys: BTreeMap<String, String> = models
        .keys()
        .map(|name| (name.clone(), cache_key(name, &models, &rec_hash)))
        .collect();

    // Verification, callee components first, siblings in parallel.
    let components = callgraph::components(&models);
    let staged = callgraph::levels(&components, &models);
    let mut reports: BTreeMap<String, FunctionVerifyReport> = BTreeMap::new();
    for level in &staged {
        let finished = &reports;
        let results: Vec<BTreeMap<String, FunctionVerifyReport>> = level
            .par_iter()
            .map(|component| {
                if let Some(hit) = cached_component(component, cache.as_ref(), &keys, &models) {
                    return hit;
                }
                Propagator::new(&models, verify_limits).verify_component(component, finished)
            })
            .collect();
        for result in results {
            reports.extend(result);
        }
    }

    // Inversion of tagged-reversible functions, independent and parallel.
    let mut reversible: Vec<&FunctionSymbolicModel> = models
        .values()
        .filter(|m| m.tag == ReversibilityTag::Reversible)
        .collect();
    reversible.sort_by(|a, b| a.name.cmp(&b.name));
    let inversions: BTreeMap<String, InversionSummary> = reversible
        .par_iter()
        .map(|model| {
            let summary = cached_inversion(model, cache.as_ref(), &keys).unwrap_or_else(|| {
                let mut oracle = LinearDisjointness::for_model(model, verify_limits);
                match invert(model, &records, &mut oracle) {
                    InversionResult::Invertible(inverse) => InversionSummary::Inverted(inverse),
                    InversionResult::NotInvertible { node, reason } => InversionSummary::Failed {
                        node: strata_sym::render(&model.arena, node),
                        reason,
                    },
                }
            });
            (model.name.clone(), summary)
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect();

    let mut report = AnalysisReport::default();
    collect_verification(&mut report, &reports, &models);
    collect_inversions(&mut report, &models, &inversions);
    collect_compositions(&mut report, program, &models, &records, verify_limits);

    if let Some(cache) = &mut cache {
        for (name, function_report) in &reports {
            let inversion = inversions.get(name).map(|summary| match summary {
                InversionSummary::Inverted(inverse) => CachedInversion::Inverted(inverse.clone()),
                InversionSummary::Failed { node, reason } => CachedInversion::Failed {
                    node: node.clone(),
                    reason: reason.clone(),
                },
            });
            cache.insert(keys[name].clone(), entry_from_report(function_report, inversion));
        }
        if let Err(message) = cache.save() {
            report.warnings.push(EngineWarning {
                function: String::new(),
                message: format!("incremental cache not written: {message}"),
            });
        }
    }

    report
}

fn cached_component(
    component: &[String],
    cache: Option<&IncrementalCache>,
    keys: &BTreeMap<String, String>,
    models: &BTreeMap<String, FunctionSymbolicModel>,
) -> Option<BTreeMap<String, FunctionVerifyReport>> {
    let cache = cache?;
    let mut out = BTreeMap::new();
    for name in component {
        let entry = cache.get(&keys[name])?;
        let report = report_from_entry(&models[name], entry)?;
        out.insert(name.clone(), report);
    }
    Some(out)
}

fn cached_inversion(
    model: &FunctionSymbolicModel,
    cache: Option<&IncrementalCache>,
    keys: &BTreeMap<String, String>,
) -> Option<InversionSummary> {
    let entry = cache?.get(&keys[&model.name])?;
    match entry.inversion.as_ref()? {
        CachedInversion::Inverted(inverse) => {
            Some(InversionSummary::Inverted(inverse.clone()))
        }
        CachedInversion::Failed { node, reason } => Some(InversionSummary::Failed {
            node: node.clone(),
            reason: reason.clone(),
        }),
    }
}

fn collect_verification(
    report: &mut AnalysisReport,
    reports: &BTreeMap<String, FunctionVerifyReport>,
    models: &BTreeMap<String, FunctionSymbolicModel>,
) {
    for (name, fr) in reports {
        let model = &models[name];
        if !fr.stabilized {
            report.summary.unstable_components += 1;
            report.warnings.push(EngineWarning {
                function: name.clone(),
                message: "cyclic call-graph component did not stabilize within the round cap; \
                          undecided constraints fall back to runtime guards"
                    .to_string(),
            });
        }

        for verdict in &fr.guarantees {
            push_constraint(
                report,
                name,
                model,
                None,
                GuardKind::GuaranteeViolation,
                verdict,
            );
        }
        for site in &fr.call_sites {
            for verdict in &site.assumptions {
                push_constraint(
                    report,
                    name,
                    model,
                    Some(site.callee.clone()),
                    GuardKind::AssumptionViolation,
                    verdict,
                );
            }
        }
    }
}

/// Counterexample bindings mapped back to source-level form, with the
/// caller's declared parameter types.
fn render_counterexample(cx: &Counterexample, model: &FunctionSymbolicModel) -> String {
    let bindings = typed_bindings(cx, model);
    if bindings.is_empty() {
        return "constraint is identically false".to_string();
    }
    bindings
        .iter()
        .map(|b| format!("{}: {} = {}", b.name, b.ty, b.value))
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_constraint(
    report: &mut AnalysisReport,
    function: &str,
    model: &FunctionSymbolicModel,
    callee: Option<String>,
    kind: GuardKind,
    verdict: &strata_verify::ConstraintVerdict,
) {
    let outcome = match &verdict.result {
        ProofResult::Proven => ConstraintOutcome::Proven,
        ProofResult::Unknown => ConstraintOutcome::Guarded,
        ProofResult::Refuted(_) => ConstraintOutcome::Refuted,
    };
    report.constraints.push(ConstraintEntry {
        function: function.to_string(),
        callee: callee.clone(),
        kind,
        span: verdict.span.into(),
        text: verdict.text.clone(),
        outcome,
    });

    match &verdict.result {
        ProofResult::Proven => report.summary.proven_constraints += 1,
        ProofResult::Unknown => {
            report.summary.guarded_constraints += 1;
            if let Some(guard) = &verdict.guard {
                report.guards.push(GuardRequest {
                    function: function.to_string(),
                    span: verdict.span.into(),
                    kind,
                    text: verdict.text.clone(),
                    guard: guard.clone(),
                });
            }
            report.warnings.push(EngineWarning {
                function: function.to_string(),
                message: match &callee {
                    Some(callee) => format!(
                        "assumption `{}` of `{callee}` could not be decided; runtime guard inserted",
                        verdict.text
                    ),
                    None => format!(
                        "guarantee `{}` could not be decided; runtime guard inserted",
                        verdict.text
                    ),
                },
            });
        }
        ProofResult::Refuted(cx) => {
            report.summary.refuted_constraints += 1;
            report.errors.push(match callee {
                Some(callee) => EngineError::RefutedAssumption {
                    callee,
                    constraint: verdict.text.clone(),
                    counterexample: render_counterexample(cx, model),
                    span: verdict.span,
                },
                None => EngineError::RefutedGuarantee {
                    function: function.to_string(),
                    constraint: verdict.text.clone(),
                    counterexample: render_counterexample(cx, model),
                    span: verdict.span,
                },
            });
        }
    }
}

fn collect_inversions(
    report: &mut AnalysisReport,
    models: &BTreeMap<String, FunctionSymbolicModel>,
    inversions: &BTreeMap<String, InversionSummary>,
) {
    for (name, summary) in inversions {
        let model = &models[name];
        let target = model.params.first().map(|p| p.name.clone());
        match summary {
            InversionSummary::Inverted(inverse) => {
                report.summary.inverted_functions += 1;
                report.inversions.push(InversionEntry {
                    function: name.clone(),
                    target,
                    outcome: InversionOutcome::Inverted,
                    detail: None,
                });
                report.inverses.insert(name.clone(), inverse.clone());
            }
            InversionSummary::Failed { node, reason } => {
                report.summary.failed_inversions += 1;
                report.inversions.push(InversionEntry {
                    function: name.clone(),
                    target,
                    outcome: InversionOutcome::Failed,
                    detail: Some(reason.display()),
                });
                report.errors.push(EngineError::NotReversible {
                    function: name.clone(),
                    node: node.clone(),
                    reason: reason.display(),
                    span: model.span,
                });
            }
        }
    }
}

fn collect_compositions(
    report: &mut AnalysisReport,
    program: &Program,
    models: &BTreeMap<String, FunctionSymbolicModel>,
    records: &RecordTable,
    verify_limits: VerifyLimits,
) {
    for def in &program.compositions {
        let name = def.name.node.clone();
        let mut legs = Vec::with_capacity(def.legs.len());
        let mut missing = None;
        for leg in &def.legs {
            match models.get(&leg.node) {
                Some(model) => legs.push(model),
                None => {
                    missing = Some(leg.node.clone());
                    break;
                }
            }
        }
        if let Some(leg) = missing {
            report.summary.failed_inversions += 1;
            report.errors.push(EngineError::CompositionNotInvertible {
                name,
                reason: format!("leg `{leg}` is not defined"),
                leg,
                span: def.span,
            });
            continue;
        }

        match invert_composition(&name, &legs, records, |model| {
            Box::new(LinearDisjointness::for_model(model, verify_limits))
        }) {
            Ok(composite) => {
                report.summary.inverted_functions += 1;
                report.inversions.push(InversionEntry {
                    function: name.clone(),
                    target: None,
                    outcome: InversionOutcome::Inverted,
                    detail: None,
                });
                report.composites.insert(name, composite);
            }
            Err(failure) => {
                report.summary.failed_inversions += 1;
                report.inversions.push(InversionEntry {
                    function: name.clone(),
                    target: None,
                    outcome: InversionOutcome::Failed,
                    detail: Some(format!(
                        "leg `{}`: {}",
                        failure.leg,
                        failure.reason.display()
                    )),
                });
                report.errors.push(EngineError::CompositionNotInvertible {
                    name,
                    leg: failure.leg,
                    reason: failure.reason.display(),
                    span: def.span,
                });
            }
        }
    }
}
