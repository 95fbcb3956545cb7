#![forbid(unsafe_code)]

//! Structured analysis reporting for build summaries.

use std::collections::BTreeMap;

use serde::Serialize;
use strata_ast::Span;
use strata_invert::{CompositeInverse, InverseModel};
use strata_verify::GuardExpr;

use crate::error::EngineError;

#[derive(Clone, Copy, Debug, Serialize)]
pub struct SpanRange {
    pub offset: usize,
    pub len: usize,
}

impl From<Span> for SpanRange {
    fn from(s: Span) -> Self {
        Self {
            offset: s.offset(),
            len: s.len(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ConstraintOutcome {
    Proven,
    /// Undecided statically; a runtime guard is inserted.
    Guarded,
    Refuted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, serde::Deserialize)]
pub enum GuardKind {
    AssumptionViolation,
    GuaranteeViolation,
}

/// One `{location, constraint text, outcome}` row for build reporting.
#[derive(Clone, Debug, Serialize)]
pub struct ConstraintEntry {
    pub function: String,
    /// Callee for a call-site assumption; absent for guarantees.
    pub callee: Option<String>,
    pub kind: GuardKind,
    pub span: SpanRange,
    pub text: String,
    pub outcome: ConstraintOutcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum InversionOutcome {
    Inverted,
    Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct InversionEntry {
    pub function: String,
    pub target: Option<String>,
    pub outcome: InversionOutcome,
    /// Failure reason, when failed.
    pub detail: Option<String>,
}

/// What codegen must emit for an `Unknown` constraint: evaluate `guard`,
/// raise `kind` when it is false.
#[derive(Clone, Debug, Serialize)]
pub struct GuardRequest {
    pub function: String,
    pub span: SpanRange,
    pub kind: GuardKind,
    pub text: String,
    pub guard: GuardExpr,
}

#[derive(Clone, Debug, Serialize)]
pub struct EngineWarning {
    pub function: String,
    pub message: String,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct BuildSummary {
    pub proven_constraints: usize,
    pub guarded_constraints: usize,
    pub refuted_constraints: usize,
    pub inverted_functions: usize,
    pub failed_inversions: usize,
    pub unstable_components: usize,
}

impl BuildSummary {
    /// Human-readable rendering for build output.
    pub fn render(&self) -> String {
        format!(
            "{} proven, {} runtime-checked, {} refuted; {} inverted, {} inversion failure(s){}",
            self.proven_constraints,
            self.guarded_constraints,
            self.refuted_constraints,
            self.inverted_functions,
            self.failed_inversions,
            if self.unstable_components > 0 {
                format!("; {} unstable cyclic component(s)", self.unstable_components)
            } else {
                String::new()
            }
        )
    }
}

/// Everything the pass hands to codegen and build reporting.
#[derive(Debug, Default)]
pub struct AnalysisReport {
    pub constraints: Vec<ConstraintEntry>,
    pub inversions: Vec<InversionEntry>,
    pub guards: Vec<GuardRequest>,
    /// Derived inverse bodies, ready for ordinary codegen.
    pub inverses: BTreeMap<String, InverseModel>,
    pub composites: BTreeMap<String, CompositeInverse>,
    pub warnings: Vec<EngineWarning>,
    pub errors: Vec<EngineError>,
    pub summary: BuildSummary,
}

impl AnalysisReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_renders_counts() {
        let summary = BuildSummary {
            proven_constraints: 3,
            guarded_constraints: 1,
            refuted_constraints: 0,
            inverted_functions: 2,
            failed_inversions: 1,
            unstable_components: 0,
        };
        let text = summary.render();
        assert!(text.contains("3 proven"));
        assert!(text.contains("1 runtime-checked"));
        assert!(text.contains("2 inverted"));
        assert!(!text.contains("unstable"));
    }
}
