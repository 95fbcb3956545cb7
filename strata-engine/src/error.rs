#![forbid(unsafe_code)]

use miette::Diagnostic;
use strata_ast::Span;
use thiserror::Error;

/// Fatal analysis outcomes. Each carries the source location it blames and,
/// for refutations, the concrete falsifying bindings.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(
        "call to `{callee}` can never satisfy its precondition `{constraint}` \
         (counterexample: {counterexample})"
    )]
    #[diagnostic(code(strata::verify::assumption))]
    RefutedAssumption {
        callee: String,
        constraint: String,
        counterexample: String,
        #[label("assumption refuted at this call")]
        span: Span,
    },

    #[error(
        "`{function}` can never meet its guarantee `{constraint}` \
         (counterexample: {counterexample})"
    )]
    #[diagnostic(code(strata::verify::guarantee))]
    RefutedGuarantee {
        function: String,
        constraint: String,
        counterexample: String,
        #[label("guarantee refuted")]
        span: Span,
    },

    #[error("`{function}` is tagged reversible but `{node}` cannot be inverted: {reason}")]
    #[diagnostic(code(strata::invert))]
    NotReversible {
        function: String,
        /// Rendered text of the first offending node.
        node: String,
        reason: String,
        #[label("inversion fails inside this function")]
        span: Span,
    },

    #[error("composition `{name}` is not invertible: leg `{leg}` fails: {reason}")]
    #[diagnostic(code(strata::invert::composition))]
    CompositionNotInvertible {
        name: String,
        leg: String,
        reason: String,
        #[label("declared here")]
        span: Span,
    },
}
