#![forbid(unsafe_code)]

use miette::Diagnostic;
use thiserror::Error;

/// Fatal verification outcome, reported with the source location of the
/// constraint or call site and the confirming counterexample when one
/// exists.
#[derive(Debug, Error, Diagnostic)]
#[error("verification error: {message}")]
#[diagnostic(code(strata::verify))]
pub struct VerifyError {
    pub message: String,
    #[label]
    pub span: strata_ast::Span,
    /// Rendered falsifying bindings, e.g. `b = 0, x = 10`.
    pub counterexample: Option<String>,
}
