#![forbid(unsafe_code)]

pub mod counterexample;
pub mod disjoint;
pub mod fm;
pub mod formula;
pub mod interproc;
pub mod linear;
pub mod prove;
pub mod solver;

pub use counterexample::{render_bindings, typed_bindings, TypedBinding};
pub use disjoint::branches_disjoint;
pub use fm::{Feasibility, NumKind, VarKinds};
pub use interproc::{
    CallSiteReport, ConstraintVerdict, FunctionVerifyReport, GuardExpr, Propagator,
};
pub use prove::{prove, satisfiable, var_kinds, Counterexample, ProofResult, SatOutcome, VerifyLimits};
pub use solver::VerifyError;
