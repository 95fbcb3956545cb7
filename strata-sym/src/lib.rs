#![forbid(unsafe_code)]

pub mod build;
pub mod eval;
pub mod expr;
pub mod fmt;
pub mod hash;
pub mod model;

pub use build::{build, BuildLimits};
pub use eval::{eval, EvalError};
pub use expr::{BinOp, ExprArena, ExprId, OpaqueReason, SymbolicExpr, UnaryOp, Value};
pub use fmt::render;
pub use hash::content_hash;
pub use model::{CallSite, Constraint, ConstraintKind, FunctionSymbolicModel, ParamSym};
