#![forbid(unsafe_code)]

pub mod compose;
pub mod invert;
pub mod oracle;

pub use compose::{invert_composition, CompositeInverse, CompositionFailure};
pub use invert::{
    invert, invert_for, InverseModel, InversionResult, NonInvertibleReason, RecordTable,
};
pub use oracle::{DisjointnessOracle, LinearDisjointness, NoDisjointness};
