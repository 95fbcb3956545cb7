#![forbid(unsafe_code)]

pub mod cache;
pub mod callgraph;
pub mod engine;
pub mod error;
pub mod report;

pub use cache::IncrementalCache;
pub use engine::{analyze_program, AnalysisProfile, EngineConfig};
pub use error::EngineError;
pub use report::{
    AnalysisReport, BuildSummary, ConstraintEntry, ConstraintOutcome, EngineWarning, GuardKind,
    GuardRequest, InversionEntry, InversionOutcome, SpanRange,
};
