#![forbid(unsafe_code)]

//! Inversion of declared compositions.
//!
//! `invert(f >> g)` is `invert(g) >> invert(f)`: legs invert in reverse
//! order, and a failing leg fails the whole composition by name rather than
//! with a generic error.

use strata_sym::{ExprId, FunctionSymbolicModel};

use crate::invert::{invert, InverseModel, InversionResult, NonInvertibleReason, RecordTable};
use crate::oracle::DisjointnessOracle;

/// The inverse pipeline: leg inverses in application order for the inverse
/// direction (last forward leg first).
#[derive(Clone, Debug)]
pub struct CompositeInverse {
    pub name: String,
    pub legs: Vec<InverseModel>,
}

#[derive(Clone, Debug)]
pub struct CompositionFailure {
    /// The leg that could not be inverted.
    pub leg: String,
    pub node: ExprId,
    pub reason: NonInvertibleReason,
}

pub fn invert_composition(
    name: &str,
    legs: &[&FunctionSymbolicModel],
    records: &RecordTable,
    mut oracle_for: impl FnMut(&FunctionSymbolicModel) -> Box<dyn DisjointnessOracle>,
) -> Result<CompositeInverse, CompositionFailure> {
    let mut inverted = Vec::with_capacity(legs.len());
    for leg in legs.iter().rev() {
        let mut oracle = oracle_for(leg);
        match invert(leg, records, oracle.as_mut()) {
            InversionResult::Invertible(model) => inverted.push(model),
            InversionResult::NotInvertible { node, reason } => {
                return Err(CompositionFailure {
                    leg: leg.name.clone(),
                    node,
                    reason,
                });
            }
        }
    }
    Ok(CompositeInverse {
        name: name.to_string(),
        legs: inverted,
    })
}
