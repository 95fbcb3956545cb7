#![forbid(unsafe_code)]

//! Mapping counterexample witnesses back to source-level bindings for
//! diagnostics. Ordering is by variable name so repeated runs render
//! identically.

use strata_sym::FunctionSymbolicModel;

use crate::prove::Counterexample;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypedBinding {
    pub name: String,
    pub ty: String,
    pub value: String,
}

pub fn typed_bindings(cx: &Counterexample, model: &FunctionSymbolicModel) -> Vec<TypedBinding> {
    cx.bindings
        .iter()
        .map(|(name, value)| {
            let ty = if name == strata_ast::RESULT_VAR {
                model.ret_ty.display()
            } else {
                model
                    .param(name)
                    .map(|p| p.ty.display())
                    .unwrap_or_else(|| "?".to_string())
            };
            TypedBinding {
                name: name.clone(),
                ty,
                value: value.display(),
            }
        })
        .collect()
}

pub fn render_bindings(cx: &Counterexample) -> String {
    if cx.bindings.is_empty() {
        // Variable-free constraints refute without an assignment.
        return "constraint is identically false".to_string();
    }
    cx.bindings
        .iter()
        .map(|(name, value)| format!("{name} = {}", value.display()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_sym::Value;

    #[test]
    fn bindings_render_in_name_order() {
        let cx = Counterexample {
            bindings: vec![
                ("a".to_string(), Value::int(1)),
                ("b".to_string(), Value::int(0)),
            ],
        };
        assert_eq!(render_bindings(&cx), "a = 1, b = 0");
    }
}
