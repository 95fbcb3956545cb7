#![forbid(unsafe_code)]

//! Source-like rendering of symbolic expressions for diagnostics, report
//! entries, and inversion failure reasons. Fully parenthesized so the text
//! is unambiguous without precedence rules.

use crate::expr::{ExprArena, ExprId, SymbolicExpr, UnaryOp, Value};

pub fn render(arena: &ExprArena, id: ExprId) -> String {
    match arena.get(id) {
        SymbolicExpr::Literal(v) => render_value(v),
        SymbolicExpr::Variable(name) => name.clone(),
        SymbolicExpr::UnaryOp(op, a) => {
            let inner = render(arena, *a);
            match op {
                UnaryOp::Neg => format!("-{inner}"),
                UnaryOp::Not => format!("!{inner}"),
            }
        }
        SymbolicExpr::BinaryOp(op, a, b) => {
            format!("({} {} {})", render(arena, *a), op.display(), render(arena, *b))
        }
        SymbolicExpr::Conditional(c, t, e) => format!(
            "(if {} then {} else {})",
            render(arena, *c),
            render(arena, *t),
            render(arena, *e)
        ),
        SymbolicExpr::FieldAccess(base, field) => format!("{}.{field}", render(arena, *base)),
        SymbolicExpr::Construct(ty, fields) => {
            let inner = fields
                .iter()
                .map(|(f, v)| format!("{f}: {}", render(arena, *v)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{ty} {{ {inner} }}")
        }
        SymbolicExpr::Call(callee, args) => {
            let inner = args
                .iter()
                .map(|a| render(arena, *a))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{callee}({inner})")
        }
        SymbolicExpr::Opaque(reason) => format!("<opaque: {}>", reason.display()),
    }
}

fn render_value(v: &Value) -> String {
    match v {
        Value::Rat(r) if !r.is_integer() => format!("({}/{})", r.numer(), r.denom()),
        Value::Rat(r) => r.to_integer().to_string(),
        other => other.display(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinOp;

    #[test]
    fn renders_nested_arithmetic_with_parens() {
        let mut arena = ExprArena::new();
        let c = arena.variable("c");
        let nine = arena.lit_int(9);
        let five = arena.lit_int(5);
        let thirty_two = arena.lit_int(32);
        let scaled = arena.binary(BinOp::Mul, c, nine);
        let divided = arena.binary(BinOp::Div, scaled, five);
        let shifted = arena.binary(BinOp::Add, divided, thirty_two);
        assert_eq!(render(&arena, shifted), "(((c * 9) / 5) + 32)");
    }

    #[test]
    fn renders_records_and_projections() {
        let mut arena = ExprArena::new();
        let p = arena.variable("p");
        let x = arena.field_access(p, "x");
        let rec = arena.construct("Point", vec![("x".to_string(), x)]);
        assert_eq!(render(&arena, rec), "Point { x: p.x }");
    }
}
