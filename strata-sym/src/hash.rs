#![forbid(unsafe_code)]

//! Structural content hashing of function models.
//!
//! The hash covers the expression graph reachable from the body and every
//! declared constraint, plus parameters and the reversibility tag. Inlined
//! callee bodies are part of the graph, so a change to any transitively
//! inlined function changes the hash, which is exactly the invalidation
//! rule the incremental cache needs.

use std::collections::HashMap;

use sha2::Digest;
use strata_ast::ReversibilityTag;

use crate::expr::{ExprArena, ExprId, SymbolicExpr, Value};
use crate::model::{Constraint, ParamSym};

pub fn content_hash(
    arena: &ExprArena,
    body: ExprId,
    params: &[ParamSym],
    assumes: &[Constraint],
    guarantees: &[Constraint],
    tag: ReversibilityTag,
) -> String {
    let mut enc = Encoder {
        arena,
        order: HashMap::new(),
        lines: Vec::new(),
    };
    let body_n = enc.number(body);
    let assume_ns: Vec<usize> = assumes.iter().map(|c| enc.number(c.expr)).collect();
    let guarantee_ns: Vec<usize> = guarantees.iter().map(|c| enc.number(c.expr)).collect();

    let mut hasher = sha2::Sha256::new();
    for line in &enc.lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(format!("body {body_n}\n").as_bytes());
    for n in assume_ns {
        hasher.update(format!("assume {n}\n").as_bytes());
    }
    for n in guarantee_ns {
        hasher.update(format!("guarantee {n}\n").as_bytes());
    }
    for p in params {
        hasher.update(format!("param {} {}\n", p.name, p.ty.display()).as_bytes());
    }
    let tag_str = match tag {
        ReversibilityTag::Reversible => "reversible",
        ReversibilityTag::Lossy => "lossy",
        ReversibilityTag::Unmarked => "unmarked",
    };
    hasher.update(format!("tag {tag_str}\n").as_bytes());
    hex::encode(hasher.finalize())
}

struct Encoder<'a> {
    arena: &'a ExprArena,
    /// Post-order number of each reachable node.
    order: HashMap<ExprId, usize>,
    lines: Vec<String>,
}

impl<'a> Encoder<'a> {
    fn number(&mut self, id: ExprId) -> usize {
        if let Some(&n) = self.order.get(&id) {
            return n;
        }
        let line = match self.arena.get(id) {
            SymbolicExpr::Literal(v) => format!("lit {}", encode_value(v)),
            SymbolicExpr::Variable(name) => format!("var {name}"),
            SymbolicExpr::Opaque(reason) => format!("opaque {reason:?}"),
            SymbolicExpr::UnaryOp(op, a) => {
                let a = self.number(*a);
                format!("un {op:?} {a}")
            }
            SymbolicExpr::BinaryOp(op, a, b) => {
                let (a, b) = (self.number(*a), self.number(*b));
                format!("bin {op:?} {a} {b}")
            }
            SymbolicExpr::Conditional(c, t, e) => {
                let (c, t, e) = (self.number(*c), self.number(*t), self.number(*e));
                format!("cond {c} {t} {e}")
            }
            SymbolicExpr::FieldAccess(base, field) => {
                let base = self.number(*base);
                format!("field {base} {field}")
            }
            SymbolicExpr::Construct(ty, fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(f, v)| format!("{f}={}", self.number(*v)))
                    .collect();
                format!("construct {ty} {}", parts.join(" "))
            }
            SymbolicExpr::Call(callee, args) => {
                let parts: Vec<String> =
                    args.iter().map(|a| self.number(*a).to_string()).collect();
                format!("call {callee} {}", parts.join(" "))
            }
        };
        let n = self.lines.len();
        self.lines.push(line);
        self.order.insert(id, n);
        n
    }
}

fn encode_value(v: &Value) -> String {
    match v {
        Value::Int(n) => format!("i:{n}"),
        Value::Rat(r) => format!("r:{}/{}", r.numer(), r.denom()),
        Value::Bool(b) => format!("b:{b}"),
        Value::Str(s) => format!("s:{s:?}"),
        Value::Record(name, fields) => {
            let inner: Vec<String> = fields
                .iter()
                .map(|(f, v)| format!("{f}={}", encode_value(v)))
                .collect();
            format!("rec:{name}:{}", inner.join(","))
        }
    }
}
