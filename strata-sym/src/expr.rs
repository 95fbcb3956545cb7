#![forbid(unsafe_code)]

//! The symbolic expression substrate.
//!
//! Expressions are immutable nodes in a hash-consed arena: interning a node
//! that is structurally identical to an existing one returns the existing
//! id, so equality of subgraphs is id equality and memory is bounded by the
//! number of distinct subexpressions. Children must be interned before their
//! parents, which makes every graph acyclic by construction.

use std::collections::{BTreeSet, HashMap};

use num_bigint::BigInt;
use num_rational::BigRational;
use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ExprId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,
}

impl BinOp {
    pub fn display(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

/// A concrete value. `Literal` nodes only ever hold the scalar variants;
/// `Record` values arise during concrete evaluation of `Construct` nodes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Int(BigInt),
    Rat(BigRational),
    Bool(bool),
    Str(String),
    Record(String, Vec<(String, Value)>),
}

impl Value {
    pub fn int(n: i64) -> Self {
        Value::Int(BigInt::from(n))
    }

    pub fn rat(num: i64, den: i64) -> Self {
        Value::Rat(BigRational::new(BigInt::from(num), BigInt::from(den)))
    }

    /// Collapse a denominator-1 rational back to an integer. Keeps `Div`
    /// exact without leaking rationals into integer-typed results.
    pub fn normalized(self) -> Self {
        match self {
            Value::Rat(r) if r.is_integer() => Value::Int(r.to_integer()),
            other => other,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Value::Int(n) => n.to_string(),
            Value::Rat(r) => format!("{}/{}", r.numer(), r.denom()),
            Value::Bool(b) => b.to_string(),
            Value::Str(s) => format!("{s:?}"),
            Value::Record(name, fields) => {
                let inner = fields
                    .iter()
                    .map(|(f, v)| format!("{f}: {}", v.display()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{name} {{ {inner} }}")
            }
        }
    }
}

/// Why a node is opaque to further reasoning. Opaque leaves are terminal for
/// both verification (`Unknown`) and inversion (`NotInvertible`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpaqueReason {
    /// The underlying computation performs effects.
    Effectful,
    /// Call to a function the program does not define.
    UnknownCallee(String),
    /// Call that would re-enter a function already being inlined.
    RecursiveCall(String),
    /// Call beyond the configured inlining depth.
    InlineDepthExceeded(String),
    /// The arena hit its node budget while building.
    NodeBudgetExceeded,
    /// A loop whose iteration count is not statically bounded.
    UnboundedLoop,
}

impl OpaqueReason {
    pub fn display(&self) -> String {
        match self {
            OpaqueReason::Effectful => "effectful computation".to_string(),
            OpaqueReason::UnknownCallee(name) => format!("call to unknown function `{name}`"),
            OpaqueReason::RecursiveCall(name) => format!("recursive call to `{name}`"),
            OpaqueReason::InlineDepthExceeded(name) => {
                format!("call to `{name}` beyond the inlining depth")
            }
            OpaqueReason::NodeBudgetExceeded => "expression graph budget exceeded".to_string(),
            OpaqueReason::UnboundedLoop => "loop without a static bound".to_string(),
        }
    }
}

/// One node of the symbolic graph. A closed set: every analysis matches
/// exhaustively, so adding a variant fails to compile until each consumer
/// decides how to treat it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolicExpr {
    Literal(Value),
    Variable(String),
    UnaryOp(UnaryOp, ExprId),
    BinaryOp(BinOp, ExprId, ExprId),
    Conditional(ExprId, ExprId, ExprId),
    FieldAccess(ExprId, String),
    /// Record construction; field order is declaration order.
    Construct(String, Vec<(String, ExprId)>),
    /// A call that survived inlining (externally registered, not expanded).
    Call(String, Vec<ExprId>),
    Opaque(OpaqueReason),
}

/// Append-only, deduplicating node store. `ExprId` is an index into `nodes`.
/// Serializes as the bare node list; the dedup index is rebuilt on load.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<SymbolicExpr>", into = "Vec<SymbolicExpr>")]
pub struct ExprArena {
    nodes: Vec<SymbolicExpr>,
    index: HashMap<SymbolicExpr, ExprId>,
}

impl From<Vec<SymbolicExpr>> for ExprArena {
    fn from(nodes: Vec<SymbolicExpr>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), ExprId(i as u32)))
            .collect();
        Self { nodes, index }
    }
}

impl From<ExprArena> for Vec<SymbolicExpr> {
    fn from(arena: ExprArena) -> Self {
        arena.nodes
    }
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: ExprId) -> &SymbolicExpr {
        &self.nodes[id.0 as usize]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (ExprId, &SymbolicExpr)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (ExprId(i as u32), n))
    }

    /// Intern a node, returning the existing id when an identical node is
    /// already present. Child ids must already be valid in this arena.
    pub fn intern(&mut self, node: SymbolicExpr) -> ExprId {
        debug_assert!(self.children_of(&node).iter().all(|c| (c.0 as usize) < self.nodes.len()));
        if let Some(&id) = self.index.get(&node) {
            return id;
        }
        let id = ExprId(self.nodes.len() as u32);
        self.index.insert(node.clone(), id);
        self.nodes.push(node);
        id
    }

    fn children_of(&self, node: &SymbolicExpr) -> Vec<ExprId> {
        match node {
            SymbolicExpr::Literal(_) | SymbolicExpr::Variable(_) | SymbolicExpr::Opaque(_) => {
                Vec::new()
            }
            SymbolicExpr::UnaryOp(_, a) => vec![*a],
            SymbolicExpr::BinaryOp(_, a, b) => vec![*a, *b],
            SymbolicExpr::Conditional(c, t, e) => vec![*c, *t, *e],
            SymbolicExpr::FieldAccess(base, _) => vec![*base],
            SymbolicExpr::Construct(_, fields) => fields.iter().map(|(_, id)| *id).collect(),
            SymbolicExpr::Call(_, args) => args.clone(),
        }
    }

    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        self.children_of(self.get(id))
    }

    pub fn lit_int(&mut self, n: i64) -> ExprId {
        self.intern(SymbolicExpr::Literal(Value::int(n)))
    }

    pub fn lit_big(&mut self, n: BigInt) -> ExprId {
        self.intern(SymbolicExpr::Literal(Value::Int(n)))
    }

    pub fn lit_rat(&mut self, r: BigRational) -> ExprId {
        self.intern(SymbolicExpr::Literal(Value::Rat(r)))
    }

    pub fn lit_bool(&mut self, b: bool) -> ExprId {
        self.intern(SymbolicExpr::Literal(Value::Bool(b)))
    }

    pub fn variable(&mut self, name: &str) -> ExprId {
        self.intern(SymbolicExpr::Variable(name.to_string()))
    }

    pub fn unary(&mut self, op: UnaryOp, operand: ExprId) -> ExprId {
        self.intern(SymbolicExpr::UnaryOp(op, operand))
    }

    pub fn binary(&mut self, op: BinOp, left: ExprId, right: ExprId) -> ExprId {
        self.intern(SymbolicExpr::BinaryOp(op, left, right))
    }

    pub fn conditional(&mut self, cond: ExprId, then_e: ExprId, else_e: ExprId) -> ExprId {
        self.intern(SymbolicExpr::Conditional(cond, then_e, else_e))
    }

    pub fn field_access(&mut self, base: ExprId, field: &str) -> ExprId {
        self.intern(SymbolicExpr::FieldAccess(base, field.to_string()))
    }

    pub fn construct(&mut self, type_name: &str, fields: Vec<(String, ExprId)>) -> ExprId {
        self.intern(SymbolicExpr::Construct(type_name.to_string(), fields))
    }

    pub fn call(&mut self, callee: &str, args: Vec<ExprId>) -> ExprId {
        self.intern(SymbolicExpr::Call(callee.to_string(), args))
    }

    pub fn opaque(&mut self, reason: OpaqueReason) -> ExprId {
        self.intern(SymbolicExpr::Opaque(reason))
    }

    /// All variable names reachable from `root`.
    pub fn free_vars(&self, root: ExprId) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if seen[id.0 as usize] {
                continue;
            }
            seen[id.0 as usize] = true;
            if let SymbolicExpr::Variable(name) = self.get(id) {
                out.insert(name.clone());
            }
            stack.extend(self.children(id));
        }
        out
    }

    /// Does the subgraph under `root` mention `var`?
    pub fn references(&self, root: ExprId, var: &str) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if seen[id.0 as usize] {
                continue;
            }
            seen[id.0 as usize] = true;
            if let SymbolicExpr::Variable(name) = self.get(id) {
                if name == var {
                    return true;
                }
            }
            stack.extend(self.children(id));
        }
        false
    }

    /// Does the subgraph under `root` contain an `Opaque` node?
    pub fn contains_opaque(&self, root: ExprId) -> Option<(ExprId, OpaqueReason)> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if seen[id.0 as usize] {
                continue;
            }
            seen[id.0 as usize] = true;
            if let SymbolicExpr::Opaque(reason) = self.get(id) {
                return Some((id, reason.clone()));
            }
            stack.extend(self.children(id));
        }
        None
    }

    /// Rebuild the subgraph under `root` with variables replaced per `map`.
    /// Analyses never patch graphs in place; substitution interns new nodes.
    pub fn substitute(&mut self, root: ExprId, map: &HashMap<String, ExprId>) -> ExprId {
        let mut memo: HashMap<ExprId, ExprId> = HashMap::new();
        self.substitute_rec(root, map, &mut memo)
    }

    fn substitute_rec(
        &mut self,
        id: ExprId,
        map: &HashMap<String, ExprId>,
        memo: &mut HashMap<ExprId, ExprId>,
    ) -> ExprId {
        if let Some(&done) = memo.get(&id) {
            return done;
        }
        let node = self.get(id).clone();
        let out = match node {
            SymbolicExpr::Variable(ref name) => match map.get(name) {
                Some(&replacement) => replacement,
                None => id,
            },
            SymbolicExpr::Literal(_) | SymbolicExpr::Opaque(_) => id,
            SymbolicExpr::UnaryOp(op, a) => {
                let a2 = self.substitute_rec(a, map, memo);
                self.intern(SymbolicExpr::UnaryOp(op, a2))
            }
            SymbolicExpr::BinaryOp(op, a, b) => {
                let a2 = self.substitute_rec(a, map, memo);
                let b2 = self.substitute_rec(b, map, memo);
                self.intern(SymbolicExpr::BinaryOp(op, a2, b2))
            }
            SymbolicExpr::Conditional(c, t, e) => {
                let c2 = self.substitute_rec(c, map, memo);
                let t2 = self.substitute_rec(t, map, memo);
                let e2 = self.substitute_rec(e, map, memo);
                self.intern(SymbolicExpr::Conditional(c2, t2, e2))
            }
            SymbolicExpr::FieldAccess(base, ref field) => {
                let b2 = self.substitute_rec(base, map, memo);
                let field = field.clone();
                self.intern(SymbolicExpr::FieldAccess(b2, field))
            }
            SymbolicExpr::Construct(ref ty, ref fields) => {
                let ty = ty.clone();
                let fields = fields.clone();
                let fields2 = fields
                    .into_iter()
                    .map(|(f, v)| (f, self.substitute_rec(v, map, memo)))
                    .collect();
                self.intern(SymbolicExpr::Construct(ty, fields2))
            }
            SymbolicExpr::Call(ref callee, ref args) => {
                let callee = callee.clone();
                let args = args.clone();
                let args2 = args
                    .into_iter()
                    .map(|a| self.substitute_rec(a, map, memo))
                    .collect();
                self.intern(SymbolicExpr::Call(callee, args2))
            }
        };
        memo.insert(id, out);
        out
    }

    /// Rebuild the subgraph under `root` with every occurrence of the node
    /// `target` replaced by `replacement`. Like `substitute`, this interns
    /// new nodes and leaves the original graph intact.
    pub fn replace_node(&mut self, root: ExprId, target: ExprId, replacement: ExprId) -> ExprId {
        let mut memo = HashMap::new();
        self.replace_node_rec(root, target, replacement, &mut memo)
    }

    fn replace_node_rec(
        &mut self,
        root: ExprId,
        target: ExprId,
        replacement: ExprId,
        memo: &mut HashMap<ExprId, ExprId>,
    ) -> ExprId {
        if root == target {
            return replacement;
        }
        if let Some(&done) = memo.get(&root) {
            return done;
        }
        let node = self.get(root).clone();
        let out = match node {
            SymbolicExpr::Literal(_) | SymbolicExpr::Variable(_) | SymbolicExpr::Opaque(_) => root,
            SymbolicExpr::UnaryOp(op, a) => {
                let a2 = self.replace_node_rec(a, target, replacement, memo);
                if a2 == a {
                    root
                } else {
                    self.intern(SymbolicExpr::UnaryOp(op, a2))
                }
            }
            SymbolicExpr::BinaryOp(op, a, b) => {
                let a2 = self.replace_node_rec(a, target, replacement, memo);
                let b2 = self.replace_node_rec(b, target, replacement, memo);
                if a2 == a && b2 == b {
                    root
                } else {
                    self.intern(SymbolicExpr::BinaryOp(op, a2, b2))
                }
            }
            SymbolicExpr::Conditional(c, t, e) => {
                let c2 = self.replace_node_rec(c, target, replacement, memo);
                let t2 = self.replace_node_rec(t, target, replacement, memo);
                let e2 = self.replace_node_rec(e, target, replacement, memo);
                if c2 == c && t2 == t && e2 == e {
                    root
                } else {
                    self.intern(SymbolicExpr::Conditional(c2, t2, e2))
                }
            }
            SymbolicExpr::FieldAccess(base, field) => {
                let b2 = self.replace_node_rec(base, target, replacement, memo);
                if b2 == base {
                    root
                } else {
                    self.intern(SymbolicExpr::FieldAccess(b2, field))
                }
            }
            SymbolicExpr::Construct(ty, fields) => {
                let fields2: Vec<(String, ExprId)> = fields
                    .iter()
                    .map(|(f, v)| (f.clone(), self.replace_node_rec(*v, target, replacement, memo)))
                    .collect();
                if fields2 == fields {
                    root
                } else {
                    self.intern(SymbolicExpr::Construct(ty, fields2))
                }
            }
            SymbolicExpr::Call(callee, args) => {
                let args2: Vec<ExprId> = args
                    .iter()
                    .map(|a| self.replace_node_rec(*a, target, replacement, memo))
                    .collect();
                if args2 == args {
                    root
                } else {
                    self.intern(SymbolicExpr::Call(callee, args2))
                }
            }
        };
        memo.insert(root, out);
        out
    }

    /// Copy the subgraph under `root` into `dst`, returning its id there.
    pub fn transfer(&self, root: ExprId, dst: &mut ExprArena) -> ExprId {
        let mut memo: HashMap<ExprId, ExprId> = HashMap::new();
        self.transfer_rec(root, dst, &mut memo)
    }

    fn transfer_rec(
        &self,
        id: ExprId,
        dst: &mut ExprArena,
        memo: &mut HashMap<ExprId, ExprId>,
    ) -> ExprId {
        if let Some(&done) = memo.get(&id) {
            return done;
        }
        let out = match self.get(id).clone() {
            SymbolicExpr::Literal(v) => dst.intern(SymbolicExpr::Literal(v)),
            SymbolicExpr::Variable(name) => dst.intern(SymbolicExpr::Variable(name)),
            SymbolicExpr::Opaque(reason) => dst.intern(SymbolicExpr::Opaque(reason)),
            SymbolicExpr::UnaryOp(op, a) => {
                let a2 = self.transfer_rec(a, dst, memo);
                dst.intern(SymbolicExpr::UnaryOp(op, a2))
            }
            SymbolicExpr::BinaryOp(op, a, b) => {
                let a2 = self.transfer_rec(a, dst, memo);
                let b2 = self.transfer_rec(b, dst, memo);
                dst.intern(SymbolicExpr::BinaryOp(op, a2, b2))
            }
            SymbolicExpr::Conditional(c, t, e) => {
                let c2 = self.transfer_rec(c, dst, memo);
                let t2 = self.transfer_rec(t, dst, memo);
                let e2 = self.transfer_rec(e, dst, memo);
                dst.intern(SymbolicExpr::Conditional(c2, t2, e2))
            }
            SymbolicExpr::FieldAccess(base, field) => {
                let b2 = self.transfer_rec(base, dst, memo);
                dst.intern(SymbolicExpr::FieldAccess(b2, field))
            }
            SymbolicExpr::Construct(ty, fields) => {
                let fields2 = fields
                    .into_iter()
                    .map(|(f, v)| (f, self.transfer_rec(v, dst, memo)))
                    .collect();
                dst.intern(SymbolicExpr::Construct(ty, fields2))
            }
            SymbolicExpr::Call(callee, args) => {
                let args2 = args
                    .into_iter()
                    .map(|a| self.transfer_rec(a, dst, memo))
                    .collect();
                dst.intern(SymbolicExpr::Call(callee, args2))
            }
        };
        memo.insert(id, out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedups_structurally_identical_nodes() {
        let mut arena = ExprArena::new();
        let x1 = arena.variable("x");
        let one = arena.lit_int(1);
        let a = arena.binary(BinOp::Add, x1, one);

        let x2 = arena.variable("x");
        let one2 = arena.lit_int(1);
        let b = arena.binary(BinOp::Add, x2, one2);

        assert_eq!(x1, x2);
        assert_eq!(one, one2);
        assert_eq!(a, b);
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn substitute_builds_new_nodes_without_patching() {
        let mut arena = ExprArena::new();
        let x = arena.variable("x");
        let two = arena.lit_int(2);
        let doubled = arena.binary(BinOp::Mul, x, two);

        let ten = arena.lit_int(10);
        let mut map = HashMap::new();
        map.insert("x".to_string(), ten);
        let substituted = arena.substitute(doubled, &map);

        assert_ne!(substituted, doubled);
        match arena.get(substituted) {
            SymbolicExpr::BinaryOp(BinOp::Mul, l, r) => {
                assert_eq!(*l, ten);
                assert_eq!(*r, two);
            }
            other => panic!("unexpected node: {other:?}"),
        }
        // The original graph is untouched.
        match arena.get(doubled) {
            SymbolicExpr::BinaryOp(BinOp::Mul, l, _) => assert_eq!(*l, x),
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn free_vars_walks_shared_subgraphs_once() {
        let mut arena = ExprArena::new();
        let x = arena.variable("x");
        let y = arena.variable("y");
        let sum = arena.binary(BinOp::Add, x, y);
        let prod = arena.binary(BinOp::Mul, sum, sum);

        let vars = arena.free_vars(prod);
        assert_eq!(
            vars.into_iter().collect::<Vec<_>>(),
            vec!["x".to_string(), "y".to_string()]
        );
    }

    #[test]
    fn transfer_preserves_structure_across_arenas() {
        let mut src = ExprArena::new();
        let x = src.variable("x");
        let one = src.lit_int(1);
        let body = src.binary(BinOp::Sub, x, one);

        let mut dst = ExprArena::new();
        let moved = dst.variable("noise");
        let _ = moved;
        let copied = src.transfer(body, &mut dst);
        match dst.get(copied) {
            SymbolicExpr::BinaryOp(BinOp::Sub, l, r) => {
                assert!(matches!(dst.get(*l), SymbolicExpr::Variable(n) if n == "x"));
                assert!(matches!(dst.get(*r), SymbolicExpr::Literal(Value::Int(n)) if *n == 1.into()));
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn contains_opaque_finds_buried_leaf() {
        let mut arena = ExprArena::new();
        let x = arena.variable("x");
        let op = arena.opaque(OpaqueReason::UnboundedLoop);
        let sum = arena.binary(BinOp::Add, x, op);
        let found = arena.contains_opaque(sum);
        assert!(matches!(found, Some((_, OpaqueReason::UnboundedLoop))));
        assert!(arena.contains_opaque(x).is_none());
    }
}
