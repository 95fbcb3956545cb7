#![forbid(unsafe_code)]

//! Lowering from the type-checked surface into a `FunctionSymbolicModel`.
//!
//! The builder is total: it never fails on a type-checked body. Constructs
//! the engine cannot reason about become `Opaque` leaves with a specific
//! reason instead of errors. Let-bindings are substituted away so the model
//! is a single expression graph, and calls to known pure functions are
//! expanded in place up to a configurable depth.

use std::collections::{BTreeSet, HashMap};

use strata_ast::{
    BinOp as AstBinOp, FunctionDef, Program, TypedExpr, TypedExprKind, UnaryOp as AstUnaryOp,
};

use crate::expr::{BinOp, ExprArena, ExprId, OpaqueReason, SymbolicExpr, UnaryOp, Value};
use crate::hash::content_hash;
use crate::model::{CallSite, Constraint, ConstraintKind, FunctionSymbolicModel, ParamSym};

#[derive(Clone, Copy, Debug)]
pub struct BuildLimits {
    /// How many levels of callee bodies to expand at a call.
    pub max_inline_depth: usize,
    /// Arena ceiling; past it every further construct is opaque.
    pub max_nodes: usize,
}

impl Default for BuildLimits {
    fn default() -> Self {
        Self {
            max_inline_depth: 3,
            max_nodes: 4096,
        }
    }
}

pub fn build(def: &FunctionDef, program: &Program, limits: &BuildLimits) -> FunctionSymbolicModel {
    let mut builder = Builder {
        program,
        limits,
        arena: ExprArena::new(),
        call_sites: Vec::new(),
        inlined: BTreeSet::new(),
        inline_stack: vec![def.name.node.clone()],
    };

    let body = if def.effectful {
        builder.arena.opaque(OpaqueReason::Effectful)
    } else {
        let env = HashMap::new();
        builder.lower(&def.body, &env)
    };

    let empty = HashMap::new();
    let assumes = def
        .assumes
        .iter()
        .map(|decl| Constraint {
            span: decl.span,
            kind: ConstraintKind::Assumption,
            expr: builder.lower(&decl.expr, &empty),
            text: decl.text.clone(),
        })
        .collect::<Vec<_>>();
    let guarantees = def
        .guarantees
        .iter()
        .map(|decl| Constraint {
            span: decl.span,
            kind: ConstraintKind::Guarantee,
            expr: builder.lower(&decl.expr, &empty),
            text: decl.text.clone(),
        })
        .collect::<Vec<_>>();

    let params = def
        .params
        .iter()
        .map(|p| ParamSym {
            name: p.name.node.clone(),
            ty: p.ty.clone(),
        })
        .collect::<Vec<_>>();

    let Builder {
        arena,
        call_sites,
        inlined,
        ..
    } = builder;

    let content_hash = content_hash(&arena, body, &params, &assumes, &guarantees, def.tag);

    FunctionSymbolicModel {
        name: def.name.node.clone(),
        span: def.span,
        params,
        ret_ty: def.ret_ty.clone(),
        arena,
        body,
        assumes,
        guarantees,
        tag: def.tag,
        call_sites,
        inlined,
        content_hash,
    }
}

struct Builder<'a> {
    program: &'a Program,
    limits: &'a BuildLimits,
    arena: ExprArena,
    call_sites: Vec<CallSite>,
    inlined: BTreeSet<String>,
    /// Functions currently being expanded, outermost first. The first entry
    /// is the function under analysis itself; re-entering any member is a
    /// recursive call and stops inlining.
    inline_stack: Vec<String>,
}

impl<'a> Builder<'a> {
    fn lower(&mut self, expr: &TypedExpr, env: &HashMap<String, ExprId>) -> ExprId {
        if self.arena.len() >= self.limits.max_nodes {
            return self.arena.opaque(OpaqueReason::NodeBudgetExceeded);
        }
        match &expr.kind {
            TypedExprKind::IntLit(n) => self.arena.lit_big(n.clone()),
            TypedExprKind::RatLit(r) => self.arena.lit_rat(r.clone()),
            TypedExprKind::BoolLit(b) => self.arena.lit_bool(*b),
            TypedExprKind::StrLit(s) => self.arena.intern(SymbolicExpr::Literal(Value::Str(s.clone()))),
            TypedExprKind::Var(name) => match env.get(name) {
                Some(&bound) => bound,
                None => self.arena.variable(name),
            },
            TypedExprKind::Unary { op, operand } => {
                let inner = self.lower(operand, env);
                self.arena.unary(map_unary(*op), inner)
            }
            TypedExprKind::Binary { op, left, right } => {
                let l = self.lower(left, env);
                let r = self.lower(right, env);
                self.arena.binary(map_binary(*op), l, r)
            }
            TypedExprKind::Let { name, value, body } => {
                let bound = self.lower(value, env);
                let mut inner_env = env.clone();
                inner_env.insert(name.clone(), bound);
                self.lower(body, &inner_env)
            }
            TypedExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                // Both branches are always materialized so later passes can
                // compare their value ranges.
                let c = self.lower(cond, env);
                let t = self.lower(then_branch, env);
                let e = self.lower(else_branch, env);
                self.arena.conditional(c, t, e)
            }
            TypedExprKind::Field { base, field } => {
                let b = self.lower(base, env);
                self.arena.field_access(b, field)
            }
            TypedExprKind::Record { name, fields } => {
                let lowered = fields
                    .iter()
                    .map(|(f, e)| (f.clone(), self.lower(e, env)))
                    .collect();
                self.arena.construct(name, lowered)
            }
            TypedExprKind::Call { callee, args } => self.lower_call(expr, callee, args, env),
            TypedExprKind::UnboundedLoop => self.arena.opaque(OpaqueReason::UnboundedLoop),
        }
    }

    fn lower_call(
        &mut self,
        expr: &TypedExpr,
        callee: &str,
        args: &[TypedExpr],
        env: &HashMap<String, ExprId>,
    ) -> ExprId {
        let lowered_args: Vec<ExprId> = args.iter().map(|a| self.lower(a, env)).collect();
        let result = self.lower_call_result(callee, &lowered_args);

        // Only direct call sites of the function under analysis are recorded;
        // call sites inside inlined bodies belong to the callee's own analysis.
        if self.inline_stack.len() == 1 {
            self.call_sites.push(CallSite {
                span: expr.span,
                callee: callee.to_string(),
                args: lowered_args,
                result,
            });
        }
        result
    }

    fn lower_call_result(&mut self, callee: &str, lowered_args: &[ExprId]) -> ExprId {
        let Some(def) = self.program.function(callee) else {
            return self
                .arena
                .opaque(OpaqueReason::UnknownCallee(callee.to_string()));
        };
        if def.effectful {
            return self.arena.opaque(OpaqueReason::Effectful);
        }
        if self.inline_stack.iter().any(|n| n == callee) {
            return self
                .arena
                .opaque(OpaqueReason::RecursiveCall(callee.to_string()));
        }
        if self.inline_stack.len() > self.limits.max_inline_depth {
            return self
                .arena
                .opaque(OpaqueReason::InlineDepthExceeded(callee.to_string()));
        }
        if self.arena.len() >= self.limits.max_nodes {
            return self.arena.opaque(OpaqueReason::NodeBudgetExceeded);
        }

        let mut callee_env = HashMap::new();
        for (param, arg) in def.params.iter().zip(lowered_args.iter()) {
            callee_env.insert(param.name.node.clone(), *arg);
        }
        self.inline_stack.push(callee.to_string());
        self.inlined.insert(callee.to_string());
        let inlined_body = self.lower(&def.body, &callee_env);
        self.inline_stack.pop();
        inlined_body
    }
}

fn map_unary(op: AstUnaryOp) -> UnaryOp {
    match op {
        AstUnaryOp::Neg => UnaryOp::Neg,
        AstUnaryOp::Not => UnaryOp::Not,
    }
}

fn map_binary(op: AstBinOp) -> BinOp {
    match op {
        AstBinOp::Add => BinOp::Add,
        AstBinOp::Sub => BinOp::Sub,
        AstBinOp::Mul => BinOp::Mul,
        AstBinOp::Div => BinOp::Div,
        AstBinOp::Mod => BinOp::Mod,
        AstBinOp::Eq => BinOp::Eq,
        AstBinOp::Ne => BinOp::Ne,
        AstBinOp::Lt => BinOp::Lt,
        AstBinOp::Gt => BinOp::Gt,
        AstBinOp::Le => BinOp::Le,
        AstBinOp::Ge => BinOp::Ge,
        AstBinOp::And => BinOp::And,
        AstBinOp::Or => BinOp::Or,
    }
}
