#![forbid(unsafe_code)]

//! Typed handoff surface between the Strata front end and the symbolic
//! reasoning pass.
//!
//! Everything here arrives fully resolved and type-checked: names are unique
//! within a function, every expression carries its type, and `assume` /
//! `guarantee` clauses have been checked to be boolean-valued. This crate
//! deliberately contains no parser; it is the contract the front end hands
//! over.

use miette::SourceSpan;
use num_bigint::BigInt;
use num_rational::BigRational;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

pub type Ident = Spanned<String>;

/// The distinguished variable a `guarantee` clause uses to refer to the
/// function's return value.
pub const RESULT_VAR: &str = "result";

#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub records: Vec<RecordDef>,
    pub functions: Vec<FunctionDef>,
    pub compositions: Vec<CompositionDef>,
}

impl Program {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            functions: Vec::new(),
            compositions: Vec::new(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name.node == name)
    }

    pub fn record(&self, name: &str) -> Option<&RecordDef> {
        self.records.iter().find(|r| r.name.node == name)
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

/// A record (named product) definition. Field order is the declaration
/// order; the inverter relies on it when mapping constructions back to
/// projections.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordDef {
    pub span: Span,
    pub name: Ident,
    pub fields: Vec<RecordFieldDef>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordFieldDef {
    pub span: Span,
    pub name: Ident,
    pub ty: Type,
}

/// How a function is tagged with respect to inversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReversibilityTag {
    /// `reversible`: the author asserts the transform is invertible and the
    /// engine must either derive the inverse or fail compilation.
    Reversible,
    /// `lossy`: explicitly not invertible; the solver rejects it without
    /// symbolic work.
    Lossy,
    /// No tag; treated like `lossy` for inversion purposes.
    Unmarked,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub span: Span,
    pub name: Ident,
    pub params: Vec<ParamDef>,
    pub ret_ty: Type,
    pub body: TypedExpr,
    pub assumes: Vec<ConstraintDecl>,
    pub guarantees: Vec<ConstraintDecl>,
    pub tag: ReversibilityTag,
    /// True when the body performs effects (I/O, mutation of externals).
    /// The front end computes this; effectful bodies become opaque leaves.
    pub effectful: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamDef {
    pub span: Span,
    pub name: Ident,
    pub ty: Type,
}

/// A declared `assume` (precondition on parameters) or `guarantee`
/// (postcondition on `result`). `text` is the front end's source rendering,
/// carried through for diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintDecl {
    pub span: Span,
    pub expr: TypedExpr,
    pub text: String,
}

/// A declared pipeline `name = f >> g >> h`. Inversion of the composite is
/// leg-by-leg in reverse order.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositionDef {
    pub span: Span,
    pub name: Ident,
    pub legs: Vec<Ident>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Unit,
    Bool,
    Int,
    Rational,
    Str,
    Record(String),
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Rational)
    }

    pub fn display(&self) -> String {
        match self {
            Type::Unit => "Unit".to_string(),
            Type::Bool => "Bool".to_string(),
            Type::Int => "Int".to_string(),
            Type::Rational => "Rational".to_string(),
            Type::Str => "Str".to_string(),
            Type::Record(name) => name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypedExpr {
    pub span: Span,
    pub ty: Type,
    pub kind: TypedExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypedExprKind {
    IntLit(BigInt),
    RatLit(BigRational),
    BoolLit(bool),
    StrLit(String),
    /// A resolved parameter or let-bound name.
    Var(String),
    Unary {
        op: UnaryOp,
        operand: Box<TypedExpr>,
    },
    Binary {
        op: BinOp,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    /// `val name = value` followed by the rest of the body. The symbolic
    /// builder substitutes these away.
    Let {
        name: String,
        value: Box<TypedExpr>,
        body: Box<TypedExpr>,
    },
    If {
        cond: Box<TypedExpr>,
        then_branch: Box<TypedExpr>,
        else_branch: Box<TypedExpr>,
    },
    /// `base.field` on a record value.
    Field {
        base: Box<TypedExpr>,
        field: String,
    },
    /// `TypeName { field: value, ... }` in declared field order.
    Record {
        name: String,
        fields: Vec<(String, TypedExpr)>,
    },
    /// Call to a resolved function. Purity and analyzability are decided by
    /// looking the callee up in the program; unknown callees are opaque.
    Call {
        callee: String,
        args: Vec<TypedExpr>,
    },
    /// A loop whose iteration count the front end could not bound. Always
    /// opaque to the symbolic pass.
    UnboundedLoop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
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
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }

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

/// Convenience constructors used by the engine's own tests and by front-end
/// glue. They fabricate zero-width spans; the front end supplies real ones.
pub mod build {
    use super::*;

    pub fn zspan() -> Span {
        span(0, 0)
    }

    pub fn ident(name: &str) -> Ident {
        Spanned::new(zspan(), name.to_string())
    }

    pub fn int(n: i64) -> TypedExpr {
        TypedExpr {
            span: zspan(),
            ty: Type::Int,
            kind: TypedExprKind::IntLit(BigInt::from(n)),
        }
    }

    pub fn rat(num: i64, den: i64) -> TypedExpr {
        TypedExpr {
            span: zspan(),
            ty: Type::Rational,
            kind: TypedExprKind::RatLit(BigRational::new(BigInt::from(num), BigInt::from(den))),
        }
    }

    pub fn boolean(b: bool) -> TypedExpr {
        TypedExpr {
            span: zspan(),
            ty: Type::Bool,
            kind: TypedExprKind::BoolLit(b),
        }
    }

    pub fn var(name: &str, ty: Type) -> TypedExpr {
        TypedExpr {
            span: zspan(),
            ty,
            kind: TypedExprKind::Var(name.to_string()),
        }
    }

    pub fn unary(op: UnaryOp, operand: TypedExpr) -> TypedExpr {
        let ty = operand.ty.clone();
        TypedExpr {
            span: zspan(),
            ty,
            kind: TypedExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
        }
    }

    pub fn binary(op: BinOp, left: TypedExpr, right: TypedExpr) -> TypedExpr {
        let ty = if op.is_comparison() || matches!(op, BinOp::And | BinOp::Or) {
            Type::Bool
        } else if left.ty == Type::Rational || right.ty == Type::Rational || op == BinOp::Div {
            Type::Rational
        } else {
            left.ty.clone()
        };
        TypedExpr {
            span: zspan(),
            ty,
            kind: TypedExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        }
    }

    pub fn let_in(name: &str, value: TypedExpr, body: TypedExpr) -> TypedExpr {
        let ty = body.ty.clone();
        TypedExpr {
            span: zspan(),
            ty,
            kind: TypedExprKind::Let {
                name: name.to_string(),
                value: Box::new(value),
                body: Box::new(body),
            },
        }
    }

    pub fn if_else(cond: TypedExpr, then_branch: TypedExpr, else_branch: TypedExpr) -> TypedExpr {
        let ty = then_branch.ty.clone();
        TypedExpr {
            span: zspan(),
            ty,
            kind: TypedExprKind::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
        }
    }

    pub fn field(base: TypedExpr, name: &str, ty: Type) -> TypedExpr {
        TypedExpr {
            span: zspan(),
            ty,
            kind: TypedExprKind::Field {
                base: Box::new(base),
                field: name.to_string(),
            },
        }
    }

    pub fn record(type_name: &str, fields: Vec<(&str, TypedExpr)>) -> TypedExpr {
        TypedExpr {
            span: zspan(),
            ty: Type::Record(type_name.to_string()),
            kind: TypedExprKind::Record {
                name: type_name.to_string(),
                fields: fields
                    .into_iter()
                    .map(|(n, e)| (n.to_string(), e))
                    .collect(),
            },
        }
    }

    pub fn call(callee: &str, args: Vec<TypedExpr>, ret_ty: Type) -> TypedExpr {
        TypedExpr {
            span: zspan(),
            ty: ret_ty,
            kind: TypedExprKind::Call {
                callee: callee.to_string(),
                args,
            },
        }
    }

    pub fn param(name: &str, ty: Type) -> ParamDef {
        ParamDef {
            span: zspan(),
            name: ident(name),
            ty,
        }
    }

    pub fn constraint(expr: TypedExpr, text: &str) -> ConstraintDecl {
        ConstraintDecl {
            span: zspan(),
            expr,
            text: text.to_string(),
        }
    }

    pub fn function(
        name: &str,
        params: Vec<ParamDef>,
        ret_ty: Type,
        body: TypedExpr,
    ) -> FunctionDef {
        FunctionDef {
            span: zspan(),
            name: ident(name),
            params,
            ret_ty,
            body,
            assumes: Vec::new(),
            guarantees: Vec::new(),
            tag: ReversibilityTag::Unmarked,
            effectful: false,
        }
    }
}
