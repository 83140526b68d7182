//! Guarded intermediate representation.
//!
//! The rewriter lowers the parsed tree into these nodes. Guarded semantics
//! are dedicated node kinds — evaluating a `GetAttr` IS the guarded
//! attribute read — so a lowered program cannot be lowered again and
//! double-wrapped: the rewrite is structurally idempotent.

use crate::parser::ast::{BinOp, BoolOp, CmpOp, UnaryOp};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Assign {
        targets: Vec<Target>,
        value: Expr,
    },
    /// Augmented assignment is only ever lowered for bare names; attribute
    /// and subscript targets are rejected during rewriting.
    AugAssign {
        name: String,
        op: BinOp,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    FuncDef {
        func: Rc<Func>,
    },
    ClassDef {
        name: String,
        bases: Vec<Expr>,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Delete(Vec<Target>),
    Break,
    Continue,
    Try {
        body: Vec<Stmt>,
        handlers: Vec<Handler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    Raise(Option<Expr>),
    With {
        items: Vec<(Expr, Option<Target>)>,
        body: Vec<Stmt>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Handler {
    pub exc_type: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub line: u32,
}

/// Assignment / loop-binding target after lowering.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Attr { obj: Expr, attr: String },
    Index { obj: Expr, index: Expr },
    /// Nested sequence pattern with its unpack plan.
    Nested { elts: Vec<Target>, spec: UnpackSpec },
}

/// How a nested-sequence target decomposes.
///
/// Built once at rewrite time, consumed by the guarded unpack primitive.
/// `min_len` is checked against the materialized sequence before recursing
/// into `children` (pairs of element index and child spec).
#[derive(Debug, Clone, PartialEq)]
pub struct UnpackSpec {
    pub min_len: usize,
    pub children: Vec<(usize, UnpackSpec)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    pub name: String,
    pub params: Vec<Param>,
    pub body: FuncBody,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FuncBody {
    /// Lambda body.
    Expr(Box<Expr>),
    /// `def` body.
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    NoneLit,
    BoolLit(bool),
    IntLit(i64),
    FloatLit(f64),
    StrLit(Rc<str>),
    Name(String),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    /// Guarded attribute read.
    GetAttr { obj: Box<Expr>, attr: String },
    /// Guarded subscript read.
    GetItem { obj: Box<Expr>, index: Box<Expr> },
    /// Slice syntax lowered to an explicit slice construction.
    MakeSlice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    /// Guarded call.
    Apply { func: Box<Expr>, args: Vec<Arg> },
    /// `+`, `*` and `**` evaluate through the bounded-arithmetic guards.
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolChain {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    IfElse {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda(Rc<Func>),
    Comp(Box<Comp>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Pos(Expr),
    Star(Expr),
    Keyword(String, Expr),
    KwStar(Expr),
}

/// A comprehension; generator expressions evaluate eagerly to lists.
#[derive(Debug, Clone, PartialEq)]
pub struct Comp {
    pub kind: CompKind,
    /// Dict comprehensions carry the key here, `elt` is then the value.
    pub key: Option<Expr>,
    pub elt: Expr,
    pub generators: Vec<Generator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompKind {
    List,
    Set,
    Dict,
    Generator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generator {
    pub target: Target,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}
