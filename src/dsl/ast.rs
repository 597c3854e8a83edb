//! AST node types for the schema language.

use std::cell::OnceCell;
use std::sync::Arc;

use super::natives::NativeMethod;
use super::schemas::FunctionSchema;
use super::types::{Coercion, Type};

/// Source span for error reporting. Byte offsets into the source text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A parsed source file: zero or more schema definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub schemas: Vec<SchemaDef>,
}

/// `schema greet(name: string) -> string { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDef {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Type,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

/// Actions. Every action is void-typed and leaves the stack as it found it.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `local x: number = 1`
    Local {
        name: String,
        ty: Option<Type>,
        value: Expr,
        span: Span,
    },
    /// `x = x + 1`
    Assign {
        name: String,
        value: Expr,
        span: Span,
    },
    If {
        condition: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
        span: Span,
    },
    /// `repeat 3 { ... }`
    Repeat {
        count: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    /// `foreach item in items { ... }`
    Foreach {
        var: String,
        iterable: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    Expr(Expr),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Local { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::If { span, .. }
            | Stmt::Repeat { span, .. }
            | Stmt::Foreach { span, .. } => *span,
            Stmt::Expr(expr) => expr.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// `1`, `2.5`. Every number literal is an `f64`.
    Number(f64),
    /// `"..."`
    Str(String),
    /// `'...'`
    Text(String),
    /// `[a, b, c]`
    List(Vec<Expr>),
    /// Variable reference.
    Ident(String),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `-x`
    Neg(Box<Expr>),
    /// `name(args)`, bound to a target on first use.
    Call(LateCall),

    // Produced by the resolver only.
    NativeCall {
        method: Arc<NativeMethod>,
        args: Vec<Expr>,
    },
    UserCall {
        schema: FunctionSchema,
        args: Vec<Expr>,
    },
    Coerce {
        inner: Box<Expr>,
        to: Type,
        coercion: Coercion,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Eq,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Eq => "==",
        }
    }
}

/// A call whose target is chosen from the static type of its first argument.
///
/// The target is computed once and cached in the node. Every later read
/// returns the same node.
#[derive(Debug, Clone, PartialEq)]
pub struct LateCall {
    pub name: String,
    pub args: Vec<Expr>,
    resolved: OnceCell<Box<Expr>>,
}

impl LateCall {
    pub fn new(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self {
            name: name.into(),
            args,
            resolved: OnceCell::new(),
        }
    }

    pub fn resolved(&self) -> Option<&Expr> {
        self.resolved.get().map(AsRef::as_ref)
    }

    /// Store the resolution. A second store keeps the first value.
    pub fn memoize(&self, target: Expr) -> &Expr {
        self.resolved.get_or_init(|| Box::new(target))
    }
}
