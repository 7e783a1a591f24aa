//! Syntax tree for the script subset

use std::rc::Rc;

#[derive(Debug)]
pub(crate) struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub(crate) struct Stmt {
    pub kind: StmtKind,
    /// 1-based line within the source unit
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeclKind {
    Var,
    Let,
    Const,
}

#[derive(Debug)]
pub(crate) enum StmtKind {
    Expr(Expr),
    Declare {
        kind: DeclKind,
        declarations: Vec<(String, Option<Expr>)>,
    },
    /// Hoisted before the enclosing body runs
    Function(Rc<FunctionDecl>),
    Block(Vec<Stmt>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        param: Option<String>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Empty,
}

#[derive(Debug)]
pub(crate) struct FunctionDecl {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Plus,
    Not,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignOp {
    Assign,
    Compound(BinaryOp),
}

#[derive(Debug)]
pub(crate) enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    This,
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Function(Rc<FunctionDecl>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub(crate) fn is_assignable(&self) -> bool {
        matches!(
            self,
            Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }
        )
    }
}
