//! Syntax tree produced by the parser.
//!
//! Expressions and declarations carry a [`NodeId`] so that semantic analysis can record types
//! and name resolutions in side tables instead of rewriting the tree.

use crate::diagnostic::Location;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// A type as written, e.g. `float4`, `Texture2D<float4>`, or a struct name.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub name: String,
    pub template: Option<Box<TypeExpr>>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub args: Vec<Expr>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Semantic(String),
    Register(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParamDirection {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub id: NodeId,
    pub direction: ParamDirection,
    pub ty: TypeExpr,
    pub name: String,
    pub semantic: Option<String>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub attributes: Vec<Attribute>,
    pub return_type: TypeExpr,
    pub name: String,
    pub params: Vec<Param>,
    pub semantic: Option<String>,
    pub body: Option<Block>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub ty: TypeExpr,
    pub name: String,
    pub array_len: Option<Expr>,
    pub semantic: Option<String>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<Field>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub id: NodeId,
    /// `static`, `const`, `uniform`, `groupshared`, ...
    pub qualifiers: Vec<String>,
    pub ty: TypeExpr,
    pub name: String,
    pub array_len: Option<Expr>,
    pub bindings: Vec<Binding>,
    pub init: Option<Expr>,
    pub loc: Location,
}

impl VarDecl {
    pub fn has_qualifier(&self, qualifier: &str) -> bool {
        self.qualifiers.iter().any(|q| q == qualifier)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantBuffer {
    pub name: String,
    pub register: Option<String>,
    pub members: Vec<VarDecl>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Function(Function),
    Struct(StructDef),
    Global(VarDecl),
    ConstantBuffer(ConstantBuffer),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TranslationUnitAst {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub loc: Location,
    /// Location of the closing brace.
    pub end: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block(Block),
    Var(Vec<VarDecl>),
    Expr(Expr),
    Return(Option<Expr>, Location),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
        loc: Location,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    Break(Location),
    Continue(Location),
    Discard(Location),
    Empty,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    LogicalAnd,
    LogicalOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(u64),
    Float(f64),
    Bool(bool),
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `op` is set for compound assignment such as `+=`.
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    Construct {
        ty: TypeExpr,
        args: Vec<Expr>,
    },
    /// `{ a, b, c }` in an initializer.
    InitList(Vec<Expr>),
    Cast {
        ty: TypeExpr,
        expr: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        name: String,
    },
    MethodCall {
        base: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
}
