use crate::error::Span;
use std::rc::Rc;

/// A parsed Droy program: statements in source order plus the module
/// surface (imports and exported names) collected while parsing.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
    pub imports: Vec<ImportDecl>,
    pub exports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub path: String,
    pub alias: Option<String>,
    pub span: Span,
}

/// Function parameters and body, shared between the declaration node and
/// every closure created from it.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expression {
        expr: Expr,
        span: Span,
    },
    Block {
        statements: Vec<Stmt>,
        span: Span,
    },
    VarDecl {
        name: String,
        init: Expr,
        is_const: bool,
        type_hint: Option<String>,
        span: Span,
    },
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        span: Span,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    For {
        initializer: Option<Box<Stmt>>,
        condition: Option<Expr>,
        increment: Option<Expr>,
        body: Box<Stmt>,
        span: Span,
    },
    ForIn {
        variable: String,
        iterable: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Break {
        span: Span,
    },
    Continue {
        span: Span,
    },
    Function {
        decl: Rc<FunctionDecl>,
        span: Span,
    },
    /// `em` / `~e`: write a value to the output.
    Emit {
        value: Expr,
        span: Span,
    },
    /// `text` / `txt` / `t`: write text to the output.
    Text {
        value: Expr,
        span: Span,
    },
    Link {
        id: Expr,
        api: Expr,
        extended: bool,
        span: Span,
    },
    BlockDef {
        decl: Rc<FunctionDecl>,
        span: Span,
    },
    Command {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    Pkg {
        name: Expr,
        span: Span,
    },
    Media {
        source: Expr,
        span: Span,
    },
    Style {
        name: Option<String>,
        properties: Vec<(String, Expr)>,
        span: Span,
    },
    Import {
        decl: ImportDecl,
    },
    Export {
        decl: Box<Stmt>,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> &Span {
        match self {
            Stmt::Expression { span, .. } => span,
            Stmt::Block { span, .. } => span,
            Stmt::VarDecl { span, .. } => span,
            Stmt::If { span, .. } => span,
            Stmt::While { span, .. } => span,
            Stmt::For { span, .. } => span,
            Stmt::ForIn { span, .. } => span,
            Stmt::Return { span, .. } => span,
            Stmt::Break { span } => span,
            Stmt::Continue { span } => span,
            Stmt::Function { span, .. } => span,
            Stmt::Emit { span, .. } => span,
            Stmt::Text { span, .. } => span,
            Stmt::Link { span, .. } => span,
            Stmt::BlockDef { span, .. } => span,
            Stmt::Command { span, .. } => span,
            Stmt::Pkg { span, .. } => span,
            Stmt::Media { span, .. } => span,
            Stmt::Style { span, .. } => span,
            Stmt::Import { decl } => &decl.span,
            Stmt::Export { span, .. } => span,
        }
    }

    /// Name bound by a declaration statement, used for `export`.
    pub fn declared_name(&self) -> Option<&str> {
        match self {
            Stmt::VarDecl { name, .. } => Some(name),
            Stmt::Function { decl, .. } | Stmt::BlockDef { decl, .. } => decl.name.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number {
        value: f64,
        span: Span,
    },
    String {
        value: String,
        span: Span,
    },
    Boolean {
        value: bool,
        span: Span,
    },
    Null {
        span: Span,
    },
    Variable {
        name: String,
        span: Span,
    },
    SpecialVariable {
        name: String,
        span: Span,
    },
    Assign {
        target: Box<Expr>,
        operator: AssignOp,
        value: Box<Expr>,
        span: Span,
    },
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
        prefix: bool,
        span: Span,
    },
    Logical {
        left: Box<Expr>,
        operator: LogicalOp,
        right: Box<Expr>,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    Member {
        object: Box<Expr>,
        property: Box<Expr>,
        computed: bool,
        span: Span,
    },
    Array {
        elements: Vec<Expr>,
        span: Span,
    },
    Object {
        entries: Vec<(String, Expr)>,
        span: Span,
    },
    Ternary {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        span: Span,
    },
    Function {
        decl: Rc<FunctionDecl>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> &Span {
        match self {
            Expr::Number { span, .. } => span,
            Expr::String { span, .. } => span,
            Expr::Boolean { span, .. } => span,
            Expr::Null { span } => span,
            Expr::Variable { span, .. } => span,
            Expr::SpecialVariable { span, .. } => span,
            Expr::Assign { span, .. } => span,
            Expr::Binary { span, .. } => span,
            Expr::Unary { span, .. } => span,
            Expr::Logical { span, .. } => span,
            Expr::Call { span, .. } => span,
            Expr::Member { span, .. } => span,
            Expr::Array { span, .. } => span,
            Expr::Object { span, .. } => span,
            Expr::Ternary { span, .. } => span,
            Expr::Function { span, .. } => span,
        }
    }

    /// Whether the expression can appear on the left of `=` or `++`.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Expr::Variable { .. } | Expr::SpecialVariable { .. } | Expr::Member { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "**",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Plus,
    Not,
    BitNot,
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl AssignOp {
    /// The binary operator a compound assignment applies.
    pub fn binary_op(&self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Subtract => Some(BinaryOp::Subtract),
            AssignOp::Multiply => Some(BinaryOp::Multiply),
            AssignOp::Divide => Some(BinaryOp::Divide),
            AssignOp::Modulo => Some(BinaryOp::Modulo),
        }
    }
}
