//! Formula syntax tree

use serde_json::Value;

use crate::registry::Builtin;

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
}

/// Binary operators, loosest-binding first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&` text concatenation
    Concat,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl BinaryOp {
    /// Source spelling, used in error messages
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Concat => "&",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// Expression node
#[derive(Debug, Clone)]
pub enum Expr {
    /// String, number, boolean or null literal
    Literal(Value),
    /// The `input` binding
    Input,
    /// The `this` binding
    This,
    /// A library function used as a value (`FLIP(PROPERTY)`)
    Function(&'static Builtin),
    /// Direct call of a library function; arity checked at parse time
    Call {
        /// Callee
        function: &'static Builtin,
        /// Arguments
        args: Vec<Expr>,
    },
    /// Call of a computed function value (`PARTIAL(F, 1)(x)`)
    Apply {
        /// Expression producing the function
        callee: Box<Expr>,
        /// Arguments
        args: Vec<Expr>,
    },
    /// `object.key`
    Member {
        /// Receiver
        object: Box<Expr>,
        /// Property name
        key: String,
    },
    /// `object[index]`
    Index {
        /// Receiver
        object: Box<Expr>,
        /// Array index or property name
        index: Box<Expr>,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expr>,
    },
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
}
