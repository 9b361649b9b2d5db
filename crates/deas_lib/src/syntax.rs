use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::printer::Printer;

pub const MAX_PRECEDENCE: i32 = 24;
pub const MIN_PRECEDENCE: i32 = -1;
pub const MEMBER_PRECEDENCE: i32 = 18;
pub const TERNARY_PRECEDENCE: i32 = 3;
pub const ASSIGNMENT_PRECEDENCE: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    LeftToRight,
    RightToLeft,
    NotAssociative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precedence {
    pub level: i32,
    pub associativity: Associativity,
}

impl Precedence {
    pub const PRIMARY: Precedence = Precedence::new(MAX_PRECEDENCE, Associativity::NotAssociative);

    pub const fn new(level: i32, associativity: Associativity) -> Self {
        Self { level, associativity }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    String(String),
    Integer(i32),
    Float(f64),
    Boolean(bool),
    Null,
    Undefined,
}

impl Literal {
    fn is_negative(&self) -> bool {
        match self {
            Literal::Integer(v) => *v < 0,
            Literal::Float(v) => v.is_sign_negative() && *v != 0.0,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    TypeOf,
    Delete,
}

impl UnaryOp {
    pub fn token(self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::TypeOf => "typeof ",
            UnaryOp::Delete => "delete ",
        }
    }

    pub fn precedence(self) -> Precedence {
        Precedence::new(15, Associativity::RightToLeft)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    ShiftLeft,
    ShiftRight,
    UnsignedShiftRight,
    Less,
    Greater,
    InstanceOf,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    BitAnd,
    BitXor,
    BitOr,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    pub fn token(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::UnsignedShiftRight => ">>>",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::InstanceOf => "instanceof",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::StrictEqual => "===",
            BinaryOp::StrictNotEqual => "!==",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::BitOr => "|",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        }
    }

    pub fn precedence(self) -> Precedence {
        use Associativity::LeftToRight;
        let level = match self {
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 13,
            BinaryOp::Add | BinaryOp::Subtract => 12,
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight | BinaryOp::UnsignedShiftRight => 11,
            BinaryOp::Less | BinaryOp::Greater | BinaryOp::InstanceOf => 10,
            BinaryOp::Equal | BinaryOp::NotEqual | BinaryOp::StrictEqual | BinaryOp::StrictNotEqual => 9,
            BinaryOp::BitAnd => 8,
            BinaryOp::BitXor => 7,
            BinaryOp::BitOr => 6,
            BinaryOp::LogicalAnd => 5,
            BinaryOp::LogicalOr => 4,
        };
        Precedence::new(level, LeftToRight)
    }

    /// The operator testing the opposite outcome, where that is exact.
    pub fn negated(self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Equal => Some(BinaryOp::NotEqual),
            BinaryOp::NotEqual => Some(BinaryOp::Equal),
            BinaryOp::StrictEqual => Some(BinaryOp::StrictNotEqual),
            BinaryOp::StrictNotEqual => Some(BinaryOp::StrictEqual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    Array(Vec<Rc<Expr>>),
    Object(Vec<(Rc<Expr>, Rc<Expr>)>),
    Unary {
        op: UnaryOp,
        operand: Rc<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Rc<Expr>,
        rhs: Rc<Expr>,
    },
    Ternary {
        condition: Rc<Expr>,
        then: Rc<Expr>,
        otherwise: Rc<Expr>,
    },
    Member {
        object: Rc<Expr>,
        key: Rc<Expr>,
    },
    Call {
        callee: Rc<Expr>,
        args: Vec<Rc<Expr>>,
        construct: bool,
    },
    /// Iteration state left by `Enumerate`; stays on the stack until the
    /// `for-in` that consumes it.
    Enumerate(Rc<Expr>),
    Function(Rc<FunctionDef>),
}

impl Expr {
    pub fn literal(literal: Literal) -> Rc<Expr> {
        Rc::new(Expr::Literal(literal))
    }

    pub fn string(s: impl Into<String>) -> Rc<Expr> {
        Self::literal(Literal::String(s.into()))
    }

    pub fn integer(v: i32) -> Rc<Expr> {
        Self::literal(Literal::Integer(v))
    }

    pub fn undefined() -> Rc<Expr> {
        Self::literal(Literal::Undefined)
    }

    pub fn name(s: impl Into<String>) -> Rc<Expr> {
        Rc::new(Expr::Name(s.into()))
    }

    pub fn unary(op: UnaryOp, operand: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Unary { op, operand })
    }

    pub fn binary(op: BinaryOp, lhs: Rc<Expr>, rhs: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Binary { op, lhs, rhs })
    }

    /// Logical negation, folding `!!x` and flipping (strict) equality.
    pub fn not(expr: Rc<Expr>) -> Rc<Expr> {
        match &*expr {
            Expr::Unary { op: UnaryOp::Not, operand } => operand.clone(),
            Expr::Binary { op, lhs, rhs } => match op.negated() {
                Some(flipped) => Self::binary(flipped, lhs.clone(), rhs.clone()),
                None => Self::unary(UnaryOp::Not, expr),
            },
            _ => Self::unary(UnaryOp::Not, expr),
        }
    }

    pub fn member(object: Rc<Expr>, key: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Member { object, key })
    }

    pub fn call(callee: Rc<Expr>, args: Vec<Rc<Expr>>) -> Rc<Expr> {
        Rc::new(Expr::Call { callee, args, construct: false })
    }

    pub fn construct(callee: Rc<Expr>, args: Vec<Rc<Expr>>) -> Rc<Expr> {
        Rc::new(Expr::Call { callee, args, construct: true })
    }

    pub fn ternary(condition: Rc<Expr>, then: Rc<Expr>, otherwise: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Ternary { condition, then, otherwise })
    }

    pub fn precedence(&self) -> Precedence {
        match self {
            Expr::Literal(l) if l.is_negative() => UnaryOp::Not.precedence(),
            Expr::Literal(_) | Expr::Name(_) | Expr::Array(_) | Expr::Object(_) => Precedence::PRIMARY,
            Expr::Enumerate(_) | Expr::Function(_) => Precedence::PRIMARY,
            Expr::Unary { op, .. } => op.precedence(),
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Ternary { .. } => Precedence::new(TERNARY_PRECEDENCE, Associativity::RightToLeft),
            Expr::Member { .. } | Expr::Call { .. } => {
                Precedence::new(MEMBER_PRECEDENCE, Associativity::LeftToRight)
            }
        }
    }

    /// Whether evaluating the expression can change program state.
    pub fn has_side_effects(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Name(_) | Expr::Enumerate(_) | Expr::Function(_) => false,
            Expr::Array(items) => items.iter().any(|e| e.has_side_effects()),
            Expr::Object(pairs) => pairs.iter().any(|(k, v)| k.has_side_effects() || v.has_side_effects()),
            Expr::Unary { op: UnaryOp::Delete, .. } => true,
            Expr::Unary { operand, .. } => operand.has_side_effects(),
            Expr::Binary { lhs, rhs, .. } => lhs.has_side_effects() || rhs.has_side_effects(),
            Expr::Ternary { condition, then, otherwise } => {
                condition.has_side_effects() || then.has_side_effects() || otherwise.has_side_effects()
            }
            Expr::Member { object, key } => object.has_side_effects() || key.has_side_effects(),
            Expr::Call { .. } => true,
        }
    }

    pub fn is_deletable(&self) -> bool {
        !matches!(self, Expr::Enumerate(_))
    }

    pub fn as_string_literal(&self) -> Option<&str> {
        match self {
            Expr::Literal(Literal::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Text usable as a variable name: a name reference or a string literal.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Expr::Name(s) | Expr::Literal(Literal::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<usize> {
        match self {
            Expr::Literal(Literal::Integer(v)) => usize::try_from(*v).ok(),
            Expr::Literal(Literal::Float(v)) if v.fract() == 0.0 && *v >= 0.0 => Some(*v as usize),
            _ => None,
        }
    }

    /// Receivers that print as nothing and turn member access into `this` access.
    pub fn is_empty_receiver(&self) -> bool {
        matches!(self, Expr::Literal(Literal::Undefined)) || self.as_name() == Some("")
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Expr::Literal(Literal::Null))
    }

    pub fn is_truthy_literal(&self) -> bool {
        match self {
            Expr::Literal(Literal::Boolean(b)) => *b,
            Expr::Literal(Literal::Integer(v)) => *v != 0,
            Expr::Literal(Literal::Float(v)) => *v != 0.0 && !v.is_nan(),
            Expr::Literal(Literal::String(s)) => !s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Printer::default().expression(self))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign {
        target: Rc<Expr>,
        value: Rc<Expr>,
        declare: bool,
    },
    Declare(String),
    Expression(Rc<Expr>),
    /// A value left on the stack with nothing consuming it.
    Leftover(Rc<Expr>),
    Return(Option<Rc<Expr>>),
    Throw(Rc<Expr>),
    Break,
    Continue,
    If {
        condition: Rc<Expr>,
        then: Vec<Statement>,
        otherwise: Vec<Statement>,
    },
    /// `maintenance` runs before every evaluation of `condition`.
    Loop {
        condition: Rc<Expr>,
        maintenance: Vec<Statement>,
        body: Vec<Statement>,
    },
    ForIn {
        key: Rc<Expr>,
        object: Rc<Expr>,
        body: Vec<Statement>,
    },
    Function(Rc<FunctionDef>),
}

impl Statement {
    pub fn assign(target: Rc<Expr>, value: Rc<Expr>) -> Self {
        Statement::Assign { target, value, declare: false }
    }

    /// An `if`, turned around when only the false branch has content.
    pub fn if_else(condition: Rc<Expr>, then: Vec<Statement>, otherwise: Vec<Statement>) -> Self {
        if then.is_empty() && !otherwise.is_empty() {
            Statement::If { condition: Expr::not(condition), then: otherwise, otherwise: then }
        } else {
            Statement::If { condition, then, otherwise }
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Printer::default().statements(std::slice::from_ref(self)))
    }
}
