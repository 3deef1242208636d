//! Compiler-level tokens: what the node builder hands to token processing and
//! what token processing reduces to typed expression trees.

use std::fmt;

use crate::program::datatype::DataType;
use crate::program::function::{FunctionRef, VariableRef};
use crate::program::opcode::BinaryOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    BlockBegin,
    BlockEnd,
    Function,
    Global,
    Define,
    Return,
    Call,
    Jump,
    Break,
    Continue,
    If,
    Else,
    While,
    For,
}

impl Keyword {
    pub fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "function" => Self::Function,
            "global" => Self::Global,
            "define" => Self::Define,
            "return" => Self::Return,
            "call" => Self::Call,
            "jump" => Self::Jump,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "if" => Self::If,
            "else" => Self::Else,
            "while" => Self::While,
            "for" => Self::For,
            _ => return None,
        })
    }

    pub fn text(self) -> &'static str {
        match self {
            Self::BlockBegin => "{",
            Self::BlockEnd => "}",
            Self::Function => "function",
            Self::Global => "global",
            Self::Define => "define",
            Self::Return => "return",
            Self::Call => "call",
            Self::Jump => "jump",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::If => "if",
            Self::Else => "else",
            Self::While => "while",
            Self::For => "for",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Assign,
    AssignPlus,
    AssignMinus,
    AssignMultiply,
    AssignDivide,
    AssignModulo,
    AssignShiftLeft,
    AssignShiftRight,
    AssignAnd,
    AssignOr,
    AssignXor,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    ShiftLeft,
    ShiftRight,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    LogicalAnd,
    LogicalOr,
    LogicalNot,
    Increment,
    Decrement,
    CompareEqual,
    CompareNotEqual,
    CompareLess,
    CompareLessOrEqual,
    CompareGreater,
    CompareGreaterOrEqual,
    QuestionMark,
    Colon,
    Semicolon,
    Comma,
    ParenthesisLeft,
    ParenthesisRight,
    BracketLeft,
    BracketRight,
}

/// Longest symbols first, so a prefix scan picks the longest match.
pub const OPERATOR_SYMBOLS: &[(&str, Operator)] = &[
    ("<<=", Operator::AssignShiftLeft),
    (">>=", Operator::AssignShiftRight),
    ("+=", Operator::AssignPlus),
    ("-=", Operator::AssignMinus),
    ("*=", Operator::AssignMultiply),
    ("/=", Operator::AssignDivide),
    ("%=", Operator::AssignModulo),
    ("&=", Operator::AssignAnd),
    ("|=", Operator::AssignOr),
    ("^=", Operator::AssignXor),
    ("<<", Operator::ShiftLeft),
    (">>", Operator::ShiftRight),
    ("&&", Operator::LogicalAnd),
    ("||", Operator::LogicalOr),
    ("++", Operator::Increment),
    ("--", Operator::Decrement),
    ("==", Operator::CompareEqual),
    ("!=", Operator::CompareNotEqual),
    ("<=", Operator::CompareLessOrEqual),
    (">=", Operator::CompareGreaterOrEqual),
    ("=", Operator::Assign),
    ("+", Operator::Plus),
    ("-", Operator::Minus),
    ("*", Operator::Multiply),
    ("/", Operator::Divide),
    ("%", Operator::Modulo),
    ("&", Operator::BitAnd),
    ("|", Operator::BitOr),
    ("^", Operator::BitXor),
    ("~", Operator::BitNot),
    ("!", Operator::LogicalNot),
    ("<", Operator::CompareLess),
    (">", Operator::CompareGreater),
    ("?", Operator::QuestionMark),
    (":", Operator::Colon),
    (";", Operator::Semicolon),
    (",", Operator::Comma),
    ("(", Operator::ParenthesisLeft),
    (")", Operator::ParenthesisRight),
    ("[", Operator::BracketLeft),
    ("]", Operator::BracketRight),
];

/// Priority of the conditional operator `?:`.
pub const CONDITIONAL_PRIORITY: u8 = 13;

impl Operator {
    pub fn symbol(self) -> &'static str {
        OPERATOR_SYMBOLS
            .iter()
            .find(|(_, op)| *op == self)
            .map_or("?", |(s, _)| s)
    }

    /// Binary operator priority; lower values bind tighter.
    pub fn priority(self) -> Option<u8> {
        Some(match self {
            Self::Multiply | Self::Divide | Self::Modulo => 3,
            Self::Plus | Self::Minus => 4,
            Self::ShiftLeft | Self::ShiftRight => 5,
            Self::CompareLess | Self::CompareLessOrEqual | Self::CompareGreater | Self::CompareGreaterOrEqual => 6,
            Self::CompareEqual | Self::CompareNotEqual => 7,
            Self::BitAnd => 8,
            Self::BitXor => 9,
            Self::BitOr => 10,
            Self::LogicalAnd => 11,
            Self::LogicalOr => 12,
            Self::QuestionMark => CONDITIONAL_PRIORITY,
            Self::Assign
            | Self::AssignPlus
            | Self::AssignMinus
            | Self::AssignMultiply
            | Self::AssignDivide
            | Self::AssignModulo
            | Self::AssignShiftLeft
            | Self::AssignShiftRight
            | Self::AssignAnd
            | Self::AssignOr
            | Self::AssignXor => 14,
            _ => return None,
        })
    }

    pub fn is_right_associative(self) -> bool {
        self.is_assignment() || self == Self::QuestionMark
    }

    pub fn is_assignment(self) -> bool {
        self == Self::Assign || self.compound_operation().is_some()
    }

    /// Arithmetic part of a compound assignment like `+=`.
    pub fn compound_operation(self) -> Option<BinaryOperation> {
        Some(match self {
            Self::AssignPlus => BinaryOperation::Add,
            Self::AssignMinus => BinaryOperation::Subtract,
            Self::AssignMultiply => BinaryOperation::Multiply,
            Self::AssignDivide => BinaryOperation::Divide,
            Self::AssignModulo => BinaryOperation::Modulo,
            Self::AssignShiftLeft => BinaryOperation::ShiftLeft,
            Self::AssignShiftRight => BinaryOperation::ShiftRight,
            Self::AssignAnd => BinaryOperation::BitAnd,
            Self::AssignOr => BinaryOperation::BitOr,
            Self::AssignXor => BinaryOperation::BitXor,
            _ => return None,
        })
    }

    pub fn binary_operation(self) -> Option<BinaryOperation> {
        Some(match self {
            Self::Plus => BinaryOperation::Add,
            Self::Minus => BinaryOperation::Subtract,
            Self::Multiply => BinaryOperation::Multiply,
            Self::Divide => BinaryOperation::Divide,
            Self::Modulo => BinaryOperation::Modulo,
            Self::ShiftLeft => BinaryOperation::ShiftLeft,
            Self::ShiftRight => BinaryOperation::ShiftRight,
            Self::BitAnd => BinaryOperation::BitAnd,
            Self::BitOr => BinaryOperation::BitOr,
            Self::BitXor => BinaryOperation::BitXor,
            Self::LogicalAnd => BinaryOperation::LogicalAnd,
            Self::LogicalOr => BinaryOperation::LogicalOr,
            Self::CompareEqual => BinaryOperation::CompareEqual,
            Self::CompareNotEqual => BinaryOperation::CompareNotEqual,
            Self::CompareLess => BinaryOperation::CompareLess,
            Self::CompareLessOrEqual => BinaryOperation::CompareLessOrEqual,
            Self::CompareGreater => BinaryOperation::CompareGreater,
            Self::CompareGreaterOrEqual => BinaryOperation::CompareGreaterOrEqual,
            _ => return None,
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A literal value with its inferred type. `value` holds canonical bits (see `DataType::normalize`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant {
    pub value: u64,
    pub data_type: DataType,
}

impl Constant {
    pub fn new(value: u64, data_type: DataType) -> Self {
        Self {
            value: data_type.normalize(value),
            data_type,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data_type {
            DataType::Bool => write!(f, "{}", if self.value != 0 { "true" } else { "false" }),
            DataType::Float => write!(f, "{:?}f", f64::from_bits(self.value)),
            DataType::Double => write!(f, "{:?}", f64::from_bits(self.value)),
            ty if ty.is_signed() => write!(f, "{}", ty.integer_value(self.value)),
            _ => write!(f, "{}", self.value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// `( ... )`
    Round,
    /// `[ ... ]`
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryKind {
    Negate,
    Not,
    BitNot,
    PreIncrement,
    PreDecrement,
    PostIncrement,
    PostDecrement,
}

/// A resolved expression (sub)tree with its result type.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementToken {
    pub kind: StatementKind,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Constant(u64),
    Variable(VariableRef),
    FunctionCall {
        function: FunctionRef,
        arguments: Vec<StatementToken>,
    },
    /// Memory read/write of `data_type` width at `address`.
    MemoryAccess {
        address: Box<StatementToken>,
    },
    /// Conversion from the operand's type to this token's type.
    Cast {
        operand: Box<StatementToken>,
    },
    Unary {
        op: UnaryKind,
        operand: Box<StatementToken>,
    },
    Binary {
        op: Operator,
        left: Box<StatementToken>,
        right: Box<StatementToken>,
    },
    Conditional {
        condition: Box<StatementToken>,
        if_true: Box<StatementToken>,
        if_false: Box<StatementToken>,
    },
}

impl StatementToken {
    pub fn constant(value: u64, data_type: DataType) -> Self {
        Self {
            kind: StatementKind::Constant(data_type.normalize(value)),
            data_type,
        }
    }

    pub fn as_constant(&self) -> Option<u64> {
        match self.kind {
            StatementKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Variables and memory accesses can be assigned to.
    pub fn is_lvalue(&self) -> bool {
        matches!(self.kind, StatementKind::Variable(_) | StatementKind::MemoryAccess { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Keyword(Keyword),
    VarType(DataType),
    Operator(Operator),
    Label(String),
    Constant(Constant),
    Identifier(String),
    /// Bracketed group; exists only during token processing.
    Parenthesis(GroupKind, TokenList),
    /// Comma-separated argument lists inside a group.
    CommaSeparated(Vec<TokenList>),
    Statement(StatementToken),
}

pub type TokenList = Vec<Token>;

impl Token {
    pub fn is_operator(&self, op: Operator) -> bool {
        matches!(self, Token::Operator(o) if *o == op)
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        matches!(self, Token::Keyword(k) if *k == keyword)
    }
}
