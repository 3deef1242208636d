//! Node tree built from source lines and reshaped into control flow.

use super::token::{StatementToken, TokenList};
use crate::program::function::FunctionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Call,
    Jump,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub line_number: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Block(Vec<Node>),
    /// A line's tokens, not yet classified.
    Undefined(TokenList),
    Pragma(String),
    Function {
        function: FunctionId,
        body: Vec<Node>,
    },
    Statement(StatementToken),
    Return(Option<StatementToken>),
    If {
        condition: StatementToken,
        then_branch: Box<Node>,
        else_branch: Option<Box<Node>>,
    },
    While {
        condition: StatementToken,
        body: Box<Node>,
    },
    For {
        initial: Option<StatementToken>,
        condition: Option<StatementToken>,
        iteration: Option<StatementToken>,
        body: Box<Node>,
    },
    Jump(String),
    Label(String),
    External {
        kind: ExternalKind,
        target: StatementToken,
    },
    Break,
    Continue,
}

impl Node {
    pub fn new(kind: NodeKind, line_number: u32) -> Self {
        Self { kind, line_number }
    }

    pub fn is_block(&self) -> bool {
        matches!(self.kind, NodeKind::Block(_))
    }

    /// Short name for error messages.
    pub fn describe(&self) -> &'static str {
        match self.kind {
            NodeKind::Block(_) => "block",
            NodeKind::Undefined(_) => "statement",
            NodeKind::Pragma(_) => "pragma",
            NodeKind::Function { .. } => "function",
            NodeKind::Statement(_) => "statement",
            NodeKind::Return(_) => "return",
            NodeKind::If { .. } => "if",
            NodeKind::While { .. } => "while",
            NodeKind::For { .. } => "for",
            NodeKind::Jump(_) => "jump",
            NodeKind::Label(_) => "label",
            NodeKind::External { .. } => "external call",
            NodeKind::Break => "break",
            NodeKind::Continue => "continue",
        }
    }
}
