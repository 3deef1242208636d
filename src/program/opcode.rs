use std::fmt;

use super::datatype::DataType;
use super::function::{FunctionRef, VariableRef};

/// Operators of the unary arithmetic opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperation {
    Negate,
    Not,
    BitNot,
}

/// Operators of the binary arithmetic opcode. Comparisons and logical operators
/// push a `bool`; everything else pushes a value of the opcode's data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    ShiftLeft,
    ShiftRight,
    BitAnd,
    BitOr,
    BitXor,
    LogicalAnd,
    LogicalOr,
    CompareEqual,
    CompareNotEqual,
    CompareLess,
    CompareLessOrEqual,
    CompareGreater,
    CompareGreaterOrEqual,
}

impl BinaryOperation {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::CompareEqual
                | Self::CompareNotEqual
                | Self::CompareLess
                | Self::CompareLessOrEqual
                | Self::CompareGreater
                | Self::CompareGreaterOrEqual
        )
    }
}

/// Stack machine instructions emitted per function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpcodeKind {
    /// Adjust the stack: negative values drop entries.
    MoveStack(i16),
    PushConstant(u64),
    GetVariable(VariableRef),
    /// Store the top of stack into the variable; the value stays on the stack.
    SetVariable(VariableRef),
    /// Pop address, push the value read with the opcode's width.
    ReadMemory,
    /// Pop address, store the value below it; the value stays on the stack.
    WriteMemory,
    /// Convert the top of stack from `from` to the opcode's data type.
    CastValue { from: DataType },
    Unary(UnaryOperation),
    Binary(BinaryOperation),
    Jump(usize),
    /// Pop the condition and jump if it is zero.
    JumpIfFalse(usize),
    Call(FunctionRef),
    Return,
    /// Pop a target address of the opcode's data type and call into the host.
    ExternalCall,
    ExternalJump,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Opcode {
    pub kind: OpcodeKind,
    pub data_type: DataType,
    pub line_number: u32,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OpcodeKind::MoveStack(n) => write!(f, "MOVE_STACK {n}"),
            OpcodeKind::PushConstant(v) => write!(f, "PUSH_CONSTANT.{} {v:#x}", self.data_type),
            OpcodeKind::GetVariable(var) => write!(f, "GET_VARIABLE.{} {var}", self.data_type),
            OpcodeKind::SetVariable(var) => write!(f, "SET_VARIABLE.{} {var}", self.data_type),
            OpcodeKind::ReadMemory => write!(f, "READ_MEMORY.{}", self.data_type),
            OpcodeKind::WriteMemory => write!(f, "WRITE_MEMORY.{}", self.data_type),
            OpcodeKind::CastValue { from } => write!(f, "CAST_VALUE {from} -> {}", self.data_type),
            OpcodeKind::Unary(op) => write!(f, "UNARY.{} {op:?}", self.data_type),
            OpcodeKind::Binary(op) => write!(f, "BINARY.{} {op:?}", self.data_type),
            OpcodeKind::Jump(target) => write!(f, "JUMP {target}"),
            OpcodeKind::JumpIfFalse(target) => write!(f, "JUMP_IF_FALSE {target}"),
            OpcodeKind::Call(function) => write!(f, "CALL {function}"),
            OpcodeKind::Return => f.write_str("RETURN"),
            OpcodeKind::ExternalCall => write!(f, "EXTERNAL_CALL.{}", self.data_type),
            OpcodeKind::ExternalJump => write!(f, "EXTERNAL_JUMP.{}", self.data_type),
        }
    }
}
