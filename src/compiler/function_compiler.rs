//! Opcode emission for one shaped function body.

use indexmap::IndexMap;
use log::warn;

use super::error::CompileError;
use super::node::{ExternalKind, Node, NodeKind};
use super::scope::ScopeContext;
use super::token::{Operator, StatementKind, StatementToken, UnaryKind};
use crate::program::datatype::DataType;
use crate::program::function::{LocalId, ScriptFunction, VariableRef};
use crate::program::opcode::{BinaryOperation, Opcode, OpcodeKind, UnaryOperation};

/// Emit the opcodes of `function` from its shaped `body`. `header_line` is
/// used for the parameter prologue and the implicit return. Temporaries the
/// code needs are added to `scope`.
pub fn compile_function(
    function: &ScriptFunction,
    body: &[Node],
    header_line: u32,
    scope: &mut ScopeContext,
) -> Result<Vec<Opcode>, CompileError> {
    let mut compiler = FunctionCompiler {
        scope,
        opcodes: Vec::new(),
        loops: Vec::new(),
        labels: IndexMap::new(),
        label_jumps: Vec::new(),
        line_number: header_line,
    };

    // Arguments arrive in order, so the last one is on top.
    for (index, parameter) in function.parameters.iter().enumerate().rev() {
        compiler.emit(OpcodeKind::SetVariable(VariableRef::Local(LocalId(index))), parameter.data_type);
        compiler.emit(OpcodeKind::MoveStack(-1), DataType::Void);
    }

    for node in body {
        compiler.compile_node(node)?;
    }
    compiler.resolve_labels()?;

    compiler.line_number = header_line;
    if compiler.falls_off_end() {
        if function.return_type == DataType::Void {
            compiler.emit(OpcodeKind::Return, DataType::Void);
        } else {
            warn!(
                "Function '{}' can reach its end without returning a value; returning 0",
                function.name
            );
            compiler.emit(OpcodeKind::PushConstant(0), function.return_type);
            compiler.emit(OpcodeKind::Return, function.return_type);
        }
    }
    Ok(compiler.opcodes)
}

#[derive(Default)]
struct LoopContext {
    break_jumps: Vec<usize>,
    continue_jumps: Vec<usize>,
}

struct FunctionCompiler<'s> {
    scope: &'s mut ScopeContext,
    opcodes: Vec<Opcode>,
    loops: Vec<LoopContext>,
    /// Label name → opcode index.
    labels: IndexMap<String, usize>,
    /// Jump opcode index, label name, line.
    label_jumps: Vec<(usize, String, u32)>,
    line_number: u32,
}

impl FunctionCompiler<'_> {
    fn emit(&mut self, kind: OpcodeKind, data_type: DataType) -> usize {
        self.opcodes.push(Opcode {
            kind,
            data_type,
            line_number: self.line_number,
        });
        self.opcodes.len() - 1
    }

    fn emit_jump(&mut self, conditional: bool) -> usize {
        let kind = if conditional {
            OpcodeKind::JumpIfFalse(0)
        } else {
            OpcodeKind::Jump(0)
        };
        self.emit(kind, DataType::Void)
    }

    fn patch_jump(&mut self, index: usize, target: usize) {
        if let Some(opcode) = self.opcodes.get_mut(index) {
            match &mut opcode.kind {
                OpcodeKind::Jump(t) | OpcodeKind::JumpIfFalse(t) => *t = target,
                _ => {}
            }
        }
    }

    fn patch_to_here(&mut self, index: usize) {
        let here = self.opcodes.len();
        self.patch_jump(index, here);
    }

    // ── Nodes ──

    fn compile_node(&mut self, node: &Node) -> Result<(), CompileError> {
        self.line_number = node.line_number;
        match &node.kind {
            NodeKind::Block(children) => {
                for child in children {
                    self.compile_node(child)?;
                }
            }
            NodeKind::Statement(statement) => self.compile_statement(statement),
            NodeKind::Return(value) => {
                let data_type = match value {
                    Some(value) => {
                        self.compile_expression(value);
                        value.data_type
                    }
                    None => DataType::Void,
                };
                self.line_number = node.line_number;
                self.emit(OpcodeKind::Return, data_type);
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.compile_expression(condition);
                let skip_then = self.emit_jump(true);
                self.compile_node(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let skip_else = self.emit_jump(false);
                        self.patch_to_here(skip_then);
                        self.compile_node(else_branch)?;
                        self.patch_to_here(skip_else);
                    }
                    None => self.patch_to_here(skip_then),
                }
            }
            NodeKind::While { condition, body } => {
                let start = self.opcodes.len();
                self.compile_expression(condition);
                let exit = self.emit_jump(true);
                self.compile_loop_body(body, start, exit)?;
            }
            NodeKind::For {
                initial,
                condition,
                iteration,
                body,
            } => {
                if let Some(initial) = initial {
                    self.compile_statement(initial);
                }
                let start = self.opcodes.len();
                let exit = condition.as_ref().map(|condition| {
                    self.compile_expression(condition);
                    self.emit_jump(true)
                });

                self.loops.push(LoopContext::default());
                self.compile_node(body)?;
                let context = self.loops.pop().unwrap_or_default();

                let continue_target = self.opcodes.len();
                self.line_number = node.line_number;
                if let Some(iteration) = iteration {
                    self.compile_statement(iteration);
                }
                let back = self.emit_jump(false);
                self.patch_jump(back, start);
                self.finish_loop(context, exit, continue_target);
            }
            NodeKind::Break | NodeKind::Continue => {
                let is_break = matches!(node.kind, NodeKind::Break);
                let jump = self.emit_jump(false);
                let Some(context) = self.loops.last_mut() else {
                    let keyword = if is_break { "break" } else { "continue" };
                    return Err(CompileError::structural(format!("'{keyword}' outside of a loop"), node.line_number));
                };
                if is_break {
                    context.break_jumps.push(jump);
                } else {
                    context.continue_jumps.push(jump);
                }
            }
            NodeKind::Label(name) => {
                if self.labels.contains_key(name) {
                    return Err(CompileError::resolution(
                        format!("Label '@{name}' is defined more than once"),
                        node.line_number,
                    ));
                }
                let here = self.opcodes.len();
                self.labels.insert(name.clone(), here);
            }
            NodeKind::Jump(name) => {
                let jump = self.emit_jump(false);
                self.label_jumps.push((jump, name.clone(), node.line_number));
            }
            NodeKind::External { kind, target } => {
                self.compile_expression(target);
                let opcode = match kind {
                    ExternalKind::Call => OpcodeKind::ExternalCall,
                    ExternalKind::Jump => OpcodeKind::ExternalJump,
                };
                self.emit(opcode, target.data_type);
            }
            NodeKind::Undefined(_) | NodeKind::Pragma(_) | NodeKind::Function { .. } => {
                return Err(CompileError::structural(
                    format!("Unexpected {} in function body", node.describe()),
                    node.line_number,
                ));
            }
        }
        Ok(())
    }

    /// Body plus backward jump of a `while` loop.
    fn compile_loop_body(&mut self, body: &Node, start: usize, exit: usize) -> Result<(), CompileError> {
        self.loops.push(LoopContext::default());
        self.compile_node(body)?;
        let context = self.loops.pop().unwrap_or_default();
        let back = self.emit_jump(false);
        self.patch_jump(back, start);
        self.finish_loop(context, Some(exit), start);
        Ok(())
    }

    fn finish_loop(&mut self, context: LoopContext, exit: Option<usize>, continue_target: usize) {
        if let Some(exit) = exit {
            self.patch_to_here(exit);
        }
        for jump in context.break_jumps {
            self.patch_to_here(jump);
        }
        for jump in context.continue_jumps {
            self.patch_jump(jump, continue_target);
        }
    }

    fn resolve_labels(&mut self) -> Result<(), CompileError> {
        for (jump, name, line) in std::mem::take(&mut self.label_jumps) {
            let Some(&target) = self.labels.get(&name) else {
                return Err(CompileError::resolution(format!("Unknown label '@{name}'"), line));
            };
            self.patch_jump(jump, target);
        }
        Ok(())
    }

    /// Whether execution can run past the last opcode.
    fn falls_off_end(&self) -> bool {
        let end = self.opcodes.len();
        let last_is_return = self.opcodes.last().is_some_and(|op| op.kind == OpcodeKind::Return);
        let jumps_to_end = self
            .opcodes
            .iter()
            .any(|op| matches!(op.kind, OpcodeKind::Jump(t) | OpcodeKind::JumpIfFalse(t) if t == end));
        !last_is_return || jumps_to_end || self.labels.values().any(|&at| at == end)
    }

    // ── Expressions ──

    /// Evaluate and discard.
    fn compile_statement(&mut self, statement: &StatementToken) {
        self.compile_expression(statement);
        if statement.data_type != DataType::Void {
            self.emit(OpcodeKind::MoveStack(-1), DataType::Void);
        }
    }

    fn compile_expression(&mut self, statement: &StatementToken) {
        let data_type = statement.data_type;
        match &statement.kind {
            StatementKind::Constant(value) => {
                self.emit(OpcodeKind::PushConstant(*value), data_type);
            }
            StatementKind::Variable(var) => {
                self.emit(OpcodeKind::GetVariable(*var), data_type);
            }
            StatementKind::FunctionCall { function, arguments } => {
                for argument in arguments {
                    self.compile_expression(argument);
                }
                self.emit(OpcodeKind::Call(*function), data_type);
            }
            StatementKind::MemoryAccess { address } => {
                self.compile_expression(address);
                self.emit(OpcodeKind::ReadMemory, data_type);
            }
            StatementKind::Cast { operand } => {
                self.compile_expression(operand);
                self.emit(
                    OpcodeKind::CastValue {
                        from: operand.data_type,
                    },
                    data_type,
                );
            }
            StatementKind::Unary { op, operand } => {
                let operation = match op {
                    UnaryKind::Negate => UnaryOperation::Negate,
                    UnaryKind::Not => UnaryOperation::Not,
                    UnaryKind::BitNot => UnaryOperation::BitNot,
                    UnaryKind::PreIncrement
                    | UnaryKind::PreDecrement
                    | UnaryKind::PostIncrement
                    | UnaryKind::PostDecrement => {
                        self.compile_increment(*op, operand);
                        return;
                    }
                };
                self.compile_expression(operand);
                self.emit(OpcodeKind::Unary(operation), data_type);
            }
            StatementKind::Binary { op, left, right } => {
                if op.is_assignment() {
                    self.compile_assignment(*op, left, right);
                    return;
                }
                self.compile_expression(left);
                self.compile_expression(right);
                if let Some(operation) = op.binary_operation() {
                    // Comparisons are typed by their operands.
                    let opcode_type = if operation.is_comparison() { left.data_type } else { data_type };
                    self.emit(OpcodeKind::Binary(operation), opcode_type);
                }
            }
            StatementKind::Conditional {
                condition,
                if_true,
                if_false,
            } => {
                self.compile_expression(condition);
                let skip_true = self.emit_jump(true);
                self.compile_expression(if_true);
                let skip_false = self.emit_jump(false);
                self.patch_to_here(skip_true);
                self.compile_expression(if_false);
                self.patch_to_here(skip_false);
            }
        }
    }

    /// Leaves the assigned value on the stack.
    fn compile_assignment(&mut self, op: Operator, target: &StatementToken, value: &StatementToken) {
        let data_type = target.data_type;
        let compound = op.compound_operation();
        match &target.kind {
            StatementKind::MemoryAccess { address } => {
                if let Some(operation) = compound {
                    let address = self.hold_address(address);
                    self.push_address(&address);
                    self.emit(OpcodeKind::ReadMemory, data_type);
                    self.compile_expression(value);
                    self.emit(OpcodeKind::Binary(operation), data_type);
                    self.push_address(&address);
                } else {
                    self.compile_expression(value);
                    self.compile_expression(address);
                }
                self.emit(OpcodeKind::WriteMemory, data_type);
            }
            StatementKind::Variable(var) => {
                if let Some(operation) = compound {
                    self.emit(OpcodeKind::GetVariable(*var), data_type);
                    self.compile_expression(value);
                    self.emit(OpcodeKind::Binary(operation), data_type);
                } else {
                    self.compile_expression(value);
                }
                self.emit(OpcodeKind::SetVariable(*var), data_type);
            }
            // Token processing only builds assignments to lvalues.
            _ => self.compile_expression(value),
        }
    }

    fn compile_increment(&mut self, kind: UnaryKind, target: &StatementToken) {
        let data_type = target.data_type;
        let operation = match kind {
            UnaryKind::PreIncrement | UnaryKind::PostIncrement => BinaryOperation::Add,
            _ => BinaryOperation::Subtract,
        };
        let postfix = matches!(kind, UnaryKind::PostIncrement | UnaryKind::PostDecrement);
        let one = if data_type.is_float() { 1.0f64.to_bits() } else { 1 };

        match &target.kind {
            StatementKind::Variable(var) => {
                if postfix {
                    // Old value stays below the updated one.
                    self.emit(OpcodeKind::GetVariable(*var), data_type);
                }
                self.emit(OpcodeKind::GetVariable(*var), data_type);
                self.emit(OpcodeKind::PushConstant(one), data_type);
                self.emit(OpcodeKind::Binary(operation), data_type);
                self.emit(OpcodeKind::SetVariable(*var), data_type);
            }
            StatementKind::MemoryAccess { address } => {
                let address = self.hold_address(address);
                if postfix {
                    self.push_address(&address);
                    self.emit(OpcodeKind::ReadMemory, data_type);
                }
                self.push_address(&address);
                self.emit(OpcodeKind::ReadMemory, data_type);
                self.emit(OpcodeKind::PushConstant(one), data_type);
                self.emit(OpcodeKind::Binary(operation), data_type);
                self.push_address(&address);
                self.emit(OpcodeKind::WriteMemory, data_type);
            }
            _ => {
                self.compile_expression(target);
                return;
            }
        }
        if postfix {
            self.emit(OpcodeKind::MoveStack(-1), DataType::Void);
        }
    }

    /// Evaluate a read-modify-write address once. Constant addresses are
    /// re-pushed, anything else is kept in a temporary local.
    fn hold_address(&mut self, address: &StatementToken) -> HeldAddress {
        if let Some(value) = address.as_constant() {
            return HeldAddress::Constant(value, address.data_type);
        }
        let temporary = VariableRef::Local(self.scope.declare_temporary(address.data_type, self.line_number));
        self.compile_expression(address);
        self.emit(OpcodeKind::SetVariable(temporary), address.data_type);
        self.emit(OpcodeKind::MoveStack(-1), DataType::Void);
        HeldAddress::Variable(temporary, address.data_type)
    }

    fn push_address(&mut self, address: &HeldAddress) {
        match *address {
            HeldAddress::Constant(value, data_type) => self.emit(OpcodeKind::PushConstant(value), data_type),
            HeldAddress::Variable(var, data_type) => self.emit(OpcodeKind::GetVariable(var), data_type),
        };
    }
}

enum HeldAddress {
    Constant(u64, DataType),
    Variable(VariableRef, DataType),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::compiler::error::ErrorKind;
    use crate::program::function::Parameter;

    fn constant(value: u64) -> StatementToken {
        StatementToken::constant(value, DataType::S32)
    }

    fn node(kind: NodeKind) -> Node {
        Node::new(kind, 1)
    }

    fn emit_body(function: &ScriptFunction, body: &[Node]) -> Result<Vec<Opcode>, CompileError> {
        compile_function(function, body, 0, &mut ScopeContext::new(Vec::new()))
    }

    #[test]
    fn parameters_pop_in_reverse() {
        let function = ScriptFunction::new(
            "f",
            DataType::Void,
            vec![Parameter::new(DataType::U8, "a"), Parameter::new(DataType::U16, "b")],
        );
        let opcodes = emit_body(&function, &[]).unwrap();
        assert_eq!(opcodes[0].kind, OpcodeKind::SetVariable(VariableRef::Local(LocalId(1))));
        assert_eq!(opcodes[0].data_type, DataType::U16);
        assert_eq!(opcodes[2].kind, OpcodeKind::SetVariable(VariableRef::Local(LocalId(0))));
        assert_eq!(opcodes.last().unwrap().kind, OpcodeKind::Return);
    }

    #[test]
    fn if_else_jumps_land_after_branches() {
        let function = ScriptFunction::new("f", DataType::Void, Vec::new());
        let body = [node(NodeKind::If {
            condition: StatementToken::constant(1, DataType::Bool),
            then_branch: Box::new(node(NodeKind::Statement(constant(2)))),
            else_branch: Some(Box::new(node(NodeKind::Statement(constant(3))))),
        })];
        let opcodes = emit_body(&function, &body).unwrap();
        // push cond, jf, push 2, drop, jump, push 3, drop, return
        assert_eq!(opcodes[1].kind, OpcodeKind::JumpIfFalse(5));
        assert_eq!(opcodes[4].kind, OpcodeKind::Jump(7));
        assert_eq!(opcodes[7].kind, OpcodeKind::Return);
    }

    #[test]
    fn break_outside_loop_fails() {
        let function = ScriptFunction::new("f", DataType::Void, Vec::new());
        let err = emit_body(&function, &[node(NodeKind::Break)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Structural);
    }

    #[test]
    fn labels_resolve_after_the_pass() {
        let function = ScriptFunction::new("f", DataType::Void, Vec::new());
        let body = [
            node(NodeKind::Jump("end".into())),
            node(NodeKind::Statement(constant(1))),
            node(NodeKind::Label("end".into())),
        ];
        let opcodes = emit_body(&function, &body).unwrap();
        assert_eq!(opcodes[0].kind, OpcodeKind::Jump(3));

        let missing = [node(NodeKind::Jump("nowhere".into()))];
        assert_eq!(emit_body(&function, &missing).unwrap_err().kind, ErrorKind::Resolution);
        let twice = [node(NodeKind::Label("a".into())), node(NodeKind::Label("a".into()))];
        assert!(emit_body(&function, &twice).is_err());
    }

    #[test]
    fn missing_return_in_value_function_returns_zero() {
        let function = ScriptFunction::new("f", DataType::U32, Vec::new());
        let opcodes = emit_body(&function, &[]).unwrap();
        assert_eq!(opcodes[0].kind, OpcodeKind::PushConstant(0));
        assert_eq!(opcodes[0].data_type, DataType::U32);
        assert_eq!(opcodes[1].kind, OpcodeKind::Return);
    }
}
