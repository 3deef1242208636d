//! Small stack interpreter for emitted opcodes, used by tests to check what
//! compiled code computes.

use std::collections::HashMap;

use crate::compiler::{CompileOptions, Compiler, Diagnostic};
use crate::program::datatype::{cast_value, DataType};
use crate::program::function::{FunctionId, FunctionRef, VariableRef};
use crate::program::opcode::{BinaryOperation, OpcodeKind, UnaryOperation};
use crate::program::{Module, NativeBindings};

/// Maximum executed opcodes per top-level call to stop runaway loops.
const MAX_STEPS: usize = 1_000_000;

/// Compile `source` into a fresh module.
pub fn compile(source: &str, natives: &NativeBindings) -> Result<Module, Vec<Diagnostic>> {
    let mut module = Module::new();
    Compiler::new(&mut module, natives, CompileOptions::default()).compile_source("test.lemon", source)?;
    Ok(module)
}

pub struct Machine<'a> {
    module: &'a Module,
    natives: &'a NativeBindings,
    pub globals: Vec<u64>,
    pub memory: HashMap<u64, u64>,
    /// Targets of `call <expr>` / `jump <expr>` in execution order.
    pub external_targets: Vec<u64>,
    stack: Vec<u64>,
    steps: usize,
}

impl<'a> Machine<'a> {
    pub fn new(module: &'a Module, natives: &'a NativeBindings) -> Self {
        Self {
            module,
            natives,
            globals: module.globals().map(|g| g.initial_value).collect(),
            memory: HashMap::new(),
            external_targets: Vec::new(),
            stack: Vec::new(),
            steps: 0,
        }
    }

    /// Call the first overload named `name`; returns its result bits (0 for void).
    pub fn call(&mut self, name: &str, arguments: &[u64]) -> Result<u64, String> {
        let id = *self
            .module
            .function_overloads(name)
            .first()
            .ok_or_else(|| format!("no function '{name}'"))?;
        self.stack.clear();
        self.steps = 0;
        self.stack.extend_from_slice(arguments);
        self.execute(id)?;
        let returns_value = self.module.function(id).is_some_and(|f| f.return_type != DataType::Void);
        let result = if returns_value { self.pop()? } else { 0 };
        if !self.stack.is_empty() {
            return Err(format!("stack not balanced after '{name}': {:?}", self.stack));
        }
        Ok(result)
    }

    fn pop(&mut self) -> Result<u64, String> {
        self.stack.pop().ok_or_else(|| "stack underflow".to_string())
    }

    fn top(&self) -> Result<u64, String> {
        self.stack.last().copied().ok_or_else(|| "stack underflow".to_string())
    }

    fn execute(&mut self, id: FunctionId) -> Result<(), String> {
        let function = self.module.function(id).ok_or("bad function id")?;
        let mut locals = vec![0u64; function.locals.len()];
        let mut pc = 0;

        loop {
            self.steps += 1;
            if self.steps > MAX_STEPS {
                return Err("step limit exceeded".into());
            }
            let op = *function
                .opcodes
                .get(pc)
                .ok_or_else(|| format!("'{}' ran past its last opcode", function.name))?;
            let ty = op.data_type;
            pc += 1;

            match op.kind {
                OpcodeKind::MoveStack(n) => {
                    if n < 0 {
                        for _ in 0..n.unsigned_abs() {
                            self.pop()?;
                        }
                    } else {
                        self.stack.extend(std::iter::repeat(0).take(n.unsigned_abs().into()));
                    }
                }
                OpcodeKind::PushConstant(value) => self.stack.push(value),
                OpcodeKind::GetVariable(var) => {
                    let value = match var {
                        VariableRef::Local(l) => locals.get(l.0).copied().ok_or("bad local")?,
                        VariableRef::Global(g) => self.globals.get(g.0).copied().ok_or("bad global")?,
                        VariableRef::External(e) => self.natives.variable(e).ok_or("bad native variable")?.accessor.get(),
                    };
                    self.stack.push(value);
                }
                OpcodeKind::SetVariable(var) => {
                    let value = ty.normalize(self.top()?);
                    match var {
                        VariableRef::Local(l) => *locals.get_mut(l.0).ok_or("bad local")? = value,
                        VariableRef::Global(g) => *self.globals.get_mut(g.0).ok_or("bad global")? = value,
                        VariableRef::External(e) => {
                            self.natives.variable(e).ok_or("bad native variable")?.accessor.set(value);
                        }
                    }
                }
                OpcodeKind::ReadMemory => {
                    let address = self.pop()?;
                    let value = self.memory.get(&address).copied().unwrap_or(0);
                    self.stack.push(ty.normalize(value));
                }
                OpcodeKind::WriteMemory => {
                    let address = self.pop()?;
                    let value = ty.normalize(self.top()?);
                    self.memory.insert(address, value);
                }
                OpcodeKind::CastValue { from } => {
                    let value = self.pop()?;
                    self.stack.push(cast_value(value, from, ty));
                }
                OpcodeKind::Unary(operation) => {
                    let value = self.pop()?;
                    self.stack.push(unary(operation, ty, value));
                }
                OpcodeKind::Binary(operation) => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    self.stack.push(binary(operation, ty, left, right)?);
                }
                OpcodeKind::Jump(target) => pc = target,
                OpcodeKind::JumpIfFalse(target) => {
                    if self.pop()? == 0 {
                        pc = target;
                    }
                }
                OpcodeKind::Call(FunctionRef::Script(callee)) => self.execute(callee)?,
                OpcodeKind::Call(FunctionRef::Native(native)) => {
                    let native = self.natives.function(native).ok_or("bad native function")?;
                    let split = self
                        .stack
                        .len()
                        .checked_sub(native.parameters.len())
                        .ok_or("stack underflow")?;
                    let arguments = self.stack.split_off(split);
                    let result = (native.handler)(&arguments);
                    if native.return_type != DataType::Void {
                        self.stack.push(native.return_type.normalize(result));
                    }
                }
                OpcodeKind::Return => return Ok(()),
                OpcodeKind::ExternalCall => {
                    let target = self.pop()?;
                    self.external_targets.push(target);
                }
                OpcodeKind::ExternalJump => {
                    let target = self.pop()?;
                    self.external_targets.push(target);
                    return Ok(());
                }
            }
        }
    }
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn unary(operation: UnaryOperation, ty: DataType, value: u64) -> u64 {
    match operation {
        UnaryOperation::Negate if ty.is_float() => ty.normalize((-f64::from_bits(value)).to_bits()),
        UnaryOperation::Negate => ty.normalize((value as i64).wrapping_neg() as u64),
        UnaryOperation::Not => u64::from(value == 0),
        UnaryOperation::BitNot => ty.normalize(!value),
    }
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn binary(operation: BinaryOperation, ty: DataType, left: u64, right: u64) -> Result<u64, String> {
    use BinaryOperation as B;

    match operation {
        B::LogicalAnd => return Ok(u64::from(left != 0 && right != 0)),
        B::LogicalOr => return Ok(u64::from(left != 0 || right != 0)),
        _ => {}
    }

    if ty.is_float() {
        let (a, b) = (f64::from_bits(left), f64::from_bits(right));
        let result = match operation {
            B::Add => a + b,
            B::Subtract => a - b,
            B::Multiply => a * b,
            B::Divide => a / b,
            B::Modulo => a % b,
            B::CompareEqual => return Ok(u64::from(a == b)),
            B::CompareNotEqual => return Ok(u64::from(a != b)),
            B::CompareLess => return Ok(u64::from(a < b)),
            B::CompareLessOrEqual => return Ok(u64::from(a <= b)),
            B::CompareGreater => return Ok(u64::from(a > b)),
            B::CompareGreaterOrEqual => return Ok(u64::from(a >= b)),
            _ => return Err(format!("{operation:?} on {ty}")),
        };
        return Ok(ty.normalize(result.to_bits()));
    }

    let signed = ty.is_signed();
    let (a, b) = (left as i64, right as i64);
    let shift = (right & 63) as u32;
    let result = match operation {
        B::Add => left.wrapping_add(right),
        B::Subtract => left.wrapping_sub(right),
        B::Multiply => left.wrapping_mul(right),
        B::Divide | B::Modulo if right == 0 => return Err("division by zero".into()),
        B::Divide if signed => a.wrapping_div(b) as u64,
        B::Divide => left / right,
        B::Modulo if signed => a.wrapping_rem(b) as u64,
        B::Modulo => left % right,
        B::ShiftLeft => left.wrapping_shl(shift),
        B::ShiftRight if signed => a.wrapping_shr(shift) as u64,
        B::ShiftRight => left.wrapping_shr(shift),
        B::BitAnd => left & right,
        B::BitOr => left | right,
        B::BitXor => left ^ right,
        B::CompareEqual => return Ok(u64::from(left == right)),
        B::CompareNotEqual => return Ok(u64::from(left != right)),
        B::CompareLess if signed => return Ok(u64::from(a < b)),
        B::CompareLess => return Ok(u64::from(left < right)),
        B::CompareLessOrEqual if signed => return Ok(u64::from(a <= b)),
        B::CompareLessOrEqual => return Ok(u64::from(left <= right)),
        B::CompareGreater if signed => return Ok(u64::from(a > b)),
        B::CompareGreater => return Ok(u64::from(left > right)),
        B::CompareGreaterOrEqual if signed => return Ok(u64::from(a >= b)),
        B::CompareGreaterOrEqual => return Ok(u64::from(left >= right)),
        B::LogicalAnd | B::LogicalOr => 0,
    };
    Ok(ty.normalize(result))
}
