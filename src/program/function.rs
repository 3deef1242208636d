use std::fmt;

use super::datatype::DataType;
use super::opcode::Opcode;

/// Index of a script function inside its `Module`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub usize);

/// Index of a native function inside the host's `NativeBindings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeFunctionId(pub usize);

/// Index of a native variable inside the host's `NativeBindings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeVariableId(pub usize);

/// Index of a global variable inside its `Module`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub usize);

/// Index of a local variable inside its function's local table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub usize);

/// Member of an overload set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionRef {
    Script(FunctionId),
    Native(NativeFunctionId),
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script(id) => write!(f, "script#{}", id.0),
            Self::Native(id) => write!(f, "native#{}", id.0),
        }
    }
}

/// Storage an expression reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableRef {
    Local(LocalId),
    Global(GlobalId),
    External(NativeVariableId),
}

impl fmt::Display for VariableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "local#{}", id.0),
            Self::Global(id) => write!(f, "global#{}", id.0),
            Self::External(id) => write!(f, "external#{}", id.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub data_type: DataType,
    pub identifier: String,
}

impl Parameter {
    pub fn new(data_type: DataType, identifier: impl Into<String>) -> Self {
        Self {
            data_type,
            identifier: identifier.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalVariable {
    pub name: String,
    pub data_type: DataType,
    pub line_number: u32,
}

/// A function defined in script code.
#[derive(Debug, Clone)]
pub struct ScriptFunction {
    pub name: String,
    pub return_type: DataType,
    pub parameters: Vec<Parameter>,
    /// All locals by id; the parameters come first, in declaration order.
    pub locals: Vec<LocalVariable>,
    pub pragmas: Vec<String>,
    pub source_filename: String,
    /// Flattened line number minus the original line number of the header.
    pub source_base_line_offset: u32,
    pub opcodes: Vec<Opcode>,
}

impl ScriptFunction {
    pub fn new(name: impl Into<String>, return_type: DataType, parameters: Vec<Parameter>) -> Self {
        Self {
            name: name.into(),
            return_type,
            parameters,
            locals: Vec::new(),
            pragmas: Vec::new(),
            source_filename: String::new(),
            source_base_line_offset: 0,
            opcodes: Vec::new(),
        }
    }

    pub fn add_local_variable(&mut self, name: impl Into<String>, data_type: DataType, line_number: u32) -> LocalId {
        self.locals.push(LocalVariable {
            name: name.into(),
            data_type,
            line_number,
        });
        LocalId(self.locals.len() - 1)
    }

    /// True when `types` matches the parameter list exactly.
    pub fn has_signature(&self, types: &[DataType]) -> bool {
        self.parameters.len() == types.len()
            && self.parameters.iter().zip(types).all(|(p, t)| p.data_type == *t)
    }
}

/// Signature view shared by script and native functions for overload resolution.
#[derive(Debug, Clone, Copy)]
pub struct Signature<'a> {
    pub name: &'a str,
    pub return_type: DataType,
    pub parameters: &'a [Parameter],
}

impl fmt::Display for Signature<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.return_type, self.name)?;
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", p.data_type, p.identifier)?;
        }
        f.write_str(")")
    }
}
