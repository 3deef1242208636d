//! Host-side registry of native functions and variables.
//!
//! The embedding host owns this registry and fills it before compiling. The
//! compiler only resolves names and types against it; the handlers and
//! accessors are for the runtime.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::datatype::DataType;
use super::function::{NativeFunctionId, NativeVariableId, Parameter, Signature};

/// Callback invoked by the runtime with raw argument bits.
pub type NativeHandler = Arc<dyn Fn(&[u64]) -> u64 + Send + Sync>;

/// Getter/setter pair for a native variable.
pub trait VariableAccessor: Send + Sync {
    fn get(&self) -> u64;
    fn set(&self, value: u64);
}

pub struct NativeFunction {
    pub name: String,
    pub return_type: DataType,
    pub parameters: Vec<Parameter>,
    pub handler: NativeHandler,
}

impl NativeFunction {
    pub fn signature(&self) -> Signature<'_> {
        Signature {
            name: &self.name,
            return_type: self.return_type,
            parameters: &self.parameters,
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.signature())
    }
}

pub struct NativeVariable {
    pub name: String,
    pub data_type: DataType,
    pub accessor: Arc<dyn VariableAccessor>,
}

impl fmt::Debug for NativeVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeVariable({} {})", self.data_type, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    DuplicateFunction(String),
    DuplicateVariable(String),
}

impl fmt::Display for BindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingError::DuplicateFunction(sig) => {
                write!(f, "Native function with signature '{sig}' is already registered")
            }
            BindingError::DuplicateVariable(name) => {
                write!(f, "Native variable '{name}' is already registered")
            }
        }
    }
}

impl std::error::Error for BindingError {}

#[derive(Debug, Default)]
pub struct NativeBindings {
    functions: Vec<NativeFunction>,
    /// Name → ids in registration order.
    function_names: IndexMap<String, Vec<NativeFunctionId>>,
    variables: IndexMap<String, NativeVariable>,
}

impl NativeBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native function. Overloads with different parameter types
    /// are allowed; the exact same signature twice is not.
    pub fn register_function(
        &mut self,
        name: &str,
        parameters: Vec<Parameter>,
        return_type: DataType,
        handler: NativeHandler,
    ) -> Result<NativeFunctionId, BindingError> {
        let duplicate = self.function_overloads(name).iter().any(|id| {
            self.functions.get(id.0).is_some_and(|existing| {
                existing.parameters.len() == parameters.len()
                    && existing.parameters.iter().zip(&parameters).all(|(a, b)| a.data_type == b.data_type)
            })
        });
        let function = NativeFunction {
            name: name.to_string(),
            return_type,
            parameters,
            handler,
        };
        if duplicate {
            return Err(BindingError::DuplicateFunction(function.signature().to_string()));
        }
        let id = NativeFunctionId(self.functions.len());
        self.functions.push(function);
        self.function_names.entry(name.to_string()).or_default().push(id);
        Ok(id)
    }

    pub fn register_variable(
        &mut self,
        name: &str,
        data_type: DataType,
        accessor: Arc<dyn VariableAccessor>,
    ) -> Result<NativeVariableId, BindingError> {
        if self.variables.contains_key(name) {
            return Err(BindingError::DuplicateVariable(name.to_string()));
        }
        let (index, _) = self.variables.insert_full(
            name.to_string(),
            NativeVariable {
                name: name.to_string(),
                data_type,
                accessor,
            },
        );
        Ok(NativeVariableId(index))
    }

    pub fn function_overloads(&self, name: &str) -> &[NativeFunctionId] {
        self.function_names.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn function(&self, id: NativeFunctionId) -> Option<&NativeFunction> {
        self.functions.get(id.0)
    }

    pub fn variable_by_name(&self, name: &str) -> Option<(NativeVariableId, &NativeVariable)> {
        self.variables
            .get_full(name)
            .map(|(index, _, variable)| (NativeVariableId(index), variable))
    }

    pub fn variable(&self, id: NativeVariableId) -> Option<&NativeVariable> {
        self.variables.get_index(id.0).map(|(_, v)| v)
    }
}
