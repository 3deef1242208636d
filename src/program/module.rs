//! Everything one script load produces: functions, globals, defines and the
//! interned string literals.

use std::fmt;

use indexmap::IndexMap;

use super::datatype::DataType;
use super::function::{FunctionId, GlobalId, ScriptFunction};
use crate::compiler::token::TokenList;
use crate::util::murmur2_64;

#[derive(Debug, Clone)]
pub struct GlobalVariable {
    pub name: String,
    pub data_type: DataType,
    pub initial_value: u64,
}

/// A named token list substituted wherever its identifier appears.
#[derive(Debug, Clone)]
pub struct Define {
    pub name: String,
    pub data_type: Option<DataType>,
    pub content: TokenList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    DuplicateFunction(String),
    DuplicateGlobal(String),
    DuplicateDefine(String),
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleError::DuplicateFunction(sig) => write!(f, "Function '{sig}' is already defined"),
            ModuleError::DuplicateGlobal(name) => write!(f, "Global variable '{name}' is already defined"),
            ModuleError::DuplicateDefine(name) => write!(f, "Define '{name}' is already defined"),
        }
    }
}

impl std::error::Error for ModuleError {}

#[derive(Debug, Default)]
pub struct Module {
    functions: Vec<ScriptFunction>,
    function_names: IndexMap<String, Vec<FunctionId>>,
    globals: IndexMap<String, GlobalVariable>,
    defines: IndexMap<String, Define>,
    string_literals: IndexMap<u64, String>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all script content, e.g. after a failed compile.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn add_script_function(&mut self, function: ScriptFunction) -> Result<FunctionId, ModuleError> {
        let types: Vec<DataType> = function.parameters.iter().map(|p| p.data_type).collect();
        let duplicate = self
            .function_overloads(&function.name)
            .iter()
            .any(|id| self.functions.get(id.0).is_some_and(|f| f.has_signature(&types)));
        if duplicate {
            let sig = super::function::Signature {
                name: &function.name,
                return_type: function.return_type,
                parameters: &function.parameters,
            };
            return Err(ModuleError::DuplicateFunction(sig.to_string()));
        }
        let id = FunctionId(self.functions.len());
        self.function_names.entry(function.name.clone()).or_default().push(id);
        self.functions.push(function);
        Ok(id)
    }

    pub fn add_global_variable(&mut self, global: GlobalVariable) -> Result<GlobalId, ModuleError> {
        if self.globals.contains_key(&global.name) {
            return Err(ModuleError::DuplicateGlobal(global.name));
        }
        let (index, _) = self.globals.insert_full(global.name.clone(), global);
        Ok(GlobalId(index))
    }

    pub fn add_define(&mut self, define: Define) -> Result<(), ModuleError> {
        if self.defines.contains_key(&define.name) {
            return Err(ModuleError::DuplicateDefine(define.name));
        }
        self.defines.insert(define.name.clone(), define);
        Ok(())
    }

    /// Intern a string literal and return the hash it is stored under.
    pub fn add_string_literal(&mut self, text: &str) -> u64 {
        let hash = murmur2_64(text.as_bytes());
        self.string_literals.entry(hash).or_insert_with(|| text.to_string());
        hash
    }

    pub fn string_literal(&self, hash: u64) -> Option<&str> {
        self.string_literals.get(&hash).map(String::as_str)
    }

    pub fn string_literal_count(&self) -> usize {
        self.string_literals.len()
    }

    pub fn functions(&self) -> &[ScriptFunction] {
        &self.functions
    }

    pub fn function(&self, id: FunctionId) -> Option<&ScriptFunction> {
        self.functions.get(id.0)
    }

    pub fn function_mut(&mut self, id: FunctionId) -> Option<&mut ScriptFunction> {
        self.functions.get_mut(id.0)
    }

    pub fn function_overloads(&self, name: &str) -> &[FunctionId] {
        self.function_names.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn global_by_name(&self, name: &str) -> Option<(GlobalId, &GlobalVariable)> {
        self.globals
            .get_full(name)
            .map(|(index, _, global)| (GlobalId(index), global))
    }

    pub fn global(&self, id: GlobalId) -> Option<&GlobalVariable> {
        self.globals.get_index(id.0).map(|(_, g)| g)
    }

    pub fn globals(&self) -> impl Iterator<Item = &GlobalVariable> {
        self.globals.values()
    }

    pub fn define(&self, name: &str) -> Option<&Define> {
        self.defines.get(name)
    }
}
