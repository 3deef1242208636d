use super::bindings::{NativeBindings, NativeVariable};
use super::function::{FunctionRef, GlobalId, NativeVariableId, Signature};
use super::module::{Define, GlobalVariable, Module};

/// Read-only name resolver over a module and the host's native bindings.
#[derive(Clone, Copy)]
pub struct GlobalsLookup<'a> {
    module: &'a Module,
    natives: &'a NativeBindings,
}

impl<'a> GlobalsLookup<'a> {
    pub fn new(module: &'a Module, natives: &'a NativeBindings) -> Self {
        Self { module, natives }
    }

    pub fn module(&self) -> &'a Module {
        self.module
    }

    /// Overload set for `name`: script functions first, then native
    /// functions, each in registration order.
    pub fn overloads(&self, name: &str) -> Vec<FunctionRef> {
        self.module
            .function_overloads(name)
            .iter()
            .map(|id| FunctionRef::Script(*id))
            .chain(self.natives.function_overloads(name).iter().map(|id| FunctionRef::Native(*id)))
            .collect()
    }

    pub fn signature(&self, function: FunctionRef) -> Option<Signature<'a>> {
        match function {
            FunctionRef::Script(id) => self.module.function(id).map(|f| Signature {
                name: &f.name,
                return_type: f.return_type,
                parameters: &f.parameters,
            }),
            FunctionRef::Native(id) => self.natives.function(id).map(|f| f.signature()),
        }
    }

    pub fn global(&self, name: &str) -> Option<(GlobalId, &'a GlobalVariable)> {
        self.module.global_by_name(name)
    }

    pub fn define(&self, name: &str) -> Option<&'a Define> {
        self.module.define(name)
    }

    pub fn native_variable(&self, name: &str) -> Option<(NativeVariableId, &'a NativeVariable)> {
        self.natives.variable_by_name(name)
    }

    /// Display name for listings.
    pub fn function_name(&self, function: FunctionRef) -> String {
        self.signature(function)
            .map_or_else(|| function.to_string(), |sig| sig.name.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::program::datatype::DataType;
    use crate::program::function::{Parameter, ScriptFunction};

    #[test]
    fn script_overloads_come_before_natives() {
        let mut module = Module::new();
        let mut natives = NativeBindings::new();
        let native = natives
            .register_function("max", vec![Parameter::new(DataType::U8, "a")], DataType::U8, Arc::new(|_| 0))
            .unwrap();
        let script = module
            .add_script_function(ScriptFunction::new("max", DataType::U32, vec![Parameter::new(DataType::U32, "a")]))
            .unwrap();

        let lookup = GlobalsLookup::new(&module, &natives);
        assert_eq!(lookup.overloads("max"), vec![FunctionRef::Script(script), FunctionRef::Native(native)]);
        assert_eq!(lookup.signature(FunctionRef::Native(native)).unwrap().return_type, DataType::U8);
        assert!(lookup.overloads("min").is_empty());
    }
}
