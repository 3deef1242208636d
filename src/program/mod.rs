pub mod bindings;
pub mod datatype;
pub mod function;
pub mod globals_lookup;
pub mod module;
pub mod opcode;

pub use bindings::{BindingError, NativeBindings, NativeHandler, VariableAccessor};
pub use datatype::DataType;
pub use function::{FunctionRef, Parameter, ScriptFunction, VariableRef};
pub use globals_lookup::GlobalsLookup;
pub use module::Module;
pub use opcode::{Opcode, OpcodeKind};
