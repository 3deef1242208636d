//! lemonscript: a small scripting language compiled to stack-machine opcodes.
//!
//! The host fills a [`program::NativeBindings`] registry, then compiles
//! scripts into a [`program::Module`] with [`compiler::Compiler`].

pub mod compiler;
pub mod options;
pub mod program;
pub mod util;

#[cfg(test)]
mod testing;
