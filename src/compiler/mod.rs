//! The lemonscript compiler: source files in, per-function opcodes out.

#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod error;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod token;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod lexer;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod line_numbers;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod preprocessor;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod loader;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod node;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod node_builder;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod globals_pass;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod scope;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod token_processing;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod shaping;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod function_compiler;

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use log::{debug, info};

pub use crate::options::CompileOptions;
pub use error::{CompileError, Diagnostic, ErrorKind};

use function_compiler::compile_function;
use globals_pass::process_global_definitions;
use line_numbers::LineNumberTable;
use loader::LoadedSource;
use node::NodeKind;
use node_builder::build_nodes;
use scope::ScopeContext;
use shaping::{shape_function_body, ShapingContext};
use crate::program::function::{FunctionId, FunctionRef};
use crate::program::globals_lookup::GlobalsLookup;
use crate::program::module::Module;
use crate::program::opcode::OpcodeKind;
use crate::program::NativeBindings;

/// Compiles scripts into a module against the host's native bindings.
///
/// A failed compile clears the module's script content, so callers never
/// see a half-built program.
pub struct Compiler<'a> {
    module: &'a mut Module,
    natives: &'a NativeBindings,
    options: CompileOptions,
}

impl<'a> Compiler<'a> {
    pub fn new(module: &'a mut Module, natives: &'a NativeBindings, options: CompileOptions) -> Self {
        Self {
            module,
            natives,
            options,
        }
    }

    /// Load a script file with its includes and compile it.
    pub fn load_script(&mut self, path: &Path) -> Result<(), Vec<Diagnostic>> {
        debug!("Loading script {}", path.display());
        let loaded = loader::load_script(path, &self.options.preprocessor_definitions).map_err(|d| self.fail(d))?;
        self.compile_loaded(&path.display().to_string(), &loaded)
    }

    /// Compile in-memory source. Includes resolve against the current directory.
    pub fn compile_source(&mut self, name: &str, text: &str) -> Result<(), Vec<Diagnostic>> {
        let loaded = loader::load_source(name, text, Path::new("."), &self.options.preprocessor_definitions)
            .map_err(|d| self.fail(d))?;
        self.compile_loaded(name, &loaded)
    }

    fn fail(&mut self, diagnostic: Diagnostic) -> Vec<Diagnostic> {
        self.module.clear();
        vec![diagnostic]
    }

    fn compile_loaded(&mut self, name: &str, loaded: &LoadedSource) -> Result<(), Vec<Diagnostic>> {
        if let Some(path) = self.options.output_combined_source.clone() {
            let mut text = loaded.lines.join("\n");
            text.push('\n');
            fs::write(&path, text).map_err(|e| {
                self.fail(Diagnostic::new(format!("Cannot write combined source: {e}"), path.display().to_string(), 0))
            })?;
        }

        if let Err(e) = self.compile(&loaded.lines, &loaded.line_numbers) {
            let (line, filename) = loaded.line_numbers.translate_line_number(e.line_number);
            let diagnostic = Diagnostic::new(e.message, filename, line);
            return Err(self.fail(diagnostic));
        }

        if let Some(path) = self.options.output_translated_source.clone() {
            let listing = self.translated_listing(&loaded.line_numbers);
            fs::write(&path, listing).map_err(|e| {
                self.fail(Diagnostic::new(format!("Cannot write translated source: {e}"), path.display().to_string(), 0))
            })?;
        }

        info!(
            "Compiled '{name}': {} functions, {} globals, {} string literals",
            self.module.functions().len(),
            self.module.globals().count(),
            self.module.string_literal_count(),
        );
        Ok(())
    }

    fn compile(&mut self, lines: &[String], line_numbers: &LineNumberTable) -> Result<(), CompileError> {
        let root = build_nodes(lines, self.module)?;
        let NodeKind::Block(mut nodes) = root.kind else {
            return Err(CompileError::structural("Expected a root block", root.line_number));
        };
        process_global_definitions(&mut nodes, self.module, line_numbers)?;

        for node in nodes {
            match node.kind {
                NodeKind::Function { function, body } => self.compile_function(function, body, node.line_number)?,
                _ => {
                    return Err(CompileError::structural(
                        "Statements are not allowed outside of functions",
                        node.line_number,
                    ));
                }
            }
        }
        Ok(())
    }

    fn compile_function(&mut self, id: FunctionId, body: Vec<node::Node>, line: u32) -> Result<(), CompileError> {
        let missing = || CompileError::structural("Function vanished from the module", line);
        let locals = std::mem::take(&mut self.module.function_mut(id).ok_or_else(missing)?.locals);
        let mut scope = ScopeContext::new(locals);

        let lookup = GlobalsLookup::new(self.module, self.natives);
        let function = lookup.module().function(id).ok_or_else(missing)?;
        let context = ShapingContext {
            lookup,
            return_type: function.return_type,
            external_address_type: self.options.external_address_type,
        };
        let shaped = shape_function_body(body, &context, &mut scope)?;
        let opcodes = compile_function(function, &shaped, line, &mut scope)?;
        debug!("Compiled function '{}' into {} opcodes", function.name, opcodes.len());

        let function = self.module.function_mut(id).ok_or_else(missing)?;
        function.locals = scope.into_locals();
        function.opcodes = opcodes;
        Ok(())
    }

    /// Readable listing of every compiled function with original line numbers.
    fn translated_listing(&self, line_numbers: &LineNumberTable) -> String {
        let lookup = GlobalsLookup::new(self.module, self.natives);
        let mut out = String::new();
        for (index, function) in self.module.functions().iter().enumerate() {
            let signature = lookup
                .signature(FunctionRef::Script(FunctionId(index)))
                .map_or_else(|| function.name.clone(), |sig| sig.to_string());
            let _ = writeln!(out, "// {}", function.source_filename);
            for pragma in &function.pragmas {
                let _ = writeln!(out, "//# {pragma}");
            }
            let _ = writeln!(out, "function {signature}");
            for (position, opcode) in function.opcodes.iter().enumerate() {
                let (line, _) = line_numbers.translate_line_number(opcode.line_number);
                let _ = write!(out, "{position:5}  {line:5}  {opcode}");
                if let OpcodeKind::Call(callee) = opcode.kind {
                    let _ = write!(out, "  ; {}", lookup.function_name(callee));
                }
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}
