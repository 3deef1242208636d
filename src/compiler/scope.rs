//! Lexical scopes for local variable resolution while a function is compiled.

use std::ops::{Deref, DerefMut};

use super::error::CompileError;
use crate::program::datatype::DataType;
use crate::program::function::{LocalId, LocalVariable};

/// The local variable table of one function plus the set of locals visible
/// at the current point of the walk.
#[derive(Debug, Default)]
pub struct ScopeContext {
    locals: Vec<LocalVariable>,
    visible: Vec<LocalId>,
    /// Index into `visible` where each open scope starts.
    scope_starts: Vec<usize>,
}

impl ScopeContext {
    /// Start with the function's existing locals (its parameters) all visible
    /// in the outermost scope.
    pub fn new(locals: Vec<LocalVariable>) -> Self {
        let visible = (0..locals.len()).map(LocalId).collect();
        Self {
            locals,
            visible,
            scope_starts: vec![0],
        }
    }

    /// Open a nested scope; it closes when the guard is dropped.
    pub fn begin_scope(&mut self) -> ScopeGuard<'_> {
        let visible_len = self.visible.len();
        self.scope_starts.push(visible_len);
        ScopeGuard {
            context: self,
            visible_len,
        }
    }

    fn current_scope_start(&self) -> usize {
        self.scope_starts.last().copied().unwrap_or(0)
    }

    /// Declare a local in the innermost scope. Shadowing outer scopes is fine,
    /// redeclaring within the same scope is not.
    pub fn declare(&mut self, name: &str, data_type: DataType, line_number: u32) -> Result<LocalId, CompileError> {
        let start = self.current_scope_start();
        let redeclared = self
            .visible
            .iter()
            .skip(start)
            .any(|id| self.locals.get(id.0).is_some_and(|l| l.name == name));
        if redeclared {
            return Err(CompileError::resolution(
                format!("Variable '{name}' is already declared in this scope"),
                line_number,
            ));
        }
        let id = LocalId(self.locals.len());
        self.locals.push(LocalVariable {
            name: name.to_string(),
            data_type,
            line_number,
        });
        self.visible.push(id);
        Ok(id)
    }

    /// Unnamed local for a value the emitted code must reuse. Never visible
    /// to name lookup.
    pub fn declare_temporary(&mut self, data_type: DataType, line_number: u32) -> LocalId {
        let id = LocalId(self.locals.len());
        self.locals.push(LocalVariable {
            name: format!("$temp{}", id.0),
            data_type,
            line_number,
        });
        id
    }

    /// Innermost visible local with this name.
    pub fn lookup(&self, name: &str) -> Option<(LocalId, DataType)> {
        self.visible.iter().rev().find_map(|id| {
            self.locals
                .get(id.0)
                .filter(|l| l.name == name)
                .map(|l| (*id, l.data_type))
        })
    }

    pub fn into_locals(self) -> Vec<LocalVariable> {
        self.locals
    }
}

/// Keeps a scope open. Dereferences to the context so nested scopes and
/// declarations go through it.
pub struct ScopeGuard<'a> {
    context: &'a mut ScopeContext,
    visible_len: usize,
}

impl Deref for ScopeGuard<'_> {
    type Target = ScopeContext;

    fn deref(&self) -> &ScopeContext {
        self.context
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut ScopeContext {
        self.context
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.context.visible.truncate(self.visible_len);
        self.context.scope_starts.pop();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parameter(name: &str) -> LocalVariable {
        LocalVariable {
            name: name.into(),
            data_type: DataType::S32,
            line_number: 0,
        }
    }

    #[test]
    fn parameters_are_visible_and_not_redeclarable() {
        let mut scope = ScopeContext::new(vec![parameter("a")]);
        assert_eq!(scope.lookup("a"), Some((LocalId(0), DataType::S32)));
        assert!(scope.declare("a", DataType::U8, 3).is_err());
    }

    #[test]
    fn inner_scope_shadows_then_disappears() {
        let mut scope = ScopeContext::new(vec![parameter("a")]);
        {
            let mut inner = scope.begin_scope();
            let shadow = inner.declare("a", DataType::U8, 1).unwrap();
            assert_eq!(inner.lookup("a"), Some((shadow, DataType::U8)));
            inner.declare("b", DataType::U16, 2).unwrap();
        }
        assert_eq!(scope.lookup("a"), Some((LocalId(0), DataType::S32)));
        assert_eq!(scope.lookup("b"), None);
        // Locals stay in the function's table even when out of scope.
        assert_eq!(scope.into_locals().len(), 3);
    }

    #[test]
    fn guard_restores_on_early_return() {
        fn declare_then_fail(scope: &mut ScopeContext) -> Result<(), CompileError> {
            let mut inner = scope.begin_scope();
            inner.declare("tmp", DataType::U8, 0)?;
            inner.declare("tmp", DataType::U8, 0)?;
            Ok(())
        }

        let mut scope = ScopeContext::new(Vec::new());
        assert!(declare_then_fail(&mut scope).is_err());
        assert_eq!(scope.lookup("tmp"), None);
        scope.declare("tmp", DataType::U8, 1).unwrap();
    }
}
