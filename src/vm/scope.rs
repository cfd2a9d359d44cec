//! Compile-time scope tracking: locals, block depth and upvalues per function.
//!
//! One [`FunctionScope`] exists per function, method, object body or script
//! being compiled. Nested functions chain to their parent through `enclosing`.

use thiserror::Error;

use super::chunk::{Compilation, CompilationKind};
use super::opcode::OpCode;
use super::upvalue::UpvalueDescriptor;

/// Maximum locals (including slot 0) and upvalues per function.
pub const MAX_LOCALS: usize = 256;
pub const MAX_UPVALUES: usize = 256;

/// Name of slot 0 in methods and object bodies.
pub const RECEIVER: &str = "this";

/// A local variable tracked during compilation.
#[derive(Debug, Clone)]
pub struct Local {
    pub name: String,
    /// Block depth; -1 while the initializer is being compiled.
    pub depth: i32,
    pub is_captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("Already a variable with this name in this scope.")]
    DuplicateLocal,
    #[error("Can't read local variable in its own initializer.")]
    OwnInitializer,
    #[error("Too many local variables in function.")]
    TooManyLocals,
    #[error("Too many closure variables in function.")]
    TooManyUpvalues,
}

/// Break/continue bookkeeping for the innermost loop.
#[derive(Debug, Clone)]
pub struct LoopContext {
    /// Where `continue` jumps back to.
    pub continue_target: usize,
    /// Block depth outside the loop body; locals deeper than this die on break/continue.
    pub scope_depth: i32,
    /// Operand offsets of `break` jumps to patch at loop exit.
    pub break_jumps: Vec<usize>,
}

/// Per-function compile state.
pub struct FunctionScope {
    pub compilation: Compilation,
    pub locals: Vec<Local>,
    pub upvalues: Vec<UpvalueDescriptor>,
    pub scope_depth: i32,
    pub loops: Vec<LoopContext>,
    pub enclosing: Option<Box<FunctionScope>>,
}

impl FunctionScope {
    pub fn new(compilation: Compilation) -> Self {
        // Slot 0 holds the callee, or the receiver in methods and object bodies.
        let slot_name = match compilation.kind {
            CompilationKind::Method | CompilationKind::Object => RECEIVER,
            CompilationKind::Script | CompilationKind::Function => "",
        };
        Self {
            compilation,
            locals: vec![Local {
                name: slot_name.to_string(),
                depth: 0,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
            enclosing: None,
        }
    }

    pub fn kind(&self) -> CompilationKind {
        self.compilation.kind
    }

    // --- Scope management ---

    pub fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    /// Leave a block, emitting a pop (or upvalue close) for each local it declared.
    pub fn end_scope(&mut self, line: usize) {
        self.scope_depth -= 1;
        while let Some(local) = self.locals.last() {
            if local.depth <= self.scope_depth {
                break;
            }
            let op = if local.is_captured {
                OpCode::CloseUpvalue
            } else {
                OpCode::Pop
            };
            self.compilation.chunk.write_op(op, line);
            self.locals.pop();
        }
    }

    /// Emit pops for locals deeper than `depth` without forgetting them.
    /// Used when `break`/`continue` jump out of nested blocks.
    pub fn discard_locals_above(&mut self, depth: i32, line: usize) {
        for i in (0..self.locals.len()).rev() {
            let local = &self.locals[i];
            if local.depth <= depth {
                break;
            }
            let op = if local.is_captured {
                OpCode::CloseUpvalue
            } else {
                OpCode::Pop
            };
            self.compilation.chunk.write_op(op, line);
        }
    }

    // --- Local variables ---

    /// Register `name` in the current block, uninitialized.
    pub fn declare_local(&mut self, name: &str) -> Result<(), ScopeError> {
        for local in self.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.scope_depth {
                break;
            }
            if local.name == name {
                return Err(ScopeError::DuplicateLocal);
            }
        }
        if self.locals.len() == MAX_LOCALS {
            return Err(ScopeError::TooManyLocals);
        }
        self.locals.push(Local {
            name: name.to_string(),
            depth: -1,
            is_captured: false,
        });
        Ok(())
    }

    pub fn mark_initialized(&mut self) {
        if self.scope_depth == 0 {
            return;
        }
        if let Some(local) = self.locals.last_mut() {
            local.depth = self.scope_depth;
        }
    }

    pub fn resolve_local(&self, name: &str) -> Result<Option<u8>, ScopeError> {
        for (i, local) in self.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return Err(ScopeError::OwnInitializer);
                }
                return Ok(Some(i as u8));
            }
        }
        Ok(None)
    }

    pub fn resolve_upvalue(&mut self, name: &str) -> Result<Option<u8>, ScopeError> {
        let Some(enclosing) = self.enclosing.as_mut() else {
            return Ok(None);
        };
        if let Some(local) = enclosing.resolve_local(name)? {
            enclosing.locals[local as usize].is_captured = true;
            return self.add_upvalue(local, true).map(Some);
        }
        if let Some(upvalue) = enclosing.resolve_upvalue(name)? {
            return self.add_upvalue(upvalue, false).map(Some);
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, index: u8, is_local: bool) -> Result<u8, ScopeError> {
        let descriptor = UpvalueDescriptor { is_local, index };
        if let Some(existing) = self.upvalues.iter().position(|uv| *uv == descriptor) {
            return Ok(existing as u8);
        }
        if self.upvalues.len() == MAX_UPVALUES {
            return Err(ScopeError::TooManyUpvalues);
        }
        self.upvalues.push(descriptor);
        self.compilation.upvalue_count = self.upvalues.len();
        Ok((self.upvalues.len() - 1) as u8)
    }

    /// True when this scope or one it is nested in compiles an object unit.
    pub fn in_object_unit(&self) -> bool {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if s.kind() == CompilationKind::Object {
                return true;
            }
            scope = s.enclosing.as_deref();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function_scope(kind: CompilationKind) -> FunctionScope {
        FunctionScope::new(Compilation::new(kind, "f"))
    }

    #[test]
    fn test_slot_zero_reserved() {
        let method = function_scope(CompilationKind::Method);
        assert_eq!(method.resolve_local("this"), Ok(Some(0)));
        let function = function_scope(CompilationKind::Function);
        assert_eq!(function.resolve_local("this"), Ok(None));
    }

    #[test]
    fn test_duplicate_in_same_block() {
        let mut scope = function_scope(CompilationKind::Function);
        scope.begin_scope();
        scope.declare_local("a").unwrap();
        scope.mark_initialized();
        assert_eq!(scope.declare_local("a"), Err(ScopeError::DuplicateLocal));
    }

    #[test]
    fn test_shadowing_in_nested_block() {
        let mut scope = function_scope(CompilationKind::Function);
        scope.begin_scope();
        scope.declare_local("a").unwrap();
        scope.mark_initialized();
        scope.begin_scope();
        assert!(scope.declare_local("a").is_ok());
        scope.mark_initialized();
        assert_eq!(scope.resolve_local("a"), Ok(Some(2)));
    }

    #[test]
    fn test_own_initializer() {
        let mut scope = function_scope(CompilationKind::Function);
        scope.begin_scope();
        scope.declare_local("a").unwrap();
        assert_eq!(scope.resolve_local("a"), Err(ScopeError::OwnInitializer));
    }

    #[test]
    fn test_end_scope_pops_and_closes() {
        let mut scope = function_scope(CompilationKind::Function);
        scope.begin_scope();
        scope.declare_local("a").unwrap();
        scope.mark_initialized();
        scope.declare_local("b").unwrap();
        scope.mark_initialized();
        scope.locals[1].is_captured = true;
        scope.end_scope(1);
        assert_eq!(
            scope.compilation.chunk.code,
            vec![OpCode::Pop as u8, OpCode::CloseUpvalue as u8]
        );
        assert_eq!(scope.locals.len(), 1);
    }

    #[test]
    fn test_upvalue_chain_and_dedup() {
        let mut outer = function_scope(CompilationKind::Function);
        outer.begin_scope();
        outer.declare_local("x").unwrap();
        outer.mark_initialized();

        let mut middle = function_scope(CompilationKind::Function);
        middle.enclosing = Some(Box::new(outer));
        let mut inner = function_scope(CompilationKind::Function);
        inner.enclosing = Some(Box::new(middle));

        assert_eq!(inner.resolve_upvalue("x"), Ok(Some(0)));
        assert_eq!(inner.resolve_upvalue("x"), Ok(Some(0)));
        assert_eq!(inner.upvalues.len(), 1);
        assert!(!inner.upvalues[0].is_local);

        let middle = inner.enclosing.as_ref().unwrap();
        assert_eq!(
            middle.upvalues,
            vec![UpvalueDescriptor {
                is_local: true,
                index: 1
            }]
        );
        assert!(middle.enclosing.as_ref().unwrap().locals[1].is_captured);
    }
}
