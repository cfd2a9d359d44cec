//! Source-to-bytecode compiler.
//!
//! Single-pass compilation: tokens are pulled from the scanner one at a time
//! and bytecode is emitted as each construct is recognized. Variable
//! resolution happens at compile time; locals become stack slot indices.
//!
//! Expressions live in `compiler_exprs.rs`, statements in `compiler_stmts.rs`
//! and object units in `compiler_objects.rs`.

use std::rc::Rc;

use tracing::debug;

use crate::error::{CompileError, CompileErrors, LexerError};
use crate::lexer::{Scanner, Token, TokenKind};

use super::chunk::{Compilation, CompilationKind, Constant};
use super::opcode::OpCode;
use super::scope::{FunctionScope, ScopeError, RECEIVER};
use super::upvalue::UpvalueDescriptor;

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileErrors>;

/// How a variable is accessed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableAccess {
    Local(u8),
    Upvalue(u8),
    /// Name constant index.
    Global(u16),
    /// Name constant index of a property on the implicit receiver.
    Property(u16),
}

/// The compiler: parser state plus the scope of the function being emitted.
pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    pub(super) current: Token,
    pub(super) previous: Token,
    errors: Vec<CompileError>,
    pub(super) panic_mode: bool,
    pub(super) scope: FunctionScope,
    /// Path of the object unit being compiled, if any.
    pub(super) owner: Option<Rc<str>>,
}

/// Compile a top-level script.
pub fn compile(name: &str, source: &str) -> CompileResult<Rc<Compilation>> {
    debug!(name, "compiling script");
    let mut compiler = Compiler::new(source, Compilation::new(CompilationKind::Script, name));
    while !compiler.match_token(&TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.emit_return();
    compiler.finish()
}

impl<'src> Compiler<'src> {
    pub(super) fn new(source: &'src str, compilation: Compilation) -> Self {
        let mut compiler = Self {
            scanner: Scanner::new(source),
            current: Token::eof(1),
            previous: Token::eof(1),
            errors: Vec::new(),
            panic_mode: false,
            scope: FunctionScope::new(compilation),
            owner: None,
        };
        compiler.advance();
        compiler
    }

    /// Produce the compilation, or every error reported along the way.
    pub(super) fn finish(self) -> CompileResult<Rc<Compilation>> {
        let name = self.scope.compilation.name.clone();
        if !self.errors.is_empty() {
            debug!(name = %name, errors = self.errors.len(), "compile failed");
            return Err(CompileErrors(self.errors));
        }
        debug!(
            name = %name,
            bytes = self.scope.compilation.chunk.len(),
            constants = self.scope.compilation.chunk.constants.len(),
            "compile finished"
        );
        Ok(Rc::new(self.scope.compilation))
    }

    // --- Token handling ---

    pub(super) fn advance(&mut self) {
        let next = loop {
            match self.scanner.scan_token() {
                Ok(token) => break token,
                Err(err) => self.lexer_error(err),
            }
        };
        self.previous = std::mem::replace(&mut self.current, next);
    }

    pub(super) fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind)
    }

    pub(super) fn match_token(&mut self, kind: &TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    pub(super) fn consume(&mut self, kind: &TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    /// Consume an identifier and return its name (empty after an error).
    pub(super) fn consume_identifier(&mut self, message: &str) -> String {
        if let TokenKind::Identifier(name) = &self.current.kind {
            let name = name.clone();
            self.advance();
            name
        } else {
            self.error_at_current(message);
            String::new()
        }
    }

    // --- Error reporting ---

    pub(super) fn error(&mut self, message: &str) {
        self.error_at(false, message);
    }

    pub(super) fn error_at_current(&mut self, message: &str) {
        self.error_at(true, message);
    }

    fn error_at(&mut self, at_current: bool, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let token = if at_current {
            &self.current
        } else {
            &self.previous
        };
        let location = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.errors
            .push(CompileError::new(token.line, location, message));
    }

    fn lexer_error(&mut self, err: LexerError) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.errors
            .push(CompileError::new(err.line(), "", err.to_string()));
    }

    pub(super) fn scope_error(&mut self, err: ScopeError) {
        self.error(&err.to_string());
    }

    /// Skip tokens until a statement boundary so one mistake yields one report.
    pub(super) fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(&TokenKind::Eof) {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            if self.current.kind.starts_statement() {
                return;
            }
            self.advance();
        }
    }

    // --- Chunk helpers ---

    fn line(&self) -> usize {
        self.previous.line
    }

    pub(super) fn emit_op(&mut self, op: OpCode) {
        let line = self.line();
        self.scope.compilation.chunk.write_op(op, line);
    }

    pub(super) fn emit_byte(&mut self, byte: u8) {
        let line = self.line();
        self.scope.compilation.chunk.write_byte(byte, line);
    }

    pub(super) fn emit_u16(&mut self, value: u16) {
        let line = self.line();
        self.scope.compilation.chunk.write_u16(value, line);
    }

    pub(super) fn emit_op_u16(&mut self, op: OpCode, operand: u16) {
        self.emit_op(op);
        self.emit_u16(operand);
    }

    pub(super) fn emit_op_byte(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    /// Implicit `return nil`.
    pub(super) fn emit_return(&mut self) {
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);
    }

    pub(super) fn make_constant(&mut self, constant: Constant) -> u16 {
        match self.scope.compilation.chunk.add_constant(constant) {
            Ok(idx) => idx,
            Err(err) => {
                self.error(&err.to_string());
                0
            }
        }
    }

    pub(super) fn emit_constant(&mut self, constant: Constant) {
        let idx = self.make_constant(constant);
        self.emit_op_u16(OpCode::Constant, idx);
    }

    pub(super) fn identifier_constant(&mut self, name: &str) -> u16 {
        self.make_constant(Constant::String(Rc::from(name)))
    }

    /// Emit a jump with a placeholder operand; returns the operand offset for patching.
    pub(super) fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_u16(u16::MAX);
        self.scope.compilation.chunk.len() - 2
    }

    pub(super) fn patch_jump(&mut self, offset: usize) {
        if let Err(err) = self.scope.compilation.chunk.patch_jump(offset) {
            self.error(&err.to_string());
        }
    }

    pub(super) fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.scope.compilation.chunk.len() - loop_start + 2;
        match u16::try_from(offset) {
            Ok(offset) => self.emit_u16(offset),
            Err(_) => {
                self.error(&super::chunk::ChunkError::LoopTooLarge.to_string());
                self.emit_u16(0);
            }
        }
    }

    // --- Function compilation ---

    /// Start compiling a nested function; the current scope becomes its enclosing scope.
    pub(super) fn begin_function(&mut self, kind: CompilationKind, name: &str) {
        let mut compilation = Compilation::new(kind, name);
        compilation.owner = self.owner.clone();
        let enclosing = std::mem::replace(&mut self.scope, FunctionScope::new(compilation));
        self.scope.enclosing = Some(Box::new(enclosing));
    }

    /// Finish the current function and restore its enclosing scope.
    pub(super) fn end_function(&mut self) -> (Compilation, Vec<UpvalueDescriptor>) {
        self.emit_return();
        let enclosing = match self.scope.enclosing.take() {
            Some(enclosing) => *enclosing,
            None => FunctionScope::new(Compilation::new(CompilationKind::Script, "")),
        };
        let finished = std::mem::replace(&mut self.scope, enclosing);
        (finished.compilation, finished.upvalues)
    }

    /// Store a finished function in the constant pool and emit its CLOSURE.
    pub(super) fn emit_closure(&mut self, compilation: Compilation, upvalues: &[UpvalueDescriptor]) {
        let idx = self.make_constant(Constant::Compilation(Rc::new(compilation)));
        self.emit_op_u16(OpCode::Closure, idx);
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    // --- Variable resolution ---

    /// Local, then upvalue, then global (scripts) or receiver property (object units).
    pub(super) fn resolve(&mut self, name: &str) -> Result<VariableAccess, ScopeError> {
        if let Some(slot) = self.scope.resolve_local(name)? {
            return Ok(VariableAccess::Local(slot));
        }
        if let Some(idx) = self.scope.resolve_upvalue(name)? {
            return Ok(VariableAccess::Upvalue(idx));
        }
        let constant = self.identifier_constant(name);
        if self.scope.in_object_unit() {
            Ok(VariableAccess::Property(constant))
        } else {
            Ok(VariableAccess::Global(constant))
        }
    }

    /// Push the implicit receiver (`this`).
    pub(super) fn load_receiver(&mut self) {
        match self.resolve(RECEIVER) {
            Ok(VariableAccess::Local(slot)) => self.emit_op_byte(OpCode::GetLocal, slot),
            Ok(VariableAccess::Upvalue(idx)) => self.emit_op_byte(OpCode::GetUpvalue, idx),
            Ok(_) => self.error("Can't use 'this' outside of an object."),
            Err(err) => self.scope_error(err),
        }
    }

    /// Declare a local in the current block, reporting scope errors.
    pub(super) fn declare_local(&mut self, name: &str) {
        if let Err(err) = self.scope.declare_local(name) {
            self.scope_error(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::compile_object;

    fn compile_errors(source: &str) -> CompileErrors {
        compile("test", source).expect_err("expected compile errors")
    }

    #[test]
    fn test_compile_expression_statement() {
        let script = compile("test", "1 + 2;").unwrap();
        assert_eq!(script.kind, CompilationKind::Script);
        assert_eq!(
            *script.chunk.code.last().unwrap(),
            OpCode::Return as u8
        );
    }

    #[test]
    fn test_precedence_emits_multiply_first() {
        let script = compile("test", "1 + 2 * 3;").unwrap();
        let ops: Vec<u8> = script
            .chunk
            .code
            .iter()
            .copied()
            .filter(|b| *b == OpCode::Add as u8 || *b == OpCode::Multiply as u8)
            .collect();
        assert_eq!(ops, vec![OpCode::Multiply as u8, OpCode::Add as u8]);
    }

    #[test]
    fn test_duplicate_local_is_error() {
        let errors = compile_errors("{ int a = 1; int a = 2; }");
        assert!(errors.mentions("Already a variable with this name in this scope."));
    }

    #[test]
    fn test_shadowing_in_nested_block_is_fine() {
        assert!(compile("test", "{ int a = 1; { int a = 2; } }").is_ok());
    }

    #[test]
    fn test_own_initializer_is_error() {
        let errors = compile_errors("{ int a = a; }");
        assert!(errors.mentions("Can't read local variable in its own initializer."));
    }

    #[test]
    fn test_invalid_assignment_target() {
        let errors = compile_errors("1 + 2 = 3;");
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors.0[0].to_string(),
            "[line 1] Error at '=': Invalid assignment target."
        );
    }

    #[test]
    fn test_compound_assignment_target_checked() {
        let errors = compile_errors("var a = 1; a + 1 += 2;");
        assert!(errors.mentions("Invalid assignment target."));
    }

    #[test]
    fn test_multiple_errors_reported() {
        let errors = compile_errors("var = 1;\nprintln(1;\nvar ok = 2;");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.0[0].line, 1);
        assert_eq!(errors.0[1].line, 2);
    }

    #[test]
    fn test_error_at_end() {
        let errors = compile_errors("println(1)");
        assert_eq!(
            errors.0[0].to_string(),
            "[line 1] Error at end: Expect ';' after expression."
        );
    }

    #[test]
    fn test_unterminated_string_surfaces() {
        let errors = compile_errors("var s = \"abc");
        assert_eq!(errors.0[0].to_string(), "[line 1] Error: Unterminated string.");
    }

    #[test]
    fn test_too_many_parameters() {
        let params: Vec<String> = (0..256).map(|i| format!("p{}", i)).collect();
        let source = format!("void f({}) {{}}", params.join(", "));
        let errors = compile_errors(&source);
        assert!(errors.mentions("Can't have more than 255 parameters."));
    }

    #[test]
    fn test_closure_operands() {
        let script = compile(
            "test",
            "void outer() { int x = 1; mixed f = function() { return x; }; }",
        )
        .unwrap();
        let Constant::Compilation(outer) = &script.chunk.constants[1] else {
            panic!("expected outer function constant");
        };
        let code = &outer.chunk.code;
        let pos = code
            .iter()
            .position(|b| *b == OpCode::Closure as u8)
            .unwrap();
        // CLOSURE idx:u16, then (is_local=1, index=1) for `x`.
        assert_eq!(&code[pos + 3..pos + 5], &[1, 1]);
        let Constant::Compilation(inner) = &outer.chunk.constants[code[pos + 2] as usize] else {
            panic!("expected inner function constant");
        };
        assert_eq!(inner.upvalue_count, 1);
    }

    #[test]
    fn test_this_outside_object() {
        let errors = compile_errors("this;");
        assert!(errors.mentions("Can't use 'this' outside of an object."));
    }

    #[test]
    fn test_object_unit_rejects_statements() {
        let errors = compile_object("/obj/bad", "println(1);").unwrap_err();
        assert!(errors.mentions("Expect field or method declaration."));
    }
}
