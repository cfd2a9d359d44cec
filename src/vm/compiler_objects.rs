//! Object unit compilation.
//!
//! An object unit is a source file that describes one object: optional
//! leading `inherit "path";` lines followed by field and method
//! declarations. It compiles to a construction program that builds the
//! object in its frame's slot 0 and returns it:
//!
//! ```text
//! OBJECT path
//! CONSTANT "parent"  COMPILE  INHERIT      ; per inherit line
//! <initializer or NIL>  FIELD name         ; per field
//! CLOSURE method  METHOD name              ; per method
//! RETURN
//! ```

use std::rc::Rc;

use tracing::debug;

use crate::lexer::TokenKind;

use super::chunk::{Compilation, CompilationKind, Constant};
use super::compiler::{CompileResult, Compiler};
use super::opcode::OpCode;

/// Compile the object unit found at `path`.
pub fn compile_object(path: &str, source: &str) -> CompileResult<Rc<Compilation>> {
    debug!(path, "compiling object");
    let owner: Rc<str> = Rc::from(path);
    let mut compilation = Compilation::new(CompilationKind::Object, path);
    compilation.owner = Some(owner.clone());

    let mut compiler = Compiler::new(source, compilation);
    compiler.owner = Some(owner);
    compiler.object_unit(path);
    compiler.finish()
}

impl<'src> Compiler<'src> {
    fn object_unit(&mut self, path: &str) {
        let name = self.identifier_constant(path);
        self.emit_op_u16(OpCode::Object, name);

        while self.match_token(&TokenKind::Inherit) {
            self.inherit_declaration();
        }
        while !self.check(&TokenKind::Eof) {
            self.member_declaration();
        }

        // The object in slot 0 is the only value left on the stack.
        self.emit_op(OpCode::Return);
    }

    /// `inherit "path";` loads (or reuses) the parent program and links its object.
    fn inherit_declaration(&mut self) {
        let path = match &self.current.kind {
            TokenKind::StringLiteral(path) => {
                let path = path.clone();
                self.advance();
                Some(path)
            }
            _ => {
                self.error_at_current("Expect object path after 'inherit'.");
                None
            }
        };
        if let Some(path) = path {
            self.emit_constant(Constant::String(Rc::from(path.as_str())));
            self.emit_op(OpCode::Compile);
            self.emit_op(OpCode::Inherit);
        }
        self.consume(&TokenKind::Semicolon, "Expect ';' after inherit path.");

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn member_declaration(&mut self) {
        if self.current.kind.is_type() {
            self.advance();
            let name = self.consume_identifier("Expect field or method name.");
            if self.check(&TokenKind::LeftParen) {
                self.method_declaration(&name);
            } else {
                self.field_declaration(name);
            }
        } else {
            let message = match self.current.kind {
                TokenKind::Inherit => "'inherit' must come before any field or method.",
                TokenKind::Return => "Can't return from an object body.",
                _ => "Expect field or method declaration.",
            };
            self.error_at_current(message);
            self.advance();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn method_declaration(&mut self, name: &str) {
        self.function(CompilationKind::Method, name);
        let constant = self.identifier_constant(name);
        self.emit_op_u16(OpCode::Method, constant);
    }

    /// `type a [= expr], b [= expr];`
    fn field_declaration(&mut self, first: String) {
        let mut name = first;
        loop {
            if self.match_token(&TokenKind::Equal) {
                self.expression();
            } else {
                self.emit_op(OpCode::Nil);
            }
            let constant = self.identifier_constant(&name);
            self.emit_op_u16(OpCode::Field, constant);

            if !self.match_token(&TokenKind::Comma) {
                break;
            }
            name = self.consume_identifier("Expect field name.");
        }
        self.consume(&TokenKind::Semicolon, "Expect ';' after field declaration.");
    }
}
