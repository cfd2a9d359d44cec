//! Statement and declaration compilation.

use crate::lexer::TokenKind;

use super::chunk::CompilationKind;
use super::compiler::Compiler;
use super::opcode::OpCode;
use super::scope::LoopContext;

impl<'src> Compiler<'src> {
    /// Compile one declaration or statement, recovering from errors.
    pub(super) fn declaration(&mut self) {
        if self.current.kind.is_type() {
            self.advance();
            self.typed_declaration();
        } else if self.match_token(&TokenKind::Inherit) {
            self.error("'inherit' is only allowed at the top of an object.");
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    /// After a type keyword: `name(params) { ... }` or `name [= expr], ...;`.
    fn typed_declaration(&mut self) {
        let name = self.consume_identifier("Expect variable name.");
        if self.check(&TokenKind::LeftParen) {
            self.function_declaration(&name);
        } else {
            self.var_declaration(name);
        }
    }

    fn is_global_scope(&self) -> bool {
        self.scope.scope_depth == 0 && self.scope.kind() == CompilationKind::Script
    }

    fn var_declaration(&mut self, first: String) {
        let mut name = first;
        loop {
            if self.is_global_scope() {
                let constant = self.identifier_constant(&name);
                self.variable_initializer();
                self.emit_op_u16(OpCode::DefineGlobal, constant);
            } else {
                self.declare_local(&name);
                self.variable_initializer();
                self.scope.mark_initialized();
            }
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
            name = self.consume_identifier("Expect variable name.");
        }
        self.consume(
            &TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
    }

    fn variable_initializer(&mut self) {
        if self.match_token(&TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
    }

    fn function_declaration(&mut self, name: &str) {
        if self.is_global_scope() {
            let constant = self.identifier_constant(name);
            self.function(CompilationKind::Function, name);
            self.emit_op_u16(OpCode::DefineGlobal, constant);
        } else {
            // Initialized up front so the body can call itself.
            self.declare_local(name);
            self.scope.mark_initialized();
            self.function(CompilationKind::Function, name);
        }
    }

    /// Compile a parameter list and body, then emit the CLOSURE for it.
    pub(super) fn function(&mut self, kind: CompilationKind, name: &str) {
        self.begin_function(kind, name);
        self.scope.begin_scope();

        self.consume(&TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(&TokenKind::RightParen) {
            loop {
                if self.scope.compilation.arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.scope.compilation.arity += 1;
                }
                if self.current.kind.is_type() {
                    self.advance();
                }
                let param = self.consume_identifier("Expect parameter name.");
                self.declare_local(&param);
                self.scope.mark_initialized();
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(&TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (compilation, upvalues) = self.end_function();
        self.emit_closure(compilation, &upvalues);
    }

    // --- Statements ---

    fn statement(&mut self) {
        match self.current.kind {
            TokenKind::If => {
                self.advance();
                self.if_statement();
            }
            TokenKind::While => {
                self.advance();
                self.while_statement();
            }
            TokenKind::For => {
                self.advance();
                self.for_statement();
            }
            TokenKind::Return => {
                self.advance();
                self.return_statement();
            }
            TokenKind::Break => {
                self.advance();
                self.break_statement();
            }
            TokenKind::Continue => {
                self.advance();
                self.continue_statement();
            }
            TokenKind::LeftBrace => {
                self.advance();
                self.scope.begin_scope();
                self.block();
                self.end_scope();
            }
            _ => self.expression_statement(),
        }
    }

    pub(super) fn block(&mut self) {
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            self.declaration();
        }
        self.consume(&TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn end_scope(&mut self) {
        let line = self.previous.line;
        self.scope.end_scope(line);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(&TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(&TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(&TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.scope.compilation.chunk.len();
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(&TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);

        self.begin_loop(loop_start);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
        self.end_loop();
    }

    /// `for (init; cond; step) body`; the initializer's locals are scoped to the loop.
    fn for_statement(&mut self) {
        self.scope.begin_scope();
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(&TokenKind::Semicolon) {
            // No initializer.
        } else if self.current.kind.is_type() {
            self.advance();
            let name = self.consume_identifier("Expect variable name.");
            self.var_declaration(name);
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.scope.compilation.chunk.len();
        let mut exit_jump = None;
        if !self.match_token(&TokenKind::Semicolon) {
            self.expression();
            self.consume(&TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(&TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.scope.compilation.chunk.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(&TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.begin_loop(loop_start);
        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }
        self.end_loop();
        self.end_scope();
    }

    fn begin_loop(&mut self, continue_target: usize) {
        let scope_depth = self.scope.scope_depth;
        self.scope.loops.push(LoopContext {
            continue_target,
            scope_depth,
            break_jumps: Vec::new(),
        });
    }

    /// Pop the innermost loop and land its `break` jumps here.
    fn end_loop(&mut self) {
        if let Some(context) = self.scope.loops.pop() {
            for jump in context.break_jumps {
                self.patch_jump(jump);
            }
        }
    }

    fn break_statement(&mut self) {
        let Some(depth) = self.scope.loops.last().map(|l| l.scope_depth) else {
            self.error("Can't use 'break' outside of a loop.");
            return;
        };
        let line = self.previous.line;
        self.scope.discard_locals_above(depth, line);
        let jump = self.emit_jump(OpCode::Jump);
        if let Some(context) = self.scope.loops.last_mut() {
            context.break_jumps.push(jump);
        }
        self.consume(&TokenKind::Semicolon, "Expect ';' after 'break'.");
    }

    fn continue_statement(&mut self) {
        let Some((depth, target)) = self
            .scope
            .loops
            .last()
            .map(|l| (l.scope_depth, l.continue_target))
        else {
            self.error("Can't use 'continue' outside of a loop.");
            return;
        };
        let line = self.previous.line;
        self.scope.discard_locals_above(depth, line);
        self.emit_loop(target);
        self.consume(&TokenKind::Semicolon, "Expect ';' after 'continue'.");
    }

    fn return_statement(&mut self) {
        if self.match_token(&TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(&TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::vm::compiler::compile;

    #[test]
    fn test_break_outside_loop() {
        let errors = compile("test", "break;").unwrap_err();
        assert!(errors.mentions("Can't use 'break' outside of a loop."));
    }

    #[test]
    fn test_continue_outside_loop() {
        let errors = compile("test", "continue;").unwrap_err();
        assert!(errors.mentions("Can't use 'continue' outside of a loop."));
    }

    #[test]
    fn test_inherit_in_script() {
        let errors = compile("test", "inherit \"/std/base\";").unwrap_err();
        assert!(errors.mentions("'inherit' is only allowed at the top of an object."));
    }

    #[test]
    fn test_for_loop_compiles() {
        assert!(compile(
            "test",
            "for (int i = 0; i < 3; i = i + 1) { if (i == 1) continue; println(i); }"
        )
        .is_ok());
    }

    #[test]
    fn test_missing_semicolon_reports_line() {
        let errors = compile("test", "var a = 1\nvar b = 2;").unwrap_err();
        assert_eq!(
            errors.0[0].to_string(),
            "[line 2] Error at 'var': Expect ';' after variable declaration."
        );
    }
}
