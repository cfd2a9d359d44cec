//! Expression compilation: Pratt parsing straight to bytecode.

use std::rc::Rc;

use crate::lexer::TokenKind;

use super::chunk::{CompilationKind, Constant};
use super::compiler::{Compiler, VariableAccess};
use super::opcode::OpCode;

/// Operator precedence levels (higher = tighter binding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None = 0,
    Assignment = 1, // = += -= *= /=
    Or = 2,         // ||
    And = 3,        // &&
    Equality = 4,   // == !=
    Comparison = 5, // < > <= >=
    Term = 6,       // + -
    Factor = 7,     // * / %
    Unary = 8,      // ! -
    Call = 9,       // () ->
    Primary = 10,
}

impl Precedence {
    pub fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

/// Infix precedence of a token; `None` for tokens that never continue an expression.
pub fn get_precedence(kind: &TokenKind) -> Precedence {
    match kind {
        TokenKind::Or => Precedence::Or,
        TokenKind::And => Precedence::And,
        TokenKind::EqualEqual | TokenKind::BangEqual => Precedence::Equality,
        TokenKind::Less | TokenKind::LessEqual | TokenKind::Greater | TokenKind::GreaterEqual => {
            Precedence::Comparison
        }
        TokenKind::Plus | TokenKind::Minus => Precedence::Term,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Factor,
        TokenKind::LeftParen | TokenKind::Arrow => Precedence::Call,
        _ => Precedence::None,
    }
}

/// The arithmetic op a compound assignment applies before storing.
fn compound_op(kind: &TokenKind) -> Option<OpCode> {
    match kind {
        TokenKind::PlusEqual => Some(OpCode::Add),
        TokenKind::MinusEqual => Some(OpCode::Subtract),
        TokenKind::StarEqual => Some(OpCode::Multiply),
        TokenKind::SlashEqual => Some(OpCode::Divide),
        _ => None,
    }
}

fn binary_op(kind: &TokenKind) -> Option<OpCode> {
    let op = match kind {
        TokenKind::Plus => OpCode::Add,
        TokenKind::Minus => OpCode::Subtract,
        TokenKind::Star => OpCode::Multiply,
        TokenKind::Slash => OpCode::Divide,
        TokenKind::Percent => OpCode::Modulo,
        TokenKind::EqualEqual => OpCode::Equal,
        TokenKind::BangEqual => OpCode::NotEqual,
        TokenKind::Greater => OpCode::Greater,
        TokenKind::GreaterEqual => OpCode::GreaterEqual,
        TokenKind::Less => OpCode::Less,
        TokenKind::LessEqual => OpCode::LessEqual,
        _ => return None,
    };
    Some(op)
}

impl<'src> Compiler<'src> {
    /// Compile an expression; the result is left on the stack.
    pub(super) fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    pub(super) fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        let kind = self.previous.kind.clone();
        if !self.prefix(&kind, can_assign) {
            self.error("Expect expression.");
            return;
        }

        while precedence <= get_precedence(&self.current.kind) {
            self.advance();
            let kind = self.previous.kind.clone();
            self.infix(&kind, can_assign);
        }

        if can_assign && self.current.kind.is_assignment() {
            self.advance();
            self.error("Invalid assignment target.");
        }
    }

    /// Dispatch a prefix rule. Returns false if `kind` cannot start an expression.
    fn prefix(&mut self, kind: &TokenKind, can_assign: bool) -> bool {
        match kind {
            TokenKind::LeftParen => self.grouping(),
            TokenKind::Minus | TokenKind::Bang => self.unary(kind),
            TokenKind::NumberLiteral(n) => self.emit_constant(Constant::Number(*n)),
            TokenKind::StringLiteral(s) => self.emit_constant(Constant::String(Rc::from(s.as_str()))),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Identifier(name) => self.named_variable(name, can_assign),
            TokenKind::This => self.this_expr(),
            TokenKind::Function => self.lambda(),
            TokenKind::DoubleColon => self.super_call(),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, kind: &TokenKind, can_assign: bool) {
        match kind {
            TokenKind::And => self.and_expr(),
            TokenKind::Or => self.or_expr(),
            TokenKind::LeftParen => self.call(),
            TokenKind::Arrow => self.arrow(can_assign),
            _ => self.binary(kind),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(&TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, operator: &TokenKind) {
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            _ => self.emit_op(OpCode::Not),
        }
    }

    fn binary(&mut self, operator: &TokenKind) {
        self.parse_precedence(get_precedence(operator).next());
        if let Some(op) = binary_op(operator) {
            self.emit_op(op);
        }
    }

    fn and_expr(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_expr(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    // --- Variables ---

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let access = match self.resolve(name) {
            Ok(access) => access,
            Err(err) => {
                self.scope_error(err);
                return;
            }
        };

        let assignment = if can_assign && self.current.kind.is_assignment() {
            self.advance();
            Some(compound_op(&self.previous.kind))
        } else {
            None
        };

        match (access, assignment) {
            // `name(args)` on the receiver dispatches like `this->name(args)`.
            (VariableAccess::Property(name), None) if self.check(&TokenKind::LeftParen) => {
                self.load_receiver();
                self.advance();
                let argc = self.argument_list();
                self.emit_op_u16(OpCode::Invoke, name);
                self.emit_byte(argc);
            }
            (VariableAccess::Property(name), None) => {
                self.load_receiver();
                self.emit_op_u16(OpCode::GetProperty, name);
            }
            (VariableAccess::Property(name), Some(compound)) => {
                self.load_receiver();
                if let Some(op) = compound {
                    self.emit_op(OpCode::Dup);
                    self.emit_op_u16(OpCode::GetProperty, name);
                    self.expression();
                    self.emit_op(op);
                } else {
                    self.expression();
                }
                self.emit_op_u16(OpCode::SetProperty, name);
            }
            (access, None) => self.emit_get(access),
            (access, Some(compound)) => {
                if let Some(op) = compound {
                    self.emit_get(access);
                    self.expression();
                    self.emit_op(op);
                } else {
                    self.expression();
                }
                self.emit_set(access);
            }
        }
    }

    fn emit_get(&mut self, access: VariableAccess) {
        match access {
            VariableAccess::Local(slot) => self.emit_op_byte(OpCode::GetLocal, slot),
            VariableAccess::Upvalue(idx) => self.emit_op_byte(OpCode::GetUpvalue, idx),
            VariableAccess::Global(name) => self.emit_op_u16(OpCode::GetGlobal, name),
            VariableAccess::Property(name) => {
                self.load_receiver();
                self.emit_op_u16(OpCode::GetProperty, name);
            }
        }
    }

    /// Store the value on top of the stack; properties are handled by the caller.
    fn emit_set(&mut self, access: VariableAccess) {
        match access {
            VariableAccess::Local(slot) => self.emit_op_byte(OpCode::SetLocal, slot),
            VariableAccess::Upvalue(idx) => self.emit_op_byte(OpCode::SetUpvalue, idx),
            VariableAccess::Global(name) => self.emit_op_u16(OpCode::SetGlobal, name),
            VariableAccess::Property(name) => self.emit_op_u16(OpCode::SetProperty, name),
        }
    }

    fn this_expr(&mut self) {
        if !self.scope.in_object_unit() {
            self.error("Can't use 'this' outside of an object.");
            return;
        }
        self.load_receiver();
    }

    // --- Calls and properties ---

    pub(super) fn argument_list(&mut self) -> u8 {
        let mut count: u8 = 0;
        if !self.check(&TokenKind::RightParen) {
            loop {
                self.expression();
                if count == u8::MAX {
                    self.error("Can't have more than 255 arguments.");
                } else {
                    count += 1;
                }
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "Expect ')' after arguments.");
        count
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_op_byte(OpCode::Call, argc);
    }

    /// `obj->name`, `obj->name = value`, `obj->name op= value` or `obj->name(args)`.
    fn arrow(&mut self, can_assign: bool) {
        let name = self.consume_identifier("Expect property name after '->'.");
        let name = self.identifier_constant(&name);

        if can_assign && self.current.kind.is_assignment() {
            self.advance();
            if let Some(op) = compound_op(&self.previous.kind) {
                self.emit_op(OpCode::Dup);
                self.emit_op_u16(OpCode::GetProperty, name);
                self.expression();
                self.emit_op(op);
            } else {
                self.expression();
            }
            self.emit_op_u16(OpCode::SetProperty, name);
        } else if self.match_token(&TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_op_u16(OpCode::Invoke, name);
            self.emit_byte(argc);
        } else {
            self.emit_op_u16(OpCode::GetProperty, name);
        }
    }

    /// `::name(args)` calls the parent's version of a method on the current receiver.
    fn super_call(&mut self) {
        if self.owner.is_none() {
            self.error("Can't use '::' outside of an object.");
            return;
        }
        let name = self.consume_identifier("Expect method name after '::'.");
        let name = self.identifier_constant(&name);
        self.consume(&TokenKind::LeftParen, "Expect '(' after method name.");
        self.load_receiver();
        let argc = self.argument_list();
        self.load_receiver();
        self.emit_op(OpCode::Super);
        self.emit_op_u16(OpCode::SuperInvoke, name);
        self.emit_byte(argc);
    }

    fn lambda(&mut self) {
        self.function(CompilationKind::Function, "");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::compiler::compile;
    use crate::vm::compile_object;

    #[test]
    fn test_precedence_order() {
        assert!(Precedence::Assignment < Precedence::Or);
        assert!(Precedence::Term < Precedence::Factor);
        assert_eq!(Precedence::Call.next(), Precedence::Primary);
        assert_eq!(get_precedence(&TokenKind::Arrow), Precedence::Call);
        assert_eq!(get_precedence(&TokenKind::Equal), Precedence::None);
    }

    #[test]
    fn test_invoke_emitted_for_arrow_call() {
        let script = compile("test", "var o; o->greet(1, 2);").unwrap();
        let code = &script.chunk.code;
        let pos = code
            .iter()
            .position(|b| *b == OpCode::Invoke as u8)
            .unwrap();
        assert_eq!(code[pos + 3], 2);
    }

    #[test]
    fn test_super_call_outside_object() {
        let errors = compile("test", "::create();").unwrap_err();
        assert!(errors.mentions("Can't use '::' outside of an object."));
    }

    #[test]
    fn test_super_call_in_method() {
        let object = compile_object(
            "/obj/orc",
            "inherit \"/std/monster\";\nvoid create() { ::create(); }",
        )
        .unwrap();
        let method = object
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Constant::Compilation(m) if m.name == "create" => Some(m.clone()),
                _ => None,
            })
            .unwrap();
        assert!(method.chunk.code.contains(&(OpCode::Super as u8)));
        assert!(method.chunk.code.contains(&(OpCode::SuperInvoke as u8)));
        assert_eq!(method.owner.as_deref(), Some("/obj/orc"));
    }

    #[test]
    fn test_bare_identifier_in_object_is_property() {
        let object = compile_object("/obj/a", "int hp = 1;\nint get() { return hp; }").unwrap();
        let method = object
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Constant::Compilation(m) => Some(m.clone()),
                _ => None,
            })
            .unwrap();
        let code = &method.chunk.code;
        assert_eq!(code[0], OpCode::GetLocal as u8);
        assert_eq!(code[1], 0);
        assert_eq!(code[2], OpCode::GetProperty as u8);
        assert!(!code.contains(&(OpCode::GetGlobal as u8)));
    }
}
