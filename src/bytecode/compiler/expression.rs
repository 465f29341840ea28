use crate::bytecode::op_code::OpCode;
use crate::runtime::value::Value;
use crate::syntax::token::{Token, TokenKind};

use super::Compiler;

/// Operator precedence, lowest to highest. Binary operators parse their
/// right operand one level up, which is what makes them left-associative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
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

type ParseFn<'src, 'h, 'r> = fn(&mut Compiler<'src, 'h, 'r>, bool);

/// One row of the Pratt table.
struct ParseRule<'src, 'h, 'r> {
    prefix: Option<ParseFn<'src, 'h, 'r>>,
    infix: Option<ParseFn<'src, 'h, 'r>>,
    precedence: Precedence,
}

/// The Pratt table: every token kind maps to its prefix rule, infix rule,
/// and infix precedence.
fn rule<'src, 'h, 'r>(kind: TokenKind) -> ParseRule<'src, 'h, 'r> {
    fn make<'src, 'h, 'r>(
        prefix: Option<ParseFn<'src, 'h, 'r>>,
        infix: Option<ParseFn<'src, 'h, 'r>>,
        precedence: Precedence,
    ) -> ParseRule<'src, 'h, 'r> {
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }

    match kind {
        TokenKind::LeftParen => make(
            Some(Compiler::grouping),
            Some(Compiler::call),
            Precedence::Call,
        ),
        TokenKind::Dot => make(None, Some(Compiler::dot), Precedence::Call),
        TokenKind::Minus => make(
            Some(Compiler::unary),
            Some(Compiler::binary),
            Precedence::Term,
        ),
        TokenKind::Plus => make(None, Some(Compiler::binary), Precedence::Term),
        TokenKind::Slash | TokenKind::Star => {
            make(None, Some(Compiler::binary), Precedence::Factor)
        }
        TokenKind::Bang => make(Some(Compiler::unary), None, Precedence::None),
        TokenKind::BangEqual | TokenKind::EqualEqual => {
            make(None, Some(Compiler::binary), Precedence::Equality)
        }
        TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::Less
        | TokenKind::LessEqual => make(None, Some(Compiler::binary), Precedence::Comparison),
        TokenKind::Identifier => make(Some(Compiler::variable), None, Precedence::None),
        TokenKind::String => make(Some(Compiler::string), None, Precedence::None),
        TokenKind::Number => make(Some(Compiler::number), None, Precedence::None),
        TokenKind::And => make(None, Some(Compiler::and_), Precedence::And),
        TokenKind::Or => make(None, Some(Compiler::or_), Precedence::Or),
        TokenKind::False | TokenKind::Nil | TokenKind::True => {
            make(Some(Compiler::literal), None, Precedence::None)
        }
        TokenKind::Super => make(Some(Compiler::super_), None, Precedence::None),
        TokenKind::This => make(Some(Compiler::this_), None, Precedence::None),
        _ => make(None, None, Precedence::None),
    }
}

impl<'src, 'h, 'r> Compiler<'src, 'h, 'r> {
    pub(super) fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    /// Precedence climbing: run the prefix rule for the token at hand, then
    /// fold infix rules while they bind at least as tightly as `precedence`.
    ///
    /// `can_assign` is threaded into the handlers that may consume a
    /// trailing `=` (variables, properties, `super`); a leftover `=` in an
    /// assignable position is reported here.
    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= rule(self.current.kind).precedence {
            self.advance();
            let infix = rule(self.previous.kind)
                .infix
                .expect("token with infix precedence has an infix rule");
            infix(self, can_assign);
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self
            .previous
            .lexeme
            .parse()
            .expect("scanner produced a valid number literal");
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        // The lexeme still carries its quotes.
        let lexeme = self.previous.lexeme;
        let handle = self.intern(&lexeme[1..lexeme.len() - 1]);
        self.emit_constant(Value::Obj(handle));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::Nil => self.emit_op(OpCode::OpNil),
            TokenKind::True => self.emit_op(OpCode::OpTrue),
            TokenKind::False => self.emit_op(OpCode::OpFalse),
            _ => unreachable!("literal rule on non-literal token"),
        }
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_op(OpCode::OpNegate),
            TokenKind::Bang => self.emit_op(OpCode::OpNot),
            _ => unreachable!("unary rule on non-unary token"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(rule(operator).precedence.next());

        match operator {
            TokenKind::Plus => self.emit_op(OpCode::OpAdd),
            TokenKind::Minus => self.emit_op(OpCode::OpSubtract),
            TokenKind::Star => self.emit_op(OpCode::OpMultiply),
            TokenKind::Slash => self.emit_op(OpCode::OpDivide),
            TokenKind::EqualEqual => self.emit_op(OpCode::OpEqual),
            TokenKind::BangEqual => self.emit_op(OpCode::OpNotEqual),
            TokenKind::Greater => self.emit_op(OpCode::OpGreater),
            TokenKind::GreaterEqual => self.emit_op(OpCode::OpGreaterEqual),
            TokenKind::Less => self.emit_op(OpCode::OpLess),
            TokenKind::LessEqual => self.emit_op(OpCode::OpLessEqual),
            _ => unreachable!("binary rule on non-binary token"),
        }
    }

    /// `and` short-circuits by jumping over the right operand when the left
    /// is falsey; the jump leaves the left value as the expression result.
    fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::OpJumpIfFalse);
        self.emit_op(OpCode::OpPop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::OpJumpIfFalse);
        let end_jump = self.emit_jump(OpCode::OpJump);

        self.patch_jump(else_jump);
        self.emit_op(OpCode::OpPop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_op(OpCode::OpCall);
        self.emit_byte(arg_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_index_op(OpCode::OpSetProperty, name);
        } else if self.matches(TokenKind::LeftParen) {
            // Fused property access + call.
            let arg_count = self.argument_list();
            self.emit_index_op(OpCode::OpInvoke, name);
            self.emit_byte(arg_count);
        } else {
            self.emit_index_op(OpCode::OpGetProperty, name);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }

    pub(super) fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous, can_assign);
    }

    /// Emits the get or set for a name, resolved as exactly one of local,
    /// upvalue, or global.
    pub(super) fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        enum Target {
            Local(u8),
            Upvalue(u8),
            Global(usize),
        }

        let top = self.states.len() - 1;
        let target = if let Some(slot) = self.resolve_local(top, name.lexeme) {
            Target::Local(slot)
        } else if let Some(index) = self.resolve_upvalue(top, name.lexeme) {
            Target::Upvalue(index)
        } else {
            Target::Global(self.identifier_constant(name))
        };

        let is_assignment = can_assign && self.matches(TokenKind::Equal);
        if is_assignment {
            self.expression();
        }

        match (target, is_assignment) {
            (Target::Local(slot), true) => {
                self.emit_op(OpCode::OpSetLocal);
                self.emit_byte(slot);
            }
            (Target::Local(slot), false) => {
                self.emit_op(OpCode::OpGetLocal);
                self.emit_byte(slot);
            }
            (Target::Upvalue(index), true) => {
                self.emit_op(OpCode::OpSetUpvalue);
                self.emit_byte(index);
            }
            (Target::Upvalue(index), false) => {
                self.emit_op(OpCode::OpGetUpvalue);
                self.emit_byte(index);
            }
            (Target::Global(constant), true) => {
                self.emit_index_op(OpCode::OpSetGlobal, constant);
            }
            (Target::Global(constant), false) => {
                self.emit_index_op(OpCode::OpGetGlobal, constant);
            }
        }
    }

    fn this_(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        // `this` resolves like any local: methods reserve slot 0 under that
        // name.
        self.variable(false);
    }

    fn super_(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.classes.last().expect("class state").has_superclass {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous);
        let line = self.previous.line;

        self.named_variable(Token::synthetic("this", line), false);
        if self.matches(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable(Token::synthetic("super", line), false);
            self.emit_index_op(OpCode::OpSuperInvoke, name);
            self.emit_byte(arg_count);
        } else {
            self.named_variable(Token::synthetic("super", line), false);
            self.emit_index_op(OpCode::OpGetSuper, name);
        }
    }
}
