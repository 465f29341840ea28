use std::fmt;

use crate::bytecode::chunk::Chunk;
use crate::bytecode::op_code::OpCode;
use crate::runtime::gc::{ExternalRoots, Handle, Heap};
use crate::runtime::object::{HeapObject, ObjFunction};
use crate::runtime::value::Value;
use crate::syntax::scanner::Scanner;
use crate::syntax::token::{Token, TokenKind};

#[cfg(test)]
mod compiler_test;
mod expression;

/// Locals per function, including the reserved slot 0.
const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_CONSTANTS: usize = 1 << 24;

/// What kind of function body is being compiled. Everything except
/// `Function` changes some rule: scripts reject `return`, initializers
/// reject `return <expr>` and return `this`, and methods reserve slot 0 for
/// `this`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// A declared local. `depth` is `None` between declaration and the end of
/// its initializer, which is what makes `var x = x;` detectable.
#[derive(Debug)]
struct Local<'src> {
    name: &'src str,
    depth: Option<usize>,
    is_captured: bool,
}

/// Compile-time description of a captured variable: a local slot of the
/// enclosing function, or an index into the enclosing function's upvalues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

/// Per-function compiler state. The compiler keeps a stack of these; the
/// last entry is the function currently being emitted and the ones below it
/// are its lexical enclosers.
#[derive(Debug)]
struct FnState<'src> {
    function: ObjFunction,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: usize,
}

impl<'src> FnState<'src> {
    fn new(kind: FunctionKind, name: Option<Handle>) -> Self {
        // Slot 0 belongs to the VM: the receiver in methods, otherwise the
        // callee placeholder, which no user identifier can resolve to.
        let reserved = Local {
            name: if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) {
                "this"
            } else {
                ""
            },
            depth: Some(0),
            is_captured: false,
        };
        Self {
            function: ObjFunction::new(name),
            kind,
            locals: vec![reserved],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

/// Per-class compiler state, for validating `this`/`super` and tracking the
/// synthetic `super` scope.
#[derive(Debug)]
struct ClassState {
    has_superclass: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorLocation {
    AtEnd,
    At(String),
    /// Scanner errors carry their message as the lexeme; no location text.
    Plain,
}

/// One reported compile error. Rendering matches the error stream format:
/// `[line N] Error at 'lexeme': message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub line: usize,
    pub location: ErrorLocation,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            ErrorLocation::AtEnd => {
                write!(f, "[line {}] Error at end: {}", self.line, self.message)
            }
            ErrorLocation::At(lexeme) => {
                write!(f, "[line {}] Error at '{}': {}", self.line, lexeme, self.message)
            }
            ErrorLocation::Plain => write!(f, "[line {}] Error: {}", self.line, self.message),
        }
    }
}

/// Compiles a source text into a top-level script function.
pub fn compile(source: &str, heap: &mut Heap) -> Result<Handle, Vec<CompileError>> {
    compile_with_roots(source, heap, ExternalRoots::default())
}

/// Like [`compile`], with extra GC roots to pin across compile-time
/// collections. The VM passes its globals table and cached strings so a
/// REPL compile cannot free them.
pub fn compile_with_roots(
    source: &str,
    heap: &mut Heap,
    roots: ExternalRoots<'_>,
) -> Result<Handle, Vec<CompileError>> {
    Compiler::new(source, heap, roots).compile_script()
}

/// The single-pass compiler: scanner, Pratt parser, resolver, and emitter in
/// one. There is no AST; parsing a construct emits its bytecode directly
/// into the current function's chunk, patching jumps after the fact.
struct Compiler<'src, 'h, 'r> {
    scanner: Scanner<'src>,
    heap: &'h mut Heap,
    roots: ExternalRoots<'r>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    states: Vec<FnState<'src>>,
    classes: Vec<ClassState>,
}

impl<'src, 'h, 'r> Compiler<'src, 'h, 'r> {
    fn new(source: &'src str, heap: &'h mut Heap, roots: ExternalRoots<'r>) -> Self {
        let placeholder = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 1,
        };
        Self {
            scanner: Scanner::new(source),
            heap,
            roots,
            current: placeholder,
            previous: placeholder,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            states: Vec::new(),
            classes: Vec::new(),
        }
    }

    fn compile_script(mut self) -> Result<Handle, Vec<CompileError>> {
        self.states.push(FnState::new(FunctionKind::Script, None));

        self.advance();
        while !self.matches(TokenKind::Eof) {
            self.declaration();
        }
        self.emit_return();

        if self.had_error {
            return Err(self.errors);
        }

        // Collect before detaching the state so the script's constants are
        // still rooted through the in-progress function.
        self.maybe_collect();
        let state = self.states.pop().expect("script state");
        let mut function = state.function;
        function.upvalue_count = state.upvalues.len();
        Ok(self.heap.alloc(HeapObject::Function(function)))
    }

    // --- Parser primitives ------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at(self.current, &message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // --- Errors -----------------------------------------------------------

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        // Panic mode swallows everything until the parser resynchronizes.
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;

        let location = match token.kind {
            TokenKind::Eof => ErrorLocation::AtEnd,
            TokenKind::Error => ErrorLocation::Plain,
            _ => ErrorLocation::At(token.lexeme.to_string()),
        };
        self.errors.push(CompileError {
            line: token.line,
            location,
            message: message.to_string(),
        });
    }

    /// Skips forward to a statement boundary after an erroring declaration.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // --- State access and emission ----------------------------------------

    fn state(&self) -> &FnState<'src> {
        self.states.last().expect("no active function state")
    }

    fn state_mut(&mut self) -> &mut FnState<'src> {
        self.states.last_mut().expect("no active function state")
    }

    fn current_chunk_mut(&mut self) -> &mut Chunk {
        &mut self.states.last_mut().expect("no active function state").function.chunk
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk_mut().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_index_op(&mut self, op: OpCode, index: usize) {
        let line = self.previous.line;
        self.current_chunk_mut().write_index_op(op, index, line);
    }

    fn emit_return(&mut self) {
        if self.state().kind == FunctionKind::Initializer {
            // An initializer implicitly returns its instance.
            self.emit_op(OpCode::OpGetLocal);
            self.emit_byte(0);
        } else {
            self.emit_op(OpCode::OpNil);
        }
        self.emit_op(OpCode::OpReturn);
    }

    fn make_constant(&mut self, value: Value) -> usize {
        let index = self.current_chunk_mut().add_constant(value);
        if index >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_index_op(OpCode::OpConstant, index);
    }

    /// Emits a jump with a two-byte placeholder and returns the placeholder
    /// offset for patching.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk_mut().code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // Distance from just past the operand to the current end.
        let jump = self.current_chunk_mut().code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let code = &mut self.current_chunk_mut().code;
        code[offset] = (jump >> 8) as u8;
        code[offset + 1] = jump as u8;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::OpLoop);
        let offset = self.current_chunk_mut().code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_byte((offset >> 8) as u8);
        self.emit_byte(offset as u8);
    }

    // --- Garbage collection -----------------------------------------------

    /// Interns through a collection check; every compiler allocation funnels
    /// through here or [`Self::maybe_collect`] so stress mode can collect at
    /// each site.
    fn intern(&mut self, chars: &str) -> Handle {
        self.maybe_collect();
        self.heap.intern(chars)
    }

    fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    fn collect_garbage(&mut self) {
        // Every in-progress function is a root: its name plus whatever
        // already landed in its constants pool.
        for state in &self.states {
            if let Some(name) = state.function.name {
                self.heap.mark_object(name);
            }
            for &constant in &state.function.chunk.constants {
                self.heap.mark_value(constant);
            }
        }
        self.heap.mark_external(self.roots);
        self.heap.trace_references();
        self.heap.sweep();
    }

    // --- Declarations -----------------------------------------------------

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::OpNil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );

        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // Initialized immediately so the function can call itself.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    /// Compiles a function body into a fresh nested state, then emits the
    /// `OP_CLOSURE` that builds it at runtime, followed by one
    /// `(is_local, index)` byte pair per captured upvalue.
    fn function(&mut self, kind: FunctionKind) {
        let name = self.intern(self.previous.lexeme);
        self.states.push(FnState::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.state_mut().function.arity += 1;
                if self.state().function.arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        self.emit_return();

        // Collect before the state is detached so its constants stay rooted,
        // then move the finished function into the heap.
        self.maybe_collect();
        let state = self.states.pop().expect("function state");
        let mut function = state.function;
        function.upvalue_count = state.upvalues.len();
        let handle = self.heap.alloc(HeapObject::Function(function));

        let constant = self.make_constant(Value::Obj(handle));
        if constant > u8::MAX as usize {
            // OP_CLOSURE has no long form; its operand must fit one byte.
            self.error("Too many constants in one chunk.");
            return;
        }
        self.emit_op(OpCode::OpClosure);
        self.emit_byte(constant as u8);
        for upvalue in state.upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(class_name);
        self.declare_variable();
        self.emit_index_op(OpCode::OpClass, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassState {
            has_superclass: false,
        });

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false);
            if class_name.lexeme == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }

            // The superclass value stays on the stack as a synthetic local
            // named `super`, in a scope of its own.
            self.begin_scope();
            self.add_local(Token::synthetic("super", self.previous.line));
            self.mark_initialized();

            self.named_variable(class_name, false);
            self.emit_op(OpCode::OpInherit);
            self.classes.last_mut().expect("class state").has_superclass = true;
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::OpPop);

        if self.classes.last().expect("class state").has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous);
        let kind = if self.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_index_op(OpCode::OpMethod, constant);
    }

    // --- Statements -------------------------------------------------------

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::OpPrint);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::OpPop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        // OP_JUMP_IF_FALSE leaves the condition on the stack; both paths pop
        // it explicitly.
        let then_jump = self.emit_jump(OpCode::OpJumpIfFalse);
        self.emit_op(OpCode::OpPop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::OpJump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::OpPop);
        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn return_statement(&mut self) {
        if self.state().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.state().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::OpReturn);
        }
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk_mut().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::OpJumpIfFalse);
        self.emit_op(OpCode::OpPop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::OpPop);
    }

    /// `for` desugars to an initializer scope around a while-shaped loop,
    /// with the increment clause jumped over on the way in and looped back
    /// through on every iteration.
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.matches(TokenKind::Semicolon) {
            // No initializer.
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk_mut().code.len();
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::OpJumpIfFalse));
            self.emit_op(OpCode::OpPop);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::OpJump);
            let increment_start = self.current_chunk_mut().code.len();
            self.expression();
            self.emit_op(OpCode::OpPop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::OpPop);
        }
        self.end_scope();
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    // --- Scopes and variable resolution -----------------------------------

    fn begin_scope(&mut self) {
        self.state_mut().scope_depth += 1;
    }

    /// Pops the scope's locals, closing the ones that were captured. This
    /// runs on every exit path, including after parse errors, because it is
    /// always paired with the `begin_scope` in the same statement handler.
    fn end_scope(&mut self) {
        self.state_mut().scope_depth -= 1;

        loop {
            let scope_depth = self.state().scope_depth;
            let (depth, is_captured) = match self.state().locals.last() {
                Some(local) => (local.depth, local.is_captured),
                None => break,
            };
            if depth.is_some_and(|d| d <= scope_depth) {
                break;
            }
            if is_captured {
                self.emit_op(OpCode::OpCloseUpvalue);
            } else {
                self.emit_op(OpCode::OpPop);
            }
            self.state_mut().locals.pop();
        }
    }

    /// Consumes an identifier and declares it. Returns the constant index of
    /// the name for globals; locals need no constant.
    fn parse_variable(&mut self, message: &str) -> usize {
        self.consume(TokenKind::Identifier, message);

        self.declare_variable();
        if self.state().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous)
    }

    fn identifier_constant(&mut self, name: Token<'src>) -> usize {
        let handle = self.intern(name.lexeme);
        self.make_constant(Value::Obj(handle))
    }

    /// Adds a local in the declared-but-uninitialized state. Shadowing
    /// within the same scope depth is an error; shadowing outer scopes is
    /// fine.
    fn declare_variable(&mut self) {
        if self.state().scope_depth == 0 {
            return;
        }
        let name = self.previous;

        let scope_depth = self.state().scope_depth;
        let mut shadows_same_scope = false;
        for local in self.state().locals.iter().rev() {
            if local.depth.is_some_and(|d| d < scope_depth) {
                break;
            }
            if local.name == name.lexeme {
                shadows_same_scope = true;
                break;
            }
        }
        if shadows_same_scope {
            self.error("Already a variable with this name in this scope.");
        }

        self.add_local(name);
    }

    fn add_local(&mut self, name: Token<'src>) {
        if self.state().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.state_mut().locals.push(Local {
            name: name.lexeme,
            depth: None,
            is_captured: false,
        });
    }

    fn mark_initialized(&mut self) {
        let depth = self.state().scope_depth;
        if depth == 0 {
            return;
        }
        self.state_mut()
            .locals
            .last_mut()
            .expect("a declared local")
            .depth = Some(depth);
    }

    fn define_variable(&mut self, global: usize) {
        if self.state().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_index_op(OpCode::OpDefineGlobal, global);
    }

    /// Back-to-front scan of a function's locals. Reading a local inside its
    /// own initializer (depth still unset) is an error.
    fn resolve_local(&mut self, state_index: usize, name: &str) -> Option<u8> {
        let mut found = None;
        for (slot, local) in self.states[state_index].locals.iter().enumerate().rev() {
            if local.name == name {
                found = Some((slot, local.depth.is_none()));
                break;
            }
        }

        let (slot, uninitialized) = found?;
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        Some(slot as u8)
    }

    /// Resolves a name against enclosing functions, materializing the chain
    /// of upvalue descriptors on the way back down. The directly captured
    /// local is flagged so its scope exit closes instead of popping.
    fn resolve_upvalue(&mut self, state_index: usize, name: &str) -> Option<u8> {
        if state_index == 0 {
            return None;
        }

        if let Some(local) = self.resolve_local(state_index - 1, name) {
            self.states[state_index - 1].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(state_index, local, true));
        }

        if let Some(upvalue) = self.resolve_upvalue(state_index - 1, name) {
            return Some(self.add_upvalue(state_index, upvalue, false));
        }

        None
    }

    fn add_upvalue(&mut self, state_index: usize, index: u8, is_local: bool) -> u8 {
        let existing = self.states[state_index]
            .upvalues
            .iter()
            .position(|upvalue| upvalue.index == index && upvalue.is_local == is_local);
        if let Some(existing) = existing {
            return existing as u8;
        }

        if self.states[state_index].upvalues.len() == MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }

        self.states[state_index]
            .upvalues
            .push(UpvalueDesc { index, is_local });
        (self.states[state_index].upvalues.len() - 1) as u8
    }
}
