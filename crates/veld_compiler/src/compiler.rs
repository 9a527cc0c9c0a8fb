//! Compiler state: token cursor, per-function scopes, bytecode emission.

use std::rc::Rc;

use ahash::RandomState;
use hashbrown::HashMap;

use veld_bytecode::{instruction_len, Constant, FuncKind, FuncProto, OpCode, UpvalDesc};
use veld_lexer::Lexer;
use veld_syntax::{Diagnostic, Token, TokenKind};

/// Hard cap on locals per function; slots are addressed by a 16-bit
/// operand.
pub(crate) const MAX_LOCALS: usize = u16::MAX as usize;
/// Hard cap on captured upvalues per function.
pub(crate) const MAX_UPVALUES: usize = u16::MAX as usize;
/// Maximum call arguments (one unsigned operand byte).
pub(crate) const MAX_CALL_ARGS: usize = u8::MAX as usize;

#[derive(Clone, Copy, Debug, Default)]
pub struct CompileOptions {
    /// Echo the value of top-level expression statements (REPL mode).
    pub repl_echo: bool,
}

/// A declared local variable. The name is owned because synthetic locals
/// (`this`, `super`, hidden loop slots) have no backing source text.
pub(crate) struct Local {
    pub name: Box<str>,
    /// Scope depth, or -1 while declared-but-uninitialized.
    pub depth: i32,
    pub captured: bool,
}

/// Per-function compile state.
pub(crate) struct FuncCompiler {
    pub proto: FuncProto,
    pub locals: Vec<Local>,
    pub scope_depth: i32,
    str_consts: HashMap<Rc<str>, u16, RandomState>,
    num_consts: HashMap<u64, u16, RandomState>,
}

impl FuncCompiler {
    pub fn new(name: &str, kind: FuncKind) -> Self {
        let mut fc = Self {
            proto: FuncProto::new(name, kind),
            locals: Vec::new(),
            scope_depth: 0,
            str_consts: HashMap::default(),
            num_consts: HashMap::default(),
        };
        // slot zero belongs to the receiver in methods and to the callee
        // everywhere else
        let slot0 = match kind {
            FuncKind::Method | FuncKind::Initializer | FuncKind::Private => "this",
            _ => "",
        };
        fc.locals.push(Local {
            name: slot0.into(),
            depth: 0,
            captured: false,
        });
        fc
    }
}

/// Per-class compile state.
pub(crate) struct ClassCompiler {
    pub name: Token,
    pub has_superclass: bool,
}

/// The single-pass parser/compiler.
pub struct Parser<'src> {
    pub(crate) lexer: Lexer<'src>,
    pub(crate) src: &'src str,
    pub(crate) options: CompileOptions,
    pub(crate) current: Token,
    pub(crate) previous: Token,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) had_error: bool,
    pub(crate) panic_mode: bool,
    pub(crate) compilers: Vec<FuncCompiler>,
    pub(crate) class_compilers: Vec<ClassCompiler>,
    /// Start of the innermost loop body, -1 outside loops.
    pub(crate) innermost_loop_start: i32,
    pub(crate) innermost_loop_scope_depth: i32,
    pub(crate) in_switch: bool,
    pub(crate) in_try: bool,
}

impl<'src> Parser<'src> {
    pub(crate) fn compile_source(
        source: &'src str,
        name: &str,
        options: CompileOptions,
    ) -> Result<Rc<FuncProto>, Vec<Diagnostic>> {
        let mut parser = Parser {
            lexer: Lexer::new(source),
            src: source,
            options,
            current: Token::synthetic(TokenKind::Eof),
            previous: Token::synthetic(TokenKind::Eof),
            diagnostics: Vec::new(),
            had_error: false,
            panic_mode: false,
            compilers: vec![FuncCompiler::new(name, FuncKind::Script)],
            class_compilers: Vec::new(),
            innermost_loop_start: -1,
            innermost_loop_scope_depth: 0,
            in_switch: false,
            in_try: false,
        };
        parser.advance();
        while !parser.matches(TokenKind::Eof) {
            parser.declaration();
        }
        let proto = parser.end_compiler();
        parser.diagnostics.extend(parser.lexer.diagnostics.drain(..));
        if parser.had_error {
            Err(parser.diagnostics)
        } else {
            Ok(Rc::new(proto))
        }
    }

    // ---- token cursor -------------------------------------------------

    pub(crate) fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            // the lexer already recorded the diagnostic
            self.had_error = true;
        }
    }

    pub(crate) fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    pub(crate) fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    pub(crate) fn consume(&mut self, kind: TokenKind, message: &str) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        self.error_at_current(message);
        false
    }

    /// Statement terminators are optional; eat any run of semicolons.
    pub(crate) fn consume_stmt_end(&mut self) {
        while self.matches(TokenKind::Semicolon) {}
    }

    /// Text of a token; the global sigil is not part of the name.
    pub(crate) fn text(&self, tok: Token) -> &'src str {
        let raw = tok.span.text(self.src);
        if tok.is_global {
            &raw[1..]
        } else {
            raw
        }
    }

    // ---- errors -------------------------------------------------------

    pub(crate) fn error_at(&mut self, tok: Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.diagnostics
            .push(Diagnostic::error(message, Some(tok.span), tok.line));
    }

    pub(crate) fn error(&mut self, message: &str) {
        self.error_at(self.previous, message)
    }

    pub(crate) fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message)
    }

    /// Panic-mode recovery: skip ahead to something that plausibly starts
    /// a fresh statement so one bad construct yields one diagnostic.
    pub(crate) fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.matches(TokenKind::Semicolon) {
                return;
            }
            match self.current.kind {
                TokenKind::KwClass
                | TokenKind::KwFunction
                | TokenKind::KwVar
                | TokenKind::KwConst
                | TokenKind::KwForeach
                | TokenKind::KwIf
                | TokenKind::KwSwitch
                | TokenKind::KwCase
                | TokenKind::KwFor
                | TokenKind::KwDo
                | TokenKind::KwWhile
                | TokenKind::KwEcho
                | TokenKind::KwAssert
                | TokenKind::KwTry
                | TokenKind::KwCatch
                | TokenKind::KwThrow
                | TokenKind::KwReturn
                | TokenKind::KwStatic
                | TokenKind::KwImport => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---- compiler stack ----------------------------------------------

    pub(crate) fn fc(&mut self) -> &mut FuncCompiler {
        self.compilers.last_mut().expect("compiler stack is empty")
    }

    pub(crate) fn fc_ref(&self) -> &FuncCompiler {
        self.compilers.last().expect("compiler stack is empty")
    }

    pub(crate) fn push_compiler(&mut self, name: &str, kind: FuncKind) {
        self.compilers.push(FuncCompiler::new(name, kind));
    }

    /// Finish the innermost function: emit the implicit return and hand
    /// back its proto.
    pub(crate) fn end_compiler(&mut self) -> FuncProto {
        self.emit_return();
        let fc = self.compilers.pop().expect("compiler stack is empty");
        fc.proto
    }

    // ---- emission -----------------------------------------------------

    pub(crate) fn emit_op(&mut self, op: OpCode) {
        let line = self.previous.line;
        self.fc().proto.blob.push_op(op, line);
    }

    pub(crate) fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.fc().proto.blob.push_byte(byte, line);
    }

    pub(crate) fn emit_short(&mut self, value: u16) {
        let line = self.previous.line;
        self.fc().proto.blob.push_short(value, line);
    }

    pub(crate) fn emit_op_short(&mut self, op: OpCode, value: u16) {
        self.emit_op(op);
        self.emit_short(value);
    }

    pub(crate) fn blob_len(&self) -> usize {
        self.fc_ref().proto.blob.len()
    }

    /// Emit a forward jump with a placeholder offset; returns the offset
    /// slot position for `patch_jump`.
    pub(crate) fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_short(0xffff);
        self.blob_len() - 2
    }

    pub(crate) fn patch_jump(&mut self, at: usize) {
        let jump = self.blob_len() - at - 2;
        if jump > u16::MAX as usize {
            self.error("too much code to jump over");
        }
        let blob = &mut self.fc().proto.blob;
        blob.code[at].code = ((jump >> 8) & 0xff) as u8;
        blob.code[at + 1].code = (jump & 0xff) as u8;
    }

    /// Backward jump to `loop_start`.
    pub(crate) fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.blob_len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("loop body too large");
        }
        self.emit_short(offset as u16);
    }

    /// Implicit function return: a constructor yields its receiver,
    /// everything else yields null.
    pub(crate) fn emit_return(&mut self) {
        if self.fc_ref().proto.kind == FuncKind::Initializer {
            self.emit_op_short(OpCode::LocalGet, 0);
        } else {
            self.emit_op(OpCode::PushNull);
        }
        self.emit_op(OpCode::Return);
    }

    pub(crate) fn make_constant(&mut self, constant: Constant) -> u16 {
        let fc = self.fc();
        match &constant {
            Constant::Number(n) => {
                let bits = n.to_bits();
                if let Some(&idx) = fc.num_consts.get(&bits) {
                    return idx;
                }
                let idx = fc.proto.blob.add_constant(constant);
                fc.num_consts.insert(bits, idx);
                idx
            }
            Constant::Str(s) => {
                if let Some(&idx) = fc.str_consts.get(s) {
                    return idx;
                }
                let key = Rc::clone(s);
                let idx = fc.proto.blob.add_constant(constant);
                fc.str_consts.insert(key, idx);
                idx
            }
            _ => fc.proto.blob.add_constant(constant),
        }
    }

    pub(crate) fn emit_constant(&mut self, constant: Constant) {
        let idx = self.make_constant(constant);
        self.emit_op_short(OpCode::PushConstant, idx);
    }

    /// Intern an identifier's name in the constant pool.
    pub(crate) fn ident_constant(&mut self, tok: Token) -> u16 {
        let name: Rc<str> = Rc::from(self.text(tok));
        self.make_constant(Constant::Str(name))
    }

    pub(crate) fn name_constant(&mut self, name: &str) -> u16 {
        self.make_constant(Constant::Str(Rc::from(name)))
    }

    // ---- scopes and locals -------------------------------------------

    pub(crate) fn begin_scope(&mut self) {
        self.fc().scope_depth += 1;
    }

    pub(crate) fn end_scope(&mut self) {
        self.fc().scope_depth -= 1;
        let depth = self.fc_ref().scope_depth;
        loop {
            let captured = match self.fc_ref().locals.last() {
                Some(local) if local.depth > depth => local.captured,
                _ => break,
            };
            if captured {
                self.emit_op(OpCode::UpvalueClose);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.fc().locals.pop();
        }
    }

    /// Pop the values of locals at `depth` or deeper without dropping
    /// their compile-time slots; used by `break`/`continue`/`throw`.
    pub(crate) fn discard_locals(&mut self, depth: i32) {
        let mut idx = self.fc_ref().locals.len();
        while idx > 0 && self.fc_ref().locals[idx - 1].depth >= depth {
            if self.fc_ref().locals[idx - 1].captured {
                self.emit_op(OpCode::UpvalueClose);
            } else {
                self.emit_op(OpCode::Pop);
            }
            idx -= 1;
        }
    }

    pub(crate) fn add_local(&mut self, name: &str) -> usize {
        if self.fc_ref().locals.len() >= MAX_LOCALS {
            self.error("too many local variables in scope");
            return 0;
        }
        self.fc().locals.push(Local {
            name: name.into(),
            depth: -1,
            captured: false,
        });
        self.fc_ref().locals.len() - 1
    }

    pub(crate) fn mark_initialized(&mut self) {
        let fc = self.fc();
        if fc.scope_depth == 0 {
            return;
        }
        let depth = fc.scope_depth;
        if let Some(local) = fc.locals.last_mut() {
            local.depth = depth;
        }
    }

    /// Declare the previous token as a variable in the current scope;
    /// globals are implicitly declared.
    pub(crate) fn declare_variable(&mut self) {
        if self.fc_ref().scope_depth == 0 {
            return;
        }
        let name = self.text(self.previous).to_string();
        let depth = self.fc_ref().scope_depth;
        let mut duplicate = false;
        for local in self.fc_ref().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if &*local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error(&format!("{name} already declared in current scope"));
        }
        self.add_local(&name);
    }

    /// Consume a variable name; returns its ident constant when at global
    /// scope, zero otherwise.
    pub(crate) fn parse_variable(&mut self, message: &str) -> u16 {
        self.consume(TokenKind::Ident, message);
        self.declare_variable();
        if self.fc_ref().scope_depth > 0 {
            return 0;
        }
        self.ident_constant(self.previous)
    }

    pub(crate) fn define_variable(&mut self, global: u16) {
        if self.fc_ref().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_short(OpCode::GlobalDefine, global);
    }

    // ---- identifier resolution ---------------------------------------

    pub(crate) fn resolve_local(&self, ci: usize, name: &str) -> Option<u16> {
        let fc = &self.compilers[ci];
        for (i, local) in fc.locals.iter().enumerate().rev() {
            if &*local.name == name {
                return Some(i as u16);
            }
        }
        None
    }

    fn add_upvalue(&mut self, ci: usize, index: u16, is_local: bool) -> u16 {
        let proto = &mut self.compilers[ci].proto;
        for (i, uv) in proto.upvalues.iter().enumerate() {
            if uv.index == index && uv.is_local == is_local {
                return i as u16;
            }
        }
        if proto.upvalues.len() >= MAX_UPVALUES {
            self.error("too many closure variables in function");
            return 0;
        }
        proto.upvalues.push(UpvalDesc { is_local, index });
        (proto.upvalues.len() - 1) as u16
    }

    /// Resolve `name` as an upvalue of compiler `ci`: a local of the
    /// enclosing function is captured and flagged, an upvalue of the
    /// enclosing function is chained.
    pub(crate) fn resolve_upvalue(&mut self, ci: usize, name: &str) -> Option<u16> {
        if ci == 0 {
            return None;
        }
        let parent = ci - 1;
        if let Some(local) = self.resolve_local(parent, name) {
            self.compilers[parent].locals[local as usize].captured = true;
            return Some(self.add_upvalue(ci, local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(parent, name) {
            return Some(self.add_upvalue(ci, upvalue, false));
        }
        None
    }

    // ---- loop ending --------------------------------------------------

    /// Rewrite every `break` placeholder emitted since `loop_start` into
    /// a forward jump to the current position. The scan steps by operand
    /// lengths, so multi-byte operands can never be misread as opcodes.
    pub(crate) fn end_loop(&mut self, loop_start: usize) {
        let mut i = loop_start;
        while i < self.blob_len() {
            if self.fc_ref().proto.blob.code[i].code == OpCode::BreakPlaceholder as u8 {
                self.fc().proto.blob.code[i].code = OpCode::Jump as u8;
                self.patch_jump(i + 1);
                i += 3;
            } else {
                i += 1 + instruction_len(&self.fc_ref().proto.blob, i);
            }
        }
    }
}
