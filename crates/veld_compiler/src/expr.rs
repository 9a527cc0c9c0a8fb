//! Expression compilation: the Pratt rule table and every prefix/infix
//! rule. Rules emit bytecode directly as they recognize their grammar.

use std::rc::Rc;

use veld_bytecode::{Constant, FuncKind, OpCode};
use veld_syntax::{Token, TokenKind};

use crate::compiler::{Parser, MAX_CALL_ARGS};

/// Operator precedence, lowest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Prec {
    None,
    Assignment,
    Conditional,
    Or,
    And,
    Equality,
    Comparison,
    BitOr,
    BitXor,
    BitAnd,
    Shift,
    Range,
    Term,
    Factor,
    Unary,
    Call,
}

impl Prec {
    fn one_higher(self) -> Prec {
        match self {
            Prec::None => Prec::Assignment,
            Prec::Assignment => Prec::Conditional,
            Prec::Conditional => Prec::Or,
            Prec::Or => Prec::And,
            Prec::And => Prec::Equality,
            Prec::Equality => Prec::Comparison,
            Prec::Comparison => Prec::BitOr,
            Prec::BitOr => Prec::BitXor,
            Prec::BitXor => Prec::BitAnd,
            Prec::BitAnd => Prec::Shift,
            Prec::Shift => Prec::Range,
            Prec::Range => Prec::Term,
            Prec::Term => Prec::Factor,
            Prec::Factor => Prec::Unary,
            Prec::Unary | Prec::Call => Prec::Call,
        }
    }
}

type PrefixFn = for<'src> fn(&mut Parser<'src>, bool);
type InfixFn = for<'src> fn(&mut Parser<'src>, Token, bool);

pub(crate) struct Rule {
    pub prefix: Option<PrefixFn>,
    pub infix: Option<InfixFn>,
    pub prec: Prec,
}

const fn rule(prefix: Option<PrefixFn>, infix: Option<InfixFn>, prec: Prec) -> Rule {
    Rule {
        prefix,
        infix,
        prec,
    }
}

/// The token-kind to (prefix, infix, precedence) map.
pub(crate) fn rule_for(kind: TokenKind) -> Rule {
    match kind {
        TokenKind::ParenOpen => rule(Some(rule_grouping), Some(rule_call), Prec::Call),
        TokenKind::BracketOpen => rule(Some(rule_array), Some(rule_indexing), Prec::Call),
        TokenKind::BraceOpen => rule(Some(rule_dictionary), None, Prec::None),
        TokenKind::At => rule(Some(rule_anon_func), None, Prec::None),
        TokenKind::Dot => rule(None, Some(rule_dot), Prec::Call),
        TokenKind::DotDot => rule(None, Some(rule_binary), Prec::Range),
        TokenKind::Bang => rule(Some(rule_unary), None, Prec::None),
        TokenKind::BangEq => rule(None, Some(rule_binary), Prec::Equality),
        TokenKind::EqEq => rule(None, Some(rule_binary), Prec::Equality),
        TokenKind::Plus => rule(Some(rule_unary), Some(rule_binary), Prec::Term),
        TokenKind::Minus => rule(Some(rule_unary), Some(rule_binary), Prec::Term),
        TokenKind::Star => rule(None, Some(rule_binary), Prec::Factor),
        TokenKind::Pow => rule(None, Some(rule_binary), Prec::Factor),
        TokenKind::Slash => rule(None, Some(rule_binary), Prec::Factor),
        TokenKind::Percent => rule(None, Some(rule_binary), Prec::Factor),
        TokenKind::Less => rule(None, Some(rule_binary), Prec::Comparison),
        TokenKind::LessEq => rule(None, Some(rule_binary), Prec::Comparison),
        TokenKind::Greater => rule(None, Some(rule_binary), Prec::Comparison),
        TokenKind::GreaterEq => rule(None, Some(rule_binary), Prec::Comparison),
        TokenKind::Shl => rule(None, Some(rule_binary), Prec::Shift),
        TokenKind::Shr => rule(None, Some(rule_binary), Prec::Shift),
        TokenKind::Amp => rule(None, Some(rule_binary), Prec::BitAnd),
        TokenKind::Bar => rule(None, Some(rule_binary), Prec::BitOr),
        TokenKind::Caret => rule(None, Some(rule_binary), Prec::BitXor),
        TokenKind::Tilde => rule(Some(rule_unary), None, Prec::None),
        TokenKind::Question => rule(None, Some(rule_conditional), Prec::Conditional),
        TokenKind::KwAnd => rule(None, Some(rule_and), Prec::And),
        TokenKind::KwOr => rule(None, Some(rule_or), Prec::Or),
        TokenKind::KwInstanceOf => rule(None, Some(rule_instanceof), Prec::Equality),
        TokenKind::KwNew => rule(Some(rule_new), None, Prec::None),
        TokenKind::KwTypeof => rule(Some(rule_typeof), None, Prec::None),
        TokenKind::KwImport => rule(Some(rule_import), None, Prec::None),
        TokenKind::KwClass => rule(Some(rule_anon_class), None, Prec::None),
        TokenKind::KwNull => rule(Some(rule_literal), None, Prec::None),
        TokenKind::KwEmpty => rule(Some(rule_literal), None, Prec::None),
        TokenKind::KwTrue => rule(Some(rule_literal), None, Prec::None),
        TokenKind::KwFalse => rule(Some(rule_literal), None, Prec::None),
        TokenKind::KwThis => rule(Some(rule_this), None, Prec::None),
        TokenKind::KwSuper => rule(Some(rule_super), None, Prec::None),
        TokenKind::Number
        | TokenKind::BinNumber
        | TokenKind::OctNumber
        | TokenKind::HexNumber => rule(Some(rule_number), None, Prec::None),
        TokenKind::Str | TokenKind::RawStr => rule(Some(rule_string), None, Prec::None),
        TokenKind::Interpolation => rule(Some(rule_interpol_string), None, Prec::None),
        TokenKind::Ident => rule(Some(rule_variable), None, Prec::None),
        _ => rule(None, None, Prec::None),
    }
}

impl<'src> Parser<'src> {
    pub(crate) fn expression(&mut self) {
        self.parse_precedence(Prec::Assignment);
    }

    pub(crate) fn parse_precedence(&mut self, prec: Prec) {
        self.advance();
        let prefix = match rule_for(self.previous.kind).prefix {
            Some(f) => f,
            None => {
                self.error("expected expression");
                return;
            }
        };
        let can_assign = prec <= Prec::Assignment;
        prefix(self, can_assign);
        while prec <= rule_for(self.current.kind).prec {
            let previous = self.previous;
            self.advance();
            if let Some(infix) = rule_for(self.previous.kind).infix {
                infix(self, previous, can_assign);
            }
        }
        if can_assign && self.matches(TokenKind::Assign) {
            self.error("invalid assignment target");
        }
    }

    /// Shared tail of every readable/writable access site: plain read,
    /// `=`, the compound-assignment forms, `++` and `--`.
    ///
    /// `arg` is the operand for `get_op`/`set_op`, or `None` for the
    /// index operators whose single operand byte is the will-assign flag.
    pub(crate) fn assignment(
        &mut self,
        get_op: OpCode,
        set_op: OpCode,
        arg: Option<u16>,
        can_assign: bool,
    ) {
        if can_assign && self.matches(TokenKind::Assign) {
            self.expression();
            self.emit_set(set_op, arg);
            return;
        }
        let op_token = self.current.kind;
        if can_assign && op_token.is_assign_op() {
            self.advance();
            let binary = match op_token {
                TokenKind::PlusAssign => OpCode::Add,
                TokenKind::MinusAssign => OpCode::Subtract,
                TokenKind::StarAssign => OpCode::Multiply,
                TokenKind::SlashAssign => OpCode::Divide,
                TokenKind::PowAssign => OpCode::Pow,
                TokenKind::PercentAssign => OpCode::Modulo,
                TokenKind::AmpAssign => OpCode::BitAnd,
                TokenKind::BarAssign => OpCode::BitOr,
                TokenKind::TildeAssign => OpCode::BitNot,
                TokenKind::CaretAssign => OpCode::BitXor,
                TokenKind::ShlAssign => OpCode::ShiftLeft,
                TokenKind::ShrAssign => OpCode::ShiftRight,
                _ => unreachable!("checked by is_assign_op"),
            };
            self.read_modify_write(binary, get_op, set_op, arg);
            return;
        }
        if can_assign && (self.check(TokenKind::Increment) || self.check(TokenKind::Decrement)) {
            let binary = if self.check(TokenKind::Increment) {
                OpCode::Add
            } else {
                OpCode::Subtract
            };
            self.advance();
            self.emit_read(get_op, arg, true);
            self.emit_op(OpCode::PushOne);
            self.emit_op(binary);
            self.emit_set(set_op, arg);
            return;
        }
        // plain read
        self.emit_read(get_op, arg, false);
    }

    fn read_modify_write(
        &mut self,
        binary: OpCode,
        get_op: OpCode,
        set_op: OpCode,
        arg: Option<u16>,
    ) {
        self.emit_read(get_op, arg, true);
        self.expression();
        self.emit_op(binary);
        self.emit_set(set_op, arg);
    }

    fn emit_read(&mut self, get_op: OpCode, arg: Option<u16>, will_assign: bool) {
        match get_op {
            OpCode::PropertyGet | OpCode::PropertyGetSelf if will_assign => {
                // keep the receiver around for the upcoming set
                self.emit_op(OpCode::Dup);
                self.emit_op(get_op);
                self.emit_short(arg.unwrap_or(0));
            }
            OpCode::IndexGet | OpCode::IndexGetRanged => {
                self.emit_op(get_op);
                self.emit_byte(will_assign as u8);
            }
            _ => {
                self.emit_op(get_op);
                self.emit_short(arg.unwrap_or(0));
            }
        }
    }

    fn emit_set(&mut self, set_op: OpCode, arg: Option<u16>) {
        match set_op {
            OpCode::IndexSet => self.emit_op(set_op),
            _ => {
                self.emit_op(set_op);
                self.emit_short(arg.unwrap_or(0));
            }
        }
    }

    /// Compile a read or assignment of a named variable: local, then
    /// upvalue, then global. `$name` skips straight to the global path.
    pub(crate) fn named_variable(&mut self, name_tok: Token, can_assign: bool) {
        let name = self.text(name_tok).to_string();
        let ci = self.compilers.len() - 1;
        let local = if name_tok.is_global {
            None
        } else {
            self.resolve_local(ci, &name)
        };
        if let Some(slot) = local {
            let (get_op, set_op) = self.local_ops(slot);
            self.assignment(get_op, set_op, Some(slot), can_assign);
            return;
        }
        if !name_tok.is_global {
            if let Some(upvalue) = self.resolve_upvalue(ci, &name) {
                self.assignment(
                    OpCode::UpvalueGet,
                    OpCode::UpvalueSet,
                    Some(upvalue),
                    can_assign,
                );
                return;
            }
        }
        let idx = self.name_constant(&name);
        self.assignment(OpCode::GlobalGet, OpCode::GlobalSet, Some(idx), can_assign);
    }

    /// Parameter slots read through the argument opcodes; other locals
    /// through the plain local opcodes. Both address the same frame
    /// slots.
    fn local_ops(&self, slot: u16) -> (OpCode, OpCode) {
        let proto = &self.fc_ref().proto;
        let is_param =
            proto.kind != FuncKind::Script && slot >= 1 && slot <= proto.arity;
        if is_param {
            (OpCode::ArgGet, OpCode::ArgSet)
        } else {
            (OpCode::LocalGet, OpCode::LocalSet)
        }
    }

    /// Declare and initialize a fresh variable from an existing token
    /// (used by `catch (E err)`).
    pub(crate) fn created_var(&mut self, name_tok: Token) {
        if self.fc_ref().scope_depth > 0 {
            let name = self.text(name_tok).to_string();
            let slot = self.add_local(&name);
            self.mark_initialized();
            self.emit_op_short(OpCode::LocalSet, slot as u16);
        } else {
            let idx = self.ident_constant(name_tok);
            self.emit_op_short(OpCode::GlobalDefine, idx);
        }
    }

    pub(crate) fn call_args(&mut self) -> u8 {
        let mut argc: usize = 0;
        if !self.check(TokenKind::ParenClose) {
            loop {
                self.expression();
                if argc == MAX_CALL_ARGS {
                    self.error(&format!(
                        "cannot have more than {MAX_CALL_ARGS} arguments to a function"
                    ));
                }
                argc += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::ParenClose, "expected ')' after argument list");
        argc.min(MAX_CALL_ARGS) as u8
    }

    /// Number literal from the previous token, honoring the base prefix.
    pub(crate) fn number_value(&mut self) -> f64 {
        let text = self.text(self.previous);
        match self.previous.kind {
            TokenKind::BinNumber => parse_radix(&text[2..], 2),
            TokenKind::OctNumber => parse_radix(&text[2..], 8),
            TokenKind::HexNumber => parse_radix(&text[2..], 16),
            _ => text.parse::<f64>().unwrap_or(0.0),
        }
    }

    /// Process the previous string-ish token into its literal bytes.
    /// Delimiters (quote, `${`-dollar, resumed `}`) are stripped; escapes
    /// are resolved except in raw (single-quoted) strings.
    pub(crate) fn string_value(&mut self) -> String {
        let raw = self.previous.span.text(self.src);
        let inner = &raw[1..raw.len().saturating_sub(1)];
        if self.previous.kind == TokenKind::RawStr {
            return inner.to_string();
        }
        let bytes = inner.as_bytes();
        let mut out = String::with_capacity(inner.len());
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i];
            if c != b'\\' || i + 1 >= bytes.len() {
                push_raw_byte(&mut out, inner, i);
                i += 1;
                continue;
            }
            let esc = bytes[i + 1];
            let mut consumed = 2;
            match esc {
                b'0' => out.push('\0'),
                b'$' => out.push('$'),
                b'\'' => out.push('\''),
                b'"' => out.push('"'),
                b'a' => out.push('\x07'),
                b'b' => out.push('\x08'),
                b'f' => out.push('\x0c'),
                b'n' => out.push('\n'),
                b'r' => out.push('\r'),
                b't' => out.push('\t'),
                b'e' => out.push('\x1b'),
                b'v' => out.push('\x0b'),
                b'\\' => out.push('\\'),
                b'x' => match read_hex(bytes, i + 2, 2) {
                    Some(v) => {
                        out.push(char::from(v as u8));
                        consumed = 4;
                    }
                    None => {
                        self.error("invalid hex escape sequence");
                        out.push('\\');
                        consumed = 1;
                    }
                },
                b'u' | b'U' => {
                    let digits = if esc == b'u' { 4 } else { 8 };
                    match read_hex(bytes, i + 2, digits).and_then(char::from_u32) {
                        Some(ch) => {
                            out.push(ch);
                            consumed = 2 + digits as usize;
                        }
                        None => {
                            self.error("invalid unicode escape sequence");
                            out.push('\\');
                            consumed = 1;
                        }
                    }
                }
                _ => {
                    // unknown escape: keep the backslash verbatim
                    out.push('\\');
                    consumed = 1;
                }
            }
            i += consumed;
        }
        out
    }
}

fn parse_radix(digits: &str, radix: u32) -> f64 {
    u64::from_str_radix(digits, radix).map_or(f64::INFINITY, |v| v as f64)
}

fn read_hex(bytes: &[u8], at: usize, count: u32) -> Option<u32> {
    let mut value: u32 = 0;
    for k in 0..count as usize {
        let c = *bytes.get(at + k)? as char;
        value = value.checked_mul(16)?.checked_add(c.to_digit(16)?)?;
    }
    Some(value)
}

/// Copy one source byte through; bytes are always valid UTF-8 here since
/// non-escape regions are never split.
fn push_raw_byte(out: &mut String, inner: &str, at: usize) {
    // find the full char starting at `at` (multi-byte chars are copied
    // byte-group at a time by the caller's loop walking continuation
    // bytes individually, so only push leading bytes once)
    if inner.is_char_boundary(at) {
        let ch = inner[at..].chars().next().unwrap_or('\u{fffd}');
        out.push(ch);
    }
}

// ---- prefix rules -----------------------------------------------------

fn rule_grouping(p: &mut Parser, _can_assign: bool) {
    p.expression();
    p.consume(TokenKind::ParenClose, "expected ')' after grouped expression");
}

fn rule_literal(p: &mut Parser, _can_assign: bool) {
    match p.previous.kind {
        TokenKind::KwNull => p.emit_op(OpCode::PushNull),
        TokenKind::KwEmpty => p.emit_op(OpCode::PushEmpty),
        TokenKind::KwTrue => p.emit_op(OpCode::PushTrue),
        TokenKind::KwFalse => p.emit_op(OpCode::PushFalse),
        _ => unreachable!("literal rule on non-literal token"),
    }
}

fn rule_number(p: &mut Parser, _can_assign: bool) {
    let value = p.number_value();
    p.emit_constant(Constant::Number(value));
}

fn rule_string(p: &mut Parser, _can_assign: bool) {
    let value = p.string_value();
    p.emit_constant(Constant::Str(Rc::from(value.as_str())));
}

/// An interpolated string: alternate literal pieces and stringified
/// expressions, concatenating as we go.
fn rule_interpol_string(p: &mut Parser, can_assign: bool) {
    let mut count = 0;
    loop {
        let mut added_piece = false;
        if p.previous.span.len() > 2 {
            rule_string(p, can_assign);
            added_piece = true;
            if count > 0 {
                p.emit_op(OpCode::Add);
            }
        }
        p.expression();
        p.emit_op(OpCode::Stringify);
        if added_piece || count >= 1 {
            p.emit_op(OpCode::Add);
        }
        count += 1;
        if !p.matches(TokenKind::Interpolation) {
            break;
        }
    }
    p.consume(TokenKind::Str, "unterminated string interpolation");
    if p.previous.span.len() > 2 {
        rule_string(p, can_assign);
        p.emit_op(OpCode::Add);
    }
}

fn rule_unary(p: &mut Parser, _can_assign: bool) {
    let op = p.previous.kind;
    p.parse_precedence(Prec::Unary);
    match op {
        TokenKind::Minus => p.emit_op(OpCode::Negate),
        TokenKind::Bang => p.emit_op(OpCode::Not),
        TokenKind::Tilde => p.emit_op(OpCode::BitNot),
        // unary plus is a no-op
        _ => {}
    }
}

fn rule_variable(p: &mut Parser, can_assign: bool) {
    p.named_variable(p.previous, can_assign);
}

fn rule_this(p: &mut Parser, _can_assign: bool) {
    if p.class_compilers.is_empty() {
        p.error("cannot use keyword 'this' outside of a class");
        return;
    }
    p.named_variable(p.previous, false);
}

fn rule_super(p: &mut Parser, _can_assign: bool) {
    match p.class_compilers.last() {
        None => {
            p.error("cannot use keyword 'super' outside of a class");
            return;
        }
        Some(cc) if !cc.has_superclass => {
            p.error("cannot use keyword 'super' in a class without a superclass");
            return;
        }
        _ => {}
    }
    let mut name = None;
    let mut invoke_self = false;
    if !p.check(TokenKind::ParenOpen) {
        p.consume(TokenKind::Dot, "expected '.' or '(' after super");
        p.consume(TokenKind::Ident, "expected superclass method name after '.'");
        name = Some(p.ident_constant(p.previous));
    } else {
        invoke_self = true;
    }
    p.named_synthetic("this");
    if p.matches(TokenKind::ParenOpen) {
        let argc = p.call_args();
        p.named_synthetic("super");
        if invoke_self {
            p.emit_op(OpCode::SuperInvokeSelf);
            p.emit_byte(argc);
        } else {
            p.emit_op(OpCode::SuperInvoke);
            p.emit_short(name.unwrap_or(0));
            p.emit_byte(argc);
        }
    } else {
        p.named_synthetic("super");
        p.emit_op_short(OpCode::GetSuper, name.unwrap_or(0));
    }
}

fn rule_array(p: &mut Parser, _can_assign: bool) {
    let mut count: u16 = 0;
    if !p.check(TokenKind::BracketClose) {
        loop {
            // a trailing comma may end the list
            if p.check(TokenKind::BracketClose) {
                break;
            }
            p.expression();
            count += 1;
            if !p.matches(TokenKind::Comma) {
                break;
            }
        }
    }
    p.consume(TokenKind::BracketClose, "expected ']' at end of list");
    p.emit_op_short(OpCode::MakeArray, count);
}

fn rule_dictionary(p: &mut Parser, _can_assign: bool) {
    let mut count: u16 = 0;
    if !p.check(TokenKind::BraceClose) {
        loop {
            if p.check(TokenKind::BraceClose) {
                break;
            }
            let mut key_was_expression = false;
            if p.check(TokenKind::Ident) {
                p.consume(TokenKind::Ident, "");
                let key = p.string_of_token(p.previous);
                p.emit_constant(Constant::Str(Rc::from(key.as_str())));
            } else {
                p.expression();
                key_was_expression = true;
            }
            if !p.check(TokenKind::Comma) && !p.check(TokenKind::BraceClose) {
                p.consume(TokenKind::Colon, "expected ':' after dictionary key");
                p.expression();
            } else if key_was_expression {
                p.error("cannot infer dictionary values from expressions");
                return;
            } else {
                // `{ name }` shorthand pulls the variable of that name
                p.named_variable(p.previous, false);
            }
            count += 1;
            if !p.matches(TokenKind::Comma) {
                break;
            }
        }
    }
    p.consume(TokenKind::BraceClose, "expected '}' after dictionary");
    p.emit_op_short(OpCode::MakeDict, count);
}

fn rule_anon_func(p: &mut Parser, _can_assign: bool) {
    // an optional name is tolerated after `@`
    if p.check(TokenKind::Ident) {
        p.consume(TokenKind::Ident, "");
    }
    p.function_body("", FuncKind::Function);
}

fn rule_anon_class(p: &mut Parser, _can_assign: bool) {
    p.class_declaration(false);
}

fn rule_new(p: &mut Parser, can_assign: bool) {
    p.consume(TokenKind::Ident, "class name after 'new'");
    rule_variable(p, can_assign);
}

fn rule_typeof(p: &mut Parser, _can_assign: bool) {
    p.consume(TokenKind::ParenOpen, "expected '(' after 'typeof'");
    p.expression();
    p.consume(TokenKind::ParenClose, "expected ')' after 'typeof'");
    p.emit_op(OpCode::Typeof);
}

fn rule_import(p: &mut Parser, _can_assign: bool) {
    p.expression();
    p.emit_op(OpCode::Import);
}

// ---- infix rules ------------------------------------------------------

fn rule_binary(p: &mut Parser, _previous: Token, _can_assign: bool) {
    let op = p.previous.kind;
    let next = rule_for(op).prec.one_higher();
    p.parse_precedence(next);
    match op {
        TokenKind::Plus => p.emit_op(OpCode::Add),
        TokenKind::Minus => p.emit_op(OpCode::Subtract),
        TokenKind::Star => p.emit_op(OpCode::Multiply),
        TokenKind::Slash => p.emit_op(OpCode::Divide),
        TokenKind::Percent => p.emit_op(OpCode::Modulo),
        TokenKind::Pow => p.emit_op(OpCode::Pow),
        TokenKind::EqEq => p.emit_op(OpCode::Equal),
        TokenKind::BangEq => {
            p.emit_op(OpCode::Equal);
            p.emit_op(OpCode::Not);
        }
        TokenKind::Less => p.emit_op(OpCode::Less),
        TokenKind::LessEq => {
            p.emit_op(OpCode::Greater);
            p.emit_op(OpCode::Not);
        }
        TokenKind::Greater => p.emit_op(OpCode::Greater),
        TokenKind::GreaterEq => {
            p.emit_op(OpCode::Less);
            p.emit_op(OpCode::Not);
        }
        TokenKind::Shl => p.emit_op(OpCode::ShiftLeft),
        TokenKind::Shr => p.emit_op(OpCode::ShiftRight),
        TokenKind::Amp => p.emit_op(OpCode::BitAnd),
        TokenKind::Bar => p.emit_op(OpCode::BitOr),
        TokenKind::Caret => p.emit_op(OpCode::BitXor),
        TokenKind::DotDot => p.emit_op(OpCode::MakeRange),
        _ => {}
    }
}

fn rule_and(p: &mut Parser, _previous: Token, _can_assign: bool) {
    let end_jump = p.emit_jump(OpCode::JumpIfFalse);
    p.emit_op(OpCode::Pop);
    p.parse_precedence(Prec::And);
    p.patch_jump(end_jump);
}

fn rule_or(p: &mut Parser, _previous: Token, _can_assign: bool) {
    let else_jump = p.emit_jump(OpCode::JumpIfFalse);
    let end_jump = p.emit_jump(OpCode::Jump);
    p.patch_jump(else_jump);
    p.emit_op(OpCode::Pop);
    p.parse_precedence(Prec::Or);
    p.patch_jump(end_jump);
}

fn rule_conditional(p: &mut Parser, _previous: Token, _can_assign: bool) {
    let then_jump = p.emit_jump(OpCode::JumpIfFalse);
    p.emit_op(OpCode::Pop);
    p.parse_precedence(Prec::Conditional);
    let else_jump = p.emit_jump(OpCode::Jump);
    p.patch_jump(then_jump);
    p.emit_op(OpCode::Pop);
    p.consume(TokenKind::Colon, "expected matching ':' after '?' conditional");
    // parse at assignment precedence so conditionals nest to the right
    p.parse_precedence(Prec::Assignment);
    p.patch_jump(else_jump);
}

fn rule_instanceof(p: &mut Parser, _previous: Token, _can_assign: bool) {
    p.expression();
    p.emit_op(OpCode::InstanceOf);
}

fn rule_call(p: &mut Parser, _previous: Token, _can_assign: bool) {
    let argc = p.call_args();
    p.emit_op(OpCode::Call);
    p.emit_byte(argc);
}

fn rule_dot(p: &mut Parser, previous: Token, can_assign: bool) {
    if !p.consume(TokenKind::Ident, "expected property name after '.'") {
        return;
    }
    let name = p.ident_constant(p.previous);
    let on_self = p.is_self_receiver(previous);
    if p.matches(TokenKind::ParenOpen) {
        let argc = p.call_args();
        if on_self {
            p.emit_op(OpCode::InvokeThis);
        } else {
            p.emit_op(OpCode::Invoke);
        }
        p.emit_short(name);
        p.emit_byte(argc);
    } else {
        let get_op = if on_self {
            OpCode::PropertyGetSelf
        } else {
            OpCode::PropertyGet
        };
        p.assignment(get_op, OpCode::PropertySet, Some(name), can_assign);
    }
}

fn rule_indexing(p: &mut Parser, _previous: Token, can_assign: bool) {
    let mut assignable = true;
    let mut comma_matched = false;
    let mut get_op = OpCode::IndexGet;
    if p.matches(TokenKind::Comma) {
        // `a[, hi]` — lower bound defaults
        p.emit_op(OpCode::PushNull);
        comma_matched = true;
        get_op = OpCode::IndexGetRanged;
    } else {
        p.expression();
    }
    if !p.matches(TokenKind::BracketClose) {
        get_op = OpCode::IndexGetRanged;
        if !comma_matched {
            p.consume(TokenKind::Comma, "expecting ',' or ']'");
        }
        if p.matches(TokenKind::BracketClose) {
            p.emit_op(OpCode::PushNull);
        } else {
            p.expression();
            p.consume(TokenKind::BracketClose, "expected ']' after indexing");
        }
        assignable = false;
    } else if comma_matched {
        p.emit_op(OpCode::PushNull);
    }
    p.assignment(get_op, OpCode::IndexSet, None, can_assign && assignable);
}

impl<'src> Parser<'src> {
    /// `this.x` and `Name.x` inside the body of class `Name` go through
    /// the self-access opcodes.
    fn is_self_receiver(&self, previous: Token) -> bool {
        match self.class_compilers.last() {
            None => false,
            Some(cc) => {
                previous.kind == TokenKind::KwThis
                    || self.text(previous) == self.text(cc.name)
            }
        }
    }

    /// Resolve a compiler-synthesized name (`this`, `super`) as a plain
    /// variable read.
    pub(crate) fn named_synthetic(&mut self, name: &str) {
        let ci = self.compilers.len() - 1;
        if let Some(slot) = self.resolve_local(ci, name) {
            let (get_op, _) = self.local_ops(slot);
            self.emit_op(get_op);
            self.emit_short(slot);
        } else if let Some(upvalue) = self.resolve_upvalue(ci, name) {
            self.emit_op_short(OpCode::UpvalueGet, upvalue);
        } else {
            let idx = self.name_constant(name);
            self.emit_op_short(OpCode::GlobalGet, idx);
        }
    }

    /// The literal text of an identifier token as an owned string.
    pub(crate) fn string_of_token(&self, tok: Token) -> String {
        self.text(tok).to_string()
    }
}
