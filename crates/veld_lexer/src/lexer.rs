//! Lexer implementation.
//!
//! Scans source text into tokens on demand. `scan_token` always returns a
//! token: malformed input produces an `Error` token plus a diagnostic,
//! never a panic or an early stop.
//!
//! Interpolated strings keep a bounded stack of the quotes that opened
//! each `${`; the matching `}` resumes string scanning with the
//! remembered quote.
use crate::keywords::KEYWORDS;
use veld_syntax::{is_digit, is_ident_continue, is_ident_start, Diagnostic, Span, Token, TokenKind};

/// Maximum nesting depth of `${ ... }` interpolations.
pub const MAX_INTERP_DEPTH: usize = 8;

/// Veld lexer.
pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    start: usize,
    i: usize,
    line: u32,
    interp_quotes: [u8; MAX_INTERP_DEPTH],
    interp_depth: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer over `input`.
    pub fn new(input: &'a str) -> Self {
        Self {
            src: input,
            bytes: input.as_bytes(),
            start: 0,
            i: 0,
            line: 1,
            interp_quotes: [0; MAX_INTERP_DEPTH],
            interp_depth: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn source(&self) -> &'a str {
        self.src
    }

    pub fn is_at_end(&self) -> bool {
        self.i >= self.bytes.len()
    }

    fn peek(&self) -> u8 {
        if self.i < self.bytes.len() {
            self.bytes[self.i]
        } else {
            0
        }
    }

    fn peek_next(&self) -> u8 {
        if self.i + 1 < self.bytes.len() {
            self.bytes[self.i + 1]
        } else {
            0
        }
    }

    fn peek_prev(&self) -> u8 {
        if self.i == 0 {
            0
        } else {
            self.bytes[self.i - 1]
        }
    }

    fn advance(&mut self) -> u8 {
        let c = self.bytes[self.i];
        self.i += 1;
        if c == b'\n' {
            self.line += 1;
        }
        c
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.bytes[self.i] != expected {
            return false;
        }
        self.i += 1;
        if expected == b'\n' {
            self.line += 1;
        }
        true
    }

    fn make(&self, kind: TokenKind) -> Token {
        Token::new(kind, Span::new(self.start as u32, self.i as u32), self.line)
    }

    fn error_token(&mut self, message: impl Into<String>) -> Token {
        let tok = self.make(TokenKind::Error);
        self.diagnostics
            .push(Diagnostic::error(message, Some(tok.span), self.line));
        tok
    }

    /// Skip whitespace and comments. Returns an error token for an
    /// unterminated block comment.
    fn skip_space(&mut self) -> Option<Token> {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' | b'\n' => {
                    self.advance();
                }
                b'/' => {
                    if self.peek_next() == b'/' {
                        while !self.is_at_end() && self.peek() != b'\n' {
                            self.advance();
                        }
                    } else if self.peek_next() == b'*' {
                        self.advance();
                        self.advance();
                        if let Some(err) = self.skip_block_comment() {
                            return Some(err);
                        }
                    } else {
                        return None;
                    }
                }
                _ => return None,
            }
        }
    }

    /// Block comments nest.
    fn skip_block_comment(&mut self) -> Option<Token> {
        let mut nesting = 1;
        while nesting > 0 {
            if self.is_at_end() {
                return Some(self.error_token("unclosed block comment"));
            }
            if self.peek() == b'/' && self.peek_next() == b'*' {
                self.advance();
                self.advance();
                nesting += 1;
                continue;
            }
            if self.peek() == b'*' && self.peek_next() == b'/' {
                self.advance();
                self.advance();
                nesting -= 1;
                continue;
            }
            self.advance();
        }
        None
    }

    /// Scan the next token. Total: always yields a token, `Eof` at the
    /// end of input.
    pub fn scan_token(&mut self) -> Token {
        if let Some(err) = self.skip_space() {
            return err;
        }
        self.start = self.i;
        if self.is_at_end() {
            return self.make(TokenKind::Eof);
        }
        let c = self.advance();
        if is_digit(c) {
            return self.scan_number();
        }
        if is_ident_start(c) || c == b'$' {
            return self.scan_ident(c == b'$');
        }
        match c {
            b'(' => self.make(TokenKind::ParenOpen),
            b')' => self.make(TokenKind::ParenClose),
            b'[' => self.make(TokenKind::BracketOpen),
            b']' => self.make(TokenKind::BracketClose),
            b'{' => self.make(TokenKind::BraceOpen),
            b'}' => {
                if self.interp_depth > 0 {
                    // closing an interpolation: resume the string
                    let quote = self.interp_quotes[self.interp_depth - 1];
                    self.interp_depth -= 1;
                    return self.scan_string(quote, true);
                }
                self.make(TokenKind::BraceClose)
            }
            b';' => self.make(TokenKind::Semicolon),
            b',' => self.make(TokenKind::Comma),
            b':' => self.make(TokenKind::Colon),
            b'@' => self.make(TokenKind::At),
            b'?' => self.make(TokenKind::Question),
            b'.' => {
                if self.matches(b'.') {
                    if self.matches(b'.') {
                        self.make(TokenKind::Ellipsis)
                    } else {
                        self.make(TokenKind::DotDot)
                    }
                } else {
                    self.make(TokenKind::Dot)
                }
            }
            b'!' => {
                if self.matches(b'=') {
                    self.make(TokenKind::BangEq)
                } else {
                    self.make(TokenKind::Bang)
                }
            }
            b'=' => {
                if self.matches(b'=') {
                    self.make(TokenKind::EqEq)
                } else {
                    self.make(TokenKind::Assign)
                }
            }
            b'+' => {
                if self.matches(b'=') {
                    self.make(TokenKind::PlusAssign)
                } else if self.matches(b'+') {
                    self.make(TokenKind::Increment)
                } else {
                    self.make(TokenKind::Plus)
                }
            }
            b'-' => {
                if self.matches(b'=') {
                    self.make(TokenKind::MinusAssign)
                } else if self.matches(b'-') {
                    self.make(TokenKind::Decrement)
                } else {
                    self.make(TokenKind::Minus)
                }
            }
            b'*' => {
                if self.matches(b'*') {
                    if self.matches(b'=') {
                        self.make(TokenKind::PowAssign)
                    } else {
                        self.make(TokenKind::Pow)
                    }
                } else if self.matches(b'=') {
                    self.make(TokenKind::StarAssign)
                } else {
                    self.make(TokenKind::Star)
                }
            }
            b'/' => {
                if self.matches(b'=') {
                    self.make(TokenKind::SlashAssign)
                } else {
                    self.make(TokenKind::Slash)
                }
            }
            b'%' => {
                if self.matches(b'=') {
                    self.make(TokenKind::PercentAssign)
                } else {
                    self.make(TokenKind::Percent)
                }
            }
            b'&' => {
                if self.matches(b'=') {
                    self.make(TokenKind::AmpAssign)
                } else {
                    self.make(TokenKind::Amp)
                }
            }
            b'|' => {
                if self.matches(b'=') {
                    self.make(TokenKind::BarAssign)
                } else {
                    self.make(TokenKind::Bar)
                }
            }
            b'~' => {
                if self.matches(b'=') {
                    self.make(TokenKind::TildeAssign)
                } else {
                    self.make(TokenKind::Tilde)
                }
            }
            b'^' => {
                if self.matches(b'=') {
                    self.make(TokenKind::CaretAssign)
                } else {
                    self.make(TokenKind::Caret)
                }
            }
            b'<' => {
                if self.matches(b'=') {
                    self.make(TokenKind::LessEq)
                } else if self.matches(b'<') {
                    if self.matches(b'=') {
                        self.make(TokenKind::ShlAssign)
                    } else {
                        self.make(TokenKind::Shl)
                    }
                } else {
                    self.make(TokenKind::Less)
                }
            }
            b'>' => {
                if self.matches(b'=') {
                    self.make(TokenKind::GreaterEq)
                } else if self.matches(b'>') {
                    if self.matches(b'=') {
                        self.make(TokenKind::ShrAssign)
                    } else {
                        self.make(TokenKind::Shr)
                    }
                } else {
                    self.make(TokenKind::Greater)
                }
            }
            b'"' => self.scan_string(b'"', true),
            b'\'' => self.scan_string(b'\'', false),
            _ => self.error_token(format!("unexpected character '{}'", c as char)),
        }
    }

    /// Scan a string body. `quote` is the terminating quote;
    /// interpolation (`${`) is only recognized in double-quoted strings.
    fn scan_string(&mut self, quote: u8, with_interp: bool) -> Token {
        while !self.is_at_end() && self.peek() != quote {
            if with_interp
                && self.peek() == b'$'
                && self.peek_next() == b'{'
                && self.peek_prev() != b'\\'
            {
                if self.interp_depth >= MAX_INTERP_DEPTH {
                    return self.error_token(format!(
                        "maximum interpolation nesting of {} exceeded",
                        MAX_INTERP_DEPTH
                    ));
                }
                self.interp_quotes[self.interp_depth] = quote;
                self.interp_depth += 1;
                self.i += 1;
                let tok = self.make(TokenKind::Interpolation);
                self.i += 1;
                return tok;
            }
            // a backslash escapes the quote and itself; everything else
            // is resolved later by the compiler
            if self.peek() == b'\\' && (self.peek_next() == quote || self.peek_next() == b'\\') {
                self.advance();
            }
            self.advance();
        }
        if self.is_at_end() {
            return self.error_token("unterminated string (opening quote not matched)");
        }
        self.matches(quote);
        if quote == b'\'' {
            self.make(TokenKind::RawStr)
        } else {
            self.make(TokenKind::Str)
        }
    }

    /// Scan a numeric literal; `0b`/`0c`/`0x` prefixes are sniffed first.
    fn scan_number(&mut self) -> Token {
        if self.peek_prev() == b'0' {
            if self.matches(b'b') {
                while matches!(self.peek(), b'0' | b'1') {
                    self.advance();
                }
                return self.make(TokenKind::BinNumber);
            } else if self.matches(b'c') {
                while matches!(self.peek(), b'0'..=b'7') {
                    self.advance();
                }
                return self.make(TokenKind::OctNumber);
            } else if self.matches(b'x') {
                while self.peek().is_ascii_hexdigit() {
                    self.advance();
                }
                return self.make(TokenKind::HexNumber);
            }
        }
        while is_digit(self.peek()) {
            self.advance();
        }
        // a dot is only part of the number when followed by a digit
        if self.peek() == b'.' && is_digit(self.peek_next()) {
            self.advance();
            while is_digit(self.peek()) {
                self.advance();
            }
            // exponent requires an explicit sign
            if matches!(self.peek(), b'e' | b'E') && matches!(self.peek_next(), b'+' | b'-') {
                self.advance();
                self.advance();
                while is_digit(self.peek()) {
                    self.advance();
                }
            }
        }
        self.make(TokenKind::Number)
    }

    fn scan_ident(&mut self, is_global: bool) -> Token {
        while is_ident_continue(self.peek()) {
            self.advance();
        }
        // the `$` stays part of the text, so `$if` is an identifier, not
        // a keyword; the compiler strips the sigil from the name
        let text = &self.src[self.start..self.i];
        let kind = KEYWORDS.get(text).copied().unwrap_or(TokenKind::Ident);
        let mut tok = self.make(kind);
        tok.is_global = is_global;
        tok
    }
}
