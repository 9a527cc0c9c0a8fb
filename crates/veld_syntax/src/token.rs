//! Token definitions.
//!
//! Every token of the Veld language: delimiters, operators (plain and
//! compound-assignment forms), keywords, literals and the interpolation
//! marker emitted inside template strings.
use crate::Span;

/// Token kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `(`
    ParenOpen,
    /// `)`
    ParenClose,
    /// `[`
    BracketOpen,
    /// `]`
    BracketClose,
    /// `{`
    BraceOpen,
    /// `}`
    BraceClose,
    /// `;`
    Semicolon,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `@` — starts an anonymous function
    At,
    /// `.`
    Dot,
    /// `..` — range constructor
    DotDot,
    /// `...` — variadic parameter marker
    Ellipsis,
    /// `?`
    Question,

    /// `!`
    Bang,
    /// `!=`
    BangEq,
    /// `=`
    Assign,
    /// `==`
    EqEq,
    /// `+`
    Plus,
    /// `+=`
    PlusAssign,
    /// `++`
    Increment,
    /// `-`
    Minus,
    /// `-=`
    MinusAssign,
    /// `--`
    Decrement,
    /// `*`
    Star,
    /// `*=`
    StarAssign,
    /// `**`
    Pow,
    /// `**=`
    PowAssign,
    /// `/`
    Slash,
    /// `/=`
    SlashAssign,
    /// `%`
    Percent,
    /// `%=`
    PercentAssign,
    /// `&`
    Amp,
    /// `&=`
    AmpAssign,
    /// `|`
    Bar,
    /// `|=`
    BarAssign,
    /// `~`
    Tilde,
    /// `~=`
    TildeAssign,
    /// `^`
    Caret,
    /// `^=`
    CaretAssign,
    /// `<`
    Less,
    /// `<=`
    LessEq,
    /// `<<`
    Shl,
    /// `<<=`
    ShlAssign,
    /// `>`
    Greater,
    /// `>=`
    GreaterEq,
    /// `>>`
    Shr,
    /// `>>=`
    ShrAssign,

    // keywords
    KwAnd,
    KwAs,
    KwAssert,
    KwBreak,
    KwCase,
    KwCatch,
    KwClass,
    KwConst,
    KwContinue,
    KwDefault,
    KwDo,
    KwEcho,
    KwElse,
    KwEmpty,
    KwExtends,
    KwFalse,
    KwFinally,
    KwFor,
    KwForeach,
    KwFunction,
    KwIf,
    KwImport,
    KwIn,
    KwInstanceOf,
    KwNew,
    KwNull,
    KwOr,
    KwReturn,
    KwStatic,
    KwSuper,
    KwSwitch,
    KwThis,
    KwThrow,
    KwTrue,
    KwTry,
    KwTypeof,
    KwVar,
    KwWhile,

    /// String literal (escapes are processed by the compiler).
    Str,
    /// Raw string literal (single-quoted; escapes kept verbatim).
    RawStr,
    /// Decimal number literal.
    Number,
    /// `0b...`
    BinNumber,
    /// `0c...`
    OctNumber,
    /// `0x...`
    HexNumber,
    /// Identifier (the `is_global` flag on the token marks a `$` sigil).
    Ident,
    /// The string piece before a `${` in an interpolated string.
    Interpolation,

    /// Lexer error; the diagnostic carries the message.
    Error,
    Eof,
}

impl TokenKind {
    /// Compound-assignment operators hand the underlying binary op to the
    /// compiler's read-modify-write emission.
    pub fn is_assign_op(self) -> bool {
        matches!(
            self,
            TokenKind::PlusAssign
                | TokenKind::MinusAssign
                | TokenKind::StarAssign
                | TokenKind::SlashAssign
                | TokenKind::PowAssign
                | TokenKind::PercentAssign
                | TokenKind::AmpAssign
                | TokenKind::BarAssign
                | TokenKind::TildeAssign
                | TokenKind::CaretAssign
                | TokenKind::ShlAssign
                | TokenKind::ShrAssign
        )
    }
}

/// A single token. `line` is 1-based; `is_global` is set on `$name`
/// identifiers which always resolve to globals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub line: u32,
    pub is_global: bool,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span, line: u32) -> Self {
        Self {
            kind,
            span,
            line,
            is_global: false,
        }
    }

    /// Synthetic token pointing at nothing; used by the compiler for
    /// `this`/`super` and hidden loop variables.
    pub fn synthetic(kind: TokenKind) -> Self {
        Self {
            kind,
            span: Span::default(),
            line: 0,
            is_global: false,
        }
    }
}
