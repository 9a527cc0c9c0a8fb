//! Keyword table.
//!
//! A compile-time perfect-hash map; lookups are an exact-length check and
//! a byte compare, with no runtime table construction.
use phf::phf_map;
use veld_syntax::TokenKind;

pub static KEYWORDS: phf::Map<&'static str, TokenKind> = phf_map! {
    "and" => TokenKind::KwAnd,
    "as" => TokenKind::KwAs,
    "assert" => TokenKind::KwAssert,
    "break" => TokenKind::KwBreak,
    "case" => TokenKind::KwCase,
    "catch" => TokenKind::KwCatch,
    "class" => TokenKind::KwClass,
    "const" => TokenKind::KwConst,
    "continue" => TokenKind::KwContinue,
    "def" => TokenKind::KwFunction,
    "default" => TokenKind::KwDefault,
    "do" => TokenKind::KwDo,
    "echo" => TokenKind::KwEcho,
    "else" => TokenKind::KwElse,
    "empty" => TokenKind::KwEmpty,
    "extends" => TokenKind::KwExtends,
    "false" => TokenKind::KwFalse,
    "finally" => TokenKind::KwFinally,
    "for" => TokenKind::KwFor,
    "foreach" => TokenKind::KwForeach,
    "function" => TokenKind::KwFunction,
    "if" => TokenKind::KwIf,
    "import" => TokenKind::KwImport,
    "in" => TokenKind::KwIn,
    "instanceof" => TokenKind::KwInstanceOf,
    "let" => TokenKind::KwVar,
    "new" => TokenKind::KwNew,
    "nil" => TokenKind::KwNull,
    "null" => TokenKind::KwNull,
    "or" => TokenKind::KwOr,
    "return" => TokenKind::KwReturn,
    "static" => TokenKind::KwStatic,
    "super" => TokenKind::KwSuper,
    "switch" => TokenKind::KwSwitch,
    "this" => TokenKind::KwThis,
    "throw" => TokenKind::KwThrow,
    "true" => TokenKind::KwTrue,
    "try" => TokenKind::KwTry,
    "typeof" => TokenKind::KwTypeof,
    "var" => TokenKind::KwVar,
    "while" => TokenKind::KwWhile,
};
