use veld_lexer::Lexer;
use veld_syntax::TokenKind;

fn kinds(src: &str) -> Vec<TokenKind> {
    let mut lexer = Lexer::new(src);
    let mut out = Vec::new();
    loop {
        let tok = lexer.scan_token();
        let done = tok.kind == TokenKind::Eof;
        out.push(tok.kind);
        if done {
            break;
        }
    }
    out
}

#[test]
fn scans_punctuation_and_keywords() {
    let got = kinds("var x = 1 + 2;");
    assert_eq!(
        got,
        vec![
            TokenKind::KwVar,
            TokenKind::Ident,
            TokenKind::Assign,
            TokenKind::Number,
            TokenKind::Plus,
            TokenKind::Number,
            TokenKind::Semicolon,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn keyword_aliases_resolve() {
    assert_eq!(kinds("let")[0], TokenKind::KwVar);
    assert_eq!(kinds("def")[0], TokenKind::KwFunction);
    assert_eq!(kinds("nil")[0], TokenKind::KwNull);
}

#[test]
fn numeric_prefixes() {
    assert_eq!(kinds("0b1010")[0], TokenKind::BinNumber);
    assert_eq!(kinds("0c777")[0], TokenKind::OctNumber);
    assert_eq!(kinds("0xff")[0], TokenKind::HexNumber);
    assert_eq!(kinds("3.25")[0], TokenKind::Number);
}

#[test]
fn dot_is_not_part_of_trailing_number() {
    // `1.` is Number then Dot
    let got = kinds("1.foo");
    assert_eq!(
        got,
        vec![
            TokenKind::Number,
            TokenKind::Dot,
            TokenKind::Ident,
            TokenKind::Eof
        ]
    );
}

#[test]
fn compound_operators() {
    let got = kinds("a += b <<= c ** d");
    assert_eq!(
        got,
        vec![
            TokenKind::Ident,
            TokenKind::PlusAssign,
            TokenKind::Ident,
            TokenKind::ShlAssign,
            TokenKind::Ident,
            TokenKind::Pow,
            TokenKind::Ident,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn global_sigil_marks_token() {
    let mut lexer = Lexer::new("$counter");
    let tok = lexer.scan_token();
    assert_eq!(tok.kind, TokenKind::Ident);
    assert!(tok.is_global);
}

#[test]
fn strings_and_raw_strings() {
    assert_eq!(kinds("\"hi\"")[0], TokenKind::Str);
    assert_eq!(kinds("'hi'")[0], TokenKind::RawStr);
}

#[test]
fn interpolation_splits_string() {
    let got = kinds("\"a ${x} b\"");
    assert_eq!(
        got,
        vec![
            TokenKind::Interpolation,
            TokenKind::Ident,
            TokenKind::Str,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn nested_interpolation() {
    let got = kinds("\"x ${ \"y ${z} w\" } v\"");
    assert!(got.contains(&TokenKind::Interpolation));
    assert_eq!(*got.last().unwrap(), TokenKind::Eof);
    assert_eq!(got.iter().filter(|k| **k == TokenKind::Error).count(), 0);
}

#[test]
fn unterminated_string_is_error_token() {
    let mut lexer = Lexer::new("\"oops");
    let tok = lexer.scan_token();
    assert_eq!(tok.kind, TokenKind::Error);
    assert!(!lexer.diagnostics.is_empty());
}

#[test]
fn unterminated_block_comment_is_error_token() {
    let mut lexer = Lexer::new("/* nope");
    let tok = lexer.scan_token();
    assert_eq!(tok.kind, TokenKind::Error);
}

#[test]
fn block_comments_nest() {
    let got = kinds("/* a /* b */ c */ 1");
    assert_eq!(got, vec![TokenKind::Number, TokenKind::Eof]);
}

#[test]
fn line_numbers_advance() {
    let mut lexer = Lexer::new("1\n2\n3");
    assert_eq!(lexer.scan_token().line, 1);
    assert_eq!(lexer.scan_token().line, 2);
    assert_eq!(lexer.scan_token().line, 3);
}
