//! Property tests: the lexer is total — any input terminates and every
//! byte position is visited at most a bounded number of times.
use proptest::prelude::*;
use veld_lexer::Lexer;
use veld_syntax::TokenKind;

proptest! {
    #[test]
    fn lexer_terminates_on_arbitrary_input(src in ".{0,256}") {
        let mut lexer = Lexer::new(&src);
        let mut count = 0usize;
        loop {
            let tok = lexer.scan_token();
            if tok.kind == TokenKind::Eof {
                break;
            }
            count += 1;
            // every token consumes at least one byte
            prop_assert!(count <= src.len() + 1);
        }
    }

    #[test]
    fn spans_are_in_bounds(src in "[ -~]{0,128}") {
        let mut lexer = Lexer::new(&src);
        loop {
            let tok = lexer.scan_token();
            prop_assert!(tok.span.end.0 as usize <= src.len());
            prop_assert!(tok.span.start.0 <= tok.span.end.0);
            if tok.kind == TokenKind::Eof {
                break;
            }
        }
    }
}
