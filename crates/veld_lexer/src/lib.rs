//! veld_lexer: lexer crate.
//!
//! Tokenizes source text on demand; the compiler pulls one token at a
//! time. Entry point: `Lexer::new(input)` then `scan_token()` in a loop.
mod keywords;
mod lexer;

pub use lexer::Lexer;
