//! veld_compiler: single-pass compiler.
//!
//! Consumes tokens straight from the lexer and emits bytecode into the
//! blob of the function being compiled; there is no intermediate tree.
//! Entry point: [`compile`].
mod compiler;
mod expr;
mod stmt;

use std::rc::Rc;

use veld_bytecode::FuncProto;
use veld_syntax::Diagnostic;

pub use compiler::CompileOptions;

/// Compile a source file into its top-level function proto.
///
/// On any compile error the whole unit is rejected; the diagnostics list
/// carries every independently recovered error.
pub fn compile(source: &str, name: &str) -> Result<Rc<FuncProto>, Vec<Diagnostic>> {
    compile_with(source, name, CompileOptions::default())
}

/// Compile with explicit options (REPL echo mode).
pub fn compile_with(
    source: &str,
    name: &str,
    options: CompileOptions,
) -> Result<Rc<FuncProto>, Vec<Diagnostic>> {
    compiler::Parser::compile_source(source, name, options)
}
