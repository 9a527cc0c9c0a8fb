//! The compiler must reject garbage with diagnostics, never a panic.
use proptest::prelude::*;
use veld_compiler::compile;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]
    #[test]
    fn compile_never_panics_on_arbitrary_input(src in "[ -~\\n]{0,64}") {
        let _ = compile(&src, "<fuzz>");
    }

    #[test]
    fn compile_never_panics_on_token_soup(
        tokens in proptest::collection::vec(
            prop_oneof![
                Just("var"), Just("x"), Just("="), Just("1"), Just("{"),
                Just("}"), Just("("), Just(")"), Just("if"), Just("else"),
                Just("function"), Just("class"), Just("try"), Just("catch"),
                Just("switch"), Just("case"), Just(";"), Just(","), Just("+"),
                Just(".."), Just("\"s\""), Just("foreach"), Just("in"),
            ],
            0..24,
        )
    ) {
        let src = tokens.join(" ");
        let _ = compile(&src, "<fuzz>");
    }
}
