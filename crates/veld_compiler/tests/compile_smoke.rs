use veld_bytecode::{disassemble_blob, instruction_len, Blob, Constant, FuncProto, OpCode};
use veld_compiler::compile;

/// Walking a blob by `1 + instruction_len` must land on opcode slots
/// only and consume the stream exactly, nested functions included.
fn assert_round_trips(blob: &Blob) {
    let mut ip = 0;
    while ip < blob.code.len() {
        assert!(
            blob.code[ip].is_op,
            "offset {ip} is not an opcode boundary"
        );
        let op = OpCode::from_u8(blob.code[ip].code).expect("undecodable opcode");
        let len = instruction_len(blob, ip);
        for k in 1..=len {
            assert!(
                !blob.code[ip + k].is_op,
                "operand slot of {op:?} at {ip} marked as opcode"
            );
        }
        ip += 1 + len;
    }
    assert_eq!(ip, blob.code.len(), "instruction walk overran the blob");
    for constant in &blob.constants {
        if let Constant::Func(proto) = constant {
            assert_round_trips(&proto.blob);
        }
    }
}

fn compile_ok(src: &str) -> std::rc::Rc<FuncProto> {
    match compile(src, "<test>") {
        Ok(proto) => proto,
        Err(diags) => panic!("compile failed: {diags:?}"),
    }
}

/// Every opcode shape the compiler can emit shows up somewhere in this
/// program; the operand-length walk must stay in lockstep.
#[test]
fn operand_length_table_round_trips() {
    let src = r#"
        var g = 1;
        $g = g + 2 - 3 * 4 / 5 % 6 ** 2;
        var bits = (1 << 4) | (255 >> 2) & ~0x0f ^ 0b101;
        var cmp = 1 < 2 and 2 <= 3 or 3 > 2 and 3 >= 2 or 1 == 1 and 2 != 1;
        var t = true ? "yes" : "no";
        var arr = [1, 2, 3];
        arr[0] = arr[1] + arr[0, 2][0];
        var d = { a: 1, "b": 2 };
        d.a += 1;
        d.a++;
        var r = 1..10;
        function adder(x, y = 1, ...rest) {
            return x + y;
        }
        adder(1, 2, 3);
        var f = @(n) { return n; };
        class Animal {
            legs = 4;
            static kinds = 0;
            constructor(name) {
                this.name = name;
            }
            speak() {
                return "...";
            }
        }
        class Dog extends Animal {
            constructor(name) {
                super(name);
            }
            speak() {
                return super.speak() + "woof " + typeof(this);
            }
        }
        var pet = new Dog("rex");
        pet.speak();
        assert(pet instanceof Animal, "is animal");
        echo "total: ${1 + 1} ok";
        for (var i = 0; i < 3; i++) {
            if (i == 1) continue;
            if (i == 2) break;
        }
        while (false) { break; }
        do { var q = 1; } while (false)
        foreach (k, v in d) { echo v; }
        switch (g) {
            case 1, 2: echo "low";
            case "a": echo "str";
            case true: echo "bool";
            default: echo "other";
        }
        try {
            throw Exception("boom");
        } catch (Exception err) {
            echo err;
        } finally {
            echo "done";
        }
    "#;
    let proto = compile_ok(src);
    assert_round_trips(&proto.blob);
    // the disassembler consumes the same stream without panicking
    let text = disassemble_blob(&proto.blob, "<test>");
    assert!(text.contains("switch"));
    assert!(text.contains("trypush"));
}

#[test]
fn break_placeholders_are_rewritten() {
    let proto = compile_ok("while (true) { break; }");
    for (i, inst) in proto.blob.code.iter().enumerate() {
        if inst.is_op {
            assert_ne!(
                inst.code,
                OpCode::BreakPlaceholder as u8,
                "unpatched break placeholder at {i}"
            );
        }
    }
}

#[test]
fn nested_loop_breaks_target_their_own_loop() {
    let proto = compile_ok(
        "while (true) { while (true) { break; } break; }",
    );
    assert_round_trips(&proto.blob);
}

#[test]
fn switch_compiles_to_jump_table() {
    let proto = compile_ok(
        r#"switch (1) { case 1: echo "one"; case "a": echo "a"; default: echo "d"; }"#,
    );
    let sw = proto
        .blob
        .constants
        .iter()
        .find_map(|c| match c {
            Constant::Switch(sw) => Some(sw),
            _ => None,
        })
        .expect("switch table constant");
    assert_eq!(sw.cases.len(), 2);
    assert!(sw.default_offset.is_some());
}

#[test]
fn upvalue_resolution_chains_through_enclosing_functions() {
    let proto = compile_ok(
        r#"
        function outer() {
            var x = 1;
            function middle() {
                function inner() {
                    return x;
                }
                return inner;
            }
            return middle;
        }
        "#,
    );
    let outer = proto
        .blob
        .constants
        .iter()
        .find_map(|c| match c {
            Constant::Func(f) if f.name == "outer" => Some(f),
            _ => None,
        })
        .expect("outer proto");
    let middle = outer
        .blob
        .constants
        .iter()
        .find_map(|c| match c {
            Constant::Func(f) if f.name == "middle" => Some(f),
            _ => None,
        })
        .expect("middle proto");
    let inner = middle
        .blob
        .constants
        .iter()
        .find_map(|c| match c {
            Constant::Func(f) if f.name == "inner" => Some(f),
            _ => None,
        })
        .expect("inner proto");
    // middle captures outer's local; inner chains through middle's upvalue
    assert_eq!(middle.upvalues.len(), 1);
    assert!(middle.upvalues[0].is_local);
    assert_eq!(inner.upvalues.len(), 1);
    assert!(!inner.upvalues[0].is_local);
}

#[test]
fn errors_recover_and_report_independently() {
    let err = compile("var = 1; var ok = 2; fu nc; var x = ;", "<test>")
        .expect_err("should fail");
    assert!(err.len() >= 2, "expected several diagnostics, got {err:?}");
}

#[test]
fn compile_error_yields_no_proto() {
    assert!(compile("var 1 = 2;", "<test>").is_err());
}

#[test]
fn optional_parameters_fill_default_pool() {
    let proto = compile_ok("function f(a, b = 2, c = \"x\") { return a; }");
    let f = proto
        .blob
        .constants
        .iter()
        .find_map(|c| match c {
            Constant::Func(f) => Some(f),
            _ => None,
        })
        .expect("function proto");
    assert_eq!(f.blob.defaults.len(), 2);
    assert_eq!(f.arity, 3);
}

#[test]
fn variadic_flag_is_set() {
    let proto = compile_ok("function f(a, ...rest) { return a; }");
    let f = proto
        .blob
        .constants
        .iter()
        .find_map(|c| match c {
            Constant::Func(f) => Some(f),
            _ => None,
        })
        .expect("function proto");
    assert!(f.is_variadic);
    assert_eq!(f.arity, 2);
}
