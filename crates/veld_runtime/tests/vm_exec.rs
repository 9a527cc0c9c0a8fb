use veld_runtime::{ExecError, Runtime};

fn run(src: &str) -> String {
    let mut rt = Runtime::new();
    rt.capture_output();
    match rt.interpret(src, "<test>") {
        Ok(_) => rt.take_output(),
        Err(ExecError::Compile(diags)) => panic!("compile failed: {diags:?}"),
        Err(ExecError::Runtime(msg)) => panic!("runtime failed: {msg}\n{}", rt.take_output()),
    }
}

fn run_error(src: &str) -> String {
    let mut rt = Runtime::new();
    rt.capture_output();
    match rt.interpret(src, "<test>") {
        Ok(_) => panic!("expected a runtime failure"),
        Err(ExecError::Runtime(msg)) => msg,
        Err(ExecError::Compile(diags)) => panic!("compile failed: {diags:?}"),
    }
}

#[test]
fn arithmetic_and_precedence() {
    assert_eq!(run("echo 1 + 2 * 3;"), "7\n");
    assert_eq!(run("echo (1 + 2) * 3;"), "9\n");
    assert_eq!(run("echo 7 % 3;"), "1\n");
    assert_eq!(run("echo 2 ** 10;"), "1024\n");
    assert_eq!(run("echo 1 / 2;"), "0.5\n");
    assert_eq!(run("echo -(3);"), "-3\n");
}

#[test]
fn numeric_literal_bases() {
    assert_eq!(run("echo 0b1010;"), "10\n");
    assert_eq!(run("echo 0c777;"), "511\n");
    assert_eq!(run("echo 0xff;"), "255\n");
    assert_eq!(run("echo 1.5;"), "1.5\n");
}

#[test]
fn shift_amounts_are_masked_to_five_bits() {
    assert_eq!(run("echo 1 << 4;"), "16\n");
    // 33 & 0x1f == 1
    assert_eq!(run("echo 1 << 33;"), "2\n");
    assert_eq!(run("echo 256 >> 33;"), "128\n");
    assert_eq!(run("echo 6 & 3;"), "2\n");
    assert_eq!(run("echo 6 | 3;"), "7\n");
    assert_eq!(run("echo 6 ^ 3;"), "5\n");
}

#[test]
fn truthiness_rules() {
    assert_eq!(run("echo 1 ? \"t\" : \"f\";"), "t\n");
    assert_eq!(run("echo 0 ? \"t\" : \"f\";"), "t\n");
    assert_eq!(run("echo (0 - 1) ? \"t\" : \"f\";"), "f\n");
    assert_eq!(run("echo \"\" ? \"t\" : \"f\";"), "f\n");
    assert_eq!(run("echo null ? \"t\" : \"f\";"), "f\n");
    assert_eq!(run("echo false or \"x\";"), "x\n");
    assert_eq!(run("echo true and \"x\";"), "x\n");
}

#[test]
fn globals_and_locals() {
    assert_eq!(
        run("var x = 1; { var x = 2; echo x; } echo x;"),
        "2\n1\n"
    );
    assert_eq!(run("var a = 1, b = 2; echo a + b;"), "3\n");
    assert_eq!(run("var x = 1; x += 4; echo x;"), "5\n");
    assert_eq!(run("var x = 1; x++; echo x;"), "2\n");
    assert_eq!(run("var x = 1; $x = 9; echo x;"), "9\n");
}

#[test]
fn functions_and_returns() {
    assert_eq!(
        run("function add(a, b) { return a + b; } echo add(2, 3);"),
        "5\n"
    );
    assert_eq!(
        run("function nothing() {} echo nothing();"),
        "null\n"
    );
    assert_eq!(run("var f = @(n) { return n * 2; }; echo f(21);"), "42\n");
}

#[test]
fn optional_parameters_fill_defaults() {
    let src = r#"
        function greet(name, greeting = "hi") {
            return greeting + " " + name;
        }
        echo greet("bo");
        echo greet("bo", "yo");
    "#;
    assert_eq!(run(src), "hi bo\nyo bo\n");
}

#[test]
fn variadic_collects_trailing_arguments() {
    let src = r#"
        function sum(first, ...rest) {
            var total = first;
            foreach (v in rest) {
                total = total + v;
            }
            return total;
        }
        echo sum(1, 2, 3, 4);
        echo sum(5);
    "#;
    assert_eq!(run(src), "10\n5\n");
}

/// The classic counter test: a closure observes later mutations of a
/// captured local after the enclosing function has returned.
#[test]
fn closures_capture_by_reference() {
    let src = r#"
        function makeCounter() {
            var count = 0;
            function increment() {
                count = count + 1;
                return count;
            }
            return increment;
        }
        var counter = makeCounter();
        echo counter();
        echo counter();
        var other = makeCounter();
        echo other();
    "#;
    assert_eq!(run(src), "1\n2\n1\n");
}

#[test]
fn sibling_closures_share_one_upvalue() {
    let src = r#"
        function pair() {
            var value = 0;
            var get = @() { return value; };
            var set = @(n) { value = n; };
            set(41);
            return get() + 1;
        }
        echo pair();
    "#;
    assert_eq!(run(src), "42\n");
}

#[test]
fn loops_break_and_continue() {
    let src = r#"
        var out = "";
        for (var i = 0; i < 5; i++) {
            if (i == 1) continue;
            if (i == 3) break;
            out = out + i;
        }
        echo out;
    "#;
    assert_eq!(run(src), "02\n");
    assert_eq!(
        run("var n = 0; while (n < 3) { n++; } echo n;"),
        "3\n"
    );
    assert_eq!(
        run("var n = 0; do { n++; } while (n < 3) echo n;"),
        "3\n"
    );
}

#[test]
fn foreach_over_containers() {
    assert_eq!(
        run("var out = \"\"; foreach (v in [10, 20, 30]) { out = out + v + \",\"; } echo out;"),
        "10,20,30,\n"
    );
    assert_eq!(
        run("var out = \"\"; foreach (k, v in { a: 1, b: 2 }) { out = out + k + \"=\" + v + \";\"; } echo out;"),
        "a=1;b=2;\n"
    );
    assert_eq!(
        run("var out = \"\"; foreach (v in 0..4) { out = out + v; } echo out;"),
        "0123\n"
    );
    assert_eq!(
        run("var out = \"\"; foreach (c in \"abc\") { out = out + c + \".\"; } echo out;"),
        "a.b.c.\n"
    );
}

#[test]
fn arrays_index_and_grow_sparsely() {
    let src = r#"
        var a = [1, 2, 3];
        echo a[0];
        echo a[-1];
        a[5] = 9;
        echo a.length;
        echo a[3];
        echo a[5];
        echo a[1, 3];
    "#;
    assert_eq!(run(src), "1\n3\n6\nnull\n9\n[2, 3]\n");
}

#[test]
fn dictionaries_keep_insertion_order() {
    let src = r#"
        var d = { b: 2, a: 1 };
        d["c"] = 3;
        echo d.length;
        echo d["b"];
        echo d.a;
        echo d;
    "#;
    assert_eq!(run(src), "3\n2\n1\n{b: 2, a: 1, c: 3}\n");
}

#[test]
fn string_interpolation() {
    assert_eq!(run("var n = 2; echo \"n is ${n}!\";"), "n is 2!\n");
    assert_eq!(
        run("echo \"${1 + 1} and ${\"x\" + \"y\"}\";"),
        "2 and xy\n"
    );
    assert_eq!(run("echo 'raw ${1}';"), "raw ${1}\n");
}

#[test]
fn string_escapes() {
    assert_eq!(run(r#"echo "a\tb";"#), "a\tb\n");
    assert_eq!(run(r#"echo "q\"q";"#), "q\"q\n");
    assert_eq!(run(r#"echo "\x41";"#), "A\n");
    assert_eq!(run(r#"echo "A";"#), "A\n");
}

#[test]
fn classes_fields_methods_and_this() {
    let src = r#"
        class Point {
            x = 0;
            y = 0;
            constructor(x, y) {
                this.x = x;
                this.y = y;
            }
            sum() {
                return this.x + this.y;
            }
        }
        var p = new Point(3, 4);
        echo p.sum();
        echo p.x;
        p.x = 30;
        echo p.sum();
    "#;
    assert_eq!(run(src), "7\n3\n34\n");
}

#[test]
fn static_members() {
    let src = r#"
        class Counter {
            static total = 0;
            static bump() {
                Counter.total = Counter.total + 1;
                return Counter.total;
            }
        }
        echo Counter.bump();
        echo Counter.bump();
        echo Counter.total;
    "#;
    assert_eq!(run(src), "1\n2\n2\n");
}

/// Three levels of inheritance; `super.method()` picks the immediate
/// superclass even when overridden below.
#[test]
fn inheritance_resolves_through_three_levels() {
    let src = r#"
        class A {
            constructor() {
                this.tag = "A";
            }
            who() { return "A"; }
            base() { return "base"; }
        }
        class B extends A {
            who() { return "B(" + super.who() + ")"; }
        }
        class C extends B {
            who() { return "C(" + super.who() + ")"; }
        }
        var c = new C();
        echo c.who();
        echo c.base();
        echo c.tag;
        echo c instanceof A;
        echo c instanceof B;
    "#;
    assert_eq!(run(src), "C(B(A))\nbase\nA\ntrue\ntrue\n");
}

#[test]
fn super_constructor_invocation() {
    let src = r#"
        class Animal {
            constructor(name) {
                this.name = name;
            }
        }
        class Dog extends Animal {
            constructor(name) {
                super(name);
                this.kind = "dog";
            }
        }
        var d = new Dog("rex");
        echo d.name;
        echo d.kind;
    "#;
    assert_eq!(run(src), "rex\ndog\n");
}

#[test]
fn switch_dispatches_each_label_once() {
    let src = r#"
        function route(x) {
            switch (x) {
                case 1, 2: return "low";
                case "a": return "str";
                case true: return "bool";
                default: return "other";
            }
        }
        echo route(1);
        echo route(2);
        echo route("a");
        echo route(true);
        echo route(99);
    "#;
    assert_eq!(run(src), "low\nlow\nstr\nbool\nother\n");
}

#[test]
fn switch_without_default_falls_out() {
    let src = r#"
        switch (9) {
            case 1: echo "one";
        }
        echo "after";
    "#;
    assert_eq!(run(src), "after\n");
}

#[test]
fn try_catch_finally_each_run_once() {
    let src = r#"
        try {
            throw Exception("boom");
        } catch (Exception err) {
            echo "caught: " + err.message;
        } finally {
            echo "finally";
        }
        echo "after";
    "#;
    assert_eq!(run(src), "caught: boom\nfinally\nafter\n");
}

#[test]
fn finally_runs_on_the_normal_path() {
    let src = r#"
        try {
            echo "body";
        } finally {
            echo "finally";
        }
        echo "after";
    "#;
    assert_eq!(run(src), "body\nfinally\nafter\n");
}

#[test]
fn unmatched_catch_still_runs_finally_then_repropagates() {
    let src = r#"
        var log = "";
        try {
            try {
                throw ArgumentError("inner");
            } catch (IOError err) {
                log = log + "wrong ";
            } finally {
                log = log + "finally ";
            }
        } catch (ArgumentError err) {
            log = log + "outer:" + err.message;
        }
        echo log;
    "#;
    assert_eq!(run(src), "finally outer:inner\n");
}

#[test]
fn exceptions_unwind_across_call_frames() {
    let src = r#"
        function inner() {
            throw IOError("deep");
        }
        function middle() {
            inner();
        }
        try {
            middle();
        } catch (IOError err) {
            echo "got " + err.message;
        }
    "#;
    assert_eq!(run(src), "got deep\n");
}

#[test]
fn catch_matches_subclasses() {
    let src = r#"
        try {
            throw AssertError("sub");
        } catch (Exception err) {
            echo "base caught " + err.message;
        }
    "#;
    assert_eq!(run(src), "base caught sub\n");
}

#[test]
fn uncaught_exceptions_abort_with_trace() {
    let msg = run_error("function f() { throw Exception(\"bye\"); } f();");
    assert!(msg.contains("unhandled Exception"), "got: {msg}");
    assert!(msg.contains("bye"), "got: {msg}");
    assert!(msg.contains("stacktrace"), "got: {msg}");
    assert!(msg.contains("from f()"), "got: {msg}");
}

#[test]
fn assert_raises_assert_error() {
    let src = r#"
        try {
            assert(1 == 2, "math broke");
        } catch (AssertError err) {
            echo err.message;
        }
    "#;
    assert_eq!(run(src), "math broke\n");
    let msg = run_error("assert(false);");
    assert!(msg.contains("assertion failed"), "got: {msg}");
}

#[test]
fn runtime_errors_are_catchable_exceptions() {
    let src = r#"
        try {
            echo missing_global;
        } catch (Exception err) {
            echo "caught: " + err.message;
        }
    "#;
    assert_eq!(
        run(src),
        "caught: global name 'missing_global' is not defined\n"
    );
}

#[test]
fn typeof_reports_runtime_types() {
    assert_eq!(run("echo typeof(1);"), "number\n");
    assert_eq!(run("echo typeof(\"s\");"), "string\n");
    assert_eq!(run("echo typeof([1]);"), "array\n");
    assert_eq!(run("echo typeof(null);"), "null\n");
    assert_eq!(
        run("class T {} var t = new T(); echo typeof(t);"),
        "T\n"
    );
}

#[test]
fn ranges_construct_and_iterate() {
    assert_eq!(run("echo 1..4;"), "1..4\n");
    assert_eq!(run("echo (1..4).length;"), "3\n");
}

#[test]
fn native_functions_are_callable() {
    assert_eq!(run("println(\"a\", 1);"), "a 1\n");
    let out = run("var before = gc(); echo typeof(before);");
    assert_eq!(out, "number\n");
}

#[test]
fn builtin_module_import() {
    let src = r#"
        var os = import "os";
        echo typeof(os.time());
    "#;
    assert_eq!(run(src), "number\n");
}

#[test]
fn strict_mode_rejects_undeclared_assignment() {
    let mut rt = Runtime::with_config(veld_runtime::Config {
        strict_globals: true,
        ..veld_runtime::Config::default()
    });
    rt.capture_output();
    let err = rt
        .interpret("nope = 1;", "<test>")
        .expect_err("strict mode rejects");
    match err {
        ExecError::Runtime(msg) => assert!(msg.contains("was not declared"), "got: {msg}"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn nested_function_state_machine_reenters() {
    // a native (gc) runs while script frames are live, and script calls
    // nest several frames deep
    let src = r#"
        function fib(n) {
            if (n < 2) return n;
            return fib(n - 1) + fib(n - 2);
        }
        echo fib(12);
    "#;
    assert_eq!(run(src), "144\n");
}
