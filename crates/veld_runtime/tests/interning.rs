use veld_runtime::core::object::Array;
use veld_runtime::{Object, Runtime, Value};

#[test]
fn identical_content_interns_to_one_object() {
    let mut rt = Runtime::new();
    let a = rt.intern("hello world");
    let b = rt.intern("hello world");
    assert_eq!(a, b);
    let c = rt.intern("hello");
    assert_ne!(a, c);
}

#[test]
fn built_strings_intern_to_existing_object() {
    let mut rt = Runtime::new();
    let a = rt.intern("concat");
    let pieces = format!("con{}", "cat");
    let b = rt.intern(&pieces);
    assert_eq!(a, b);
}

#[test]
fn non_interned_strings_compare_by_bytes() {
    let mut rt = Runtime::new();
    let a = rt.new_string("same".to_string());
    let b = rt.new_string("same".to_string());
    assert_ne!(a, b, "plain allocation must not canonicalize");
    assert!(rt.values_equal(Value::Obj(a), Value::Obj(b)));
    let interned = rt.intern("same");
    assert!(rt.values_equal(Value::Obj(a), Value::Obj(interned)));
}

#[test]
fn intern_table_does_not_keep_strings_alive() {
    let mut rt = Runtime::new();
    let baseline = rt.heap().live_count();
    for i in 0..64 {
        rt.intern(&format!("transient-{i}"));
    }
    assert!(rt.heap().live_count() > baseline);
    rt.collect_garbage();
    // nothing roots the transients; the weak intern table let them die
    assert_eq!(rt.heap().live_count(), baseline);
    // and interning still works afterwards
    let again = rt.intern("transient-0");
    let twice = rt.intern("transient-0");
    assert_eq!(again, twice);
}

#[test]
fn script_level_equality_falls_back_to_bytes() {
    let mut rt = Runtime::new();
    rt.capture_output();
    rt.interpret("echo \"ab\" == \"a\" + \"b\";", "<test>")
        .expect("runs");
    assert_eq!(rt.take_output(), "true\n");
}

#[test]
fn unused_arrays_are_collectable() {
    let mut rt = Runtime::new();
    let baseline = rt.heap().live_count();
    for _ in 0..10 {
        rt.alloc(Object::Array(Array { items: Vec::new() }));
    }
    rt.collect_garbage();
    assert_eq!(rt.heap().live_count(), baseline);
}
