use veld_runtime::core::object::Array;
use veld_runtime::{Config, Object, Runtime, Value};

fn garbage(rt: &mut Runtime, n: usize) {
    for _ in 0..n {
        rt.alloc(Object::Array(Array {
            items: vec![Value::Num(1.0)],
        }));
    }
}

#[test]
fn collection_reclaims_unreachable_objects() {
    let mut rt = Runtime::new();
    let baseline = rt.heap().live_count();
    garbage(&mut rt, 100);
    assert!(rt.heap().live_count() >= baseline + 100);
    rt.collect_garbage();
    assert_eq!(rt.heap().live_count(), baseline);
}

#[test]
fn protected_objects_survive_collection() {
    let mut rt = Runtime::new();
    let baseline = rt.heap().live_count();
    let keep = rt.alloc(Object::Array(Array {
        items: vec![Value::Num(7.0)],
    }));
    rt.protect(Value::Obj(keep));
    garbage(&mut rt, 50);
    rt.collect_garbage();
    assert_eq!(rt.heap().live_count(), baseline + 1);
    // still accessible and intact
    match rt.heap().get(keep) {
        Object::Array(a) => assert_eq!(a.items, vec![Value::Num(7.0)]),
        _ => panic!("protected object lost its identity"),
    }
    rt.unprotect(1);
    rt.collect_garbage();
    assert_eq!(rt.heap().live_count(), baseline);
}

#[test]
fn reachability_through_containers_is_traced() {
    let mut rt = Runtime::new();
    let baseline = rt.heap().live_count();
    let inner = rt.alloc(Object::Array(Array {
        items: vec![Value::Num(1.0)],
    }));
    rt.protect(Value::Obj(inner));
    let outer = rt.alloc(Object::Array(Array {
        items: vec![Value::Obj(inner)],
    }));
    rt.unprotect(1);
    rt.protect(Value::Obj(outer));
    garbage(&mut rt, 20);
    rt.collect_garbage();
    // outer plus the inner it references
    assert_eq!(rt.heap().live_count(), baseline + 2);
    rt.unprotect(1);
    rt.collect_garbage();
    assert_eq!(rt.heap().live_count(), baseline);
}

#[test]
fn pinned_objects_never_collect() {
    let mut rt = Runtime::new();
    let baseline = rt.heap().live_count();
    let pinned = rt.alloc(Object::Array(Array { items: Vec::new() }));
    rt.heap_mut().pin(pinned);
    rt.collect_garbage();
    assert_eq!(rt.heap().live_count(), baseline + 1);
    rt.heap_mut().unpin(pinned);
    rt.collect_garbage();
    assert_eq!(rt.heap().live_count(), baseline);
}

#[test]
fn zero_threshold_disables_automatic_collection() {
    let mut rt = Runtime::with_config(Config {
        gc_start: 0,
        ..Config::default()
    });
    let baseline = rt.heap().live_count();
    garbage(&mut rt, 200);
    // no automatic sweep happened along the way
    assert!(rt.heap().live_count() >= baseline + 200);
    rt.collect_garbage();
    assert_eq!(rt.heap().live_count(), baseline);
}

/// Allocation pressure inside a running script must never free values
/// the program still sees.
#[test]
fn stress_collection_during_execution() {
    let mut rt = Runtime::with_config(Config {
        gc_start: 512,
        ..Config::default()
    });
    rt.capture_output();
    rt.interpret(
        r#"
        var s = "";
        for (var i = 0; i < 60; i++) {
            s = s + "x";
        }
        echo s.length;
        var keep = [];
        for (var i = 0; i < 40; i++) {
            keep[i] = "item " + i;
        }
        echo keep.length;
        echo keep[39];
        "#,
        "<stress>",
    )
    .expect("script runs to completion");
    assert_eq!(rt.take_output(), "60\n40\nitem 39\n");
}
