//! The built-in exception hierarchy.
//!
//! `Exception` gets a constructor assembled instruction-by-instruction
//! (`constructor(message) { this.message = message }`); the error
//! subclasses inherit from it. Runtime failures become instances of
//! these classes and travel through the same propagation machinery as a
//! script-level `throw`.

use std::rc::Rc;

use veld_bytecode::{Constant, FuncKind, FuncProto, OpCode};

use crate::core::object::{Array, ClassObj, Closure, Instance, Object};
use crate::core::value::{ObjRef, Value};
use crate::error::{ExcKind, VeldError};
use crate::runtime::Runtime;

/// Handles to the installed exception classes.
pub struct ExceptionKinds {
    pub base: ObjRef,
    pub assert: ObjRef,
    pub syntax: ObjRef,
    pub io: ObjRef,
    pub os: ObjRef,
    pub argument: ObjRef,
}

impl ExceptionKinds {
    /// Pre-install placeholder; `install` replaces every handle.
    pub(crate) fn placeholder() -> ExceptionKinds {
        ExceptionKinds {
            base: ObjRef(0),
            assert: ObjRef(0),
            syntax: ObjRef(0),
            io: ObjRef(0),
            os: ObjRef(0),
            argument: ObjRef(0),
        }
    }

    pub fn class_for(&self, kind: ExcKind) -> ObjRef {
        match kind {
            ExcKind::Exception => self.base,
            ExcKind::Assert => self.assert,
            ExcKind::Syntax => self.syntax,
            ExcKind::Io => self.io,
            ExcKind::Os => self.os,
            ExcKind::Argument => self.argument,
        }
    }
}

/// Bytecode for `constructor(message) { this.message = message }`.
fn constructor_proto() -> Rc<FuncProto> {
    let mut proto = FuncProto::new("constructor", FuncKind::Initializer);
    proto.arity = 1;
    let blob = &mut proto.blob;
    let message = blob.add_constant(Constant::Str(Rc::from("message")));
    blob.push_op(OpCode::LocalGet, 0);
    blob.push_short(0, 0);
    blob.push_op(OpCode::LocalGet, 0);
    blob.push_short(1, 0);
    blob.push_op(OpCode::PropertySet, 0);
    blob.push_short(message, 0);
    blob.push_op(OpCode::Pop, 0);
    blob.push_op(OpCode::LocalGet, 0);
    blob.push_short(0, 0);
    blob.push_op(OpCode::Return, 0);
    Rc::new(proto)
}

fn make_class(rt: &mut Runtime, name: &str) -> ObjRef {
    let name_ref = rt.intern(name);
    rt.protect(Value::Obj(name_ref));
    let class = rt.alloc(Object::Class(ClassObj::new(name_ref)));
    rt.unprotect(1);
    class
}

/// Copy the superclass's instance-property defaults and methods into the
/// subclass tables (flattening), then link the superclass.
pub fn inherit_from(rt: &mut Runtime, subclass: ObjRef, superclass: ObjRef) {
    let (props, methods, ctor) = match rt.heap.get(superclass) {
        Object::Class(c) => (
            c.inst_properties.clone(),
            c.methods.clone(),
            c.constructor,
        ),
        _ => return,
    };
    if let Object::Class(sub) = rt.heap.get_mut(subclass) {
        props.copy_into(&mut sub.inst_properties);
        methods.copy_into(&mut sub.methods);
        if sub.constructor.is_null() {
            sub.constructor = ctor;
        }
        sub.superclass = Some(superclass);
    }
}

/// Superclass-chain walk behind `instanceof` and catch matching.
pub fn is_instance_of(rt: &Runtime, class: ObjRef, target: ObjRef) -> bool {
    let mut cursor = Some(class);
    while let Some(r) = cursor {
        if r == target {
            return true;
        }
        cursor = match rt.heap.get(r) {
            Object::Class(c) => c.superclass,
            _ => None,
        };
    }
    false
}

/// Install `Exception` and its subclasses as globals.
pub(crate) fn install(rt: &mut Runtime) {
    let base = make_class(rt, "Exception");
    rt.heap.pin(base);
    let ctor = constructor_proto();
    let closure = rt.alloc(Object::Closure(Closure {
        proto: ctor,
        upvalues: Vec::new(),
        module: rt.top_module,
    }));
    rt.protect(Value::Obj(closure));
    let ctor_key = rt.name_key("constructor");
    if let Object::Class(class) = rt.heap.get_mut(base) {
        class.constructor = Value::Obj(closure);
        class.methods.set_value(ctor_key, Value::Obj(closure));
    }
    rt.define_global("Exception", Value::Obj(base));
    rt.unprotect(1);

    let install_subclass = |rt: &mut Runtime, name: &str| -> ObjRef {
        let class = make_class(rt, name);
        rt.heap.pin(class);
        inherit_from(rt, class, base);
        rt.define_global(name, Value::Obj(class));
        class
    };
    let assert = install_subclass(rt, "AssertError");
    let syntax = install_subclass(rt, "SyntaxError");
    let io = install_subclass(rt, "IOError");
    let os = install_subclass(rt, "OSError");
    let argument = install_subclass(rt, "ArgumentError");
    rt.exceptions = ExceptionKinds {
        base,
        assert,
        syntax,
        io,
        os,
        argument,
    };
}

/// Build a ready-to-throw instance: seeded properties, message, source
/// position of the active instruction, and the captured stack trace.
pub(crate) fn make_instance(
    rt: &mut Runtime,
    kind: ExcKind,
    message: &str,
) -> Result<Value, VeldError> {
    let class = rt.exceptions.class_for(kind);
    let seeded = match rt.heap.get(class) {
        Object::Class(c) => c.inst_properties.clone(),
        _ => return Err(VeldError::runtime("exception class is corrupt")),
    };
    let instance = rt.alloc(Object::Instance(Instance {
        class,
        properties: seeded,
    }));
    rt.protect(Value::Obj(instance));
    let msg = rt.intern_value(message);
    let msg_key = rt.name_key("message");
    let (file, line) = rt.current_position();
    let file_val = rt.intern_value(&file);
    let file_key = rt.name_key("srcfile");
    let line_key = rt.name_key("srcline");
    if let Object::Instance(inst) = rt.heap.get_mut(instance) {
        inst.properties.set_value(msg_key, msg);
        inst.properties.set_value(file_key, file_val);
        inst.properties.set_value(line_key, Value::Num(line as f64));
    }
    attach_stack_trace(rt, instance);
    rt.unprotect(1);
    Ok(Value::Obj(instance))
}

/// Capture "from fn() in file:line" entries, innermost frame last,
/// bounded at 15 with a truncation marker.
pub(crate) fn attach_stack_trace(rt: &mut Runtime, instance: ObjRef) {
    let mut lines: Vec<String> = Vec::new();
    for (i, frame) in rt.frames.iter().enumerate() {
        let ip = frame.ip.saturating_sub(1);
        let line = frame.proto.blob.line_of(ip);
        let file = match rt.heap.get(frame.module) {
            Object::Module(m) => rt.heap.str_value(m.name).to_string(),
            _ => "(unknown)".to_string(),
        };
        let name = if frame.proto.name.is_empty() {
            "<script>"
        } else {
            frame.proto.name.as_str()
        };
        lines.push(format!("from {name}() in {file}:{line}"));
        if i >= 15 {
            lines.push("(only upper 15 entries shown)".to_string());
            break;
        }
    }
    let array = rt.alloc(Object::Array(Array { items: Vec::new() }));
    rt.protect(Value::Obj(array));
    for text in lines {
        let s = rt.new_string(text);
        if let Object::Array(arr) = rt.heap.get_mut(array) {
            arr.items.push(Value::Obj(s));
        }
    }
    let key = rt.name_key("stacktrace");
    if let Object::Instance(inst) = rt.heap.get_mut(instance) {
        inst.properties.set_value(key, Value::Obj(array));
    }
    rt.unprotect(1);
}
