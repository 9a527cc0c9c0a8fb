//! Call protocol: closures, natives, constructors, bound methods and
//! method invocation.

use std::rc::Rc;

use smallvec::SmallVec;

use veld_bytecode::FuncKind;

use crate::core::object::{Array, BoundMethod, Instance, Object, Upvalue};
use crate::core::value::{ObjRef, Value};
use crate::error::VeldError;
use crate::exceptions::is_instance_of;
use crate::runtime::{Arguments, CallFrame, Runtime, MAX_FRAMES};

impl Runtime {
    pub(crate) fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow")
    }

    /// Call whatever sits below `argc` arguments on the stack.
    pub(crate) fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), VeldError> {
        if let Value::Obj(r) = callee {
            match self.heap.get(r) {
                Object::Closure(_) => return self.call_closure(r, argc),
                Object::Native(_) => return self.call_native(r, Value::Null, argc),
                Object::Class(_) => return self.construct(r, argc),
                Object::Bound(bound) => {
                    let receiver = bound.receiver;
                    let method = bound.method;
                    let base = self.stack.len() - argc - 1;
                    self.stack[base] = receiver;
                    return self.call_field(Value::Obj(method), receiver, argc);
                }
                Object::Module(_) => {
                    return Err(VeldError::runtime("module objects are not callable"))
                }
                _ => {}
            }
        }
        Err(VeldError::runtime(format!(
            "object of type {} is not callable",
            self.type_name(callee)
        )))
    }

    /// Call a looked-up member value whose receiver already occupies the
    /// callee slot.
    pub(crate) fn call_field(
        &mut self,
        value: Value,
        receiver: Value,
        argc: usize,
    ) -> Result<(), VeldError> {
        match value {
            Value::Obj(r) => match self.heap.get(r) {
                Object::Closure(_) => self.call_closure(r, argc),
                Object::Native(_) => self.call_native(r, receiver, argc),
                Object::Bound(bound) => {
                    let receiver = bound.receiver;
                    let method = bound.method;
                    let base = self.stack.len() - argc - 1;
                    self.stack[base] = receiver;
                    self.call_field(Value::Obj(method), receiver, argc)
                }
                Object::Class(_) => self.construct(r, argc),
                _ => Err(VeldError::runtime(format!(
                    "object of type {} is not callable",
                    self.type_name(value)
                ))),
            },
            _ => Err(VeldError::runtime(format!(
                "object of type {} is not callable",
                self.type_name(value)
            ))),
        }
    }

    /// Push a frame for a script closure, fixing up optional and
    /// variadic arguments on the stack first.
    pub(crate) fn call_closure(&mut self, closure: ObjRef, argc: usize) -> Result<(), VeldError> {
        let (proto, module) = match self.heap.get(closure) {
            Object::Closure(c) => (Rc::clone(&c.proto), c.module),
            _ => return Err(VeldError::runtime("callee is not a closure")),
        };
        let arity = proto.arity as usize;
        let mut argc = argc;
        // missing optional arguments become null
        if !proto.is_variadic {
            while argc < arity {
                self.stack.push(Value::Null);
                argc += 1;
            }
        }
        // a variadic function folds the trailing arguments into an array
        // bound to the synthetic last parameter
        if proto.is_variadic && argc >= arity - 1 {
            let extra = argc - (arity - 1);
            let array = self.alloc(Object::Array(Array { items: Vec::new() }));
            let start = self.stack.len() - extra;
            let items: Vec<Value> = self.stack.drain(start..).collect();
            if let Object::Array(a) = self.heap.get_mut(array) {
                a.items = items;
            }
            self.stack.push(Value::Obj(array));
            argc = arity;
        }
        if argc != arity {
            let name = if proto.name.is_empty() {
                "<anonymous>"
            } else {
                proto.name.as_str()
            };
            if proto.is_variadic {
                return Err(VeldError::argument(format!(
                    "function '{name}' expected at least {} arguments but got {argc}",
                    arity - 1
                )));
            }
            return Err(VeldError::argument(format!(
                "function '{name}' expected {arity} arguments but got {argc}"
            )));
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(VeldError::runtime("call stack overflow"));
        }
        let base = self.stack.len() - argc - 1;
        self.frames.push(CallFrame {
            closure,
            proto,
            module,
            ip: 0,
            base,
            handlers: SmallVec::new(),
            protect: 0,
        });
        Ok(())
    }

    /// Native bridge: copy the argument window out, run the function,
    /// replace callee+args with the result.
    pub(crate) fn call_native(
        &mut self,
        native: ObjRef,
        receiver: Value,
        argc: usize,
    ) -> Result<(), VeldError> {
        let func = match self.heap.get(native) {
            Object::Native(n) => n.func,
            _ => return Err(VeldError::runtime("callee is not a native function")),
        };
        let start = self.stack.len() - argc;
        let args: SmallVec<[Value; 8]> = self.stack[start..].iter().copied().collect();
        let arguments = Arguments {
            receiver,
            args,
            user_ptr: None,
        };
        let result = func(self, &arguments)?;
        self.stack.truncate(start - 1);
        self.stack.push(result);
        Ok(())
    }

    /// Class call: allocate the instance, seed its property bag from the
    /// class defaults, then run the constructor if there is one.
    pub(crate) fn construct(&mut self, class: ObjRef, argc: usize) -> Result<(), VeldError> {
        let seeded = match self.heap.get(class) {
            Object::Class(c) => c.inst_properties.clone(),
            _ => return Err(VeldError::runtime("constructor target is not a class")),
        };
        let instance = self.alloc(Object::Instance(Instance {
            class,
            properties: seeded,
        }));
        let base = self.stack.len() - argc - 1;
        self.stack[base] = Value::Obj(instance);
        let key = self.name_key("constructor");
        let ctor = match self.heap.get(class) {
            Object::Class(c) => c.methods.get(&key).map(|p| p.value),
            _ => None,
        };
        match ctor {
            Some(ctor) => self.call_field(ctor, Value::Obj(instance), argc),
            None => {
                if argc != 0 {
                    let name = match self.heap.get(class) {
                        Object::Class(c) => self.heap.str_value(c.name).to_string(),
                        _ => "?".to_string(),
                    };
                    return Err(VeldError::argument(format!(
                        "{name} constructor expects 0 arguments, {argc} given"
                    )));
                }
                Ok(())
            }
        }
    }

    /// `FuncKind` of a callable value, for static/private checks.
    fn callable_kind(&self, value: Value) -> Option<FuncKind> {
        let r = value.as_obj()?;
        match self.heap.get(r) {
            Object::Closure(c) => Some(c.proto.kind),
            Object::Native(n) => Some(n.kind),
            _ => None,
        }
    }

    /// `receiver.name(args...)` — the general method-call path.
    pub(crate) fn invoke(&mut self, name: &str, argc: usize) -> Result<(), VeldError> {
        let receiver = self.peek(argc);
        if let Some(result) = self.invoke_iteration_protocol(receiver, name, argc)? {
            let start = self.stack.len() - argc;
            self.stack.truncate(start - 1);
            self.stack.push(result);
            return Ok(());
        }
        let key = self.name_key(name);
        if let Value::Obj(r) = receiver {
            match self.heap.get(r) {
                Object::Module(module) => {
                    let module_name = self.heap.str_value(module.name).to_string();
                    match module.exports.get(&key).map(|p| p.value) {
                        Some(value) => {
                            if name.starts_with('_') {
                                return Err(VeldError::runtime(format!(
                                    "cannot call private module method '{name}'"
                                )));
                            }
                            return self.call_field(value, receiver, argc);
                        }
                        None => {
                            return Err(VeldError::runtime(format!(
                                "module '{module_name}' does not have a field named '{name}'"
                            )))
                        }
                    }
                }
                Object::Class(class) => {
                    let class_name = self.heap.str_value(class.name).to_string();
                    if let Some(value) = class.static_properties.get(&key).map(|p| p.value) {
                        return self.call_field(value, receiver, argc);
                    }
                    if let Some(value) = class.static_methods.get(&key).map(|p| p.value) {
                        return self.call_field(value, receiver, argc);
                    }
                    if let Some(value) = class.methods.get(&key).map(|p| p.value) {
                        match self.callable_kind(value) {
                            Some(FuncKind::Private) => {
                                return Err(VeldError::runtime(format!(
                                    "cannot call private method {name}() on {class_name}"
                                )))
                            }
                            Some(FuncKind::Static) => {
                                return self.call_field(value, receiver, argc)
                            }
                            _ => {}
                        }
                    }
                    return Err(VeldError::runtime(format!(
                        "unknown method {name}() in class {class_name}"
                    )));
                }
                Object::Instance(inst) => {
                    if let Some(value) = inst.properties.get(&key).map(|p| p.value) {
                        let base = self.stack.len() - argc - 1;
                        self.stack[base] = receiver;
                        return self.call_field(value, receiver, argc);
                    }
                    let class = inst.class;
                    return self.invoke_from_class(class, name, receiver, argc, false);
                }
                Object::Dict(dict) => {
                    if let Some(value) = dict.table.get(&key).map(|p| p.value) {
                        if self.callable_kind(value).is_some() {
                            return self.call_field(value, receiver, argc);
                        }
                    }
                    return Err(VeldError::runtime(format!(
                        "'dictionary' has no method {name}()"
                    )));
                }
                _ => {}
            }
        }
        Err(VeldError::runtime(format!(
            "'{}' has no method {name}()",
            self.type_name(receiver)
        )))
    }

    /// Method lookup in a class's (flattened) method table.
    pub(crate) fn invoke_from_class(
        &mut self,
        class: ObjRef,
        name: &str,
        receiver: Value,
        argc: usize,
        allow_private: bool,
    ) -> Result<(), VeldError> {
        let key = self.name_key(name);
        let (class_name, method) = match self.heap.get(class) {
            Object::Class(c) => (
                self.heap.str_value(c.name).to_string(),
                c.methods.get(&key).map(|p| p.value),
            ),
            _ => return Err(VeldError::runtime("method receiver has no class")),
        };
        match method {
            Some(value) => {
                if !allow_private && self.callable_kind(value) == Some(FuncKind::Private) {
                    return Err(VeldError::runtime(format!(
                        "cannot call private method '{name}' from instance of {class_name}"
                    )));
                }
                self.call_field(value, receiver, argc)
            }
            None => Err(VeldError::runtime(format!(
                "undefined method '{name}' in {class_name}"
            ))),
        }
    }

    /// `this.name(args...)` inside a class body: methods first (private
    /// allowed), then fields holding callables.
    pub(crate) fn invoke_self(&mut self, name: &str, argc: usize) -> Result<(), VeldError> {
        let receiver = self.peek(argc);
        let key = self.name_key(name);
        if let Value::Obj(r) = receiver {
            match self.heap.get(r) {
                Object::Instance(inst) => {
                    let class = inst.class;
                    let method = match self.heap.get(class) {
                        Object::Class(c) => c.methods.get(&key).map(|p| p.value),
                        _ => None,
                    };
                    if let Some(value) = method {
                        return self.call_field(value, receiver, argc);
                    }
                    if let Some(value) = match self.heap.get(r) {
                        Object::Instance(inst) => inst.properties.get(&key).map(|p| p.value),
                        _ => None,
                    } {
                        let base = self.stack.len() - argc - 1;
                        self.stack[base] = receiver;
                        return self.call_field(value, receiver, argc);
                    }
                }
                Object::Class(class) => {
                    if let Some(value) = class.methods.get(&key).map(|p| p.value) {
                        if self.callable_kind(value) == Some(FuncKind::Static) {
                            return self.call_field(value, receiver, argc);
                        }
                        return Err(VeldError::runtime(format!(
                            "cannot call non-static method {name}() on non instance"
                        )));
                    }
                }
                _ => {}
            }
        }
        Err(VeldError::runtime(format!(
            "cannot call method '{name}' on object of type '{}'",
            self.type_name(receiver)
        )))
    }

    /// Bind `class.name` to the receiver on top of the stack.
    pub(crate) fn bind_method(&mut self, class: ObjRef, name: &str) -> Result<(), VeldError> {
        let key = self.name_key(name);
        let method = match self.heap.get(class) {
            Object::Class(c) => c.methods.get(&key).map(|p| p.value),
            _ => None,
        };
        let method = match method {
            Some(Value::Obj(m)) => m,
            _ => {
                return Err(VeldError::runtime(format!(
                    "undefined property '{name}'"
                )))
            }
        };
        if self.callable_kind(Value::Obj(method)) == Some(FuncKind::Private) {
            return Err(VeldError::runtime(format!(
                "cannot get private property '{name}' from instance"
            )));
        }
        let receiver = self.peek(0);
        let bound = self.alloc(Object::Bound(BoundMethod { receiver, method }));
        self.pop();
        self.stack.push(Value::Obj(bound));
        Ok(())
    }

    // ---- upvalues -----------------------------------------------------

    /// Find or create the open upvalue for a stack slot.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        for i in 0..self.open_upvalues.len() {
            let r = self.open_upvalues[i];
            if let Object::Upvalue(Upvalue::Open(s)) = self.heap.get(r) {
                if *s == slot {
                    return r;
                }
            }
        }
        let r = self.alloc(Object::Upvalue(Upvalue::Open(slot)));
        self.open_upvalues.push(r);
        r
    }

    /// Close every open upvalue at or above `from`: copy the stack value
    /// in and drop it from the open list.
    pub(crate) fn close_upvalues(&mut self, from: usize) {
        let mut i = 0;
        while i < self.open_upvalues.len() {
            let r = self.open_upvalues[i];
            let slot = match self.heap.get(r) {
                Object::Upvalue(Upvalue::Open(s)) => *s,
                _ => {
                    self.open_upvalues.swap_remove(i);
                    continue;
                }
            };
            if slot >= from {
                let value = self.stack[slot];
                *self.heap.get_mut(r) = Object::Upvalue(Upvalue::Closed(value));
                self.open_upvalues.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }

    /// Source position of the active instruction, for exception
    /// construction.
    pub(crate) fn current_position(&self) -> (String, u32) {
        match self.frames.last() {
            Some(frame) => {
                let file = match self.heap.get(frame.module) {
                    Object::Module(m) => self.heap.str_value(m.name).to_string(),
                    _ => "(unknown)".to_string(),
                };
                let line = frame.proto.blob.line_of(frame.ip.saturating_sub(1));
                (file, line)
            }
            None => ("<native>".to_string(), 0),
        }
    }

    /// `instanceof` support: the class of a value, for instances only.
    pub(crate) fn class_of(&self, value: Value) -> Option<ObjRef> {
        match value {
            Value::Obj(r) => match self.heap.get(r) {
                Object::Instance(inst) => Some(inst.class),
                _ => None,
            },
            _ => None,
        }
    }

    /// Is `value` an instance of the built-in exception hierarchy?
    pub(crate) fn is_exception_instance(&self, value: Value) -> bool {
        match self.class_of(value) {
            Some(class) => is_instance_of(self, class, self.exceptions.base),
            None => false,
        }
    }
}
