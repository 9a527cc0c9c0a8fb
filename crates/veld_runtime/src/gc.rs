//! Mark-sweep collection.
//!
//! Synchronous and non-generational: the allocator calls `collect_garbage`
//! inline whenever the byte threshold is crossed. Roots are the
//! evaluation stack, every frame's closure / module / handler classes,
//! the open-upvalue list, the globals and loaded-modules tables, the
//! exception classes, and the protection stash. Tracing drains the gray
//! worklist; sweep drops every unmarked, unpinned slot in place.

use crate::core::heap::Heap;
use crate::core::object::Object;
use crate::core::table::{Table, TableKey};
use crate::core::value::{ObjRef, Value};
use crate::runtime::Runtime;

impl Runtime {
    /// Force a full collection now.
    pub fn collect_garbage(&mut self) {
        self.heap.clear_marks();
        self.mark_roots();
        self.trace_references();
        self.heap.purge_unmarked_strings();
        self.heap.sweep();
    }

    fn mark_roots(&mut self) {
        for i in 0..self.stack.len() {
            let v = self.stack[i];
            mark_value(&mut self.heap, v);
        }
        for i in 0..self.frames.len() {
            let closure = self.frames[i].closure;
            let module = self.frames[i].module;
            mark_object(&mut self.heap, closure);
            mark_object(&mut self.heap, module);
            for h in 0..self.frames[i].handlers.len() {
                if let Some(class) = self.frames[i].handlers[h].class {
                    mark_object(&mut self.heap, class);
                }
            }
        }
        for i in 0..self.open_upvalues.len() {
            let r = self.open_upvalues[i];
            mark_object(&mut self.heap, r);
        }
        mark_table(&mut self.heap, &self.globals);
        mark_table(&mut self.heap, &self.modules);
        mark_object(&mut self.heap, self.top_module);
        for class in [
            self.exceptions.base,
            self.exceptions.assert,
            self.exceptions.syntax,
            self.exceptions.io,
            self.exceptions.os,
            self.exceptions.argument,
        ] {
            mark_object(&mut self.heap, class);
        }
        for i in 0..self.heap.stash.len() {
            let v = self.heap.stash[i];
            mark_value(&mut self.heap, v);
        }
        self.heap.mark_pinned();
    }

    /// Blacken gray objects until the worklist runs dry.
    fn trace_references(&mut self) {
        while let Some(r) = self.heap.gray.pop() {
            let children = gather_children(&self.heap, r);
            for child in children {
                mark_value(&mut self.heap, child);
            }
        }
    }
}

pub(crate) fn mark_value(heap: &mut Heap, v: Value) {
    if let Value::Obj(r) = v {
        mark_object(heap, r);
    }
}

pub(crate) fn mark_object(heap: &mut Heap, r: ObjRef) {
    if heap.set_mark(r) {
        heap.gray.push(r);
    }
}

fn mark_table(heap: &mut Heap, table: &Table) {
    for (key, prop) in table.iter() {
        if let TableKey::Str { obj, .. } = key {
            mark_object(heap, *obj);
        }
        mark_value(heap, prop.value);
    }
}

fn table_children(table: &Table, out: &mut Vec<Value>) {
    for (key, prop) in table.iter() {
        if let TableKey::Str { obj, .. } = key {
            out.push(Value::Obj(*obj));
        }
        out.push(prop.value);
    }
}

/// Variant-specific reference gathering: everything a black object must
/// keep alive.
fn gather_children(heap: &Heap, r: ObjRef) -> Vec<Value> {
    let mut out = Vec::new();
    match heap.get(r) {
        Object::Str(_) | Object::Range(_) | Object::File(_) | Object::UserData(_)
        | Object::Native(_) => {}
        Object::Upvalue(upvalue) => {
            if let crate::core::object::Upvalue::Closed(v) = upvalue {
                out.push(*v);
            }
        }
        Object::Array(array) => out.extend_from_slice(&array.items),
        Object::Dict(dict) => {
            out.extend_from_slice(&dict.keys);
            table_children(&dict.table, &mut out);
        }
        Object::Class(class) => {
            out.push(Value::Obj(class.name));
            out.push(class.constructor);
            if let Some(superclass) = class.superclass {
                out.push(Value::Obj(superclass));
            }
            table_children(&class.inst_properties, &mut out);
            table_children(&class.static_properties, &mut out);
            table_children(&class.methods, &mut out);
            table_children(&class.static_methods, &mut out);
        }
        Object::Instance(inst) => {
            out.push(Value::Obj(inst.class));
            table_children(&inst.properties, &mut out);
        }
        Object::Closure(closure) => {
            out.push(Value::Obj(closure.module));
            for upvalue in &closure.upvalues {
                out.push(Value::Obj(*upvalue));
            }
        }
        Object::Bound(bound) => {
            out.push(bound.receiver);
            out.push(Value::Obj(bound.method));
        }
        Object::Module(module) => {
            out.push(Value::Obj(module.name));
            table_children(&module.exports, &mut out);
        }
    }
    out
}
