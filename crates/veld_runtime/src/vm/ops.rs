//! Operand helpers: arithmetic, property access, indexing, collection
//! construction and the iteration protocol.

use crate::core::object::{Array, Dict, Object, Range};
use crate::core::table::{Property, PropertyKind};
use crate::core::value::{ObjRef, Value};
use crate::error::VeldError;
use crate::runtime::Runtime;

impl Runtime {
    /// Numeric coercion shared by the arithmetic primitives: numbers,
    /// booleans and null coerce; everything else is a type error.
    pub(crate) fn coerce_num(&self, v: Value, op: &str) -> Result<f64, VeldError> {
        match v {
            Value::Num(n) => Ok(n),
            Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            Value::Null | Value::Empty => Ok(0.0),
            _ => Err(VeldError::runtime(format!(
                "unsupported operand type {} for '{op}'",
                self.type_name(v)
            ))),
        }
    }

    /// `+`: string concatenation when either side is a string, numeric
    /// addition otherwise.
    pub(crate) fn op_add(&mut self) -> Result<(), VeldError> {
        let b = self.peek(0);
        let a = self.peek(1);
        let a_str = self.heap.value_str(a).is_some();
        let b_str = self.heap.value_str(b).is_some();
        if a_str || b_str {
            let mut out = String::new();
            out.push_str(&self.stringify(a));
            out.push_str(&self.stringify(b));
            let r = self.new_string(out);
            self.pop();
            self.pop();
            self.stack.push(Value::Obj(r));
            return Ok(());
        }
        let bn = self.coerce_num(b, "+")?;
        let an = self.coerce_num(a, "+")?;
        self.pop();
        self.pop();
        self.stack.push(Value::Num(an + bn));
        Ok(())
    }

    pub(crate) fn op_numeric(
        &mut self,
        op: &str,
        f: fn(f64, f64) -> f64,
    ) -> Result<(), VeldError> {
        let b = self.coerce_num(self.peek(0), op)?;
        let a = self.coerce_num(self.peek(1), op)?;
        self.pop();
        self.pop();
        self.stack.push(Value::Num(f(a, b)));
        Ok(())
    }

    pub(crate) fn op_compare(
        &mut self,
        op: &str,
        f: fn(f64, f64) -> bool,
    ) -> Result<(), VeldError> {
        let b = self.coerce_num(self.peek(0), op)?;
        let a = self.coerce_num(self.peek(1), op)?;
        self.pop();
        self.pop();
        self.stack.push(Value::Bool(f(a, b)));
        Ok(())
    }

    /// Integer bitwise primitive over 64-bit operands.
    pub(crate) fn op_bitwise(
        &mut self,
        op: &str,
        f: fn(i64, i64) -> i64,
    ) -> Result<(), VeldError> {
        let b = self.coerce_num(self.peek(0), op)? as i64;
        let a = self.coerce_num(self.peek(1), op)? as i64;
        self.pop();
        self.pop();
        self.stack.push(Value::Num(f(a, b) as f64));
        Ok(())
    }

    /// Shifts run on 32-bit operands with the amount masked to five
    /// bits, for cross-language numeric compatibility.
    pub(crate) fn op_shift(&mut self, op: &str, left: bool) -> Result<(), VeldError> {
        let b = self.coerce_num(self.peek(0), op)? as i64 as u32;
        let a = self.coerce_num(self.peek(1), op)? as i64 as u32;
        let amount = b & 0x1f;
        let result = if left { a << amount } else { a >> amount };
        self.pop();
        self.pop();
        self.stack.push(Value::Num(result as f64));
        Ok(())
    }

    // ---- property access ---------------------------------------------

    /// `obj.name` — `on_self` marks access from inside the defining
    /// class, which may reach private members.
    pub(crate) fn property_get(&mut self, name: &str, on_self: bool) -> Result<(), VeldError> {
        let receiver = self.peek(0);
        let key = self.name_key(name);
        let r = match receiver {
            Value::Obj(r) => r,
            _ => {
                return Err(VeldError::runtime(format!(
                    "'{}' of type {} does not have properties",
                    self.stringify(receiver),
                    self.type_name(receiver)
                )))
            }
        };
        // built-in computed members
        if name == "length" {
            if let Some(len) = self.builtin_length(r) {
                self.pop();
                self.stack.push(Value::Num(len));
                return Ok(());
            }
        }
        let prop: Option<Property> = match self.heap.get(r) {
            Object::Instance(inst) => inst.properties.get(&key).copied(),
            Object::Dict(dict) => dict.table.get(&key).copied(),
            Object::Module(module) => {
                if !on_self && name.starts_with('_') {
                    return Err(VeldError::runtime(format!(
                        "cannot get private module property '{name}'"
                    )));
                }
                module.exports.get(&key).copied()
            }
            Object::Class(class) => class
                .static_properties
                .get(&key)
                .copied()
                .or_else(|| class.static_methods.get(&key).copied()),
            _ => None,
        };
        if let Some(prop) = prop {
            if prop.kind == PropertyKind::FuncField {
                // computed member: invoke the pseudo-getter in place
                return self.call_field(prop.value, receiver, 0);
            }
            self.pop();
            self.stack.push(prop.value);
            return Ok(());
        }
        // fall back to binding a method for instances
        if let Object::Instance(inst) = self.heap.get(r) {
            let class = inst.class;
            if !on_self && name.starts_with('_') {
                return Err(VeldError::runtime(format!(
                    "cannot get private property '{name}' from instance"
                )));
            }
            return self.bind_method(class, name);
        }
        Err(VeldError::runtime(format!("undefined property '{name}'")))
    }

    fn builtin_length(&self, r: ObjRef) -> Option<f64> {
        match self.heap.get(r) {
            Object::Str(s) => Some(s.len() as f64),
            Object::Array(a) => Some(a.items.len() as f64),
            Object::Dict(d) => Some(d.keys.len() as f64),
            Object::Range(rg) => Some(rg.span()),
            _ => None,
        }
    }

    /// `obj.name = value` — stack holds receiver below value; leaves the
    /// value.
    pub(crate) fn property_set(&mut self, name: &str) -> Result<(), VeldError> {
        let value = self.peek(0);
        let receiver = self.peek(1);
        let key = self.name_key(name);
        let r = match receiver {
            Value::Obj(r) => r,
            _ => {
                return Err(VeldError::runtime(format!(
                    "cannot set property '{name}' on type {}",
                    self.type_name(receiver)
                )))
            }
        };
        let key_value = key.to_value();
        match self.heap.get_mut(r) {
            Object::Instance(inst) => {
                inst.properties.set_value(key, value);
            }
            Object::Dict(dict) => {
                if dict.table.set_value(key, value) {
                    dict.keys.push(key_value);
                }
            }
            Object::Module(module) => {
                module.exports.set_value(key, value);
            }
            Object::Class(class) => {
                class.static_properties.set_value(key, value);
            }
            _ => {
                return Err(VeldError::runtime(format!(
                    "cannot set property '{name}' on type {}",
                    self.type_name(receiver)
                )))
            }
        }
        self.pop();
        self.pop();
        self.stack.push(value);
        Ok(())
    }

    // ---- indexing -----------------------------------------------------

    /// `a[i]`; with `will_assign` the container and index stay under the
    /// result for the upcoming store.
    pub(crate) fn index_get(&mut self, will_assign: bool) -> Result<(), VeldError> {
        let index = self.peek(0);
        let target = self.peek(1);
        let r = match target {
            Value::Obj(r) => r,
            _ => {
                return Err(VeldError::runtime(format!(
                    "cannot index object of type {}",
                    self.type_name(target)
                )))
            }
        };
        let result = match self.heap.get(r) {
            Object::Array(array) => {
                let n = match index {
                    Value::Num(n) => n,
                    _ => return Err(VeldError::runtime("list are numerically indexed")),
                };
                let len = array.items.len() as i64;
                let mut at = n as i64;
                if at < 0 {
                    at += len;
                }
                if at >= 0 && at < len {
                    array.items[at as usize]
                } else {
                    Value::Null
                }
            }
            Object::Str(s) => {
                let n = match index {
                    Value::Num(n) => n,
                    _ => return Err(VeldError::runtime("strings are numerically indexed")),
                };
                let bytes = s.as_str().as_bytes();
                let len = bytes.len() as i64;
                let mut at = n as i64;
                if at < 0 {
                    at += len;
                }
                if at >= 0 && at < len {
                    let piece = (bytes[at as usize] as char).to_string();
                    let obj = self.new_string(piece);
                    Value::Obj(obj)
                } else {
                    return Err(VeldError::runtime(format!(
                        "string index {n} out of range of {len}"
                    )));
                }
            }
            Object::Dict(_) => {
                let key = self.table_key(index)?;
                match self.heap.get(r) {
                    Object::Dict(dict) => match dict.table.get(&key) {
                        Some(prop) => prop.value,
                        None => Value::Null,
                    },
                    _ => Value::Null,
                }
            }
            Object::Module(_) => {
                let key = self.table_key(index)?;
                let (name, found) = match self.heap.get(r) {
                    Object::Module(module) => (
                        self.heap.str_value(module.name).to_string(),
                        module.exports.get(&key).map(|p| p.value),
                    ),
                    _ => ("?".to_string(), None),
                };
                match found {
                    Some(v) => v,
                    None => {
                        return Err(VeldError::runtime(format!(
                            "{} is undefined in module {name}",
                            self.stringify(index)
                        )))
                    }
                }
            }
            _ => {
                return Err(VeldError::runtime(format!(
                    "cannot index object of type {}",
                    self.type_name(target)
                )))
            }
        };
        if !will_assign {
            self.pop();
            self.pop();
        }
        self.stack.push(result);
        Ok(())
    }

    /// `a[lo, hi]` with either bound defaulting; produces a slice.
    pub(crate) fn index_get_ranged(&mut self, will_assign: bool) -> Result<(), VeldError> {
        let upper = self.peek(0);
        let lower = self.peek(1);
        let target = self.peek(2);
        let r = match target {
            Value::Obj(r) => r,
            _ => {
                return Err(VeldError::runtime(format!(
                    "cannot range index object of type {}",
                    self.type_name(target)
                )))
            }
        };
        let bound = |v: Value, default: f64| -> Result<f64, VeldError> {
            match v {
                Value::Null | Value::Empty => Ok(default),
                Value::Num(n) => Ok(n),
                _ => Err(VeldError::runtime(
                    "range index expects upper and lower to be numbers",
                )),
            }
        };
        let result = match self.heap.get(r) {
            Object::Array(array) => {
                let len = array.items.len();
                let lo = bound(lower, 0.0)?.max(0.0) as usize;
                let hi = (bound(upper, len as f64)?.min(len as f64)).max(0.0) as usize;
                let items: Vec<Value> = if lo < hi {
                    array.items[lo..hi].to_vec()
                } else {
                    Vec::new()
                };
                let obj = self.make_array(items);
                Value::Obj(obj)
            }
            Object::Str(s) => {
                let len = s.len();
                let lo = bound(lower, 0.0)?.max(0.0) as usize;
                let hi = (bound(upper, len as f64)?.min(len as f64)).max(0.0) as usize;
                let piece = if lo < hi && s.as_str().is_char_boundary(lo) && s.as_str().is_char_boundary(hi)
                {
                    s.as_str()[lo..hi].to_string()
                } else {
                    String::new()
                };
                let obj = self.new_string(piece);
                Value::Obj(obj)
            }
            _ => {
                return Err(VeldError::runtime(format!(
                    "cannot range index object of type {}",
                    self.type_name(target)
                )))
            }
        };
        if !will_assign {
            self.pop();
            self.pop();
            self.pop();
        }
        self.stack.push(result);
        Ok(())
    }

    /// `a[i] = v` — stack holds target, index, value; leaves the value.
    pub(crate) fn index_set(&mut self) -> Result<(), VeldError> {
        let value = self.peek(0);
        let index = self.peek(1);
        let target = self.peek(2);
        let r = match target {
            Value::Obj(r) => r,
            _ => {
                return Err(VeldError::runtime(format!(
                    "cannot index object of type {}",
                    self.type_name(target)
                )))
            }
        };
        match self.heap.get(r) {
            Object::Array(_) => {
                let n = match index {
                    Value::Num(n) => n,
                    _ => return Err(VeldError::runtime("list are numerically indexed")),
                };
                let at = n as i64;
                if at < 0 {
                    return Err(VeldError::runtime(format!("list index {at} out of range")));
                }
                // sparse growth fills the gap with nulls
                if let Object::Array(array) = self.heap.get_mut(r) {
                    array.insert(at as usize, value);
                }
            }
            Object::Dict(_) => {
                let key = self.table_key(index)?;
                let key_value = key.to_value();
                if let Object::Dict(dict) = self.heap.get_mut(r) {
                    if dict.table.set_value(key, value) {
                        dict.keys.push(key_value);
                    }
                }
            }
            _ => {
                return Err(VeldError::runtime(format!(
                    "cannot index assign to object of type {}",
                    self.type_name(target)
                )))
            }
        }
        self.pop();
        self.pop();
        self.pop();
        self.stack.push(value);
        Ok(())
    }

    // ---- collection construction -------------------------------------

    pub(crate) fn op_make_array(&mut self, count: usize) -> Result<(), VeldError> {
        let array = self.alloc(Object::Array(Array { items: Vec::new() }));
        let start = self.stack.len() - count;
        let items: Vec<Value> = self.stack.drain(start..).collect();
        if let Object::Array(a) = self.heap.get_mut(array) {
            a.items = items;
        }
        self.stack.push(Value::Obj(array));
        Ok(())
    }

    pub(crate) fn op_make_dict(&mut self, pairs: usize) -> Result<(), VeldError> {
        let dict = self.alloc(Object::Dict(Dict::new()));
        // key interning below may collect: stash the dict, keep the
        // pairs on the stack
        self.heap.stash_push(Value::Obj(dict));
        let start = self.stack.len() - pairs * 2;
        for i in 0..pairs {
            let key_value = self.stack[start + i * 2];
            let value = self.stack[start + i * 2 + 1];
            let key = match self.table_key(key_value) {
                Ok(key) => key,
                Err(err) => {
                    self.heap.stash_pop();
                    return Err(err);
                }
            };
            let key_canonical = key.to_value();
            if let Object::Dict(d) = self.heap.get_mut(dict) {
                if d.table.set_value(key, value) {
                    d.keys.push(key_canonical);
                }
            }
        }
        self.heap.stash_pop();
        self.stack.truncate(start);
        self.stack.push(Value::Obj(dict));
        Ok(())
    }

    pub(crate) fn op_make_range(&mut self) -> Result<(), VeldError> {
        let upper = self.peek(0);
        let lower = self.peek(1);
        let (lower, upper) = match (lower, upper) {
            (Value::Num(a), Value::Num(b)) => (a, b),
            _ => return Err(VeldError::runtime("invalid range boundaries")),
        };
        let range = self.alloc(Object::Range(Range { lower, upper }));
        self.pop();
        self.pop();
        self.stack.push(Value::Obj(range));
        Ok(())
    }

    // ---- iteration protocol ------------------------------------------

    /// Built-in `@itern`/`@iter` for the primitive containers; user
    /// classes implement them as ordinary methods. Returns the result
    /// value when the receiver is handled here.
    pub(crate) fn invoke_iteration_protocol(
        &mut self,
        receiver: Value,
        name: &str,
        argc: usize,
    ) -> Result<Option<Value>, VeldError> {
        if name != "@itern" && name != "@iter" {
            return Ok(None);
        }
        let r = match receiver {
            Value::Obj(r) => r,
            _ => return Ok(None),
        };
        if argc != 1 {
            return Err(VeldError::argument(format!(
                "{name}() expects 1 argument, {argc} given"
            )));
        }
        let cursor = self.peek(0);
        let next = name == "@itern";
        let result = match self.heap.get(r) {
            Object::Array(array) => {
                if next {
                    iter_next_index(cursor, array.items.len())?
                } else {
                    match cursor {
                        Value::Num(n) if n >= 0.0 && (n as usize) < array.items.len() => {
                            array.items[n as usize]
                        }
                        _ => Value::Null,
                    }
                }
            }
            Object::Str(s) => {
                let len = s.len();
                if next {
                    iter_next_index(cursor, len)?
                } else {
                    match cursor {
                        Value::Num(n) if n >= 0.0 && (n as usize) < len => {
                            let byte = s.as_str().as_bytes()[n as usize];
                            let piece = (byte as char).to_string();
                            let obj = self.new_string(piece);
                            Value::Obj(obj)
                        }
                        _ => Value::Null,
                    }
                }
            }
            Object::Range(range) => {
                let span = range.span() as usize;
                let (lower, upper) = (range.lower, range.upper);
                if next {
                    iter_next_index(cursor, span)?
                } else {
                    match cursor {
                        Value::Num(n) if n >= 0.0 && (n as usize) < span => {
                            if lower <= upper {
                                Value::Num(lower + n)
                            } else {
                                Value::Num(lower - n)
                            }
                        }
                        _ => Value::Null,
                    }
                }
            }
            Object::Dict(dict) => {
                if next {
                    match cursor {
                        Value::Null => dict.keys.first().copied().unwrap_or(Value::Bool(false)),
                        current => {
                            let position = dict
                                .keys
                                .iter()
                                .position(|k| self.values_equal(*k, current));
                            match position {
                                Some(i) if i + 1 < dict.keys.len() => dict.keys[i + 1],
                                _ => Value::Bool(false),
                            }
                        }
                    }
                } else {
                    let key = self.table_key(cursor)?;
                    match self.heap.get(r) {
                        Object::Dict(d) => {
                            d.table.get(&key).map(|p| p.value).unwrap_or(Value::Null)
                        }
                        _ => Value::Null,
                    }
                }
            }
            Object::Instance(_) => return Ok(None),
            _ => {
                return Err(VeldError::runtime(format!(
                    "type of {} is not a valid iterable",
                    self.type_name(receiver)
                )))
            }
        };
        Ok(Some(result))
    }
}

/// Cursor advance shared by the indexable iterables: null starts at 0,
/// the step past the end yields false.
fn iter_next_index(cursor: Value, len: usize) -> Result<Value, VeldError> {
    match cursor {
        Value::Null => {
            if len == 0 {
                Ok(Value::Bool(false))
            } else {
                Ok(Value::Num(0.0))
            }
        }
        Value::Num(n) => {
            let next = n as i64 + 1;
            if next >= 0 && (next as usize) < len {
                Ok(Value::Num(next as f64))
            } else {
                Ok(Value::Bool(false))
            }
        }
        _ => Err(VeldError::runtime("iterables are numerically indexed")),
    }
}
