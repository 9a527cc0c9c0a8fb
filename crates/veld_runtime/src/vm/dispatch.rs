//! The instruction dispatch loop.

use veld_bytecode::{disassemble_instruction, Constant, FuncKind, OpCode};

use crate::core::object::{ClassObj, Closure, Object};
use crate::core::value::Value;
use crate::error::VeldError;
use crate::exceptions::{attach_stack_trace, inherit_from, is_instance_of};
use crate::runtime::{Handler, Runtime};

/// What a single instruction did to control flow.
enum Step {
    Continue,
    /// The frame at `min_depth` returned; its value.
    Done(Value),
}

impl Runtime {
    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("no active frame");
        let byte = frame.proto.blob.code[frame.ip].code;
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let frame = self.frames.last_mut().expect("no active frame");
        let value = frame.proto.blob.read_short(frame.ip);
        frame.ip += 2;
        value
    }

    fn read_constant(&mut self) -> Constant {
        let idx = self.read_short() as usize;
        let frame = self.frames.last().expect("no active frame");
        frame.proto.blob.constants[idx].clone()
    }

    /// Constant-pool string operand as an owned name.
    fn read_name(&mut self) -> Result<String, VeldError> {
        match self.read_constant() {
            Constant::Str(s) => Ok(s.to_string()),
            _ => Err(VeldError::runtime("malformed bytecode: expected a name")),
        }
    }

    /// Run frames above `min_depth` to completion; returns the value the
    /// frame at `min_depth` produced.
    pub(crate) fn execute(&mut self, min_depth: usize) -> Result<Value, VeldError> {
        loop {
            if self.config.trace_execution {
                let frame = self.frames.last().expect("no active frame");
                let mut text = String::new();
                disassemble_instruction(&mut text, &frame.proto.blob, frame.ip);
                eprint!("{text}");
            }
            let op_byte = self.read_byte();
            let op = match OpCode::from_u8(op_byte) {
                Some(op) => op,
                None => {
                    return Err(VeldError::runtime(format!(
                        "unknown opcode {op_byte:#04x}"
                    )))
                }
            };
            match self.exec_op(op, min_depth) {
                Ok(Step::Continue) => {}
                Ok(Step::Done(value)) => return Ok(value),
                Err(err) => {
                    let exception = self.error_to_exception(err)?;
                    if !self.propagate_exception(exception, min_depth) {
                        return Err(VeldError::Thrown(exception));
                    }
                }
            }
        }
    }

    fn exec_op(&mut self, op: OpCode, min_depth: usize) -> Result<Step, VeldError> {
        match op {
            OpCode::PushEmpty => self.stack.push(Value::Empty),
            OpCode::PushNull => self.stack.push(Value::Null),
            OpCode::PushTrue => self.stack.push(Value::Bool(true)),
            OpCode::PushFalse => self.stack.push(Value::Bool(false)),
            OpCode::PushOne => self.stack.push(Value::Num(1.0)),
            OpCode::PushConstant => {
                let constant = self.read_constant();
                let value = self.resolve_constant(&constant);
                self.stack.push(value);
            }
            OpCode::Pop => {
                self.pop();
            }
            OpCode::PopN => {
                let n = self.read_short() as usize;
                self.stack.truncate(self.stack.len().saturating_sub(n));
            }
            OpCode::Dup => self.stack.push(self.peek(0)),

            // ---- variables -------------------------------------------
            OpCode::GlobalDefine => {
                let name = self.read_name()?;
                let value = self.peek(0);
                let key = self.name_key(&name);
                let module = self.frames.last().expect("no active frame").module;
                if let Object::Module(m) = self.heap.get_mut(module) {
                    m.exports.set_value(key, value);
                }
                self.pop();
            }
            OpCode::GlobalGet => {
                let name = self.read_name()?;
                let key = self.name_key(&name);
                let module = self.frames.last().expect("no active frame").module;
                let found = match self.heap.get(module) {
                    Object::Module(m) => m.exports.get(&key).map(|p| p.value),
                    _ => None,
                };
                let found = found.or_else(|| self.globals.get(&key).map(|p| p.value));
                match found {
                    Some(value) => self.stack.push(value),
                    None => {
                        return Err(VeldError::runtime(format!(
                            "global name '{name}' is not defined"
                        )))
                    }
                }
            }
            OpCode::GlobalSet => {
                let name = self.read_name()?;
                let key = self.name_key(&name);
                let value = self.peek(0);
                let module = self.frames.last().expect("no active frame").module;
                let strict = self.config.strict_globals;
                let mut undeclared = false;
                if let Object::Module(m) = self.heap.get_mut(module) {
                    if m.exports.set_value(key, value) && strict {
                        m.exports.delete(&key);
                        undeclared = true;
                    }
                }
                if undeclared {
                    return Err(VeldError::runtime(format!(
                        "global name '{name}' was not declared"
                    )));
                }
            }
            OpCode::LocalGet | OpCode::ArgGet => {
                let slot = self.read_short() as usize;
                let base = self.frames.last().expect("no active frame").base;
                self.stack.push(self.stack[base + slot]);
            }
            OpCode::LocalSet | OpCode::ArgSet => {
                let slot = self.read_short() as usize;
                let base = self.frames.last().expect("no active frame").base;
                let value = self.peek(0);
                self.stack[base + slot] = value;
            }
            OpCode::ArgOptional => {
                let slot = self.read_short() as usize;
                let didx = self.read_short() as usize;
                let frame = self.frames.last().expect("no active frame");
                let base = frame.base;
                let default = frame.proto.blob.defaults[didx].clone();
                if self.stack[base + slot].is_null() {
                    let value = self.resolve_constant(&default);
                    self.stack[base + slot] = value;
                }
            }
            OpCode::UpvalueGet => {
                let idx = self.read_short() as usize;
                let closure = self.frames.last().expect("no active frame").closure;
                let upvalue = match self.heap.get(closure) {
                    Object::Closure(c) => c.upvalues[idx],
                    _ => return Err(VeldError::runtime("frame closure is corrupt")),
                };
                let value = match self.heap.get(upvalue) {
                    Object::Upvalue(crate::core::object::Upvalue::Open(slot)) => {
                        self.stack[*slot]
                    }
                    Object::Upvalue(crate::core::object::Upvalue::Closed(v)) => *v,
                    _ => return Err(VeldError::runtime("upvalue object is corrupt")),
                };
                self.stack.push(value);
            }
            OpCode::UpvalueSet => {
                let idx = self.read_short() as usize;
                let value = self.peek(0);
                let closure = self.frames.last().expect("no active frame").closure;
                let upvalue = match self.heap.get(closure) {
                    Object::Closure(c) => c.upvalues[idx],
                    _ => return Err(VeldError::runtime("frame closure is corrupt")),
                };
                match self.heap.get_mut(upvalue) {
                    Object::Upvalue(uv) => match uv {
                        crate::core::object::Upvalue::Open(slot) => {
                            let slot = *slot;
                            self.stack[slot] = value;
                        }
                        crate::core::object::Upvalue::Closed(v) => *v = value,
                    },
                    _ => return Err(VeldError::runtime("upvalue object is corrupt")),
                }
            }
            OpCode::UpvalueClose => {
                let top = self.stack.len() - 1;
                self.close_upvalues(top);
                self.pop();
            }

            // ---- arithmetic / logic ----------------------------------
            OpCode::Add => self.op_add()?,
            OpCode::Subtract => self.op_numeric("-", |a, b| a - b)?,
            OpCode::Multiply => self.op_numeric("*", |a, b| a * b)?,
            OpCode::Divide => self.op_numeric("/", |a, b| a / b)?,
            OpCode::FloorDivide => self.op_numeric("//", |a, b| (a / b).floor())?,
            OpCode::Modulo => self.op_numeric("%", |a, b| a % b)?,
            OpCode::Pow => self.op_numeric("**", f64::powf)?,
            OpCode::Negate => {
                let n = self.coerce_num(self.peek(0), "-")?;
                self.pop();
                self.stack.push(Value::Num(-n));
            }
            OpCode::Not => {
                let v = self.pop();
                let falsy = self.is_falsy(v);
                self.stack.push(Value::Bool(falsy));
            }
            OpCode::BitNot => {
                let n = self.coerce_num(self.peek(0), "~")? as i64;
                self.pop();
                self.stack.push(Value::Num(!n as f64));
            }
            OpCode::BitAnd => self.op_bitwise("&", |a, b| a & b)?,
            OpCode::BitOr => self.op_bitwise("|", |a, b| a | b)?,
            OpCode::BitXor => self.op_bitwise("^", |a, b| a ^ b)?,
            OpCode::ShiftLeft => self.op_shift("<<", true)?,
            OpCode::ShiftRight => self.op_shift(">>", false)?,
            OpCode::Equal => {
                let b = self.pop();
                let a = self.pop();
                let eq = self.values_equal(a, b);
                self.stack.push(Value::Bool(eq));
            }
            OpCode::Greater => self.op_compare(">", |a, b| a > b)?,
            OpCode::Less => self.op_compare("<", |a, b| a < b)?,

            // ---- jumps -----------------------------------------------
            OpCode::Jump => {
                let offset = self.read_short() as usize;
                self.frames.last_mut().expect("no active frame").ip += offset;
            }
            OpCode::JumpIfFalse => {
                let offset = self.read_short() as usize;
                if self.is_falsy(self.peek(0)) {
                    self.frames.last_mut().expect("no active frame").ip += offset;
                }
            }
            OpCode::Loop => {
                let offset = self.read_short() as usize;
                self.frames.last_mut().expect("no active frame").ip -= offset;
            }
            OpCode::BreakPlaceholder => {
                return Err(VeldError::runtime(
                    "malformed bytecode: unpatched break placeholder",
                ))
            }

            // ---- calls -----------------------------------------------
            OpCode::Call => {
                let argc = self.read_byte() as usize;
                let callee = self.peek(argc);
                self.call_value(callee, argc)?;
            }
            OpCode::Invoke => {
                let name = self.read_name()?;
                let argc = self.read_byte() as usize;
                self.invoke(&name, argc)?;
            }
            OpCode::InvokeThis => {
                let name = self.read_name()?;
                let argc = self.read_byte() as usize;
                self.invoke_self(&name, argc)?;
            }
            OpCode::Return => {
                let result = self.pop();
                let frame = self.frames.pop().expect("no active frame");
                self.close_upvalues(frame.base);
                self.stack.truncate(frame.base);
                if self.frames.len() == min_depth {
                    return Ok(Step::Done(result));
                }
                self.stack.push(result);
            }
            OpCode::Halt => {
                return Ok(Step::Done(Value::Null));
            }

            // ---- closures --------------------------------------------
            OpCode::Closure => {
                let constant = self.read_constant();
                let proto = match constant {
                    Constant::Func(proto) => proto,
                    _ => {
                        return Err(VeldError::runtime(
                            "malformed bytecode: closure without a function constant",
                        ))
                    }
                };
                let count = proto.upvalues.len();
                let mut upvalues = Vec::with_capacity(count);
                for _ in 0..count {
                    let is_local = self.read_byte() == 1;
                    let index = self.read_short() as usize;
                    let frame = self.frames.last().expect("no active frame");
                    let base = frame.base;
                    let enclosing = frame.closure;
                    if is_local {
                        upvalues.push(self.capture_upvalue(base + index));
                    } else {
                        match self.heap.get(enclosing) {
                            Object::Closure(c) => upvalues.push(c.upvalues[index]),
                            _ => return Err(VeldError::runtime("frame closure is corrupt")),
                        }
                    }
                }
                let module = self.frames.last().expect("no active frame").module;
                let closure = self.alloc(Object::Closure(Closure {
                    proto,
                    upvalues,
                    module,
                }));
                self.stack.push(Value::Obj(closure));
            }

            // ---- properties and indexing -----------------------------
            OpCode::PropertyGet => {
                let name = self.read_name()?;
                self.property_get(&name, false)?;
            }
            OpCode::PropertyGetSelf => {
                let name = self.read_name()?;
                self.property_get(&name, true)?;
            }
            OpCode::PropertySet => {
                let name = self.read_name()?;
                self.property_set(&name)?;
            }
            OpCode::IndexGet => {
                let will_assign = self.read_byte() == 1;
                self.index_get(will_assign)?;
            }
            OpCode::IndexGetRanged => {
                let will_assign = self.read_byte() == 1;
                self.index_get_ranged(will_assign)?;
            }
            OpCode::IndexSet => self.index_set()?,

            // ---- classes ---------------------------------------------
            OpCode::MakeClass => {
                let name = self.read_name()?;
                let key = self.name_key(&name);
                // reopening: an existing class of the same name is
                // extended instead of shadowed
                let module = self.frames.last().expect("no active frame").module;
                let existing = match self.heap.get(module) {
                    Object::Module(m) => m.exports.get(&key).map(|p| p.value),
                    _ => None,
                };
                let existing = existing
                    .or_else(|| self.globals.get(&key).map(|p| p.value))
                    .filter(|v| {
                        matches!(v, Value::Obj(r) if matches!(self.heap.get(*r), Object::Class(_)))
                    });
                match existing {
                    Some(class) => self.stack.push(class),
                    None => {
                        let name_ref = self.intern(&name);
                        self.protect(Value::Obj(name_ref));
                        let class = self.alloc(Object::Class(ClassObj::new(name_ref)));
                        self.unprotect(1);
                        self.stack.push(Value::Obj(class));
                    }
                }
            }
            OpCode::MakeMethod => {
                let name = self.read_name()?;
                let key = self.name_key(&name);
                let method = self.peek(0);
                let class = self.peek(1);
                let is_initializer = match method {
                    Value::Obj(r) => matches!(
                        self.heap.get(r),
                        Object::Closure(c) if c.proto.kind == FuncKind::Initializer
                    ),
                    _ => false,
                };
                let is_static = match method {
                    Value::Obj(r) => matches!(
                        self.heap.get(r),
                        Object::Closure(c) if c.proto.kind == FuncKind::Static
                    ),
                    _ => false,
                };
                if let Some(r) = class.as_obj() {
                    if let Object::Class(c) = self.heap.get_mut(r) {
                        if is_static {
                            c.static_methods.set_value(key, method);
                        } else {
                            c.methods.set_value(key, method);
                        }
                        if is_initializer {
                            c.constructor = method;
                        }
                    }
                }
                self.pop();
            }
            OpCode::ClassPropertyDefine => {
                let name = self.read_name()?;
                let is_static = self.read_byte() == 1;
                let key = self.name_key(&name);
                let value = self.peek(0);
                let class = self.peek(1);
                if let Some(r) = class.as_obj() {
                    if let Object::Class(c) = self.heap.get_mut(r) {
                        if is_static {
                            c.static_properties.set_value(key, value);
                        } else {
                            c.inst_properties.set_value(key, value);
                        }
                    }
                }
                self.pop();
            }
            OpCode::Inherit => {
                let subclass = self.peek(0);
                let superclass = self.peek(1);
                let (sub, sup) = match (subclass.as_obj(), superclass.as_obj()) {
                    (Some(sub), Some(sup))
                        if matches!(self.heap.get(sup), Object::Class(_))
                            && matches!(self.heap.get(sub), Object::Class(_)) =>
                    {
                        (sub, sup)
                    }
                    _ => {
                        return Err(VeldError::runtime(
                            "cannot inherit from non-class object",
                        ))
                    }
                };
                inherit_from(self, sub, sup);
                self.pop();
            }
            OpCode::GetSuper => {
                let name = self.read_name()?;
                let superclass = self.pop();
                let sup = match superclass.as_obj() {
                    Some(r) if matches!(self.heap.get(r), Object::Class(_)) => r,
                    _ => return Err(VeldError::runtime("'super' is not a class")),
                };
                // receiver (this) is now on top; bind against it
                self.bind_method(sup, &name)?;
            }
            OpCode::SuperInvoke => {
                let name = self.read_name()?;
                let argc = self.read_byte() as usize;
                let superclass = self.pop();
                let sup = match superclass.as_obj() {
                    Some(r) if matches!(self.heap.get(r), Object::Class(_)) => r,
                    _ => return Err(VeldError::runtime("'super' is not a class")),
                };
                let receiver = self.peek(argc);
                self.invoke_from_class(sup, &name, receiver, argc, true)?;
            }
            OpCode::SuperInvokeSelf => {
                let argc = self.read_byte() as usize;
                let superclass = self.pop();
                let sup = match superclass.as_obj() {
                    Some(r) if matches!(self.heap.get(r), Object::Class(_)) => r,
                    _ => return Err(VeldError::runtime("'super' is not a class")),
                };
                let receiver = self.peek(argc);
                self.invoke_from_class(sup, "constructor", receiver, argc, true)?;
            }
            OpCode::GetThis => {
                let base = self.frames.last().expect("no active frame").base;
                self.stack.push(self.stack[base]);
            }

            // ---- collections -----------------------------------------
            OpCode::MakeRange => self.op_make_range()?,
            OpCode::MakeArray => {
                let count = self.read_short() as usize;
                self.op_make_array(count)?;
            }
            OpCode::MakeDict => {
                let pairs = self.read_short() as usize;
                self.op_make_dict(pairs)?;
            }

            // ---- modules ---------------------------------------------
            OpCode::Import => {
                let operand = self.pop();
                let name = match self.heap.value_str(operand) {
                    Some(s) => s.to_string(),
                    None => {
                        return Err(VeldError::runtime("import expects a module name string"))
                    }
                };
                let module = self.import_module(&name)?;
                self.stack.push(module);
            }

            // ---- exceptions ------------------------------------------
            OpCode::Assert => {
                let message = self.pop();
                let expression = self.pop();
                if self.is_falsy(expression) {
                    let text = if message.is_null() {
                        "assertion failed".to_string()
                    } else {
                        self.stringify(message)
                    };
                    return Err(VeldError::Raise {
                        kind: crate::error::ExcKind::Assert,
                        message: text,
                    });
                }
            }
            OpCode::Throw => {
                // keep the exception on the stack while the trace is
                // captured; the allocations in there may collect
                let value = self.peek(0);
                if !self.is_exception_instance(value) {
                    return Err(VeldError::runtime("instance of Exception expected"));
                }
                if let Some(r) = value.as_obj() {
                    attach_stack_trace(self, r);
                }
                self.pop();
                return Err(VeldError::Thrown(value));
            }
            OpCode::TryPush => {
                let type_name = self.read_name()?;
                let catch_addr = self.read_short();
                let finally_addr = self.read_short();
                let class = if catch_addr != 0 {
                    let key = self.name_key(&type_name);
                    let module = self.frames.last().expect("no active frame").module;
                    let found = match self.heap.get(module) {
                        Object::Module(m) => m.exports.get(&key).map(|p| p.value),
                        _ => None,
                    };
                    let found = found
                        .or_else(|| self.globals.get(&key).map(|p| p.value))
                        .and_then(|v| {
                            v.as_obj()
                                .filter(|r| matches!(self.heap.get(*r), Object::Class(_)))
                        });
                    Some(found.unwrap_or(self.exceptions.base))
                } else {
                    None
                };
                let stack_len = self.stack.len();
                self.push_handler(Handler {
                    class,
                    catch_addr,
                    finally_addr,
                    stack_len,
                })?;
            }
            OpCode::TryPop => {
                self.frames
                    .last_mut()
                    .expect("no active frame")
                    .handlers
                    .pop();
            }
            OpCode::TryPublish => {
                let exception = self.pop();
                self.frames
                    .last_mut()
                    .expect("no active frame")
                    .handlers
                    .pop();
                return Err(VeldError::Thrown(exception));
            }

            // ---- misc ------------------------------------------------
            OpCode::Echo => {
                let value = self.pop();
                let mut text = self.stringify(value);
                text.push('\n');
                self.write_out(&text);
            }
            OpCode::Stringify => {
                let value = self.peek(0);
                if self.heap.value_str(value).is_none() {
                    let text = self.stringify(value);
                    let obj = self.new_string(text);
                    self.pop();
                    self.stack.push(Value::Obj(obj));
                }
            }
            OpCode::Typeof => {
                let value = self.pop();
                let name = self.type_name(value);
                let obj = self.intern_value(&name);
                self.stack.push(obj);
            }
            OpCode::InstanceOf => {
                let class = self.pop();
                let value = self.pop();
                let target = match class.as_obj() {
                    Some(r) if matches!(self.heap.get(r), Object::Class(_)) => r,
                    _ => {
                        return Err(VeldError::runtime(
                            "invalid use of 'instanceof' on non-class",
                        ))
                    }
                };
                let result = match self.class_of(value) {
                    Some(c) => is_instance_of(self, c, target),
                    None => false,
                };
                self.stack.push(Value::Bool(result));
            }
            OpCode::Switch => {
                let constant = self.read_constant();
                let table = match constant {
                    Constant::Switch(table) => table,
                    _ => {
                        return Err(VeldError::runtime(
                            "malformed bytecode: switch without a table constant",
                        ))
                    }
                };
                let value = self.peek(0);
                let offset = self.switch_target(&table, value);
                self.frames.last_mut().expect("no active frame").ip += offset as usize;
                self.pop();
            }
        }
        Ok(Step::Continue)
    }

    /// Pick the relative jump for a switch operand: case hit, default,
    /// or exit.
    fn switch_target(&self, table: &veld_bytecode::SwitchTable, value: Value) -> u16 {
        use veld_bytecode::CaseKeyRef;
        let key = match value {
            Value::Num(n) => Some(CaseKeyRef::number(n)),
            Value::Bool(b) => Some(CaseKeyRef::Bool(b)),
            Value::Obj(r) => self.heap.try_str(r).map(|s| CaseKeyRef::Str(s.as_str())),
            _ => None,
        };
        if let Some(key) = key {
            if let Some(offset) = table.lookup(key) {
                return offset;
            }
        }
        table.default_offset.unwrap_or(table.exit_offset)
    }
}
