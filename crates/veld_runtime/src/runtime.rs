//! The interpreter state: stack, frames, heap, globals and modules.

use std::rc::Rc;

use smallvec::SmallVec;

use veld_bytecode::{disassemble_blob, Constant, FuncKind, FuncProto};
use veld_compiler::CompileOptions;

use crate::core::heap::{Heap, DEFAULT_GC_START};
use crate::core::object::{
    Array, Closure, ModuleObj, NativeObj, Object, StrObj,
};
use crate::core::table::{Table, TableKey};
use crate::core::value::{format_number, hash_string, ObjRef, Value};
use crate::error::{ExcKind, ExecError, VeldError};
use crate::exceptions::ExceptionKinds;

/// Upper bound on call depth; recursion past this raises instead of
/// exhausting the host stack.
pub const MAX_FRAMES: usize = 4096;
/// Per-frame bound on registered exception handlers.
pub const MAX_HANDLERS: usize = 16;

/// Interpreter configuration, fed by the CLI flags.
pub struct Config {
    /// Assigning an undeclared global raises instead of defining it.
    pub strict_globals: bool,
    pub enable_warnings: bool,
    /// Initial collection threshold in bytes; 0 disables the collector.
    pub gc_start: usize,
    pub dump_bytecode: bool,
    pub trace_execution: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            strict_globals: false,
            enable_warnings: false,
            gc_start: DEFAULT_GC_START,
            dump_bytecode: false,
            trace_execution: false,
        }
    }
}

/// A registered `try` handler.
#[derive(Clone, Copy)]
pub(crate) struct Handler {
    pub class: Option<ObjRef>,
    pub catch_addr: u16,
    pub finally_addr: u16,
    /// Operand-stack height at registration; restored before entering
    /// the handler.
    pub stack_len: usize,
}

pub(crate) struct CallFrame {
    pub closure: ObjRef,
    pub proto: Rc<FuncProto>,
    pub module: ObjRef,
    pub ip: usize,
    pub base: usize,
    pub handlers: SmallVec<[Handler; 4]>,
    /// Values pushed through `protect` and not yet released.
    pub protect: usize,
}

/// Argument view handed to native functions.
pub struct Arguments {
    pub receiver: Value,
    pub args: SmallVec<[Value; 8]>,
    pub user_ptr: Option<Rc<dyn std::any::Any>>,
}

impl Arguments {
    pub fn count(&self) -> usize {
        self.args.len()
    }

    pub fn get(&self, i: usize) -> Value {
        self.args.get(i).copied().unwrap_or(Value::Null)
    }

    /// Exact-arity check, raising `ArgumentError` through the standard
    /// path.
    pub fn check_count(&self, name: &str, expected: usize) -> Result<(), VeldError> {
        if self.args.len() != expected {
            return Err(VeldError::argument(format!(
                "{name}() expects {expected} arguments, {} given",
                self.args.len()
            )));
        }
        Ok(())
    }
}

pub struct Runtime {
    pub(crate) heap: Heap,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    /// Upvalue objects still pointing into live stack slots.
    pub(crate) open_upvalues: Vec<ObjRef>,
    /// Process-wide globals: natives, the exception hierarchy, anything
    /// defined outside a module.
    pub(crate) globals: Table,
    /// Loaded-modules table: module name string -> module object.
    pub(crate) modules: Table,
    pub(crate) exceptions: ExceptionKinds,
    /// Module whose top-level code is currently being set up.
    pub(crate) top_module: ObjRef,
    pub config: Config,
    capture: Option<String>,
}

impl Default for Runtime {
    fn default() -> Runtime {
        Runtime::new()
    }
}

impl Runtime {
    pub fn new() -> Runtime {
        Runtime::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Runtime {
        let mut heap = Heap::new(config.gc_start);
        // bootstrap: nothing is rooted yet, so allocate the root module
        // and the exception hierarchy with the collector out of the way
        let name = heap.intern_unchecked("<main>");
        let top_module = heap.insert(Object::Module(ModuleObj {
            name,
            path: None,
            exports: Table::new(),
        }));
        let mut rt = Runtime {
            heap,
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            globals: Table::new(),
            modules: Table::new(),
            exceptions: ExceptionKinds::placeholder(),
            top_module,
            config,
            capture: None,
        };
        rt.heap.pin(top_module);
        crate::exceptions::install(&mut rt);
        crate::builtins::install(&mut rt);
        rt
    }

    // ---- output -------------------------------------------------------

    /// Capture echo/print output instead of writing to stdout.
    pub fn capture_output(&mut self) {
        self.capture = Some(String::new());
    }

    pub fn take_output(&mut self) -> String {
        self.capture.take().unwrap_or_default()
    }

    pub(crate) fn write_out(&mut self, text: &str) {
        match &mut self.capture {
            Some(buf) => buf.push_str(text),
            None => print!("{text}"),
        }
    }

    // ---- allocation and GC protocol ----------------------------------

    /// The single allocation entry point: run the collection check, then
    /// link the object into the live set. Collection happens strictly
    /// before insertion, so an in-flight collection can never reclaim
    /// the object being created.
    pub fn alloc(&mut self, obj: Object) -> ObjRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.insert(obj)
    }

    /// Pin a just-allocated value by pushing it onto the evaluation
    /// stack; the current frame counts how many are held. Required
    /// around any multi-allocation sequence whose earlier objects are
    /// not yet reachable from a root. Outside any frame the heap's
    /// stash plays the same role.
    pub fn protect(&mut self, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.protect += 1;
            self.stack.push(value);
        } else {
            self.heap.stash_push(value);
        }
    }

    /// Release the last `n` protected values.
    pub fn unprotect(&mut self, n: usize) {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.protect = frame.protect.saturating_sub(n);
                self.stack.truncate(self.stack.len().saturating_sub(n));
            }
            None => {
                for _ in 0..n {
                    self.heap.stash_pop();
                }
            }
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    // ---- strings ------------------------------------------------------

    /// Canonical copy path: equal content always yields the same object.
    pub fn intern(&mut self, s: &str) -> ObjRef {
        let hash = hash_string(s);
        if let Some(r) = self.heap.find_interned(s, hash) {
            return r;
        }
        let r = self.alloc(Object::Str(StrObj { s: s.into(), hash }));
        self.heap.register_interned(r);
        r
    }

    pub fn intern_value(&mut self, s: &str) -> Value {
        Value::Obj(self.intern(s))
    }

    /// Allocate a string without interning (results of concatenation and
    /// slicing). Equality still works by byte comparison.
    pub fn new_string(&mut self, s: String) -> ObjRef {
        let hash = hash_string(&s);
        self.alloc(Object::Str(StrObj {
            s: s.into_boxed_str(),
            hash,
        }))
    }

    // ---- table keys ---------------------------------------------------

    /// Build a table key from a value; dictionary and property keys are
    /// restricted to string/number/bool. String keys are canonicalized
    /// through the interner.
    pub fn table_key(&mut self, v: Value) -> Result<TableKey, VeldError> {
        match v {
            Value::Num(n) => Ok(TableKey::num(n)),
            Value::Bool(b) => Ok(TableKey::Bool(b)),
            Value::Obj(r) => match self.heap.get(r) {
                Object::Str(s) => {
                    if let Some(interned) = self.heap.find_interned(s.as_str(), s.hash) {
                        Ok(self.heap.str_key(interned))
                    } else {
                        let content = s.as_str().to_string();
                        let interned = self.intern(&content);
                        Ok(self.heap.str_key(interned))
                    }
                }
                _ => Err(VeldError::runtime(
                    "dictionary key must be one of string, number or boolean",
                )),
            },
            _ => Err(VeldError::runtime(
                "dictionary key must be one of string, number or boolean",
            )),
        }
    }

    /// Key for a name that is known to be interned already.
    pub(crate) fn name_key(&mut self, name: &str) -> TableKey {
        let r = self.intern(name);
        self.heap.str_key(r)
    }

    // ---- value semantics ---------------------------------------------

    /// Falsiness: `false`, `null`, `empty`, negative numbers, and empty
    /// strings/arrays/dictionaries.
    pub fn is_falsy(&self, v: Value) -> bool {
        match v {
            Value::Bool(b) => !b,
            Value::Null | Value::Empty => true,
            Value::Num(n) => n < 0.0,
            Value::Obj(r) => match self.heap.get(r) {
                Object::Str(s) => s.is_empty(),
                Object::Array(a) => a.items.is_empty(),
                Object::Dict(d) => d.keys.is_empty(),
                _ => false,
            },
        }
    }

    /// Structural equality: identity first, then byte comparison for
    /// strings and element-wise comparison for arrays.
    pub fn values_equal(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Null, Value::Null) | (Value::Empty, Value::Empty) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Num(x), Value::Num(y)) => x == y,
            (Value::Obj(x), Value::Obj(y)) => {
                if x == y {
                    return true;
                }
                match (self.heap.get(x), self.heap.get(y)) {
                    (Object::Str(sa), Object::Str(sb)) => sa.as_str() == sb.as_str(),
                    (Object::Array(aa), Object::Array(ab)) => {
                        aa.items.len() == ab.items.len()
                            && aa
                                .items
                                .iter()
                                .zip(&ab.items)
                                .all(|(x, y)| self.values_equal(*x, *y))
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    pub fn type_name(&self, v: Value) -> String {
        match v {
            Value::Empty => "empty".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(_) => "boolean".to_string(),
            Value::Num(_) => "number".to_string(),
            Value::Obj(r) => match self.heap.get(r) {
                Object::Instance(inst) => {
                    let class = match self.heap.get(inst.class) {
                        Object::Class(c) => c,
                        _ => return "instance".to_string(),
                    };
                    self.heap.str_value(class.name).to_string()
                }
                other => other.type_name().to_string(),
            },
        }
    }

    /// Render a value for echo/print/stringify.
    pub fn stringify(&self, v: Value) -> String {
        match v {
            Value::Empty => "empty".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => format_number(n),
            Value::Obj(r) => self.stringify_object(r),
        }
    }

    fn stringify_object(&self, r: ObjRef) -> String {
        match self.heap.get(r) {
            Object::Str(s) => s.as_str().to_string(),
            Object::Array(a) => {
                let mut out = String::from("[");
                for (i, item) in a.items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&self.stringify_quoted(*item));
                }
                out.push(']');
                out
            }
            Object::Dict(d) => {
                let mut out = String::from("{");
                for (i, key) in d.keys.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&self.stringify(*key));
                    out.push_str(": ");
                    let prop = self
                        .table_key_ref(*key)
                        .and_then(|k| d.table.get(&k))
                        .map(|p| p.value)
                        .unwrap_or(Value::Null);
                    out.push_str(&self.stringify_quoted(prop));
                }
                out.push('}');
                out
            }
            Object::Range(rg) => format!("{}..{}", format_number(rg.lower), format_number(rg.upper)),
            Object::File(f) => format!("<file {}>", f.path),
            Object::UserData(u) => format!("<userdata {}>", u.name),
            Object::Upvalue(_) => "<upvalue>".to_string(),
            Object::Class(c) => format!("<class {}>", self.heap.str_value(c.name)),
            Object::Instance(inst) => {
                let class = match self.heap.get(inst.class) {
                    Object::Class(c) => self.heap.str_value(c.name),
                    _ => "?",
                };
                format!("<instance of {class}>")
            }
            Object::Closure(c) => {
                if c.proto.name.is_empty() {
                    "<function>".to_string()
                } else {
                    format!("<function {}>", c.proto.name)
                }
            }
            Object::Bound(b) => self.stringify_object(b.method),
            Object::Native(n) => format!("<native function {}>", n.name),
            Object::Module(m) => format!("<module {}>", self.heap.str_value(m.name)),
        }
    }

    fn stringify_quoted(&self, v: Value) -> String {
        if let Some(s) = self.heap.value_str(v) {
            return format!("{s:?}");
        }
        self.stringify(v)
    }

    /// Read-only key construction for rendering; never interns.
    fn table_key_ref(&self, v: Value) -> Option<TableKey> {
        match v {
            Value::Num(n) => Some(TableKey::num(n)),
            Value::Bool(b) => Some(TableKey::Bool(b)),
            Value::Obj(r) => match self.heap.get(r) {
                Object::Str(s) => self
                    .heap
                    .find_interned(s.as_str(), s.hash)
                    .map(|i| self.heap.str_key(i)),
                _ => None,
            },
            _ => None,
        }
    }

    // ---- globals and natives -----------------------------------------

    pub fn define_global(&mut self, name: &str, value: Value) {
        let key = self.name_key(name);
        self.globals.set_value(key, value);
    }

    pub fn global(&mut self, name: &str) -> Option<Value> {
        let key = self.name_key(name);
        self.globals.get(&key).map(|p| p.value)
    }

    pub fn define_native(&mut self, name: &str, func: crate::core::object::NativeFn) {
        let native = self.alloc(Object::Native(NativeObj {
            name: name.to_string(),
            func,
            kind: FuncKind::Function,
        }));
        self.protect(Value::Obj(native));
        self.define_global(name, Value::Obj(native));
        self.unprotect(1);
    }

    // ---- execution entry points --------------------------------------

    /// Compile and run `source` as the main module.
    pub fn interpret(&mut self, source: &str, path: &str) -> Result<Value, ExecError> {
        self.interpret_with(source, path, CompileOptions::default())
    }

    pub fn interpret_with(
        &mut self,
        source: &str,
        path: &str,
        options: CompileOptions,
    ) -> Result<Value, ExecError> {
        let proto =
            veld_compiler::compile_with(source, path, options).map_err(ExecError::Compile)?;
        if self.config.dump_bytecode {
            let text = disassemble_blob(&proto.blob, path);
            self.write_out(&text);
        }
        self.run_proto(proto, self.top_module)
    }

    /// Wrap a compiled top-level proto in a closure and run it to
    /// completion.
    pub(crate) fn run_proto(
        &mut self,
        proto: Rc<FuncProto>,
        module: ObjRef,
    ) -> Result<Value, ExecError> {
        let closure = self.alloc(Object::Closure(Closure {
            proto,
            upvalues: Vec::new(),
            module,
        }));
        self.stack.push(Value::Obj(closure));
        let depth = self.frames.len();
        if let Err(err) = self.call_value(Value::Obj(closure), 0) {
            let rendered = self.render_error(err);
            self.reset_after_abort(depth);
            return Err(ExecError::Runtime(rendered));
        }
        match self.execute(depth) {
            Ok(value) => Ok(value),
            Err(err) => {
                let rendered = self.render_error(err);
                self.reset_after_abort(depth);
                Err(ExecError::Runtime(rendered))
            }
        }
    }

    /// Re-enter the VM from native code or the import machinery: call
    /// `callee` with `args`, running nested frames to completion.
    pub fn call_function(&mut self, callee: Value, args: &[Value]) -> Result<Value, VeldError> {
        self.stack.push(callee);
        for &arg in args {
            self.stack.push(arg);
        }
        let depth = self.frames.len();
        self.call_value(callee, args.len())?;
        if self.frames.len() > depth {
            self.execute(depth)
        } else {
            // native callees complete synchronously
            Ok(self.stack.pop().unwrap_or(Value::Null))
        }
    }

    /// Unwound past the outermost frame of a run: report and clear state
    /// so the runtime stays usable (REPL).
    fn reset_after_abort(&mut self, depth: usize) {
        self.frames.truncate(depth);
        let base = self.frames.last().map(|f| f.base).unwrap_or(0);
        self.stack.truncate(base);
        self.open_upvalues.clear();
    }

    /// Render an uncaught error: message plus a bounded number of stack
    /// trace lines.
    pub(crate) fn render_error(&mut self, err: VeldError) -> String {
        let value = match err {
            VeldError::Thrown(v) => v,
            VeldError::Raise { kind, message } => {
                match self.make_exception(kind, &message) {
                    Ok(v) => v,
                    Err(_) => return format!("unhandled Exception: {message}"),
                }
            }
        };
        let mut out = String::from("unhandled ");
        out.push_str(&self.type_name(value));
        if let Some(message) = self.exception_property(value, "message") {
            out.push_str(": ");
            out.push_str(&self.stringify(message));
        }
        if let Some(trace) = self.exception_property(value, "stacktrace") {
            if let Value::Obj(r) = trace {
                if let Object::Array(arr) = self.heap.get(r) {
                    let lines: Vec<String> = arr
                        .items
                        .iter()
                        .rev()
                        .map(|item| format!("  {}", self.stringify(*item)))
                        .collect();
                    if !lines.is_empty() {
                        out.push_str("\nstacktrace:\n");
                        out.push_str(&lines.join("\n"));
                    }
                }
            }
        }
        out
    }

    fn exception_property(&mut self, value: Value, name: &str) -> Option<Value> {
        let r = value.as_obj()?;
        let key = self.name_key(name);
        match self.heap.get(r) {
            Object::Instance(inst) => inst.properties.get(&key).map(|p| p.value),
            _ => None,
        }
    }

    // ---- misc helpers -------------------------------------------------

    /// Resolve a pool constant to a runtime value; strings go through
    /// the interner so every constant-derived string is canonical.
    pub(crate) fn resolve_constant(&mut self, constant: &Constant) -> Value {
        match constant {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Number(n) => Value::Num(*n),
            Constant::Str(s) => {
                let r = self.intern(s);
                Value::Obj(r)
            }
            Constant::Func(_) | Constant::Switch(_) => Value::Null,
        }
    }

    pub(crate) fn make_array(&mut self, items: Vec<Value>) -> ObjRef {
        self.alloc(Object::Array(Array { items }))
    }

    /// Raise an instance of the built-in hierarchy: build the instance,
    /// attach message/position/trace, and hand it to propagation.
    pub(crate) fn make_exception(
        &mut self,
        kind: ExcKind,
        message: &str,
    ) -> Result<Value, VeldError> {
        crate::exceptions::make_instance(self, kind, message)
    }
}
