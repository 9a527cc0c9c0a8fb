//! Module registry and the import machinery.
//!
//! Built-in modules register through a static descriptor shape; script
//! modules are compiled from sibling `.veld` files at run time and
//! cached in the loaded-modules table. Importing re-enters the VM to
//! run the module body; its global definitions become the export table.

use crate::core::object::{ClassObj, Closure, ModuleObj, NativeFn, NativeObj, Object};
use crate::core::table::{Property, Table};
use crate::core::value::{ObjRef, Value};
use crate::error::VeldError;
use crate::runtime::Runtime;

use veld_bytecode::FuncKind;

/// A value-producing field: invoked on every access (function field).
pub struct FieldDesc {
    pub name: &'static str,
    pub is_static: bool,
    pub func: NativeFn,
}

pub struct FuncDesc {
    pub name: &'static str,
    pub is_static: bool,
    pub func: NativeFn,
}

/// A class exported by a native module.
pub struct ClassDesc {
    pub name: &'static str,
    pub fields: &'static [FieldDesc],
    pub functions: &'static [FuncDesc],
}

/// The export descriptor every native module registers through.
pub struct ModuleDesc {
    pub name: &'static str,
    pub fields: &'static [FieldDesc],
    pub functions: &'static [FuncDesc],
    pub classes: &'static [ClassDesc],
    pub preload: Option<fn(&mut Runtime)>,
    pub unload: Option<fn(&mut Runtime)>,
}

impl Runtime {
    /// Resolve `import name`: loaded-modules cache, then the built-in
    /// registry, then a sibling script file.
    pub(crate) fn import_module(&mut self, name: &str) -> Result<Value, VeldError> {
        let key = self.name_key(name);
        if let Some(found) = self.modules.get(&key).map(|p| p.value) {
            return Ok(found);
        }
        if let Some(desc) = crate::builtins::builtin_modules()
            .iter()
            .find(|d| d.name == name)
        {
            let module = self.register_native_module(desc);
            return Ok(Value::Obj(module));
        }
        self.import_script_module(name)
    }

    /// Instantiate a native module from its descriptor and cache it.
    pub fn register_native_module(&mut self, desc: &ModuleDesc) -> ObjRef {
        let name_ref = self.intern(desc.name);
        self.protect(Value::Obj(name_ref));
        let module = self.alloc(Object::Module(ModuleObj {
            name: name_ref,
            path: None,
            exports: Table::new(),
        }));
        self.protect(Value::Obj(module));
        for field in desc.fields {
            let key = self.name_key(field.name);
            let native = self.native_value(field.name, field.func, FuncKind::Function);
            if let Object::Module(m) = self.heap.get_mut(module) {
                m.exports.set(key, Property::func_field(native));
            }
        }
        for func in desc.functions {
            let kind = if func.is_static {
                FuncKind::Static
            } else {
                FuncKind::Function
            };
            let key = self.name_key(func.name);
            let native = self.native_value(func.name, func.func, kind);
            if let Object::Module(m) = self.heap.get_mut(module) {
                m.exports.set_value(key, native);
            }
        }
        for class_desc in desc.classes {
            let class = self.register_native_class(class_desc);
            let key = self.name_key(class_desc.name);
            if let Object::Module(m) = self.heap.get_mut(module) {
                m.exports.set_value(key, Value::Obj(class));
            }
        }
        let key = self.name_key(desc.name);
        self.modules.set_value(key, Value::Obj(module));
        self.unprotect(2);
        if let Some(preload) = desc.preload {
            preload(self);
        }
        module
    }

    fn register_native_class(&mut self, desc: &ClassDesc) -> ObjRef {
        let name_ref = self.intern(desc.name);
        self.protect(Value::Obj(name_ref));
        let class = self.alloc(Object::Class(ClassObj::new(name_ref)));
        self.protect(Value::Obj(class));
        for field in desc.fields {
            let key = self.name_key(field.name);
            let native = self.native_value(field.name, field.func, FuncKind::Method);
            if let Object::Class(c) = self.heap.get_mut(class) {
                let table = if field.is_static {
                    &mut c.static_properties
                } else {
                    &mut c.inst_properties
                };
                table.set(key, Property::func_field(native));
            }
        }
        for func in desc.functions {
            let kind = if func.is_static {
                FuncKind::Static
            } else {
                FuncKind::Method
            };
            let key = self.name_key(func.name);
            let native = self.native_value(func.name, func.func, kind);
            if let Object::Class(c) = self.heap.get_mut(class) {
                let table = if func.is_static {
                    &mut c.static_methods
                } else {
                    &mut c.methods
                };
                table.set_value(key, native);
            }
        }
        self.unprotect(2);
        class
    }

    fn native_value(&mut self, name: &str, func: NativeFn, kind: FuncKind) -> Value {
        let native = self.alloc(Object::Native(NativeObj {
            name: name.to_string(),
            func,
            kind,
        }));
        Value::Obj(native)
    }

    /// Compile and run `<name>.veld`; the module's global definitions
    /// become its exports.
    fn import_script_module(&mut self, name: &str) -> Result<Value, VeldError> {
        let path = format!("{name}.veld");
        let source = std::fs::read_to_string(&path)
            .map_err(|_| VeldError::io(format!("cannot open module '{name}'")))?;
        let proto = veld_compiler::compile(&source, &path).map_err(|diags| {
            let first = diags
                .first()
                .map(|d| d.message.clone())
                .unwrap_or_else(|| "compile error".to_string());
            VeldError::Raise {
                kind: crate::error::ExcKind::Syntax,
                message: format!("module '{name}': {first}"),
            }
        })?;
        let name_ref = self.intern(name);
        self.protect(Value::Obj(name_ref));
        let module = self.alloc(Object::Module(ModuleObj {
            name: name_ref,
            path: Some(path),
            exports: Table::new(),
        }));
        self.protect(Value::Obj(module));
        // cache before running so import cycles terminate
        let key = self.name_key(name);
        self.modules.set_value(key, Value::Obj(module));
        let closure = self.alloc(Object::Closure(Closure {
            proto,
            upvalues: Vec::new(),
            module,
        }));
        self.unprotect(2);
        self.stack.push(Value::Obj(closure));
        let depth = self.frames.len();
        self.call_closure(closure, 0)?;
        self.execute(depth)?;
        Ok(Value::Obj(module))
    }
}
