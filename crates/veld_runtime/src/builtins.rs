//! The small built-in surface: a few process-wide natives plus the `os`
//! module registered through the standard descriptor shape. The full
//! method catalogue on primitive types lives outside the core.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::value::Value;
use crate::error::VeldError;
use crate::modules::{FuncDesc, ModuleDesc};
use crate::runtime::{Arguments, Runtime};

pub(crate) fn install(rt: &mut Runtime) {
    rt.define_native("print", native_print);
    rt.define_native("println", native_println);
    rt.define_native("clock", native_clock);
    rt.define_native("gc", native_gc);
}

fn native_print(rt: &mut Runtime, args: &Arguments) -> Result<Value, VeldError> {
    let mut out = String::new();
    for (i, arg) in args.args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&rt.stringify(*arg));
    }
    rt.write_out(&out);
    Ok(Value::Null)
}

fn native_println(rt: &mut Runtime, args: &Arguments) -> Result<Value, VeldError> {
    native_print(rt, args)?;
    rt.write_out("\n");
    Ok(Value::Null)
}

/// Seconds since the epoch, fractional.
fn native_clock(_rt: &mut Runtime, args: &Arguments) -> Result<Value, VeldError> {
    args.check_count("clock", 0)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| VeldError::runtime("system clock before epoch"))?;
    Ok(Value::Num(now.as_secs_f64()))
}

/// Force a collection; yields the number of live objects afterwards.
fn native_gc(rt: &mut Runtime, args: &Arguments) -> Result<Value, VeldError> {
    args.check_count("gc", 0)?;
    rt.collect_garbage();
    Ok(Value::Num(rt.heap().live_count() as f64))
}

// ---- the `os` built-in module ----------------------------------------

fn os_platform(rt: &mut Runtime, args: &Arguments) -> Result<Value, VeldError> {
    args.check_count("platform", 0)?;
    Ok(rt.intern_value(std::env::consts::OS))
}

fn os_time(_rt: &mut Runtime, args: &Arguments) -> Result<Value, VeldError> {
    args.check_count("time", 0)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| VeldError::runtime("system clock before epoch"))?;
    Ok(Value::Num(now.as_secs() as f64))
}

static OS_FUNCTIONS: &[FuncDesc] = &[
    FuncDesc {
        name: "platform",
        is_static: false,
        func: os_platform,
    },
    FuncDesc {
        name: "time",
        is_static: false,
        func: os_time,
    },
];

static OS_MODULE: ModuleDesc = ModuleDesc {
    name: "os",
    fields: &[],
    functions: OS_FUNCTIONS,
    classes: &[],
    preload: None,
    unload: None,
};

pub(crate) fn builtin_modules() -> &'static [ModuleDesc] {
    std::slice::from_ref(&OS_MODULE)
}
