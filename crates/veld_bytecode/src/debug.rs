//! Blob disassembler, used by the CLI `--dump` flag and by tests.

use std::fmt::Write;

use crate::blob::{Blob, Constant};
use crate::inst::{instruction_len, OpCode};

fn write_constant(out: &mut String, constant: &Constant) {
    match constant {
        Constant::Null => out.push_str("null"),
        Constant::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Constant::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Constant::Str(s) => {
            let _ = write!(out, "{s:?}");
        }
        Constant::Func(proto) => {
            let name = if proto.name.is_empty() {
                "<anonymous>"
            } else {
                proto.name.as_str()
            };
            let _ = write!(out, "<function {name}/{}>", proto.arity);
        }
        Constant::Switch(sw) => {
            let _ = write!(out, "<switch {} cases>", sw.cases.len());
        }
    }
}

/// Render the instruction at `ip`; returns the next instruction offset.
pub fn disassemble_instruction(out: &mut String, blob: &Blob, ip: usize) -> usize {
    let inst = blob.code[ip];
    let _ = write!(out, "{ip:04} ");
    if ip > 0 && blob.code[ip - 1].line == inst.line {
        out.push_str("   | ");
    } else {
        let _ = write!(out, "{:4} ", inst.line);
    }
    let op = match OpCode::from_u8(inst.code) {
        Some(op) if inst.is_op => op,
        _ => {
            let _ = writeln!(out, "(stray operand {:#04x})", inst.code);
            return ip + 1;
        }
    };
    let oplen = instruction_len(blob, ip);
    let _ = write!(out, "{:<16}", op.name());
    match op {
        OpCode::PushConstant | OpCode::Switch => {
            let idx = blob.read_short(ip + 1) as usize;
            let _ = write!(out, " {idx} ; ");
            write_constant(out, &blob.constants[idx]);
        }
        OpCode::GlobalDefine
        | OpCode::GlobalGet
        | OpCode::GlobalSet
        | OpCode::PropertyGet
        | OpCode::PropertyGetSelf
        | OpCode::PropertySet
        | OpCode::MakeClass
        | OpCode::MakeMethod
        | OpCode::GetSuper => {
            let idx = blob.read_short(ip + 1) as usize;
            let _ = write!(out, " {idx} ; ");
            write_constant(out, &blob.constants[idx]);
        }
        OpCode::LocalGet
        | OpCode::LocalSet
        | OpCode::ArgGet
        | OpCode::ArgSet
        | OpCode::UpvalueGet
        | OpCode::UpvalueSet
        | OpCode::PopN
        | OpCode::MakeArray
        | OpCode::MakeDict => {
            let _ = write!(out, " {}", blob.read_short(ip + 1));
        }
        OpCode::Jump | OpCode::JumpIfFalse | OpCode::BreakPlaceholder => {
            let offset = blob.read_short(ip + 1) as usize;
            let _ = write!(out, " {} -> {}", offset, ip + 3 + offset);
        }
        OpCode::Loop => {
            let offset = blob.read_short(ip + 1) as usize;
            let _ = write!(out, " {} -> {}", offset, ip + 3 - offset);
        }
        OpCode::Call | OpCode::SuperInvokeSelf => {
            let _ = write!(out, " {}", blob.code[ip + 1].code);
        }
        OpCode::IndexGet | OpCode::IndexGetRanged => {
            let _ = write!(out, " willassign={}", blob.code[ip + 1].code);
        }
        OpCode::Invoke | OpCode::InvokeThis | OpCode::SuperInvoke => {
            let idx = blob.read_short(ip + 1) as usize;
            let argc = blob.code[ip + 3].code;
            let _ = write!(out, " {idx} argc={argc} ; ");
            write_constant(out, &blob.constants[idx]);
        }
        OpCode::ClassPropertyDefine => {
            let idx = blob.read_short(ip + 1) as usize;
            let is_static = blob.code[ip + 3].code;
            let _ = write!(out, " {idx} static={is_static} ; ");
            write_constant(out, &blob.constants[idx]);
        }
        OpCode::ArgOptional => {
            let slot = blob.read_short(ip + 1);
            let didx = blob.read_short(ip + 3) as usize;
            let _ = write!(out, " slot={slot} default={didx} ; ");
            write_constant(out, &blob.defaults[didx]);
        }
        OpCode::TryPush => {
            let idx = blob.read_short(ip + 1) as usize;
            let addr = blob.read_short(ip + 3);
            let finaddr = blob.read_short(ip + 5);
            let _ = write!(out, " {idx} catch={addr} finally={finaddr} ; ");
            write_constant(out, &blob.constants[idx]);
        }
        OpCode::Closure => {
            let idx = blob.read_short(ip + 1) as usize;
            let _ = write!(out, " {idx} ; ");
            write_constant(out, &blob.constants[idx]);
            if let Constant::Func(proto) = &blob.constants[idx] {
                for (n, uv) in proto.upvalues.iter().enumerate() {
                    let base = ip + 3 + n * 3;
                    let is_local = blob.code[base].code == 1;
                    let index = blob.read_short(base + 1);
                    let which = if is_local { "local" } else { "upvalue" };
                    let _ = write!(out, "\n        |    capture {which} {index}");
                }
            }
        }
        _ => {}
    }
    out.push('\n');
    ip + 1 + oplen
}

/// Render a whole blob, nested function protos included.
pub fn disassemble_blob(blob: &Blob, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {name} ==");
    let mut ip = 0;
    while ip < blob.code.len() {
        ip = disassemble_instruction(&mut out, blob, ip);
    }
    for constant in &blob.constants {
        if let Constant::Func(proto) = constant {
            let label = if proto.name.is_empty() {
                "<anonymous>".to_string()
            } else {
                proto.name.clone()
            };
            out.push('\n');
            out.push_str(&disassemble_blob(&proto.blob, &label));
        }
    }
    out
}
