//! veld_bytecode: compiled code representation.
//!
//! Opcodes, the instruction encoding (8-bit code slots with a source
//! line, 16-bit operands spread over consecutive non-op slots), the
//! `Blob` container with its two constant pools, and the disassembler.
mod blob;
mod debug;
mod inst;

pub use blob::{Blob, CaseKey, CaseKeyRef, Constant, FuncKind, FuncProto, SwitchTable, UpvalDesc};
pub use debug::{disassemble_blob, disassemble_instruction};
pub use inst::{instruction_len, Instruction, OpCode};
