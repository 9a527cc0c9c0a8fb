//! Runtime error plumbing.

use veld_syntax::Diagnostic;

use crate::core::value::Value;

/// Which built-in exception class a raised error instantiates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExcKind {
    Exception,
    Assert,
    Syntax,
    Io,
    Os,
    Argument,
}

/// An error travelling through the VM. `Raise` becomes an exception
/// instance at the throw site; `Thrown` is an instance already in
/// flight, unwinding through nested interpreter invocations.
#[derive(Debug)]
pub enum VeldError {
    Raise { kind: ExcKind, message: String },
    Thrown(Value),
}

impl VeldError {
    pub fn runtime(message: impl Into<String>) -> VeldError {
        VeldError::Raise {
            kind: ExcKind::Exception,
            message: message.into(),
        }
    }

    pub fn argument(message: impl Into<String>) -> VeldError {
        VeldError::Raise {
            kind: ExcKind::Argument,
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> VeldError {
        VeldError::Raise {
            kind: ExcKind::Io,
            message: message.into(),
        }
    }
}

/// Outcome of `Runtime::interpret`: compile failure with its collected
/// diagnostics, or a rendered runtime failure (uncaught exception).
#[derive(Debug)]
pub enum ExecError {
    Compile(Vec<Diagnostic>),
    Runtime(String),
}
