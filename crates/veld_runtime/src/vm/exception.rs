//! Exception propagation.
//!
//! On a throw the machinery walks frames innermost to outermost; within
//! each frame it scans the handler stack for a class-matching catch or a
//! pending finally. The first match restores the recorded stack height,
//! pushes the exception (plus the still-propagating flag for finally)
//! and redirects the instruction cursor. Unwinding past `min_depth`
//! hands the exception back to the caller of that VM invocation —
//! at the outermost level that is the uncaught-abort path.

use crate::core::value::Value;
use crate::error::VeldError;
use crate::exceptions::is_instance_of;
use crate::runtime::{Handler, Runtime, MAX_HANDLERS};

impl Runtime {
    /// Register a handler on the current frame.
    pub(crate) fn push_handler(&mut self, handler: Handler) -> Result<(), VeldError> {
        let frame = self.frames.last_mut().expect("no active frame");
        if frame.handlers.len() >= MAX_HANDLERS {
            return Err(VeldError::runtime(
                "too many nested exception handlers in one function",
            ));
        }
        frame.handlers.push(handler);
        Ok(())
    }

    /// Walk the frames looking for a handler. True when one took over
    /// (the instruction cursor has been redirected); false when the
    /// exception unwound past `min_depth`.
    pub(crate) fn propagate_exception(&mut self, exception: Value, min_depth: usize) -> bool {
        while self.frames.len() > min_depth {
            let fi = self.frames.len() - 1;
            while let Some(handler) = self.frames[fi].handlers.last().copied() {
                let class_matches = match (handler.class, self.class_of(exception)) {
                    (Some(handler_class), Some(exc_class)) => {
                        is_instance_of(self, exc_class, handler_class)
                    }
                    _ => false,
                };
                if handler.catch_addr != 0 && class_matches {
                    self.stack.truncate(handler.stack_len);
                    self.stack.push(exception);
                    self.frames[fi].ip = handler.catch_addr as usize;
                    // the catch prologue pops the handler itself
                    return true;
                }
                if handler.finally_addr != 0 {
                    self.stack.truncate(handler.stack_len);
                    self.stack.push(exception);
                    // tells the finally epilogue to keep propagating
                    self.stack.push(Value::Bool(true));
                    self.frames[fi].ip = handler.finally_addr as usize;
                    return true;
                }
                self.frames[fi].handlers.pop();
            }
            let frame = self.frames.pop().expect("frame count checked above");
            self.close_upvalues(frame.base);
            self.stack.truncate(frame.base);
        }
        false
    }

    /// Turn a pending error into an exception value, attaching the trace
    /// for raises; thrown values already carry theirs.
    pub(crate) fn error_to_exception(&mut self, err: VeldError) -> Result<Value, VeldError> {
        match err {
            VeldError::Thrown(v) => Ok(v),
            VeldError::Raise { kind, message } => self.make_exception(kind, &message),
        }
    }
}
