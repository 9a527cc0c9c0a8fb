//! The bytecode interpreter: call protocol, dispatch loop, exception
//! propagation and the operand helpers they share.
mod calls;
mod dispatch;
mod exception;
mod ops;
