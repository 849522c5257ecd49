//! GDB machine interface (MI) protocol
//!
//! This module implements the client side of GDB/MI for communicating
//! with a debugger running as `gdb --interpreter=mi2`.

pub mod codec;
pub mod commands;
pub mod events;
pub mod frames;
pub mod types;

pub use codec::{decode, encode, ParseError};
pub use events::{AsyncEvent, ReportedBreakpoint, StopReason};
pub use frames::{LocalVariable, StackFrame, ThreadInfo, VariableValue};
pub use types::*;
