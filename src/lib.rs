//! mi-debugger - Interactive debugging through GDB's machine interface
//!
//! This library drives a GDB-compatible debugger over the MI protocol:
//! it launches or attaches, keeps breakpoints in sync across sessions,
//! runs the program, and reports stops with their stack and locals.

pub mod breakpoints;
pub mod common;
pub mod configurations;
pub mod debugger;
pub mod events;
pub mod mi;
pub mod session;
pub mod testing;

// Re-export commonly used types
pub use breakpoints::{Breakpoint, BreakpointId, BreakpointManager, FsSources, SourceFiles, SyncState};
pub use common::{Error, Result};
pub use configurations::DebugConfiguration;
pub use debugger::{Debugger, ProcessInfo};
pub use events::{DebuggerEvent, StopSnapshot};
pub use session::{FixedChoice, SessionState, TimeoutPrompt, WaitOutcome, WatchdogChoice};
