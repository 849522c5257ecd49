//! Notifications for the presentation layer
//!
//! All of them travel over one unbounded channel created by
//! [`Debugger::new`](crate::Debugger::new).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::breakpoints::BreakpointId;
use crate::mi::{LocalVariable, StackFrame, StopReason, StreamKind};
use crate::session::SessionState;

/// Where a captured output line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Debugger console output (`~`)
    Console,
    /// Output of the debugged program (`@`)
    Target,
    /// Debugger log (`&`)
    Log,
    /// Debugger stderr
    Stderr,
    /// Lines that were not valid MI
    Raw,
}

impl From<StreamKind> for OutputKind {
    fn from(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Console => Self::Console,
            StreamKind::Target => Self::Target,
            StreamKind::Log => Self::Log,
            StreamKind::Raw => Self::Raw,
        }
    }
}

/// One captured line of output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    pub kind: OutputKind,
    pub text: String,
}

/// What the user sees when execution halts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopSnapshot {
    pub reason: StopReason,
    pub thread_id: Option<u32>,
    /// Local breakpoint that was hit, if any
    pub breakpoint: Option<BreakpointId>,
    /// Call stack, innermost first
    pub frames: Vec<StackFrame>,
    /// Locals of the selected frame, by name
    pub locals: BTreeMap<String, LocalVariable>,
}

impl StopSnapshot {
    /// The innermost frame
    pub fn top_frame(&self) -> Option<&StackFrame> {
        self.frames.first()
    }
}

/// Notification for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DebuggerEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    Stopped(StopSnapshot),
    Output(OutputLine),
    /// Breakpoint sync state changed
    BreakpointsChanged,
    /// A command outlived its deadline; the timeout prompt was asked
    CommandTimedOut {
        operation: String,
        waited_secs: u64,
    },
}
