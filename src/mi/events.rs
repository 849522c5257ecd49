//! Typed asynchronous notifications
//!
//! Converts `*`, `+` and `=` records into [`AsyncEvent`]s so the state
//! machine never inspects raw MI results.

use serde::Serialize;

use super::frames::StackFrame;
use super::types::{find, find_str, AsyncKind, MiResult, Value};

/// Why execution stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    /// A breakpoint with this session number was hit
    BreakpointHit { number: u32 },
    /// `next`/`step` completed
    StepComplete,
    /// `finish` returned from the frame
    FunctionFinished,
    /// Stopped by an interrupt request (SIGINT)
    Interrupted,
    /// Stopped by a signal delivered to the debuggee
    Signal { name: String },
    /// Anything else the debugger reported
    Other { reason: String },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BreakpointHit { number } => write!(f, "breakpoint {} hit", number),
            Self::StepComplete => write!(f, "step complete"),
            Self::FunctionFinished => write!(f, "function finished"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Signal { name } => write!(f, "signal {}", name),
            Self::Other { reason } => write!(f, "{}", reason),
        }
    }
}

/// A breakpoint as the debugger reports it in its own table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportedBreakpoint {
    /// Session-assigned number
    pub number: u32,
    pub enabled: bool,
    pub file: Option<String>,
    pub fullname: Option<String>,
    pub line: Option<u32>,
    pub condition: Option<String>,
    pub ignore_count: u32,
    pub hit_count: u32,
    /// Location text while the breakpoint is pending (not yet resolved)
    pub pending: Option<String>,
}

impl ReportedBreakpoint {
    /// Decode a `bkpt={number="1",enabled="y",...}` tuple
    pub fn from_mi(value: &Value) -> Option<Self> {
        // Multi-location breakpoints are numbered "1.1", "1.2"; keep the parent
        let number = value.get_str("number")?.split('.').next()?.parse().ok()?;
        Some(Self {
            number,
            enabled: value.get_str("enabled") != Some("n"),
            file: value.get_str("file").map(String::from),
            fullname: value.get_str("fullname").map(String::from),
            line: value.get_num("line"),
            condition: value.get_str("cond").map(String::from),
            ignore_count: value.get_num("ignore").unwrap_or(0),
            hit_count: value.get_num("times").unwrap_or(0),
            pending: value.get_str("pending").map(String::from),
        })
    }
}

/// Notification not tied to a specific command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncEvent {
    /// Execution halted
    Stopped {
        reason: StopReason,
        thread_id: Option<u32>,
        frame: Option<StackFrame>,
    },
    /// Execution resumed (`all` or a thread id)
    Running { thread_id: Option<String> },
    /// The debuggee exited; `None` when it was killed by a signal
    Exited { exit_code: Option<i32> },
    /// A thread group (inferior) exited
    ThreadGroupExited { id: String, exit_code: Option<i32> },
    BreakpointCreated(ReportedBreakpoint),
    BreakpointModified(ReportedBreakpoint),
    BreakpointDeleted { number: u32 },
    /// Any other notification, kept for logging
    Other {
        kind: AsyncKind,
        class: String,
        results: Vec<MiResult>,
    },
}

impl AsyncEvent {
    /// Type an async record
    pub fn from_record(kind: AsyncKind, class: &str, results: &[MiResult]) -> Self {
        match (kind, class) {
            (AsyncKind::Exec, "stopped") => stopped(results),
            (AsyncKind::Exec, "running") => Self::Running {
                thread_id: find_str(results, "thread-id").map(String::from),
            },
            (AsyncKind::Notify, "thread-group-exited") => Self::ThreadGroupExited {
                id: find_str(results, "id").unwrap_or_default().to_string(),
                exit_code: find_str(results, "exit-code").and_then(parse_exit_code),
            },
            (AsyncKind::Notify, "breakpoint-created" | "breakpoint-modified") => {
                match find(results, "bkpt").and_then(ReportedBreakpoint::from_mi) {
                    Some(bp) if class == "breakpoint-created" => Self::BreakpointCreated(bp),
                    Some(bp) => Self::BreakpointModified(bp),
                    None => other(kind, class, results),
                }
            }
            (AsyncKind::Notify, "breakpoint-deleted") => {
                match find_str(results, "id").and_then(|id| id.parse().ok()) {
                    Some(number) => Self::BreakpointDeleted { number },
                    None => other(kind, class, results),
                }
            }
            _ => other(kind, class, results),
        }
    }
}

fn other(kind: AsyncKind, class: &str, results: &[MiResult]) -> AsyncEvent {
    AsyncEvent::Other {
        kind,
        class: class.to_string(),
        results: results.to_vec(),
    }
}

fn stopped(results: &[MiResult]) -> AsyncEvent {
    let reason = find_str(results, "reason").unwrap_or("");
    let thread_id = find_str(results, "thread-id").and_then(|t| t.parse().ok());
    let frame = find(results, "frame").and_then(StackFrame::from_mi);

    let reason = match reason {
        "exited-normally" => return AsyncEvent::Exited { exit_code: Some(0) },
        "exited" => {
            return AsyncEvent::Exited {
                exit_code: find_str(results, "exit-code").and_then(parse_exit_code),
            }
        }
        "exited-signalled" => return AsyncEvent::Exited { exit_code: None },
        "breakpoint-hit" => match find_str(results, "bkptno").and_then(|n| n.parse().ok()) {
            Some(number) => StopReason::BreakpointHit { number },
            None => StopReason::Other {
                reason: reason.to_string(),
            },
        },
        "end-stepping-range" => StopReason::StepComplete,
        "function-finished" => StopReason::FunctionFinished,
        "signal-received" => match find_str(results, "signal-name") {
            Some("SIGINT") | Some("SIGTRAP") => StopReason::Interrupted,
            Some(name) => StopReason::Signal {
                name: name.to_string(),
            },
            None => StopReason::Interrupted,
        },
        // all-stop interrupts and attach stops may carry no reason at all
        "" => StopReason::Interrupted,
        r => StopReason::Other {
            reason: r.to_string(),
        },
    };

    AsyncEvent::Stopped {
        reason,
        thread_id,
        frame,
    }
}

/// GDB prints exit codes in octal ("01", "0377")
fn parse_exit_code(code: &str) -> Option<i32> {
    i32::from_str_radix(code, 8).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::codec::parse;
    use crate::mi::types::Record;

    fn event(line: &str) -> AsyncEvent {
        match parse(line).unwrap() {
            Record::Async {
                kind,
                class,
                results,
                ..
            } => AsyncEvent::from_record(kind, &class, &results),
            other => panic!("Expected async record, got {:?}", other),
        }
    }

    #[test]
    fn test_breakpoint_hit() {
        let ev = event("*stopped,reason=\"breakpoint-hit\",disp=\"keep\",bkptno=\"1\",frame={addr=\"0x401136\",func=\"main\",args=[],file=\"Model.c\",line=\"42\"},thread-id=\"1\",stopped-threads=\"all\"");
        match ev {
            AsyncEvent::Stopped {
                reason,
                thread_id,
                frame,
            } => {
                assert_eq!(reason, StopReason::BreakpointHit { number: 1 });
                assert_eq!(thread_id, Some(1));
                let frame = frame.unwrap();
                assert_eq!(frame.level, 0);
                assert_eq!(frame.line, Some(42));
            }
            other => panic!("Expected stop, got {:?}", other),
        }
    }

    #[test]
    fn test_stop_reasons() {
        let reason = |line: &str| match event(line) {
            AsyncEvent::Stopped { reason, .. } => reason,
            other => panic!("Expected stop, got {:?}", other),
        };
        assert_eq!(
            reason("*stopped,reason=\"end-stepping-range\",thread-id=\"1\""),
            StopReason::StepComplete
        );
        assert_eq!(
            reason("*stopped,reason=\"signal-received\",signal-name=\"SIGINT\""),
            StopReason::Interrupted
        );
        assert_eq!(
            reason("*stopped,reason=\"signal-received\",signal-name=\"SIGSEGV\""),
            StopReason::Signal {
                name: "SIGSEGV".to_string()
            }
        );
        assert_eq!(reason("*stopped,frame={func=\"main\"}"), StopReason::Interrupted);
    }

    #[test]
    fn test_exit_events() {
        assert_eq!(
            event("*stopped,reason=\"exited\",exit-code=\"012\""),
            AsyncEvent::Exited { exit_code: Some(10) }
        );
        assert_eq!(
            event("*stopped,reason=\"exited-normally\""),
            AsyncEvent::Exited { exit_code: Some(0) }
        );
        assert_eq!(
            event("=thread-group-exited,id=\"i1\",exit-code=\"0\""),
            AsyncEvent::ThreadGroupExited {
                id: "i1".to_string(),
                exit_code: Some(0)
            }
        );
    }

    #[test]
    fn test_breakpoint_notifications() {
        match event("=breakpoint-modified,bkpt={number=\"2\",type=\"breakpoint\",enabled=\"n\",file=\"a.c\",line=\"9\",cond=\"i>3\",ignore=\"4\",times=\"1\"}") {
            AsyncEvent::BreakpointModified(bp) => {
                assert_eq!(bp.number, 2);
                assert!(!bp.enabled);
                assert_eq!(bp.condition.as_deref(), Some("i>3"));
                assert_eq!(bp.ignore_count, 4);
                assert_eq!(bp.hit_count, 1);
            }
            other => panic!("Expected modification, got {:?}", other),
        }
        assert_eq!(
            event("=breakpoint-deleted,id=\"2\""),
            AsyncEvent::BreakpointDeleted { number: 2 }
        );
        assert!(matches!(
            event("=library-loaded,id=\"/lib/libc.so.6\""),
            AsyncEvent::Other { .. }
        ));
    }
}
