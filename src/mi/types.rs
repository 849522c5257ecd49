//! GDB/MI record types
//!
//! These types represent the output records of the GDB machine interface.
//! See: https://sourceware.org/gdb/current/onlinedocs/gdb.html/GDB_002fMI-Output-Syntax.html

use std::fmt;

use serde::Serialize;

/// Correlation token prefixed to a command and echoed on its result record
pub type Token = u64;

// === Values ===

/// A single `variable=value` pair
pub type MiResult = (String, Value);

/// An MI value: c-string constant, tuple or list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Const(String),
    Tuple(Vec<MiResult>),
    List(Vec<Value>),
    /// A list whose elements are `variable=value` results, e.g. `[frame={..},frame={..}]`
    ResultList(Vec<MiResult>),
}

impl Value {
    /// Look up a field of a tuple (or a result list)
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Tuple(results) | Self::ResultList(results) => find(results, name),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Const(s) => Some(s),
            _ => None,
        }
    }

    /// Field as string, shorthand for `get(name).and_then(as_str)`
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Field parsed as a number
    pub fn get_num<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.get_str(name).and_then(|s| s.parse().ok())
    }

    /// Elements of a list, regardless of whether they carry variable names
    pub fn list_values(&self) -> Vec<&Value> {
        match self {
            Self::List(values) => values.iter().collect(),
            Self::ResultList(results) => results.iter().map(|(_, v)| v).collect(),
            _ => Vec::new(),
        }
    }
}

/// Find a named result in a result sequence
pub fn find<'a>(results: &'a [MiResult], name: &str) -> Option<&'a Value> {
    results.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

/// Find a named c-string result in a result sequence
pub fn find_str<'a>(results: &'a [MiResult], name: &str) -> Option<&'a str> {
    find(results, name).and_then(Value::as_str)
}

// === Records ===

/// Class of a result record (`^done`, `^error`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

impl ResultClass {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "done" => Some(Self::Done),
            "running" => Some(Self::Running),
            "connected" => Some(Self::Connected),
            "error" => Some(Self::Error),
            "exit" => Some(Self::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for ResultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::Running => write!(f, "running"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

/// Kind of out-of-band async record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncKind {
    /// `*` execution state changes
    Exec,
    /// `+` progress of slow operations
    Status,
    /// `=` supplementary notifications
    Notify,
}

/// Kind of stream record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// `~` console output
    Console,
    /// `@` output of the debuggee
    Target,
    /// `&` debugger internal log
    Log,
    /// Line that is not valid MI, kept verbatim
    Raw,
}

/// One decoded line of debugger output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Reply to a command
    Result {
        token: Option<Token>,
        class: ResultClass,
        results: Vec<MiResult>,
    },
    /// Notification not tied to a command
    Async {
        token: Option<Token>,
        kind: AsyncKind,
        class: String,
        results: Vec<MiResult>,
    },
    /// Textual output
    Stream { kind: StreamKind, text: String },
    /// The `(gdb)` prompt that terminates an output block
    Prompt,
}

// === Commands ===

/// The reply class a command is expected to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// `^done`
    Done,
    /// `^running` (execution commands)
    Running,
    /// `^connected` (target selection)
    Connected,
    /// `^exit` (`-gdb-exit`)
    Exit,
}

impl ReplyKind {
    /// Whether a result class satisfies this expectation (errors always do)
    pub fn accepts(self, class: ResultClass) -> bool {
        matches!(
            (self, class),
            (_, ResultClass::Error)
                | (Self::Done, ResultClass::Done)
                | (Self::Running, ResultClass::Running)
                | (Self::Connected, ResultClass::Connected)
                | (Self::Exit, ResultClass::Exit)
                // Some GDB versions answer `-exec-*` with `^done` in all-stop mode
                | (Self::Running, ResultClass::Done)
        )
    }
}

/// An MI input command, without its token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiCommand {
    /// Operation name without the leading dash, e.g. `break-insert`
    pub operation: String,
    /// Options and parameters, unquoted
    pub args: Vec<String>,
    /// Expected reply class
    pub expected: ReplyKind,
}

impl MiCommand {
    pub fn new(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        let expected = super::commands::expected_reply_for(&operation);
        Self {
            operation,
            args: Vec::new(),
            expected,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn expect(mut self, expected: ReplyKind) -> Self {
        self.expected = expected;
        self
    }
}

impl fmt::Display for MiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-{}", self.operation)?;
        for arg in &self.args {
            write!(f, " {}", super::codec::quote_arg(arg))?;
        }
        Ok(())
    }
}

/// Resolution of an issued command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The debugger answered with a result record
    Result {
        class: ResultClass,
        results: Vec<MiResult>,
    },
    /// The session ended before the debugger answered
    Aborted,
}

impl Reply {
    /// Error message of an `^error` reply
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Result {
                class: ResultClass::Error,
                results,
            } => Some(find_str(results, "msg").unwrap_or("unknown error")),
            _ => None,
        }
    }

    pub fn results(&self) -> &[MiResult] {
        match self {
            Self::Result { results, .. } => results,
            Self::Aborted => &[],
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        find(self.results(), name)
    }
}
