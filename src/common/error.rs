//! Error types for the debugger adapter
//!
//! Errors that come from a user intent (`NotSaved`, `AlreadyRunning`, ...)
//! are returned synchronously so the front end can show them directly.
//! Protocol and I/O trouble inside a session surfaces as state transitions
//! and log records instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::mi::ParseError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the debugger adapter
#[derive(Error, Debug)]
pub enum Error {
    // === Session Errors ===
    #[error("Failed to launch debugger '{program}': {reason}")]
    LaunchFailure { program: String, reason: String },

    #[error("A debug session is already running. Stop it before starting another one")]
    AlreadyRunning,

    #[error("No debug session active. Launch or attach first")]
    NoSession,

    #[error("Debugger process crashed{}", .signal.map(|s| format!(" (signal {})", s)).unwrap_or_default())]
    SessionCrashed { signal: Option<i32> },

    #[error("Debug session has exited")]
    SessionExited,

    #[error("Failed to attach to process {pid}: {reason}")]
    AttachFailure { pid: u32, reason: String },

    // === Protocol Errors ===
    #[error("Malformed debugger output: {0}")]
    ProtocolParse(#[from] ParseError),

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Command '{command}' timed out after {secs} seconds")]
    CommandTimeout { command: String, secs: u64 },

    #[error("Command '{0}' was aborted because the session ended")]
    CommandAborted(String),

    // === Breakpoint Errors ===
    #[error("Cannot set a breakpoint in '{}': the file is not saved", .0.display())]
    NotSaved(PathBuf),

    #[error("Breakpoint {id} not found")]
    BreakpointNotFound { id: u32 },

    // === Execution Errors ===
    #[error("Cannot {action} while the session is {state}")]
    InvalidState { action: String, state: String },

    #[error("Frame {0} not found")]
    FrameNotFound(usize),

    #[error("Timed out after {0} seconds waiting for the program to stop")]
    AwaitTimeout(u64),

    // === Configuration Errors ===
    #[error("At most {max} debug configurations can be stored")]
    ConfigurationLimit { max: usize },

    #[error("Debug configuration '{0}' not found")]
    ConfigurationNotFound(String),

    #[error("Debug configuration '{0}' already exists")]
    ConfigurationExists(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a launch failure error
    pub fn launch_failure(program: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        Self::LaunchFailure {
            program: program.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: &str, message: &str) -> Self {
        Self::CommandFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: impl ToString) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create an attach failure error
    pub fn attach_failure(pid: u32, reason: impl ToString) -> Self {
        Self::AttachFailure {
            pid,
            reason: reason.to_string(),
        }
    }

    /// Whether the error ends the session it happened in
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::SessionCrashed { .. } | Self::SessionExited | Self::CommandAborted(_)
        )
    }
}
