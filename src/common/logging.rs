//! Logging and tracing configuration
//!
//! The console logs compactly to stderr so snapshots on stdout stay clean.
//! With `--log-file` the full MI exchange (target `mi_debugger::mi`) is also
//! written to a file in the data directory.

use std::path::PathBuf;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use super::paths;

/// Default filter when `RUST_LOG` is not set
const DEFAULT_FILTER: &str = "mi_debugger=info,warn";

/// Filter used for the log file: keep the command/response log
const FILE_FILTER: &str = "mi_debugger=debug,mi_debugger::mi=trace,info";

/// Initialize tracing for the console (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer())
        .try_init();
}

/// Initialize tracing with an additional log file
///
/// Returns the path of the log file, or `None` when it could not be opened
/// (logging then falls back to stderr only).
pub fn init_with_file() -> Option<PathBuf> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(FILE_FILTER));

    let log_file = session_log_path()?;
    let opened = log_file
        .parent()
        .map(std::fs::create_dir_all)
        .transpose()
        .and_then(|_| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
        });

    match opened {
        Ok(file) => {
            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE);

            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(file_layer)
                .with(stderr_layer())
                .try_init();

            Some(log_file)
        }
        Err(e) => {
            eprintln!("Warning: Could not open log file: {}", e);
            init_cli();
            None
        }
    }
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
}

/// Get the path to the session log file
pub fn session_log_path() -> Option<PathBuf> {
    paths::log_dir().map(|d| d.join("session.log"))
}

/// Truncate the session log file
pub fn truncate_session_log() -> std::io::Result<()> {
    if let Some(path) = session_log_path() {
        if path.exists() {
            std::fs::write(&path, "")?;
        }
    }
    Ok(())
}
