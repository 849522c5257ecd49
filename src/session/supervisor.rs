//! Debugger process supervision
//!
//! The supervisor owns the child process and its pipes. A reader task
//! decodes stdout into records and forwards them, in pipe order, over the
//! single event channel into the session. Stderr lines go over the same
//! channel from their own task. Exit of the process is reported exactly
//! once, after the last record and stderr line.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};
use crate::mi::codec;
use crate::mi::Record;

/// Signal number reported when an in-memory transport is killed
const SIGKILL: i32 = 9;

/// How long stderr may still be read after the process has exited
const STDERR_DRAIN: Duration = Duration::from_millis(500);

/// Everything the debugger process produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A decoded stdout line
    Record(Record),
    /// A line the debugger wrote to stderr
    Stderr(String),
    /// The process exited on its own with this code
    Exited(i32),
    /// The process was terminated by a signal
    Crashed(Option<i32>),
}

/// Map a process exit status to the event reported for it
pub fn classify(status: ExitStatus) -> SupervisorEvent {
    if let Some(code) = status.code() {
        return SupervisorEvent::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        SupervisorEvent::Crashed(status.signal())
    }
    #[cfg(not(unix))]
    {
        SupervisorEvent::Crashed(None)
    }
}

/// Handle to a running debugger process
pub struct Supervisor {
    stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Dropping or firing this asks the reader task to kill the process
    kill_tx: Option<oneshot::Sender<()>>,
    pid: Option<u32>,
}

impl Supervisor {
    /// Spawn the debugger and start reading its output
    ///
    /// A missing binary or a refused spawn is reported as
    /// [`Error::LaunchFailure`]; there is no retry.
    pub fn spawn(
        program: &Path,
        args: &[String],
    ) -> Result<(Self, mpsc::UnboundedReceiver<SupervisorEvent>)> {
        tracing::info!(program = %program.display(), ?args, "Spawning debugger");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::launch_failure(program, e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::launch_failure(program, "failed to get debugger stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::launch_failure(program, "failed to get debugger stdout"))?;
        let stderr = child.stderr.take();
        let pid = child.id();

        let (tx, rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        let stderr_task = stderr.map(|stderr| {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(SupervisorEvent::Stderr(line)).is_err() {
                        break;
                    }
                }
            })
        });

        tokio::spawn(read_process(
            BufReader::new(stdout),
            child,
            stderr_task,
            tx,
            kill_rx,
        ));

        Ok((
            Self {
                stdin: Box::new(stdin),
                kill_tx: Some(kill_tx),
                pid,
            },
            rx,
        ))
    }

    /// Drive the MI protocol over in-memory streams instead of a child
    ///
    /// End of stream is reported as `Exited(0)`; a kill request is reported
    /// as a SIGKILL crash, as it would be for a real process.
    pub fn from_streams<R, W>(reader: R, writer: W) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>)
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(read_streams(reader, tx, kill_rx));
        (
            Self {
                stdin: Box::new(writer),
                kill_tx: Some(kill_tx),
                pid: None,
            },
            rx,
        )
    }

    /// A supervisor that only writes; events are produced by the caller
    #[cfg(test)]
    pub(crate) fn from_writer<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            stdin: Box::new(writer),
            kill_tx: None,
            pid: None,
        }
    }

    /// Process id of the debugger, when it is a real process
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write one complete line to the debugger's stdin
    pub async fn send_raw(&mut self, line: &str) -> std::io::Result<()> {
        tracing::debug!(target: "mi_debugger::mi", "MI >>> {}", line.trim_end());
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await
    }

    /// Ask for the process to be killed
    ///
    /// The exit is still reported through the event channel.
    pub fn terminate(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            tracing::debug!(pid = ?self.pid, "Killing debugger process");
            let _ = kill_tx.send(());
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.kill_tx.is_none()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn read_process<R>(
    mut reader: R,
    mut child: Child,
    stderr_task: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<SupervisorEvent>,
    mut kill_rx: oneshot::Receiver<()>,
) where
    R: AsyncBufRead + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = &mut kill_rx => {
                if let Err(e) = child.start_kill() {
                    tracing::warn!(error = %e, "Failed to kill debugger process");
                }
                break;
            }
            record = codec::read_record(&mut reader) => match record {
                Ok(Some(record)) => {
                    let _ = tx.send(SupervisorEvent::Record(record));
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Error reading debugger output");
                    break;
                }
            }
        }
    }

    let event = match child.wait().await {
        Ok(status) => classify(status),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to reap debugger process");
            SupervisorEvent::Crashed(None)
        }
    };
    // The exit is the last event; a debuggee that inherited stderr may
    // keep the pipe open, so the drain is bounded
    if let Some(task) = stderr_task {
        if tokio::time::timeout(STDERR_DRAIN, task).await.is_err() {
            tracing::debug!("Stderr still open after debugger exit");
        }
    }
    tracing::debug!(?event, "Debugger process ended");
    let _ = tx.send(event);
}

async fn read_streams<R>(
    mut reader: R,
    tx: mpsc::UnboundedSender<SupervisorEvent>,
    mut kill_rx: oneshot::Receiver<()>,
) where
    R: AsyncBufRead + Unpin,
{
    let event = loop {
        tokio::select! {
            biased;
            _ = &mut kill_rx => break SupervisorEvent::Crashed(Some(SIGKILL)),
            record = codec::read_record(&mut reader) => match record {
                Ok(Some(record)) => {
                    let _ = tx.send(SupervisorEvent::Record(record));
                }
                Ok(None) => break SupervisorEvent::Exited(0),
                Err(e) => {
                    tracing::warn!(error = %e, "Error reading debugger output");
                    break SupervisorEvent::Crashed(None);
                }
            }
        }
    };
    let _ = tx.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::ResultClass;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_streams_forward_records_in_order() {
        let input = b"~\"hello\\n\"\n1^done\n(gdb) \n";
        let (client, mut server) = tokio::io::duplex(1024);
        let (mut supervisor, mut rx) = Supervisor::from_streams(BufReader::new(&input[..]), client);

        match rx.recv().await {
            Some(SupervisorEvent::Record(Record::Stream { text, .. })) => assert_eq!(text, "hello\n"),
            other => panic!("Expected stream record, got {:?}", other),
        }
        match rx.recv().await {
            Some(SupervisorEvent::Record(Record::Result { token, class, .. })) => {
                assert_eq!(token, Some(1));
                assert_eq!(class, ResultClass::Done);
            }
            other => panic!("Expected result record, got {:?}", other),
        }
        assert_eq!(rx.recv().await, Some(SupervisorEvent::Record(Record::Prompt)));
        assert_eq!(rx.recv().await, Some(SupervisorEvent::Exited(0)));

        supervisor.send_raw("2-gdb-exit\n").await.unwrap();
        let mut buf = [0u8; 11];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"2-gdb-exit\n");
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_failure() {
        let result = Supervisor::spawn(Path::new("/nonexistent/gdb"), &[]);
        assert!(matches!(result, Err(Error::LaunchFailure { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_exit_code_reported_once() {
        let args = vec!["-c".to_string(), "echo '^done'; exit 3".to_string()];
        let (_supervisor, mut rx) = Supervisor::spawn(Path::new("/bin/sh"), &args).unwrap();

        let mut exits = Vec::new();
        while let Some(event) = rx.recv().await {
            if matches!(event, SupervisorEvent::Exited(_) | SupervisorEvent::Crashed(_)) {
                exits.push(event);
            }
        }
        assert_eq!(exits, vec![SupervisorEvent::Exited(3)]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_precedes_exit() {
        let args = vec![
            "-c".to_string(),
            "echo first >&2; echo second >&2; exit 4".to_string(),
        ];
        let (_supervisor, mut rx) = Supervisor::spawn(Path::new("/bin/sh"), &args).unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                SupervisorEvent::Stderr("first".to_string()),
                SupervisorEvent::Stderr("second".to_string()),
                SupervisorEvent::Exited(4),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_killed_process_is_a_crash() {
        let args = vec!["-c".to_string(), "exec sleep 30".to_string()];
        let (mut supervisor, mut rx) = Supervisor::spawn(Path::new("/bin/sh"), &args).unwrap();
        supervisor.terminate();
        assert!(supervisor.is_terminated());

        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert_eq!(last, Some(SupervisorEvent::Crashed(Some(SIGKILL))));
    }
}
