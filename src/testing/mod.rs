//! Test support: a scripted MI debugger
//!
//! [`MockGdb`] answers MI commands like GDB would. It backs the `mock-gdb`
//! binary used by the integration tests and, through [`in_memory`], the
//! unit tests that need a live session without a process.

pub mod mock;

pub use mock::{MockAction, MockGdb, MockOptions, MockResponse};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::session::{Supervisor, SupervisorEvent};

/// Connect a supervisor to a mock running on an in-memory pipe
///
/// When the mock exits or crashes its output is closed, which the
/// supervisor reports as a normal exit.
pub fn in_memory(mut mock: MockGdb) -> (Supervisor, mpsc::UnboundedReceiver<SupervisorEvent>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, mut server_write) = tokio::io::split(server);

    tokio::spawn(async move {
        for line in mock.banner() {
            if server_write.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                return;
            }
        }
        let mut lines = BufReader::new(server_read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let response = mock.handle_line(&line);
            for out in &response.lines {
                if server_write.write_all(format!("{}\n", out).as_bytes()).await.is_err() {
                    return;
                }
            }
            if response.action != MockAction::Continue {
                break;
            }
        }
        let _ = server_write.shutdown().await;
    });

    Supervisor::from_streams(BufReader::new(client_read), client_write)
}
