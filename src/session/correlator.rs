//! Command/response correlation
//!
//! Every command gets a fresh token; the debugger echoes it on the result
//! record. Replies may arrive in any order relative to issue order.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::mi::{codec, MiCommand, MiResult, Reply, ReplyKind, ResultClass, Token};

struct PendingEntry {
    operation: String,
    expected: ReplyKind,
    submitted: Instant,
    reply_tx: oneshot::Sender<Reply>,
}

/// Receiving end of an issued command
#[derive(Debug)]
pub struct PendingHandle {
    token: Token,
    operation: String,
    reply_rx: oneshot::Receiver<Reply>,
}

impl PendingHandle {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Take the reply if it has arrived
    ///
    /// A dropped pending entry counts as aborted.
    pub fn try_take(&mut self) -> Option<Reply> {
        match self.reply_rx.try_recv() {
            Ok(reply) => Some(reply),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Reply::Aborted),
        }
    }

    /// Wait for the reply without driving the session
    pub async fn reply(self) -> Reply {
        self.reply_rx.await.unwrap_or(Reply::Aborted)
    }
}

/// Table of commands awaiting their result record
pub struct Correlator {
    next_token: Token,
    pending: HashMap<Token, PendingEntry>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_token: 1,
            pending: HashMap::new(),
        }
    }

    /// Register a command and produce the line to write
    pub fn issue(&mut self, command: &MiCommand) -> (String, PendingHandle) {
        let token = self.next_token;
        self.next_token += 1;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(
            token,
            PendingEntry {
                operation: command.operation.clone(),
                expected: command.expected,
                submitted: Instant::now(),
                reply_tx,
            },
        );

        (
            codec::encode(token, command),
            PendingHandle {
                token,
                operation: command.operation.clone(),
                reply_rx,
            },
        )
    }

    /// Resolve the command with this token
    ///
    /// Returns false when no such command is pending; the record is dropped.
    pub fn resolve(&mut self, token: Token, class: ResultClass, results: Vec<MiResult>) -> bool {
        let Some(entry) = self.pending.remove(&token) else {
            tracing::warn!(token, %class, "Discarding reply for unknown token");
            return false;
        };

        if !entry.expected.accepts(class) {
            tracing::warn!(
                token,
                operation = %entry.operation,
                expected = ?entry.expected,
                %class,
                "Unexpected reply class"
            );
        }
        tracing::trace!(
            token,
            operation = %entry.operation,
            elapsed_ms = entry.submitted.elapsed().as_millis() as u64,
            "Command resolved"
        );

        // The issuer may have given up waiting; that is not an error
        let _ = entry.reply_tx.send(Reply::Result { class, results });
        true
    }

    /// Resolve every pending command as aborted
    pub fn abort_all(&mut self) -> usize {
        let count = self.pending.len();
        for (token, entry) in self.pending.drain() {
            tracing::debug!(token, operation = %entry.operation, "Aborting pending command");
            let _ = entry.reply_tx.send(Reply::Aborted);
        }
        count
    }

    pub fn is_pending(&self, token: Token) -> bool {
        self.pending.contains_key(&token)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of commands issued so far
    pub fn issued(&self) -> u64 {
        self.next_token - 1
    }

    /// When the command with this token was issued
    pub fn submitted(&self, token: Token) -> Option<Instant> {
        self.pending.get(&token).map(|e| e.submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::{commands, Value};

    fn done(value: &str) -> Vec<MiResult> {
        vec![("value".to_string(), Value::Const(value.to_string()))]
    }

    #[test]
    fn test_tokens_increase_from_one() {
        let mut correlator = Correlator::new();
        let (line, first) = correlator.issue(&commands::exec_next());
        let (_, second) = correlator.issue(&commands::exec_step());
        assert_eq!(line, "1-exec-next\n");
        assert_eq!(first.token(), 1);
        assert_eq!(second.token(), 2);
        assert_eq!(correlator.pending_count(), 2);
        assert_eq!(correlator.issued(), 2);
    }

    #[test]
    fn test_out_of_order_resolution() {
        let mut correlator = Correlator::new();
        let (_, mut a) = correlator.issue(&commands::data_evaluate_expression("a", None, None));
        let (_, mut b) = correlator.issue(&commands::data_evaluate_expression("b", None, None));

        assert!(correlator.resolve(b.token(), ResultClass::Done, done("2")));
        assert!(a.try_take().is_none());
        assert_eq!(b.try_take().unwrap().get("value").and_then(Value::as_str), Some("2"));

        assert!(correlator.resolve(a.token(), ResultClass::Done, done("1")));
        assert_eq!(a.try_take().unwrap().get("value").and_then(Value::as_str), Some("1"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_unknown_token_discarded() {
        let mut correlator = Correlator::new();
        let (_, mut handle) = correlator.issue(&commands::thread_info());
        assert!(!correlator.resolve(99, ResultClass::Done, Vec::new()));
        assert!(handle.try_take().is_none());
        assert!(correlator.is_pending(handle.token()));
    }

    #[tokio::test]
    async fn test_abort_all() {
        let mut correlator = Correlator::new();
        let (_, a) = correlator.issue(&commands::exec_continue());
        let (_, b) = correlator.issue(&commands::thread_info());
        assert_eq!(correlator.abort_all(), 2);
        assert_eq!(a.reply().await, Reply::Aborted);
        assert_eq!(b.reply().await, Reply::Aborted);
        assert_eq!(correlator.pending_count(), 0);
    }
}
