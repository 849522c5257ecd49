//! Per-command timeout tracking
//!
//! Each issued command gets its own deadline. When one passes, the session
//! asks a [`TimeoutPrompt`] whether to keep waiting or give up.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;

use crate::mi::Token;

/// Decision taken when a command outlives its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogChoice {
    /// Re-arm the timer for another full period
    WaitLonger,
    /// Abort every pending command and stop the debugger
    Abort,
}

/// A command whose deadline has passed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredCommand {
    pub token: Token,
    pub operation: String,
    /// Time since the command was issued
    pub waited: Duration,
}

/// Asks the user what to do about an unresponsive debugger
#[async_trait]
pub trait TimeoutPrompt: Send + Sync {
    async fn on_expire(&self, command: &ExpiredCommand) -> WatchdogChoice;
}

/// A prompt that always answers the same way
#[derive(Debug, Clone, Copy)]
pub struct FixedChoice(pub WatchdogChoice);

#[async_trait]
impl TimeoutPrompt for FixedChoice {
    async fn on_expire(&self, command: &ExpiredCommand) -> WatchdogChoice {
        tracing::debug!(
            token = command.token,
            operation = %command.operation,
            choice = ?self.0,
            "Answering timeout prompt"
        );
        self.0
    }
}

#[derive(Debug)]
struct Timer {
    operation: String,
    armed_at: Instant,
    period: Duration,
    deadline: Instant,
}

/// Deadlines of the outstanding commands
#[derive(Debug, Default)]
pub struct Watchdog {
    timers: HashMap<Token, Timer>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, token: Token, operation: &str, period: Duration) {
        let now = Instant::now();
        self.timers.insert(
            token,
            Timer {
                operation: operation.to_string(),
                armed_at: now,
                period,
                deadline: now + period,
            },
        );
    }

    pub fn disarm(&mut self, token: Token) {
        self.timers.remove(&token);
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }

    /// Re-arm for one full period from now; `waited` keeps counting from
    /// the original issue time
    pub fn extend(&mut self, token: Token) -> Option<Instant> {
        let timer = self.timers.get_mut(&token)?;
        timer.deadline = Instant::now() + timer.period;
        Some(timer.deadline)
    }

    /// Earliest deadline among armed timers
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.deadline).min()
    }

    pub fn deadline(&self, token: Token) -> Option<Instant> {
        self.timers.get(&token).map(|t| t.deadline)
    }

    /// Commands whose deadline is at or before `now`, oldest first
    pub fn expired(&self, now: Instant) -> Vec<ExpiredCommand> {
        let mut expired: Vec<ExpiredCommand> = self
            .timers
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(token, t)| ExpiredCommand {
                token: *token,
                operation: t.operation.clone(),
                waited: now.saturating_duration_since(t.armed_at),
            })
            .collect();
        expired.sort_by_key(|e| e.token);
        expired
    }

    pub fn is_armed(&self, token: Token) -> bool {
        self.timers.contains_key(&token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expiry_and_extend_from_now() {
        let mut watchdog = Watchdog::new();
        let period = Duration::from_secs(40);
        watchdog.arm(1, "exec-run", period);
        let first = watchdog.deadline(1).unwrap();

        tokio::time::advance(Duration::from_secs(39)).await;
        assert!(watchdog.expired(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        let expired = watchdog.expired(Instant::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].operation, "exec-run");
        assert_eq!(expired[0].waited, period);

        assert_eq!(watchdog.extend(1), Some(first + period));
        assert!(watchdog.expired(Instant::now()).is_empty());

        // A slow answer still buys a full period
        tokio::time::advance(Duration::from_secs(100)).await;
        let expired = watchdog.expired(Instant::now());
        assert_eq!(expired[0].waited, Duration::from_secs(140));
        assert_eq!(watchdog.extend(1), Some(Instant::now() + period));
        assert!(watchdog.expired(Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_and_next_deadline() {
        let mut watchdog = Watchdog::new();
        watchdog.arm(1, "a", Duration::from_secs(10));
        watchdog.arm(2, "b", Duration::from_secs(5));
        assert_eq!(watchdog.next_deadline(), watchdog.deadline(2));

        watchdog.disarm(2);
        assert_eq!(watchdog.next_deadline(), watchdog.deadline(1));
        assert!(!watchdog.is_armed(2));

        watchdog.clear();
        assert!(watchdog.next_deadline().is_none());
    }

    #[tokio::test]
    async fn test_fixed_choice() {
        let prompt = FixedChoice(WatchdogChoice::WaitLonger);
        let expired = ExpiredCommand {
            token: 3,
            operation: "exec-continue".to_string(),
            waited: Duration::from_secs(40),
        };
        assert_eq!(prompt.on_expire(&expired).await, WatchdogChoice::WaitLonger);
    }
}
