//! Execution states of a session

use serde::Serialize;

/// Lifecycle state of one debugger session
///
/// `Idle → Starting → Ready → Running ⇄ Stopped`, and from any live state
/// to `Exited` or `Crashed`. The last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No debugger process yet
    Idle,
    /// Process spawned, setup commands in flight
    Starting,
    /// Debugger configured, program not started
    Ready,
    /// Program is executing
    Running,
    /// Program is halted
    Stopped,
    /// Session ended normally or was terminated
    Exited,
    /// Debugger process died unexpectedly
    Crashed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited | Self::Crashed)
    }

    /// Whether the program can be inspected and resumed
    pub fn is_stopped(self) -> bool {
        self == Self::Stopped
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Exited | Crashed) => true,
            (Idle, Starting) => true,
            (Starting, Ready) => true,
            // Attaching halts the target without a run
            (Ready, Running | Stopped) => true,
            (Running, Stopped) | (Stopped, Running) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Exited => write!(f, "exited"),
            Self::Crashed => write!(f, "crashed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;

    #[test]
    fn test_happy_path() {
        let path = [Idle, Starting, Ready, Running, Stopped, Running, Exited];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for next in [Idle, Starting, Ready, Running, Stopped, Exited, Crashed] {
            assert!(!Exited.can_transition_to(next));
            assert!(!Crashed.can_transition_to(next));
        }
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Idle.can_transition_to(Running));
        assert!(!Starting.can_transition_to(Stopped));
        assert!(!Running.can_transition_to(Ready));
        assert!(Starting.can_transition_to(Crashed));
    }
}
