//! Process and session state machines.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Not launched yet.
    NotStarted,
    /// Launched, readiness probe pending.
    Starting,
    /// Probe passed.
    Ready,
    /// Running, but a liveness re-probe failed.
    Degraded,
    /// Not running; may be waiting for a restart.
    Stopped,
    /// Gave up: startup probe failed or restart budget exhausted.
    Failed,
}

impl ProcessState {
    /// Whether the process counts as serving.
    pub fn is_ready(&self) -> bool {
        matches!(self, ProcessState::Ready)
    }

    /// Whether an OS process or task is believed to be alive.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Ready | ProcessState::Degraded
        )
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::NotStarted => write!(f, "not_started"),
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Ready => write!(f, "ready"),
            ProcessState::Degraded => write!(f, "degraded"),
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Failed => write!(f, "failed"),
        }
    }
}

/// Overall state of a sandbox session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    Running,
    Degraded,
    ShuttingDown,
    Terminated,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated)
    }

    /// Whether the sandbox is usable by an orchestrator.
    pub fn is_serving(&self) -> bool {
        matches!(self, SessionState::Running)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Initializing => write!(f, "initializing"),
            SessionState::Running => write!(f, "running"),
            SessionState::Degraded => write!(f, "degraded"),
            SessionState::ShuttingDown => write!(f, "shutting_down"),
            SessionState::Terminated => write!(f, "terminated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_state_display_matches_serde() {
        for state in [
            ProcessState::NotStarted,
            ProcessState::Starting,
            ProcessState::Ready,
            ProcessState::Degraded,
            ProcessState::Stopped,
            ProcessState::Failed,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
        }
    }

    #[test]
    fn test_session_state_display_matches_serde() {
        for state in [
            SessionState::Initializing,
            SessionState::Running,
            SessionState::Degraded,
            SessionState::ShuttingDown,
            SessionState::Terminated,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
        }
    }

    #[test]
    fn test_process_state_predicates() {
        assert!(ProcessState::Ready.is_ready());
        assert!(!ProcessState::Degraded.is_ready());
        assert!(ProcessState::Degraded.is_running());
        assert!(ProcessState::Starting.is_running());
        assert!(!ProcessState::Stopped.is_running());
        assert!(!ProcessState::Failed.is_running());
    }

    #[test]
    fn test_session_state_predicates() {
        assert!(SessionState::Terminated.is_terminal());
        assert!(!SessionState::ShuttingDown.is_terminal());
        assert!(SessionState::Running.is_serving());
        assert!(!SessionState::Degraded.is_serving());
    }
}
