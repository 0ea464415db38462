//! Supervisor errors.

use std::path::PathBuf;

use sandboxd_config::ConfigError;
use sandboxd_gateway::GatewayError;
use thiserror::Error;

use crate::state::SessionState;

/// Errors that can occur while supervising a sandbox.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A required process never became ready; the session never reached `Running`.
    #[error("Startup failed: process '{process}' {reason}")]
    StartupFailed { process: String, reason: String },

    /// A process exited unexpectedly. Recovered by the restart policy.
    #[error("Process '{process}' crashed: {status}")]
    ProcessCrashed { process: String, status: String },

    /// A process crashed more often than its restart budget allows.
    #[error("Process '{process}' exhausted its restart budget ({max} restarts)")]
    RestartBudgetExhausted { process: String, max: u32 },

    /// Stop was requested while startup was still in progress.
    #[error("Startup cancelled by stop request")]
    Cancelled,

    /// Invalid session state transition.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: SessionState, to: SessionState },

    /// The dependency graph contains a cycle.
    #[error("Dependency cycle involving: {0}")]
    DependencyCycle(String),

    /// A process depends on a process that is not configured.
    #[error("Process '{process}' depends on unknown process '{dependency}'")]
    UnknownDependency { process: String, dependency: String },

    /// The executable could not be launched.
    #[error("Failed to spawn '{process}': {reason}")]
    Spawn { process: String, reason: String },

    /// PID file exists and the owning process is alive.
    #[error("sandboxd already running (PID file: {path}, PID: {pid})")]
    AlreadyRunning { path: PathBuf, pid: u32 },

    /// Failed to create PID file.
    #[error("Failed to create PID file at {path}: {reason}")]
    PidFileCreation { path: PathBuf, reason: String },

    /// Failed to read PID file.
    #[error("Failed to read PID file at {path}: {reason}")]
    PidFileRead { path: PathBuf, reason: String },

    /// Failed to remove PID file.
    #[error("Failed to remove PID file at {path}: {reason}")]
    PidFileRemoval { path: PathBuf, reason: String },

    /// Failed to set up signal handlers.
    #[error("Failed to set up signal handlers: {0}")]
    SignalSetup(String),

    /// Signal delivery to another process failed.
    #[error("Failed to send {signal} to PID {pid}: {reason}")]
    SignalDelivery {
        signal: String,
        pid: u32,
        reason: String,
    },

    /// Gateway error.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_failed_names_process() {
        let err = SupervisorError::StartupFailed {
            process: "display".to_string(),
            reason: "did not become ready within 10s".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Startup failed: process 'display' did not become ready within 10s"
        );
    }

    #[test]
    fn test_process_crashed_display() {
        let err = SupervisorError::ProcessCrashed {
            process: "browser".to_string(),
            status: "exit code 1".to_string(),
        };
        assert!(err.to_string().contains("browser"));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn test_budget_exhausted_display() {
        let err = SupervisorError::RestartBudgetExhausted {
            process: "vnc-server".to_string(),
            max: 3,
        };
        assert!(err.to_string().contains("vnc-server"));
        assert!(err.to_string().contains("3 restarts"));
    }

    #[test]
    fn test_invalid_state_transition_display() {
        let err = SupervisorError::InvalidStateTransition {
            from: SessionState::Terminated,
            to: SessionState::Running,
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from terminated to running"
        );
    }

    #[test]
    fn test_already_running_display() {
        let err = SupervisorError::AlreadyRunning {
            path: PathBuf::from("/tmp/sandboxd.pid"),
            pid: 4242,
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/sandboxd.pid"));
        assert!(msg.contains("4242"));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: SupervisorError = ConfigError::Invalid("processes: empty".to_string()).into();
        assert!(matches!(err, SupervisorError::Config(_)));
        assert!(err.to_string().contains("processes: empty"));
    }

    #[test]
    fn test_gateway_error_conversion() {
        let gateway = GatewayError::Bind {
            addr: "0.0.0.0:6080".to_string(),
            reason: "address in use".to_string(),
        };
        let err: SupervisorError = gateway.into();
        assert!(err.to_string().contains("0.0.0.0:6080"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SupervisorError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }
}
