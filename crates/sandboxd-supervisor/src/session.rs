//! Status snapshots of a sandbox session.

use chrono::{DateTime, Utc};
use sandboxd_config::{ProcessKind, SandboxConfig};
use serde::Serialize;

use crate::process::ExitRecord;
use crate::state::{ProcessState, SessionState};

/// Snapshot name of the automation endpoint.
pub const AUTOMATION_ENDPOINT: &str = "automation";
/// Snapshot name of the remote-desktop endpoint.
pub const WEB_ENDPOINT: &str = "web";

/// Point-in-time view of one managed process.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub name: String,
    pub kind: ProcessKind,
    pub state: ProcessState,
    pub critical: bool,
    pub depends_on: Vec<String>,
    pub pid: Option<u32>,
    /// Launch counter; 0 before the first launch.
    pub instance: u64,
    pub restart_count: u32,
    pub last_exit: Option<ExitRecord>,
    pub last_error: Option<String>,
    pub launched_at: Option<DateTime<Utc>>,
    pub ready_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of one external endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub name: String,
    /// External `host:port`; the bound address once the gateway is up.
    pub address: String,
    pub backend: String,
    pub backend_process: String,
    /// Whether new connections currently reach a ready backend.
    pub available: bool,
    /// Bumped each time the backend instance changes.
    pub generation: Option<u64>,
}

/// Everything `Status()` reports.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub name: String,
    pub state: SessionState,
    /// Terminal error, if the session ended or failed to start.
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub processes: Vec<ProcessSnapshot>,
    pub endpoints: Vec<EndpointSnapshot>,
}

impl SessionSnapshot {
    /// Snapshot of a session that has not started.
    pub fn initial(config: &SandboxConfig) -> Self {
        let processes = config
            .processes
            .iter()
            .map(|p| ProcessSnapshot {
                name: p.name.clone(),
                kind: p.kind,
                state: ProcessState::NotStarted,
                critical: p.critical,
                depends_on: p.depends_on.clone(),
                pid: None,
                instance: 0,
                restart_count: 0,
                last_exit: None,
                last_error: None,
                launched_at: None,
                ready_at: None,
                exited_at: None,
            })
            .collect();

        let mut endpoints = Vec::new();
        let declared = |kind| config.processes.iter().any(|p| p.kind == kind);
        if declared(ProcessKind::AutomationGateway) {
            let automation = &config.endpoints.automation;
            endpoints.push(EndpointSnapshot {
                name: AUTOMATION_ENDPOINT.to_string(),
                address: format!("{}:{}", automation.host, automation.port),
                backend: automation.backend.clone(),
                backend_process: automation.backend_process.clone(),
                available: false,
                generation: None,
            });
        }
        if declared(ProcessKind::WebGateway) {
            let web = &config.endpoints.web;
            endpoints.push(EndpointSnapshot {
                name: WEB_ENDPOINT.to_string(),
                address: format!("{}:{}", web.host, web.port),
                backend: web.backend.clone(),
                backend_process: web.backend_process.clone(),
                available: false,
                generation: None,
            });
        }

        Self {
            name: config.sandbox.name.clone(),
            state: SessionState::Initializing,
            error: None,
            started_at: None,
            updated_at: Utc::now(),
            processes,
            endpoints,
        }
    }

    pub fn process(&self, name: &str) -> Option<&ProcessSnapshot> {
        self.processes.iter().find(|p| p.name == name)
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointSnapshot> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Names of processes currently in `state`.
    pub fn processes_in(&self, state: ProcessState) -> Vec<&str> {
        self.processes
            .iter()
            .filter(|p| p.state == state)
            .map(|p| p.name.as_str())
            .collect()
    }
}
