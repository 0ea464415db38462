//! Launching and signalling managed processes.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use sandboxd_config::{DisplayConfig, ProcessConfig};
use sandboxd_gateway::GatewayError;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SupervisorError;

/// How a process instance ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitRecord {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl ExitRecord {
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            error: None,
            at: Utc::now(),
        }
    }

    /// A clean exit with status 0.
    pub fn clean() -> Self {
        Self {
            code: Some(0),
            signal: None,
            error: None,
            at: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            code: None,
            signal: None,
            error: Some(error.into()),
            at: Utc::now(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0) && self.error.is_none()
    }
}

impl std::fmt::Display for ExitRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(error) = &self.error {
            return write!(f, "{}", error);
        }
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "killed by signal {}", signal),
            (None, None) => write!(f, "exited"),
        }
    }
}

/// Everything needed to exec one external process.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    /// Ready-marker pattern watched on stdout and stderr.
    pub marker: Option<String>,
}

impl LaunchSpec {
    /// Resolve display placeholders and inject `DISPLAY`, which the process
    /// may still override through its own `env`.
    pub fn from_config(
        config: &ProcessConfig,
        display: &DisplayConfig,
    ) -> Result<Self, SupervisorError> {
        let program = config
            .command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| SupervisorError::Spawn {
                process: config.name.clone(),
                reason: "no command configured".to_string(),
            })?;

        let mut env = vec![("DISPLAY".to_string(), display.display_name())];
        let mut overrides: Vec<_> = config.env.iter().collect();
        overrides.sort();
        for (key, value) in overrides {
            env.retain(|(k, _)| k != key);
            env.push((key.clone(), display.expand(value)));
        }

        Ok(Self {
            name: config.name.clone(),
            program: display.expand(program),
            args: config.args.iter().map(|a| display.expand(a)).collect(),
            env,
            working_dir: config.working_dir.clone(),
            marker: config.probe.pattern.clone().filter(|_| {
                config.probe.kind == sandboxd_config::ProbeKind::LogMarker
            }),
        })
    }
}

/// A running process instance, external or in-process.
#[async_trait]
pub trait ProcessHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Wait for the instance to end. Safe to call again after it returned.
    async fn wait(&mut self) -> ExitRecord;

    /// Ask the instance to stop.
    async fn terminate(&mut self);

    /// Stop the instance now.
    async fn kill(&mut self);

    /// Remove anything the instance left behind after it ended.
    async fn cleanup(&mut self) {}
}

/// An external process running in its own process group.
pub struct ChildHandle {
    name: String,
    child: Child,
    pid: Option<u32>,
    exit: Option<ExitRecord>,
}

impl ChildHandle {
    /// Spawn the process. Output lines are re-emitted as tracing events and
    /// the returned flag flips once a line matches the ready marker.
    pub fn spawn(launch: &LaunchSpec) -> Result<(Self, watch::Receiver<bool>), SupervisorError> {
        let marker = launch
            .marker
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| SupervisorError::Spawn {
                process: launch.name.clone(),
                reason: format!("invalid ready marker: {}", e),
            })?;

        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        if let Some(dir) = &launch.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| SupervisorError::Spawn {
            process: launch.name.clone(),
            reason: format!("{}: {}", launch.program, e),
        })?;
        let pid = child.id();
        info!("Spawned {} (PID: {:?})", launch.name, pid);

        let (marker_tx, marker_rx) = watch::channel(false);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(
                launch.name.clone(),
                "stdout",
                stdout,
                marker.clone(),
                marker_tx.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(
                launch.name.clone(),
                "stderr",
                stderr,
                marker,
                marker_tx,
            ));
        }

        Ok((
            Self {
                name: launch.name.clone(),
                child,
                pid,
                exit: None,
            },
            marker_rx,
        ))
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return;
        };
        match killpg(Pid::from_raw(pid as i32), signal) {
            Ok(()) => debug!("Sent {:?} to process group of {}", signal, self.name),
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => warn!("Failed to send {:?} to {}: {}", signal, self.name, e),
        }
    }
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&mut self) -> ExitRecord {
        if let Some(exit) = &self.exit {
            return exit.clone();
        }
        let exit = match self.child.wait().await {
            Ok(status) => ExitRecord::from_status(status),
            Err(e) => ExitRecord::failed(format!("wait failed: {}", e)),
        };
        self.exit = Some(exit.clone());
        exit
    }

    async fn terminate(&mut self) {
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGTERM);
        #[cfg(not(unix))]
        let _ = self.child.start_kill();
    }

    async fn kill(&mut self) {
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
        let _ = self.child.start_kill();
    }

    /// Kill whatever the leader left running in its group.
    async fn cleanup(&mut self) {
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
    }
}

async fn forward_output<R>(
    name: String,
    stream: &'static str,
    reader: R,
    marker: Option<Regex>,
    ready: watch::Sender<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(process = %name, stream, "{}", line);
        if let Some(marker) = &marker {
            if !*ready.borrow() && marker.is_match(&line) {
                debug!("{} printed its ready marker", name);
                ready.send_replace(true);
            }
        }
    }
}

/// A builtin process running as a task of the supervisor.
pub struct TaskHandle {
    join: Option<JoinHandle<Result<(), GatewayError>>>,
    cancel: CancellationToken,
    exit: Option<ExitRecord>,
}

impl TaskHandle {
    pub fn new(join: JoinHandle<Result<(), GatewayError>>, cancel: CancellationToken) -> Self {
        Self {
            join: Some(join),
            cancel,
            exit: None,
        }
    }
}

#[async_trait]
impl ProcessHandle for TaskHandle {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> ExitRecord {
        if let Some(exit) = &self.exit {
            return exit.clone();
        }
        let Some(join) = self.join.as_mut() else {
            return ExitRecord::failed("task handle already consumed");
        };
        let exit = match join.await {
            Ok(Ok(())) => ExitRecord::clean(),
            Ok(Err(e)) => ExitRecord::failed(e.to_string()),
            Err(e) if e.is_cancelled() => ExitRecord::failed("task aborted"),
            Err(e) => ExitRecord::failed(format!("task panicked: {}", e)),
        };
        self.join = None;
        self.exit = Some(exit.clone());
        exit
    }

    async fn terminate(&mut self) {
        self.cancel.cancel();
    }

    async fn kill(&mut self) {
        self.cancel.cancel();
        if let Some(join) = &self.join {
            join.abort();
        }
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
