//! Managed process, readiness probe and restart policy definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::default_true;

/// What the supervisor launches for a process entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    /// An external executable.
    #[default]
    Command,
    /// The in-process automation protocol relay.
    AutomationGateway,
    /// The in-process remote-desktop WebSocket bridge.
    WebGateway,
}

impl ProcessKind {
    pub fn is_builtin(&self) -> bool {
        !matches!(self, ProcessKind::Command)
    }
}

impl std::fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessKind::Command => write!(f, "command"),
            ProcessKind::AutomationGateway => write!(f, "automation_gateway"),
            ProcessKind::WebGateway => write!(f, "web_gateway"),
        }
    }
}

/// One managed process of the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Unique process name.
    pub name: String,

    #[serde(default)]
    pub kind: ProcessKind,

    /// Executable (required for `command` processes).
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides applied on top of the supervisor's environment.
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Names of processes that must be ready before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Load-bearing: exhausting its restart budget terminates the sandbox.
    #[serde(default = "default_true")]
    pub critical: bool,

    /// Keep running when a dependency restarts instead of restarting with it.
    #[serde(default)]
    pub tolerates_dependency_restart: bool,

    #[serde(default)]
    pub probe: ProbeConfig,

    /// Per-process restart policy override.
    #[serde(default)]
    pub restart: Option<RestartConfig>,
}

impl ProcessConfig {
    /// A command process with no arguments, dependencies or probe.
    pub fn command(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ProcessKind::Command,
            command: Some(command.into()),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            depends_on: Vec::new(),
            critical: true,
            tolerates_dependency_restart: false,
            probe: ProbeConfig::default(),
            restart: None,
        }
    }

    /// A builtin gateway process.
    pub fn builtin(name: impl Into<String>, kind: ProcessKind) -> Self {
        Self {
            kind,
            command: None,
            tolerates_dependency_restart: true,
            ..Self::command(name, "")
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn tolerates_dependency_restart(mut self, tolerates: bool) -> Self {
        self.tolerates_dependency_restart = tolerates;
        self
    }

    pub fn with_probe(mut self, probe: ProbeConfig) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_restart(mut self, restart: RestartConfig) -> Self {
        self.restart = Some(restart);
        self
    }
}

/// Kind of readiness check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Ready as soon as it is launched.
    #[default]
    None,
    /// A TCP connection to `host:port` succeeds.
    Tcp,
    /// `path` exists (e.g. an X socket).
    File,
    /// A stdout/stderr line matches `pattern`.
    LogMarker,
}

/// Readiness probe definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub kind: ProbeKind,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub pattern: Option<String>,

    /// Give up after this long.
    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,

    /// Delay between attempts.
    #[serde(default = "default_probe_interval")]
    pub interval_ms: u64,
}

fn default_probe_timeout() -> u64 {
    30_000
}

fn default_probe_interval() -> u64 {
    250
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            kind: ProbeKind::None,
            host: None,
            port: None,
            path: None,
            pattern: None,
            timeout_ms: default_probe_timeout(),
            interval_ms: default_probe_interval(),
        }
    }
}

impl ProbeConfig {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: ProbeKind::Tcp,
            host: Some(host.into()),
            port: Some(port),
            ..Default::default()
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self {
            kind: ProbeKind::File,
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn log_marker(pattern: impl Into<String>) -> Self {
        Self {
            kind: ProbeKind::LogMarker,
            pattern: Some(pattern.into()),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Restart policy: bounded exponential backoff with a per-window budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartConfig {
    /// Restarts allowed inside one window before the budget is exhausted.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Time window for counting restarts (in seconds).
    #[serde(default = "default_restart_window")]
    pub window_secs: u64,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Ready this long without a crash clears the failure window.
    #[serde(default = "default_healthy_reset")]
    pub healthy_reset_secs: u64,
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_window() -> u64 {
    60
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_healthy_reset() -> u64 {
    30
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            window_secs: default_restart_window(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            healthy_reset_secs: default_healthy_reset(),
        }
    }
}

impl RestartConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn healthy_reset(&self) -> Duration {
        Duration::from_secs(self.healthy_reset_secs)
    }
}

/// Names of the processes in the standard sandbox topology.
pub mod names {
    pub const DISPLAY: &str = "display";
    pub const WINDOW_MANAGER: &str = "window-manager";
    pub const VNC_SERVER: &str = "vnc-server";
    pub const WEB_GATEWAY: &str = "web-gateway";
    pub const BROWSER: &str = "browser";
    pub const AUTOMATION_GATEWAY: &str = "automation-gateway";
}

pub(crate) const DEFAULT_VNC_PORT: u16 = 5900;
pub(crate) const DEFAULT_BROWSER_PORT: u16 = 9323;

/// The standard sandbox: Xvfb, fluxbox, x11vnc, Playwright server and both gateways.
pub fn default_processes() -> Vec<ProcessConfig> {
    vec![
        ProcessConfig::command(names::DISPLAY, "Xvfb")
            .with_args([
                ":{display}",
                "-screen",
                "0",
                "{width}x{height}x{depth}",
                "-ac",
                "-nolisten",
                "tcp",
            ])
            .with_probe(
                ProbeConfig::file("/tmp/.X11-unix/X{display}")
                    .with_timeout(Duration::from_secs(10)),
            ),
        ProcessConfig::command(names::WINDOW_MANAGER, "fluxbox")
            .depends_on(names::DISPLAY)
            .critical(false),
        ProcessConfig::command(names::VNC_SERVER, "x11vnc")
            .with_args([
                "-display",
                ":{display}",
                "-forever",
                "-shared",
                "-nopw",
                "-localhost",
                "-quiet",
                "-rfbport",
                "5900",
            ])
            .depends_on(names::DISPLAY)
            .with_probe(
                ProbeConfig::tcp("127.0.0.1", DEFAULT_VNC_PORT)
                    .with_timeout(Duration::from_secs(15)),
            ),
        ProcessConfig::builtin(names::WEB_GATEWAY, ProcessKind::WebGateway)
            .depends_on(names::VNC_SERVER),
        ProcessConfig::command(names::BROWSER, "npx")
            .with_args([
                "playwright",
                "run-server",
                "--host",
                "127.0.0.1",
                "--port",
                "9323",
            ])
            .depends_on(names::DISPLAY)
            .with_probe(
                ProbeConfig::tcp("127.0.0.1", DEFAULT_BROWSER_PORT)
                    .with_timeout(Duration::from_secs(60)),
            ),
        ProcessConfig::builtin(names::AUTOMATION_GATEWAY, ProcessKind::AutomationGateway)
            .depends_on(names::BROWSER)
            .depends_on(names::DISPLAY),
    ]
}
