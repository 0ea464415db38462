//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

mod schema_endpoints;
mod schema_process;

pub use schema_endpoints::*;
pub use schema_process::*;

/// Shared default helper used by submodules.
pub(crate) fn default_true() -> bool {
    true
}

/// Root configuration of one sandbox instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub sandbox: SandboxSection,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub restart: RestartConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub endpoints: EndpointsConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default = "default_processes")]
    pub processes: Vec<ProcessConfig>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxSection::default(),
            display: DisplayConfig::default(),
            restart: RestartConfig::default(),
            shutdown: ShutdownConfig::default(),
            health: HealthConfig::default(),
            endpoints: EndpointsConfig::default(),
            control: ControlConfig::default(),
            logging: LoggingConfig::default(),
            processes: default_processes(),
        }
    }
}

impl SandboxConfig {
    /// Look up a process by name.
    pub fn process(&self, name: &str) -> Option<&ProcessConfig> {
        self.processes.iter().find(|p| p.name == name)
    }

    /// Effective restart policy for a process (its override, else the global one).
    pub fn restart_for(&self, process: &ProcessConfig) -> RestartConfig {
        process.restart.clone().unwrap_or_else(|| self.restart.clone())
    }
}

/// Sandbox identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSection {
    /// Name used in logs and status output.
    #[serde(default = "default_sandbox_name")]
    pub name: String,

    /// PID file guarding against two supervisors for the same sandbox.
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

fn default_sandbox_name() -> String {
    "sandbox".to_string()
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            name: default_sandbox_name(),
            pid_file: None,
        }
    }
}

/// Virtual display geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// X display number (`:99`).
    #[serde(default = "default_display_number")]
    pub number: u32,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_depth")]
    pub depth: u32,
}

fn default_display_number() -> u32 {
    99
}

fn default_width() -> u32 {
    1440
}

fn default_height() -> u32 {
    900
}

fn default_depth() -> u32 {
    24
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            number: default_display_number(),
            width: default_width(),
            height: default_height(),
            depth: default_depth(),
        }
    }
}

impl DisplayConfig {
    /// Value for the `DISPLAY` environment variable.
    pub fn display_name(&self) -> String {
        format!(":{}", self.number)
    }

    /// Substitute `{display}`, `{width}`, `{height}` and `{depth}` placeholders.
    pub fn expand(&self, value: &str) -> String {
        value
            .replace("{display}", &self.number.to_string())
            .replace("{width}", &self.width.to_string())
            .replace("{height}", &self.height.to_string())
            .replace("{depth}", &self.depth.to_string())
    }
}

/// Graceful shutdown settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Time each process gets to exit after SIGTERM before it is killed.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

fn default_grace_period() -> u64 {
    10
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period(),
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Liveness re-probing of ready processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds between liveness probes; 0 disables them.
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,
}

fn default_liveness_interval() -> u64 {
    15
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            liveness_interval_secs: default_liveness_interval(),
        }
    }
}

impl HealthConfig {
    pub fn liveness_interval(&self) -> Option<Duration> {
        match self.liveness_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Control API listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_host")]
    pub host: String,

    #[serde(default = "default_control_port")]
    pub port: u16,
}

fn default_control_host() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    7070
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: default_control_host(),
            port: default_control_port(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines on the console instead of text.
    #[serde(default)]
    pub json: bool,

    /// Directory for daily rolling log files.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
