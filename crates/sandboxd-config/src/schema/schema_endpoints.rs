//! Externally exposed endpoint definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::schema_process::{names, DEFAULT_BROWSER_PORT, DEFAULT_VNC_PORT};

/// Both stable external endpoints of the sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default)]
    pub automation: AutomationEndpointConfig,

    #[serde(default)]
    pub web: WebEndpointConfig,
}

/// Automation protocol endpoint, relayed to the browser engine's control port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationEndpointConfig {
    #[serde(default = "default_public_host")]
    pub host: String,

    #[serde(default = "default_automation_port")]
    pub port: u16,

    /// `host:port` of the engine's local control endpoint.
    #[serde(default = "default_automation_backend")]
    pub backend: String,

    /// Process whose readiness makes `backend` reachable.
    #[serde(default = "default_automation_backend_process")]
    pub backend_process: String,

    /// Whether the engine accepts several concurrent clients.
    #[serde(default)]
    pub multiplex: bool,

    /// Upper bound on holding a client while the engine is unreachable.
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_ms: u64,

    #[serde(default = "default_dial_initial_backoff")]
    pub dial_initial_backoff_ms: u64,

    #[serde(default = "default_dial_max_backoff")]
    pub dial_max_backoff_ms: u64,
}

fn default_public_host() -> String {
    "0.0.0.0".to_string()
}

fn default_automation_port() -> u16 {
    37367
}

fn default_automation_backend() -> String {
    format!("127.0.0.1:{}", DEFAULT_BROWSER_PORT)
}

fn default_automation_backend_process() -> String {
    names::BROWSER.to_string()
}

fn default_dial_timeout() -> u64 {
    30_000
}

fn default_dial_initial_backoff() -> u64 {
    100
}

fn default_dial_max_backoff() -> u64 {
    2_000
}

impl Default for AutomationEndpointConfig {
    fn default() -> Self {
        Self {
            host: default_public_host(),
            port: default_automation_port(),
            backend: default_automation_backend(),
            backend_process: default_automation_backend_process(),
            multiplex: false,
            dial_timeout_ms: default_dial_timeout(),
            dial_initial_backoff_ms: default_dial_initial_backoff(),
            dial_max_backoff_ms: default_dial_max_backoff(),
        }
    }
}

impl AutomationEndpointConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn dial_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.dial_initial_backoff_ms)
    }

    pub fn dial_max_backoff(&self) -> Duration {
        Duration::from_millis(self.dial_max_backoff_ms)
    }
}

/// Remote-desktop-over-WebSocket endpoint, bridged to the VNC server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebEndpointConfig {
    #[serde(default = "default_public_host")]
    pub host: String,

    #[serde(default = "default_web_port")]
    pub port: u16,

    /// `host:port` of the local VNC server.
    #[serde(default = "default_web_backend")]
    pub backend: String,

    #[serde(default = "default_web_backend_process")]
    pub backend_process: String,

    /// Static viewer front-end (e.g. a noVNC checkout) served next to the bridge.
    #[serde(default)]
    pub web_root: Option<PathBuf>,

    /// Budget for dialing the VNC server per viewer.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_web_port() -> u16 {
    6080
}

fn default_web_backend() -> String {
    format!("127.0.0.1:{}", DEFAULT_VNC_PORT)
}

fn default_web_backend_process() -> String {
    names::VNC_SERVER.to_string()
}

fn default_connect_timeout() -> u64 {
    2_000
}

impl Default for WebEndpointConfig {
    fn default() -> Self {
        Self {
            host: default_public_host(),
            port: default_web_port(),
            backend: default_web_backend(),
            backend_process: default_web_backend_process(),
            web_root: None,
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl WebEndpointConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
