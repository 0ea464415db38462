//! Configuration validation.

use std::collections::{HashMap, HashSet};

use crate::error::ConfigError;
use crate::schema::{ProbeKind, ProcessKind, RestartConfig, SandboxConfig};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Collapse the errors into a single `ConfigError::Invalid`.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        if self.is_valid() {
            return Ok(self.warnings);
        }
        let joined = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(ConfigError::Invalid(joined))
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &SandboxConfig) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_processes(config, &mut result);
        Self::validate_dependencies(config, &mut result);
        Self::validate_endpoints(config, &mut result);
        Self::validate_restart("restart", &config.restart, &mut result);

        if config.shutdown.grace_period_secs == 0 {
            result.add_error(ValidationError::new(
                "shutdown.grace_period_secs",
                "grace_period_secs must be greater than 0",
            ));
        }

        if config.control.port == 0 {
            result.add_error(ValidationError::new("control.port", "Port cannot be 0"));
        }

        Ok(result)
    }

    fn validate_processes(config: &SandboxConfig, result: &mut ValidationResult) {
        if config.processes.is_empty() {
            result.add_error(ValidationError::new(
                "processes",
                "At least one process must be configured",
            ));
        }

        let mut seen = HashSet::new();
        let mut builtins: HashMap<ProcessKind, usize> = HashMap::new();

        for (i, process) in config.processes.iter().enumerate() {
            let path = format!("processes[{}]", i);

            if process.name.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.name", path),
                    "Process name cannot be empty",
                ));
            } else if !seen.insert(process.name.as_str()) {
                result.add_error(ValidationError::new(
                    format!("{}.name", path),
                    format!("Duplicate process name '{}'", process.name),
                ));
            }

            match process.kind {
                ProcessKind::Command => {
                    let missing = process
                        .command
                        .as_deref()
                        .map(|c| c.trim().is_empty())
                        .unwrap_or(true);
                    if missing {
                        result.add_error(ValidationError::new(
                            format!("{}.command", path),
                            "Command processes require a command",
                        ));
                    }
                }
                kind => {
                    *builtins.entry(kind).or_default() += 1;
                }
            }

            Self::validate_probe(&path, process, result);

            if let Some(restart) = &process.restart {
                Self::validate_restart(&format!("{}.restart", path), restart, result);
            }

            if process.critical && process.probe.kind == ProbeKind::None && !process.kind.is_builtin()
            {
                result.add_warning(ValidationWarning::new(
                    format!("{}.probe", path),
                    format!(
                        "Critical process '{}' has no readiness probe; it is considered ready as soon as it is spawned",
                        process.name
                    ),
                ));
            }
        }

        for (kind, count) in builtins {
            if count > 1 {
                result.add_error(ValidationError::new(
                    "processes",
                    format!("Builtin '{}' can only be declared once", kind),
                ));
            }
        }
    }

    fn validate_probe(
        path: &str,
        process: &crate::schema::ProcessConfig,
        result: &mut ValidationResult,
    ) {
        let probe = &process.probe;
        let probe_path = format!("{}.probe", path);

        match probe.kind {
            ProbeKind::None => {}
            ProbeKind::Tcp => {
                if probe.port.unwrap_or(0) == 0 {
                    result.add_error(ValidationError::new(
                        format!("{}.port", probe_path),
                        "tcp probes require a non-zero port",
                    ));
                }
            }
            ProbeKind::File => {
                if probe.path.as_deref().map(str::is_empty).unwrap_or(true) {
                    result.add_error(ValidationError::new(
                        format!("{}.path", probe_path),
                        "file probes require a path",
                    ));
                }
            }
            ProbeKind::LogMarker => match probe.pattern.as_deref() {
                None | Some("") => {
                    result.add_error(ValidationError::new(
                        format!("{}.pattern", probe_path),
                        "log_marker probes require a pattern",
                    ));
                }
                Some(pattern) => {
                    if let Err(e) = regex::Regex::new(pattern) {
                        result.add_error(ValidationError::new(
                            format!("{}.pattern", probe_path),
                            format!("Invalid regex: {}", e),
                        ));
                    }
                    if process.kind.is_builtin() {
                        result.add_error(ValidationError::new(
                            format!("{}.kind", probe_path),
                            "Builtin processes produce no output to match",
                        ));
                    }
                }
            },
        }

        if probe.timeout_ms == 0 {
            result.add_error(ValidationError::new(
                format!("{}.timeout_ms", probe_path),
                "timeout_ms must be greater than 0",
            ));
        }
        if probe.interval_ms == 0 {
            result.add_error(ValidationError::new(
                format!("{}.interval_ms", probe_path),
                "interval_ms must be greater than 0",
            ));
        }
    }

    fn validate_restart(path: &str, restart: &RestartConfig, result: &mut ValidationResult) {
        if restart.max_restarts == 0 {
            result.add_warning(ValidationWarning::new(
                format!("{}.max_restarts", path),
                "max_restarts is 0; the first crash exhausts the restart budget",
            ));
        }
        if restart.window_secs == 0 {
            result.add_error(ValidationError::new(
                format!("{}.window_secs", path),
                "window_secs must be greater than 0",
            ));
        }
        if restart.backoff_multiplier < 1.0 {
            result.add_error(ValidationError::new(
                format!("{}.backoff_multiplier", path),
                "backoff_multiplier must be at least 1.0",
            ));
        }
        if restart.max_backoff_ms < restart.initial_backoff_ms {
            result.add_error(ValidationError::new(
                format!("{}.max_backoff_ms", path),
                "max_backoff_ms must not be smaller than initial_backoff_ms",
            ));
        }
    }

    fn validate_dependencies(config: &SandboxConfig, result: &mut ValidationResult) {
        let names: HashSet<&str> = config.processes.iter().map(|p| p.name.as_str()).collect();
        let mut edges_ok = true;

        for (i, process) in config.processes.iter().enumerate() {
            for dep in &process.depends_on {
                if dep == &process.name {
                    edges_ok = false;
                    result.add_error(ValidationError::new(
                        format!("processes[{}].depends_on", i),
                        format!("Process '{}' depends on itself", process.name),
                    ));
                } else if !names.contains(dep.as_str()) {
                    edges_ok = false;
                    result.add_error(ValidationError::new(
                        format!("processes[{}].depends_on", i),
                        format!("Unknown process '{}'", dep),
                    ));
                }
            }
        }

        if edges_ok {
            if let Some(stuck) = Self::find_cycle(config) {
                result.add_error(ValidationError::new(
                    "processes",
                    format!("Dependency cycle involving: {}", stuck.join(", ")),
                ));
            }
        }
    }

    /// Kahn's algorithm; returns the processes that could never be scheduled.
    fn find_cycle(config: &SandboxConfig) -> Option<Vec<String>> {
        let mut indegree: HashMap<&str, usize> = config
            .processes
            .iter()
            .map(|p| (p.name.as_str(), p.depends_on.len()))
            .collect();
        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();

        while let Some(name) = ready.pop() {
            indegree.remove(name);
            for process in &config.processes {
                if process.depends_on.iter().any(|d| d == name) {
                    if let Some(d) = indegree.get_mut(process.name.as_str()) {
                        *d -= 1;
                        if *d == 0 {
                            ready.push(process.name.as_str());
                        }
                    }
                }
            }
        }

        if indegree.is_empty() {
            None
        } else {
            let mut stuck: Vec<String> = indegree.keys().map(|s| s.to_string()).collect();
            stuck.sort();
            Some(stuck)
        }
    }

    fn validate_endpoints(config: &SandboxConfig, result: &mut ValidationResult) {
        let automation = &config.endpoints.automation;
        let web = &config.endpoints.web;

        for (path, port) in [
            ("endpoints.automation.port", automation.port),
            ("endpoints.web.port", web.port),
        ] {
            if port == 0 {
                result.add_error(ValidationError::new(path, "Port cannot be 0"));
            }
        }

        if automation.port == web.port
            || automation.port == config.control.port
            || web.port == config.control.port
        {
            result.add_error(ValidationError::new(
                "endpoints",
                "automation, web and control ports must be distinct",
            ));
        }

        for (path, backend) in [
            ("endpoints.automation.backend", &automation.backend),
            ("endpoints.web.backend", &web.backend),
        ] {
            let port_ok = backend
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().map(|p| p > 0).unwrap_or(false))
                .unwrap_or(false);
            if !port_ok {
                result.add_error(ValidationError::new(
                    path,
                    format!("Backend '{}' must be in host:port form", backend),
                ));
            }
        }

        // Backends only matter for gateways that are actually declared.
        for (path, name, kind) in [
            (
                "endpoints.automation.backend_process",
                &automation.backend_process,
                ProcessKind::AutomationGateway,
            ),
            (
                "endpoints.web.backend_process",
                &web.backend_process,
                ProcessKind::WebGateway,
            ),
        ] {
            let declared = config.processes.iter().any(|p| p.kind == kind);
            if declared && config.process(name).is_none() {
                result.add_error(ValidationError::new(
                    path,
                    format!("Unknown process '{}'", name),
                ));
            }
        }

        if automation.dial_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "endpoints.automation.dial_timeout_ms",
                "dial_timeout_ms must be greater than 0",
            ));
        }
        if web.connect_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "endpoints.web.connect_timeout_ms",
                "connect_timeout_ms must be greater than 0",
            ));
        }

        if let Some(root) = &web.web_root {
            if !root.exists() {
                result.add_warning(ValidationWarning::new(
                    "endpoints.web.web_root",
                    format!("Web root does not exist: {:?}", root),
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
