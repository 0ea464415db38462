//! Configuration loader.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::schema::SandboxConfig;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<SandboxConfig, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<SandboxConfig, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let mut config: SandboxConfig = toml::from_str(&expanded)?;
        Self::expand_paths(&mut config);
        Ok(config)
    }

    /// Load from `path` when given, otherwise fall back to the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<SandboxConfig, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(SandboxConfig::default()),
        }
    }

    /// Per-user config file, e.g. `~/.config/sandboxd/sandbox.toml`.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sandboxd").join("sandbox.toml"))
    }

    /// Load `path` when given, else the per-user file when it exists, else
    /// the built-in defaults.
    pub fn discover(path: Option<&Path>) -> Result<SandboxConfig, ConfigError> {
        if path.is_some() {
            return Self::load_or_default(path);
        }
        match Self::default_config_path().filter(|p| p.exists()) {
            Some(found) => Self::load(&found),
            None => Ok(SandboxConfig::default()),
        }
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let mut result = content.to_string();
        let re = regex::Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.config`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }

    fn expand_path_buf(path: &Path) -> PathBuf {
        PathBuf::from(Self::expand_path(&path.to_string_lossy()))
    }

    fn expand_paths(config: &mut SandboxConfig) {
        if let Some(pid_file) = config.sandbox.pid_file.as_mut() {
            *pid_file = Self::expand_path_buf(pid_file);
        }
        if let Some(dir) = config.logging.dir.as_mut() {
            *dir = Self::expand_path_buf(dir);
        }
        if let Some(root) = config.endpoints.web.web_root.as_mut() {
            *root = Self::expand_path_buf(root);
        }
        for process in &mut config.processes {
            if let Some(dir) = process.working_dir.as_mut() {
                *dir = Self::expand_path_buf(dir);
            }
        }
    }
}
