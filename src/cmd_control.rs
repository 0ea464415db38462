//! `stop`, `status` and `check-config` handlers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use sandboxd_config::{ConfigLoader, ConfigValidator, SandboxConfig};
use sandboxd_supervisor::{send_signal_to_pid, DependencyGraph, PidFile, SandboxSignal};

/// Signal the supervisor recorded in the PID file and wait for it to exit.
pub(crate) async fn stop_sandbox(
    config: &SandboxConfig,
    pid_file: Option<PathBuf>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = pid_file.or_else(|| config.sandbox.pid_file.clone()) else {
        return Err("no PID file configured; set sandbox.pid_file or pass --pid-file".into());
    };
    let mut pid_file = PidFile::new(&path);

    let pid = match pid_file.read_pid()? {
        Some(pid) if PidFile::is_process_running(pid) => pid,
        Some(pid) => {
            println!("sandboxd is not running (stale PID {} in {})", pid, path.display());
            return Ok(());
        }
        None => {
            println!("sandboxd is not running");
            return Ok(());
        }
    };

    let signal = if force {
        SandboxSignal::Terminate
    } else {
        SandboxSignal::Shutdown
    };
    info!("Stopping sandboxd (PID: {})", pid);
    send_signal_to_pid(pid, signal)?;

    // Teardown may use the whole grace period before the supervisor exits.
    let patience = config.shutdown.grace_period() + Duration::from_secs(5);
    let deadline = Instant::now() + patience;
    while Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !PidFile::is_process_running(pid) {
            if force {
                pid_file.remove()?;
            }
            println!("sandboxd stopped");
            return Ok(());
        }
    }

    let hint = if force { "" } else { "; try --force" };
    Err(format!("sandboxd (PID {}) did not exit within {:?}{}", pid, patience, hint).into())
}

/// Fetch `/status` from the control API and print it.
pub(crate) async fn show_status(
    config: &SandboxConfig,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("http://{}:{}/status", config.control.host, config.control.port);
    let response = reqwest::get(&url)
        .await
        .map_err(|e| format!("control API unreachable at {}: {}", url, e))?;
    let body: serde_json::Value = response.json().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!(
        "Sandbox: {} ({})",
        body["name"].as_str().unwrap_or("?"),
        body["state"].as_str().unwrap_or("?")
    );
    if let Some(error) = body["error"].as_str() {
        println!("Error:   {}", error);
    }
    println!();
    println!("{:<22} {:<12} {:>8} {:>9}", "PROCESS", "STATE", "PID", "RESTARTS");
    for process in body["processes"].as_array().into_iter().flatten() {
        let pid = process["pid"]
            .as_u64()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<22} {:<12} {:>8} {:>9}",
            process["name"].as_str().unwrap_or("?"),
            process["state"].as_str().unwrap_or("?"),
            pid,
            process["restart_count"].as_u64().unwrap_or(0)
        );
    }

    for (label, key) in [("Viewer", "vnc_url"), ("Automation", "automation_url")] {
        if let Some(url) = body[key].as_str() {
            println!("{:<11} {}", format!("{}:", label), url);
        }
    }
    Ok(())
}

/// Validate the configuration and print the startup levels.
pub(crate) fn check_config(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::discover(path)?;
    let result = ConfigValidator::validate(&config)?;

    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    for error in &result.errors {
        println!("error:   {}: {}", error.path, error.message);
    }
    if !result.is_valid() {
        return Err(format!("configuration has {} error(s)", result.errors.len()).into());
    }

    let graph = DependencyGraph::from_processes(&config.processes)?;
    println!("Configuration OK ({} processes)", graph.len());
    for (depth, level) in graph.levels().iter().enumerate() {
        println!("  level {}: {}", depth, level.join(", "));
    }
    Ok(())
}

pub(crate) fn print_default_config() -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", toml::to_string_pretty(&SandboxConfig::default())?);
    Ok(())
}
