//! Shared fixtures: sandboxes made of `/bin/sh` children and marker files.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use sandboxd_config::{
    HealthConfig, ProbeConfig, ProcessConfig, RestartConfig, SandboxConfig, ShutdownConfig,
};
use sandboxd_supervisor::{SessionSnapshot, Supervisor};

pub fn sh(name: &str, script: impl Into<String>) -> ProcessConfig {
    ProcessConfig::command(name, "/bin/sh").with_args(["-c".to_string(), script.into()])
}

/// A process that becomes ready (by touching `<name>.ready`) after `delay`
/// and then idles.
pub fn ready_after(dir: &Path, name: &str, delay: Duration) -> ProcessConfig {
    let marker = dir.join(format!("{}.ready", name));
    sh(
        name,
        format!(
            "sleep {:.2}; touch '{}'; exec sleep 60",
            delay.as_secs_f64(),
            marker.display()
        ),
    )
    .with_probe(file_probe(dir, name))
}

pub fn file_probe(dir: &Path, name: &str) -> ProbeConfig {
    ProbeConfig::file(dir.join(format!("{}.ready", name)).display().to_string())
        .with_interval(Duration::from_millis(50))
        .with_timeout(Duration::from_secs(10))
}

pub fn fast_restart(max_restarts: u32) -> RestartConfig {
    RestartConfig {
        max_restarts,
        window_secs: 60,
        initial_backoff_ms: 50,
        max_backoff_ms: 200,
        backoff_multiplier: 2.0,
        healthy_reset_secs: 60,
    }
}

pub fn sandbox(processes: Vec<ProcessConfig>) -> SandboxConfig {
    SandboxConfig {
        processes,
        shutdown: ShutdownConfig {
            grace_period_secs: 2,
        },
        health: HealthConfig {
            liveness_interval_secs: 0,
        },
        restart: fast_restart(3),
        ..Default::default()
    }
}

/// Wait for a snapshot matching `pred`, failing the test after `limit`.
pub async fn wait_for_status<F>(supervisor: &Supervisor, limit: Duration, pred: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    let mut rx = supervisor.subscribe();
    let found = tokio::time::timeout(limit, async {
        rx.wait_for(|s| pred(s)).await.map(|s| s.clone())
    })
    .await;
    match found {
        Ok(Ok(snapshot)) => snapshot,
        _ => panic!(
            "status condition not reached within {:?}; last status: {:#?}",
            limit,
            supervisor.status()
        ),
    }
}

pub fn read_pid(path: &Path) -> u32 {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .last()
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}
