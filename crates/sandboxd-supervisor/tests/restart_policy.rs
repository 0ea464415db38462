//! Crash recovery, cascading restarts and restart budgets.

mod common;

use std::time::Duration;

use common::{fast_restart, file_probe, ready_after, sandbox, sh, wait_for_status};
use sandboxd_supervisor::{ProcessState, SessionState, Supervisor};
use tempfile::TempDir;

/// Crashes on the first launch only; later launches idle.
fn crash_once(dir: &TempDir, name: &str) -> sandboxd_config::ProcessConfig {
    let crashed = dir.path().join(format!("{}.crashed", name));
    sh(
        name,
        format!(
            "if [ -f '{0}' ]; then exec sleep 60; else touch '{0}'; sleep 0.3; exit 1; fi",
            crashed.display()
        ),
    )
}

#[tokio::test]
async fn test_crashed_process_is_restarted() {
    let dir = TempDir::new().unwrap();
    let supervisor = Supervisor::new(sandbox(vec![crash_once(&dir, "a")])).unwrap();
    supervisor.start().await.unwrap();

    let status = wait_for_status(&supervisor, Duration::from_secs(10), |s| {
        s.process("a")
            .map(|p| p.instance == 2 && p.state == ProcessState::Ready)
            .unwrap_or(false)
    })
    .await;
    let a = status.process("a").unwrap();
    assert_eq!(a.restart_count, 1);
    assert_eq!(a.last_exit.as_ref().unwrap().code, Some(1));
    assert!(a.last_error.as_deref().unwrap().contains("crashed"));

    wait_for_status(&supervisor, Duration::from_secs(5), |s| {
        s.state == SessionState::Running
    })
    .await;
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_non_critical_exhaustion_degrades_session() {
    let dir = TempDir::new().unwrap();
    let config = sandbox(vec![
        ready_after(dir.path(), "a", Duration::from_millis(100)),
        sh("b", "sleep 0.2; exit 1")
            .depends_on("a")
            .critical(false)
            .with_restart(fast_restart(2)),
    ]);
    let supervisor = Supervisor::new(config).unwrap();
    supervisor.start().await.unwrap();

    let status = wait_for_status(&supervisor, Duration::from_secs(10), |s| {
        s.state == SessionState::Degraded
            && s.process("b").map(|p| p.state == ProcessState::Failed).unwrap_or(false)
    })
    .await;
    let b = status.process("b").unwrap();
    assert_eq!(b.restart_count, 3);
    assert_eq!(b.instance, 3);
    assert!(b.last_error.as_deref().unwrap().contains("restart budget"));
    assert_eq!(status.process("a").unwrap().state, ProcessState::Ready);

    // Still serving; only stop ends it.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(supervisor.status().state, SessionState::Degraded);
    supervisor.stop().await.unwrap();
    assert!(supervisor.status().error.is_none());
}

#[tokio::test]
async fn test_critical_exhaustion_terminates_session() {
    let config = sandbox(vec![sh("a", "sleep 0.2; exit 3").with_restart(fast_restart(1))]);
    let supervisor = Supervisor::new(config).unwrap();
    supervisor.start().await.unwrap();

    let snapshot = tokio::time::timeout(Duration::from_secs(10), supervisor.wait_terminated())
        .await
        .unwrap();
    assert_eq!(snapshot.state, SessionState::Terminated);
    let error = snapshot.error.clone().unwrap();
    assert!(error.contains("'a'"), "{}", error);
    assert!(error.contains("restart budget"), "{}", error);
    assert_eq!(snapshot.process("a").unwrap().state, ProcessState::Failed);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_dependents_restart_with_their_dependency() {
    let dir = TempDir::new().unwrap();
    let config = sandbox(vec![
        crash_once(&dir, "a"),
        sh("b", "exec sleep 60").depends_on("a"),
        sh("c", "exec sleep 60")
            .depends_on("a")
            .tolerates_dependency_restart(true),
    ]);
    let supervisor = Supervisor::new(config).unwrap();
    supervisor.start().await.unwrap();

    let status = wait_for_status(&supervisor, Duration::from_secs(10), |s| {
        s.state == SessionState::Running
            && s.process("a").map(|p| p.instance == 2).unwrap_or(false)
            && s.process("b").map(|p| p.instance == 2).unwrap_or(false)
    })
    .await;

    let a = status.process("a").unwrap();
    let b = status.process("b").unwrap();
    assert!(b.launched_at.unwrap() >= a.ready_at.unwrap());
    // Stopped along with its dependency, not crashed.
    assert_eq!(b.restart_count, 0);

    let c = status.process("c").unwrap();
    assert_eq!(c.instance, 1);
    assert_eq!(c.state, ProcessState::Ready);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_non_critical_restart_keeps_session_running() {
    let dir = TempDir::new().unwrap();
    let config = sandbox(vec![
        ready_after(dir.path(), "a", Duration::from_millis(100)),
        crash_once(&dir, "wm").depends_on("a").critical(false),
    ]);
    let supervisor = Supervisor::new(config).unwrap();
    supervisor.start().await.unwrap();

    let mut rx = supervisor.subscribe();
    let watched = tokio::time::timeout(Duration::from_secs(10), async {
        let mut seen = Vec::new();
        loop {
            {
                let snapshot = rx.borrow_and_update();
                seen.push(snapshot.state);
                let wm = snapshot.process("wm").unwrap();
                if wm.instance == 2 && wm.state == ProcessState::Ready {
                    return seen;
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    assert!(watched.iter().all(|s| *s == SessionState::Running), "{:?}", watched);
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_backoff_delays_relaunch() {
    let dir = TempDir::new().unwrap();
    let mut restart = fast_restart(3);
    restart.initial_backoff_ms = 800;
    restart.max_backoff_ms = 800;
    let config = sandbox(vec![crash_once(&dir, "a").with_restart(restart)]);
    let supervisor = Supervisor::new(config).unwrap();
    supervisor.start().await.unwrap();

    let status = wait_for_status(&supervisor, Duration::from_secs(10), |s| {
        s.process("a").map(|p| p.instance == 2).unwrap_or(false)
    })
    .await;
    let a = status.process("a").unwrap();
    let gap = a.launched_at.unwrap() - a.last_exit.as_ref().unwrap().at;
    assert!(gap >= chrono::Duration::milliseconds(750), "relaunched after {}", gap);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_healthy_period_resets_restart_window() {
    let mut restart = fast_restart(1);
    restart.healthy_reset_secs = 1;
    let config = sandbox(vec![sh("a", "sleep 1.5; exit 1")
        .critical(false)
        .with_restart(restart)]);
    let supervisor = Supervisor::new(config).unwrap();
    supervisor.start().await.unwrap();

    // Each crash lands after a full healthy period, so one restart per
    // window is always enough.
    let mut rx = supervisor.subscribe();
    let seen = tokio::time::timeout(Duration::from_secs(15), async {
        let mut seen = Vec::new();
        loop {
            {
                let snapshot = rx.borrow_and_update();
                let a = snapshot.process("a").unwrap();
                seen.push((snapshot.state, a.state));
                if a.instance >= 4 && a.state == ProcessState::Ready {
                    return seen;
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    assert!(seen.iter().all(|(_, a)| *a != ProcessState::Failed), "{:?}", seen);
    assert!(seen.iter().all(|(s, _)| *s == SessionState::Running), "{:?}", seen);
    assert_eq!(supervisor.status().process("a").unwrap().restart_count, 3);
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_liveness_failure_degrades_until_recovered() {
    let dir = TempDir::new().unwrap();
    let mut config = sandbox(vec![ready_after(dir.path(), "a", Duration::from_millis(50))]);
    config.health.liveness_interval_secs = 1;
    let supervisor = Supervisor::new(config).unwrap();
    supervisor.start().await.unwrap();

    let marker = dir.path().join("a.ready");
    std::fs::remove_file(&marker).unwrap();
    let status = wait_for_status(&supervisor, Duration::from_secs(5), |s| {
        s.state == SessionState::Degraded
            && s.process("a").map(|p| p.state == ProcessState::Degraded).unwrap_or(false)
    })
    .await;
    let a = status.process("a").unwrap();
    assert_eq!(a.instance, 1);
    assert!(a.pid.is_some());

    std::fs::write(&marker, b"").unwrap();
    let status = wait_for_status(&supervisor, Duration::from_secs(5), |s| {
        s.state == SessionState::Running
            && s.process("a").map(|p| p.state == ProcessState::Ready).unwrap_or(false)
    })
    .await;
    let a = status.process("a").unwrap();
    assert_eq!(a.instance, 1);
    assert_eq!(a.restart_count, 0);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_liveness_recovery_rearms_healthy_reset() {
    let dir = TempDir::new().unwrap();
    let ready = dir.path().join("a.ready");
    let die = dir.path().join("a.die");
    let mut restart = fast_restart(1);
    restart.healthy_reset_secs = 3;
    let mut config = sandbox(vec![sh(
        "a",
        format!(
            "touch '{0}'; while [ ! -f '{1}' ]; do sleep 0.05; done; rm -f '{1}'; exit 1",
            ready.display(),
            die.display()
        ),
    )
    .with_probe(file_probe(dir.path(), "a"))
    .critical(false)
    .with_restart(restart)]);
    config.health.liveness_interval_secs = 1;
    let supervisor = Supervisor::new(config).unwrap();
    supervisor.start().await.unwrap();

    // First crash uses the whole budget of the window.
    std::fs::write(&die, b"").unwrap();
    wait_for_status(&supervisor, Duration::from_secs(5), |s| {
        s.process("a")
            .map(|p| p.instance == 2 && p.state == ProcessState::Ready)
            .unwrap_or(false)
    })
    .await;

    // One failed liveness check in the middle of the healthy period.
    std::fs::remove_file(&ready).unwrap();
    wait_for_status(&supervisor, Duration::from_secs(5), |s| {
        s.process("a").map(|p| p.state == ProcessState::Degraded).unwrap_or(false)
    })
    .await;
    std::fs::write(&ready, b"").unwrap();
    wait_for_status(&supervisor, Duration::from_secs(5), |s| {
        s.process("a").map(|p| p.state == ProcessState::Ready).unwrap_or(false)
    })
    .await;

    // Stay healthy past the reset period, then crash again.
    tokio::time::sleep(Duration::from_secs(4)).await;
    std::fs::write(&die, b"").unwrap();
    let status = wait_for_status(&supervisor, Duration::from_secs(5), |s| {
        s.process("a")
            .map(|p| p.instance == 3 && p.state == ProcessState::Ready)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(status.process("a").unwrap().restart_count, 2);

    supervisor.stop().await.unwrap();
}
