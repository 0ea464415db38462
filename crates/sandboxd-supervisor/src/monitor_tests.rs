use super::*;
use crate::probe::ProbeCheck;
use crate::process::{ChildHandle, LaunchSpec};

fn sh(script: &str) -> Box<dyn ProcessHandle> {
    let launch = LaunchSpec {
        name: "test".to_string(),
        program: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        env: Vec::new(),
        working_dir: None,
        marker: None,
    };
    Box::new(ChildHandle::spawn(&launch).unwrap().0)
}

#[tokio::test]
async fn test_exit_is_reported() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let monitor = spawn_monitor("a".to_string(), 1, sh("exit 2"), None, tx);
    let exited = monitor.exited();

    match rx.recv().await.unwrap() {
        Event::Exited { name, instance, exit } => {
            assert_eq!(name, "a");
            assert_eq!(instance, 1);
            assert_eq!(exit.code, Some(2));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(exited.is_cancelled());
    assert_eq!(monitor.join().await.code, Some(2));
}

#[tokio::test]
async fn test_graceful_stop() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut monitor = spawn_monitor("a".to_string(), 1, sh("exec sleep 30"), None, tx);

    assert!(!monitor.is_stopping());
    assert!(monitor.stop(Instant::now() + Duration::from_secs(5)));
    assert!(monitor.is_stopping());
    assert!(!monitor.stop(Instant::now()));

    match rx.recv().await.unwrap() {
        Event::Stopped { forced, exit, .. } => {
            assert!(!forced);
            assert_eq!(exit.signal, Some(15));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_straggler_is_killed_at_deadline() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut monitor = spawn_monitor(
        "stubborn".to_string(),
        3,
        sh("trap '' TERM; while true; do sleep 0.05; done"),
        None,
        tx,
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    monitor.stop(Instant::now() + Duration::from_millis(300));

    match rx.recv().await.unwrap() {
        Event::Stopped { forced, exit, instance, .. } => {
            assert!(forced);
            assert_eq!(instance, 3);
            assert_eq!(exit.signal, Some(9));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < Duration::from_secs(3));
}

#[tokio::test]
async fn test_liveness_events() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("alive");
    std::fs::write(&marker, b"").unwrap();

    let probe = ReadinessProbe::new(
        ProbeCheck::File(marker.clone()),
        Duration::from_secs(1),
        Duration::from_millis(10),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut monitor = spawn_monitor(
        "a".to_string(),
        1,
        sh("exec sleep 30"),
        Some((probe, Duration::from_millis(50))),
        tx,
    );

    match rx.recv().await.unwrap() {
        Event::Liveness { healthy, .. } => assert!(healthy),
        other => panic!("unexpected event: {:?}", other),
    }

    std::fs::remove_file(&marker).unwrap();
    loop {
        match rx.recv().await.unwrap() {
            Event::Liveness { healthy: true, .. } => continue,
            Event::Liveness { healthy: false, .. } => break,
            other => panic!("unexpected event: {:?}", other),
        }
    }

    monitor.stop(Instant::now() + Duration::from_secs(2));
    let exit = monitor.join().await;
    assert_eq!(exit.signal, Some(15));
}
