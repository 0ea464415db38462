use super::*;
use tokio::net::TcpListener;

fn tokens() -> (CancellationToken, CancellationToken) {
    (CancellationToken::new(), CancellationToken::new())
}

#[tokio::test]
async fn test_immediate_probe() {
    let (cancel, exited) = tokens();
    let probe = ReadinessProbe::immediate();
    assert!(!probe.is_active());
    assert!(probe.wait_ready(&cancel, &exited).await.is_ok());
}

#[tokio::test]
async fn test_tcp_probe_passes_when_listening() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let probe = ReadinessProbe::new(
        ProbeCheck::Tcp(addr.to_string()),
        Duration::from_secs(1),
        Duration::from_millis(20),
    );
    assert!(probe.check_once().await);
}

#[tokio::test]
async fn test_tcp_probe_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (cancel, exited) = tokens();
    let probe = ReadinessProbe::new(
        ProbeCheck::Tcp(addr.to_string()),
        Duration::from_millis(200),
        Duration::from_millis(20),
    );
    let started = std::time::Instant::now();
    let result = probe.wait_ready(&cancel, &exited).await;
    assert_eq!(result, Err(ProbeError::TimedOut(Duration::from_millis(200))));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_file_probe_waits_for_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ready");
    let probe = ReadinessProbe::new(
        ProbeCheck::File(path.clone()),
        Duration::from_secs(5),
        Duration::from_millis(20),
    );

    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(path, b"").unwrap();
    });

    let (cancel, exited) = tokens();
    let waited = probe.wait_ready(&cancel, &exited).await.unwrap();
    assert!(waited >= Duration::from_millis(80));
    writer.await.unwrap();
}

#[tokio::test]
async fn test_log_marker_probe() {
    let (tx, rx) = watch::channel(false);
    let probe = ReadinessProbe::new(
        ProbeCheck::LogMarker(rx),
        Duration::from_secs(5),
        Duration::from_millis(20),
    );
    assert!(!probe.check_once().await);
    tx.send_replace(true);
    assert!(probe.check_once().await);
}

#[tokio::test]
async fn test_exit_aborts_wait() {
    let dir = tempfile::tempdir().unwrap();
    let probe = ReadinessProbe::new(
        ProbeCheck::File(dir.path().join("never")),
        Duration::from_secs(30),
        Duration::from_millis(20),
    );
    let (cancel, exited) = tokens();
    let trigger = exited.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    assert_eq!(probe.wait_ready(&cancel, &exited).await, Err(ProbeError::Exited));
}

#[tokio::test]
async fn test_cancel_aborts_wait() {
    let dir = tempfile::tempdir().unwrap();
    let probe = ReadinessProbe::new(
        ProbeCheck::File(dir.path().join("never")),
        Duration::from_secs(30),
        Duration::from_millis(20),
    );
    let (cancel, exited) = tokens();
    cancel.cancel();
    assert_eq!(probe.wait_ready(&cancel, &exited).await, Err(ProbeError::Cancelled));
}

#[test]
fn test_from_config_expands_display() {
    let display = DisplayConfig::default();
    let probe = ReadinessProbe::from_config(
        &ProbeConfig::file("/tmp/.X11-unix/X{display}"),
        &display,
        None,
    );
    match probe.check() {
        ProbeCheck::File(path) => assert_eq!(path, &PathBuf::from("/tmp/.X11-unix/X99")),
        other => panic!("unexpected check: {:?}", other),
    }
}

#[test]
fn test_from_config_tcp_defaults_host() {
    let config = ProbeConfig {
        kind: ProbeKind::Tcp,
        port: Some(5900),
        ..Default::default()
    };
    let probe = ReadinessProbe::from_config(&config, &DisplayConfig::default(), None);
    match probe.check() {
        ProbeCheck::Tcp(addr) => assert_eq!(addr, "127.0.0.1:5900"),
        other => panic!("unexpected check: {:?}", other),
    }
    assert_eq!(probe.timeout(), Duration::from_secs(30));
}
