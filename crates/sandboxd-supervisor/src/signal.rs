//! Shutdown requests from the OS and from the control API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::SupervisorError;

/// Lifecycle signals understood by the supervisor binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxSignal {
    /// Graceful teardown (SIGTERM, SIGINT, `POST /shutdown`).
    Shutdown,
    /// Immediate kill.
    Terminate,
}

impl std::fmt::Display for SandboxSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxSignal::Shutdown => write!(f, "SHUTDOWN"),
            SandboxSignal::Terminate => write!(f, "TERMINATE"),
        }
    }
}

/// Fan-out of shutdown requests. Clones share state.
#[derive(Clone)]
pub struct SignalHandler {
    sender: broadcast::Sender<SandboxSignal>,
    shutdown_requested: Arc<AtomicBool>,
}

impl SignalHandler {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SandboxSignal> {
        self.sender.subscribe()
    }

    pub fn send(&self, signal: SandboxSignal) {
        debug!("Sending signal: {}", signal);
        self.shutdown_requested.store(true, Ordering::SeqCst);
        let _ = self.sender.send(signal);
    }

    pub fn request_shutdown(&self) {
        self.send(SandboxSignal::Shutdown);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested, including before the call.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.subscribe();
        if self.is_shutdown_requested() {
            return;
        }
        loop {
            match rx.recv().await {
                Ok(_) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Forward SIGTERM and SIGINT to [`request_shutdown`](Self::request_shutdown).
    #[cfg(unix)]
    pub fn setup_os_signals(&self) -> Result<(), SupervisorError> {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, label) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::interrupt(), "SIGINT"),
        ] {
            let mut stream =
                signal(kind).map_err(|e| SupervisorError::SignalSetup(e.to_string()))?;
            let handler = self.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    info!("Received {}", label);
                    handler.request_shutdown();
                }
            });
        }

        info!("OS signal handlers installed (SIGTERM, SIGINT)");
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn setup_os_signals(&self) -> Result<(), SupervisorError> {
        let handler = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                handler.request_shutdown();
            }
        });

        info!("OS signal handlers installed (Ctrl+C only)");
        Ok(())
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Deliver `signal` to another supervisor process, e.g. from `sandboxd stop`.
#[cfg(unix)]
pub fn send_signal_to_pid(pid: u32, signal: SandboxSignal) -> Result<(), SupervisorError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let os_signal = match signal {
        SandboxSignal::Shutdown => Signal::SIGTERM,
        SandboxSignal::Terminate => Signal::SIGKILL,
    };

    kill(Pid::from_raw(pid as i32), os_signal).map_err(|e| SupervisorError::SignalDelivery {
        signal: signal.to_string(),
        pid,
        reason: e.to_string(),
    })?;

    info!("Sent {} to PID {}", signal, pid);
    Ok(())
}

#[cfg(not(unix))]
pub fn send_signal_to_pid(pid: u32, signal: SandboxSignal) -> Result<(), SupervisorError> {
    Err(SupervisorError::SignalDelivery {
        signal: signal.to_string(),
        pid,
        reason: "not supported on this platform".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_signal_display() {
        assert_eq!(SandboxSignal::Shutdown.to_string(), "SHUTDOWN");
        assert_eq!(SandboxSignal::Terminate.to_string(), "TERMINATE");
    }

    #[test]
    fn test_request_shutdown_is_shared_by_clones() {
        let handler = SignalHandler::new();
        let cloned = handler.clone();
        assert!(!cloned.is_shutdown_requested());

        handler.request_shutdown();
        assert!(cloned.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_subscribers_receive_signal() {
        let handler = SignalHandler::new();
        let mut rx1 = handler.subscribe();
        let mut rx2 = handler.subscribe();

        handler.send(SandboxSignal::Terminate);

        assert_eq!(rx1.recv().await.unwrap(), SandboxSignal::Terminate);
        assert_eq!(rx2.recv().await.unwrap(), SandboxSignal::Terminate);
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_after_request() {
        let handler = SignalHandler::new();
        handler.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), handler.wait_for_shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_wakes_on_request() {
        let handler = SignalHandler::new();
        let waiter = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.wait_for_shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        handler.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_send_signal_to_missing_pid() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let err = send_signal_to_pid(pid, SandboxSignal::Shutdown).unwrap_err();
        assert!(matches!(err, SupervisorError::SignalDelivery { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_send_signal_terminates_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        send_signal_to_pid(child.id(), SandboxSignal::Shutdown).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
