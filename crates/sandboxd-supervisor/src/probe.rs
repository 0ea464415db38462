//! Readiness probes.

use std::path::PathBuf;
use std::time::Duration;

use sandboxd_config::{DisplayConfig, ProbeConfig, ProbeKind};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Upper bound for a single TCP connect attempt.
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// What a probe checks.
#[derive(Debug, Clone)]
pub enum ProbeCheck {
    /// Ready as soon as launched.
    None,
    /// `host:port` accepts a TCP connection.
    Tcp(String),
    /// The path exists.
    File(PathBuf),
    /// The process printed a line matching its ready marker.
    LogMarker(watch::Receiver<bool>),
}

/// Why a readiness wait ended without success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("did not become ready within {0:?}")]
    TimedOut(Duration),
    #[error("exited before becoming ready")]
    Exited,
    #[error("readiness wait cancelled")]
    Cancelled,
}

/// A check plus the timeout and retry interval that bound it.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    check: ProbeCheck,
    timeout: Duration,
    interval: Duration,
}

impl ReadinessProbe {
    pub fn new(check: ProbeCheck, timeout: Duration, interval: Duration) -> Self {
        Self {
            check,
            timeout,
            interval,
        }
    }

    /// A probe that passes immediately.
    pub fn immediate() -> Self {
        Self::new(ProbeCheck::None, Duration::ZERO, Duration::ZERO)
    }

    /// Build from configuration. `marker` is the launched process's
    /// log-marker flag, required for `log_marker` probes.
    pub fn from_config(
        config: &ProbeConfig,
        display: &DisplayConfig,
        marker: Option<watch::Receiver<bool>>,
    ) -> Self {
        let check = match config.kind {
            ProbeKind::None => ProbeCheck::None,
            ProbeKind::Tcp => {
                let host = config.host.as_deref().unwrap_or("127.0.0.1");
                ProbeCheck::Tcp(format!("{}:{}", host, config.port.unwrap_or(0)))
            }
            ProbeKind::File => ProbeCheck::File(PathBuf::from(
                display.expand(config.path.as_deref().unwrap_or_default()),
            )),
            ProbeKind::LogMarker => match marker {
                Some(marker) => ProbeCheck::LogMarker(marker),
                // Nothing can ever set the flag.
                None => ProbeCheck::LogMarker(watch::channel(false).1),
            },
        };
        Self::new(check, config.timeout(), config.interval())
    }

    pub fn check(&self) -> &ProbeCheck {
        &self.check
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether there is anything to re-probe for liveness.
    pub fn is_active(&self) -> bool {
        !matches!(self.check, ProbeCheck::None)
    }

    /// Run the check once.
    pub async fn check_once(&self) -> bool {
        match &self.check {
            ProbeCheck::None => true,
            ProbeCheck::Tcp(addr) => matches!(
                tokio::time::timeout(CONNECT_ATTEMPT_TIMEOUT, TcpStream::connect(addr)).await,
                Ok(Ok(_))
            ),
            ProbeCheck::File(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            ProbeCheck::LogMarker(marker) => *marker.borrow(),
        }
    }

    /// Retry the check until it passes, the timeout elapses, the process
    /// exits (`exited` fires) or the wait is cancelled.
    pub async fn wait_ready(
        &self,
        cancel: &CancellationToken,
        exited: &CancellationToken,
    ) -> Result<Duration, ProbeError> {
        let started = Instant::now();
        let deadline = started + self.timeout;

        loop {
            if cancel.is_cancelled() {
                return Err(ProbeError::Cancelled);
            }
            if exited.is_cancelled() {
                return Err(ProbeError::Exited);
            }
            if self.check_once().await {
                return Ok(started.elapsed());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ProbeError::TimedOut(self.timeout));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
                _ = exited.cancelled() => return Err(ProbeError::Exited),
                _ = tokio::time::sleep_until((now + self.interval).min(deadline)) => {}
            }
        }
    }
}

#[cfg(test)]
#[path = "probe_tests.rs"]
mod tests;
