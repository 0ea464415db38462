//! Per-process monitor tasks.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::probe::ReadinessProbe;
use crate::process::{ExitRecord, ProcessHandle};

/// How long to wait for a killed process to be reaped.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages from monitors and timers to the control loop.
///
/// `instance` identifies one launch of a process; events from an older
/// instance are stale and ignored.
#[derive(Debug)]
pub(crate) enum Event {
    /// The process ended without being asked to.
    Exited {
        name: String,
        instance: u64,
        exit: ExitRecord,
    },
    /// The process ended after a stop request.
    Stopped {
        name: String,
        instance: u64,
        exit: ExitRecord,
        forced: bool,
    },
    /// Result of a liveness re-probe.
    Liveness {
        name: String,
        instance: u64,
        healthy: bool,
    },
    /// A relaunched process passed its readiness probe.
    Ready { name: String, instance: u64 },
    /// A relaunched process failed its readiness probe.
    ProbeFailed {
        name: String,
        instance: u64,
        reason: String,
    },
    /// Backoff elapsed.
    RestartDue { name: String },
    /// The process stayed ready for its healthy-reset period.
    HealthyFor { name: String, instance: u64 },
}

/// Control-loop side of a monitor task.
pub(crate) struct MonitorHandle {
    stop_tx: Option<oneshot::Sender<Instant>>,
    exited: CancellationToken,
    join: JoinHandle<ExitRecord>,
}

impl MonitorHandle {
    /// Ask the process to stop, escalating to a kill at `deadline`.
    /// Returns false when a stop was already requested.
    pub fn stop(&mut self, deadline: Instant) -> bool {
        match self.stop_tx.take() {
            Some(tx) => {
                let _ = tx.send(deadline);
                true
            }
            None => false,
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_tx.is_none()
    }

    /// Fires once the process has ended.
    pub fn exited(&self) -> CancellationToken {
        self.exited.clone()
    }

    /// Wait for the monitor to finish and return the final exit.
    pub async fn join(self) -> ExitRecord {
        match self.join.await {
            Ok(exit) => exit,
            Err(e) => ExitRecord::failed(format!("monitor failed: {}", e)),
        }
    }
}

/// Watch one process instance until it ends.
pub(crate) fn spawn_monitor(
    name: String,
    instance: u64,
    handle: Box<dyn ProcessHandle>,
    liveness: Option<(ReadinessProbe, Duration)>,
    events: mpsc::UnboundedSender<Event>,
) -> MonitorHandle {
    let (stop_tx, stop_rx) = oneshot::channel();
    let exited = CancellationToken::new();
    let join = tokio::spawn(run_monitor(
        name,
        instance,
        handle,
        liveness,
        stop_rx,
        exited.clone(),
        events,
    ));

    MonitorHandle {
        stop_tx: Some(stop_tx),
        exited,
        join,
    }
}

async fn run_monitor(
    name: String,
    instance: u64,
    mut handle: Box<dyn ProcessHandle>,
    liveness: Option<(ReadinessProbe, Duration)>,
    mut stop_rx: oneshot::Receiver<Instant>,
    exited: CancellationToken,
    events: mpsc::UnboundedSender<Event>,
) -> ExitRecord {
    let period = liveness
        .as_ref()
        .map(|(_, period)| *period)
        .unwrap_or(Duration::from_secs(3600));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            exit = handle.wait() => {
                exited.cancel();
                handle.cleanup().await;
                debug!("{} (instance {}) exited: {}", name, instance, exit);
                let _ = events.send(Event::Exited { name, instance, exit: exit.clone() });
                return exit;
            }
            request = &mut stop_rx => {
                // A dropped sender means stop without grace.
                let deadline = request.unwrap_or_else(|_| Instant::now());
                let (exit, forced) = stop(&name, &mut *handle, deadline).await;
                exited.cancel();
                handle.cleanup().await;
                let _ = events.send(Event::Stopped {
                    name,
                    instance,
                    exit: exit.clone(),
                    forced,
                });
                return exit;
            }
            _ = ticker.tick(), if liveness.is_some() => {
                if let Some((probe, _)) = &liveness {
                    let healthy = probe.check_once().await;
                    let _ = events.send(Event::Liveness {
                        name: name.clone(),
                        instance,
                        healthy,
                    });
                }
            }
        }
    }
}

/// Terminate, wait until `deadline`, then kill.
async fn stop(name: &str, handle: &mut dyn ProcessHandle, deadline: Instant) -> (ExitRecord, bool) {
    handle.terminate().await;
    if let Ok(exit) = tokio::time::timeout_at(deadline, handle.wait()).await {
        debug!("{} stopped: {}", name, exit);
        return (exit, false);
    }

    warn!("{} did not stop within the grace period, killing", name);
    handle.kill().await;
    match tokio::time::timeout(KILL_REAP_TIMEOUT, handle.wait()).await {
        Ok(exit) => (exit, true),
        Err(_) => (
            ExitRecord::failed(format!("{} could not be reaped after kill", name)),
            true,
        ),
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
