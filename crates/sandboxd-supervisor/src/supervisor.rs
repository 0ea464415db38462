//! Public handle to one sandbox session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sandboxd_config::{ConfigValidator, SandboxConfig};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::control::Controller;
use crate::error::SupervisorError;
use crate::graph::DependencyGraph;
use crate::session::SessionSnapshot;
use crate::state::SessionState;

/// Supervises every process of one sandbox.
///
/// Status reads go through a `watch` channel and never wait on the control
/// task, so they stay cheap while a restart or teardown is in progress.
pub struct Supervisor {
    config: Arc<SandboxConfig>,
    graph: DependencyGraph,
    status: Arc<watch::Sender<SessionSnapshot>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Supervisor {
    /// Validate `config` and prepare a session. Nothing is launched yet.
    pub fn new(config: SandboxConfig) -> Result<Self, SupervisorError> {
        let warnings = ConfigValidator::validate(&config)?.into_result()?;
        for warning in &warnings {
            warn!("Config warning at {}: {}", warning.path, warning.message);
        }

        let graph = DependencyGraph::from_processes(&config.processes)?;
        let (status, _) = watch::channel(SessionSnapshot::initial(&config));

        Ok(Self {
            config: Arc::new(config),
            graph,
            status: Arc::new(status),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Launch every process in dependency order and wait until all of them
    /// are ready. On failure everything already launched is torn down and
    /// the session ends in `Terminated`.
    ///
    /// A session can only be started once.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        if self.cancel.is_cancelled() || self.started.swap(true, Ordering::SeqCst) {
            return Err(SupervisorError::InvalidStateTransition {
                from: self.status().state,
                to: SessionState::Running,
            });
        }

        let (started_tx, started_rx) = oneshot::channel();
        let controller = Controller::new(
            self.config.clone(),
            self.graph.clone(),
            self.status.clone(),
            self.cancel.clone(),
        );
        *self.task.lock().await = Some(tokio::spawn(controller.run(started_tx)));

        match started_rx.await {
            Ok(result) => result,
            Err(_) => Err(SupervisorError::Cancelled),
        }
    }

    /// Stop every process in reverse dependency order. Idempotent, and safe
    /// to call while `start` is still in progress.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        self.cancel.cancel();

        let task = self.task.lock().await.take();
        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    error!("Control task failed: {}", e);
                    self.status.send_modify(|s| {
                        s.state = SessionState::Terminated;
                        s.error = Some(format!("control task failed: {}", e));
                        s.updated_at = Utc::now();
                    });
                }
            }
            None if self.started.load(Ordering::SeqCst) => {
                self.wait_terminated().await;
            }
            None => {
                self.status.send_modify(|s| {
                    if !s.state.is_terminal() {
                        s.state = SessionState::Terminated;
                        s.updated_at = Utc::now();
                    }
                });
            }
        }
        Ok(())
    }

    /// Latest published snapshot.
    pub fn status(&self) -> SessionSnapshot {
        self.status.borrow().clone()
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.status.subscribe()
    }

    /// Resolve once the session has terminated, whatever the cause.
    pub async fn wait_terminated(&self) -> SessionSnapshot {
        let mut rx = self.status.subscribe();
        let terminated = rx
            .wait_for(|s| s.state.is_terminal())
            .await
            .map(|s| s.clone());
        terminated.unwrap_or_else(|_| self.status())
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
