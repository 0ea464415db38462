//! The single-writer control loop.
//!
//! [`Controller`] owns every `ManagedProcess` and the session state. Monitor
//! tasks and timers only send [`Event`]s; nothing else mutates process state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use sandboxd_config::{ProcessConfig, ProcessKind, RestartConfig, SandboxConfig};
use sandboxd_gateway::{
    AutomationGateway, AutomationOptions, EndpointBinding, GatewayError, WebGateway, WebOptions,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::SupervisorError;
use crate::graph::DependencyGraph;
use crate::monitor::{spawn_monitor, Event, MonitorHandle};
use crate::probe::{ProbeError, ReadinessProbe};
use crate::process::{ChildHandle, ExitRecord, LaunchSpec, ProcessHandle, TaskHandle};
use crate::restart::RestartTracker;
use crate::session::{
    EndpointSnapshot, ProcessSnapshot, SessionSnapshot, AUTOMATION_ENDPOINT, WEB_ENDPOINT,
};
use crate::state::{ProcessState, SessionState};

struct ManagedProcess {
    config: ProcessConfig,
    state: ProcessState,
    instance: u64,
    pid: Option<u32>,
    tracker: RestartTracker,
    monitor: Option<MonitorHandle>,
    /// Relaunch once backoff has elapsed and dependencies are ready.
    restart_pending: bool,
    backoff: Option<JoinHandle<()>>,
    healthy_timer: Option<JoinHandle<()>>,
    readiness: Option<JoinHandle<()>>,
    last_exit: Option<ExitRecord>,
    last_error: Option<String>,
    launched_at: Option<DateTime<Utc>>,
    ready_at: Option<DateTime<Utc>>,
    exited_at: Option<DateTime<Utc>>,
}

impl ManagedProcess {
    fn new(config: ProcessConfig, restart: RestartConfig) -> Self {
        Self {
            config,
            state: ProcessState::NotStarted,
            instance: 0,
            pid: None,
            tracker: RestartTracker::new(restart),
            monitor: None,
            restart_pending: false,
            backoff: None,
            healthy_timer: None,
            readiness: None,
            last_exit: None,
            last_error: None,
            launched_at: None,
            ready_at: None,
            exited_at: None,
        }
    }

    fn abort_timers(&mut self) {
        for timer in [
            self.backoff.take(),
            self.healthy_timer.take(),
            self.readiness.take(),
        ]
        .into_iter()
        .flatten()
        {
            timer.abort();
        }
    }

    fn record_exit(&mut self, exit: ExitRecord) {
        self.monitor = None;
        self.pid = None;
        self.exited_at = Some(exit.at);
        self.last_exit = Some(exit);
    }

    fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            name: self.config.name.clone(),
            kind: self.config.kind,
            state: self.state,
            critical: self.config.critical,
            depends_on: self.config.depends_on.clone(),
            pid: self.pid,
            instance: self.instance,
            restart_count: self.tracker.total(),
            last_exit: self.last_exit.clone(),
            last_error: self.last_error.clone(),
            launched_at: self.launched_at,
            ready_at: self.ready_at,
            exited_at: self.exited_at,
        }
    }
}

/// One external endpoint and the backend it forwards to.
struct Endpoint {
    name: &'static str,
    gateway: ProcessKind,
    host: String,
    port: u16,
    backend: String,
    backend_process: String,
    /// Bound when its gateway first launches, then kept for the session.
    binding: Option<EndpointBinding>,
    /// Backend instance the binding currently targets.
    targeted: Option<u64>,
}

pub(crate) struct Controller {
    config: Arc<SandboxConfig>,
    graph: DependencyGraph,
    order: Vec<String>,
    processes: HashMap<String, ManagedProcess>,
    endpoints: Vec<Endpoint>,
    automation: Option<Arc<AutomationGateway>>,
    web: Option<Arc<WebGateway>>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    status: Arc<watch::Sender<SessionSnapshot>>,
    cancel: CancellationToken,
    state: SessionState,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    /// Set when a critical process exhausts its budget.
    fatal: Option<SupervisorError>,
}

impl Controller {
    pub(crate) fn new(
        config: Arc<SandboxConfig>,
        graph: DependencyGraph,
        status: Arc<watch::Sender<SessionSnapshot>>,
        cancel: CancellationToken,
    ) -> Self {
        let order = config.processes.iter().map(|p| p.name.clone()).collect();
        let processes = config
            .processes
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    ManagedProcess::new(p.clone(), config.restart_for(p)),
                )
            })
            .collect();

        let declared = |kind| config.processes.iter().any(|p| p.kind == kind);
        let mut endpoints = Vec::new();
        if declared(ProcessKind::AutomationGateway) {
            let automation = &config.endpoints.automation;
            endpoints.push(Endpoint {
                name: AUTOMATION_ENDPOINT,
                gateway: ProcessKind::AutomationGateway,
                host: automation.host.clone(),
                port: automation.port,
                backend: automation.backend.clone(),
                backend_process: automation.backend_process.clone(),
                binding: None,
                targeted: None,
            });
        }
        if declared(ProcessKind::WebGateway) {
            let web = &config.endpoints.web;
            endpoints.push(Endpoint {
                name: WEB_ENDPOINT,
                gateway: ProcessKind::WebGateway,
                host: web.host.clone(),
                port: web.port,
                backend: web.backend.clone(),
                backend_process: web.backend_process.clone(),
                binding: None,
                targeted: None,
            });
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            graph,
            order,
            processes,
            endpoints,
            automation: None,
            web: None,
            events_tx,
            events_rx,
            status,
            cancel,
            state: SessionState::Initializing,
            error: None,
            started_at: None,
            fatal: None,
        }
    }

    /// Drive the session from startup to termination. The startup outcome is
    /// reported on `started` as soon as it is known.
    pub(crate) async fn run(mut self, started: oneshot::Sender<Result<(), SupervisorError>>) {
        self.started_at = Some(Utc::now());
        self.publish();
        info!(
            "Starting sandbox {} ({} processes in {} levels)",
            self.config.sandbox.name,
            self.graph.len(),
            self.graph.levels().len()
        );

        if let Err(e) = self.start_all().await {
            let error = match &e {
                SupervisorError::Cancelled => {
                    info!("Startup interrupted by stop request");
                    None
                }
                other => {
                    error!("{}", other);
                    Some(other.to_string())
                }
            };
            self.teardown().await;
            self.finish(error);
            let _ = started.send(Err(e));
            return;
        }

        self.set_state(SessionState::Running);
        self.publish();
        info!("Sandbox {} running", self.config.sandbox.name);
        let _ = started.send(Ok(()));

        let outcome = self.event_loop().await;
        self.teardown().await;
        self.finish(outcome.err().map(|e| e.to_string()));
    }

    /// Launch level by level; each level waits for all of its probes.
    async fn start_all(&mut self) -> Result<(), SupervisorError> {
        let levels = self.graph.levels().to_vec();

        for (depth, level) in levels.iter().enumerate() {
            self.drain_startup_events()?;
            debug!("Starting level {}: {}", depth, level.join(", "));
            let mut waits = FuturesUnordered::new();

            for name in level {
                if self.cancel.is_cancelled() {
                    return Err(SupervisorError::Cancelled);
                }
                let (probe, exited) = match self.launch(name) {
                    Ok(launched) => launched,
                    Err(e) => {
                        let reason = e.to_string();
                        self.mark_failed(name, reason.clone());
                        self.publish();
                        return Err(SupervisorError::StartupFailed {
                            process: name.clone(),
                            reason,
                        });
                    }
                };
                let cancel = self.cancel.clone();
                let name = name.clone();
                waits.push(async move {
                    let result = probe.wait_ready(&cancel, &exited).await;
                    (name, result)
                });
            }
            self.publish();

            // Earlier levels keep running while this one probes.
            loop {
                tokio::select! {
                    biased;
                    event = self.events_rx.recv() => {
                        if let Some(event) = event {
                            self.on_startup_event(event)?;
                        }
                    }
                    next = waits.next() => {
                        let Some((name, result)) = next else {
                            break;
                        };
                        match result {
                            Ok(waited) => {
                                info!("{} ready after {:?}", name, waited);
                                self.mark_ready(&name);
                                self.publish();
                            }
                            Err(ProbeError::Cancelled) => return Err(SupervisorError::Cancelled),
                            Err(e) => {
                                let reason = e.to_string();
                                self.mark_failed(&name, reason.clone());
                                self.publish();
                                return Err(SupervisorError::StartupFailed {
                                    process: name,
                                    reason,
                                });
                            }
                        }
                    }
                }
            }
        }
        self.drain_startup_events()
    }

    fn drain_startup_events(&mut self) -> Result<(), SupervisorError> {
        while let Ok(event) = self.events_rx.try_recv() {
            self.on_startup_event(event)?;
        }
        Ok(())
    }

    /// A launched instance that exits before the session is running fails
    /// startup; nothing is restarted yet.
    fn on_startup_event(&mut self, event: Event) -> Result<(), SupervisorError> {
        match event {
            Event::Exited {
                name,
                instance,
                exit,
            } => {
                if !self.is_current(&name, instance) {
                    return Ok(());
                }
                let reason = format!("crashed during startup: {}", exit);
                if let Some(process) = self.processes.get_mut(&name) {
                    process.record_exit(exit);
                }
                self.mark_failed(&name, reason.clone());
                self.publish();
                Err(SupervisorError::StartupFailed {
                    process: name,
                    reason,
                })
            }
            other => {
                self.handle_event(other);
                match self.fatal.take() {
                    Some(fatal) => Err(fatal),
                    None => {
                        self.publish();
                        Ok(())
                    }
                }
            }
        }
    }

    async fn event_loop(&mut self) -> Result<(), SupervisorError> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Stop requested");
                    return Ok(());
                }
                event = self.events_rx.recv() => {
                    let Some(event) = event else {
                        return Ok(());
                    };
                    self.handle_event(event);
                    if let Some(fatal) = self.fatal.take() {
                        return Err(fatal);
                    }
                    self.refresh_session_state();
                    self.publish();
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Exited {
                name,
                instance,
                exit,
            } => {
                if !self.is_current(&name, instance) {
                    return;
                }
                let stopping = self.processes[&name]
                    .monitor
                    .as_ref()
                    .map(MonitorHandle::is_stopping)
                    .unwrap_or(false);
                if stopping {
                    self.on_stopped(&name, exit);
                } else {
                    self.on_crash(&name, exit);
                }
            }
            Event::Stopped {
                name,
                instance,
                exit,
                forced,
            } => {
                if self.is_current(&name, instance) {
                    if forced {
                        warn!("{} had to be killed", name);
                    }
                    self.on_stopped(&name, exit);
                }
            }
            Event::Liveness {
                name,
                instance,
                healthy,
            } => {
                if self.is_current(&name, instance) {
                    self.on_liveness(&name, healthy);
                }
            }
            Event::Ready { name, instance } => {
                if self.is_current(&name, instance)
                    && self.processes[&name].state == ProcessState::Starting
                {
                    info!("{} ready again (instance {})", name, instance);
                    self.mark_ready(&name);
                    self.relaunch_waiting();
                }
            }
            Event::ProbeFailed {
                name,
                instance,
                reason,
            } => {
                if self.is_current(&name, instance)
                    && self.processes[&name].state == ProcessState::Starting
                {
                    warn!("{} did not become ready after restart: {}", name, reason);
                    let deadline = Instant::now() + self.config.shutdown.grace_period();
                    if let Some(monitor) = self
                        .processes
                        .get_mut(&name)
                        .and_then(|p| p.monitor.as_mut())
                    {
                        monitor.stop(deadline);
                    }
                    self.on_failure(&name, format!("readiness probe failed: {}", reason));
                }
            }
            Event::RestartDue { name } => {
                if let Some(process) = self.processes.get_mut(&name) {
                    process.backoff = None;
                }
                self.maybe_relaunch(&name);
            }
            Event::HealthyFor { name, instance } => {
                if let Some(process) = self.processes.get_mut(&name) {
                    if process.instance == instance && process.state == ProcessState::Ready {
                        info!(
                            "{} healthy for {:?}, restart window reset",
                            name,
                            process.tracker.policy().healthy_reset()
                        );
                        process.tracker.reset();
                        process.healthy_timer = None;
                    }
                }
            }
        }
    }

    /// Whether `instance` is the live launch of `name`.
    fn is_current(&self, name: &str, instance: u64) -> bool {
        self.processes
            .get(name)
            .map(|p| p.instance == instance && p.monitor.is_some())
            .unwrap_or(false)
    }

    fn on_crash(&mut self, name: &str, exit: ExitRecord) {
        let crash = SupervisorError::ProcessCrashed {
            process: name.to_string(),
            status: exit.to_string(),
        };
        warn!("{}", crash);
        if let Some(process) = self.processes.get_mut(name) {
            process.record_exit(exit);
        }
        self.on_failure(name, crash.to_string());
    }

    /// Apply the restart policy to a failed instance, then cascade to
    /// direct dependents that do not tolerate the restart.
    fn on_failure(&mut self, name: &str, reason: String) {
        let Some(process) = self.processes.get_mut(name) else {
            return;
        };
        process.abort_timers();
        process.last_error = Some(reason);

        let mut fatal = None;
        if process.tracker.record_restart() {
            let exhausted = SupervisorError::RestartBudgetExhausted {
                process: name.to_string(),
                max: process.tracker.policy().max_restarts,
            };
            error!("{}", exhausted);
            process.state = ProcessState::Failed;
            process.restart_pending = false;
            process.last_error = Some(exhausted.to_string());
            if process.config.critical {
                fatal = Some(exhausted);
            }
        } else {
            let delay = process.tracker.backoff();
            info!(
                "Restarting {} in {:?} ({} of {} restarts in window)",
                name,
                delay,
                process.tracker.count(),
                process.tracker.policy().max_restarts
            );
            process.state = ProcessState::Stopped;
            process.restart_pending = true;
            process.backoff = Some(schedule(
                &self.events_tx,
                delay,
                Event::RestartDue {
                    name: name.to_string(),
                },
            ));
        }

        if fatal.is_some() {
            self.fatal = fatal;
        }
        self.cascade(name);
        self.refresh_targets();
    }

    fn cascade(&mut self, name: &str) {
        let deadline = Instant::now() + self.config.shutdown.grace_period();
        for dependent in self.graph.direct_dependents(name) {
            let Some(process) = self.processes.get_mut(dependent) else {
                continue;
            };
            if process.config.tolerates_dependency_restart {
                continue;
            }
            let Some(monitor) = process.monitor.as_mut() else {
                continue;
            };
            if monitor.stop(deadline) {
                info!("Restarting {} along with its dependency {}", dependent, name);
                process.abort_timers();
                process.state = ProcessState::Stopped;
                process.restart_pending = true;
            }
        }
    }

    fn on_stopped(&mut self, name: &str, exit: ExitRecord) {
        if let Some(process) = self.processes.get_mut(name) {
            debug!("{} stopped: {}", name, exit);
            process.record_exit(exit);
            if process.state != ProcessState::Failed {
                process.state = ProcessState::Stopped;
            }
        }
        self.refresh_targets();
        self.relaunch_waiting();
    }

    fn on_liveness(&mut self, name: &str, healthy: bool) {
        let Some(process) = self.processes.get_mut(name) else {
            return;
        };
        match (process.state, healthy) {
            (ProcessState::Ready, false) => {
                warn!("{} failed its liveness probe", name);
                process.state = ProcessState::Degraded;
                if let Some(timer) = process.healthy_timer.take() {
                    timer.abort();
                }
            }
            (ProcessState::Degraded, true) => {
                info!("{} passed its liveness probe again", name);
                process.state = ProcessState::Ready;
                if process.tracker.count() > 0 && process.healthy_timer.is_none() {
                    process.healthy_timer = Some(schedule(
                        &self.events_tx,
                        process.tracker.policy().healthy_reset(),
                        Event::HealthyFor {
                            name: name.to_string(),
                            instance: process.instance,
                        },
                    ));
                }
            }
            _ => {}
        }
        self.refresh_targets();
    }

    fn relaunch_waiting(&mut self) {
        for name in self.order.clone() {
            self.maybe_relaunch(&name);
        }
    }

    /// Relaunch `name` if it is due and every dependency is ready.
    fn maybe_relaunch(&mut self, name: &str) {
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(process) = self.processes.get(name) else {
            return;
        };
        if !process.restart_pending || process.backoff.is_some() || process.monitor.is_some() {
            return;
        }
        let waiting_on: Vec<&String> = self
            .graph
            .dependencies_of(name)
            .iter()
            .filter(|d| {
                !self
                    .processes
                    .get(d.as_str())
                    .map(|p| p.state.is_ready())
                    .unwrap_or(false)
            })
            .collect();
        if !waiting_on.is_empty() {
            debug!("{} waiting for {:?} before relaunch", name, waiting_on);
            return;
        }

        match self.launch(name) {
            Ok((probe, exited)) => {
                let Some(process) = self.processes.get_mut(name) else {
                    return;
                };
                process.restart_pending = false;
                process.readiness = Some(tokio::spawn(await_readiness(
                    name.to_string(),
                    process.instance,
                    probe,
                    self.cancel.clone(),
                    exited,
                    self.events_tx.clone(),
                )));
            }
            Err(e) => {
                warn!("Relaunch of {} failed: {}", name, e);
                self.on_failure(name, e.to_string());
            }
        }
    }

    /// Start one instance of `name` and its monitor.
    fn launch(
        &mut self,
        name: &str,
    ) -> Result<(ReadinessProbe, CancellationToken), SupervisorError> {
        let config = match self.processes.get(name) {
            Some(process) => process.config.clone(),
            None => {
                return Err(SupervisorError::Spawn {
                    process: name.to_string(),
                    reason: "unknown process".to_string(),
                })
            }
        };
        let display = &self.config.display;

        let (handle, probe): (Box<dyn ProcessHandle>, ReadinessProbe) = match config.kind {
            ProcessKind::Command => {
                let launch = LaunchSpec::from_config(&config, display)?;
                let (child, marker) = ChildHandle::spawn(&launch)?;
                let probe = ReadinessProbe::from_config(&config.probe, display, Some(marker));
                (Box::new(child), probe)
            }
            kind => {
                let probe = ReadinessProbe::from_config(&config.probe, display, None);
                let cancel = CancellationToken::new();
                let join = self.spawn_gateway(kind, cancel.clone())?;
                (Box::new(TaskHandle::new(join, cancel)), probe)
            }
        };

        let liveness = self
            .config
            .health
            .liveness_interval()
            .filter(|_| probe.is_active())
            .map(|interval| (probe.clone(), interval));

        let Some(process) = self.processes.get_mut(name) else {
            return Err(SupervisorError::Spawn {
                process: name.to_string(),
                reason: "unknown process".to_string(),
            });
        };
        process.instance += 1;
        process.state = ProcessState::Starting;
        process.pid = handle.pid();
        process.launched_at = Some(Utc::now());
        process.ready_at = None;
        let monitor = spawn_monitor(
            name.to_string(),
            process.instance,
            handle,
            liveness,
            self.events_tx.clone(),
        );
        let exited = monitor.exited();
        process.monitor = Some(monitor);
        info!("Launched {} (instance {})", name, process.instance);

        self.refresh_targets();
        Ok((probe, exited))
    }

    fn spawn_gateway(
        &mut self,
        kind: ProcessKind,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<Result<(), GatewayError>>, SupervisorError> {
        let binding = self.ensure_binding(kind)?;
        match kind {
            ProcessKind::AutomationGateway => {
                let gateway = match &self.automation {
                    Some(gateway) => gateway.clone(),
                    None => {
                        let options = AutomationOptions::from(&self.config.endpoints.automation);
                        let gateway = Arc::new(AutomationGateway::new(binding, options));
                        self.automation = Some(gateway.clone());
                        gateway
                    }
                };
                Ok(tokio::spawn(gateway.serve(cancel)))
            }
            ProcessKind::WebGateway => {
                let gateway = match &self.web {
                    Some(gateway) => gateway.clone(),
                    None => {
                        let options = WebOptions::from(&self.config.endpoints.web);
                        let gateway = Arc::new(WebGateway::new(binding, options));
                        self.web = Some(gateway.clone());
                        gateway
                    }
                };
                Ok(tokio::spawn(gateway.serve(cancel)))
            }
            ProcessKind::Command => Err(SupervisorError::Spawn {
                process: kind.to_string(),
                reason: "not a builtin".to_string(),
            }),
        }
    }

    /// Bind the endpoint served by `kind` on first use.
    fn ensure_binding(&mut self, kind: ProcessKind) -> Result<EndpointBinding, SupervisorError> {
        let Some(endpoint) = self.endpoints.iter_mut().find(|e| e.gateway == kind) else {
            return Err(SupervisorError::Spawn {
                process: kind.to_string(),
                reason: "no endpoint configured".to_string(),
            });
        };
        if let Some(binding) = &endpoint.binding {
            return Ok(binding.clone());
        }
        let binding = EndpointBinding::bind(endpoint.name, &endpoint.host, endpoint.port)?;
        endpoint.binding = Some(binding.clone());
        Ok(binding)
    }

    fn mark_ready(&mut self, name: &str) {
        let Some(process) = self.processes.get_mut(name) else {
            return;
        };
        process.state = ProcessState::Ready;
        process.ready_at = Some(Utc::now());
        if process.tracker.count() > 0 {
            process.healthy_timer = Some(schedule(
                &self.events_tx,
                process.tracker.policy().healthy_reset(),
                Event::HealthyFor {
                    name: name.to_string(),
                    instance: process.instance,
                },
            ));
        }
        self.refresh_targets();
    }

    fn mark_failed(&mut self, name: &str, reason: String) {
        if let Some(process) = self.processes.get_mut(name) {
            process.state = ProcessState::Failed;
            process.last_error = Some(reason);
        }
        self.refresh_targets();
    }

    /// Point each binding at its backend while the backend is up, and clear
    /// it otherwise. A new backend instance always gets a new generation.
    fn refresh_targets(&mut self) {
        for endpoint in &mut self.endpoints {
            let Some(binding) = &endpoint.binding else {
                continue;
            };
            let desired = self
                .processes
                .get(&endpoint.backend_process)
                .filter(|p| matches!(p.state, ProcessState::Ready | ProcessState::Degraded))
                .map(|p| p.instance);
            if desired == endpoint.targeted {
                continue;
            }
            match desired {
                Some(instance) => info!(
                    "Endpoint {} now forwards to {} ({} instance {})",
                    endpoint.name, endpoint.backend, endpoint.backend_process, instance
                ),
                None => info!(
                    "Endpoint {} backend {} unavailable",
                    endpoint.name, endpoint.backend_process
                ),
            }
            binding.set_target(desired.map(|_| endpoint.backend.clone()));
            endpoint.targeted = desired;
        }
    }

    fn refresh_session_state(&mut self) {
        if !matches!(self.state, SessionState::Running | SessionState::Degraded) {
            return;
        }
        let degraded = self.processes.values().any(|p| {
            p.state == ProcessState::Failed || (p.config.critical && !p.state.is_ready())
        });
        let next = if degraded {
            SessionState::Degraded
        } else {
            SessionState::Running
        };
        self.set_state(next);
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            info!("Sandbox {}: {} -> {}", self.config.sandbox.name, self.state, next);
            self.state = next;
        }
    }

    /// Stop everything in reverse dependency order within one shared
    /// grace period; stragglers are killed when it runs out.
    async fn teardown(&mut self) {
        self.set_state(SessionState::ShuttingDown);
        for process in self.processes.values_mut() {
            process.abort_timers();
            process.restart_pending = false;
        }
        self.publish();

        let grace = self.config.shutdown.grace_period();
        let deadline = Instant::now() + grace;
        info!("Stopping all processes (grace period {:?})", grace);

        let levels = self.graph.levels().to_vec();
        for level in levels.iter().rev() {
            let mut stopping = Vec::new();
            for name in level {
                if let Some(mut monitor) = self.processes.get_mut(name).and_then(|p| p.monitor.take()) {
                    monitor.stop(deadline);
                    stopping.push((name.clone(), monitor));
                }
            }
            let exits = join_all(
                stopping
                    .into_iter()
                    .map(|(name, monitor)| async move { (name, monitor.join().await) }),
            )
            .await;

            for (name, exit) in exits {
                if let Some(process) = self.processes.get_mut(&name) {
                    debug!("{} stopped: {}", name, exit);
                    process.record_exit(exit);
                    if process.state != ProcessState::Failed {
                        process.state = ProcessState::Stopped;
                    }
                }
            }
            self.refresh_targets();
            self.publish();
        }

        for endpoint in &mut self.endpoints {
            if let Some(binding) = &endpoint.binding {
                binding.set_target(None);
            }
            endpoint.targeted = None;
        }
        while self.events_rx.try_recv().is_ok() {}
    }

    fn finish(&mut self, error: Option<String>) {
        self.error = error;
        self.set_state(SessionState::Terminated);
        self.publish();
        match &self.error {
            Some(error) => error!("Sandbox {} terminated: {}", self.config.sandbox.name, error),
            None => info!("Sandbox {} terminated", self.config.sandbox.name),
        }
    }

    fn publish(&self) {
        let processes = self
            .order
            .iter()
            .filter_map(|name| self.processes.get(name))
            .map(ManagedProcess::snapshot)
            .collect();
        let endpoints = self
            .endpoints
            .iter()
            .map(|e| self.endpoint_snapshot(e))
            .collect();

        self.status.send_replace(SessionSnapshot {
            name: self.config.sandbox.name.clone(),
            state: self.state,
            error: self.error.clone(),
            started_at: self.started_at,
            updated_at: Utc::now(),
            processes,
            endpoints,
        });
    }

    fn endpoint_snapshot(&self, endpoint: &Endpoint) -> EndpointSnapshot {
        let gateway_ready = self
            .processes
            .values()
            .any(|p| p.config.kind == endpoint.gateway && p.state.is_ready());
        let target = endpoint.binding.as_ref().and_then(EndpointBinding::target);

        EndpointSnapshot {
            name: endpoint.name.to_string(),
            address: endpoint
                .binding
                .as_ref()
                .map(|b| b.local_addr().to_string())
                .unwrap_or_else(|| format!("{}:{}", endpoint.host, endpoint.port)),
            backend: endpoint.backend.clone(),
            backend_process: endpoint.backend_process.clone(),
            available: gateway_ready && target.is_some(),
            generation: target.map(|t| t.generation),
        }
    }
}

/// Deliver `event` after `delay`.
fn schedule(events: &mpsc::UnboundedSender<Event>, delay: Duration, event: Event) -> JoinHandle<()> {
    let events = events.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = events.send(event);
    })
}

/// Report the readiness of a relaunched instance back to the control loop.
async fn await_readiness(
    name: String,
    instance: u64,
    probe: ReadinessProbe,
    cancel: CancellationToken,
    exited: CancellationToken,
    events: mpsc::UnboundedSender<Event>,
) {
    match probe.wait_ready(&cancel, &exited).await {
        Ok(_) => {
            let _ = events.send(Event::Ready { name, instance });
        }
        // The monitor reports exits itself.
        Err(ProbeError::Cancelled) | Err(ProbeError::Exited) => {}
        Err(e) => {
            let _ = events.send(Event::ProbeFailed {
                name,
                instance,
                reason: e.to_string(),
            });
        }
    }
}
