//! # sandboxd Supervisor
//!
//! Owns one sandbox session end to end: computes the dependency levels of the
//! configured processes, launches them level by level behind readiness
//! probes, restarts crashed processes under a bounded backoff policy, and
//! tears everything down in reverse order.
//!
//! ## Architecture
//!
//! - One monitor task per running process observes exits, stop requests and
//!   liveness re-probes.
//! - A single control task owns every piece of process and session state and
//!   reacts to monitor events received over a channel.
//! - Status is published as an immutable [`SessionSnapshot`] through a
//!   `watch` channel, so [`Supervisor::status`] never blocks the control task.
//!
//! Builtin gateway processes run as tasks inside the supervisor and sit on
//! endpoint bindings that are bound once, so restarts never move the
//! externally visible ports.

mod control;
mod error;
mod graph;
mod monitor;
mod pid;
mod probe;
mod process;
mod restart;
mod session;
mod signal;
mod state;
mod supervisor;

pub use error::SupervisorError;
pub use graph::{DependencyEdge, DependencyGraph};
pub use pid::PidFile;
pub use probe::{ProbeCheck, ProbeError, ReadinessProbe};
pub use process::{ExitRecord, LaunchSpec};
pub use restart::RestartTracker;
pub use session::{
    EndpointSnapshot, ProcessSnapshot, SessionSnapshot, AUTOMATION_ENDPOINT, WEB_ENDPOINT,
};
pub use signal::{send_signal_to_pid, SandboxSignal, SignalHandler};
pub use state::{ProcessState, SessionState};
pub use supervisor::Supervisor;
