//! # sandboxd Gateway
//!
//! The externally reachable side of a sandbox.
//!
//! - [`EndpointBinding`]: a listener bound once for the sandbox lifetime plus
//!   an atomically swapped backend target. Restarting the process behind an
//!   endpoint only changes the target; the external address never moves.
//! - [`AutomationGateway`]: relays raw automation-protocol bytes between one
//!   external client and the browser engine's control endpoint.
//! - [`WebGateway`]: bridges the local VNC server to browser viewers over
//!   WebSocket and optionally serves a static viewer front-end.
//!
//! Neither gateway interprets the protocol it carries.

mod automation;
mod binding;
mod error;
mod relay;
mod web;

pub use automation::{AutomationGateway, AutomationOptions};
pub use binding::{BackendTarget, EndpointBinding};
pub use error::GatewayError;
pub use relay::ClosedBy;
pub use web::{WebGateway, WebOptions, VIEWER_PATH};
