//! Shared handler state.

use std::sync::Arc;

use sandboxd_supervisor::{SignalHandler, Supervisor};

/// What every handler can reach.
#[derive(Clone)]
pub struct ApiState {
    pub supervisor: Arc<Supervisor>,
    /// Shutdown requests are forwarded here; the binary owns the actual stop.
    pub signals: SignalHandler,
}

impl ApiState {
    pub fn new(supervisor: Arc<Supervisor>, signals: SignalHandler) -> Self {
        Self {
            supervisor,
            signals,
        }
    }
}
