//! Gateway errors.

use thiserror::Error;

/// Errors raised by endpoint bindings and gateways.
///
/// `BackendUnavailable` and `BackendBusy` are per-connection: they end one
/// external connection and never affect sandbox state.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The local backend could not be reached in time.
    #[error("Backend unavailable for {endpoint}: {reason}")]
    BackendUnavailable { endpoint: String, reason: String },

    /// Capacity policy rejected the connection.
    #[error("Backend busy for {endpoint}: {active} active connection(s)")]
    BackendBusy { endpoint: String, active: usize },

    /// The external listener could not be bound.
    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::BackendUnavailable { .. } => "backend_unavailable",
            GatewayError::BackendBusy { .. } => "backend_busy",
            GatewayError::Bind { .. } => "bind_failed",
            GatewayError::Io(_) => "io_error",
        }
    }
}
