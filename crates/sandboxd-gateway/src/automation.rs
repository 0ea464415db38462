//! Automation protocol gateway.

use std::sync::Arc;
use std::time::Duration;

use sandboxd_config::AutomationEndpointConfig;
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::binding::EndpointBinding;
use crate::error::GatewayError;
use crate::relay::{relay, ClosedBy};

/// Dialing and capacity policy for the automation gateway.
#[derive(Debug, Clone)]
pub struct AutomationOptions {
    /// Allow several concurrent clients to share the engine.
    pub multiplex: bool,
    /// Upper bound on holding a client while the engine is unreachable.
    pub dial_timeout: Duration,
    pub dial_initial_backoff: Duration,
    pub dial_max_backoff: Duration,
}

impl Default for AutomationOptions {
    fn default() -> Self {
        Self::from(&AutomationEndpointConfig::default())
    }
}

impl From<&AutomationEndpointConfig> for AutomationOptions {
    fn from(config: &AutomationEndpointConfig) -> Self {
        Self {
            multiplex: config.multiplex,
            dial_timeout: config.dial_timeout(),
            dial_initial_backoff: config.dial_initial_backoff(),
            dial_max_backoff: config.dial_max_backoff(),
        }
    }
}

/// Relays raw automation traffic between external clients and the engine.
///
/// One gateway lives for the whole sandbox; `serve` may be called again after
/// a restart and the single-client slot carries over, so a client that is
/// still connected keeps the engine to itself.
pub struct AutomationGateway {
    binding: EndpointBinding,
    options: AutomationOptions,
    slot: Arc<Semaphore>,
}

impl AutomationGateway {
    pub fn new(binding: EndpointBinding, options: AutomationOptions) -> Self {
        Self {
            binding,
            options,
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn binding(&self) -> &EndpointBinding {
        &self.binding
    }

    /// Accept connections until `cancel` fires.
    ///
    /// Each connection is handled on its own task. Connections in flight when
    /// the gateway is cancelled are left to finish on their own.
    pub async fn serve(self: Arc<Self>, cancel: CancellationToken) -> Result<(), GatewayError> {
        let listener = self.binding.listener()?;
        info!(
            "Automation gateway accepting on {}",
            self.binding.local_addr()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Automation gateway stopped accepting");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("Automation gateway accept failed: {}", e);
                            continue;
                        }
                    };
                    let gateway = self.clone();
                    tokio::spawn(async move {
                        let conn_id = uuid::Uuid::new_v4().to_string();
                        debug!("Automation connection {} from {}", conn_id, peer);
                        match gateway.handle_connection(stream).await {
                            Ok(closed_by) => {
                                debug!("Automation connection {} closed by {}", conn_id, closed_by);
                            }
                            Err(e) => {
                                warn!("Automation connection {} from {} rejected: {}", conn_id, peer, e);
                            }
                        }
                    });
                }
            }
        }
    }

    /// Serve one external connection to completion.
    ///
    /// On `BackendBusy` or `BackendUnavailable` the client socket is closed
    /// without writing any bytes; the automation protocol is opaque here.
    pub async fn handle_connection(&self, client: TcpStream) -> Result<ClosedBy, GatewayError> {
        let _permit = self.claim_slot()?;
        let backend = self.dial_backend().await?;
        let _ = client.set_nodelay(true);
        let _ = backend.set_nodelay(true);

        let stats = relay(client, backend).await;
        debug!(
            "Relay finished: {} bytes to engine, {} bytes to client",
            stats.to_backend, stats.to_client
        );
        Ok(stats.closed_by)
    }

    fn claim_slot(&self) -> Result<Option<OwnedSemaphorePermit>, GatewayError> {
        if self.options.multiplex {
            return Ok(None);
        }
        self.slot
            .clone()
            .try_acquire_owned()
            .map(Some)
            .map_err(|_| GatewayError::BackendBusy {
                endpoint: self.binding.name().to_string(),
                active: 1,
            })
    }

    /// Dial the current target, retrying with backoff until the dial timeout.
    ///
    /// The target is re-read on every attempt, so a client held while the
    /// engine restarts connects to the new instance.
    async fn dial_backend(&self) -> Result<TcpStream, GatewayError> {
        let deadline = Instant::now() + self.options.dial_timeout;
        let mut backoff = self.options.dial_initial_backoff;
        let mut last_error = "no backend target".to_string();

        loop {
            if let Some(target) = self.binding.target() {
                match tokio::time::timeout_at(deadline, TcpStream::connect(&target.address)).await {
                    Ok(Ok(stream)) => return Ok(stream),
                    Ok(Err(e)) => last_error = format!("{}: {}", target.address, e),
                    Err(_) => last_error = format!("{}: dial timed out", target.address),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(GatewayError::BackendUnavailable {
                    endpoint: self.binding.name().to_string(),
                    reason: last_error,
                });
            }
            tokio::time::sleep_until((now + backoff).min(deadline)).await;
            backoff = (backoff * 2).min(self.options.dial_max_backoff);
        }
    }
}

#[cfg(test)]
#[path = "automation_tests.rs"]
mod tests;
