//! Stable external endpoints.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::GatewayError;

/// Internal address an endpoint currently forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub address: String,
    /// Incremented on every swap, so two targets with the same address are
    /// still distinguishable across a backend restart.
    pub generation: u64,
}

struct BindingInner {
    name: String,
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
    generation: AtomicU64,
    target: watch::Sender<Option<BackendTarget>>,
}

/// A (host, port) bound once for the sandbox lifetime.
///
/// Gateways instantiated on top of a binding re-use the same OS socket, so a
/// gateway restart never changes the external address. The backend target is
/// a `watch` value: the supervisor swaps it, and each gateway reads it once
/// per accepted connection. Connections already being forwarded keep the
/// backend they dialed.
#[derive(Clone)]
pub struct EndpointBinding {
    inner: Arc<BindingInner>,
}

impl EndpointBinding {
    /// Bind `host:port`. Port 0 picks an ephemeral port.
    pub fn bind(name: impl Into<String>, host: &str, port: u16) -> Result<Self, GatewayError> {
        let addr = format!("{}:{}", host, port);
        let listener = std::net::TcpListener::bind(&addr).map_err(|e| GatewayError::Bind {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let name = name.into();

        info!("Endpoint {} bound on {}", name, local_addr);

        let (target, _) = watch::channel(None);
        Ok(Self {
            inner: Arc::new(BindingInner {
                name,
                listener,
                local_addr,
                generation: AtomicU64::new(0),
                target,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The external address. Stable for the binding's lifetime.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// An async listener sharing the bound socket.
    pub fn listener(&self) -> Result<TcpListener, GatewayError> {
        let std_listener = self.inner.listener.try_clone()?;
        Ok(TcpListener::from_std(std_listener)?)
    }

    /// Swap the backend target. `None` marks the backend unavailable.
    pub fn set_target(&self, address: Option<String>) {
        let name = &self.inner.name;
        let next = address.map(|address| {
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            debug!("Endpoint {} now targets {} (generation {})", name, address, generation);
            BackendTarget {
                address,
                generation,
            }
        });
        self.inner.target.send_modify(|current| {
            if next.is_none() && current.is_some() {
                debug!("Endpoint {} target cleared", name);
            }
            *current = next;
        });
    }

    /// Snapshot of the current target.
    pub fn target(&self) -> Option<BackendTarget> {
        self.inner.target.borrow().clone()
    }

    /// Whether a backend is currently targeted.
    pub fn is_available(&self) -> bool {
        self.inner.target.borrow().is_some()
    }

    /// Observe target swaps.
    pub fn subscribe(&self) -> watch::Receiver<Option<BackendTarget>> {
        self.inner.target.subscribe()
    }
}

impl std::fmt::Debug for EndpointBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointBinding")
            .field("name", &self.inner.name)
            .field("local_addr", &self.inner.local_addr)
            .field("target", &*self.inner.target.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let binding = EndpointBinding::bind("automation", "127.0.0.1", 0).unwrap();
        assert_eq!(binding.name(), "automation");
        assert_ne!(binding.local_addr().port(), 0);
        assert!(binding.target().is_none());
        assert!(!binding.is_available());
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let first = EndpointBinding::bind("a", "127.0.0.1", 0).unwrap();
        let port = first.local_addr().port();
        let second = EndpointBinding::bind("b", "127.0.0.1", port);
        assert!(matches!(second, Err(GatewayError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_set_target_bumps_generation() {
        let binding = EndpointBinding::bind("web", "127.0.0.1", 0).unwrap();

        binding.set_target(Some("127.0.0.1:5900".to_string()));
        let first = binding.target().unwrap();
        assert_eq!(first.address, "127.0.0.1:5900");
        assert_eq!(first.generation, 1);

        binding.set_target(None);
        assert!(!binding.is_available());

        binding.set_target(Some("127.0.0.1:5900".to_string()));
        let second = binding.target().unwrap();
        assert_eq!(second.address, first.address);
        assert_ne!(second, first);
    }

    #[tokio::test]
    async fn test_subscribers_observe_swaps() {
        let binding = EndpointBinding::bind("web", "127.0.0.1", 0).unwrap();
        let mut rx = binding.subscribe();

        binding.set_target(Some("127.0.0.1:1".to_string()));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().address, "127.0.0.1:1");
    }

    #[tokio::test]
    async fn test_listener_shares_address() {
        let binding = EndpointBinding::bind("automation", "127.0.0.1", 0).unwrap();
        let addr = binding.local_addr();

        let first = binding.listener().unwrap();
        assert_eq!(first.local_addr().unwrap(), addr);
        drop(first);

        // A second listener after the first is dropped still serves the same port.
        let second = binding.listener().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(second.accept(), connect);
        assert!(accepted.is_ok());
        assert!(connected.is_ok());
    }
}
