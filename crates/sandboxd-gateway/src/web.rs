//! Remote-desktop WebSocket bridge and viewer front-end.

use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use sandboxd_config::WebEndpointConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeader;
use tracing::{debug, info, warn};

use crate::binding::EndpointBinding;
use crate::error::GatewayError;
use crate::relay::ClosedBy;

/// Viewer page opened from `/`, pointed at the bridge.
pub const VIEWER_PATH: &str = "/vnc.html?autoconnect=true&resize=scale&path=websockify";

/// Web gateway settings.
#[derive(Debug, Clone)]
pub struct WebOptions {
    /// Budget for dialing the VNC server per viewer.
    pub connect_timeout: Duration,
    pub web_root: Option<PathBuf>,
}

impl Default for WebOptions {
    fn default() -> Self {
        Self::from(&WebEndpointConfig::default())
    }
}

impl From<&WebEndpointConfig> for WebOptions {
    fn from(config: &WebEndpointConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            web_root: config.web_root.clone(),
        }
    }
}

/// Bridges each viewer WebSocket to its own connection to the VNC server.
pub struct WebGateway {
    binding: EndpointBinding,
    options: WebOptions,
}

impl WebGateway {
    pub fn new(binding: EndpointBinding, options: WebOptions) -> Self {
        Self { binding, options }
    }

    pub fn binding(&self) -> &EndpointBinding {
        &self.binding
    }

    /// Build the HTTP router.
    pub fn router(self: &Arc<Self>) -> Router {
        let router = Router::new()
            .route("/", get(index))
            .route("/websockify", get(websockify))
            .route("/health", get(health))
            .with_state(self.clone());

        match &self.options.web_root {
            Some(root) => router.fallback_service(SetResponseHeader::overriding(
                ServeDir::new(root),
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache"),
            )),
            None => router,
        }
    }

    /// Serve HTTP until `cancel` fires.
    pub async fn serve(self: Arc<Self>, cancel: CancellationToken) -> Result<(), GatewayError> {
        let listener = self.binding.listener()?;
        let app = self.router();
        info!("Web gateway listening on {}", self.binding.local_addr());

        tokio::select! {
            result = axum::serve(listener, app).into_future() => result.map_err(GatewayError::from),
            _ = cancel.cancelled() => {
                debug!("Web gateway stopped accepting");
                Ok(())
            }
        }
    }

    /// Connect to the VNC server, failing fast when it is not up.
    async fn dial_backend(&self) -> Result<TcpStream, GatewayError> {
        let unavailable = |reason: String| GatewayError::BackendUnavailable {
            endpoint: self.binding.name().to_string(),
            reason,
        };

        let target = self
            .binding
            .target()
            .ok_or_else(|| unavailable("no backend target".to_string()))?;

        match tokio::time::timeout(self.options.connect_timeout, TcpStream::connect(&target.address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(unavailable(format!("{}: {}", target.address, e))),
            Err(_) => Err(unavailable(format!("{}: connect timed out", target.address))),
        }
    }
}

async fn index(State(gateway): State<Arc<WebGateway>>) -> Response {
    if gateway.options.web_root.is_some() {
        return Redirect::temporary(VIEWER_PATH).into_response();
    }

    Json(serde_json::json!({
        "name": "sandboxd web gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "websocket": "/websockify",
            "health": "/health"
        }
    }))
    .into_response()
}

async fn health(State(gateway): State<Arc<WebGateway>>) -> impl IntoResponse {
    let target = gateway.binding.target();
    Json(serde_json::json!({
        "status": "ok",
        "backend_available": target.is_some(),
        "backend": target.as_ref().map(|t| t.address.clone()),
        "generation": target.as_ref().map(|t| t.generation),
    }))
}

/// Upgrade only once the VNC server answered, so an unavailable backend is
/// reported as a plain HTTP error instead of a socket that closes at once.
async fn websockify(ws: WebSocketUpgrade, State(gateway): State<Arc<WebGateway>>) -> Response {
    match gateway.dial_backend().await {
        Ok(backend) => ws
            .protocols(["binary"])
            .on_upgrade(move |socket| async move {
                let conn_id = uuid::Uuid::new_v4().to_string();
                debug!("Viewer {} connected", conn_id);
                let closed_by = bridge(socket, backend).await;
                debug!("Viewer {} closed by {}", conn_id, closed_by);
            }),
        Err(e) => {
            warn!("Viewer rejected: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "error": e.code(),
                    "message": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

/// Pump VNC bytes as binary frames and binary frames back as bytes.
async fn bridge(socket: WebSocket, backend: TcpStream) -> ClosedBy {
    let _ = backend.set_nodelay(true);
    let (mut backend_rx, mut backend_tx) = backend.into_split();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let closed_by = {
        let upstream = async {
            while let Some(Ok(msg)) = ws_rx.next().await {
                let data = match msg {
                    Message::Binary(data) => data,
                    Message::Text(text) => text.as_str().as_bytes().to_vec().into(),
                    Message::Close(_) => break,
                    _ => continue,
                };
                if backend_tx.write_all(&data).await.is_err() {
                    break;
                }
            }
        };

        let downstream = async {
            let mut buf = vec![0u8; 16 * 1024];
            loop {
                let n = match backend_rx.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if ws_tx.send(Message::Binary(buf[..n].to_vec().into())).await.is_err() {
                    break;
                }
            }
        };

        tokio::select! {
            _ = upstream => ClosedBy::Client,
            _ = downstream => ClosedBy::Backend,
        }
    };

    let _ = backend_tx.shutdown().await;
    let _ = ws_tx.send(Message::Close(None)).await;
    closed_by
}
