//! Control API handlers.

use axum::extract::State;
use axum::http::{header::HOST, HeaderMap, StatusCode};
use axum::Json;
use sandboxd_gateway::VIEWER_PATH;
use sandboxd_supervisor::{SessionSnapshot, SessionState, AUTOMATION_ENDPOINT, WEB_ENDPOINT};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::state::ApiState;

/// `GET /health` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: SessionState,
    pub sandbox: String,
    /// True only while every critical process is ready.
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /status` body: the snapshot plus URLs a client can open directly.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub session: SessionSnapshot,
    pub vnc_url: Option<String>,
    pub automation_url: Option<String>,
}

/// `POST /shutdown` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownResponse {
    pub status: String,
    /// Session state when the request arrived.
    pub state: SessionState,
}

pub async fn health(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let snapshot = state.supervisor.status();
    let ready = snapshot.state == SessionState::Running;
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status: snapshot.state,
            sandbox: snapshot.name,
            ready,
            error: snapshot.error,
        }),
    )
}

pub async fn status(State(state): State<ApiState>, headers: HeaderMap) -> Json<StatusResponse> {
    let session = state.supervisor.status();
    let host = public_host(&headers);

    let vnc_url = session
        .endpoint(WEB_ENDPOINT)
        .and_then(|e| port_of(&e.address))
        .map(|port| format!("http://{}:{}{}", host, port, VIEWER_PATH));
    let automation_url = session
        .endpoint(AUTOMATION_ENDPOINT)
        .and_then(|e| port_of(&e.address))
        .map(|port| format!("ws://{}:{}/", host, port));

    Json(StatusResponse {
        session,
        vnc_url,
        automation_url,
    })
}

pub async fn shutdown(
    State(state): State<ApiState>,
) -> Result<(StatusCode, Json<ShutdownResponse>), ApiError> {
    let current = state.supervisor.status().state;
    if current == SessionState::Terminated {
        return Err(ApiError::AlreadyTerminated);
    }

    info!("Shutdown requested via control API (state: {})", current);
    state.signals.request_shutdown();

    Ok((
        StatusCode::ACCEPTED,
        Json(ShutdownResponse {
            status: "shutting_down".to_string(),
            state: current,
        }),
    ))
}

/// The supervisor process answers; says nothing about the sandbox.
pub async fn livez() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Host the client used to reach us, without its port.
fn public_host(headers: &HeaderMap) -> String {
    let Some(host) = headers.get(HOST).and_then(|v| v.to_str().ok()) else {
        return "localhost".to_string();
    };
    if let Some(end) = host.find(']') {
        return host[..=end].to_string();
    }
    host.split(':').next().unwrap_or(host).to_string()
}

fn port_of(address: &str) -> Option<u16> {
    address.rsplit_once(':').and_then(|(_, port)| port.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_host(host: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_str(host).unwrap());
        headers
    }

    #[test]
    fn test_public_host_strips_port() {
        assert_eq!(public_host(&with_host("sandbox-7.internal:7070")), "sandbox-7.internal");
        assert_eq!(public_host(&with_host("10.0.0.5")), "10.0.0.5");
        assert_eq!(public_host(&with_host("[::1]:7070")), "[::1]");
        assert_eq!(public_host(&HeaderMap::new()), "localhost");
    }

    #[test]
    fn test_port_of() {
        assert_eq!(port_of("0.0.0.0:6080"), Some(6080));
        assert_eq!(port_of("[::]:37367"), Some(37367));
        assert_eq!(port_of("nonsense"), None);
    }
}
