use std::sync::Arc;

use super::*;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use sandboxd_config::{ProcessConfig, SandboxConfig};
use sandboxd_supervisor::{SignalHandler, Supervisor};
use tower::ServiceExt;

fn state_for(config: SandboxConfig) -> ApiState {
    let supervisor = Arc::new(Supervisor::new(config).unwrap());
    ApiState::new(supervisor, SignalHandler::new())
}

fn idle_sandbox() -> SandboxConfig {
    SandboxConfig {
        processes: vec![ProcessConfig::command("idle", "/bin/sh").with_args(["-c", "exec sleep 60"])],
        ..Default::default()
    }
}

async fn call(state: ApiState, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = create_router(state)
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("host", "sandbox.test:7070")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_before_start_is_unavailable() {
    let (status, body) = call(state_for(idle_sandbox()), "GET", "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "initializing");
    assert_eq!(body["ready"], false);
    assert_eq!(body["sandbox"], "sandbox");
}

#[cfg(unix)]
#[tokio::test]
async fn test_health_while_running() {
    let state = state_for(idle_sandbox());
    state.supervisor.start().await.unwrap();

    let (status, body) = call(state.clone(), "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert_eq!(body["ready"], true);

    state.supervisor.stop().await.unwrap();
    let (status, body) = call(state, "GET", "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "terminated");
}

#[tokio::test]
async fn test_status_reports_public_urls() {
    let (status, body) = call(state_for(SandboxConfig::default()), "GET", "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "initializing");
    assert_eq!(body["processes"].as_array().unwrap().len(), 6);
    assert_eq!(
        body["vnc_url"],
        "http://sandbox.test:6080/vnc.html?autoconnect=true&resize=scale&path=websockify"
    );
    assert_eq!(body["automation_url"], "ws://sandbox.test:37367/");
}

#[tokio::test]
async fn test_status_without_gateways_has_no_urls() {
    let (_, body) = call(state_for(idle_sandbox()), "GET", "/status").await;
    assert!(body["vnc_url"].is_null());
    assert!(body["automation_url"].is_null());
    assert_eq!(body["processes"][0]["name"], "idle");
    assert_eq!(body["processes"][0]["state"], "not_started");
}

#[tokio::test]
async fn test_shutdown_forwards_request() {
    let state = state_for(idle_sandbox());
    let (status, body) = call(state.clone(), "POST", "/shutdown").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "shutting_down");
    assert!(state.signals.is_shutdown_requested());
}

#[tokio::test]
async fn test_shutdown_after_termination_conflicts() {
    let state = state_for(idle_sandbox());
    state.supervisor.stop().await.unwrap();

    let (status, body) = call(state.clone(), "POST", "/shutdown").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_terminated");
    assert!(!state.signals.is_shutdown_requested());
}

#[tokio::test]
async fn test_livez() {
    let (status, body) = call(state_for(idle_sandbox()), "GET", "/livez").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
}

#[tokio::test]
async fn test_unknown_route() {
    let (status, _) = call(state_for(idle_sandbox()), "GET", "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
