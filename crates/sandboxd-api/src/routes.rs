//! Control API routes.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::ApiState;

/// ```text
/// GET  /health    - 200 while running, 503 otherwise
/// GET  /status    - session snapshot with public URLs
/// POST /shutdown  - graceful teardown (202)
/// GET  /livez     - supervisor liveness
/// ```
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/shutdown", post(handlers::shutdown))
        .route("/livez", get(handlers::livez))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
