//! # sandboxd Control API
//!
//! The synchronous query surface used by the external orchestrator:
//!
//! - `GET /health`: 200 while the session is `running`, 503 otherwise
//! - `GET /status`: the full session snapshot plus public viewer and
//!   automation URLs
//! - `POST /shutdown`: request a graceful teardown (202)
//! - `GET /livez`: the supervisor process itself is up
//!
//! Handlers only read published snapshots and never wait on the supervisor's
//! control task.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use handlers::{HealthResponse, ShutdownResponse, StatusResponse};
pub use routes::create_router;
pub use server::ApiServer;
pub use state::ApiState;
