//! Control API server.

use sandboxd_config::ControlConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ApiError;
use crate::routes::create_router;
use crate::state::ApiState;

pub struct ApiServer {
    host: String,
    port: u16,
    state: ApiState,
}

impl ApiServer {
    pub fn new(config: &ControlConfig, state: ApiState) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            state,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub async fn bind(&self) -> Result<TcpListener, ApiError> {
        let addr = self.addr();
        TcpListener::bind(&addr).await.map_err(|e| ApiError::Bind {
            addr,
            reason: e.to_string(),
        })
    }

    /// Serve until `cancel` fires, letting in-flight requests finish.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<(), ApiError> {
        info!("Control API listening on {}", listener.local_addr()?);
        axum::serve(listener, create_router(self.state))
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await?;
        info!("Control API stopped");
        Ok(())
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), ApiError> {
        let listener = self.bind().await?;
        self.serve(listener, cancel).await
    }
}
