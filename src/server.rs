//! Tracing setup and the `run` command.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use tokio_util::sync::CancellationToken;

use sandboxd_api::{ApiServer, ApiState};
use sandboxd_config::{LoggingConfig, SandboxConfig};
use sandboxd_supervisor::{PidFile, SignalHandler, Supervisor, SupervisorError};

/// Initialize tracing: console output plus, when `logging.dir` is set, a
/// daily rolling file. `RUST_LOG` overrides `logging.level`.
pub(crate) fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)?,
    };

    let console = if logging.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).boxed()
    };

    let file = match &logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("sandboxd")
                .filename_suffix("log")
                .max_log_files(14)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            // Flushes buffered lines on exit.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

/// Run one sandbox session in the foreground until it terminates or a
/// shutdown is requested.
pub(crate) async fn run_sandbox(
    config: SandboxConfig,
    pid_file: Option<std::path::PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let _pid_file = match pid_file.or_else(|| config.sandbox.pid_file.clone()) {
        Some(path) => {
            let mut pid_file = PidFile::new(path);
            pid_file.try_acquire()?;
            Some(pid_file)
        }
        None => None,
    };

    let signals = SignalHandler::new();
    signals.setup_os_signals()?;

    let control = config.control.clone();
    let name = config.sandbox.name.clone();
    let supervisor = Arc::new(Supervisor::new(config)?);

    let api_cancel = CancellationToken::new();
    let api = ApiServer::new(&control, ApiState::new(supervisor.clone(), signals.clone()));
    let listener = api.bind().await?;
    let api_task = tokio::spawn(api.serve(listener, api_cancel.clone()));

    let stopper = {
        let supervisor = supervisor.clone();
        let signals = signals.clone();
        tokio::spawn(async move {
            signals.wait_for_shutdown().await;
            info!("Shutdown requested, stopping sandbox");
            if let Err(e) = supervisor.stop().await {
                error!("Stop failed: {}", e);
            }
        })
    };

    let failure = match supervisor.start().await {
        Ok(()) => {
            for endpoint in supervisor.status().endpoints {
                info!(
                    "Endpoint {} listening on {} (backend {})",
                    endpoint.name, endpoint.address, endpoint.backend
                );
            }
            supervisor.wait_terminated().await.error
        }
        Err(e) => startup_failure(e, signals.is_shutdown_requested()),
    };

    supervisor.stop().await?;
    stopper.abort();
    api_cancel.cancel();
    match api_task.await {
        Ok(Err(e)) => warn!("Control API error: {}", e),
        Err(e) => warn!("Control API task failed: {}", e),
        Ok(Ok(())) => {}
    }

    match failure {
        Some(reason) => {
            error!("Sandbox {} failed: {}", name, reason);
            Err(reason.into())
        }
        None => {
            info!("Sandbox {} stopped", name);
            Ok(())
        }
    }
}

/// A stop that wins the race against `start` is a clean shutdown, not a
/// failure.
fn startup_failure(error: SupervisorError, shutdown_requested: bool) -> Option<String> {
    match error {
        SupervisorError::Cancelled => None,
        SupervisorError::InvalidStateTransition { .. } if shutdown_requested => None,
        other => Some(other.to_string()),
    }
}
