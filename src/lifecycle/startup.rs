//! Startup orchestration for `serve`.
//!
//! # Responsibilities
//! - Start the metrics exporter when enabled
//! - Bind the public listener
//! - Serve until a signal arrives, then run the coordinator's shutdown
//!
//! # Design Decisions
//! - Fail fast: a bind error is fatal
//! - The backend is not started here; the first downstream connection starts it

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::BridgeConfig;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Coordinator};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server failed: {0}")]
    Serve(#[from] std::io::Error),
}

/// Run the bridge until SIGINT/SIGTERM.
pub async fn run(config: BridgeConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let address = config.listener.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;

    tracing::info!(
        address = %listener.local_addr()?,
        backend = %config.backend.endpoint(),
        workspace = %config.backend.workspace.display(),
        "Configuration loaded"
    );

    let coordinator = Arc::new(Coordinator::new(config));
    serve(coordinator, listener, signals::shutdown_signal()).await
}

/// Serve on `listener` until `stop` resolves or the server fails, then shut
/// the coordinator down.
pub async fn serve<F>(
    coordinator: Arc<Coordinator>,
    listener: TcpListener,
    stop: F,
) -> Result<(), StartupError>
where
    F: std::future::Future<Output = ()> + Send,
{
    let server = HttpServer::new(coordinator.clone());
    let mut handle = tokio::spawn(server.run(listener));

    let early_exit = tokio::select! {
        _ = stop => None,
        result = &mut handle => Some(result),
    };

    coordinator.shutdown().await;

    let result = match early_exit {
        Some(result) => result,
        None => handle.await,
    };

    match result {
        Ok(served) => served.map_err(StartupError::from),
        Err(e) => Err(StartupError::Serve(std::io::Error::other(e))),
    }?;

    tracing::info!("Shutdown complete");
    Ok(())
}
