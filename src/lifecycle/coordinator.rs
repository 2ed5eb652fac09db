//! Process-wide owner of the backend and the shared connection.
//!
//! # Responsibilities
//! - Bring the backend up on the first downstream connection, exactly once
//! - Hand the shared connection to every session
//! - Tear everything down in order on shutdown
//!
//! # Shutdown order
//! ```text
//! terminate child → close backend client → close sessions → broadcast → reap child
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::config::{BackendConfig, BridgeConfig};
use crate::health::HealthSummary;
use crate::http::session::SessionRegistry;
use crate::lifecycle::Shutdown;
use crate::protocol::{ForwardError, Implementation, ProtocolClient, Transport, TransportError};
use crate::upstream::{BackendConnection, HttpTransport, LaunchError, Supervisor};

/// Builds the transport used for the backend connection.
pub type TransportFactory =
    Arc<dyn Fn(&BackendConfig) -> Result<Arc<dyn Transport>, TransportError> + Send + Sync>;

/// The backend connection could not be provided.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("backend launch failed: {0}")]
    Launch(#[from] LaunchError),

    #[error("backend handshake failed: {0}")]
    Handshake(#[source] ForwardError),

    #[error("bridge is shutting down")]
    ShuttingDown,
}

impl BridgeError {
    fn code(&self) -> &'static str {
        match self {
            BridgeError::Launch(_) => "backend_launch_failed",
            BridgeError::Handshake(_) => "backend_handshake_failed",
            BridgeError::ShuttingDown => "shutting_down",
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

pub struct Coordinator {
    config: Arc<BridgeConfig>,
    supervisor: Arc<Supervisor>,
    connection: OnceCell<Arc<BackendConnection>>,
    transports: TransportFactory,
    sessions: Arc<SessionRegistry>,
    shutdown: Shutdown,
    shutting_down: AtomicBool,
}

impl Coordinator {
    /// Coordinator talking HTTP to the configured backend.
    pub fn new(config: BridgeConfig) -> Self {
        let factory: TransportFactory = Arc::new(|backend: &BackendConfig| {
            let transport: Arc<dyn Transport> = Arc::new(HttpTransport::from_config(backend)?);
            Ok(transport)
        });
        Self::with_transport_factory(config, factory)
    }

    pub fn with_transport_factory(config: BridgeConfig, transports: TransportFactory) -> Self {
        let supervisor = Arc::new(Supervisor::new(&config));
        Self {
            config: Arc::new(config),
            supervisor,
            connection: OnceCell::new(),
            transports,
            sessions: Arc::new(SessionRegistry::new()),
            shutdown: Shutdown::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn shutdown_handle(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// The shared backend connection, creating it on first use.
    ///
    /// Concurrent callers during the first initialization all wait for the
    /// same attempt. A failed attempt is not cached; the next call retries.
    pub async fn ensure_connected(&self) -> Result<Arc<BackendConnection>, BridgeError> {
        if self.is_shutting_down() {
            return Err(BridgeError::ShuttingDown);
        }

        self.connection
            .get_or_try_init(|| self.connect())
            .await
            .cloned()
    }

    async fn connect(&self) -> Result<Arc<BackendConnection>, BridgeError> {
        let backend = &self.config.backend;
        tracing::info!(
            workspace = %backend.workspace.display(),
            endpoint = %backend.endpoint(),
            "Initializing backend connection"
        );

        self.supervisor.launch(&backend.workspace).await?;
        self.supervisor.await_ready().await?;

        let transport = (self.transports)(backend).map_err(|e| BridgeError::Handshake(e.into()))?;
        let client = ProtocolClient::new(transport, Implementation::bridge());
        let connection =
            BackendConnection::open(client, self.supervisor.generation(), backend.call_timeout())
                .await
                .map_err(BridgeError::Handshake)?;

        let server = connection
            .server_info()
            .and_then(|info| info.get("serverInfo").cloned())
            .unwrap_or_default();
        tracing::info!(%server, "Backend connection established");
        Ok(Arc::new(connection))
    }

    pub fn health(&self) -> HealthSummary {
        HealthSummary::snapshot(
            &self.config.backend.identifier,
            self.supervisor.state(),
            self.sessions.len(),
        )
    }

    /// Stop everything. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down bridge");

        self.supervisor.terminate();

        if let Some(connection) = self.connection.get() {
            if let Err(e) = connection.close().await {
                tracing::warn!(error = %e, "Failed to close backend client");
            }
        }

        self.sessions.close_all();
        self.shutdown.trigger();

        let limit = Duration::from_millis(self.config.shutdown.grace_period_ms) + Duration::from_secs(1);
        match self.supervisor.wait_for_exit(limit).await {
            Some(state) => tracing::info!(backend_state = state.label(), "Backend stopped"),
            None => tracing::warn!(timeout = ?limit, "Backend still running after shutdown"),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::ReadinessStrategy;
    use crate::protocol::transport::scripted::ScriptedTransport;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Mutex, OnceLock};

    fn config(program: &str, args: &[&str]) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.backend.program = program.to_string();
        config.backend.args = args.iter().map(|s| s.to_string()).collect();
        config.backend.workspace = std::env::temp_dir();
        config.readiness.strategy = ReadinessStrategy::FixedDelay;
        config.readiness.warmup_ms = 50;
        config.shutdown.grace_period_ms = 500;
        config
    }

    fn scripted_factory(built: Arc<AtomicUsize>) -> TransportFactory {
        Arc::new(move |_: &BackendConfig| {
            built.fetch_add(1, Ordering::SeqCst);
            let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport::echo());
            Ok(transport)
        })
    }

    #[tokio::test]
    async fn test_concurrent_first_connections_share_one_initialization() {
        let built = Arc::new(AtomicUsize::new(0));
        let coordinator = Arc::new(Coordinator::with_transport_factory(
            config("sleep", &["30"]),
            scripted_factory(built.clone()),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.ensure_connected().await })
            })
            .collect();

        let mut connections = Vec::new();
        for handle in handles {
            connections.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(coordinator.supervisor().launch_count(), 1);
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_initialization_is_retried() {
        let built = Arc::new(AtomicUsize::new(0));
        let coordinator = Coordinator::with_transport_factory(
            config("sh", &["-c", "exit 2"]),
            scripted_factory(built.clone()),
        );

        let Err(err) = coordinator.ensure_connected().await else {
            panic!("a backend that exits during warmup must not connect");
        };
        assert!(matches!(
            err,
            BridgeError::Launch(LaunchError::ExitedDuringStartup { code: Some(2), .. })
        ));
        assert!(coordinator.ensure_connected().await.is_err());

        assert_eq!(coordinator.supervisor().launch_count(), 2);
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_terminates_child_before_closing_client() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let supervisor_slot: Arc<OnceLock<Arc<Supervisor>>> = Arc::new(OnceLock::new());

        let factory: TransportFactory = {
            let order = order.clone();
            let slot = supervisor_slot.clone();
            Arc::new(move |_: &BackendConfig| {
                let order = order.clone();
                let slot = slot.clone();
                let transport = ScriptedTransport::echo().with_close_hook(move || {
                    let terminated = slot.get().map(|s| s.termination_requested()).unwrap_or(false);
                    order.lock().unwrap().push(("client_closed", terminated));
                });
                let transport: Arc<dyn Transport> = Arc::new(transport);
                Ok(transport)
            })
        };

        let coordinator = Coordinator::with_transport_factory(config("sleep", &["30"]), factory);
        assert!(supervisor_slot.set(coordinator.supervisor().clone()).is_ok());
        coordinator.ensure_connected().await.unwrap();
        let mut stopped = coordinator.shutdown_handle().subscribe();

        coordinator.shutdown().await;

        assert_eq!(*order.lock().unwrap(), vec![("client_closed", true)]);
        assert!(stopped.try_recv().is_ok());
        assert!(!coordinator.supervisor().is_alive());
        assert!(matches!(
            coordinator.ensure_connected().await,
            Err(BridgeError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_health_tracks_backend_exit() {
        let coordinator = Coordinator::with_transport_factory(
            config("sh", &["-c", "sleep 0.3"]),
            scripted_factory(Arc::new(AtomicUsize::new(0))),
        );
        assert_eq!(coordinator.health().backend_state, "not_started");

        coordinator.ensure_connected().await.unwrap();
        assert!(coordinator.health().backend_alive);

        coordinator
            .supervisor()
            .wait_for_exit(Duration::from_secs(5))
            .await
            .unwrap();
        let health = coordinator.health();
        assert!(!health.backend_alive);
        assert_eq!(health.status, crate::health::HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_bridge_error_renders_service_unavailable() {
        let response = BridgeError::ShuttingDown.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "shutting_down");
    }
}
